//! Event facade
//!
//! The single mutable object handed to every subscriber during one fire.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use serde_json::{Map, Value};

use crate::subscription::Subscription;
use crate::target::EventTarget;

/// Propagation stop level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum StopLevel {
    /// Propagation continues
    None,
    /// Remaining bubble targets are skipped; the current target finishes
    Propagation,
    /// Remaining subscribers on the current target are skipped too
    Immediate,
}

/// Per-fire event object, shared by every notified subscriber.
///
/// One facade is created per `fire()` and mutated in place as it moves
/// along the bubble path; it carries the propagation flags that the
/// dispatcher observes between callbacks.
pub struct EventFacade {
    event_type: String,
    target: EventTarget,
    details: Vec<Value>,
    data: RefCell<Map<String, Value>>,
    prevented: Cell<bool>,
    stopped: Cell<StopLevel>,
    current_target: RefCell<EventTarget>,
    subscription: RefCell<Option<Rc<Subscription>>>,
}

impl EventFacade {
    /// Build the facade for one dispatch. The first object-typed payload
    /// argument seeds the data map.
    pub(crate) fn new(event_type: &str, target: &EventTarget, payload: Vec<Value>) -> Self {
        let data = match payload.first() {
            Some(Value::Object(map)) => map.clone(),
            _ => Map::new(),
        };

        EventFacade {
            event_type: event_type.to_string(),
            target: target.clone(),
            details: payload,
            data: RefCell::new(data),
            prevented: Cell::new(false),
            stopped: Cell::new(StopLevel::None),
            current_target: RefCell::new(target.clone()),
            subscription: RefCell::new(None),
        }
    }

    /// Event type string
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// Target the event was fired on
    pub fn target(&self) -> EventTarget {
        self.target.clone()
    }

    /// Target currently being notified
    pub fn current_target(&self) -> EventTarget {
        self.current_target.borrow().clone()
    }

    /// Raw payload list passed to `fire`
    pub fn details(&self) -> &[Value] {
        &self.details
    }

    /// Subscription currently being notified, if any
    pub fn subscription(&self) -> Option<Rc<Subscription>> {
        self.subscription.borrow().clone()
    }

    /// Read a named property. `type` and `details` resolve from the facade
    /// itself so payload data cannot shadow the event identity; anything
    /// else comes from the data map.
    pub fn get(&self, name: &str) -> Option<Value> {
        match name {
            "type" => Some(Value::String(self.event_type.clone())),
            "details" => Some(Value::Array(self.details.clone())),
            _ => self.data.borrow().get(name).cloned(),
        }
    }

    /// Write a named property into the data map
    pub fn set(&self, name: &str, value: Value) {
        self.data.borrow_mut().insert(name.to_string(), value);
    }

    /// Suppress the event's default behavior. Honored only when the event
    /// policy is preventable.
    pub fn prevent_default(&self) {
        self.prevented.set(true);
    }

    /// Skip remaining bubble targets
    pub fn stop_propagation(&self) {
        if self.stopped.get() < StopLevel::Propagation {
            self.stopped.set(StopLevel::Propagation);
        }
    }

    /// Skip remaining subscribers on the current target as well
    pub fn stop_immediate_propagation(&self) {
        self.stopped.set(StopLevel::Immediate);
    }

    /// `prevent_default` plus `stop_propagation`, or the immediate variant
    pub fn halt(&self, immediate: bool) {
        self.prevent_default();
        if immediate {
            self.stop_immediate_propagation();
        } else {
            self.stop_propagation();
        }
    }

    /// Detach the subscription currently being notified
    pub fn detach(&self) {
        if let Some(sub) = self.subscription() {
            sub.detach();
        }
    }

    /// Whether `prevent_default` was called
    pub fn prevented(&self) -> bool {
        self.prevented.get()
    }

    /// Current stop level
    pub fn stopped(&self) -> StopLevel {
        self.stopped.get()
    }

    pub(crate) fn set_current_target(&self, target: &EventTarget) {
        *self.current_target.borrow_mut() = target.clone();
    }

    pub(crate) fn set_subscription(&self, sub: Option<Rc<Subscription>>) {
        *self.subscription.borrow_mut() = sub;
    }
}

impl fmt::Debug for EventFacade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventFacade")
            .field("event_type", &self.event_type)
            .field("prevented", &self.prevented.get())
            .field("stopped", &self.stopped.get())
            .finish()
    }
}
