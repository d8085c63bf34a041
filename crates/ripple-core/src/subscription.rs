//! Subscriptions
//!
//! Registration records, the callback wrapper, and the tagged request
//! types resolved once at the subscribe-call boundary.

use std::any::Any;
use std::cell::Cell;
use std::fmt;
use std::rc::{Rc, Weak};

use serde_json::Value;

use crate::Phase;
use crate::facade::EventFacade;
use crate::target::{DetachSpec, EventTarget, TargetState};

/// Subscriber callback.
///
/// Cloning shares identity: duplicate detection and callback-based detach
/// compare by pointer, never by value.
#[derive(Clone)]
pub struct Callback {
    f: Rc<dyn Fn(&EventFacade, &[Value])>,
}

impl Callback {
    /// Wrap a callback. The second argument is the subscription's bound
    /// payload.
    pub fn new(f: impl Fn(&EventFacade, &[Value]) + 'static) -> Self {
        Callback { f: Rc::new(f) }
    }

    /// Wrap a legacy guard callback: returning `false` halts the event,
    /// equivalent to `e.halt(true)`.
    pub fn guard(f: impl Fn(&EventFacade, &[Value]) -> bool + 'static) -> Self {
        Callback {
            f: Rc::new(move |event: &EventFacade, payload: &[Value]| {
                if !f(event, payload) {
                    event.halt(true);
                }
            }),
        }
    }

    /// Pointer identity
    pub fn ptr_eq(&self, other: &Callback) -> bool {
        Rc::ptr_eq(&self.f, &other.f)
    }

    pub(crate) fn invoke(&self, event: &EventFacade, payload: &[Value]) {
        (self.f)(event, payload);
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Callback({:p})", Rc::as_ptr(&self.f) as *const ())
    }
}

/// Fully-resolved arguments for one subscription
pub struct SubscribeArgs {
    pub event_type: String,
    pub phase: Phase,
    pub callback: Callback,
    /// Opaque context object readable from the facade's current
    /// subscription; stands in for a `this` override
    pub context: Option<Rc<dyn Any>>,
    /// Extra payload bound at subscribe time, passed after the facade
    pub payload: Vec<Value>,
    /// Auto-detach after the first notification
    pub once: bool,
}

impl SubscribeArgs {
    pub fn new(event_type: &str, phase: Phase, callback: Callback) -> Self {
        SubscribeArgs {
            event_type: event_type.to_string(),
            phase,
            callback,
            context: None,
            payload: Vec::new(),
            once: false,
        }
    }

    /// Attach a context object
    pub fn context(mut self, context: Rc<dyn Any>) -> Self {
        self.context = Some(context);
        self
    }

    /// Bind extra payload arguments
    pub fn payload(mut self, payload: Vec<Value>) -> Self {
        self.payload = payload;
        self
    }

    /// Mark for auto-detach after the first notification
    pub fn once(mut self) -> Self {
        self.once = true;
        self
    }
}

/// Subscribe-call boundary, resolved once before entering the core
/// algorithm.
pub enum SubscribeRequest {
    /// One event type
    Type { event_type: String, callback: Callback },
    /// Fan one callback out over several types
    Types {
        event_types: Vec<String>,
        callback: Callback,
    },
    /// Fan out a type → callback map
    Map(Vec<(String, Callback)>),
}

impl SubscribeRequest {
    /// Expand into per-subscription argument sets
    pub(crate) fn resolve(self, phase: Phase) -> Vec<SubscribeArgs> {
        match self {
            SubscribeRequest::Type {
                event_type,
                callback,
            } => vec![SubscribeArgs::new(&event_type, phase, callback)],
            SubscribeRequest::Types {
                event_types,
                callback,
            } => event_types
                .iter()
                .map(|event_type| SubscribeArgs::new(event_type, phase, callback.clone()))
                .collect(),
            SubscribeRequest::Map(entries) => entries
                .into_iter()
                .map(|(event_type, callback)| SubscribeArgs::new(&event_type, phase, callback))
                .collect(),
        }
    }
}

/// One registered subscriber for a (target, type, phase).
///
/// Owned exclusively by its target's subscription lists; removal is
/// identity-based, never value-based.
pub struct Subscription {
    target: Weak<TargetState>,
    event_type: String,
    phase: Phase,
    callback: Callback,
    context: Option<Rc<dyn Any>>,
    payload: Vec<Value>,
    details: Option<Rc<dyn Any>>,
    once: Cell<bool>,
}

impl Subscription {
    pub(crate) fn new(
        target: &EventTarget,
        args: SubscribeArgs,
        details: Option<Rc<dyn Any>>,
    ) -> Self {
        Subscription {
            target: target.state_weak(),
            event_type: args.event_type,
            phase: args.phase,
            callback: args.callback,
            context: args.context,
            payload: args.payload,
            details,
            once: Cell::new(args.once),
        }
    }

    /// Event type this subscription is attached to
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// Phase this subscription runs in
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// The registered callback
    pub fn callback(&self) -> &Callback {
        &self.callback
    }

    /// Context object supplied at subscribe time
    pub fn context(&self) -> Option<Rc<dyn Any>> {
        self.context.clone()
    }

    /// Payload bound at subscribe time
    pub fn payload(&self) -> &[Value] {
        &self.payload
    }

    /// Opaque details produced by the event's `parse_signature` hook
    pub fn details(&self) -> Option<Rc<dyn Any>> {
        self.details.clone()
    }

    /// Whether this subscription detaches itself after one notification
    pub fn once(&self) -> bool {
        self.once.get()
    }

    /// Invoke the callback for one dispatch. Once-subscriptions detach
    /// themselves afterwards, so a redundant `e.detach()` inside the
    /// callback stays a no-op.
    pub fn notify(self: &Rc<Self>, event: &EventFacade) {
        self.callback.invoke(event, &self.payload);

        if self.once.get() {
            self.detach();
        }
    }

    /// Remove this subscription from its target. No-op when the target is
    /// gone or the subscription was never registered.
    pub fn detach(self: &Rc<Self>) {
        if let Some(state) = self.target.upgrade() {
            EventTarget::from_state(state).detach(DetachSpec::Subscription(Rc::clone(self)));
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("event_type", &self.event_type)
            .field("phase", &self.phase)
            .field("once", &self.once.get())
            .finish()
    }
}

/// Handle to one registered subscription or a fanned-out batch
#[derive(Clone)]
pub enum SubscriptionHandle {
    Single(Rc<Subscription>),
    Batch(BatchSubscription),
}

impl SubscriptionHandle {
    /// Detach everything behind this handle
    pub fn detach(&self) {
        match self {
            SubscriptionHandle::Single(sub) => sub.detach(),
            SubscriptionHandle::Batch(batch) => batch.detach(),
        }
    }

    /// Flatten into the individual subscriptions
    pub fn subscriptions(&self) -> Vec<Rc<Subscription>> {
        match self {
            SubscriptionHandle::Single(sub) => vec![Rc::clone(sub)],
            SubscriptionHandle::Batch(batch) => batch
                .handles()
                .iter()
                .flat_map(|handle| handle.subscriptions())
                .collect(),
        }
    }
}

/// Composite handle over a fanned-out set of subscriptions; `detach`
/// fans out.
#[derive(Clone, Default)]
pub struct BatchSubscription {
    handles: Vec<SubscriptionHandle>,
}

impl BatchSubscription {
    pub(crate) fn new(handles: Vec<SubscriptionHandle>) -> Self {
        BatchSubscription { handles }
    }

    pub fn handles(&self) -> &[SubscriptionHandle] {
        &self.handles
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Detach every wrapped subscription
    pub fn detach(&self) {
        for handle in &self.handles {
            handle.detach();
        }
    }
}
