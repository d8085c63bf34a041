//! Event targets
//!
//! Per-object registries of published events and live subscriptions.
//! `EventTarget` is a cheaply cloneable handle; clones share one
//! registry, and identity (for bubbling and subscription ownership) is
//! the registry allocation, not the handle.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use serde_json::Value;

use crate::event::{CustomEvent, EventConfig};
use crate::router::{RouteOps, RouteProbe, Router};
use crate::subscription::{
    BatchSubscription, Callback, SubscribeArgs, SubscribeRequest, Subscription,
    SubscriptionHandle,
};
use crate::{DEFAULT_EVENT, Phase, PublishError};

/// Per-type subscription lists, one per phase
#[derive(Default)]
struct PhaseSubs {
    before: Vec<Rc<Subscription>>,
    after: Vec<Rc<Subscription>>,
}

impl PhaseSubs {
    fn list(&self, phase: Phase) -> &Vec<Rc<Subscription>> {
        match phase {
            Phase::Before => &self.before,
            Phase::After => &self.after,
        }
    }

    fn list_mut(&mut self, phase: Phase) -> &mut Vec<Rc<Subscription>> {
        match phase {
            Phase::Before => &mut self.before,
            Phase::After => &mut self.after,
        }
    }

    fn is_empty(&self) -> bool {
        self.before.is_empty() && self.after.is_empty()
    }
}

/// Shared class-level event registry.
///
/// Instances constructed with `EventTarget::with_class` resolve event
/// types they have not overridden against this registry, without copying
/// it per instance.
pub struct ClassDef {
    events: HashMap<String, Rc<CustomEvent>>,
    router: Router,
    default_event: Rc<CustomEvent>,
}

impl ClassDef {
    /// Build a class registry from named event configs plus the config
    /// for the class default event. Configs carrying a `test` predicate
    /// or `pattern` also register as dynamic subscription routes, in
    /// declaration order.
    pub fn configure(
        events: Vec<(String, EventConfig)>,
        default_config: EventConfig,
    ) -> Result<Rc<ClassDef>, PublishError> {
        let base = CustomEvent::base();
        let default_event = CustomEvent::derive(DEFAULT_EVENT, default_config, Some(base))?;

        let mut map = HashMap::new();
        let mut router = Router::new();

        for (event_type, config) in events {
            let event = CustomEvent::derive(&event_type, config, Some(Rc::clone(&default_event)))?;
            if event.has_test() {
                router.add(Rc::clone(&event), RouteOps::SUBSCRIBE);
            }
            map.insert(event_type, event);
        }

        Ok(Rc::new(ClassDef {
            events: map,
            router,
            default_event,
        }))
    }

    fn event(&self, event_type: &str) -> Option<Rc<CustomEvent>> {
        self.events.get(event_type).cloned()
    }

    fn router(&self) -> &Router {
        &self.router
    }

    fn default_event(&self) -> Rc<CustomEvent> {
        Rc::clone(&self.default_event)
    }
}

/// Detach-call boundary, resolved once like `SubscribeRequest`
pub enum DetachSpec {
    /// Everything on the target
    All,
    /// Exactly this subscription (identity, not value)
    Subscription(Rc<Subscription>),
    /// All subscriptions for a type, both phases
    Type(String),
    /// All subscriptions for a type in one phase
    TypePhase(String, Phase),
    /// Subscriptions for a type and phase bound to this callback
    Exact(String, Phase, Callback),
}

pub(crate) struct TargetState {
    class: Option<Rc<ClassDef>>,
    base: Rc<CustomEvent>,
    events: RefCell<HashMap<String, Rc<CustomEvent>>>,
    router: RefCell<Router>,
    subs: RefCell<HashMap<String, PhaseSubs>>,
    bubble_path: RefCell<Vec<EventTarget>>,
}

/// Handle to one event-target registry
#[derive(Clone)]
pub struct EventTarget {
    state: Rc<TargetState>,
}

impl EventTarget {
    /// Fresh registry with the built-in default event
    pub fn new() -> Self {
        EventTarget::build(None)
    }

    /// Fresh registry backed by a shared class-level registry
    pub fn with_class(class: Rc<ClassDef>) -> Self {
        EventTarget::build(Some(class))
    }

    fn build(class: Option<Rc<ClassDef>>) -> Self {
        EventTarget {
            state: Rc::new(TargetState {
                class,
                base: CustomEvent::base(),
                events: RefCell::new(HashMap::new()),
                router: RefCell::new(Router::new()),
                subs: RefCell::new(HashMap::new()),
                bubble_path: RefCell::new(Vec::new()),
            }),
        }
    }

    pub(crate) fn from_state(state: Rc<TargetState>) -> Self {
        EventTarget { state }
    }

    pub(crate) fn state_weak(&self) -> Weak<TargetState> {
        Rc::downgrade(&self.state)
    }

    /// Registry identity, used for bubble-path de-duplication
    pub(crate) fn id(&self) -> usize {
        Rc::as_ptr(&self.state) as usize
    }

    // === Publish ===

    /// Register or override an event on this instance. The new policy
    /// inherits from the previously resolved policy for the type (or the
    /// default event), so repeated publishes layer rather than replace.
    /// Publishing under `DEFAULT_EVENT` overrides the instance default.
    pub fn publish(
        &self,
        event_type: &str,
        config: EventConfig,
    ) -> Result<Rc<CustomEvent>, PublishError> {
        let parent = self
            .resolve_exact(event_type)
            .unwrap_or_else(|| self.default_event());
        let event = CustomEvent::derive(event_type, config, Some(parent))?;

        tracing::debug!(event_type, "published event");
        self.state
            .events
            .borrow_mut()
            .insert(event_type.to_string(), Rc::clone(&event));
        Ok(event)
    }

    /// Register an event inheriting from an explicit base policy
    pub fn publish_from(
        &self,
        event_type: &str,
        config: EventConfig,
        base: &Rc<CustomEvent>,
    ) -> Result<Rc<CustomEvent>, PublishError> {
        let event = CustomEvent::derive(event_type, config, Some(Rc::clone(base)))?;

        self.state
            .events
            .borrow_mut()
            .insert(event_type.to_string(), Rc::clone(&event));
        Ok(event)
    }

    /// Register a dynamic event: besides the exact type entry, it joins
    /// the router for the given lifecycle operations and can claim calls
    /// whose type string it was not published under.
    pub fn publish_smart(
        &self,
        event_type: &str,
        config: EventConfig,
        ops: RouteOps,
    ) -> Result<Rc<CustomEvent>, PublishError> {
        let event = self.publish(event_type, config)?;
        self.state.router.borrow_mut().add(Rc::clone(&event), ops);
        Ok(event)
    }

    /// Publish several events at once
    pub fn publish_map(
        &self,
        defs: impl IntoIterator<Item = (String, EventConfig)>,
    ) -> Result<(), PublishError> {
        for (event_type, config) in defs {
            self.publish(&event_type, config)?;
        }
        Ok(())
    }

    /// Exact-match published event, instance overrides first
    pub fn event(&self, event_type: &str) -> Option<Rc<CustomEvent>> {
        self.resolve_exact(event_type)
    }

    fn resolve_exact(&self, event_type: &str) -> Option<Rc<CustomEvent>> {
        if let Some(event) = self.state.events.borrow().get(event_type) {
            return Some(Rc::clone(event));
        }
        self.state
            .class
            .as_ref()
            .and_then(|class| class.event(event_type))
    }

    fn default_event(&self) -> Rc<CustomEvent> {
        if let Some(event) = self.state.events.borrow().get(DEFAULT_EVENT) {
            return Rc::clone(event);
        }
        if let Some(class) = &self.state.class {
            return class.default_event();
        }
        Rc::clone(&self.state.base)
    }

    /// Three-tier resolution: exact match (instance, then class) →
    /// dynamic routes (instance, then class) → default event.
    pub(crate) fn resolve_event(
        &self,
        event_type: &str,
        probe: &RouteProbe<'_>,
    ) -> Rc<CustomEvent> {
        if event_type != DEFAULT_EVENT {
            if let Some(event) = self.resolve_exact(event_type) {
                return event;
            }

            // Clone keeps the registry borrow out of predicate calls
            let router = self.state.router.borrow().clone();
            if let Some(event) = router.route(self, probe) {
                return event;
            }

            if let Some(class) = &self.state.class {
                if let Some(event) = class.router().route(self, probe) {
                    return event;
                }
            }
        }

        self.default_event()
    }

    // === Subscribe ===

    /// Subscribe in the "before" phase
    pub fn on(&self, event_type: &str, callback: Callback) -> Option<SubscriptionHandle> {
        self.subscribe(SubscribeArgs::new(event_type, Phase::Before, callback))
    }

    /// Subscribe in the "after" phase
    pub fn after(&self, event_type: &str, callback: Callback) -> Option<SubscriptionHandle> {
        self.subscribe(SubscribeArgs::new(event_type, Phase::After, callback))
    }

    /// `on`, detaching automatically after the first notification
    pub fn once(&self, event_type: &str, callback: Callback) -> Option<SubscriptionHandle> {
        self.subscribe(SubscribeArgs::new(event_type, Phase::Before, callback).once())
    }

    /// `after`, detaching automatically after the first notification
    pub fn once_after(&self, event_type: &str, callback: Callback) -> Option<SubscriptionHandle> {
        self.subscribe(SubscribeArgs::new(event_type, Phase::After, callback).once())
    }

    /// General subscription entry point
    pub fn subscribe(&self, args: SubscribeArgs) -> Option<SubscriptionHandle> {
        let event = {
            let probe = RouteProbe::Subscribe(&args);
            self.resolve_event(&args.event_type, &probe)
        };

        event.subscribe(self, args)
    }

    /// Fan a request out into one subscription per resolved type. A
    /// multi-entry request returns a batch handle; entries aborted by
    /// duplicate detection or hooks are simply absent from it.
    pub fn subscribe_request(
        &self,
        phase: Phase,
        request: SubscribeRequest,
    ) -> Option<SubscriptionHandle> {
        let mut resolved = request.resolve(phase);

        if resolved.len() == 1 {
            return self.subscribe(resolved.remove(0));
        }

        let handles: Vec<SubscriptionHandle> = resolved
            .into_iter()
            .filter_map(|args| self.subscribe(args))
            .collect();

        if handles.is_empty() {
            None
        } else {
            Some(SubscriptionHandle::Batch(BatchSubscription::new(handles)))
        }
    }

    // === Fire ===

    /// Notify subscribers of `event_type` along the bubble path
    pub fn fire(&self, event_type: &str, payload: Vec<Value>) {
        let event = {
            let probe = RouteProbe::Fire {
                event_type,
                payload: &payload,
            };
            self.resolve_event(event_type, &probe)
        };

        event.fire(self, event_type, payload);
    }

    // === Detach ===

    /// Remove the subscriptions the spec selects; each removal consults
    /// the resolved event's detach gate. Unknown subscriptions are a
    /// no-op.
    pub fn detach(&self, spec: DetachSpec) {
        let event_type = match &spec {
            DetachSpec::All => {
                self.detach_all();
                return;
            }
            DetachSpec::Subscription(sub) => sub.event_type().to_string(),
            DetachSpec::Type(event_type)
            | DetachSpec::TypePhase(event_type, _)
            | DetachSpec::Exact(event_type, _, _) => event_type.clone(),
        };

        let event = {
            let probe = RouteProbe::Unsubscribe {
                event_type: &event_type,
                spec: &spec,
            };
            self.resolve_event(&event_type, &probe)
        };

        match &spec {
            DetachSpec::Subscription(sub) => {
                event.unsubscribe(self, sub);
            }
            DetachSpec::Type(_) => {
                for sub in self.subs_snapshot_all(&event_type) {
                    event.unsubscribe(self, &sub);
                }
            }
            DetachSpec::TypePhase(_, phase) => {
                for sub in self.subscriptions(&event_type, *phase) {
                    event.unsubscribe(self, &sub);
                }
            }
            DetachSpec::Exact(_, phase, callback) => {
                for sub in self.subscriptions(&event_type, *phase) {
                    if sub.callback().ptr_eq(callback) {
                        event.unsubscribe(self, &sub);
                    }
                }
            }
            DetachSpec::All => {}
        }
    }

    /// Remove every subscription on this target
    pub fn detach_all(&self) {
        let types: Vec<String> = self.state.subs.borrow().keys().cloned().collect();

        tracing::debug!(types = types.len(), "detaching all subscriptions");
        for event_type in types {
            self.detach(DetachSpec::Type(event_type));
        }
    }

    // === Bubbling ===

    /// Register a bubble destination; duplicates are ignored
    pub fn add_target(&self, target: &EventTarget) {
        let mut path = self.state.bubble_path.borrow_mut();
        if !path.iter().any(|existing| existing == target) {
            path.push(target.clone());
        }
    }

    pub(crate) fn bubble_targets(&self) -> Vec<EventTarget> {
        self.state.bubble_path.borrow().clone()
    }

    // === Subscription bookkeeping ===

    /// Whether any subscription exists for a type, in either phase
    pub fn has_subs(&self, event_type: &str) -> bool {
        self.state
            .subs
            .borrow()
            .get(event_type)
            .is_some_and(|phase_subs| !phase_subs.is_empty())
    }

    /// Snapshot of the live subscriptions for a type and phase.
    ///
    /// The dispatcher iterates this copy, so detaching during
    /// notification never corrupts an in-flight pass.
    pub fn subscriptions(&self, event_type: &str, phase: Phase) -> Vec<Rc<Subscription>> {
        self.state
            .subs
            .borrow()
            .get(event_type)
            .map(|phase_subs| phase_subs.list(phase).clone())
            .unwrap_or_default()
    }

    fn subs_snapshot_all(&self, event_type: &str) -> Vec<Rc<Subscription>> {
        let mut subs = self.subscriptions(event_type, Phase::Before);
        subs.extend(self.subscriptions(event_type, Phase::After));
        subs
    }

    pub(crate) fn register(&self, sub: &Rc<Subscription>) {
        self.state
            .subs
            .borrow_mut()
            .entry(sub.event_type().to_string())
            .or_default()
            .list_mut(sub.phase())
            .push(Rc::clone(sub));
    }

    /// Identity-based removal; false when the subscription was not
    /// registered here
    pub(crate) fn unregister(&self, sub: &Rc<Subscription>) -> bool {
        let mut subs = self.state.subs.borrow_mut();
        let Some(phase_subs) = subs.get_mut(sub.event_type()) else {
            return false;
        };

        let list = phase_subs.list_mut(sub.phase());
        match list.iter().position(|existing| Rc::ptr_eq(existing, sub)) {
            Some(index) => {
                list.remove(index);
                true
            }
            None => false,
        }
    }

    /// Whether an equivalent (type, phase, callback) subscription is live
    pub(crate) fn is_subscribed(&self, sub: &Rc<Subscription>) -> bool {
        self.subscriptions(sub.event_type(), sub.phase())
            .iter()
            .any(|existing| existing.callback().ptr_eq(sub.callback()))
    }

    pub(crate) fn clear_subs(&self, event_type: &str) {
        self.state.subs.borrow_mut().remove(event_type);
    }

    /// Swap in the derived replay event after a fire-once event's first
    /// fire; later subscriptions to the type resolve to it
    pub(crate) fn install_replay(
        &self,
        event_type: &str,
        source: &Rc<CustomEvent>,
        event: &Rc<crate::facade::EventFacade>,
    ) {
        let derived = CustomEvent::derive_replay(event_type, source, event);
        self.state
            .events
            .borrow_mut()
            .insert(event_type.to_string(), derived);
    }
}

impl Default for EventTarget {
    fn default() -> Self {
        EventTarget::new()
    }
}

impl PartialEq for EventTarget {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.state, &other.state)
    }
}

impl Eq for EventTarget {}

impl fmt::Debug for EventTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventTarget({:#x})", self.id())
    }
}
