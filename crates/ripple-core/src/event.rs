//! Custom event policy and dispatch
//!
//! A `CustomEvent` is the immutable, shared policy for one named event:
//! how it subscribes, bubbles, fires, and what hooks run along the way.
//! Policies chain through an explicit `parent` reference; unset fields
//! fall back along the chain, ending in the built-in defaults.

use std::any::Any;
use std::collections::{HashSet, VecDeque};
use std::rc::Rc;

use serde_json::Value;

use crate::facade::{EventFacade, StopLevel};
use crate::router::RouteProbe;
use crate::subscription::{SubscribeArgs, Subscription, SubscriptionHandle};
use crate::target::EventTarget;
use crate::{Phase, PublishError};

/// Outcome of an `on_subscribe` gate
pub enum SubscribeAction {
    /// Register the subscription locally
    Register,
    /// Drop the subscription silently
    Abort,
    /// The hook routed the subscription elsewhere; its handle is returned
    /// to the caller without local registration
    Replace(SubscriptionHandle),
}

/// Outcome of an `on_detach` gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetachAction {
    Proceed,
    Abort,
}

/// Default behavior, stopped, and prevented hooks; bound to the target
/// the event was fired on
pub type NotifyFn = Rc<dyn Fn(&EventTarget, &EventFacade)>;

/// Subscription gate, consulted before registration
pub type SubscribeHook = Rc<dyn Fn(&EventTarget, &Rc<Subscription>) -> SubscribeAction>;

/// Unsubscription gate, consulted before removal
pub type DetachHook = Rc<dyn Fn(&EventTarget, &Rc<Subscription>) -> DetachAction>;

/// Derives per-subscription details from (and may rewrite) the raw
/// subscribe arguments
pub type ParseSignatureFn = Rc<dyn Fn(&mut SubscribeArgs) -> Option<Rc<dyn Any>>>;

/// Router predicate; must be pure
pub type TestFn = Rc<dyn Fn(&EventTarget, &RouteProbe<'_>) -> bool>;

/// Declarative overrides for a published event. Unset fields fall back
/// through the parent policy chain.
#[derive(Clone, Default)]
pub struct EventConfig {
    pub bubbles: Option<bool>,
    pub preventable: Option<bool>,
    pub prevent_dups: Option<bool>,
    pub fire_once: Option<bool>,
    pub on_subscribe: Option<SubscribeHook>,
    pub on_detach: Option<DetachHook>,
    pub parse_signature: Option<ParseSignatureFn>,
    pub default_fn: Option<NotifyFn>,
    pub stopped_fn: Option<NotifyFn>,
    pub prevented_fn: Option<NotifyFn>,
    pub test: Option<TestFn>,
    /// Regex sugar for `test`, matched against the type string; compiled
    /// at publish time
    pub pattern: Option<String>,
}

impl EventConfig {
    pub fn new() -> Self {
        EventConfig::default()
    }

    pub fn bubbles(mut self, bubbles: bool) -> Self {
        self.bubbles = Some(bubbles);
        self
    }

    pub fn preventable(mut self, preventable: bool) -> Self {
        self.preventable = Some(preventable);
        self
    }

    pub fn prevent_dups(mut self, prevent_dups: bool) -> Self {
        self.prevent_dups = Some(prevent_dups);
        self
    }

    pub fn fire_once(mut self, fire_once: bool) -> Self {
        self.fire_once = Some(fire_once);
        self
    }

    pub fn on_subscribe(
        mut self,
        hook: impl Fn(&EventTarget, &Rc<Subscription>) -> SubscribeAction + 'static,
    ) -> Self {
        self.on_subscribe = Some(Rc::new(hook));
        self
    }

    pub fn on_detach(
        mut self,
        hook: impl Fn(&EventTarget, &Rc<Subscription>) -> DetachAction + 'static,
    ) -> Self {
        self.on_detach = Some(Rc::new(hook));
        self
    }

    pub fn parse_signature(
        mut self,
        parse: impl Fn(&mut SubscribeArgs) -> Option<Rc<dyn Any>> + 'static,
    ) -> Self {
        self.parse_signature = Some(Rc::new(parse));
        self
    }

    pub fn default_fn(mut self, f: impl Fn(&EventTarget, &EventFacade) + 'static) -> Self {
        self.default_fn = Some(Rc::new(f));
        self
    }

    pub fn stopped_fn(mut self, f: impl Fn(&EventTarget, &EventFacade) + 'static) -> Self {
        self.stopped_fn = Some(Rc::new(f));
        self
    }

    pub fn prevented_fn(mut self, f: impl Fn(&EventTarget, &EventFacade) + 'static) -> Self {
        self.prevented_fn = Some(Rc::new(f));
        self
    }

    pub fn test(mut self, test: impl Fn(&EventTarget, &RouteProbe<'_>) -> bool + 'static) -> Self {
        self.test = Some(Rc::new(test));
        self
    }

    pub fn pattern(mut self, pattern: &str) -> Self {
        self.pattern = Some(pattern.to_string());
        self
    }
}

/// Immutable policy for one named event, shared by reference.
///
/// Per-fire state never lands here; fire-once caching derives a new
/// instance-published event instead of mutating the shared policy.
pub struct CustomEvent {
    event_type: String,
    config: EventConfig,
    pattern: Option<regex::Regex>,
    parent: Option<Rc<CustomEvent>>,
    replay: Option<Rc<EventFacade>>,
}

impl CustomEvent {
    /// Root policy every chain ends in: bubbling, preventable, no hooks
    pub(crate) fn base() -> Rc<CustomEvent> {
        Rc::new(CustomEvent {
            event_type: crate::DEFAULT_EVENT.to_string(),
            config: EventConfig::default(),
            pattern: None,
            parent: None,
            replay: None,
        })
    }

    /// Derive a new policy from a parent, compiling the route pattern if
    /// one was configured
    pub(crate) fn derive(
        event_type: &str,
        config: EventConfig,
        parent: Option<Rc<CustomEvent>>,
    ) -> Result<Rc<CustomEvent>, PublishError> {
        let pattern = match &config.pattern {
            Some(raw) => Some(regex::Regex::new(raw).map_err(|source| {
                PublishError::InvalidPattern {
                    pattern: raw.clone(),
                    source,
                }
            })?),
            None => None,
        };

        Ok(Rc::new(CustomEvent {
            event_type: event_type.to_string(),
            config,
            pattern,
            parent,
            replay: None,
        }))
    }

    /// Derived instance-level event installed after a fire-once event's
    /// first fire; carries the cached facade
    pub(crate) fn derive_replay(
        event_type: &str,
        parent: &Rc<CustomEvent>,
        event: &Rc<EventFacade>,
    ) -> Rc<CustomEvent> {
        Rc::new(CustomEvent {
            event_type: event_type.to_string(),
            config: EventConfig::default(),
            pattern: None,
            parent: Some(Rc::clone(parent)),
            replay: Some(Rc::clone(event)),
        })
    }

    /// Type string this policy was published under
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// Parent policy this one falls back to
    pub fn parent(&self) -> Option<Rc<CustomEvent>> {
        self.parent.clone()
    }

    fn lookup<T>(&self, pick: impl Fn(&EventConfig) -> Option<T>) -> Option<T> {
        let mut node = Some(self);
        while let Some(event) = node {
            if let Some(value) = pick(&event.config) {
                return Some(value);
            }
            node = event.parent.as_deref();
        }
        None
    }

    pub fn bubbles(&self) -> bool {
        self.lookup(|c| c.bubbles).unwrap_or(true)
    }

    pub fn preventable(&self) -> bool {
        self.lookup(|c| c.preventable).unwrap_or(true)
    }

    pub fn prevent_dups(&self) -> bool {
        self.lookup(|c| c.prevent_dups).unwrap_or(false)
    }

    pub fn fire_once(&self) -> bool {
        self.lookup(|c| c.fire_once).unwrap_or(false)
    }

    fn on_subscribe_hook(&self) -> Option<SubscribeHook> {
        self.lookup(|c| c.on_subscribe.clone())
    }

    fn on_detach_hook(&self) -> Option<DetachHook> {
        self.lookup(|c| c.on_detach.clone())
    }

    fn parse_signature_hook(&self) -> Option<ParseSignatureFn> {
        self.lookup(|c| c.parse_signature.clone())
    }

    fn default_fn_hook(&self) -> Option<NotifyFn> {
        self.lookup(|c| c.default_fn.clone())
    }

    fn stopped_fn_hook(&self) -> Option<NotifyFn> {
        self.lookup(|c| c.stopped_fn.clone())
    }

    fn prevented_fn_hook(&self) -> Option<NotifyFn> {
        self.lookup(|c| c.prevented_fn.clone())
    }

    fn lookup_pattern(&self) -> Option<&regex::Regex> {
        let mut node = Some(self);
        while let Some(event) = node {
            if let Some(pattern) = &event.pattern {
                return Some(pattern);
            }
            node = event.parent.as_deref();
        }
        None
    }

    /// Whether this event can claim routed calls
    pub(crate) fn has_test(&self) -> bool {
        self.lookup(|c| c.test.clone()).is_some() || self.lookup_pattern().is_some()
    }

    /// Router predicate: an explicit `test` wins over the `pattern` sugar
    pub(crate) fn test(&self, target: &EventTarget, probe: &RouteProbe<'_>) -> bool {
        if let Some(test) = self.lookup(|c| c.test.clone()) {
            return test(target, probe);
        }
        if let Some(pattern) = self.lookup_pattern() {
            return pattern.is_match(probe.event_type());
        }
        false
    }

    // === Subscribe ===

    /// Subscription gate: parse the signature, reject duplicates, consult
    /// the `on_subscribe` hook, then register. Returns None when the
    /// subscription was aborted.
    pub(crate) fn subscribe(
        self: &Rc<Self>,
        target: &EventTarget,
        mut args: SubscribeArgs,
    ) -> Option<SubscriptionHandle> {
        if let Some(cached) = self.replay.clone() {
            return self.replay_subscribe(target, args, cached);
        }

        let details = match self.parse_signature_hook() {
            Some(parse) => parse(&mut args),
            None => None,
        };

        let sub = Rc::new(Subscription::new(target, args, details));

        if self.prevent_dups() && target.is_subscribed(&sub) {
            tracing::trace!(event_type = sub.event_type(), "duplicate subscription rejected");
            return None;
        }

        if let Some(hook) = self.on_subscribe_hook() {
            match hook(target, &sub) {
                SubscribeAction::Register => {}
                SubscribeAction::Abort => return None,
                SubscribeAction::Replace(handle) => return Some(handle),
            }
        }

        target.register(&sub);
        Some(SubscriptionHandle::Single(sub))
    }

    /// Immediate replay for fire-once events that already fired: the
    /// would-be subscriber runs synchronously against the cached facade
    /// and is never queued.
    fn replay_subscribe(
        &self,
        target: &EventTarget,
        mut args: SubscribeArgs,
        cached: Rc<EventFacade>,
    ) -> Option<SubscriptionHandle> {
        let details = match self.parse_signature_hook() {
            Some(parse) => parse(&mut args),
            None => None,
        };

        let sub = Rc::new(Subscription::new(target, args, details));

        if let Some(hook) = self.on_subscribe_hook() {
            match hook(target, &sub) {
                SubscribeAction::Register => {}
                SubscribeAction::Abort => return None,
                SubscribeAction::Replace(handle) => return Some(handle),
            }
        }

        // After-phase subscribers never run for a prevented outcome
        if sub.phase() == Phase::After && self.preventable() && cached.prevented() {
            return None;
        }

        cached.set_current_target(target);
        cached.set_subscription(Some(Rc::clone(&sub)));
        sub.notify(&cached);
        cached.set_subscription(None);

        Some(SubscriptionHandle::Single(sub))
    }

    // === Detach ===

    /// Unsubscription gate: consult the `on_detach` hook, then remove by
    /// identity. Returns whether the subscription was removed.
    pub(crate) fn unsubscribe(&self, target: &EventTarget, sub: &Rc<Subscription>) -> bool {
        if let Some(hook) = self.on_detach_hook() {
            if hook(target, sub) == DetachAction::Abort {
                return false;
            }
        }

        target.unregister(sub)
    }

    // === Fire ===

    /// Dispatch one fire: resolve the bubble path, run the before phase,
    /// the stopped/prevented/default behavior, then the after phase, and
    /// finally install the fire-once replay cache if applicable.
    pub(crate) fn fire(self: &Rc<Self>, target: &EventTarget, event_type: &str, payload: Vec<Value>) {
        let mut path = self.resolve_bubble_path(target);

        let has_subs = path.iter().any(|t| t.has_subs(event_type));
        if !has_subs {
            // Fast path: nothing to notify and no behavior to run. A
            // fire-once event's first fire always proceeds so the facade
            // gets cached for replay.
            let fired = self.replay.is_some();
            if fired || (self.default_fn_hook().is_none() && !self.fire_once()) {
                tracing::trace!(event_type, "fire skipped: no subscribers");
                return;
            }
        }

        tracing::trace!(event_type, targets = path.len(), "fire");

        let event = Rc::new(EventFacade::new(event_type, target, payload));

        self.notify(&mut path, &event, Phase::Before);

        if event.stopped() > StopLevel::None {
            if let Some(stopped_fn) = self.stopped_fn_hook() {
                stopped_fn(target, &event);
            }
        }

        let prevented = self.preventable() && event.prevented();
        if prevented {
            if let Some(prevented_fn) = self.prevented_fn_hook() {
                prevented_fn(target, &event);
            }
        } else if let Some(default_fn) = self.default_fn_hook() {
            default_fn(target, &event);
        }

        if !prevented && event.stopped() < StopLevel::Immediate {
            self.notify(&mut path, &event, Phase::After);
        }

        if self.fire_once() && self.replay.is_none() {
            target.clear_subs(event_type);
            target.install_replay(event_type, self, &event);
        }
    }

    /// Breadth-first bubble path from the firing target over `add_target`
    /// edges. A visited set defends against cycles; on diamond-shaped
    /// graphs the first occurrence wins.
    pub(crate) fn resolve_bubble_path(&self, root: &EventTarget) -> Vec<EventTarget> {
        if !self.bubbles() {
            return vec![root.clone()];
        }

        let mut path = Vec::new();
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([root.clone()]);

        while let Some(target) = queue.pop_front() {
            if !seen.insert(target.id()) {
                continue;
            }
            queue.extend(target.bubble_targets());
            path.push(target);
        }

        path
    }

    /// Notify one phase across the path.
    ///
    /// Subscriber lists are snapshotted per target, so a detach during
    /// notification never affects the current pass. A stop raised during
    /// this pass truncates the path in place; the after phase then reuses
    /// the cut without re-tripping on a flag carried over from before.
    fn notify(&self, path: &mut Vec<EventTarget>, event: &Rc<EventFacade>, phase: Phase) {
        let entry_stop = event.stopped();

        for index in 0..path.len() {
            let target = path[index].clone();
            let subs = target.subscriptions(event.event_type(), phase);
            if subs.is_empty() {
                continue;
            }

            event.set_current_target(&target);

            for sub in &subs {
                event.set_subscription(Some(Rc::clone(sub)));
                sub.notify(event);

                if event.stopped() == StopLevel::Immediate {
                    break;
                }
            }
            event.set_subscription(None);

            if event.stopped() > entry_stop {
                path.truncate(index + 1);
                break;
            }
        }
    }
}
