//! Dynamic event routing
//!
//! Ordered predicate-tested candidates consulted when no exact type match
//! exists for a call. Each candidate registers for the lifecycle
//! operations it wants to claim; the first whose predicate matches wins,
//! and no match falls through to the default event.

use std::rc::Rc;

use serde_json::Value;

use crate::event::CustomEvent;
use crate::subscription::SubscribeArgs;
use crate::target::{DetachSpec, EventTarget};

/// Lifecycle operations a route participates in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteOps {
    pub subscribe: bool,
    pub unsubscribe: bool,
    pub fire: bool,
}

impl RouteOps {
    /// Claim subscriptions only (the common case for dynamic events)
    pub const SUBSCRIBE: RouteOps = RouteOps {
        subscribe: true,
        unsubscribe: false,
        fire: false,
    };

    /// Claim subscriptions and their detach counterpart
    pub const SUBSCRIBE_UNSUBSCRIBE: RouteOps = RouteOps {
        subscribe: true,
        unsubscribe: true,
        fire: false,
    };

    /// Claim every lifecycle operation
    pub const ALL: RouteOps = RouteOps {
        subscribe: true,
        unsubscribe: true,
        fire: true,
    };
}

/// Tagged view of the call being routed, handed to route predicates
pub enum RouteProbe<'a> {
    Subscribe(&'a SubscribeArgs),
    Unsubscribe {
        event_type: &'a str,
        spec: &'a DetachSpec,
    },
    Fire {
        event_type: &'a str,
        payload: &'a [Value],
    },
}

impl RouteProbe<'_> {
    /// Type string of the underlying call
    pub fn event_type(&self) -> &str {
        match self {
            RouteProbe::Subscribe(args) => &args.event_type,
            RouteProbe::Unsubscribe { event_type, .. } => event_type,
            RouteProbe::Fire { event_type, .. } => event_type,
        }
    }
}

#[derive(Clone)]
struct Route {
    event: Rc<CustomEvent>,
    ops: RouteOps,
}

/// Ordered list of dynamic-event candidates.
///
/// Cloning is cheap (shared policies), which lets the target test
/// predicates without holding a borrow on its own registry.
#[derive(Clone, Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    pub fn new() -> Self {
        Router::default()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Append a candidate; registration order is test order
    pub(crate) fn add(&mut self, event: Rc<CustomEvent>, ops: RouteOps) {
        self.routes.push(Route { event, ops });
    }

    /// First registered candidate claiming this operation whose predicate
    /// matches
    pub(crate) fn route(
        &self,
        target: &EventTarget,
        probe: &RouteProbe<'_>,
    ) -> Option<Rc<CustomEvent>> {
        for route in &self.routes {
            let claims = match probe {
                RouteProbe::Subscribe(_) => route.ops.subscribe,
                RouteProbe::Unsubscribe { .. } => route.ops.unsubscribe,
                RouteProbe::Fire { .. } => route.ops.fire,
            };

            if claims && route.event.test(target, probe) {
                tracing::trace!(
                    event_type = probe.event_type(),
                    route = route.event.event_type(),
                    "routed to dynamic event"
                );
                return Some(Rc::clone(&route.event));
            }
        }

        None
    }
}
