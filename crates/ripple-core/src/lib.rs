//! ripple Core
//!
//! Phase-based custom event dispatch: before/after notification phases,
//! bubbling across object hierarchies, prevention and stop semantics,
//! fire-once caching, duplicate detection, and predicate-routed dynamic
//! events. Synchronous and re-entrant; handles are deliberately `!Send`.

mod event;
mod facade;
mod global;
mod router;
mod subscription;
mod target;

pub use event::{
    CustomEvent, DetachAction, DetachHook, EventConfig, NotifyFn, ParseSignatureFn,
    SubscribeAction, SubscribeHook, TestFn,
};
pub use facade::{EventFacade, StopLevel};
pub use global::hub;
pub use router::{RouteOps, RouteProbe, Router};
pub use serde_json::Value;
pub use subscription::{
    BatchSubscription, Callback, SubscribeArgs, SubscribeRequest, Subscription,
    SubscriptionHandle,
};
pub use target::{ClassDef, DetachSpec, EventTarget};

/// Type string under which the default event is registered
pub const DEFAULT_EVENT: &str = "@default";

/// Notification phase of a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Runs ahead of the default behavior and may prevent or stop it
    Before,
    /// Runs after the default behavior, and only when it was not prevented
    After,
}

/// Publish error
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("invalid route pattern `{pattern}`: {source}")]
    InvalidPattern {
        pattern: String,
        source: regex::Error,
    },
}
