//! Shared hub
//!
//! A process-wide event target for application-level events, the anchor
//! for one-time lifecycle events that outlive any single widget. Handles
//! are `!Send`, so the hub is per thread.

use crate::target::EventTarget;

thread_local! {
    static HUB: EventTarget = EventTarget::new();
}

/// The shared event target for the current thread
pub fn hub() -> EventTarget {
    HUB.with(|target| target.clone())
}
