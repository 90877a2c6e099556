use crate::domain::models::TransitionEvent;

/// Fire-and-forget sink for status transitions.
///
/// Implementations must not block and must swallow delivery failures.
pub trait Broadcaster: Send + Sync {
    fn publish(&self, event: TransitionEvent);
}

/// Broadcaster that drops everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullBroadcaster;

impl Broadcaster for NullBroadcaster {
    fn publish(&self, _event: TransitionEvent) {}
}
