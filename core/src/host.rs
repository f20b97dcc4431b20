// Host collaborator traits
//
// These are implemented by the embedding application, not by this crate.

use crate::types::CharacteristicId;
use crate::value::ValueSink;

/// Host-provided grant of extra run time while a state transition completes.
///
/// `begin` fires before each transport event handler runs and `end` after it
/// returns, so the host never suspends the process mid-transition.
#[cfg_attr(test, mockall::automock)]
pub trait LifecycleExtension: Send + Sync {
    fn begin(&self);
    fn end(&self);
}

/// Extension for hosts without suspension semantics.
pub struct NoLifecycleExtension;

impl LifecycleExtension for NoLifecycleExtension {
    fn begin(&self) {}
    fn end(&self) {}
}

/// Consulted while reconciling persisted listens after a relaunch.
///
/// Returning a sink adopts the still-subscribed characteristic: delivered
/// values flow into it without a fresh subscribe request. Returning `None`
/// has the stale listen cancelled and its persisted entry removed.
pub trait ListenRestorer: Send + Sync {
    fn restore(&self, characteristic: &CharacteristicId) -> Option<ValueSink>;
}
