//! Admission control collaborator

use tracing::debug;

use crate::capability::GroupId;

/// Notified when queued work against a group may need re-evaluation
pub trait AdmissionScheduler: Send + Sync {
    /// Concurrency of a group changed, or a change to it finished
    fn wake(&self, group: GroupId);

    /// The group no longer exists
    fn on_group_removed(&self, group: GroupId);
}

/// Scheduler for processes that run no admission control
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopScheduler;

impl AdmissionScheduler for NoopScheduler {
    fn wake(&self, group: GroupId) {
        debug!(group = %group, "wake requested");
    }

    fn on_group_removed(&self, group: GroupId) {
        debug!(group = %group, "group removed");
    }
}
