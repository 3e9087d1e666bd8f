//! Cooperative startup tasks.
//!
//! Startup work (camera authorization, model staging) runs as small state
//! machines polled once per display refresh. A task never blocks the refresh
//! loop: anything that has to wait reports `Awaiting` and is polled again on
//! the next refresh.

/// Progress of a cooperative task.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TaskState {
    /// Created but not yet polled.
    #[default]
    Pending,
    /// Suspended on an external event (prompt, fetch).
    Awaiting,
    Succeeded,
    Failed,
}
