use lab_core::StateChange;
use lab_core::model::CompletionReport;

/// Default capacity of a lab's event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// State-change notifications published while a lab is open.
///
/// Subscribers that fall behind lose the oldest events (see
/// `tokio::sync::broadcast`); the session itself stays authoritative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LabEvent {
    Started,
    TaskUpdated(StateChange),
    Completed(CompletionReport),
    /// Elapsed seconds accepted by the backend.
    TimeSynced(u64),
    TimeSyncFailed(String),
}
