mod events;
mod time_sync;
mod workflow;

pub use events::{EVENT_CHANNEL_CAPACITY, LabEvent};
pub use time_sync::TimeSyncHandle;
pub use workflow::{ActiveLab, DEFAULT_TIME_SYNC_INTERVAL, LabLoopService};
