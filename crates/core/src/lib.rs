#![forbid(unsafe_code)]

pub mod error;
pub mod model;
pub mod progression;
pub mod session;
pub mod time;

pub use error::{InvalidStateError, ProgressError, ValidationError};
pub use progression::{
    StateChange, SubmissionOutcome, SubmissionTicket, TaskProgress, TaskProgressController,
};
pub use session::LabSession;
pub use time::Clock;
