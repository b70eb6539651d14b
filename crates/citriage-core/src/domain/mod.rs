//! Domain models for citriage.
//!
//! - `Issue`: an open issue as returned by the issue tracker
//! - error taxonomy shared by every component

pub mod error;
pub mod issue;

pub use error::{BacklogError, Result, TriageError};
pub use issue::{Assignee, Issue, Label};
