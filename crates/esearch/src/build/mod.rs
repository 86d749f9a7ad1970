//! Index build pipeline
//!
//! Pages of message metadata are fetched newest first, details are fetched
//! and sealed on a worker pool, and entries are appended in page order. The
//! [`BuildSession`](crate::models::BuildSession) checkpoint is saved after
//! every page.

mod builder;
mod coordinator;
mod timing;

pub use builder::{BuilderParts, IndexBuilder, MailboxEvent, MetadataUpdate, StepOutcome};
pub use coordinator::BuildCoordinator;
pub use timing::interval_elapsed;
