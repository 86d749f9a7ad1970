//! Domain models

mod content;
mod entry;
mod session;
mod state;

pub use content::{Contact, ContentRecord};
pub use entry::{IndexCursor, IndexEntry, Location, MessageId, labels};
pub use session::BuildSession;
pub use state::{BuildPhase, IndexState, IndexStatus, PauseFlags, PauseReason, StatusSummary};
