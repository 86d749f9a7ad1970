//! FFI bindings for UniFFI export
//!
//! Swift/Kotlin bindings for the esearch crate.
//!
//! ## Usage from Swift
//!
//! ```swift
//! import EsearchFFI
//!
//! initializeLogging(callback: myLogCallback, maxLevel: .info)
//!
//! let search = try SearchService(
//!     userId: userId,
//!     indexRoot: appSupport.path,
//!     remote: mailboxBridge,
//!     crypto: pgpBridge
//! )
//! try search.observeNetwork(status: .wifi)
//! try search.enable()
//!
//! let page = try search.search(query: "\"quarterly report\" alice")
//! let more = try search.nextPage()
//! ```

mod logging;
mod service;
mod types;

pub use logging::{init_ffi_logger, initialize_logging, set_log_callback, set_log_level};
pub use service::*;
pub use types::*;
