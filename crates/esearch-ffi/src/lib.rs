//! UniFFI bindings crate for esearch
//!
//! Wraps the esearch crate for UniFFI library mode binding generation by
//! re-exporting its FFI module and scaffolding.
//!
//! ## Building for Swift
//!
//! 1. Build the library for Apple platforms:
//!    ```bash
//!    cargo build --release -p esearch-ffi --target aarch64-apple-ios
//!    ```
//!
//! 2. Generate Swift bindings:
//!    ```bash
//!    cargo run -p esearch-ffi --features bindgen --bin uniffi-bindgen generate \
//!        --library target/aarch64-apple-ios/release/libesearch_ffi.a \
//!        --language swift \
//!        --out-dir generated/swift
//!    ```

pub use esearch::ffi::*;

esearch::uniffi_reexport_scaffolding!();
