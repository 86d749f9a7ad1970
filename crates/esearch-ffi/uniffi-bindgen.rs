//! UniFFI bindgen binary for generating Swift/Kotlin bindings
//!
//! Usage:
//!   cargo run -p esearch-ffi --features bindgen --bin uniffi-bindgen generate \
//!       --library target/release/libesearch_ffi.dylib \
//!       --language kotlin \
//!       --out-dir generated/kotlin

fn main() {
    uniffi::uniffi_bindgen_main()
}
