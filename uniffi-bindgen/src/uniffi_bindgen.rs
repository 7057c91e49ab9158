//! Generates Swift and Kotlin bindings for the `authsync` library.

fn main() {
    uniffi::uniffi_bindgen_main();
}
