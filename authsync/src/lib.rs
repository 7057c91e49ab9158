//! Host-facing bindings for `authsync-core`.
//!
//! Swift, Kotlin and JS hosts link this crate; it re-exports the core scaffolding so a single
//! library carries every exported type.

authsync_core::uniffi_reexport_scaffolding!();

pub use authsync_core::*;
