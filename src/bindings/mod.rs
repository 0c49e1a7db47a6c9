//! Feature-gated FFI surfaces.

pub mod python;
