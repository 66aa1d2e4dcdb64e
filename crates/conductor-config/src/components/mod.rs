//! Configuration components for conductor

pub mod observe;

pub use observe::*;
