//! CLI command implementations.

pub mod aggregate;
pub mod inspect;
pub mod sync;
