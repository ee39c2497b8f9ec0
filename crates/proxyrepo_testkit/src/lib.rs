//! # Proxy Repo Testkit
//!
//! Test utilities for proxyrepo.
//!
//! This crate provides:
//! - Repository fixtures with a manual clock
//! - In-memory sink and content stand-ins plus a pipeline harness
//! - Property-based generators for feeds, item sizes and limits
//! - Queue and pipeline stress runs
//!
//! ## Usage
//!
//! ```rust
//! use proxyrepo_testkit::prelude::*;
//! use proxyrepo_core::FeedKey;
//!
//! let repo = TestRepo::memory();
//! add_examined_source(&repo, 1, &FeedKey::new("F", "Raw Events"), &[10, 20]);
//! let report = PipelineHarness::new(&repo).run_cycle().unwrap();
//! assert_eq!(report.items_claimed, 2);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod pipeline;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::pipeline::*;
    pub use crate::stress::*;
}

pub use fixtures::*;
pub use generators::*;
pub use pipeline::*;
pub use stress::*;
