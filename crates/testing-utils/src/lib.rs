//! # Bioqueue Testing Utils
//!
//! Shared testing utilities for the job scheduler workspace: an in-memory
//! store, data builders and helpers for scripts and polling.
//!
//! ```toml
//! [dev-dependencies]
//! bioqueue-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod helpers;
pub mod mocks;

pub use builders::*;
pub use helpers::*;
pub use mocks::*;
