//! Test utilities for the daemon crate.
//!
//! Shared by unit tests (in `src/`) and integration tests (in `tests/`).
//! Only compiled for tests or with the `test-support` feature.

pub mod clock;
pub mod fixtures;
pub mod remote;

pub use clock::MutableClock;
