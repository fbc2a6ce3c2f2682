//! Shared test utilities for coletor integration tests.
//!
//! - `TestHarness`: temp directories, a municipality file and an orchestrator
//!   wired to them
//! - `NullFactory` / `NullDriver`: browser stand-ins that accept every action
//! - `FileAdapter`: writes one small file per task, with scripted failures

pub mod drivers;
pub mod harness;

pub use drivers::{FileAdapter, NullFactory};
pub use harness::TestHarness;
