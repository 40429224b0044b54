//! Shared test utilities for attachhound integration tests.
//!
//! This module provides:
//! - `TestHarness` for isolated poll cycles with temp directories and a store
//! - `FakeMailbox`, an in-memory mailbox with failure switches
//! - Builders for test messages

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::{FakeMailbox, FakeState, TestHarness};
