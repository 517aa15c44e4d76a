//! Common fixtures for codag-engine integration tests
//!
//! - analysis result builders for the two-file `loadConfig`/`handler` pair
//! - `TestWorkspace` for driving the `codag` binary against a temp directory

#![allow(dead_code)]

pub mod fixtures;
pub mod workspace;

pub use fixtures::*;
pub use workspace::TestWorkspace;
