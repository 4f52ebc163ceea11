//! Generic test suites shared by every guard implementation.
//!
//! The integration tests of each crate call these with their own guard type.

pub mod map_core_tests;
pub mod map_stress_tests;
