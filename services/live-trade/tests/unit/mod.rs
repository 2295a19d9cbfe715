//! Unit tests module organization

pub mod commit_tests;
pub mod engine_tests;
pub mod registry_tests;
