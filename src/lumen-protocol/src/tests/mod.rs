//! Tests for lumen-protocol

#[cfg(test)]
pub mod stats_tests;
