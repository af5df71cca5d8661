//! Consolidated test utilities for workspace-tracker
//!
//! This module provides unified testing utilities for integration tests,
//! focused on real on-disk workspace scenarios for reliable testing.

pub mod fixtures;
