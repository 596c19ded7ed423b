//! Common test utilities for manga-counts
//!
//! - Test environment setup around a fresh in-memory store
//! - Fixtures for catalog content
//! - Consistency assertions between documents and counting state

#![allow(dead_code)]

pub mod fixtures;
pub mod test_helpers;
