//! Shared setup for integration tests

#![allow(dead_code)]

mod registry;

pub use registry::*;
