//! Integration tests for the config-fs mirror engine

mod build;
mod lifecycle;
mod reconcile;
mod scenarios;
mod test_utils;

pub use test_utils::*;
