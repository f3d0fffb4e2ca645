//! # mesh-tests
//!
//! Integration tests for meshledger state replication.
//!
//! This crate provides:
//! - A loopback in-process overlay for multi-peer replication tests
//! - Instrumented committer, coordinator and crypto doubles
//! - Scenario tests for buffering, anti-entropy and the request server

pub mod generators;
pub mod harness;

#[cfg(test)]
mod state_tests;


#[cfg(test)]
mod server_tests;

pub use generators::*;
pub use harness::*;
