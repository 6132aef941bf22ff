//! End-to-end tests for payload-updater.
//!
//! Every test drives a real coordinator, installer and cipher against a
//! temporary install root. Only the remote is simulated, by [`FakeRemote`],
//! which can block, drop or reject requests on demand.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod harness;
mod scenarios;
mod scheduler;

pub use harness::{FakeRemote, TestHarness};
