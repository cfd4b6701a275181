//! Integration test suite for plexus.
//!
//! These tests exercise complete flows across component boundaries:
//! a step tree run end to end through the engine, an objective
//! provisioned, driven, and torn down through the supervisor, and a
//! step delegated to a worker over the signal router.
//!
//! # Test Categories
//!
//! - `engine_e2e`: Full step tree execution with reference resolution
//! - `lifecycle`: Supervisor provisioning, objective state, teardown
//! - `routing`: Signal delivery and the delegation protocol
//!
//! Everything runs in-process against real actors; no external services
//! are involved, making the suite safe for CI.

mod fixtures;

mod engine_e2e;
mod lifecycle;
mod routing;
