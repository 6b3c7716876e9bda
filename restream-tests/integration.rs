//! Integration tests for Restream
//!
//! These tests drive the registry and service surface end to end with
//! stand-in encoder processes and scripted extraction backends.

#[path = "integration/stream_workflow.rs"]
mod stream_workflow;

#[path = "integration/remote_resolution.rs"]
mod remote_resolution;
