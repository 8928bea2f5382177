//! Integration tests for collectors and workers
//!
//! These tests use wiremock to stand in for the platform API and drive
//! collection runs and worker loops end-to-end against a real database file.

mod collector_tests;
mod common;
mod worker_tests;
