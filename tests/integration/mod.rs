//! Integration test suite for maestro.
//!
//! These tests exercise the full path from task text to run report:
//! routing, planning, orchestration and the quality gates.
//!
//! # Test Categories
//!
//! - `routing_e2e`: Classification, assignment and strategy decisions
//! - `failure_recovery`: Handler failures, retries and cancellation
//! - `resource_pressure`: Governor levels, deferral and throttling
//! - `quality_gates`: Gate ordering, blocking and escalation
//! - `session_cache`: Context cache sharing and session lifetime
//!
//! # CI Compatibility
//!
//! Handlers, documentation lookup and reasoning are scripted mocks, so the
//! suite makes no network calls.

mod fixtures;

mod failure_recovery;
mod quality_gates;
mod resource_pressure;
mod routing_e2e;
mod session_cache;
