//! Integration test suite entry point.

mod backends;
mod failure_policy;
mod scenarios;
