//! Shared test utilities for brainsearch.

pub mod fixtures;
pub mod logging;

pub use fixtures::{CollectionFixture, FixtureDocument, refund_corpus};
pub use logging::init_test_tracing;
