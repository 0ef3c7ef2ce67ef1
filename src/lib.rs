// Library exports for integration tests and reusable components

pub mod activity;
pub mod config;
pub mod db;
pub mod download;
pub mod importer;
pub mod jobs;
pub mod matcher;
pub mod newznab;
pub mod rate_limit;
pub mod search;

// Test support (unit tests always; external consumers via the test-utils feature)
#[cfg(any(test, feature = "test-utils"))]
pub mod test_support;
