//! End-to-end tests at the registry level.
//!
//! Each test file covers a specific scenario, driving a `NamespaceRegistry`
//! over a temporary root the way an application would.

#![cfg(test)]

mod helpers;

mod test_case_insensitive_ordering;
mod test_concurrent_namespaces;
mod test_corruption_recovery;
mod test_crash_redo;
mod test_default_fallback;
mod test_environment_close_safety;
mod test_hash_engine;
mod test_idempotent_migration;
mod test_log_archival;
mod test_sub_namespace_isolation;
mod test_weather_roundtrip;
