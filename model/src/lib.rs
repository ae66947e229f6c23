pub mod query;
pub mod settings;
pub mod sql;

/// Proptest strategies over the query model.
/// Only available in tests and when the `testing` feature is enabled.
#[cfg(any(test, feature = "testing"))]
pub mod testing;
