/// Guarded Query - safe, audited read access to external databases
///
/// This is the root crate that provides workspace-level documentation.
/// Actual implementation is in the subcrates:
/// - `guarded-query-core`: Data model and the SQL guardrail validator
/// - `guarded-query-gateway`: Guarded executor, anomaly scans and the `guarded-query` CLI
/// - `guarded-query-server`: HTTP service over the gateway
pub use guarded_query_core;
pub use guarded_query_gateway;

/// Returns the version of the package.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_facade_reexports() {
        let validation = guarded_query_core::validate(
            "SELECT * FROM users",
            &guarded_query_core::AuthorizationContext::new(["users"]),
            guarded_query_core::guardrail::DEFAULT_MAX_ROWS,
        );
        assert!(validation.valid);
        assert_eq!(guarded_query_gateway::VERSION, crate::version());
    }
}
