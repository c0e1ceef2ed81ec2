//! Keyword deny-list
//!
//! Any of these appearing as a whole word anywhere in a statement rejects it,
//! including inside string literals.

/// Keywords that never appear in an acceptable read query
pub const FORBIDDEN_KEYWORDS: &[&str] = &[
    // Data modification
    "INSERT",
    "UPDATE",
    "DELETE",
    "MERGE",
    "REPLACE",
    "COPY",
    // Schema changes
    "DROP",
    "ALTER",
    "CREATE",
    "TRUNCATE",
    "COMMENT",
    // Privileges
    "GRANT",
    "REVOKE",
    // Procedural execution
    "EXECUTE",
    "CALL",
    // Maintenance
    "VACUUM",
    "REINDEX",
    "CLUSTER",
    "LOCK",
    "RESET",
    "LOAD",
    // Transaction control
    "BEGIN",
    "COMMIT",
    "ROLLBACK",
    "SAVEPOINT",
    // Prepared statements
    "PREPARE",
    "DEALLOCATE",
    // Async notifications
    "LISTEN",
    "UNLISTEN",
    "NOTIFY",
];

/// Identifiers that may follow `FROM`/`JOIN` without naming a table
pub const NON_TABLE_TOKENS: &[&str] = &[
    "select",
    "lateral",
    "unnest",
    "generate_series",
    "json_each",
    "jsonb_each",
    "json_each_text",
    "jsonb_each_text",
    "json_array_elements",
    "jsonb_array_elements",
    "json_array_elements_text",
    "jsonb_array_elements_text",
    "json_to_recordset",
    "jsonb_to_recordset",
    "regexp_split_to_table",
    "string_to_table",
    "rows",
    "values",
];
