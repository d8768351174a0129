//! Schema for logs.duckdb, kept apart from the ledger database so that
//! clearing or exporting logs never touches user data.
//!
//! Same conventions as `crate::migrations`: `(filename, sql)` pairs applied
//! in name order and tracked in the log database's own `sys_migrations`.

pub const LOG_MIGRATIONS: &[(&str, &str)] = &[
    ("000_migrations.sql", include_str!("000_migrations.sql")),
    ("001_initial_schema.sql", include_str!("001_initial_schema.sql")),
];
