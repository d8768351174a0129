//! Ledger database migrations, embedded with include_str!
//!
//! `000_migrations.sql` creates the tracking table and is always applied
//! first; the rest run in name order and are recorded in `sys_migrations`.
//! New migrations get the next NNN_ prefix and an entry at the end.

pub const MIGRATIONS: &[(&str, &str)] = &[
    ("000_migrations.sql", include_str!("000_migrations.sql")),
    ("001_initial_schema.sql", include_str!("001_initial_schema.sql")),
    ("002_transaction_indexes.sql", include_str!("002_transaction_indexes.sql")),
];
