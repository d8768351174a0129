//! Adapter implementations
//!
//! Adapters implement the ports with concrete technologies:
//! - DuckDB for ledger and user storage
//! - Coinbase v2 HTTP client for ExchangeClient

pub mod coinbase;
pub mod duckdb;

#[cfg(test)]
pub mod coinbase_mock;
