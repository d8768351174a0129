//! Core domain entities
//!
//! All business entities are defined here. These are pure data structures
//! with validation logic - no I/O or external dependencies.

mod ledger;
mod transaction;
pub mod user;
pub mod result;

pub use ledger::{AssetBalance, ChartSeries, Page};
pub use transaction::{apply_outflow_sign, Transaction, TransactionSource, STORED_SCALE};
pub use user::User;
