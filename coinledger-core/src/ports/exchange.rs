//! Exchange client port
//!
//! Defines the interface for reading accounts and transaction history from
//! a crypto exchange. The SyncService depends only on this trait, so tests
//! can substitute an in-memory exchange for the Coinbase HTTP client.

use serde::{Deserialize, Serialize};

use crate::domain::result::Result;

/// A wallet/account on the exchange (one per held currency)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeAccount {
    pub id: String,
    pub name: String,
    /// Currency code the account holds
    pub currency: String,
}

/// A raw transaction record as reported by the exchange
///
/// Amounts stay as strings so that no precision is lost before the sync
/// service parses them into decimals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeTransaction {
    pub id: String,
    pub tx_type: String,
    pub status: String,
    pub amount: String,
    pub currency: String,
    /// Value in the user's native currency, when reported
    pub native_amount: Option<String>,
    pub native_currency: Option<String>,
    /// RFC 3339 creation time
    pub created_at: String,
}

/// Exchange client trait
///
/// Implementations are responsible for following pagination: each method
/// returns the complete list.
pub trait ExchangeClient {
    /// Name used in logs and error messages (e.g. "coinbase")
    fn name(&self) -> &str;

    /// All accounts visible to the configured credentials
    fn get_accounts(&self) -> Result<Vec<ExchangeAccount>>;

    /// Full transaction history of one account
    fn get_transactions(&self, account_id: &str) -> Result<Vec<ExchangeTransaction>>;
}
