//! Transaction domain model

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Where a ledger row came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionSource {
    Coinbase,
    Fidelity,
}

impl TransactionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionSource::Coinbase => "coinbase",
            TransactionSource::Fidelity => "fidelity",
        }
    }
}

impl fmt::Display for TransactionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "coinbase" => Ok(TransactionSource::Coinbase),
            "fidelity" => Ok(TransactionSource::Fidelity),
            other => Err(format!("Unknown transaction source: {}", other)),
        }
    }
}

/// A single normalized ledger entry
///
/// `amount` is signed: outflows (sells, sends, the source leg of a convert)
/// are negative so that summing a user's rows for one asset yields the
/// quantity held.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    /// Globally unique id from the source system, used for deduplication
    pub external_id: String,
    pub user_id: Uuid,
    pub tx_type: String,
    pub amount: Decimal,
    pub asset: String,
    pub timestamp: DateTime<Utc>,
    pub status: String,
    pub price_at_transaction: Option<Decimal>,
    pub source: TransactionSource,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    /// Create a new completed transaction with required fields
    pub fn new(
        external_id: impl Into<String>,
        user_id: Uuid,
        tx_type: impl Into<String>,
        amount: Decimal,
        asset: impl Into<String>,
        timestamp: DateTime<Utc>,
        source: TransactionSource,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            external_id: external_id.into(),
            user_id,
            tx_type: tx_type.into(),
            amount: amount.normalize(),
            asset: asset.into(),
            timestamp,
            status: "completed".to_string(),
            price_at_transaction: None,
            source,
            notes: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_price(mut self, price: Option<Decimal>) -> Self {
        self.price_at_transaction = price.map(|p| p.normalize());
        self
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = status.into();
        self
    }

    pub fn with_notes(mut self, notes: Option<String>) -> Self {
        self.notes = notes.filter(|n| !n.trim().is_empty());
        self
    }

    /// Fail when the quantity or price would be rounded or rejected by the
    /// ledger's DECIMAL(38, 18) columns
    pub fn ensure_storable(&self) -> Result<(), String> {
        check_storable("Quantity", self.amount)?;
        if let Some(price) = self.price_at_transaction {
            check_storable("Price", price)?;
        }
        Ok(())
    }

    /// Build a deterministic external id for sources that don't supply one.
    ///
    /// `parts` are joined with '|' and hashed; the first 16 hex characters of
    /// the sha256 digest are appended to `prefix`.
    pub fn synthesize_external_id(prefix: &str, parts: &[&str]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(parts.join("|").as_bytes());
        let result = hasher.finalize();
        format!("{}_{}", prefix, hex::encode(&result[..8]))
    }
}

/// Fractional digits kept by the ledger's decimal columns
pub const STORED_SCALE: u32 = 18;

/// Check `value` against DECIMAL(38, 18): at most 18 fractional digits and
/// 20 integer digits
fn check_storable(label: &str, value: Decimal) -> Result<(), String> {
    let value = value.normalize();
    if value.scale() > STORED_SCALE {
        return Err(format!(
            "{} {} has more than {} decimal places",
            label, value, STORED_SCALE
        ));
    }
    let limit = Decimal::from(10_000_000_000_000_000_000u64) * Decimal::TEN;
    if value.abs() >= limit {
        return Err(format!("{} {} is out of range", label, value));
    }
    Ok(())
}

/// Negate a quantity when the transaction type is an outflow and the
/// source reported it as positive. Already-negative values are kept.
pub fn apply_outflow_sign(amount: Decimal, is_outflow: bool) -> Decimal {
    if is_outflow && amount > Decimal::ZERO {
        -amount
    } else {
        amount
    }
}
