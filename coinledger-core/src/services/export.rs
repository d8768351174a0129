//! Export service - backup CSVs and per-source clearing
//!
//! The backup layouts are the ones the import service reads back with
//! `ImportFormat::CoinbaseBackup` / `ImportFormat::FidelityBackup`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::adapters::duckdb::{DuckDbRepository, TransactionFilter};
use crate::domain::{Transaction, TransactionSource};

const COINBASE_HEADERS: &[&str] = &[
    "ID",
    "Timestamp",
    "Transaction Type",
    "Asset",
    "Quantity Transacted",
    "Price at Transaction",
    "Notes",
];

const FIDELITY_HEADERS: &[&str] = &["ID", "Run Date", "Action", "Symbol", "Quantity", "Price"];

#[derive(Debug, Serialize)]
pub struct ExportResult {
    pub source: TransactionSource,
    pub path: PathBuf,
    pub rows: usize,
}

pub struct ExportService {
    repository: Arc<DuckDbRepository>,
}

impl ExportService {
    pub fn new(repository: Arc<DuckDbRepository>) -> Self {
        Self { repository }
    }

    /// Write the user's Coinbase rows to `dir`; None when there are none
    pub fn export_coinbase(&self, user_id: &Uuid, dir: &Path) -> Result<Option<ExportResult>> {
        self.export(user_id, TransactionSource::Coinbase, dir)
    }

    pub fn export_fidelity(&self, user_id: &Uuid, dir: &Path) -> Result<Option<ExportResult>> {
        self.export(user_id, TransactionSource::Fidelity, dir)
    }

    pub fn export(
        &self,
        user_id: &Uuid,
        source: TransactionSource,
        dir: &Path,
    ) -> Result<Option<ExportResult>> {
        let transactions = self
            .repository
            .get_transactions(user_id, &TransactionFilter::source(source))?;
        if transactions.is_empty() {
            return Ok(None);
        }

        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        let filename = format!(
            "{}_transactions_backup_{}.csv",
            source.as_str(),
            Utc::now().format("%Y%m%d_%H%M%S")
        );
        let path = dir.join(filename);

        let mut writer = csv::Writer::from_path(&path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        match source {
            TransactionSource::Coinbase => {
                writer.write_record(COINBASE_HEADERS)?;
                for tx in &transactions {
                    writer.write_record(coinbase_row(tx))?;
                }
            }
            TransactionSource::Fidelity => {
                writer.write_record(FIDELITY_HEADERS)?;
                for tx in &transactions {
                    writer.write_record(fidelity_row(tx))?;
                }
            }
        }
        writer.flush()?;

        Ok(Some(ExportResult {
            source,
            path,
            rows: transactions.len(),
        }))
    }

    /// Delete the user's rows for one source
    pub fn clear(&self, user_id: &Uuid, source: TransactionSource) -> Result<u64> {
        self.repository.delete_transactions(user_id, source)
    }
}

fn coinbase_row(tx: &Transaction) -> Vec<String> {
    vec![
        tx.external_id.clone(),
        tx.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
        tx.tx_type.clone(),
        tx.asset.clone(),
        tx.amount.to_string(),
        tx.price_at_transaction.map(|p| p.to_string()).unwrap_or_default(),
        tx.notes.clone().unwrap_or_default(),
    ]
}

fn fidelity_row(tx: &Transaction) -> Vec<String> {
    vec![
        tx.external_id.clone(),
        tx.timestamp.format("%Y-%m-%d").to_string(),
        tx.tx_type.clone(),
        tx.asset.clone(),
        tx.amount.to_string(),
        tx.price_at_transaction.map(|p| p.to_string()).unwrap_or_default(),
    ]
}
