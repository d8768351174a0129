//! Sync service - pull Coinbase wallet history into the ledger

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::adapters::coinbase::CoinbaseClient;
use crate::adapters::duckdb::DuckDbRepository;
use crate::config::Config;
use crate::domain::result::Error;
use crate::domain::{Transaction, TransactionSource, STORED_SCALE};
use crate::ports::{ExchangeAccount, ExchangeClient, ExchangeTransaction};
use crate::services::settings::SettingsService;

/// Result of syncing every account of one exchange
#[derive(Debug, Default, Serialize)]
pub struct SyncResult {
    pub accounts_synced: usize,
    pub discovered: usize,
    pub imported: usize,
    pub skipped: usize,
    pub accounts: Vec<AccountSyncResult>,
    pub warnings: Vec<SyncWarning>,
}

#[derive(Debug, Serialize)]
pub struct AccountSyncResult {
    pub account_id: String,
    pub name: String,
    pub currency: String,
    pub discovered: usize,
    pub imported: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncWarning {
    pub account_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    pub message: String,
}

impl std::fmt::Display for SyncWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.transaction_id {
            Some(tx) => write!(f, "Account {} transaction {}: {}", self.account_id, tx, self.message),
            None => write!(f, "Account {}: {}", self.account_id, self.message),
        }
    }
}

pub struct SyncService {
    repository: Arc<DuckDbRepository>,
    settings: Arc<SettingsService>,
    config: Config,
}

impl SyncService {
    pub fn new(repository: Arc<DuckDbRepository>, settings: Arc<SettingsService>, config: Config) -> Self {
        Self {
            repository,
            settings,
            config,
        }
    }

    /// Build a Coinbase client from the user's stored credentials
    pub fn client_for(&self, user_id: &Uuid) -> Result<CoinbaseClient> {
        let credentials = self.settings.coinbase_credentials(user_id)?.ok_or_else(|| {
            Error::credentials(
                "No Coinbase API credentials saved. Run 'coinledger settings credentials' first.",
            )
        })?;
        CoinbaseClient::new(&credentials.api_key, &credentials.api_secret, &self.config)
    }

    /// Fetch every account's transactions and insert the new ones.
    ///
    /// Failing to list accounts aborts the sync; a failure on one account is
    /// recorded as a warning and the next account is tried.
    pub fn sync_coinbase(&self, user_id: &Uuid, client: &dyn ExchangeClient) -> Result<SyncResult> {
        let accounts = client
            .get_accounts()
            .with_context(|| format!("Failed to list {} accounts", client.name()))?;

        let mut result = SyncResult::default();

        for account in accounts {
            let remote = match client.get_transactions(&account.id) {
                Ok(txs) => txs,
                Err(e) => {
                    result.warnings.push(SyncWarning {
                        account_id: account.id.clone(),
                        transaction_id: None,
                        message: e.to_string(),
                    });
                    continue;
                }
            };

            let account_result = self.sync_account(user_id, &account, remote, &mut result.warnings)?;
            result.accounts_synced += 1;
            result.discovered += account_result.discovered;
            result.imported += account_result.imported;
            result.skipped += account_result.skipped;
            result.accounts.push(account_result);
        }

        Ok(result)
    }

    fn sync_account(
        &self,
        user_id: &Uuid,
        account: &ExchangeAccount,
        remote: Vec<ExchangeTransaction>,
        warnings: &mut Vec<SyncWarning>,
    ) -> Result<AccountSyncResult> {
        let mut seen = HashSet::new();
        let mut new_transactions = Vec::new();
        let mut discovered = 0;
        let mut skipped = 0;

        for tx in remote {
            let mapped = match map_exchange_transaction(user_id, &tx) {
                Ok(mapped) => mapped,
                Err(message) => {
                    warnings.push(SyncWarning {
                        account_id: account.id.clone(),
                        transaction_id: Some(tx.id.clone()),
                        message,
                    });
                    skipped += 1;
                    continue;
                }
            };
            discovered += 1;

            if !seen.insert(mapped.external_id.clone())
                || self.repository.transaction_exists(&mapped.external_id)?
            {
                skipped += 1;
                continue;
            }
            new_transactions.push(mapped);
        }

        let imported = self.repository.insert_transactions(&new_transactions)?;
        skipped += new_transactions.len() - imported;

        Ok(AccountSyncResult {
            account_id: account.id.clone(),
            name: account.name.clone(),
            currency: account.currency.clone(),
            discovered,
            imported,
            skipped,
        })
    }
}

/// Convert an API record into a ledger row
pub fn map_exchange_transaction(
    user_id: &Uuid,
    tx: &ExchangeTransaction,
) -> std::result::Result<Transaction, String> {
    let amount = parse_decimal(&tx.amount).ok_or_else(|| format!("Invalid amount '{}'", tx.amount))?;
    let timestamp = parse_created_at(&tx.created_at)
        .ok_or_else(|| format!("Invalid created_at '{}'", tx.created_at))?;

    // Unit price in the native currency
    let price = tx
        .native_amount
        .as_deref()
        .and_then(parse_decimal)
        .filter(|_| !amount.is_zero())
        .and_then(|native| native.checked_div(amount))
        .map(|p| p.abs().round_dp(STORED_SCALE));

    let mapped = Transaction::new(
        tx.id.clone(),
        *user_id,
        tx.tx_type.clone(),
        amount,
        tx.currency.to_uppercase(),
        timestamp,
        TransactionSource::Coinbase,
    )
    .with_status(tx.status.clone())
    .with_price(price);
    mapped.ensure_storable()?;
    Ok(mapped)
}

fn parse_decimal(s: &str) -> Option<Decimal> {
    let s = s.trim();
    s.parse::<Decimal>()
        .ok()
        .or_else(|| Decimal::from_scientific(s).ok())
}

fn parse_created_at(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(s.trim(), "%Y-%m-%dT%H:%M:%SZ")
                .ok()
                .map(|dt| Utc.from_utc_datetime(&dt))
        })
}
