//! Coinbase v2 API client
//!
//! Reads wallet accounts and their transaction history using API key
//! authentication. Every request is signed:
//!
//! ```text
//! CB-ACCESS-SIGN = hex(HMAC-SHA256(secret, timestamp + method + request_path + body))
//! ```
//!
//! List endpoints are paginated; the client follows `pagination.next_uri`
//! until it is null and returns the concatenated result.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use hmac::{Hmac, Mac};
use reqwest::blocking::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha2::Sha256;
use url::Url;

use crate::config::Config;
use crate::domain::result::{Error as DomainError, Result as DomainResult};
use crate::ports::{ExchangeAccount, ExchangeClient, ExchangeTransaction};

type HmacSha256 = Hmac<Sha256>;

/// Page size requested from list endpoints (Coinbase maximum)
const PAGE_LIMIT: u32 = 100;

/// Upper bound on followed pages, in case the API keeps returning the same cursor
const MAX_PAGES: usize = 1000;

const REQUEST_TIMEOUT_SECS: u64 = 60;

// =============================================================================
// API response structures
// =============================================================================

#[derive(Debug, Deserialize)]
struct Pagination {
    next_uri: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListResponse<T> {
    #[serde(default)]
    pagination: Option<Pagination>,
    data: Vec<T>,
}

/// Newer responses nest the currency as an object, older ones use a bare code
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CurrencyField {
    Code(String),
    Detailed { code: String },
}

impl CurrencyField {
    fn code(&self) -> &str {
        match self {
            CurrencyField::Code(code) => code,
            CurrencyField::Detailed { code } => code,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CoinbaseAccount {
    id: String,
    #[serde(default)]
    name: Option<String>,
    currency: CurrencyField,
}

#[derive(Debug, Deserialize)]
struct Money {
    amount: String,
    currency: String,
}

#[derive(Debug, Deserialize)]
struct CoinbaseTransaction {
    id: String,
    #[serde(rename = "type")]
    tx_type: String,
    #[serde(default)]
    status: Option<String>,
    amount: Money,
    #[serde(default)]
    native_amount: Option<Money>,
    created_at: String,
}

impl From<CoinbaseAccount> for ExchangeAccount {
    fn from(account: CoinbaseAccount) -> Self {
        let currency = account.currency.code().to_string();
        Self {
            name: account
                .name
                .unwrap_or_else(|| format!("{} Wallet", currency)),
            id: account.id,
            currency,
        }
    }
}

impl From<CoinbaseTransaction> for ExchangeTransaction {
    fn from(tx: CoinbaseTransaction) -> Self {
        let (native_amount, native_currency) = match tx.native_amount {
            Some(money) => (Some(money.amount), Some(money.currency)),
            None => (None, None),
        };
        Self {
            id: tx.id,
            tx_type: tx.tx_type,
            status: tx.status.unwrap_or_else(|| "completed".to_string()),
            amount: tx.amount.amount,
            currency: tx.amount.currency,
            native_amount,
            native_currency,
            created_at: tx.created_at,
        }
    }
}

// =============================================================================
// Client
// =============================================================================

/// Coinbase API client
#[derive(Debug)]
pub struct CoinbaseClient {
    client: Client,
    api_key: String,
    api_secret: String,
    base_url: Url,
    api_version: String,
}

impl CoinbaseClient {
    /// Create a client for the base URL and API version in `config`
    pub fn new(api_key: &str, api_secret: &str, config: &Config) -> Result<Self> {
        Self::new_with_base_url(
            api_key,
            api_secret,
            &config.coinbase_base_url,
            &config.coinbase_api_version,
        )
    }

    /// Create a client against an explicit base URL (mock servers, sandboxes)
    pub fn new_with_base_url(
        api_key: &str,
        api_secret: &str,
        base_url: &str,
        api_version: &str,
    ) -> Result<Self> {
        if api_key.trim().is_empty() || api_secret.trim().is_empty() {
            anyhow::bail!("Coinbase API key and secret cannot be empty");
        }

        let mut base_url = Url::parse(base_url)
            .with_context(|| format!("Invalid Coinbase base URL: {}", base_url))?;
        // Request paths are joined relative to the base, so keep its prefix a directory
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            api_key: api_key.to_string(),
            api_secret: api_secret.to_string(),
            base_url,
            api_version: api_version.to_string(),
        })
    }

    /// Fetch all wallet accounts
    pub fn list_accounts(&self) -> Result<Vec<ExchangeAccount>> {
        let path = format!("/v2/accounts?limit={}", PAGE_LIMIT);
        let accounts: Vec<CoinbaseAccount> = self
            .get_all_pages(&path)
            .context("Failed to fetch Coinbase accounts")?;
        Ok(accounts.into_iter().map(ExchangeAccount::from).collect())
    }

    /// Fetch the full transaction history of one account
    pub fn list_transactions(&self, account_id: &str) -> Result<Vec<ExchangeTransaction>> {
        let path = format!(
            "/v2/accounts/{}/transactions?limit={}",
            account_id, PAGE_LIMIT
        );
        let transactions: Vec<CoinbaseTransaction> = self
            .get_all_pages(&path)
            .with_context(|| format!("Failed to fetch transactions for account {}", account_id))?;
        Ok(transactions
            .into_iter()
            .map(ExchangeTransaction::from)
            .collect())
    }

    /// GET a list endpoint and follow `next_uri` until exhausted
    fn get_all_pages<T: DeserializeOwned>(&self, first_path: &str) -> Result<Vec<T>> {
        let mut items = Vec::new();
        let mut next = Some(first_path.to_string());
        let mut seen = std::collections::HashSet::new();

        while let Some(path) = next.take() {
            if !seen.insert(path.clone()) || seen.len() > MAX_PAGES {
                anyhow::bail!("Coinbase pagination did not terminate");
            }
            let page: ListResponse<T> = self.get_json(&path)?;
            items.extend(page.data);
            next = page
                .pagination
                .and_then(|p| p.next_uri)
                .filter(|uri| !uri.is_empty());
        }

        Ok(items)
    }

    fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self
            .base_url
            .join(path.trim_start_matches('/'))
            .with_context(|| format!("Invalid request path: {}", path))?;

        // The signature covers the path and query exactly as sent
        let request_path = match url.query() {
            Some(query) => format!("{}?{}", url.path(), query),
            None => url.path().to_string(),
        };
        let timestamp = unix_timestamp();
        let signature = sign_request(&self.api_secret, &timestamp, "GET", &request_path, "")?;

        let response = self
            .client
            .get(url)
            .header("CB-ACCESS-KEY", &self.api_key)
            .header("CB-ACCESS-SIGN", signature)
            .header("CB-ACCESS-TIMESTAMP", &timestamp)
            .header("CB-VERSION", &self.api_version)
            .send()
            .map_err(|e| self.map_request_error(e))?;

        self.check_response_status(&response)?;

        response
            .json()
            .context("Failed to parse Coinbase response")
    }

    /// Map request errors to user-friendly messages
    fn map_request_error(&self, error: reqwest::Error) -> anyhow::Error {
        if error.is_timeout() {
            anyhow::anyhow!(
                "Connection timed out after {} seconds",
                REQUEST_TIMEOUT_SECS
            )
        } else if error.is_connect() {
            anyhow::anyhow!("Unable to connect to Coinbase servers")
        } else {
            anyhow::anyhow!("Coinbase request failed: {}", error)
        }
    }

    /// Check response status and return appropriate errors
    fn check_response_status(&self, response: &reqwest::blocking::Response) -> Result<()> {
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        match status.as_u16() {
            401 => anyhow::bail!(
                "Coinbase authentication failed. Your API key may be invalid or revoked."
            ),
            403 => anyhow::bail!(
                "Coinbase access denied. The API key needs wallet:accounts:read and wallet:transactions:read permissions."
            ),
            404 => anyhow::bail!("Coinbase resource not found."),
            429 => anyhow::bail!("Coinbase rate limit exceeded. Please wait a moment and try again."),
            status => anyhow::bail!("Coinbase API error: HTTP {}", status),
        }
    }
}

impl ExchangeClient for CoinbaseClient {
    fn name(&self) -> &str {
        "coinbase"
    }

    fn get_accounts(&self) -> DomainResult<Vec<ExchangeAccount>> {
        self.list_accounts()
            .map_err(|e| DomainError::Sync(format!("{:#}", e)))
    }

    fn get_transactions(&self, account_id: &str) -> DomainResult<Vec<ExchangeTransaction>> {
        self.list_transactions(account_id)
            .map_err(|e| DomainError::Sync(format!("{:#}", e)))
    }
}

fn unix_timestamp() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
        .to_string()
}

/// Compute the CB-ACCESS-SIGN header value
pub fn sign_request(
    secret: &str,
    timestamp: &str,
    method: &str,
    request_path: &str,
    body: &str,
) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| anyhow::anyhow!("Invalid API secret: {}", e))?;
    mac.update(timestamp.as_bytes());
    mac.update(method.as_bytes());
    mac.update(request_path.as_bytes());
    mac.update(body.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

// =============================================================================
// Tests
// =============================================================================
