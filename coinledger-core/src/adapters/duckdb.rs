//! DuckDB repository implementation

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use duckdb::{params, params_from_iter, Connection};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::domain::{Transaction, TransactionSource, User};
use crate::services::MigrationService;

/// Maximum number of retries when database file is locked
const MAX_RETRIES: u32 = 5;

/// Initial retry delay in milliseconds (doubles each retry: 50, 100, 200, 400, 800ms)
const INITIAL_RETRY_DELAY_MS: u64 = 50;

/// Storage format for TIMESTAMP parameters
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Check if an error message indicates a file locking issue that should be retried
fn is_retryable_error(err_msg: &str) -> bool {
    let lower = err_msg.to_lowercase();
    lower.contains("being used by another process")
        || lower.contains("cannot access the file")
        || lower.contains("resource temporarily unavailable")
        || lower.contains("database is locked")
        || lower.contains("file is already open")
        || lower.contains("could not set lock on file")
}

const USER_COLUMNS: &str = "user_id, username, email, password_hash, totp_secret,
    coinbase_api_key, coinbase_api_secret, created_at::VARCHAR, updated_at::VARCHAR";

// Decimals are read as VARCHAR so no precision is lost through f64
const TRANSACTION_COLUMNS: &str = "transaction_id, external_id, user_id, tx_type, amount::VARCHAR,
    asset, timestamp::VARCHAR, status, price_at_transaction::VARCHAR, source, notes,
    created_at::VARCHAR";

/// Filter for ledger queries; `None` fields match everything
#[derive(Debug, Clone, Default)]
pub struct TransactionFilter {
    pub source: Option<TransactionSource>,
    pub asset: Option<String>,
}

impl TransactionFilter {
    pub fn source(source: TransactionSource) -> Self {
        Self {
            source: Some(source),
            asset: None,
        }
    }

    pub fn with_asset(mut self, asset: Option<&str>) -> Self {
        self.asset = asset.filter(|a| !a.is_empty()).map(|a| a.to_string());
        self
    }

    /// WHERE clause (always scoped to one user) and its parameters
    fn where_clause(&self, user_id: &Uuid) -> (String, Vec<String>) {
        let mut clause = String::from("WHERE user_id = ?");
        let mut values = vec![user_id.to_string()];
        if let Some(source) = self.source {
            clause.push_str(" AND source = ?");
            values.push(source.as_str().to_string());
        }
        if let Some(asset) = &self.asset {
            clause.push_str(" AND asset = ?");
            values.push(asset.clone());
        }
        (clause, values)
    }
}

/// DuckDB repository implementation
pub struct DuckDbRepository {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl DuckDbRepository {
    /// Create a new DuckDB repository
    ///
    /// Includes retry logic with exponential backoff for file locking errors,
    /// which can occur when two CLI invocations open the ledger at once.
    pub fn new(db_path: &Path) -> Result<Self> {
        let mut last_error = None;

        for attempt in 0..MAX_RETRIES {
            match Self::try_open_connection(db_path) {
                Ok(conn) => {
                    return Ok(Self {
                        conn: Mutex::new(conn),
                        db_path: db_path.to_path_buf(),
                    });
                }
                Err(e) => {
                    let err_msg = e.to_string();
                    if is_retryable_error(&err_msg) && attempt < MAX_RETRIES - 1 {
                        let delay =
                            Duration::from_millis(INITIAL_RETRY_DELAY_MS * 2u64.pow(attempt));
                        eprintln!(
                            "[coinledger] Database busy, retrying in {}ms (attempt {}/{}): {}",
                            delay.as_millis(),
                            attempt + 1,
                            MAX_RETRIES,
                            err_msg
                        );
                        thread::sleep(delay);
                        last_error = Some(e);
                        continue;
                    }
                    return Err(e);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| anyhow!("Failed to open database after {} retries", MAX_RETRIES)))
    }

    fn try_open_connection(db_path: &Path) -> Result<Connection> {
        // Extension autoloading stays off; nothing here needs ICU or httpfs
        let config = duckdb::Config::default().enable_autoload_extension(false)?;
        let conn = Connection::open_with_flags(db_path, config)?;
        Ok(conn)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Run database migrations using the MigrationService
    pub fn run_migrations(&self) -> Result<crate::services::MigrationResult> {
        let conn = self.conn.lock().unwrap();
        let migration_service = MigrationService::new(&conn);
        migration_service.run_pending()
    }

    /// Ensure database schema exists (runs pending migrations)
    pub fn ensure_schema(&self) -> Result<()> {
        self.run_migrations()?;
        Ok(())
    }

    // === User operations ===

    pub fn insert_user(&self, user: &User) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO users (user_id, username, email, password_hash, totp_secret,
                                coinbase_api_key, coinbase_api_secret, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, CAST(? AS TIMESTAMP), CAST(? AS TIMESTAMP))",
            params![
                user.id.to_string(),
                user.username,
                user.email,
                user.password_hash,
                user.totp_secret,
                user.coinbase_api_key,
                user.coinbase_api_secret,
                format_timestamp(&user.created_at),
                format_timestamp(&user.updated_at),
            ],
        )
        .context("Failed to insert user")?;
        Ok(())
    }

    pub fn get_user_by_id(&self, user_id: &Uuid) -> Result<Option<User>> {
        self.query_user("user_id = ?", &user_id.to_string())
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        self.query_user("username = ?", username)
    }

    /// Email lookup is case-insensitive
    pub fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        self.query_user("lower(email) = lower(?)", email)
    }

    fn query_user(&self, predicate: &str, value: &str) -> Result<Option<User>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!("SELECT {} FROM users WHERE {}", USER_COLUMNS, predicate);
        let mut stmt = conn.prepare(&sql)?;
        let raw = stmt
            .query_map([value], |row| {
                Ok(RawUser {
                    id: row.get(0)?,
                    username: row.get(1)?,
                    email: row.get(2)?,
                    password_hash: row.get(3)?,
                    totp_secret: row.get(4)?,
                    coinbase_api_key: row.get(5)?,
                    coinbase_api_secret: row.get(6)?,
                    created_at: row.get(7)?,
                    updated_at: row.get(8)?,
                })
            })?
            .next()
            .transpose()?;

        raw.map(RawUser::into_user).transpose()
    }

    pub fn update_user_email(&self, user_id: &Uuid, email: &str) -> Result<bool> {
        self.update_user_column("email", Some(email), user_id)
    }

    pub fn update_user_password(&self, user_id: &Uuid, password_hash: &str) -> Result<bool> {
        self.update_user_column("password_hash", Some(password_hash), user_id)
    }

    /// Set or clear (None) the TOTP secret
    pub fn update_user_totp_secret(&self, user_id: &Uuid, secret: Option<&str>) -> Result<bool> {
        self.update_user_column("totp_secret", secret, user_id)
    }

    /// Store already-encrypted Coinbase credentials (None clears them)
    pub fn update_user_coinbase_credentials(
        &self,
        user_id: &Uuid,
        api_key: Option<&str>,
        api_secret: Option<&str>,
    ) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE users SET coinbase_api_key = ?, coinbase_api_secret = ?,
                              updated_at = CAST(? AS TIMESTAMP)
             WHERE user_id = ?",
            params![
                api_key,
                api_secret,
                format_timestamp(&Utc::now()),
                user_id.to_string()
            ],
        )?;
        Ok(updated > 0)
    }

    fn update_user_column(&self, column: &str, value: Option<&str>, user_id: &Uuid) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        // Column names come from the fixed set of callers above, never from input
        let sql = format!(
            "UPDATE users SET {} = ?, updated_at = CAST(? AS TIMESTAMP) WHERE user_id = ?",
            column
        );
        let updated = conn.execute(
            &sql,
            params![value, format_timestamp(&Utc::now()), user_id.to_string()],
        )?;
        Ok(updated > 0)
    }

    // === Transaction operations ===

    /// Check if a transaction exists by its external (source) id
    pub fn transaction_exists(&self, external_id: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM transactions WHERE external_id = ?",
            params![external_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Insert a transaction only if its external id is new.
    /// Returns true if inserted, false if skipped
    pub fn insert_transaction_if_not_exists(&self, tx: &Transaction) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        insert_transaction(&conn, tx)
    }

    /// Insert a batch inside one DuckDB transaction.
    ///
    /// Rows whose external id already exists are skipped; the number of rows
    /// actually written is returned. Any failure rolls the whole batch back.
    pub fn insert_transactions(&self, transactions: &[Transaction]) -> Result<usize> {
        let mut conn = self.conn.lock().unwrap();
        let db_tx = conn.transaction()?;
        let mut inserted = 0;
        for tx in transactions {
            if insert_transaction(&db_tx, tx)? {
                inserted += 1;
            }
        }
        db_tx.commit()?;
        Ok(inserted)
    }

    pub fn get_transaction_by_external_id(&self, external_id: &str) -> Result<Option<Transaction>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT {} FROM transactions WHERE external_id = ?",
            TRANSACTION_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let raw = stmt
            .query_map([external_id], RawTransaction::from_row)?
            .next()
            .transpose()?;
        raw.map(RawTransaction::into_transaction).transpose()
    }

    /// All matching transactions, oldest first
    pub fn get_transactions(
        &self,
        user_id: &Uuid,
        filter: &TransactionFilter,
    ) -> Result<Vec<Transaction>> {
        let conn = self.conn.lock().unwrap();
        let (clause, values) = filter.where_clause(user_id);
        let sql = format!(
            "SELECT {} FROM transactions {} ORDER BY timestamp ASC, external_id ASC",
            TRANSACTION_COLUMNS, clause
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), RawTransaction::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter().map(RawTransaction::into_transaction).collect()
    }

    /// One page of matching transactions, newest first
    pub fn get_transactions_page(
        &self,
        user_id: &Uuid,
        filter: &TransactionFilter,
        limit: u32,
        offset: u64,
    ) -> Result<Vec<Transaction>> {
        let conn = self.conn.lock().unwrap();
        let (clause, values) = filter.where_clause(user_id);
        // LIMIT/OFFSET are integers we computed, safe to inline
        let sql = format!(
            "SELECT {} FROM transactions {} ORDER BY timestamp DESC, external_id ASC LIMIT {} OFFSET {}",
            TRANSACTION_COLUMNS, clause, limit, offset
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), RawTransaction::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter().map(RawTransaction::into_transaction).collect()
    }

    pub fn count_transactions(&self, user_id: &Uuid, filter: &TransactionFilter) -> Result<u64> {
        let conn = self.conn.lock().unwrap();
        let (clause, values) = filter.where_clause(user_id);
        let sql = format!("SELECT COUNT(*) FROM transactions {}", clause);
        let count: i64 = conn.query_row(&sql, params_from_iter(values.iter()), |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Distinct asset symbols for a user and source, sorted
    pub fn get_distinct_assets(
        &self,
        user_id: &Uuid,
        source: TransactionSource,
    ) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT DISTINCT asset FROM transactions
             WHERE user_id = ? AND source = ?
             ORDER BY asset",
        )?;
        let assets = stmt
            .query_map(params![user_id.to_string(), source.as_str()], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(assets)
    }

    /// Delete every transaction of one source for a user
    pub fn delete_transactions(&self, user_id: &Uuid, source: TransactionSource) -> Result<u64> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute(
            "DELETE FROM transactions WHERE user_id = ? AND source = ?",
            params![user_id.to_string(), source.as_str()],
        )?;
        Ok(deleted as u64)
    }
}

fn insert_transaction(conn: &Connection, tx: &Transaction) -> Result<bool> {
    let rows_changed = conn.execute(
        "INSERT OR IGNORE INTO transactions (transaction_id, external_id, user_id, tx_type, amount, asset,
                                   timestamp, status, price_at_transaction, source, notes, created_at)
         VALUES (?, ?, ?, ?, CAST(? AS DECIMAL(38, 18)), ?, CAST(? AS TIMESTAMP), ?,
                 CAST(? AS DECIMAL(38, 18)), ?, ?, CAST(? AS TIMESTAMP))",
        params![
            tx.id.to_string(),
            tx.external_id,
            tx.user_id.to_string(),
            tx.tx_type,
            tx.amount.to_string(),
            tx.asset,
            format_timestamp(&tx.timestamp),
            tx.status,
            tx.price_at_transaction.map(|p| p.to_string()),
            tx.source.as_str(),
            tx.notes,
            format_timestamp(&tx.created_at),
        ],
    )?;
    Ok(rows_changed > 0)
}

/// User row as read from DuckDB, before parsing
struct RawUser {
    id: String,
    username: String,
    email: String,
    password_hash: String,
    totp_secret: Option<String>,
    coinbase_api_key: Option<String>,
    coinbase_api_secret: Option<String>,
    created_at: String,
    updated_at: String,
}

impl RawUser {
    fn into_user(self) -> Result<User> {
        Ok(User {
            id: Uuid::parse_str(&self.id).context("Invalid user id in database")?,
            username: self.username,
            email: self.email,
            password_hash: self.password_hash,
            totp_secret: self.totp_secret,
            coinbase_api_key: self.coinbase_api_key,
            coinbase_api_secret: self.coinbase_api_secret,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
        })
    }
}

/// Transaction row as read from DuckDB, before parsing
struct RawTransaction {
    id: String,
    external_id: String,
    user_id: String,
    tx_type: String,
    amount: String,
    asset: String,
    timestamp: String,
    status: String,
    price: Option<String>,
    source: String,
    notes: Option<String>,
    created_at: String,
}

impl RawTransaction {
    // Column order matches TRANSACTION_COLUMNS
    fn from_row(row: &duckdb::Row) -> duckdb::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            external_id: row.get(1)?,
            user_id: row.get(2)?,
            tx_type: row.get(3)?,
            amount: row.get(4)?,
            asset: row.get(5)?,
            timestamp: row.get(6)?,
            status: row.get(7)?,
            price: row.get(8)?,
            source: row.get(9)?,
            notes: row.get(10)?,
            created_at: row.get(11)?,
        })
    }

    fn into_transaction(self) -> Result<Transaction> {
        Ok(Transaction {
            id: Uuid::parse_str(&self.id).context("Invalid transaction id in database")?,
            user_id: Uuid::parse_str(&self.user_id).context("Invalid user id in database")?,
            amount: parse_decimal(&self.amount)?,
            price_at_transaction: self.price.as_deref().map(parse_decimal).transpose()?,
            timestamp: parse_timestamp(&self.timestamp)?,
            created_at: parse_timestamp(&self.created_at)?,
            source: self
                .source
                .parse::<TransactionSource>()
                .map_err(|e| anyhow!(e))?,
            external_id: self.external_id,
            tx_type: self.tx_type,
            asset: self.asset,
            status: self.status,
            notes: self.notes,
        })
    }
}

// Helper functions

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.naive_utc().format(TIMESTAMP_FORMAT).to_string()
}

/// Parse a DuckDB TIMESTAMP rendered as VARCHAR (always UTC in this schema)
fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S"))
        .map(|naive| naive.and_utc())
        .with_context(|| format!("Invalid timestamp in database: {}", s))
}

fn parse_decimal(s: &str) -> Result<Decimal> {
    Decimal::from_str(s.trim())
        .map(|d| d.normalize())
        .with_context(|| format!("Invalid decimal in database: {}", s))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn create_test_repo(temp_dir: &TempDir) -> DuckDbRepository {
        let repo = DuckDbRepository::new(&temp_dir.path().join("test.duckdb")).unwrap();
        repo.ensure_schema().unwrap();
        repo
    }

    fn tx(user_id: Uuid, external_id: &str, amount: &str, day: u32) -> Transaction {
        Transaction::new(
            external_id,
            user_id,
            "buy",
            Decimal::from_str(amount).unwrap(),
            "BTC",
            Utc.with_ymd_and_hms(2024, 1, day, 10, 30, 0).unwrap(),
            TransactionSource::Coinbase,
        )
    }

    #[test]
    fn test_is_retryable_error() {
        assert!(is_retryable_error("IO Error: Could not set lock on file"));
        assert!(is_retryable_error("Database is locked"));
        assert!(!is_retryable_error("Catalog Error: Table does not exist"));
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let a = parse_timestamp("2024-01-05 10:30:00").unwrap();
        let b = parse_timestamp("2024-01-05 10:30:00.250000").unwrap();
        assert_eq!(a, Utc.with_ymd_and_hms(2024, 1, 5, 10, 30, 0).unwrap());
        assert_eq!(b.timestamp_subsec_millis(), 250);
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn test_user_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let repo = create_test_repo(&temp_dir);

        let user = User::new("alice", "Alice@Example.com", "hash");
        repo.insert_user(&user).unwrap();

        let by_name = repo.get_user_by_username("alice").unwrap().unwrap();
        assert_eq!(by_name.id, user.id);
        assert_eq!(by_name.email, "Alice@Example.com");
        assert!(by_name.totp_secret.is_none());

        let by_email = repo.get_user_by_email("alice@example.com").unwrap().unwrap();
        assert_eq!(by_email.id, user.id);

        assert!(repo.get_user_by_username("bob").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_username_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let repo = create_test_repo(&temp_dir);

        repo.insert_user(&User::new("alice", "a@example.com", "hash")).unwrap();
        assert!(repo.insert_user(&User::new("alice", "b@example.com", "hash")).is_err());
    }

    #[test]
    fn test_user_updates() {
        let temp_dir = TempDir::new().unwrap();
        let repo = create_test_repo(&temp_dir);
        let user = User::new("alice", "a@example.com", "hash");
        repo.insert_user(&user).unwrap();

        assert!(repo.update_user_email(&user.id, "new@example.com").unwrap());
        assert!(repo.update_user_totp_secret(&user.id, Some("SECRET")).unwrap());
        assert!(repo
            .update_user_coinbase_credentials(&user.id, Some("enc-key"), Some("enc-secret"))
            .unwrap());

        let loaded = repo.get_user_by_id(&user.id).unwrap().unwrap();
        assert_eq!(loaded.email, "new@example.com");
        assert_eq!(loaded.totp_secret.as_deref(), Some("SECRET"));
        assert_eq!(loaded.coinbase_api_key.as_deref(), Some("enc-key"));

        repo.update_user_totp_secret(&user.id, None).unwrap();
        let loaded = repo.get_user_by_id(&user.id).unwrap().unwrap();
        assert!(loaded.totp_secret.is_none());

        assert!(!repo.update_user_email(&Uuid::new_v4(), "x@example.com").unwrap());
    }

    #[test]
    fn test_insert_if_not_exists_dedups_by_external_id() {
        let temp_dir = TempDir::new().unwrap();
        let repo = create_test_repo(&temp_dir);
        let user_id = Uuid::new_v4();

        assert!(repo.insert_transaction_if_not_exists(&tx(user_id, "cb-1", "0.5", 1)).unwrap());
        // Same external id, different row id: skipped
        assert!(!repo.insert_transaction_if_not_exists(&tx(user_id, "cb-1", "0.7", 2)).unwrap());
        assert!(repo.transaction_exists("cb-1").unwrap());

        let stored = repo.get_transaction_by_external_id("cb-1").unwrap().unwrap();
        assert_eq!(stored.amount, Decimal::from_str("0.5").unwrap());
    }

    #[test]
    fn test_decimal_precision_preserved() {
        let temp_dir = TempDir::new().unwrap();
        let repo = create_test_repo(&temp_dir);
        let user_id = Uuid::new_v4();

        let mut t = tx(user_id, "cb-precise", "-0.000000012345678901", 1);
        t.price_at_transaction = Some(Decimal::from_str("43210.987654").unwrap());
        repo.insert_transaction_if_not_exists(&t).unwrap();

        let stored = repo.get_transaction_by_external_id("cb-precise").unwrap().unwrap();
        assert_eq!(stored.amount.to_string(), "-0.000000012345678901");
        assert_eq!(
            stored.price_at_transaction,
            Some(Decimal::from_str("43210.987654").unwrap())
        );
        assert_eq!(stored.timestamp, t.timestamp);
    }

    #[test]
    fn test_batch_insert_counts_new_rows() {
        let temp_dir = TempDir::new().unwrap();
        let repo = create_test_repo(&temp_dir);
        let user_id = Uuid::new_v4();

        repo.insert_transaction_if_not_exists(&tx(user_id, "a", "1", 1)).unwrap();
        let batch = vec![tx(user_id, "a", "1", 1), tx(user_id, "b", "2", 2), tx(user_id, "c", "3", 3)];
        assert_eq!(repo.insert_transactions(&batch).unwrap(), 2);
        assert_eq!(
            repo.count_transactions(&user_id, &TransactionFilter::default()).unwrap(),
            3
        );
    }

    #[test]
    fn test_filters_pages_and_assets() {
        let temp_dir = TempDir::new().unwrap();
        let repo = create_test_repo(&temp_dir);
        let user_id = Uuid::new_v4();
        let other_user = Uuid::new_v4();

        for day in 1..=5 {
            repo.insert_transaction_if_not_exists(&tx(user_id, &format!("btc-{}", day), "1", day))
                .unwrap();
        }
        let mut eth = tx(user_id, "eth-1", "2", 6);
        eth.asset = "ETH".to_string();
        repo.insert_transaction_if_not_exists(&eth).unwrap();
        let mut aapl = tx(user_id, "fid-1", "10", 7);
        aapl.asset = "AAPL".to_string();
        aapl.source = TransactionSource::Fidelity;
        repo.insert_transaction_if_not_exists(&aapl).unwrap();
        repo.insert_transaction_if_not_exists(&tx(other_user, "other-1", "9", 1))
            .unwrap();

        let coinbase = TransactionFilter::source(TransactionSource::Coinbase);
        assert_eq!(repo.count_transactions(&user_id, &coinbase).unwrap(), 6);

        let btc = coinbase.clone().with_asset(Some("BTC"));
        assert_eq!(repo.count_transactions(&user_id, &btc).unwrap(), 5);

        let first_page = repo.get_transactions_page(&user_id, &btc, 2, 0).unwrap();
        assert_eq!(first_page.len(), 2);
        assert_eq!(first_page[0].external_id, "btc-5");
        assert_eq!(first_page[1].external_id, "btc-4");

        let last_page = repo.get_transactions_page(&user_id, &btc, 2, 4).unwrap();
        assert_eq!(last_page.len(), 1);
        assert_eq!(last_page[0].external_id, "btc-1");

        let ascending = repo.get_transactions(&user_id, &coinbase).unwrap();
        assert_eq!(ascending.first().unwrap().external_id, "btc-1");
        assert_eq!(ascending.last().unwrap().external_id, "eth-1");

        assert_eq!(
            repo.get_distinct_assets(&user_id, TransactionSource::Coinbase).unwrap(),
            vec!["BTC", "ETH"]
        );
        assert_eq!(
            repo.get_distinct_assets(&user_id, TransactionSource::Fidelity).unwrap(),
            vec!["AAPL"]
        );
    }

    #[test]
    fn test_delete_transactions_scoped_to_user_and_source() {
        let temp_dir = TempDir::new().unwrap();
        let repo = create_test_repo(&temp_dir);
        let user_id = Uuid::new_v4();
        let other_user = Uuid::new_v4();

        repo.insert_transaction_if_not_exists(&tx(user_id, "a", "1", 1)).unwrap();
        repo.insert_transaction_if_not_exists(&tx(user_id, "b", "1", 2)).unwrap();
        let mut fid = tx(user_id, "c", "1", 3);
        fid.source = TransactionSource::Fidelity;
        repo.insert_transaction_if_not_exists(&fid).unwrap();
        repo.insert_transaction_if_not_exists(&tx(other_user, "d", "1", 1)).unwrap();

        assert_eq!(repo.delete_transactions(&user_id, TransactionSource::Coinbase).unwrap(), 2);
        assert_eq!(repo.count_transactions(&user_id, &TransactionFilter::default()).unwrap(), 1);
        assert!(repo.transaction_exists("d").unwrap());
    }
}
