//! Import service - CSV reconciliation into the ledger
//!
//! Every format goes through the same steps: parse each row, normalize the
//! sign convention for its type, drop ids already seen (in the file or in
//! the ledger), then write the remainder in one batch. Rows that cannot be
//! parsed become warnings; they never abort the import.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, OnceLock};

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use regex::Regex;
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::adapters::duckdb::DuckDbRepository;
use crate::domain::result::Error;
use crate::domain::{apply_outflow_sign, Transaction, TransactionSource};

/// Coinbase types whose quantity leaves the wallet
const COINBASE_OUTFLOW_TYPES: &[&str] = &[
    "sell",
    "send",
    "withdrawal",
    "advanced trade sell",
    "retail sell",
];

/// The CSV layouts the service understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ImportFormat {
    /// Transaction report downloaded from coinbase.com
    CoinbaseCsv,
    /// "Accounts history" download from Fidelity
    FidelityCsv,
    /// Backup written by `export_coinbase`
    CoinbaseBackup,
    /// Backup written by `export_fidelity`
    FidelityBackup,
}

impl ImportFormat {
    pub fn source(&self) -> TransactionSource {
        match self {
            ImportFormat::CoinbaseCsv | ImportFormat::CoinbaseBackup => TransactionSource::Coinbase,
            ImportFormat::FidelityCsv | ImportFormat::FidelityBackup => TransactionSource::Fidelity,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ImportFormat::CoinbaseCsv => "coinbase",
            ImportFormat::FidelityCsv => "fidelity",
            ImportFormat::CoinbaseBackup => "coinbase-backup",
            ImportFormat::FidelityBackup => "fidelity-backup",
        }
    }
}

impl fmt::Display for ImportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImportFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "coinbase" | "coinbase-csv" => Ok(ImportFormat::CoinbaseCsv),
            "fidelity" | "fidelity-csv" => Ok(ImportFormat::FidelityCsv),
            "coinbase-backup" => Ok(ImportFormat::CoinbaseBackup),
            "fidelity-backup" => Ok(ImportFormat::FidelityBackup),
            other => Err(format!("Unknown import format: {}", other)),
        }
    }
}

/// A row that was skipped, with its 1-based data row number
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportWarning {
    pub row: usize,
    pub message: String,
}

impl fmt::Display for ImportWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Row {}: {}", self.row, self.message)
    }
}

#[derive(Debug, Serialize)]
pub struct ImportResult {
    pub format: ImportFormat,
    /// Valid ledger rows found in the file (a Convert row counts twice)
    pub discovered: usize,
    /// Rows written (or that would be written, in preview)
    pub imported: usize,
    /// Duplicates plus rows that failed to parse
    pub skipped: usize,
    pub preview: bool,
    pub warnings: Vec<ImportWarning>,
    /// Rows that would be imported (only in preview mode)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transactions: Option<Vec<TransactionPreview>>,
}

#[derive(Debug, Serialize)]
pub struct TransactionPreview {
    pub external_id: String,
    pub timestamp: String,
    pub tx_type: String,
    pub asset: String,
    pub amount: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<String>,
}

impl From<&Transaction> for TransactionPreview {
    fn from(tx: &Transaction) -> Self {
        Self {
            external_id: tx.external_id.clone(),
            timestamp: tx.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            tx_type: tx.tx_type.clone(),
            asset: tx.asset.clone(),
            amount: tx.amount.to_string(),
            price: tx.price_at_transaction.map(|p| p.to_string()),
        }
    }
}

/// Rows parsed from one file, before deduplication
#[derive(Debug, Default)]
struct ParsedFile {
    transactions: Vec<Transaction>,
    warnings: Vec<ImportWarning>,
}

pub struct ImportService {
    repository: Arc<DuckDbRepository>,
}

impl ImportService {
    pub fn new(repository: Arc<DuckDbRepository>) -> Self {
        Self { repository }
    }

    /// Import `file_path` in the given format for `user_id`
    pub fn import(
        &self,
        user_id: &Uuid,
        format: ImportFormat,
        file_path: &Path,
        preview: bool,
    ) -> Result<ImportResult> {
        let raw = std::fs::read(file_path)
            .with_context(|| format!("Failed to read CSV file {}", file_path.display()))?;
        let content = String::from_utf8_lossy(&raw);
        self.import_str(user_id, format, &content, preview)
    }

    /// Same as [`import`](Self::import) for content already in memory
    pub fn import_str(
        &self,
        user_id: &Uuid,
        format: ImportFormat,
        content: &str,
        preview: bool,
    ) -> Result<ImportResult> {
        let parsed = match format {
            ImportFormat::CoinbaseCsv => parse_coinbase_csv(content, user_id)?,
            ImportFormat::FidelityCsv => parse_fidelity_csv(content, user_id)?,
            ImportFormat::CoinbaseBackup => parse_coinbase_backup(content, user_id)?,
            ImportFormat::FidelityBackup => parse_fidelity_backup(content, user_id)?,
        };
        self.reconcile(format, parsed, preview)
    }

    pub fn import_coinbase_csv(&self, user_id: &Uuid, path: &Path, preview: bool) -> Result<ImportResult> {
        self.import(user_id, ImportFormat::CoinbaseCsv, path, preview)
    }

    pub fn import_fidelity_csv(&self, user_id: &Uuid, path: &Path, preview: bool) -> Result<ImportResult> {
        self.import(user_id, ImportFormat::FidelityCsv, path, preview)
    }

    pub fn import_coinbase_backup(&self, user_id: &Uuid, path: &Path, preview: bool) -> Result<ImportResult> {
        self.import(user_id, ImportFormat::CoinbaseBackup, path, preview)
    }

    pub fn import_fidelity_backup(&self, user_id: &Uuid, path: &Path, preview: bool) -> Result<ImportResult> {
        self.import(user_id, ImportFormat::FidelityBackup, path, preview)
    }

    fn reconcile(&self, format: ImportFormat, parsed: ParsedFile, preview: bool) -> Result<ImportResult> {
        let discovered = parsed.transactions.len();
        let invalid = parsed.warnings.len();

        // First occurrence of an id wins, both within the file and against the ledger
        let mut seen = HashSet::new();
        let mut new_transactions = Vec::new();
        let mut duplicates = 0;
        for tx in parsed.transactions {
            if !seen.insert(tx.external_id.clone())
                || self.repository.transaction_exists(&tx.external_id)?
            {
                duplicates += 1;
                continue;
            }
            new_transactions.push(tx);
        }

        let imported = if preview {
            new_transactions.len()
        } else {
            self.repository
                .insert_transactions(&new_transactions)
                .context("Failed to write imported transactions")?
        };
        // Rows that lost an insert race are duplicates too
        duplicates += new_transactions.len() - imported;

        Ok(ImportResult {
            format,
            discovered,
            imported,
            skipped: duplicates + invalid,
            preview,
            warnings: parsed.warnings,
            transactions: if preview {
                Some(new_transactions.iter().map(TransactionPreview::from).collect())
            } else {
                None
            },
        })
    }
}

// =============================================================================
// Column lookup
// =============================================================================

struct Columns {
    headers: Vec<String>,
}

impl Columns {
    fn new(headers: &csv::StringRecord) -> Self {
        Self {
            headers: headers
                .iter()
                .map(|h| h.trim_start_matches('\u{feff}').trim().to_string())
                .collect(),
        }
    }

    fn find(&self, names: &[&str]) -> Option<usize> {
        names.iter().find_map(|name| {
            self.headers
                .iter()
                .position(|h| h.eq_ignore_ascii_case(name))
        })
    }

    /// Resolve all required columns or fail listing every missing one
    fn require(&self, names: &[&str]) -> Result<Vec<usize>> {
        let mut found = Vec::with_capacity(names.len());
        let mut missing = Vec::new();
        for name in names {
            match self.find(&[*name]) {
                Some(idx) => found.push(idx),
                None => missing.push(*name),
            }
        }
        if !missing.is_empty() {
            return Err(Error::validation(format!(
                "Missing required column(s): {}",
                missing.join(", ")
            ))
            .into());
        }
        Ok(found)
    }
}

fn field(record: &csv::StringRecord, idx: usize) -> &str {
    record.get(idx).unwrap_or("").trim()
}

fn optional_field(record: &csv::StringRecord, idx: Option<usize>) -> Option<&str> {
    idx.map(|i| field(record, i)).filter(|v| !v.is_empty())
}

/// Skip preamble lines until one whose first cell matches a header name
fn strip_preamble<'a>(content: &'a str, header_starts: &[&str]) -> Option<&'a str> {
    let mut offset = 0;
    for line in content.split_inclusive('\n') {
        let first_cell = line
            .trim_start_matches('\u{feff}')
            .split(',')
            .next()
            .unwrap_or("")
            .trim()
            .trim_matches('"');
        if header_starts.iter().any(|h| first_cell.eq_ignore_ascii_case(h)) {
            return Some(&content[offset..]);
        }
        offset += line.len();
    }
    None
}

/// Hand back a record, or record a warning for a row the reader choked on
fn readable_record(
    result: csv::Result<csv::StringRecord>,
    row: usize,
    warnings: &mut Vec<ImportWarning>,
) -> Option<csv::StringRecord> {
    match result {
        Ok(record) => Some(record),
        Err(e) => {
            warnings.push(ImportWarning { row, message: format!("Unreadable row: {}", e) });
            None
        }
    }
}

fn csv_reader(content: &str) -> csv::Reader<&[u8]> {
    csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes())
}

/// Numbers repeated identical rows so their synthesized ids stay distinct
#[derive(Default)]
struct OccurrenceCounter {
    counts: HashMap<String, usize>,
}

impl OccurrenceCounter {
    fn next(&mut self, key: &[&str]) -> usize {
        let count = self.counts.entry(key.join("|")).or_insert(0);
        let current = *count;
        *count += 1;
        current
    }
}

// =============================================================================
// Coinbase transaction report
// =============================================================================

const COINBASE_REQUIRED: &[&str] = &["Timestamp", "Transaction Type", "Asset", "Quantity Transacted"];

fn parse_coinbase_csv(content: &str, user_id: &Uuid) -> Result<ParsedFile> {
    let body = strip_preamble(content, &["ID", "Timestamp"])
        .ok_or_else(|| Error::validation("No Coinbase header row (ID or Timestamp) found"))?;

    let mut reader = csv_reader(body);
    let columns = Columns::new(reader.headers()?);
    let required = columns.require(COINBASE_REQUIRED)?;
    let (ts_idx, type_idx, asset_idx, qty_idx) = (required[0], required[1], required[2], required[3]);
    let id_idx = columns.find(&["ID"]);
    let price_idx = columns.find(&["Price at Transaction", "Spot Price at Transaction"]);
    let notes_idx = columns.find(&["Notes"]);

    let mut parsed = ParsedFile::default();
    let mut occurrences = OccurrenceCounter::default();

    for (i, result) in reader.records().enumerate() {
        let row = i + 1;
        let Some(record) = readable_record(result, row, &mut parsed.warnings) else {
            continue;
        };
        if record.iter().all(|v| v.is_empty()) {
            continue;
        }

        let outcome = (|| -> std::result::Result<Vec<Transaction>, String> {
            let ts_raw = field(&record, ts_idx);
            let timestamp = parse_timestamp(ts_raw)
                .ok_or_else(|| format!("Invalid timestamp '{}'", ts_raw))?;
            let tx_type = field(&record, type_idx);
            if tx_type.is_empty() {
                return Err("Missing transaction type".to_string());
            }
            let asset = field(&record, asset_idx).to_uppercase();
            if asset.is_empty() {
                return Err("Missing asset".to_string());
            }
            let qty_raw = field(&record, qty_idx);
            let quantity = parse_amount(qty_raw)
                .ok_or_else(|| format!("Invalid quantity '{}'", qty_raw))?;
            let price = optional_field(&record, price_idx).and_then(parse_amount);
            let notes = optional_field(&record, notes_idx).map(str::to_string);

            let external_id = match optional_field(&record, id_idx) {
                Some(id) => id.to_string(),
                None => {
                    let key = [ts_raw, tx_type, asset.as_str(), qty_raw];
                    let occurrence = occurrences.next(&key).to_string();
                    Transaction::synthesize_external_id(
                        "coinbase_csv",
                        &[ts_raw, tx_type, asset.as_str(), qty_raw, occurrence.as_str()],
                    )
                }
            };

            if tx_type.eq_ignore_ascii_case("convert") {
                let convert = notes
                    .as_deref()
                    .and_then(parse_convert_notes)
                    .ok_or_else(|| "Convert row without parseable notes".to_string())?;
                if convert.from_asset != asset {
                    return Err(format!(
                        "Convert notes mention {} but the row asset is {}",
                        convert.from_asset, asset
                    ));
                }
                let out_qty = if quantity.is_zero() { convert.from_amount } else { quantity.abs() };

                let out_leg = Transaction::new(
                    format!("{}_out", external_id),
                    *user_id,
                    tx_type,
                    -out_qty,
                    asset.clone(),
                    timestamp,
                    TransactionSource::Coinbase,
                )
                .with_price(price)
                .with_notes(notes.clone());
                let in_leg = Transaction::new(
                    format!("{}_in", external_id),
                    *user_id,
                    tx_type,
                    convert.to_amount,
                    convert.to_asset,
                    timestamp,
                    TransactionSource::Coinbase,
                )
                .with_notes(notes);
                return Ok(vec![out_leg, in_leg]);
            }

            let is_outflow = COINBASE_OUTFLOW_TYPES
                .iter()
                .any(|t| tx_type.eq_ignore_ascii_case(t));
            let tx = Transaction::new(
                external_id,
                *user_id,
                tx_type,
                apply_outflow_sign(quantity, is_outflow),
                asset,
                timestamp,
                TransactionSource::Coinbase,
            )
            .with_price(price)
            .with_notes(notes);
            Ok(vec![tx])
        })()
        .and_then(|txs| {
            txs.iter().try_for_each(Transaction::ensure_storable)?;
            Ok(txs)
        });

        match outcome {
            Ok(txs) => parsed.transactions.extend(txs),
            Err(message) => parsed.warnings.push(ImportWarning { row, message }),
        }
    }

    Ok(parsed)
}

#[derive(Debug, PartialEq)]
struct ConvertNotes {
    from_amount: Decimal,
    from_asset: String,
    to_amount: Decimal,
    to_asset: String,
}

/// "Converted 0.5 ETH to 1,234.56 USDC"
fn parse_convert_notes(notes: &str) -> Option<ConvertNotes> {
    static CONVERT_RE: OnceLock<Regex> = OnceLock::new();
    let re = CONVERT_RE.get_or_init(|| {
        Regex::new(r"(?i)converted\s+([\d.,]+)\s+([A-Za-z0-9]+)\s+to\s+([\d.,]+)\s+([A-Za-z0-9]+)")
            .expect("convert notes pattern is valid")
    });
    let caps = re.captures(notes)?;
    Some(ConvertNotes {
        from_amount: parse_amount(&caps[1])?,
        from_asset: caps[2].to_uppercase(),
        to_amount: parse_amount(&caps[3])?,
        to_asset: caps[4].to_uppercase(),
    })
}

// =============================================================================
// Fidelity account history
// =============================================================================

const FIDELITY_REQUIRED: &[&str] = &["Run Date", "Action", "Symbol", "Quantity"];

fn parse_fidelity_csv(content: &str, user_id: &Uuid) -> Result<ParsedFile> {
    let body = strip_preamble(content, &["Run Date"])
        .ok_or_else(|| Error::validation("No Fidelity header row (Run Date) found"))?;

    let mut reader = csv_reader(body);
    let columns = Columns::new(reader.headers()?);
    let required = columns.require(FIDELITY_REQUIRED)?;
    let (date_idx, action_idx, symbol_idx, qty_idx) = (required[0], required[1], required[2], required[3]);
    let price_idx = columns.find(&["Price ($)", "Price"]);

    let mut parsed = ParsedFile::default();
    let mut occurrences = OccurrenceCounter::default();

    for (i, result) in reader.records().enumerate() {
        let row = i + 1;
        let Some(record) = readable_record(result, row, &mut parsed.warnings) else {
            continue;
        };

        // Disclaimer footers and blank lines have no date in the first column
        let run_date = field(&record, date_idx);
        let Some(date) = parse_date(run_date) else {
            continue;
        };

        let action = field(&record, action_idx);
        let symbol = field(&record, symbol_idx).to_uppercase();
        if symbol.is_empty() {
            parsed.warnings.push(ImportWarning { row, message: "Missing symbol".to_string() });
            continue;
        }
        let qty_raw = field(&record, qty_idx);
        let Some(quantity) = parse_amount(qty_raw) else {
            parsed.warnings.push(ImportWarning {
                row,
                message: format!("Invalid quantity '{}'", qty_raw),
            });
            continue;
        };
        let price_raw = price_idx.map(|i| field(&record, i)).unwrap_or("");
        let price = parse_amount(price_raw);

        let tx_type = normalize_fidelity_action(action);
        let amount = apply_outflow_sign(quantity, tx_type == "Sell");

        let key = [run_date, action, symbol.as_str(), qty_raw, price_raw];
        let occurrence = occurrences.next(&key).to_string();
        let external_id = Transaction::synthesize_external_id(
            "fidelity",
            &[run_date, action, symbol.as_str(), qty_raw, price_raw, occurrence.as_str()],
        );

        let tx = Transaction::new(
            external_id,
            *user_id,
            tx_type,
            amount,
            symbol,
            midnight_utc(date),
            TransactionSource::Fidelity,
        )
        .with_price(price);
        if let Err(message) = tx.ensure_storable() {
            parsed.warnings.push(ImportWarning { row, message });
            continue;
        }
        parsed.transactions.push(tx);
    }

    Ok(parsed)
}

/// Map Fidelity's free-text action to Buy / Sell, keeping anything else
fn normalize_fidelity_action(action: &str) -> String {
    let upper = action.trim().to_uppercase();
    if upper.contains("YOU BOUGHT") || upper == "BUY" {
        "Buy".to_string()
    } else if upper.contains("YOU SOLD") || upper == "SELL" {
        "Sell".to_string()
    } else {
        action.trim().to_string()
    }
}

// =============================================================================
// Own backup formats
// =============================================================================

const COINBASE_BACKUP_REQUIRED: &[&str] = &[
    "ID",
    "Timestamp",
    "Transaction Type",
    "Asset",
    "Quantity Transacted",
    "Price at Transaction",
];

fn parse_coinbase_backup(content: &str, user_id: &Uuid) -> Result<ParsedFile> {
    let mut reader = csv_reader(content);
    let columns = Columns::new(reader.headers()?);
    let idx = columns.require(COINBASE_BACKUP_REQUIRED)?;
    let notes_idx = columns.find(&["Notes"]);

    let mut parsed = ParsedFile::default();
    for (i, result) in reader.records().enumerate() {
        let row = i + 1;
        let Some(record) = readable_record(result, row, &mut parsed.warnings) else {
            continue;
        };
        if record.iter().all(|v| v.is_empty()) {
            continue;
        }
        match backup_row(
            &record,
            [idx[0], idx[1], idx[2], idx[3], idx[4], idx[5]],
            notes_idx,
            user_id,
            TransactionSource::Coinbase,
        ) {
            Ok(tx) => parsed.transactions.push(tx),
            Err(message) => parsed.warnings.push(ImportWarning { row, message }),
        }
    }
    Ok(parsed)
}

const FIDELITY_BACKUP_REQUIRED: &[&str] = &["ID", "Run Date", "Action", "Symbol", "Quantity", "Price"];

fn parse_fidelity_backup(content: &str, user_id: &Uuid) -> Result<ParsedFile> {
    let mut reader = csv_reader(content);
    let columns = Columns::new(reader.headers()?);
    let idx = columns.require(FIDELITY_BACKUP_REQUIRED)?;

    let mut parsed = ParsedFile::default();
    for (i, result) in reader.records().enumerate() {
        let row = i + 1;
        let Some(record) = readable_record(result, row, &mut parsed.warnings) else {
            continue;
        };
        if record.iter().all(|v| v.is_empty()) {
            continue;
        }
        match backup_row(
            &record,
            [idx[0], idx[1], idx[2], idx[3], idx[4], idx[5]],
            None,
            user_id,
            TransactionSource::Fidelity,
        ) {
            Ok(tx) => parsed.transactions.push(tx),
            Err(message) => parsed.warnings.push(ImportWarning { row, message }),
        }
    }
    Ok(parsed)
}

/// Backup columns, in order: id, timestamp, type, asset, quantity, price.
/// Quantities were normalized on the way out, so they are taken as written.
fn backup_row(
    record: &csv::StringRecord,
    idx: [usize; 6],
    notes_idx: Option<usize>,
    user_id: &Uuid,
    source: TransactionSource,
) -> std::result::Result<Transaction, String> {
    let external_id = field(record, idx[0]);
    if external_id.is_empty() {
        return Err("Missing ID".to_string());
    }
    let ts_raw = field(record, idx[1]);
    let timestamp = parse_timestamp(ts_raw)
        .or_else(|| parse_date(ts_raw).map(midnight_utc))
        .ok_or_else(|| format!("Invalid timestamp '{}'", ts_raw))?;
    let tx_type = field(record, idx[2]);
    let asset = field(record, idx[3]).to_uppercase();
    if asset.is_empty() {
        return Err("Missing asset".to_string());
    }
    let qty_raw = field(record, idx[4]);
    let quantity = parse_amount(qty_raw).ok_or_else(|| format!("Invalid quantity '{}'", qty_raw))?;
    let price = parse_amount(field(record, idx[5]));
    let notes = optional_field(record, notes_idx).map(str::to_string);

    let tx = Transaction::new(external_id, *user_id, tx_type, quantity, asset, timestamp, source)
        .with_price(price)
        .with_notes(notes);
    tx.ensure_storable()?;
    Ok(tx)
}

// =============================================================================
// Value parsing
// =============================================================================

/// Parse the timestamp shapes seen in exports and backups
fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    let naive = s.trim_end_matches("UTC").trim_end_matches('Z').trim();
    let formats = [
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
        "%m/%d/%Y %H:%M:%S",
    ];
    formats
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(naive, fmt).ok())
        .map(|dt| Utc.from_utc_datetime(&dt))
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    let formats = ["%m/%d/%Y", "%Y-%m-%d", "%m-%d-%Y", "%Y/%m/%d"];
    let s = s.trim();
    formats
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
}

fn midnight_utc(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(chrono::NaiveTime::MIN))
}

fn parse_amount(s: &str) -> Option<Decimal> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    // Handle parentheses notation for negative numbers: (100.00) -> -100.00
    let (is_negative, s) = if s.starts_with('(') && s.ends_with(')') {
        (true, &s[1..s.len() - 1])
    } else {
        (false, s)
    };

    if s.contains(['e', 'E']) {
        if let Ok(amount) = Decimal::from_scientific(s) {
            return Some(if is_negative { -amount.abs() } else { amount });
        }
    }

    // Remove currency symbols, commas, whitespace
    let cleaned: String = s
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();

    let mut amount: Decimal = cleaned.parse().ok()?;
    if is_negative && amount > Decimal::ZERO {
        amount = -amount;
    }
    Some(amount)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::result::domain_error;
    use tempfile::TempDir;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn setup() -> (TempDir, Arc<DuckDbRepository>, ImportService, Uuid) {
        let dir = TempDir::new().unwrap();
        let repo = Arc::new(DuckDbRepository::new(&dir.path().join("test.duckdb")).unwrap());
        repo.ensure_schema().unwrap();
        (dir, Arc::clone(&repo), ImportService::new(repo), Uuid::new_v4())
    }

    const COINBASE_CSV: &str = "\
You can use this transaction report to inform your likely tax obligations.

Transactions
User,alice,abc123
ID,Timestamp,Transaction Type,Asset,Quantity Transacted,Price Currency,Price at Transaction,Subtotal,Total (inclusive of fees and/or spread),Fees and/or Spread,Notes
tx1,2024-01-15 10:00:00 UTC,Buy,BTC,0.5,USD,$40000.00,$20000.00,$20100.00,$100.00,Bought 0.5 BTC
tx2,2024-01-20 12:30:00 UTC,Sell,BTC,0.2,USD,\"$42,000.00\",$8400.00,$8350.00,$50.00,Sold 0.2 BTC
tx3,2024-02-01 09:00:00 UTC,Convert,ETH,1.5,USD,$2500.00,$3750.00,$3750.00,$0.00,\"Converted 1.5 ETH to 3,740.12 USDC\"
tx4,2024-02-02 09:00:00 UTC,Send,BTC,-0.1,USD,$43000.00,,,,
tx5,not a date,Buy,BTC,1,USD,$1,,,,
";

    #[test]
    fn test_coinbase_csv_parsing() {
        let user = Uuid::new_v4();
        let parsed = parse_coinbase_csv(COINBASE_CSV, &user).unwrap();

        assert_eq!(parsed.transactions.len(), 5);
        assert_eq!(parsed.warnings.len(), 1);
        assert_eq!(parsed.warnings[0].row, 5);

        let by_id: HashMap<_, _> = parsed
            .transactions
            .iter()
            .map(|t| (t.external_id.as_str(), t))
            .collect();
        assert_eq!(by_id["tx1"].amount, dec("0.5"));
        assert_eq!(by_id["tx1"].price_at_transaction, Some(dec("40000")));
        assert_eq!(by_id["tx2"].amount, dec("-0.2"));
        assert_eq!(by_id["tx2"].price_at_transaction, Some(dec("42000")));
        assert_eq!(by_id["tx3_out"].amount, dec("-1.5"));
        assert_eq!(by_id["tx3_out"].asset, "ETH");
        assert_eq!(by_id["tx3_in"].amount, dec("3740.12"));
        assert_eq!(by_id["tx3_in"].asset, "USDC");
        // Already negative send stays negative
        assert_eq!(by_id["tx4"].amount, dec("-0.1"));
        assert!(parsed
            .transactions
            .iter()
            .all(|t| t.source == TransactionSource::Coinbase && t.status == "completed"));
    }

    #[test]
    fn test_coinbase_old_layout_synthesizes_ids() {
        let csv = "\
Timestamp,Transaction Type,Asset,Quantity Transacted,Spot Price Currency,Spot Price at Transaction,Subtotal,Total (inclusive of fees),Fees,Notes
2021-03-01T12:00:00Z,Receive,ETH,2,USD,1500,,,,
2021-03-01T12:00:00Z,Receive,ETH,2,USD,1500,,,,
2021-03-02T12:00:00Z,Withdrawal,ETH,1,USD,1600,,,,
";
        let parsed = parse_coinbase_csv(csv, &Uuid::new_v4()).unwrap();
        assert_eq!(parsed.transactions.len(), 3);
        let ids: HashSet<_> = parsed.transactions.iter().map(|t| t.external_id.clone()).collect();
        assert_eq!(ids.len(), 3);
        assert!(parsed.transactions[0].external_id.starts_with("coinbase_csv_"));
        assert_eq!(parsed.transactions[0].external_id.len(), "coinbase_csv_".len() + 16);
        assert_eq!(parsed.transactions[0].price_at_transaction, Some(dec("1500")));
        assert_eq!(parsed.transactions[2].amount, dec("-1"));

        // Same file, same ids
        let again = parse_coinbase_csv(csv, &Uuid::new_v4()).unwrap();
        assert_eq!(again.transactions[1].external_id, parsed.transactions[1].external_id);
    }

    #[test]
    fn test_convert_without_notes_is_warning() {
        let csv = "\
ID,Timestamp,Transaction Type,Asset,Quantity Transacted,Price at Transaction,Notes
c1,2024-02-01 09:00:00 UTC,Convert,ETH,1.5,2500,
";
        let parsed = parse_coinbase_csv(csv, &Uuid::new_v4()).unwrap();
        assert!(parsed.transactions.is_empty());
        assert_eq!(parsed.warnings.len(), 1);
        assert!(parsed.warnings[0].message.contains("Convert"));
    }

    #[test]
    fn test_missing_header_row() {
        let err = parse_coinbase_csv("just,some\nrandom,text\n", &Uuid::new_v4()).unwrap_err();
        assert!(matches!(domain_error(&err), Some(Error::Validation(_))));
    }

    #[test]
    fn test_missing_required_column() {
        let csv = "ID,Timestamp,Asset\nx,2024-01-01 00:00:00 UTC,BTC\n";
        let err = parse_coinbase_csv(csv, &Uuid::new_v4()).unwrap_err();
        assert!(err.to_string().contains("Transaction Type"));
        assert!(err.to_string().contains("Quantity Transacted"));
    }

    const FIDELITY_CSV: &str = "


Run Date,Action,Symbol,Description,Type,Quantity,Price ($),Commission ($),Fees ($),Accrued Interest ($),Amount ($),Settlement Date
01/15/2024, YOU BOUGHT APPLE INC (AAPL) (Cash),AAPL,APPLE INC,Cash,10,185.50,,,,-1855.00,01/17/2024
01/20/2024, YOU SOLD APPLE INC (AAPL) (Cash),AAPL,APPLE INC,Cash,4,190.00,,,,760.00,01/22/2024
01/25/2024, DIVIDEND RECEIVED APPLE INC (AAPL) (Cash),AAPL,APPLE INC,Cash,0,,,,,2.40,
01/26/2024, YOU BOUGHT (Cash),,NO SYMBOL,Cash,1,1.00,,,,-1.00,
01/27/2024, YOU BOUGHT MSFT (Cash),MSFT,MICROSOFT,Cash,abc,1.00,,,,-1.00,

\"The data and information in this spreadsheet is provided to you solely for your use.\"
\"Date downloaded 02/01/2024 10:00 am\"
";

    #[test]
    fn test_fidelity_csv_parsing() {
        let parsed = parse_fidelity_csv(FIDELITY_CSV, &Uuid::new_v4()).unwrap();
        assert_eq!(parsed.transactions.len(), 3);
        assert_eq!(parsed.warnings.len(), 2);

        let buy = &parsed.transactions[0];
        assert_eq!(buy.tx_type, "Buy");
        assert_eq!(buy.asset, "AAPL");
        assert_eq!(buy.amount, dec("10"));
        assert_eq!(buy.price_at_transaction, Some(dec("185.5")));
        assert_eq!(buy.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(), "2024-01-15 00:00:00");
        assert!(buy.external_id.starts_with("fidelity_"));

        let sell = &parsed.transactions[1];
        assert_eq!(sell.tx_type, "Sell");
        assert_eq!(sell.amount, dec("-4"));

        let dividend = &parsed.transactions[2];
        assert_eq!(dividend.tx_type, "DIVIDEND RECEIVED APPLE INC (AAPL) (Cash)");
        assert_eq!(dividend.price_at_transaction, None);
    }

    #[test]
    fn test_fidelity_action_normalization() {
        assert_eq!(normalize_fidelity_action(" YOU BOUGHT X"), "Buy");
        assert_eq!(normalize_fidelity_action("buy"), "Buy");
        assert_eq!(normalize_fidelity_action("YOU SOLD X"), "Sell");
        assert_eq!(normalize_fidelity_action("Sell"), "Sell");
        assert_eq!(normalize_fidelity_action(" REINVESTMENT "), "REINVESTMENT");
    }

    #[test]
    fn test_parse_convert_notes() {
        let notes = parse_convert_notes("Converted 0.5 ETH to 1,234.56 USDC").unwrap();
        assert_eq!(notes.from_amount, dec("0.5"));
        assert_eq!(notes.from_asset, "ETH");
        assert_eq!(notes.to_amount, dec("1234.56"));
        assert_eq!(notes.to_asset, "USDC");
        assert!(parse_convert_notes("Bought BTC").is_none());
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("$1,234.56"), Some(dec("1234.56")));
        assert_eq!(parse_amount("(50.00)"), Some(dec("-50")));
        assert_eq!(parse_amount("-0.00012"), Some(dec("-0.00012")));
        assert_eq!(parse_amount("1e-8"), Some(dec("0.00000001")));
        assert_eq!(parse_amount(""), None);
        assert_eq!(parse_amount("abc"), None);
    }

    #[test]
    fn test_parse_timestamp_shapes() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap();
        assert_eq!(parse_timestamp("2024-01-15 10:00:00 UTC"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-15T10:00:00Z"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-15T10:00:00+00:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-15T10:00:00"), Some(expected));
        assert_eq!(parse_timestamp("yesterday"), None);
    }

    #[test]
    fn test_import_is_idempotent() {
        let (_dir, repo, service, user) = setup();

        let first = service
            .import_str(&user, ImportFormat::CoinbaseCsv, COINBASE_CSV, false)
            .unwrap();
        assert_eq!(first.discovered, 5);
        assert_eq!(first.imported, 5);
        assert_eq!(first.skipped, 1);
        assert_eq!(first.warnings.len(), 1);

        let second = service
            .import_str(&user, ImportFormat::CoinbaseCsv, COINBASE_CSV, false)
            .unwrap();
        assert_eq!(second.imported, 0);
        assert_eq!(second.skipped, 6);

        let filter = crate::adapters::duckdb::TransactionFilter::source(TransactionSource::Coinbase);
        assert_eq!(repo.count_transactions(&user, &filter).unwrap(), 5);
    }

    #[test]
    fn test_preview_writes_nothing() {
        let (_dir, repo, service, user) = setup();
        let result = service
            .import_str(&user, ImportFormat::FidelityCsv, FIDELITY_CSV, true)
            .unwrap();
        assert!(result.preview);
        assert_eq!(result.imported, 3);
        assert_eq!(result.transactions.as_ref().unwrap().len(), 3);

        let filter = crate::adapters::duckdb::TransactionFilter::source(TransactionSource::Fidelity);
        assert_eq!(repo.count_transactions(&user, &filter).unwrap(), 0);
    }

    #[test]
    fn test_duplicate_ids_in_file_first_wins() {
        let (_dir, repo, service, user) = setup();
        let csv = "\
ID,Timestamp,Transaction Type,Asset,Quantity Transacted,Price at Transaction
dup,2024-01-01T00:00:00Z,Buy,BTC,1,100
dup,2024-01-02T00:00:00Z,Buy,BTC,2,200
";
        let result = service
            .import_str(&user, ImportFormat::CoinbaseBackup, csv, false)
            .unwrap();
        assert_eq!(result.discovered, 2);
        assert_eq!(result.imported, 1);
        assert_eq!(result.skipped, 1);

        let stored = repo.get_transaction_by_external_id("dup").unwrap().unwrap();
        assert_eq!(stored.amount, dec("1"));
    }

    #[test]
    fn test_fidelity_backup() {
        let (_dir, _repo, service, user) = setup();
        let csv = "\
ID,Run Date,Action,Symbol,Quantity,Price
fidelity_a,2024-01-15,Buy,AAPL,10,185.5
fidelity_b,2024-01-20T00:00:00,Sell,AAPL,-4,190
fidelity_c,bad,Sell,AAPL,-4,190
";
        let result = service
            .import_str(&user, ImportFormat::FidelityBackup, csv, false)
            .unwrap();
        assert_eq!(result.imported, 2);
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn test_unreadable_row_becomes_warning() {
        let mut strict = csv::ReaderBuilder::new()
            .flexible(false)
            .from_reader("a,b\n1\n".as_bytes());
        let result = strict.records().next().unwrap();

        let mut warnings = Vec::new();
        assert!(readable_record(result, 4, &mut warnings).is_none());
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].row, 4);
        assert!(warnings[0].message.starts_with("Unreadable row"));
    }

    #[test]
    fn test_unstorable_quantities_are_row_warnings() {
        let (_dir, repo, service, user) = setup();
        let csv = "\
ID,Timestamp,Transaction Type,Asset,Quantity Transacted,Price at Transaction
ok-1,2024-01-01T00:00:00Z,Buy,BTC,1,100
huge-1,2024-01-02T00:00:00Z,Buy,BTC,100000000000000000000000,100
tiny-1,2024-01-03T00:00:00Z,Buy,BTC,0.0000000000000000001,100
pricey-1,2024-01-04T00:00:00Z,Buy,BTC,1,100000000000000000000
";
        let preview = service
            .import_str(&user, ImportFormat::CoinbaseBackup, csv, true)
            .unwrap();
        assert_eq!(preview.imported, 1);
        assert_eq!(preview.warnings.len(), 3);

        let result = service
            .import_str(&user, ImportFormat::CoinbaseBackup, csv, false)
            .unwrap();
        assert_eq!(result.imported, 1);
        assert_eq!(result.skipped, 3);
        let rows: Vec<_> = result.warnings.iter().map(|w| w.row).collect();
        assert_eq!(rows, vec![2, 3, 4]);
        assert!(result.warnings[0].message.contains("out of range"));
        assert!(result.warnings[1].message.contains("decimal places"));
        assert!(result.warnings[2].message.starts_with("Price"));

        assert!(repo.get_transaction_by_external_id("ok-1").unwrap().is_some());
        assert!(repo.get_transaction_by_external_id("tiny-1").unwrap().is_none());
    }

    #[test]
    fn test_fidelity_unstorable_quantity_is_warning() {
        let csv = "\
Run Date,Action,Symbol,Quantity,Price ($)
01/15/2024,YOU BOUGHT,AAPL,10,185.50
01/16/2024,YOU BOUGHT,AAPL,0.00000000000000000001,185.50
";
        let parsed = parse_fidelity_csv(csv, &Uuid::new_v4()).unwrap();
        assert_eq!(parsed.transactions.len(), 1);
        assert_eq!(parsed.warnings.len(), 1);
        assert_eq!(parsed.warnings[0].row, 2);
    }

    #[test]
    fn test_unreadable_file_is_error() {
        let (dir, _repo, service, user) = setup();
        let missing = dir.path().join("missing.csv");
        assert!(service.import_coinbase_csv(&user, &missing, false).is_err());
    }

    #[test]
    fn test_import_format_from_str() {
        assert_eq!("coinbase".parse::<ImportFormat>().unwrap(), ImportFormat::CoinbaseCsv);
        assert_eq!(
            "Fidelity-Backup".parse::<ImportFormat>().unwrap(),
            ImportFormat::FidelityBackup
        );
        assert_eq!(ImportFormat::FidelityBackup.source(), TransactionSource::Fidelity);
        assert!("schwab".parse::<ImportFormat>().is_err());
    }
}
