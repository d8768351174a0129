//! Ledger service - paged listings, asset lists, running balances
//!
//! Balances are never stored; they are folded from the signed amounts in
//! timestamp order each time they are asked for.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::adapters::duckdb::{DuckDbRepository, TransactionFilter};
use crate::domain::{AssetBalance, ChartSeries, Page, Transaction, TransactionSource};

pub struct LedgerService {
    repository: Arc<DuckDbRepository>,
    per_page: u32,
}

impl LedgerService {
    pub fn new(repository: Arc<DuckDbRepository>, per_page: u32) -> Self {
        Self {
            repository,
            per_page: per_page.max(1),
        }
    }

    /// Newest first; pages start at 1 and page 0 is treated as 1
    pub fn list_transactions(
        &self,
        user_id: &Uuid,
        source: TransactionSource,
        asset: Option<&str>,
        page: u32,
    ) -> Result<Page<Transaction>> {
        let page = page.max(1);
        let filter = filter_for(source, asset);
        let total = self.repository.count_transactions(user_id, &filter)?;
        let offset = (page as u64 - 1) * self.per_page as u64;
        let items = self
            .repository
            .get_transactions_page(user_id, &filter, self.per_page, offset)?;
        Ok(Page::new(items, page, self.per_page, total))
    }

    pub fn assets(&self, user_id: &Uuid, source: TransactionSource) -> Result<Vec<String>> {
        self.repository.get_distinct_assets(user_id, source)
    }

    /// Cumulative holdings per calendar date.
    ///
    /// Without an asset filter the quantities of every asset are summed, which
    /// only makes sense as an activity curve; the CLI always passes one when
    /// the user has more than one asset.
    pub fn chart_series(
        &self,
        user_id: &Uuid,
        source: TransactionSource,
        asset: Option<&str>,
    ) -> Result<ChartSeries> {
        let transactions = self
            .repository
            .get_transactions(user_id, &filter_for(source, asset))?;
        Ok(build_chart_series(source, &transactions))
    }

    /// Running balance of every (source, asset) the user holds
    pub fn balances(&self, user_id: &Uuid) -> Result<Vec<AssetBalance>> {
        let transactions = self
            .repository
            .get_transactions(user_id, &TransactionFilter::default())?;

        let mut totals: BTreeMap<(TransactionSource, String), (Decimal, u64)> = BTreeMap::new();
        for tx in &transactions {
            let entry = totals
                .entry((tx.source, tx.asset.clone()))
                .or_insert((Decimal::ZERO, 0));
            entry.0 += tx.amount;
            entry.1 += 1;
        }

        Ok(totals
            .into_iter()
            .map(|((source, asset), (balance, transactions))| AssetBalance {
                source,
                asset,
                balance: balance.normalize(),
                transactions,
            })
            .collect())
    }
}

fn filter_for(source: TransactionSource, asset: Option<&str>) -> TransactionFilter {
    let asset = asset.map(|a| a.trim().to_uppercase());
    TransactionFilter::source(source).with_asset(asset.as_deref())
}

/// Fold rows (oldest first) into one point per date.
///
/// Fidelity histories include dividends, transfers and fees in share
/// quantities; only Buy and Sell move the position.
pub fn build_chart_series(source: TransactionSource, transactions: &[Transaction]) -> ChartSeries {
    let mut by_date: BTreeMap<String, Decimal> = BTreeMap::new();
    let mut balance = Decimal::ZERO;

    for tx in transactions {
        if source == TransactionSource::Fidelity
            && !(tx.tx_type.eq_ignore_ascii_case("buy") || tx.tx_type.eq_ignore_ascii_case("sell"))
        {
            continue;
        }
        balance += tx.amount;
        by_date.insert(tx.timestamp.format("%Y-%m-%d").to_string(), balance);
    }

    let (labels, values) = by_date
        .into_iter()
        .map(|(date, value)| (date, value.normalize()))
        .unzip();
    ChartSeries { labels, values }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn tx(
        user: Uuid,
        id: &str,
        tx_type: &str,
        amount: &str,
        asset: &str,
        day: u32,
        hour: u32,
        source: TransactionSource,
    ) -> Transaction {
        Transaction::new(
            id,
            user,
            tx_type,
            dec(amount),
            asset,
            Utc.with_ymd_and_hms(2024, 1, day, hour, 0, 0).unwrap(),
            source,
        )
    }

    fn setup(per_page: u32) -> (TempDir, Arc<DuckDbRepository>, LedgerService) {
        let dir = TempDir::new().unwrap();
        let repo = Arc::new(DuckDbRepository::new(&dir.path().join("test.duckdb")).unwrap());
        repo.ensure_schema().unwrap();
        let service = LedgerService::new(Arc::clone(&repo), per_page);
        (dir, repo, service)
    }

    #[test]
    fn test_chart_keeps_last_value_per_date() {
        let user = Uuid::new_v4();
        let rows = vec![
            tx(user, "a", "buy", "1", "BTC", 1, 9, TransactionSource::Coinbase),
            tx(user, "b", "buy", "0.5", "BTC", 1, 15, TransactionSource::Coinbase),
            tx(user, "c", "send", "-0.25", "BTC", 3, 12, TransactionSource::Coinbase),
        ];
        let series = build_chart_series(TransactionSource::Coinbase, &rows);
        assert_eq!(series.labels, vec!["2024-01-01", "2024-01-03"]);
        assert_eq!(series.values, vec![dec("1.5"), dec("1.25")]);
        assert_eq!(series.last_value(), Some(dec("1.25")));
    }

    #[test]
    fn test_fidelity_chart_counts_only_trades() {
        let user = Uuid::new_v4();
        let rows = vec![
            tx(user, "a", "Buy", "10", "AAPL", 1, 0, TransactionSource::Fidelity),
            tx(user, "b", "DIVIDEND RECEIVED", "3", "AAPL", 2, 0, TransactionSource::Fidelity),
            tx(user, "c", "SELL", "-4", "AAPL", 3, 0, TransactionSource::Fidelity),
        ];
        let series = build_chart_series(TransactionSource::Fidelity, &rows);
        assert_eq!(series.labels, vec!["2024-01-01", "2024-01-03"]);
        assert_eq!(series.values, vec![dec("10"), dec("6")]);
    }

    #[test]
    fn test_empty_chart() {
        let series = build_chart_series(TransactionSource::Coinbase, &[]);
        assert!(series.is_empty());
    }

    #[test]
    fn test_list_transactions_pages() {
        let (_dir, repo, service) = setup(2);
        let user = Uuid::new_v4();
        let rows: Vec<_> = (1..=5)
            .map(|d| tx(user, &format!("t{}", d), "buy", "1", "BTC", d, 0, TransactionSource::Coinbase))
            .collect();
        repo.insert_transactions(&rows).unwrap();

        let first = service
            .list_transactions(&user, TransactionSource::Coinbase, None, 0)
            .unwrap();
        assert_eq!(first.page, 1);
        assert_eq!(first.pages, 3);
        assert_eq!(first.total, 5);
        assert_eq!(first.items[0].external_id, "t5");
        assert_eq!(first.items[1].external_id, "t4");

        let last = service
            .list_transactions(&user, TransactionSource::Coinbase, Some("btc"), 3)
            .unwrap();
        assert_eq!(last.items.len(), 1);
        assert_eq!(last.items[0].external_id, "t1");
        assert!(!last.has_next());

        let other = service
            .list_transactions(&user, TransactionSource::Fidelity, None, 1)
            .unwrap();
        assert_eq!(other.total, 0);
        assert_eq!(other.pages, 0);
    }

    #[test]
    fn test_balances_per_source_and_asset() {
        let (_dir, repo, service) = setup(10);
        let user = Uuid::new_v4();
        let other_user = Uuid::new_v4();
        repo.insert_transactions(&[
            tx(user, "a", "buy", "1.5", "BTC", 1, 0, TransactionSource::Coinbase),
            tx(user, "b", "sell", "-0.5", "BTC", 2, 0, TransactionSource::Coinbase),
            tx(user, "c", "buy", "2", "ETH", 2, 0, TransactionSource::Coinbase),
            tx(user, "d", "Buy", "10", "AAPL", 2, 0, TransactionSource::Fidelity),
            tx(other_user, "e", "buy", "100", "BTC", 2, 0, TransactionSource::Coinbase),
        ])
        .unwrap();

        let balances = service.balances(&user).unwrap();
        assert_eq!(balances.len(), 3);
        let btc = balances.iter().find(|b| b.asset == "BTC").unwrap();
        assert_eq!(btc.balance, dec("1"));
        assert_eq!(btc.transactions, 2);
        let aapl = balances.iter().find(|b| b.asset == "AAPL").unwrap();
        assert_eq!(aapl.source, TransactionSource::Fidelity);

        assert_eq!(
            service.assets(&user, TransactionSource::Coinbase).unwrap(),
            vec!["BTC", "ETH"]
        );
    }

    #[test]
    fn test_chart_series_from_repository() {
        let (_dir, repo, service) = setup(10);
        let user = Uuid::new_v4();
        repo.insert_transactions(&[
            tx(user, "a", "buy", "1", "BTC", 1, 0, TransactionSource::Coinbase),
            tx(user, "b", "buy", "5", "ETH", 1, 0, TransactionSource::Coinbase),
            tx(user, "c", "buy", "1", "BTC", 2, 0, TransactionSource::Coinbase),
        ])
        .unwrap();

        let btc = service
            .chart_series(&user, TransactionSource::Coinbase, Some("BTC"))
            .unwrap();
        assert_eq!(btc.values, vec![dec("1"), dec("2")]);

        let all = service
            .chart_series(&user, TransactionSource::Coinbase, None)
            .unwrap();
        assert_eq!(all.values, vec![dec("6"), dec("7")]);
    }
}
