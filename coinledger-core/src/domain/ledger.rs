//! Derived ledger views: running balances, chart series and pages

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::TransactionSource;

/// Quantity currently held of one asset, summed over every ledger row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetBalance {
    pub source: TransactionSource,
    pub asset: String,
    pub balance: Decimal,
    pub transactions: u64,
}

/// Cumulative holdings by calendar date, ready for a line chart
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChartSeries {
    /// Dates as YYYY-MM-DD, ascending
    pub labels: Vec<String>,
    pub values: Vec<Decimal>,
}

impl ChartSeries {
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Holding at the last charted date
    pub fn last_value(&self) -> Option<Decimal> {
        self.values.last().copied()
    }
}

/// One page of results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub per_page: u32,
    pub total: u64,
    pub pages: u32,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, page: u32, per_page: u32, total: u64) -> Self {
        let pages = if per_page == 0 {
            0
        } else {
            total.div_ceil(per_page as u64) as u32
        };
        Self {
            items,
            page,
            per_page,
            total,
            pages,
        }
    }

    pub fn has_next(&self) -> bool {
        self.page < self.pages
    }

    pub fn has_prev(&self) -> bool {
        self.page > 1
    }
}
