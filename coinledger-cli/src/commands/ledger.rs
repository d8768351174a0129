//! Ledger views - transactions, assets, chart and balances

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use comfy_table::Cell;
use serde_json::json;

use super::{get_context, print_json, require_user};
use crate::output::{self, quantity_cell};
use coinledger_core::TransactionSource;

#[derive(Args)]
pub struct LedgerArgs {
    /// coinbase or fidelity
    #[arg(long, default_value = "coinbase")]
    source: TransactionSource,
    /// Only this asset (e.g. BTC, AAPL)
    #[arg(long)]
    asset: Option<String>,
    /// Output as JSON
    #[arg(long)]
    json: bool,
}

pub fn transactions(args: LedgerArgs, page: u32) -> Result<()> {
    let ctx = get_context()?;
    let user_id = require_user(&ctx)?;
    let page = ctx
        .ledger_service
        .list_transactions(&user_id, args.source, args.asset.as_deref(), page)?;

    if args.json {
        return print_json(&page);
    }

    if page.items.is_empty() {
        println!("No {} transactions found.", args.source);
        return Ok(());
    }

    let mut table = output::create_table();
    table.set_header(vec!["Date", "Type", "Asset", "Amount", "Price", "ID"]);
    for tx in &page.items {
        table.add_row(vec![
            Cell::new(tx.timestamp.format("%Y-%m-%d %H:%M")),
            Cell::new(&tx.tx_type),
            Cell::new(&tx.asset),
            quantity_cell(tx.amount),
            Cell::new(
                tx.price_at_transaction
                    .map(|p| p.round_dp(2).to_string())
                    .unwrap_or_else(|| "-".to_string()),
            ),
            Cell::new(&tx.external_id),
        ]);
    }
    println!("{}", table);
    println!(
        "{}",
        format!("Page {} of {} ({} transactions)", page.page, page.pages, page.total).dimmed()
    );
    if page.has_prev() {
        println!("{}", format!("Previous: --page {}", page.page - 1).dimmed());
    }
    if page.has_next() {
        println!("{}", format!("Next: --page {}", page.page + 1).dimmed());
    }
    Ok(())
}

pub fn assets(source: TransactionSource, json: bool) -> Result<()> {
    let ctx = get_context()?;
    let user_id = require_user(&ctx)?;
    let assets = ctx.ledger_service.assets(&user_id, source)?;

    if json {
        return print_json(&json!({"source": source, "assets": assets}));
    }
    if assets.is_empty() {
        println!("No {} assets yet.", source);
        return Ok(());
    }
    for asset in assets {
        println!("{}", asset);
    }
    Ok(())
}

pub fn chart(args: LedgerArgs) -> Result<()> {
    let ctx = get_context()?;
    let user_id = require_user(&ctx)?;
    let series = ctx
        .ledger_service
        .chart_series(&user_id, args.source, args.asset.as_deref())?;

    if args.json {
        return print_json(&series);
    }
    if series.is_empty() {
        println!("Nothing to chart.");
        return Ok(());
    }

    let label = args.asset.as_deref().map(str::to_uppercase).unwrap_or_else(|| "all assets".to_string());
    println!("{}", format!("{} balance, {}", args.source, label).bold());

    let mut table = output::create_table();
    table.set_header(vec!["Date", "Balance"]);
    for (date, value) in series.labels.iter().zip(series.values.iter()) {
        table.add_row(vec![Cell::new(date), quantity_cell(*value)]);
    }
    println!("{}", table);
    if let Some(last) = series.last_value() {
        println!("Current: {}", last.normalize());
    }
    Ok(())
}

pub fn balances(json: bool) -> Result<()> {
    let ctx = get_context()?;
    let user_id = require_user(&ctx)?;
    let balances = ctx.ledger_service.balances(&user_id)?;

    if json {
        return print_json(&balances);
    }
    if balances.is_empty() {
        output::info("No transactions yet. Run 'coinledger sync' or 'coinledger import'.");
        return Ok(());
    }

    let mut table = output::create_table();
    table.set_header(vec!["Source", "Asset", "Balance", "Transactions"]);
    for balance in &balances {
        table.add_row(vec![
            Cell::new(balance.source),
            Cell::new(&balance.asset),
            quantity_cell(balance.balance),
            Cell::new(balance.transactions),
        ]);
    }
    println!("{}", table);
    Ok(())
}
