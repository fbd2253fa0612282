use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;

use xpush_config::AppConfig;
use xpush_engine::{StrategyOrigin, StrategyScheduler, StrategyStat};
use xpush_store::{DeliveryRecord, PushLedger};

pub(crate) async fn run_stats(ledger: &PushLedger) {
    println!("── strategy stats ───────────────────────────────────");
    println!("  {:<14} {:>8} {:>8} {:>7}", "strategy", "success", "total", "rate");
    for (origin, stat) in ledger.strategy_table().await {
        println!("{}", format_stat_row(origin, &stat));
    }
}

pub(crate) async fn run_allocate(ledger: PushLedger, config: &AppConfig, total: usize) -> Result<()> {
    let scheduler = StrategyScheduler::new(Arc::new(ledger), config.mab.clone());
    let quotas = scheduler.allocate(total).await?;
    println!("── quota sample (total {total}) ──────────────────────────");
    for (origin, quota) in quotas.iter() {
        println!("  {:<14} {quota:>5}", origin.as_str());
    }
    println!("  assigned: {}", quotas.total());
    Ok(())
}

pub(crate) async fn run_history(ledger: &PushLedger, limit: usize) {
    let deliveries = ledger.recent_deliveries(limit).await;
    println!("── recent deliveries ────────────────────────────────");
    if deliveries.is_empty() {
        println!("  (nothing delivered yet)");
        return;
    }
    for delivery in &deliveries {
        println!("{}", format_delivery_row(delivery));
    }
}

pub(crate) async fn run_boost(ledger: &PushLedger, originator: u64, delta: f64) -> Result<()> {
    let score = ledger.adjust_originator_score(originator, delta).await?;
    println!("originator {originator}: boost score now {score:.3}");
    Ok(())
}

pub(crate) async fn run_compact(ledger: &PushLedger, config: &AppConfig) -> Result<()> {
    let summary = ledger.compact(Utc::now()).await?;
    println!("ledger compacted");
    println!(
        "- events: {} -> {}",
        summary.events_before, summary.events_after
    );
    println!(
        "- deliveries dropped: {} (older than {} days)",
        summary.deliveries_dropped, config.store.history_retention_days
    );
    println!(
        "- cache records dropped: {} (older than {} days)",
        summary.cache_dropped, config.store.cache_retention_days
    );
    Ok(())
}

fn format_stat_row(origin: StrategyOrigin, stat: &StrategyStat) -> String {
    format!(
        "  {:<14} {:>8} {:>8} {:>6.1}%",
        origin.as_str(),
        stat.success,
        stat.total,
        stat.rate() * 100.0
    )
}

fn format_delivery_row(delivery: &DeliveryRecord) -> String {
    format!(
        "  {}  #{:<12} {}",
        delivery.delivered_at.format("%Y-%m-%d %H:%M"),
        delivery.id,
        delivery.source.as_str()
    )
}
