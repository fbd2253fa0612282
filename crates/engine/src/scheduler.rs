//! Thompson-sampling allocation of the discovery budget across strategies.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Beta, Distribution};
use tracing::info;

use xpush_config::MabConfig;

use crate::candidate::{StrategyOrigin, StrategyStat};
use crate::contracts::PushStore;
use crate::error::EngineResult;

/// Pseudo-count added to both sides of every posterior.
const PRIOR: f64 = 2.0;

/// Per-strategy budget for one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuotaMap(BTreeMap<StrategyOrigin, usize>);

impl QuotaMap {
    pub fn get(&self, origin: StrategyOrigin) -> usize {
        self.0.get(&origin).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.0.values().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (StrategyOrigin, usize)> + '_ {
        self.0.iter().map(|(origin, quota)| (*origin, *quota))
    }
}

impl fmt::Display for QuotaMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .iter()
            .map(|(origin, quota)| format!("{origin}={quota}"))
            .collect();
        f.write_str(&parts.join(" "))
    }
}

/// Reads arm statistics from persistence and turns them into quotas.
pub struct StrategyScheduler {
    store: Arc<dyn PushStore>,
    limits: MabConfig,
}

impl StrategyScheduler {
    pub fn new(store: Arc<dyn PushStore>, limits: MabConfig) -> Self {
        Self { store, limits }
    }

    pub async fn allocate(&self, total: usize) -> EngineResult<QuotaMap> {
        let mut stats = Vec::with_capacity(StrategyOrigin::ALL.len());
        for origin in StrategyOrigin::ALL {
            stats.push((origin, self.store.strategy_stats(origin).await?));
        }

        let mut rng = StdRng::from_entropy();
        let quotas = allocate_quotas(&stats, total, &self.limits, &mut rng);
        info!(total, quotas = %quotas, "discovery budget allocated");
        Ok(quotas)
    }
}

/// Allocate `total` across `stats` (in declaration order).
///
/// Every strategy first receives `floor(total * min_quota)`.  The rest of the
/// pool is split by normalized Beta samples, capped at
/// `floor(total * max_quota)`, and any leftover is dealt out one unit at a
/// time to strategies still under their cap.  When the floors alone exceed
/// the budget they shrink to `total / n`.
pub fn allocate_quotas<R: Rng + ?Sized>(
    stats: &[(StrategyOrigin, StrategyStat)],
    total: usize,
    limits: &MabConfig,
    rng: &mut R,
) -> QuotaMap {
    let n = stats.len();
    if n == 0 {
        return QuotaMap::default();
    }

    let min_share = limits.min_quota.clamp(0.0, 1.0);
    let max_share = limits.max_quota.clamp(0.0, 1.0).max(min_share);

    let mut floor = (total as f64 * min_share).floor() as usize;
    if floor * n > total {
        floor = total / n;
    }
    let cap = ((total as f64 * max_share).floor() as usize).max(floor);

    let samples: Vec<f64> = stats
        .iter()
        .map(|(_, stat)| sample_posterior(stat, rng))
        .collect();
    let sum: f64 = samples.iter().sum();
    let ratios: Vec<f64> = if sum > 0.0 {
        samples.iter().map(|s| s / sum).collect()
    } else {
        vec![1.0 / n as f64; n]
    };

    let mut quotas = vec![floor; n];
    let pool = total - floor * n;
    let mut remaining = pool;

    for (quota, ratio) in quotas.iter_mut().zip(&ratios) {
        let share = (pool as f64 * ratio).floor() as usize;
        let add = share.min(cap - *quota).min(remaining);
        *quota += add;
        remaining -= add;
    }

    while remaining > 0 {
        let mut progressed = false;
        for quota in quotas.iter_mut() {
            if remaining == 0 {
                break;
            }
            if *quota < cap {
                *quota += 1;
                remaining -= 1;
                progressed = true;
            }
        }
        if !progressed {
            break;
        }
    }

    QuotaMap(
        stats
            .iter()
            .map(|(origin, _)| *origin)
            .zip(quotas)
            .collect(),
    )
}

fn sample_posterior<R: Rng + ?Sized>(stat: &StrategyStat, rng: &mut R) -> f64 {
    let alpha = stat.success as f64 + PRIOR;
    let beta = stat.failures() as f64 + PRIOR;
    Beta::new(alpha, beta)
        .map(|dist| dist.sample(rng))
        .unwrap_or(0.5)
}
