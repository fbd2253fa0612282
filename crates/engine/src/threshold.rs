//! Per-cycle popularity ceilings used to derive relative search thresholds.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::contracts::{ContentApi, SearchQuery};

/// Ceiling assumed when the lookup for a tag fails.
pub const FALLBACK_CEILING: u64 = 1000;
/// Lowest relative threshold ever returned.
pub const MIN_RELATIVE_THRESHOLD: u64 = 100;
const CEILING_FRACTION: f64 = 0.05;

/// Memoizes one popularity lookup per tag.  A fresh cache is built for every
/// discovery cycle and never shared with cascade branches.
pub struct ThresholdCache {
    api: Arc<dyn ContentApi>,
    ceilings: Mutex<HashMap<String, Arc<OnceCell<u64>>>>,
}

impl ThresholdCache {
    pub fn new(api: Arc<dyn ContentApi>) -> Self {
        Self {
            api,
            ceilings: Mutex::new(HashMap::new()),
        }
    }

    /// `min(base, max(100, ceiling * 0.05))`.
    pub async fn dynamic_threshold(&self, tag: &str, base_threshold: u64) -> u64 {
        let ceiling = self.ceiling(tag).await;
        relative_threshold(ceiling).min(base_threshold)
    }

    /// The popularity of the most popular item for `tag`, fetched at most
    /// once per cache even under concurrent callers.
    pub async fn ceiling(&self, tag: &str) -> u64 {
        let cell = {
            let mut map = match self.ceilings.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            map.entry(tag.to_string()).or_default().clone()
        };

        *cell
            .get_or_init(|| async {
                let query = SearchQuery {
                    tags: vec![tag.to_string()],
                    bookmark_threshold: None,
                    date_range_days: None,
                    limit: 1,
                };
                match self.api.search(&query).await {
                    Ok(items) => {
                        let ceiling = items.first().map(|c| c.bookmark_count).unwrap_or(0);
                        debug!(tag, ceiling, "popularity ceiling cached");
                        ceiling
                    }
                    Err(err) => {
                        warn!(tag, ?err, "ceiling lookup failed; using fallback");
                        FALLBACK_CEILING
                    }
                }
            })
            .await
    }

    pub fn len(&self) -> usize {
        self.ceilings.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub fn relative_threshold(ceiling: u64) -> u64 {
    let scaled = (ceiling as f64 * CEILING_FRACTION) as u64;
    scaled.max(MIN_RELATIVE_THRESHOLD)
}
