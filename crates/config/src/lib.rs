use std::collections::{BTreeMap, BTreeSet};
use std::env;
use std::fs;
use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

// ── Maturity mode ─────────────────────────────────────────────────────────────

/// Which side of the mature-content flag a batch is allowed to keep.
///
/// | Mode          | Behaviour                                   |
/// |---------------|---------------------------------------------|
/// | `mixed`       | No filtering on the mature flag.            |
/// | `mature_only` | Keep only mature-flagged items.             |
/// | `safe`        | Drop every mature-flagged item.             |
///
/// Older config files used a boolean (`r18_mode = true`) or one of several
/// aliases; both forms are accepted on load and written back as the
/// canonical lowercase name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawMaturityMode", into = "String")]
pub enum MaturityMode {
    #[default]
    Mixed,
    MatureOnly,
    Safe,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawMaturityMode {
    Flag(bool),
    Named(String),
}

impl From<RawMaturityMode> for MaturityMode {
    fn from(raw: RawMaturityMode) -> Self {
        match raw {
            RawMaturityMode::Flag(true) => MaturityMode::MatureOnly,
            RawMaturityMode::Flag(false) => MaturityMode::Mixed,
            RawMaturityMode::Named(name) => MaturityMode::parse(&name),
        }
    }
}

impl From<MaturityMode> for String {
    fn from(mode: MaturityMode) -> Self {
        mode.as_str().to_string()
    }
}

impl MaturityMode {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "true" | "pure" | "r18_only" | "mature_only" => MaturityMode::MatureOnly,
            "safe" | "clean" | "18-" => MaturityMode::Safe,
            _ => MaturityMode::Mixed,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MaturityMode::Mixed => "mixed",
            MaturityMode::MatureOnly => "mature_only",
            MaturityMode::Safe => "safe",
        }
    }
}

// ── Fetcher ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingConfig {
    pub enabled: bool,
    /// Ranking list names requested from the content API.  The ranking quota
    /// is split evenly across them.
    pub modes: Vec<String>,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            modes: vec!["day".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetcherConfig {
    /// Total candidate budget split across strategies each cycle.
    pub discovery_limit: usize,
    /// Number of profile tags read at the start of each cycle.
    pub top_n: usize,
    pub date_range_days: u32,
    /// Base popularity threshold for tag searches.  The adaptive threshold
    /// only ever lowers it.
    pub search_bookmark_threshold: u64,
    /// Maximum number of tag-pair searches per cycle.
    pub combination_cap: usize,
    /// Number of tag pairs read from the profile before redundancy pruning.
    pub tag_pair_limit: usize,
    /// Page size of each combination search.
    pub combination_fetch_limit: usize,
    /// Number of single tags sampled when combination search under-fills.
    pub fallback_samples: usize,
    pub follow_feed_limit: usize,
    /// Upper bound on the followed-originator list read each cycle.  Every
    /// followed originator receives the filter boost.
    pub following_limit: usize,
    /// Originators whose recent items are fetched directly, in addition to
    /// the aggregated follow feed.  They also receive the filter boost.
    pub subscribed_originators: Vec<u64>,
    pub originator_recent_limit: usize,
    /// Normalized tag → alternative search terms OR-ed into its query.
    pub query_aliases: BTreeMap<String, Vec<String>>,
    pub ranking: RankingConfig,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            discovery_limit: 200,
            top_n: 20,
            date_range_days: 7,
            search_bookmark_threshold: 1000,
            combination_cap: 20,
            tag_pair_limit: 50,
            combination_fetch_limit: 30,
            fallback_samples: 3,
            follow_feed_limit: 100,
            following_limit: 500,
            subscribed_originators: vec![],
            originator_recent_limit: 5,
            query_aliases: BTreeMap::new(),
            ranking: RankingConfig::default(),
        }
    }
}

// ── Bandit limits ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MabConfig {
    /// Fraction of the budget every strategy is guaranteed.
    pub min_quota: f64,
    /// Fraction of the budget no single strategy may exceed.
    pub max_quota: f64,
}

impl Default for MabConfig {
    fn default() -> Self {
        Self {
            min_quota: 0.2,
            max_quota: 0.6,
        }
    }
}

// ── Filter ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub blacklist_tags: Vec<String>,
    pub daily_limit: usize,
    pub exclude_ai: bool,
    /// Candidates scoring below this (after the originator boost) are dropped.
    pub min_match_score: f64,
    /// Share of the composite sort key taken by the match score; the rest
    /// goes to relative popularity.
    pub match_weight: f64,
    pub max_per_originator: usize,
    pub boosted_originators: Vec<u64>,
    pub originator_boost: f64,
    /// Drop candidates created more than this many days ago.  `0` disables.
    pub min_create_days: u32,
    #[serde(alias = "r18_mode")]
    pub maturity_mode: MaturityMode,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            blacklist_tags: vec![],
            daily_limit: 20,
            exclude_ai: true,
            min_match_score: 0.0,
            match_weight: 0.5,
            max_per_originator: 3,
            boosted_originators: vec![],
            originator_boost: 0.3,
            min_create_days: 0,
            maturity_mode: MaturityMode::Mixed,
        }
    }
}

// ── Feedback / chain reaction ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedbackConfig {
    pub chain_enabled: bool,
    pub max_chain_depth: u32,
    /// How many related items each cascade step delivers.
    pub related_push_limit: usize,
    pub related_fetch_limit: usize,
    /// When `true` each delivered cascade item seeds the next step on its
    /// own.  When `false` the chain only advances on another like.
    pub chain_auto_recurse: bool,
    /// Dislike count after which the profiler suggests blocking a tag.
    pub dislike_block_threshold: u32,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            chain_enabled: true,
            max_chain_depth: 3,
            related_push_limit: 1,
            related_fetch_limit: 20,
            chain_auto_recurse: true,
            dislike_block_threshold: 3,
        }
    }
}

// ── Cycle scheduling ─────────────────────────────────────────────────────────

/// What a trigger does when a discovery cycle is already running.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CycleOverlap {
    #[default]
    Queue,
    Skip,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SchedulerConfig {
    pub overlap: CycleOverlap,
}

// ── Store ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub ledger_path: String,
    /// Delivery history older than this is dropped by `compact`.
    pub history_retention_days: u32,
    /// Cached candidate records older than this are dropped by `compact`.
    pub cache_retention_days: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            ledger_path: ".xpush/ledger.jsonl".to_string(),
            history_retention_days: 30,
            cache_retention_days: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub fetcher: FetcherConfig,
    pub mab: MabConfig,
    pub filter: FilterConfig,
    pub feedback: FeedbackConfig,
    pub scheduler: SchedulerConfig,
    pub store: StoreConfig,
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::default();
        if let Ok(raw) = fs::read_to_string(path) {
            config = toml::from_str(&raw)?;
        }

        if let Ok(level) = env::var("XPUSH_LOG") {
            if !level.is_empty() {
                config.telemetry.log_level = level;
            }
        }

        if let Ok(path) = env::var("XPUSH_LEDGER_PATH") {
            if !path.is_empty() {
                config.store.ledger_path = path;
            }
        }

        Ok(config)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Originators that receive the filter boost: the explicit boost list
    /// plus every directly subscribed originator.
    pub fn boosted_originators(&self) -> BTreeSet<u64> {
        self.filter
            .boosted_originators
            .iter()
            .chain(self.fetcher.subscribed_originators.iter())
            .copied()
            .collect()
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
