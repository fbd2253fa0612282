//! Candidate records flowing through discovery, filtering, and delivery.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::query::normalize_tag;

/// Whether the upstream marked an item as machine-generated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AiFlag {
    #[default]
    Unknown,
    Human,
    Generated,
}

/// A content item as returned by the upstream API.  Never mutated once
/// fetched; pipeline-derived values live on [`ScoredCandidate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: u64,
    pub title: String,
    pub tags: Vec<String>,
    pub originator_id: u64,
    pub originator_name: String,
    pub bookmark_count: u64,
    pub view_count: u64,
    pub create_date: DateTime<Utc>,
    pub is_r18: bool,
    pub ai_flag: AiFlag,
    pub page_count: u32,
    pub image_urls: Vec<String>,
}

impl Candidate {
    /// Rebuild a candidate from a cache record.  Fields the cache does not
    /// keep get neutral values so every downstream stage sees one shape.
    pub fn from_cached(record: &CachedCandidate) -> Self {
        Self {
            id: record.id,
            title: String::new(),
            tags: record.tags.clone(),
            originator_id: record.originator_id,
            originator_name: record.originator_name.clone(),
            bookmark_count: 0,
            view_count: 0,
            create_date: record.cached_at,
            is_r18: false,
            ai_flag: AiFlag::Unknown,
            page_count: 1,
            image_urls: vec![],
        }
    }

    pub fn is_ai_generated(&self) -> bool {
        self.ai_flag == AiFlag::Generated
    }
}

/// The discovery strategy a candidate came from.  Declaration order is the
/// order the scheduler hands out remainder units in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyOrigin {
    XpSearch,
    Subscription,
    Ranking,
    Related,
}

impl StrategyOrigin {
    pub const ALL: [StrategyOrigin; 4] = [
        StrategyOrigin::XpSearch,
        StrategyOrigin::Subscription,
        StrategyOrigin::Ranking,
        StrategyOrigin::Related,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StrategyOrigin::XpSearch => "xp_search",
            StrategyOrigin::Subscription => "subscription",
            StrategyOrigin::Ranking => "ranking",
            StrategyOrigin::Related => "related",
        }
    }
}

impl fmt::Display for StrategyOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What put an item in front of the user, as recorded in push history.
///
/// Cascade deliveries are kept apart from the four strategies so a like on a
/// chained item never credits a bandit arm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliverySource {
    Strategy(StrategyOrigin),
    Chain,
}

impl DeliverySource {
    pub fn strategy(self) -> Option<StrategyOrigin> {
        match self {
            DeliverySource::Strategy(origin) => Some(origin),
            DeliverySource::Chain => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DeliverySource::Strategy(origin) => origin.as_str(),
            DeliverySource::Chain => "chain",
        }
    }
}

impl From<StrategyOrigin> for DeliverySource {
    fn from(origin: StrategyOrigin) -> Self {
        DeliverySource::Strategy(origin)
    }
}

/// A candidate paired with the values the pipeline derives for it.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredCandidate {
    pub candidate: Candidate,
    pub origin: StrategyOrigin,
    pub match_score: f64,
}

impl ScoredCandidate {
    pub fn new(candidate: Candidate, origin: StrategyOrigin) -> Self {
        Self {
            candidate,
            origin,
            match_score: 0.0,
        }
    }

    pub fn with_score(self, match_score: f64) -> Self {
        Self { match_score, ..self }
    }

    pub fn id(&self) -> u64 {
        self.candidate.id
    }

    pub fn originator_id(&self) -> u64 {
        self.candidate.originator_id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackAction {
    Like,
    Dislike,
}

impl FeedbackAction {
    /// Parse the action strings delivery channels send back.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "like" | "1" => Some(FeedbackAction::Like),
            "dislike" | "0" => Some(FeedbackAction::Dislike),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FeedbackAction::Like => "like",
            FeedbackAction::Dislike => "dislike",
        }
    }
}

/// Opaque handle to a delivered message, used to thread cascade replies.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageRef(pub String);

/// Cascade lineage stored alongside a cached candidate.  Depth `0` means the
/// item was not produced by a cascade.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainMetadata {
    pub depth: u32,
    pub parent_id: Option<u64>,
    pub message_ref: Option<MessageRef>,
}

/// The slice of a candidate kept in persistence for feedback handling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedCandidate {
    pub id: u64,
    pub tags: Vec<String>,
    pub originator_id: u64,
    pub originator_name: String,
    #[serde(default)]
    pub chain: ChainMetadata,
    pub cached_at: DateTime<Utc>,
}

impl CachedCandidate {
    pub fn from_candidate(candidate: &Candidate, chain: ChainMetadata) -> Self {
        Self {
            id: candidate.id,
            tags: candidate.tags.clone(),
            originator_id: candidate.originator_id,
            originator_name: candidate.originator_name.clone(),
            chain,
            cached_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WeightedTag {
    pub tag: String,
    pub weight: f64,
}

impl WeightedTag {
    pub fn new(tag: impl Into<String>, weight: f64) -> Self {
        Self {
            tag: tag.into(),
            weight,
        }
    }
}

/// Co-occurrence strength of two profile tags.  Unordered: use [`TagPair::key`]
/// when comparing pairs.
#[derive(Debug, Clone, PartialEq)]
pub struct TagPair {
    pub tag1: String,
    pub tag2: String,
    pub weight: f64,
}

impl TagPair {
    pub fn new(tag1: impl Into<String>, tag2: impl Into<String>, weight: f64) -> Self {
        Self {
            tag1: tag1.into(),
            tag2: tag2.into(),
            weight,
        }
    }

    /// Order-independent identity over the normalized tags, so `Cat Ears`
    /// and `cat_ears` name the same pair member.
    pub fn key(&self) -> (String, String) {
        let a = normalize_tag(&self.tag1);
        let b = normalize_tag(&self.tag2);
        if a <= b { (a, b) } else { (b, a) }
    }
}

/// Success/total counters for one bandit arm.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyStat {
    pub success: u64,
    pub total: u64,
}

impl StrategyStat {
    pub fn failures(&self) -> u64 {
        self.total.saturating_sub(self.success)
    }

    pub fn rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.success as f64 / self.total as f64
        }
    }
}
