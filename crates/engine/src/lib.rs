pub mod candidate;
pub mod cascade;
pub mod contracts;
pub mod cycle;
pub mod error;
pub mod feedback;
pub mod filter;
pub mod query;
pub mod scheduler;
pub mod strategies;
pub mod supervisor;
pub mod threshold;

#[cfg(test)]
pub(crate) mod testing;

pub use candidate::{
    AiFlag, CachedCandidate, Candidate, ChainMetadata, DeliverySource, FeedbackAction, MessageRef,
    ScoredCandidate, StrategyOrigin, StrategyStat, TagPair, WeightedTag,
};
pub use cascade::{CascadeRequest, ChainReaction, ChainedItem};
pub use contracts::{
    AffinityProfile, Collaborators, ContentApi, Delivery, DeliveryReceipt, PushStore, SearchQuery,
};
pub use cycle::{CycleReport, DiscoveryEngine};
pub use error::{EngineError, EngineResult};
pub use feedback::FeedbackOutcome;
pub use filter::ContentFilter;
pub use scheduler::{QuotaMap, StrategyScheduler, allocate_quotas};
pub use strategies::{DiscoveryContext, DiscoveryStrategy, StrategySet};
pub use supervisor::CascadeSupervisor;
