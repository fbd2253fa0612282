use thiserror::Error;

/// Failures the engine surfaces to its caller.  Per-strategy fetch failures
/// never appear here; strategies swallow them and contribute nothing.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A persistence or profile call failed.  The engine does not retry.
    #[error("collaborator call failed: {0}")]
    Collaborator(#[from] anyhow::Error),

    #[error("candidate {0} is neither cached nor available upstream")]
    UnknownCandidate(u64),

    #[error("unrecognised feedback action `{0}`")]
    UnknownAction(String),

    #[error("related fetch for seed {seed} failed: {source}")]
    CascadeFetch {
        seed: u64,
        #[source]
        source: anyhow::Error,
    },
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;
