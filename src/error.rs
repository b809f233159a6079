use thiserror::Error;

/// Failures surfaced by a backing store.
///
/// `Unavailable` is the only condition that aborts a whole run; `Conflict`
/// is transient and retried with backoff by the caller.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("write conflict: {0}")]
    Conflict(String),
}

/// Why a ticker produced no output this run. These are normal, logged
/// outcomes, not process failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    #[error("no chain snapshot available")]
    NoSnapshot,
    #[error("chain snapshot has no contracts")]
    EmptyChain,
    #[error("no price history available")]
    NoPriceHistory,
    #[error("no usable spot price")]
    NoSpotPrice,
}

/// Run-level failure of an analysis pipeline.
#[derive(Debug, Error)]
pub enum AnalyzerError {
    #[error(transparent)]
    Store(#[from] StoreError),
}
