pub mod config;
pub mod error;
pub mod logging;
pub mod market_structure;
pub mod models;
pub mod runner;
pub mod selector;
pub mod stores;
pub mod technicals;

// Re-exports for convenience
pub use config::{SelectorConfig, StructureConfig};
pub use error::{AnalyzerError, SkipReason, StoreError};
pub use models::{
    CandidateRecord, ChainSnapshot, IvSignal, MarketStructureSnapshot, OptionContractQuote,
    OptionType, PriceBar, Signal, TechnicalFeatureRecord, VolComparison,
};
pub use runner::{run_candidate_selection, run_feature_pipeline, BatchReport, FeatureReport};
pub use selector::{select_candidates, TickerContext};
pub use stores::{
    CandidateStore, ChainStore, FeatureStore, MemoryCandidateStore, MemoryChainStore,
    MemoryFeatureStore, MemoryPriceStore, PriceStore,
};
