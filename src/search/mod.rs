// # Search Module
//
// Turns a catalog book into a stored Release via the configured indexers:
//
// - **query**: Strict and relaxed query plan construction
// - **SearchAggregator**: Fan-out, scoring, early-stop and persistence
//
// Matching itself lives in `crate::matcher`; the aggregator only wires
// plans, indexer clients and scoring together.

mod aggregator;
mod query;

// Public API exports
pub use aggregator::{
    IndexerFailure, ManualCandidate, ManualSearchOutcome, SearchAggregator, SearchError,
};
pub use query::build_query_plan;
