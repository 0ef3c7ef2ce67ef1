// # Newznab Module
//
// Talks the Newznab API dialect that Usenet indexers expose:
//
// - **NewznabClient**: One configured indexer endpoint (`/api?t=search&...`)
// - **feed**: RSS response parsing into `ReleaseCandidate` values
// - **IndexerSearch**: Trait seam so the search layer can be exercised
//   without the network

mod client;
mod feed;

// Public API exports
pub use client::{IndexerSearch, NewznabClient, NewznabError, DEFAULT_EBOOK_CATEGORIES};
pub use feed::{parse_search_feed, FeedError, ReleaseCandidate};
