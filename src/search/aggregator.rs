use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::db::{Database, DbBook, DbIndexer, DbRelease};
use crate::matcher::score_release;
use crate::newznab::{IndexerSearch, NewznabClient, ReleaseCandidate};
use crate::rate_limit::RateLimiter;
use crate::search::query::build_query_plan;

/// One indexer's failure within an aggregation run
#[derive(Debug, Clone, PartialEq)]
pub struct IndexerFailure {
    pub indexer_name: String,
    pub reason: String,
}

#[derive(Error, Debug)]
pub enum SearchError {
    /// At least one indexer answered, but nothing scored past the threshold
    #[error("no release matched")]
    NoMatch { failures: Vec<IndexerFailure> },
    /// Every query to every indexer failed; infrastructure problem, not
    /// an empty result
    #[error("all queries failed across {} indexer(s)", .failures.len())]
    AllIndexersFailed { failures: Vec<IndexerFailure> },
    #[error("no indexers are configured")]
    NoIndexers,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Candidate found by a manual search, tagged with its source indexer
#[derive(Debug, Clone)]
pub struct ManualCandidate {
    pub indexer_id: String,
    pub indexer_name: String,
    pub candidate: ReleaseCandidate,
}

#[derive(Debug, Default)]
pub struct ManualSearchOutcome {
    pub candidates: Vec<ManualCandidate>,
    pub failures: Vec<IndexerFailure>,
}

/// Fans query plans out across enabled indexers and picks the best match.
///
/// Automatic search walks the query plan tier by tier, querying indexers
/// in priority order, and stops at the first tier where anything survives
/// scoring. Manual search queries everything in parallel and returns the
/// raw candidates for a human to choose from.
#[derive(Clone)]
pub struct SearchAggregator {
    database: Database,
    limiter: Arc<RateLimiter>,
    indexer_timeout: Duration,
}

impl SearchAggregator {
    pub fn new(database: Database, limiter: Arc<RateLimiter>, indexer_timeout: Duration) -> Self {
        Self {
            database,
            limiter,
            indexer_timeout,
        }
    }

    /// Automatic search: best release for a book, persisted as a Release row
    pub async fn search_book(&self, book: &DbBook) -> Result<DbRelease, SearchError> {
        let (clients, failures) = self.build_clients().await?;
        self.search_with_clients(book, &clients, failures).await
    }

    /// Manual search: every raw candidate from every enabled indexer
    pub async fn manual_search(&self, book: &DbBook) -> Result<ManualSearchOutcome, SearchError> {
        let (clients, failures) = self.build_clients().await?;
        self.manual_search_with_clients(book, &clients, failures).await
    }

    async fn build_clients(
        &self,
    ) -> Result<(Vec<(DbIndexer, Arc<dyn IndexerSearch>)>, Vec<IndexerFailure>), SearchError> {
        let indexers = self.database.get_enabled_indexers().await?;

        let mut clients: Vec<(DbIndexer, Arc<dyn IndexerSearch>)> = Vec::new();
        let mut failures = Vec::new();
        for indexer in indexers {
            match NewznabClient::from_indexer(&indexer, self.limiter.clone()) {
                Ok(client) => clients.push((indexer, Arc::new(client))),
                Err(e) => {
                    warn!("Search: skipping {}: {}", indexer.name, e);
                    failures.push(IndexerFailure {
                        indexer_name: indexer.name.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        Ok((clients, failures))
    }

    pub(crate) async fn search_with_clients(
        &self,
        book: &DbBook,
        clients: &[(DbIndexer, Arc<dyn IndexerSearch>)],
        mut failures: Vec<IndexerFailure>,
    ) -> Result<DbRelease, SearchError> {
        if clients.is_empty() && failures.is_empty() {
            return Err(SearchError::NoIndexers);
        }

        let formats = self.database.get_enabled_formats().await?;
        let plan = build_query_plan(book);
        let mut any_success = false;

        for query in &plan {
            debug!(
                "Search: querying {} indexer(s) with {:?}",
                clients.len(),
                query
            );

            // Insertion order is priority order; ties resolve first-seen
            let mut survivors: Vec<(&DbIndexer, ReleaseCandidate, f64)> = Vec::new();

            for (indexer, client) in clients {
                match timeout(self.indexer_timeout, client.search(query)).await {
                    Ok(Ok(candidates)) => {
                        any_success = true;
                        for candidate in candidates {
                            if let Some(score) = score_release(book, &candidate.title, &formats) {
                                survivors.push((indexer, candidate, score));
                            }
                        }
                    }
                    Ok(Err(e)) => {
                        warn!("Search: {} failed: {}", indexer.name, e);
                        failures.push(IndexerFailure {
                            indexer_name: indexer.name.clone(),
                            reason: e.to_string(),
                        });
                    }
                    Err(_) => {
                        warn!(
                            "Search: {} timed out after {}s",
                            indexer.name,
                            self.indexer_timeout.as_secs()
                        );
                        failures.push(IndexerFailure {
                            indexer_name: indexer.name.clone(),
                            reason: format!("timed out after {}s", self.indexer_timeout.as_secs()),
                        });
                    }
                }
            }

            if survivors.is_empty() {
                continue;
            }

            let mut best_index = 0;
            for (i, entry) in survivors.iter().enumerate() {
                if entry.2 > survivors[best_index].2 {
                    best_index = i;
                }
            }

            for (indexer, candidate, score) in &survivors {
                let release = DbRelease::new(
                    &book.id,
                    &indexer.id,
                    &candidate.guid,
                    &candidate.title,
                    &candidate.link,
                    candidate.size,
                    *score,
                );
                self.database.upsert_release(&release).await?;
            }

            let (_, best_candidate, best_score) = &survivors[best_index];
            info!(
                "Search: matched {:?} at {:.2} for '{}'",
                best_candidate.title, best_score, book.title
            );

            let stored = self
                .database
                .get_release_by_guid(&book.id, &best_candidate.guid)
                .await?;
            return stored.ok_or(SearchError::Database(sqlx::Error::RowNotFound));
        }

        if any_success {
            info!("Search: no match for '{}'", book.title);
            Err(SearchError::NoMatch { failures })
        } else {
            warn!(
                "Search: every query failed for '{}' ({} failure(s))",
                book.title,
                failures.len()
            );
            Err(SearchError::AllIndexersFailed { failures })
        }
    }

    pub(crate) async fn manual_search_with_clients(
        &self,
        book: &DbBook,
        clients: &[(DbIndexer, Arc<dyn IndexerSearch>)],
        mut failures: Vec<IndexerFailure>,
    ) -> Result<ManualSearchOutcome, SearchError> {
        if clients.is_empty() && failures.is_empty() {
            return Err(SearchError::NoIndexers);
        }

        let plan = build_query_plan(book);
        let plan = &plan;

        let tasks = clients.iter().map(|(indexer, client)| async move {
            let mut found = Vec::new();
            let mut errors = Vec::new();
            for query in plan {
                match timeout(self.indexer_timeout, client.search(query)).await {
                    Ok(Ok(candidates)) => found.extend(candidates),
                    Ok(Err(e)) => errors.push(IndexerFailure {
                        indexer_name: indexer.name.clone(),
                        reason: e.to_string(),
                    }),
                    Err(_) => errors.push(IndexerFailure {
                        indexer_name: indexer.name.clone(),
                        reason: format!("timed out after {}s", self.indexer_timeout.as_secs()),
                    }),
                }
            }
            (indexer, found, errors)
        });

        let mut candidates = Vec::new();
        let mut seen: HashSet<(String, String)> = HashSet::new();
        for (indexer, found, errors) in join_all(tasks).await {
            failures.extend(errors);
            for candidate in found {
                // The same guid surfaces once per indexer across tiers
                if seen.insert((indexer.id.clone(), candidate.guid.clone())) {
                    candidates.push(ManualCandidate {
                        indexer_id: indexer.id.clone(),
                        indexer_name: indexer.name.clone(),
                        candidate,
                    });
                }
            }
        }

        info!(
            "Search: manual search found {} candidate(s), {} failure(s) for '{}'",
            candidates.len(),
            failures.len(),
            book.title
        );
        Ok(ManualSearchOutcome {
            candidates,
            failures,
        })
    }
}
