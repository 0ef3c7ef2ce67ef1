// Test support utilities for both unit and integration tests

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::download::{BackendStatus, DownloadClient, DownloadClientError, EnqueueMeta};
use crate::newznab::{IndexerSearch, NewznabError, ReleaseCandidate};

/// Build a plausible release candidate for tests
#[allow(unused)] // Used in tests
pub fn candidate(guid: &str, title: &str) -> ReleaseCandidate {
    ReleaseCandidate {
        guid: guid.to_string(),
        title: title.to_string(),
        link: format!("https://idx.example/get/{}", guid),
        size: Some(1_048_576),
        categories: vec![7020],
        published_at: None,
    }
}

/// Scripted indexer for search tests
///
/// Each `search` call pops the next scripted response; an exhausted script
/// answers with an empty result page. Calls are counted so tests can prove
/// the early-stop behavior.
pub struct MockIndexer {
    calls: AtomicUsize,
    responses: Mutex<VecDeque<Result<Vec<ReleaseCandidate>, ()>>>,
}

impl Default for MockIndexer {
    fn default() -> Self {
        MockIndexer {
            calls: AtomicUsize::new(0),
            responses: Mutex::new(VecDeque::new()),
        }
    }
}

impl MockIndexer {
    #[allow(unused)] // Used in tests
    pub fn new() -> Self {
        Self::default()
    }

    #[allow(unused)] // Used in tests
    pub fn push_success(&self, candidates: Vec<ReleaseCandidate>) {
        self.responses.lock().unwrap().push_back(Ok(candidates));
    }

    #[allow(unused)] // Used in tests
    pub fn push_failure(&self) {
        self.responses.lock().unwrap().push_back(Err(()));
    }

    #[allow(unused)] // Used in tests
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl IndexerSearch for MockIndexer {
    async fn search(&self, _query: &str) -> Result<Vec<ReleaseCandidate>, NewznabError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.responses.lock().unwrap().pop_front() {
            Some(Ok(candidates)) => Ok(candidates),
            Some(Err(())) => Err(NewznabError::RateLimit),
            None => Ok(Vec::new()),
        }
    }
}

/// Scripted download backend for orchestrator tests
///
/// Enqueues hand out scripted ids (or generated ones) and record the
/// submitted URLs; status lookups answer from a map keyed by backend
/// item id.
pub struct MockDownloadBackend {
    enqueue_ids: Mutex<VecDeque<String>>,
    enqueued_urls: Mutex<Vec<String>>,
    statuses: Mutex<HashMap<String, BackendStatus>>,
    status_calls: AtomicUsize,
    next_id: AtomicUsize,
}

impl Default for MockDownloadBackend {
    fn default() -> Self {
        MockDownloadBackend {
            enqueue_ids: Mutex::new(VecDeque::new()),
            enqueued_urls: Mutex::new(Vec::new()),
            statuses: Mutex::new(HashMap::new()),
            status_calls: AtomicUsize::new(0),
            next_id: AtomicUsize::new(1),
        }
    }
}

impl MockDownloadBackend {
    #[allow(unused)] // Used in tests
    pub fn new() -> Self {
        Self::default()
    }

    #[allow(unused)] // Used in tests
    pub fn next_enqueue_id(&self, id: &str) {
        self.enqueue_ids.lock().unwrap().push_back(id.to_string());
    }

    #[allow(unused)] // Used in tests
    pub fn set_status(&self, backend_item_id: &str, status: BackendStatus) {
        self.statuses
            .lock()
            .unwrap()
            .insert(backend_item_id.to_string(), status);
    }

    #[allow(unused)] // Used in tests
    pub fn enqueue_count(&self) -> usize {
        self.enqueued_urls.lock().unwrap().len()
    }

    #[allow(unused)] // Used in tests
    pub fn status_call_count(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl DownloadClient for MockDownloadBackend {
    async fn enqueue(
        &self,
        source_url: &str,
        _meta: &EnqueueMeta,
    ) -> Result<String, DownloadClientError> {
        self.enqueued_urls.lock().unwrap().push(source_url.to_string());
        let id = self
            .enqueue_ids
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| format!("mock-{}", self.next_id.fetch_add(1, Ordering::SeqCst)));
        Ok(id)
    }

    async fn status(&self, backend_item_id: &str) -> Result<BackendStatus, DownloadClientError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        self.statuses
            .lock()
            .unwrap()
            .get(backend_item_id)
            .cloned()
            .ok_or_else(|| DownloadClientError::NotFound(backend_item_id.to_string()))
    }
}
