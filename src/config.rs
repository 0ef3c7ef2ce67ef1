use std::path::PathBuf;
use std::time::Duration;

/// Retry policy for failed jobs.
///
/// By default a failed job is retried after a fixed 60 second backoff,
/// up to 3 attempts total.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    /// Total attempts before a job is moved to terminal `failed`
    pub max_attempts: i64,
    /// Fixed delay before a failed job becomes claimable again
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_secs(60),
        }
    }
}

/// Core engine configuration
/// In debug builds `load()` also reads a .env file before the environment.
#[derive(Clone, Debug)]
pub struct CoreConfig {
    /// SQLite database file
    pub database_path: PathBuf,
    /// Root of the library tree imports are moved into
    pub library_root: PathBuf,
    /// Job runner tick period
    pub tick_interval: Duration,
    /// Maximum jobs claimed and run per tick
    pub worker_concurrency: usize,
    /// Hard timeout for a single indexer query
    pub indexer_timeout: Duration,
    /// Period of the recurring search-all-missing job
    pub search_interval: Duration,
    /// Period of the recurring poll-downloads job
    pub poll_interval: Duration,
    /// Backoff/attempt policy for failed jobs
    pub retry: RetryPolicy,
}

impl CoreConfig {
    /// Load configuration from the environment
    pub fn load() -> Self {
        #[cfg(debug_assertions)]
        {
            if dotenvy::dotenv().is_ok() {
                tracing::info!("Config: loaded .env file");
            }
        }

        Self::from_env()
    }

    fn from_env() -> Self {
        let home_dir = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));

        let database_path = std::env::var("BOOKHOUND_DATABASE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| home_dir.join(".bookhound").join("bookhound.db"));

        let library_root = std::env::var("BOOKHOUND_LIBRARY_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| home_dir.join("Books"));

        Self {
            database_path,
            library_root,
            tick_interval: env_duration_secs("BOOKHOUND_TICK_SECS", 2),
            worker_concurrency: env_usize("BOOKHOUND_WORKERS", 4),
            indexer_timeout: env_duration_secs("BOOKHOUND_INDEXER_TIMEOUT_SECS", 10),
            search_interval: env_duration_secs("BOOKHOUND_SEARCH_INTERVAL_SECS", 900),
            poll_interval: env_duration_secs("BOOKHOUND_POLL_INTERVAL_SECS", 60),
            retry: RetryPolicy {
                max_attempts: env_i64("BOOKHOUND_RETRY_MAX_ATTEMPTS", 3),
                backoff: env_duration_secs("BOOKHOUND_RETRY_BACKOFF_SECS", 60),
            },
        }
    }
}

fn env_duration_secs(var: &str, default: u64) -> Duration {
    Duration::from_secs(
        std::env::var(var)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(default),
    )
}

fn env_usize(var: &str, default: usize) -> usize {
    std::env::var(var)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_i64(var: &str, default: i64) -> i64 {
    std::env::var(var)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_policy_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.backoff, Duration::from_secs(60));
    }

    #[test]
    fn test_from_env_defaults() {
        let config = CoreConfig::from_env();
        assert_eq!(config.tick_interval, Duration::from_secs(2));
        assert_eq!(config.worker_concurrency, 4);
        assert_eq!(config.indexer_timeout, Duration::from_secs(10));
    }
}
