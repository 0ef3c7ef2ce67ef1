// # Jobs Module
//
// Durable job queue and the runner that drains it:
//
// - **JobPayload**: closed set of work types, persisted as tagged JSON
// - **JobQueue**: enqueue, claim, and complete jobs with a retry policy
// - **JobRunner**: tick loop claiming bounded batches, plus the recurring
//   search and poll schedules
// - **JobDispatcher**: routes payloads to the search/download/import services

mod dispatcher;
mod payload;
mod queue;
mod runner;

// Public API exports
pub use dispatcher::JobDispatcher;
pub use payload::JobPayload;
pub use queue::{JobQueue, JobQueueError};
pub use runner::{Dispatch, DispatchOutcome, JobRunner, JobRunnerHandle};
