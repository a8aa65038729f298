// Application Layer - Use Cases and Business Logic

pub mod cache;
pub mod driver;
pub mod housekeeping;
pub mod qualification;
pub mod queue;
pub mod rate_limiter;
pub mod retry;
pub mod scheduler;
pub mod send_step;
pub mod shutdown;
pub mod wave;

// Re-exports
pub use cache::{CacheConfig, CacheStats, TtlCache};
pub use driver::{DriverConfig, DueSource, SequenceDriver};
pub use housekeeping::{Housekeeping, HousekeepingReport};
pub use qualification::{QualificationConfig, QualificationEngine, QualificationService};
pub use queue::{JobContext, JobProcessor, JobQueue, ProcessError, QueueConfig, QueueStatus};
pub use rate_limiter::{RateDecision, RateLimitConfig, RateLimiter, RateStatus};
pub use retry::{RetryDecision, RetryPolicy};
pub use scheduler::{SequenceConfig, SequenceScheduler};
pub use send_step::{SendStepConfig, SendStepProcessor};
pub use shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};
pub use wave::{WaveConfig, WaveDispatcher, WaveReport, WaveResult};
