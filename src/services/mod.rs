//! Service layer modules for external integrations.
//!
//! Contains the retry executor, batch image uploads over the object store, the vision
//! model client with its usage budget and result cache, and notifications.

pub mod batch_upload;
pub mod cache;
pub mod gemini;
pub mod notifications;
pub mod prompts;
pub mod retry;
pub mod storage;
pub mod usage;

pub use batch_upload::{BatchOptions, BatchUploadManager};
pub use cache::RedisCache;
pub use gemini::{AssessmentService, GeminiClient};
pub use notifications::TracingNotifier;
pub use retry::RetryPolicy;
pub use storage::SupabaseStorage;
pub use usage::{UsageLimits, UsageTracker};
