//! Article generation worker.
//!
//! Consumes the article queue, calls a text-generation adapter and reports
//! each outcome back to the lifecycle controller.

pub mod article;
pub mod prompt;
pub mod retry;

pub use article::{ArticleWorker, DrainReport, OutcomeSink, WorkerSettings};
pub use prompt::{build_prompt, parse_article, FALLBACK_TITLE};
pub use retry::RetryPolicy;
