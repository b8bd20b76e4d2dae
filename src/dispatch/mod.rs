//! Dispatchers handing work to the asynchronous collaborators.
//!
//! This module contains:
//! - TranscriptionDispatcher: starts speech-to-text tasks
//! - ArticleDispatcher: queues transcripts for article generation
//! - JsonlArticleQueue: local file-backed queue for the article worker

pub mod article;
pub mod queue;
pub mod transcription;

pub use article::{ArticleDispatcher, ArticleQueue, ArticleRequest};
pub use queue::{ArticleQueueError, JsonlArticleQueue, QueueMessage};
pub use transcription::{
    TranscriptDocument, TranscriptionDispatcher, TranscriptionEngine, TranscriptionRequest,
};
