//! Curriculum RAG pipeline: ingestion, retrieval, extractive synthesis and
//! the practice question bank, plus the service facade that wires them.

pub mod api;
pub mod cache;
pub mod extract;
pub mod ingest;
pub mod questions;
pub mod retrieve;
pub mod retry;
pub mod service;
pub mod synthesize;

pub use api::{ErrorBody, IngestRequest, QueryRequest, QueryResponse, QuestionsRequest, QuestionsResponse};
pub use ingest::{IngestOptions, IngestReport, IngestionOrchestrator};
pub use retrieve::Retriever;
pub use service::RagService;
pub use synthesize::{AnswerSynthesizer, INSUFFICIENT_CONTEXT_ANSWER, NO_CONTEXT_ANSWER};
