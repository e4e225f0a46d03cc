//! Question Paper Analyzer
//!
//! Extracts the structure and content of exam papers with a generative model,
//! and streams per-question rubrics and answer keys over a WebSocket.

pub mod api;
pub mod catalog;
pub mod classifier;
pub mod config;
pub mod error;
pub mod extraction;
pub mod gateway;
pub mod generation;
pub mod guidelines;
mod lenient;
pub mod paper;
pub mod parser;
pub mod prompts;
pub mod reporter;
pub mod rubric;
pub mod stream;
pub mod tasks;
pub mod validation;
pub mod websocket;
pub mod worker_pool;

#[cfg(test)]
mod testing;

pub use api::{create_router, ApiResponse, AppState, EnhancedAnalysisResponse, API_VERSION};
pub use config::{Config, EmptyContentPolicy, GeminiConfig, QualityMode, RetryPolicy};
pub use error::{QpaError, Result};
pub use extraction::{ContentReport, EnhancedReport, Pipeline, StructureReport};
pub use gateway::{
    AiGateway, AiRequest, CallPurpose, DocumentHandle, DocumentState, Gateway, ResponseMode,
};
pub use paper::{Document, EnrichedPaper, PaperStructure};
pub use reporter::{run_rubric_job, RubricJobRequest};
pub use rubric::{JobSummary, RubricResponse, UserPreferences};
pub use stream::{CancelFlag, EventSink, StreamEvent};
pub use worker_pool::{run_pool, PoolSettings};
