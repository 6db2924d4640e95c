//! chainsight: Ethereum transaction ingestion and multi-agent analysis
//!
//! Fetches an address's transaction history from an Etherscan-compatible
//! explorer, annotates each transaction with an LLM (or a deterministic rule
//! parser when no model is available), keeps the records in SQLite, and runs
//! a four-stage analysis (position, signal, industry, then an advisor over the
//! other three) that produces an investment-advice JSON document.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use chainsight::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> chainsight::Result<()> {
//!     let config = Config::load(None)?;
//!     let store: Arc<dyn TransactionStore> = Arc::new(SqliteStore::open(&config.database_path)?);
//!
//!     let ingestion = IngestionService::from_config(&config, store.clone())?;
//!     let report = ingestion.ingest("0x742d35Cc6634C0532925a3b844Bc454e4438f44e", 10).await?;
//!     println!("stored {} of {}", report.processed, report.total_fetched);
//!
//!     let doc = AnalysisPipeline::from_config(&config, store).run_analysis().await?;
//!     println!("status: {:?}", doc.metadata.status);
//!     Ok(())
//! }
//! ```

pub mod amount;
pub mod analysis;
pub mod annotate;
pub mod config;
pub mod error;
pub mod explorer;
pub mod ingest;
pub mod llm;
pub mod server;
pub mod store;
pub mod workflow;

pub use error::{Error, Result};

/// Prelude for common imports
pub mod prelude {
    pub use crate::analysis::{AnalysisPipeline, AnalysisResultDocument, PipelineStatus};
    pub use crate::annotate::{AnnotationResult, Annotator, Payload, Stage};
    pub use crate::config::Config;
    pub use crate::error::{Error, Result};
    pub use crate::ingest::{IngestionReport, IngestionService};
    pub use crate::store::{SqliteStore, TransactionRecord, TransactionStore};
    pub use crate::workflow::{AnalysisWorkflow, ExecutionPlan};
}
