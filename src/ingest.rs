//! Ingestion: explorer → annotators → rule parser → store.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::annotate::{rules, AnnotationResult, Annotator, Payload, Stage};
use crate::config::Config;
use crate::explorer::{ExplorerClient, ExplorerTransaction};
use crate::llm;
use crate::store::{self, TransactionRecord, TransactionStore};
use crate::{Error, Result};

/// Outcome of one ingestion run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestionReport {
    pub address: String,
    pub total_fetched: usize,
    pub processed: usize,
    pub failed: usize,
}

pub struct IngestionService {
    explorer: ExplorerClient,
    /// Tried in order; the first success wins.
    annotators: Vec<Annotator>,
    store: Arc<dyn TransactionStore>,
}

impl IngestionService {
    pub fn new(
        explorer: ExplorerClient,
        annotators: Vec<Annotator>,
        store: Arc<dyn TransactionStore>,
    ) -> Self {
        Self {
            explorer,
            annotators,
            store,
        }
    }

    /// Explorer client plus one annotator per configured LLM backend.
    pub fn from_config(config: &Config, store: Arc<dyn TransactionStore>) -> Result<Self> {
        let explorer = ExplorerClient::new(&config.explorer)?;
        let annotators = llm::configured_backends(config)
            .into_iter()
            .map(|backend| Annotator::new(backend, config))
            .collect();
        Ok(Self::new(explorer, annotators, store))
    }

    /// Fetch up to `limit` transactions for `address`, annotate and store
    /// each one.
    ///
    /// Explorer failures abort the run. A failure on one transaction is
    /// logged and counted; the remaining transactions are still processed.
    pub async fn ingest(&self, address: &str, limit: usize) -> Result<IngestionReport> {
        let raw = self.explorer.fetch_transactions(address, limit).await?;
        info!(address, fetched = raw.len(), "fetched transactions");

        let mut report = IngestionReport {
            address: address.to_string(),
            total_fetched: raw.len(),
            processed: 0,
            failed: 0,
        };

        for (index, item) in raw.iter().enumerate() {
            match self.ingest_one(item).await {
                Ok(hash) => {
                    report.processed += 1;
                    tracing::debug!(index, hash = %hash, "stored transaction");
                }
                Err(e) => {
                    report.failed += 1;
                    error!(index, "failed to ingest transaction: {}", e);
                }
            }
        }

        info!(
            address,
            processed = report.processed,
            failed = report.failed,
            "ingestion finished"
        );
        Ok(report)
    }

    async fn ingest_one(&self, raw: &Value) -> Result<String> {
        let tx = ExplorerTransaction::from_value(raw)?;
        if tx.hash.trim().is_empty() {
            return Err(Error::Item {
                hash: "unknown".into(),
                message: "transaction has no hash".into(),
            });
        }
        let time = tx.timestamp()?;
        let parsed = self.annotate(&tx).await?;

        let record = TransactionRecord {
            hash: tx.hash.clone(),
            from_addr: tx.from.clone(),
            to_addr: tx.to.clone(),
            value: tx.value.clone(),
            time,
            raw_json: serde_json::to_string(raw)?,
            parsed_json: parsed.to_json_string(),
        };
        let hash = record.hash.clone();
        store::blocking(&self.store, move |s| s.upsert(&record)).await?;
        Ok(hash)
    }

    async fn annotate(&self, tx: &ExplorerTransaction) -> Result<AnnotationResult> {
        for annotator in &self.annotators {
            match annotator
                .try_annotate(Payload::Transaction(tx), Stage::TransactionParse)
                .await
            {
                Ok(result) => return Ok(result),
                Err(e) => warn!(
                    hash = %tx.hash,
                    provider = annotator.provider().as_str(),
                    "annotation failed, trying next: {}",
                    e
                ),
            }
        }
        rules::parse_transaction(tx)
    }
}
