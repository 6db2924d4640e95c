//! Multi-stage analysis over stored transactions.
//!
//! The pipeline loads the most recent records, runs the workflow's stages
//! group by group (stages in one group concurrently on a
//! [`tokio::task::JoinSet`]), and writes the combined document to the result
//! path. A stage that fails outright marks the run failed; whatever finished
//! before it is still written.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::annotate::{rules, AnnotationResult, Annotator, Payload, Stage};
use crate::config::Config;
use crate::explorer::{now_rfc3339, rfc3339, ExplorerTransaction, EPOCH_RFC3339};
use crate::llm;
use crate::store::{TransactionRecord, TransactionStore};
use crate::workflow::{AnalysisWorkflow, ExecutionPlan};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisMetadata {
    pub workflow_version: String,
    pub run_id: String,
    pub transaction_count: usize,
    /// RFC 3339, UTC.
    pub analysis_timestamp: String,
    pub ai_provider: String,
    pub status: PipelineStatus,
}

/// The persisted analysis artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResultDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position_analysis: Option<AnnotationResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal_analysis: Option<AnnotationResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub industry_analysis: Option<AnnotationResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub advisor_analysis: Option<AnnotationResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub metadata: AnalysisMetadata,
}

impl AnalysisResultDocument {
    fn slot(&mut self, stage: Stage) -> Option<&mut Option<AnnotationResult>> {
        match stage {
            Stage::Position => Some(&mut self.position_analysis),
            Stage::Signal => Some(&mut self.signal_analysis),
            Stage::Industry => Some(&mut self.industry_analysis),
            Stage::Advisor => Some(&mut self.advisor_analysis),
            Stage::TransactionParse => None,
        }
    }

    pub fn stage(&self, stage: Stage) -> Option<&AnnotationResult> {
        match stage {
            Stage::Position => self.position_analysis.as_ref(),
            Stage::Signal => self.signal_analysis.as_ref(),
            Stage::Industry => self.industry_analysis.as_ref(),
            Stage::Advisor => self.advisor_analysis.as_ref(),
            Stage::TransactionParse => None,
        }
    }

    pub fn set_stage(&mut self, stage: Stage, result: AnnotationResult) {
        if let Some(slot) = self.slot(stage) {
            *slot = Some(result);
        }
    }

    pub fn is_completed(&self) -> bool {
        self.metadata.status == PipelineStatus::Completed
    }
}

pub struct AnalysisPipeline {
    store: Arc<dyn TransactionStore>,
    annotator: Arc<Annotator>,
    workflow: AnalysisWorkflow,
    batch_size: usize,
    result_path: PathBuf,
}

impl AnalysisPipeline {
    pub fn new(
        store: Arc<dyn TransactionStore>,
        annotator: Annotator,
        batch_size: usize,
        result_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            annotator: Arc::new(annotator),
            workflow: AnalysisWorkflow::standard(),
            batch_size,
            result_path: result_path.into(),
        }
    }

    pub fn from_config(config: &Config, store: Arc<dyn TransactionStore>) -> Self {
        let annotator = Annotator::new(llm::primary_backend(config), config);
        Self::new(store, annotator, config.batch_size, config.result_path.clone())
    }

    pub fn with_workflow(mut self, workflow: AnalysisWorkflow) -> Self {
        self.workflow = workflow;
        self
    }

    pub fn workflow(&self) -> &AnalysisWorkflow {
        &self.workflow
    }

    pub fn result_path(&self) -> &Path {
        &self.result_path
    }

    /// Up to `batch_size` recent records, each with an annotation. Records
    /// stored without one get a rule-based annotation; records that cannot be
    /// annotated even that way are skipped. An empty or unreadable store
    /// yields the built-in sample records.
    pub fn load_transactions(&self) -> Vec<TransactionRecord> {
        let stored = match self.store.list_recent(self.batch_size) {
            Ok(records) => records,
            Err(e) => {
                warn!("failed to load transactions from {} store: {}", self.store.name(), e);
                Vec::new()
            }
        };

        let mut records = Vec::with_capacity(stored.len());
        for mut record in stored {
            if record.parsed_json.trim().is_empty() {
                match annotate_stored(&record) {
                    Ok(parsed) => record.parsed_json = parsed.to_json_string(),
                    Err(e) => {
                        warn!(hash = %record.hash, "skipping unparseable record: {}", e);
                        continue;
                    }
                }
            }
            records.push(record);
        }

        if records.is_empty() {
            info!("no stored transactions, using sample data");
            return sample_transactions();
        }
        info!(count = records.len(), "loaded transactions for analysis");
        records
    }

    /// Run every stage and write the result document.
    ///
    /// Stage failures are recorded in the document rather than returned;
    /// only a failure to write the artifact is an `Err`.
    pub async fn run_analysis(&self) -> Result<AnalysisResultDocument> {
        let started = Instant::now();
        let records = Arc::new(self.load_transactions());

        let mut doc = AnalysisResultDocument {
            position_analysis: None,
            signal_analysis: None,
            industry_analysis: None,
            advisor_analysis: None,
            error: None,
            metadata: AnalysisMetadata {
                workflow_version: self.workflow.version.clone(),
                run_id: Uuid::now_v7().to_string(),
                transaction_count: records.len(),
                analysis_timestamp: now_rfc3339(),
                ai_provider: self.annotator.provider().as_str().to_string(),
                status: PipelineStatus::Completed,
            },
        };

        info!(
            run_id = %doc.metadata.run_id,
            transactions = records.len(),
            provider = %doc.metadata.ai_provider,
            "starting analysis"
        );

        if let Err(e) = self.execute(records, &mut doc).await {
            error!(run_id = %doc.metadata.run_id, "analysis failed: {}", e);
            doc.metadata.status = PipelineStatus::Failed;
            doc.error = Some(e.to_string());
        }

        write_result(&self.result_path, &doc)?;
        info!(
            run_id = %doc.metadata.run_id,
            status = ?doc.metadata.status,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "analysis result written to {}",
            self.result_path.display()
        );
        Ok(doc)
    }

    async fn execute(
        &self,
        records: Arc<Vec<TransactionRecord>>,
        doc: &mut AnalysisResultDocument,
    ) -> Result<()> {
        let plan = ExecutionPlan::from_workflow(&self.workflow)?;
        let mut outputs: BTreeMap<Stage, AnnotationResult> = BTreeMap::new();

        for group in &plan.parallel_groups {
            let mut join_set = tokio::task::JoinSet::new();

            for &stage in group {
                let depends_on = self
                    .workflow
                    .agent(stage)
                    .map(|a| a.depends_on.clone())
                    .unwrap_or_default();
                let inputs: BTreeMap<Stage, AnnotationResult> = depends_on
                    .iter()
                    .filter_map(|dep| outputs.get(dep).map(|r| (*dep, r.clone())))
                    .collect();
                let annotator = Arc::clone(&self.annotator);
                let records = Arc::clone(&records);

                info!(stage = %stage, "running analysis stage");
                join_set.spawn(async move {
                    let result = if depends_on.is_empty() {
                        annotator.annotate(Payload::Batch(records.as_slice()), stage).await
                    } else {
                        annotator.annotate(Payload::StageOutputs(&inputs), stage).await
                    };
                    (stage, result)
                });
            }

            let mut first_error: Option<Error> = None;
            while let Some(joined) = join_set.join_next().await {
                match joined {
                    Ok((stage, Ok(result))) => {
                        if result.is_fallback() {
                            warn!(stage = %stage, "stage produced a default result");
                        }
                        doc.set_stage(stage, result.clone());
                        outputs.insert(stage, result);
                    }
                    Ok((stage, Err(e))) => {
                        error!(stage = %stage, "stage failed: {}", e);
                        if first_error.is_none() {
                            first_error = Some(Error::Stage {
                                stage: stage.to_string(),
                                message: e.to_string(),
                            });
                        }
                    }
                    Err(join_err) => {
                        error!("stage task failed: {}", join_err);
                        if first_error.is_none() {
                            first_error = Some(Error::Stage {
                                stage: "unknown".into(),
                                message: format!("task failed: {join_err}"),
                            });
                        }
                    }
                }
            }

            if let Some(e) = first_error {
                return Err(e);
            }
        }
        Ok(())
    }
}

fn annotate_stored(record: &TransactionRecord) -> Result<AnnotationResult> {
    let tx = serde_json::from_str::<Value>(&record.raw_json)
        .ok()
        .and_then(|raw| ExplorerTransaction::from_value(&raw).ok())
        .unwrap_or_else(|| ExplorerTransaction {
            hash: record.hash.clone(),
            from: record.from_addr.clone(),
            to: record.to_addr.clone(),
            value: record.value.clone(),
            time_stamp: record.time.to_string(),
            ..Default::default()
        });
    rules::parse_transaction(&tx)
}

fn write_result(path: &Path, doc: &AnalysisResultDocument) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
    serde_json::to_writer_pretty(&mut tmp, doc)?;
    tmp.write_all(b"\n")?;
    tmp.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

/// The last written analysis document, if any.
pub fn load_result(path: impl AsRef<Path>) -> Result<Option<Value>> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)?;
    Ok(Some(serde_json::from_str(&raw)?))
}

/// Two transfers used when the store holds nothing to analyze.
pub fn sample_transactions() -> Vec<TransactionRecord> {
    let samples = [
        (
            "0x1234567890abcdef1234567890abcdef12345678",
            "0xabcdef1234567890abcdef1234567890abcdef12",
            "0x9876543210fedcba9876543210fedcba98765432",
            "1500000000000000000",
            "1.5",
            1642234567_i64,
            "20000000000",
        ),
        (
            "0x2345678901bcdef1234567890abcdef1234567890",
            "0x9876543210fedcba9876543210fedcba98765432",
            "0x1234567890abcdef1234567890abcdef12345678",
            "500000000000000000",
            "0.5",
            1642234568_i64,
            "25000000000",
        ),
    ];

    samples
        .into_iter()
        .map(|(hash, from, to, value, ether, time, gas_price)| {
            let raw = serde_json::json!({
                "hash": hash,
                "from": from,
                "to": to,
                "value": value,
                "timeStamp": time.to_string(),
                "gas": "21000",
                "gasPrice": gas_price,
                "gasUsed": "21000",
            });
            let parsed = serde_json::json!({
                "action": "transfer",
                "token": "ETH",
                "amount": ether,
                "time": rfc3339(time).unwrap_or_else(|_| EPOCH_RFC3339.to_string()),
                "confidence": 0.95,
                "description": "EN: ETH transfer between addresses | CN: 以太坊地址间转账",
                "risk_level": "low",
                "gas_used": "21000",
                "gas_price": gas_price,
            });
            TransactionRecord {
                hash: hash.to_string(),
                from_addr: from.to_string(),
                to_addr: to.to_string(),
                value: value.to_string(),
                time,
                raw_json: raw.to_string(),
                parsed_json: parsed.to_string(),
            }
        })
        .collect()
}
