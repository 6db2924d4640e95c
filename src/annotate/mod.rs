//! LLM annotation of transactions and transaction batches.
//!
//! An annotation is a JSON object whose shape depends on the [`Stage`]:
//! `transaction_parse` classifies one transaction, the three analysis stages
//! summarize a batch, and `advisor` combines the outputs of the other three.
//!
//! Model replies cross a trust boundary in [`parse_object`]. Anything that is
//! not a single JSON object is a [`ParseError`], and the [`Annotator`] turns
//! that (and any transport failure) into the stage's default result.

mod annotator;
mod parse;
pub mod rules;
mod stage;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::explorer::ExplorerTransaction;
use crate::store::TransactionRecord;

pub use annotator::Annotator;
pub use parse::{parse_object, ParseError};
pub use stage::Stage;

/// Input to one annotation call.
#[derive(Debug, Clone, Copy)]
pub enum Payload<'a> {
    /// A single upstream transaction (`transaction_parse`).
    Transaction(&'a ExplorerTransaction),
    /// Stored records (`position`, `signal`, `industry`).
    Batch(&'a [TransactionRecord]),
    /// Results of earlier stages in the same run (`advisor`).
    StageOutputs(&'a BTreeMap<Stage, AnnotationResult>),
}

impl Payload<'_> {
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::Transaction(_) => "transaction",
            Payload::Batch(_) => "batch",
            Payload::StageOutputs(_) => "stage outputs",
        }
    }
}

/// A stage's JSON result. Required keys are always present; a fallback
/// additionally carries an `error` string.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnnotationResult(Map<String, Value>);

impl AnnotationResult {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn error(&self) -> Option<&str> {
        self.get_str("error")
    }

    /// Whether this is a stage default rather than a model answer.
    pub fn is_fallback(&self) -> bool {
        self.error().is_some()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    /// Compact JSON, as stored in `parsed_json`.
    pub fn to_json_string(&self) -> String {
        // A map of JSON values always serializes.
        serde_json::to_string(&self.0).unwrap_or_else(|_| "{}".to_string())
    }
}

impl From<Map<String, Value>> for AnnotationResult {
    fn from(fields: Map<String, Value>) -> Self {
        Self(fields)
    }
}
