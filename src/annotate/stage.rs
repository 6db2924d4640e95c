use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::{AnnotationResult, Payload};
use crate::explorer::EPOCH_RFC3339;
use crate::store::TransactionRecord;
use crate::{Error, Result};

/// A prompt template with its output schema and default result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    TransactionParse,
    Position,
    Signal,
    Industry,
    Advisor,
}

const TRANSACTION_FIELDS: &[(&str, &str)] = &[
    ("action", "one of \"transfer\", \"swap\", \"mint\", \"burn\", \"contract_interaction\", \"unknown\""),
    ("token", "token symbol or contract address, e.g. \"ETH\", \"USDC\", \"0x...\""),
    ("amount", "amount moved, as a string"),
    ("time", "ISO 8601 timestamp"),
    ("confidence", "number between 0 and 1"),
    ("description", "bilingual, formatted \"EN: English description | CN: 中文描述\""),
    ("risk_level", "one of \"low\", \"medium\", \"high\""),
    ("gas_used", "gas used, if available"),
    ("gas_price", "gas price, if available"),
];

const POSITION_FIELDS: &[(&str, &str)] = &[
    ("position_type", "one of \"conservative\", \"moderate\", \"aggressive\", \"mixed\""),
    ("total_volume", "total volume traded in ETH, as a string"),
    ("avg_transaction_size", "average transaction size in ETH, as a string"),
    ("holding_period", "one of \"short\", \"medium\", \"long\", \"mixed\""),
    ("diversification_score", "number between 0 and 1"),
    ("risk_tolerance", "one of \"low\", \"medium\", \"high\""),
    ("strategy_type", "one of \"hodl\", \"trading\", \"arbitrage\", \"defi\", \"mixed\""),
    ("confidence", "number between 0 and 1"),
    ("summary", "bilingual, formatted \"EN: ... | CN: ...\""),
];

const SIGNAL_FIELDS: &[(&str, &str)] = &[
    ("market_sentiment", "one of \"bullish\", \"bearish\", \"neutral\", \"volatile\""),
    ("trading_frequency", "one of \"low\", \"medium\", \"high\""),
    ("timing_quality", "number between 0 and 1"),
    ("volume_trend", "one of \"increasing\", \"decreasing\", \"stable\", \"irregular\""),
    ("price_sensitivity", "one of \"low\", \"medium\", \"high\""),
    ("signal_strength", "number between 0 and 1"),
    ("market_phase", "one of \"accumulation\", \"markup\", \"distribution\", \"markdown\""),
    ("confidence", "number between 0 and 1"),
    ("signals", "list of the specific signals identified"),
    ("summary", "bilingual, formatted \"EN: ... | CN: ...\""),
];

const INDUSTRY_FIELDS: &[(&str, &str)] = &[
    ("primary_sector", "one of \"DeFi\", \"NFT\", \"Gaming\", \"Infrastructure\", \"Payment\", \"Mixed\""),
    ("ecosystem", "one of \"Ethereum\", \"BSC\", \"Polygon\", \"Arbitrum\", \"Mixed\""),
    ("protocol_interaction", "one of \"DEX\", \"Lending\", \"Yield\", \"Staking\", \"Mixed\""),
    ("token_categories", "one of \"Native\", \"Stablecoin\", \"Utility\", \"Governance\", \"Mixed\""),
    ("industry_trend", "one of \"emerging\", \"mature\", \"declining\", \"stable\""),
    ("adoption_level", "number between 0 and 1"),
    ("innovation_score", "number between 0 and 1"),
    ("confidence", "number between 0 and 1"),
    ("summary", "bilingual, formatted \"EN: ... | CN: ...\""),
];

const ADVISOR_FIELDS: &[(&str, &str)] = &[
    ("overall_rating", "number between 0 and 10"),
    ("risk_assessment", "one of \"low\", \"medium\", \"high\""),
    ("recommendation", "one of \"buy\", \"hold\", \"sell\", \"wait\""),
    ("confidence_level", "number between 0 and 1"),
    ("key_strengths", "list of strengths"),
    ("key_risks", "list of risks"),
    ("suggested_actions", "list of suggested actions"),
    ("time_horizon", "one of \"short\", \"medium\", \"long\""),
    ("portfolio_allocation", "suggested allocation, e.g. \"60% ETH, 30% DeFi, 10% Cash\""),
    ("market_outlook", "short outlook, e.g. \"cautiously_optimistic\""),
    ("summary", "bilingual, formatted \"EN: ... | CN: ...\""),
];

impl Stage {
    /// The stages run by the analysis pipeline, in declaration order.
    pub const ANALYSIS: [Stage; 4] = [Stage::Position, Stage::Signal, Stage::Industry, Stage::Advisor];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::TransactionParse => "transaction_parse",
            Stage::Position => "position",
            Stage::Signal => "signal",
            Stage::Industry => "industry",
            Stage::Advisor => "advisor",
        }
    }

    /// Key under which the stage's result appears in the analysis document.
    pub fn result_key(&self) -> &'static str {
        match self {
            Stage::TransactionParse => "transaction_parse",
            Stage::Position => "position_analysis",
            Stage::Signal => "signal_analysis",
            Stage::Industry => "industry_analysis",
            Stage::Advisor => "advisor_analysis",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Stage::TransactionParse => "Transaction",
            Stage::Position => "Position",
            Stage::Signal => "Signal",
            Stage::Industry => "Industry",
            Stage::Advisor => "Advisory",
        }
    }

    pub fn temperature(&self) -> f64 {
        match self {
            Stage::TransactionParse => 0.1,
            _ => 0.3,
        }
    }

    pub fn max_tokens(&self) -> u32 {
        match self {
            Stage::TransactionParse => 1000,
            _ => 2000,
        }
    }

    fn fields(&self) -> &'static [(&'static str, &'static str)] {
        match self {
            Stage::TransactionParse => TRANSACTION_FIELDS,
            Stage::Position => POSITION_FIELDS,
            Stage::Signal => SIGNAL_FIELDS,
            Stage::Industry => INDUSTRY_FIELDS,
            Stage::Advisor => ADVISOR_FIELDS,
        }
    }

    /// Keys every result for this stage carries.
    pub fn required_fields(&self) -> impl Iterator<Item = &'static str> {
        self.fields().iter().map(|(name, _)| *name)
    }

    pub fn system_prompt(&self) -> &'static str {
        match self {
            Stage::TransactionParse => {
                "You are a blockchain transaction analyst. Classify Ethereum transactions. \
                 Reply with one strict JSON object and no other text."
            }
            Stage::Position => {
                "You are a crypto portfolio analyst. Assess a trader's positions and investment \
                 strategy. Reply with one strict JSON object and no other text."
            }
            Stage::Signal => {
                "You are a crypto market signal analyst. Identify market signals and trade timing \
                 in transaction histories. Reply with one strict JSON object and no other text."
            }
            Stage::Industry => {
                "You are a crypto industry analyst. Identify the sectors and ecosystems a wallet \
                 interacts with. Reply with one strict JSON object and no other text."
            }
            Stage::Advisor => {
                "You are a crypto investment advisor. Combine position, signal and industry \
                 analyses into one recommendation. Reply with one strict JSON object and no other text."
            }
        }
    }

    fn task(&self) -> &'static str {
        match self {
            Stage::TransactionParse => "Analyze this Ethereum transaction.",
            Stage::Position => {
                "Analyze these transactions and assess the trader's position pattern and strategy."
            }
            Stage::Signal => "Analyze these transactions and identify market signals and timing.",
            Stage::Industry => {
                "Analyze these transactions and identify the industries and ecosystems involved."
            }
            Stage::Advisor => "Give an overall investment recommendation based on these analyses.",
        }
    }

    /// Whether `payload` is the input shape this stage expects.
    pub fn accepts(&self, payload: &Payload<'_>) -> bool {
        matches!(
            (self, payload),
            (Stage::TransactionParse, Payload::Transaction(_))
                | (Stage::Position | Stage::Signal | Stage::Industry, Payload::Batch(_))
                | (Stage::Advisor, Payload::StageOutputs(_))
        )
    }

    /// User prompt with the payload embedded as pretty-printed JSON.
    pub fn render_prompt(&self, payload: &Payload<'_>) -> Result<String> {
        if !self.accepts(payload) {
            return Err(Error::Stage {
                stage: self.as_str().into(),
                message: format!("cannot annotate a {} payload", payload.kind()),
            });
        }

        let mut prompt = String::new();
        prompt.push_str(self.task());
        prompt.push_str("\n\n");

        match payload {
            Payload::Transaction(tx) => {
                prompt.push_str("Transaction:\n");
                prompt.push_str(&serde_json::to_string_pretty(&tx.prompt_view())?);
            }
            Payload::Batch(records) => {
                let views: Vec<Value> = records.iter().map(record_view).collect();
                prompt.push_str("Transactions:\n");
                prompt.push_str(&serde_json::to_string_pretty(&views)?);
            }
            Payload::StageOutputs(outputs) => {
                for (stage, result) in outputs.iter() {
                    prompt.push_str(&format!("{} analysis:\n", stage.label()));
                    prompt.push_str(&serde_json::to_string_pretty(result)?);
                    prompt.push_str("\n\n");
                }
            }
        }

        prompt.push_str("\n\nReturn a JSON object with these fields:\n");
        for (name, desc) in self.fields() {
            prompt.push_str(&format!("- {name}: {desc}\n"));
        }
        Ok(prompt)
    }

    /// The result used when this stage cannot produce a model answer.
    pub fn default_result(&self, payload: &Payload<'_>, error: &str) -> AnnotationResult {
        let summary = format!(
            "EN: {} analysis failed: {error} | CN: 分析失败: {error}",
            self.label()
        );
        let fields = match self {
            Stage::TransactionParse => {
                let tx = match payload {
                    Payload::Transaction(tx) => Some(*tx),
                    _ => None,
                };
                json!({
                    "action": "unknown",
                    "token": "ETH",
                    "amount": tx.map(|t| t.value.as_str()).unwrap_or("0"),
                    "time": tx.map(|t| t.iso_time()).unwrap_or_else(|| EPOCH_RFC3339.to_string()),
                    "confidence": 0.0,
                    "description": summary,
                    "risk_level": "high",
                    "gas_used": tx.map(|t| t.gas_used.as_str()).unwrap_or("0"),
                    "gas_price": tx.map(|t| t.gas_price.as_str()).unwrap_or("0"),
                })
            }
            Stage::Position => json!({
                "position_type": "unknown",
                "total_volume": "0",
                "avg_transaction_size": "0",
                "holding_period": "unknown",
                "diversification_score": 0.0,
                "risk_tolerance": "unknown",
                "strategy_type": "unknown",
                "confidence": 0.0,
                "summary": summary,
            }),
            Stage::Signal => json!({
                "market_sentiment": "neutral",
                "trading_frequency": "unknown",
                "timing_quality": 0.0,
                "volume_trend": "unknown",
                "price_sensitivity": "unknown",
                "signal_strength": 0.0,
                "market_phase": "unknown",
                "confidence": 0.0,
                "signals": [],
                "summary": summary,
            }),
            Stage::Industry => json!({
                "primary_sector": "unknown",
                "ecosystem": "unknown",
                "protocol_interaction": "unknown",
                "token_categories": "unknown",
                "industry_trend": "unknown",
                "adoption_level": 0.0,
                "innovation_score": 0.0,
                "confidence": 0.0,
                "summary": summary,
            }),
            Stage::Advisor => json!({
                "overall_rating": 5.0,
                "risk_assessment": "medium",
                "recommendation": "hold",
                "confidence_level": 0.0,
                "key_strengths": [],
                "key_risks": ["analysis_failed"],
                "suggested_actions": ["retry_analysis"],
                "time_horizon": "unknown",
                "portfolio_allocation": "unknown",
                "market_outlook": "unknown",
                "summary": summary,
            }),
        };

        let mut map = match fields {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        map.insert("error".into(), Value::String(error.to_string()));
        AnnotationResult::new(map)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn record_view(record: &TransactionRecord) -> Value {
    let parsed = serde_json::from_str::<Value>(&record.parsed_json).unwrap_or(Value::Null);
    json!({
        "hash": record.hash,
        "from": record.from_addr,
        "to": record.to_addr,
        "value": record.value,
        "time": record.time,
        "parsed": parsed,
    })
}
