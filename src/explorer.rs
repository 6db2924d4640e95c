//! Block explorer client.
//!
//! Talks to an Etherscan-compatible `module=account&action=txlist` endpoint.
//! The explorer answers every request with an envelope
//! `{status, message, result}`; only `status == "1"` carries transactions.

use std::fmt::Write as _;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::ExplorerConfig;
use crate::{Error, Result};

/// Longest `input` prefix kept when a transaction is shown to a model.
const PROMPT_INPUT_CHARS: usize = 200;

/// Last second RFC 3339 can express, `9999-12-31T23:59:59Z`.
pub const MAX_TIMESTAMP: i64 = 253_402_300_799;

pub const EPOCH_RFC3339: &str = "1970-01-01T00:00:00Z";

/// One transaction as returned by the explorer. All fields are strings
/// upstream; missing fields default to empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExplorerTransaction {
    #[serde(default)]
    pub hash: String,
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub to: String,
    #[serde(default)]
    pub value: String,
    #[serde(default, rename = "timeStamp")]
    pub time_stamp: String,
    #[serde(default)]
    pub gas: String,
    #[serde(default, rename = "gasPrice")]
    pub gas_price: String,
    #[serde(default, rename = "gasUsed")]
    pub gas_used: String,
    #[serde(default, rename = "isError")]
    pub is_error: String,
    #[serde(default, rename = "methodId")]
    pub method_id: String,
    #[serde(default, rename = "functionName")]
    pub function_name: String,
    #[serde(default, rename = "contractAddress")]
    pub contract_address: String,
    #[serde(default)]
    pub input: String,
}

impl ExplorerTransaction {
    pub fn from_value(raw: &Value) -> Result<Self> {
        let hash = raw
            .get("hash")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        serde_json::from_value(raw.clone()).map_err(|e| Error::Item {
            hash,
            message: format!("unexpected transaction shape: {e}"),
        })
    }

    /// Unix seconds. An empty field counts as zero; anything outside
    /// `0..=MAX_TIMESTAMP` is rejected.
    pub fn timestamp(&self) -> Result<i64> {
        let ts = self.time_stamp.trim();
        if ts.is_empty() {
            return Ok(0);
        }
        let secs = ts.parse::<i64>().map_err(|e| Error::Item {
            hash: self.hash.clone(),
            message: format!("invalid timeStamp '{ts}': {e}"),
        })?;
        if !(0..=MAX_TIMESTAMP).contains(&secs) {
            return Err(Error::Item {
                hash: self.hash.clone(),
                message: format!("timeStamp {secs} is out of range"),
            });
        }
        Ok(secs)
    }

    /// RFC 3339 rendering of `timeStamp`, or the epoch when it is unusable.
    pub fn iso_time(&self) -> String {
        self.timestamp()
            .and_then(rfc3339)
            .unwrap_or_else(|_| EPOCH_RFC3339.to_string())
    }

    pub fn is_contract_creation(&self) -> bool {
        !self.contract_address.trim().is_empty()
    }

    /// The subset of fields shown to a model, with `input` truncated.
    pub fn prompt_view(&self) -> Value {
        let input: String = self.input.chars().take(PROMPT_INPUT_CHARS).collect();
        serde_json::json!({
            "hash": self.hash,
            "from": self.from,
            "to": self.to,
            "value": self.value,
            "timeStamp": self.time_stamp,
            "gas": self.gas,
            "gasPrice": self.gas_price,
            "gasUsed": self.gas_used,
            "isError": self.is_error,
            "methodId": self.method_id,
            "functionName": self.function_name,
            "contractAddress": self.contract_address,
            "input": input,
        })
    }
}

/// Format Unix seconds as `YYYY-MM-DDTHH:MM:SSZ`.
pub fn rfc3339(secs: i64) -> Result<String> {
    if !(0..=MAX_TIMESTAMP).contains(&secs) {
        return Err(Error::Timestamp(secs));
    }
    let t = UNIX_EPOCH + Duration::from_secs(secs as u64);
    let mut out = String::with_capacity(EPOCH_RFC3339.len());
    write!(out, "{}", humantime::format_rfc3339_seconds(t)).map_err(|_| Error::Timestamp(secs))?;
    Ok(out)
}

pub fn now_rfc3339() -> String {
    humantime::format_rfc3339_seconds(SystemTime::now()).to_string()
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    status: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    result: Value,
}

pub struct ExplorerClient {
    http: reqwest::Client,
    base_url: String,
    api_key_env: String,
    api_key: Option<SecretString>,
}

impl ExplorerClient {
    pub fn new(config: &ExplorerConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("chainsight/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Config(format!("failed to build explorer client: {e}")))?;
        Ok(Self {
            http,
            base_url: config.base_url.clone(),
            api_key_env: config.api_key_env.clone(),
            api_key: config.key(),
        })
    }

    pub fn has_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Up to `limit` transactions for `address`, newest first, as the raw
    /// upstream objects.
    pub async fn fetch_transactions(&self, address: &str, limit: usize) -> Result<Vec<Value>> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| Error::Config(format!("{} is not set", self.api_key_env)))?;

        let offset = limit.to_string();
        let url = reqwest::Url::parse_with_params(
            &self.base_url,
            &[
                ("module", "account"),
                ("action", "txlist"),
                ("address", address),
                ("startblock", "0"),
                ("endblock", "99999999"),
                ("page", "1"),
                ("offset", offset.as_str()),
                ("sort", "desc"),
                ("apikey", api_key.expose_secret()),
            ],
        )
        .map_err(|e| Error::Config(format!("invalid explorer URL {}: {e}", self.base_url)))?;

        tracing::debug!(address, limit, "requesting explorer txlist");
        let resp = self.http.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Transport(format!("explorer returned HTTP {status}")));
        }
        let envelope: Envelope = resp
            .json()
            .await
            .map_err(|e| Error::Transport(format!("unreadable explorer response: {e}")))?;

        if envelope.status != "1" {
            let detail = match envelope.result.as_str() {
                Some(r) if !r.is_empty() => format!("{} ({})", envelope.message, r),
                _ if envelope.message.is_empty() => "unknown error".to_string(),
                _ => envelope.message,
            };
            return Err(Error::Upstream(detail));
        }

        match envelope.result {
            Value::Array(txs) => Ok(txs),
            other => Err(Error::Upstream(format!(
                "expected a transaction list, got {}",
                json_kind(&other)
            ))),
        }
    }
}

pub(crate) fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
