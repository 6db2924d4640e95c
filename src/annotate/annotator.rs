use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use super::{parse_object, AnnotationResult, Payload, Stage};
use crate::config::Config;
use crate::llm::{ChatBackend, CompletionRequest, LlmProvider};
use crate::Result;

/// Runs stage prompts against one chat backend.
#[derive(Clone)]
pub struct Annotator {
    backend: Arc<dyn ChatBackend>,
    parse_timeout: Duration,
    analysis_timeout: Duration,
}

impl Annotator {
    pub fn new(backend: Arc<dyn ChatBackend>, config: &Config) -> Self {
        Self::with_timeouts(
            backend,
            Duration::from_secs(config.parse_timeout_secs),
            Duration::from_secs(config.analysis_timeout_secs),
        )
    }

    pub fn with_timeouts(
        backend: Arc<dyn ChatBackend>,
        parse_timeout: Duration,
        analysis_timeout: Duration,
    ) -> Self {
        Self {
            backend,
            parse_timeout,
            analysis_timeout,
        }
    }

    pub fn provider(&self) -> LlmProvider {
        self.backend.provider()
    }

    pub fn model(&self) -> &str {
        self.backend.model()
    }

    fn timeout_for(&self, stage: Stage) -> Duration {
        match stage {
            Stage::TransactionParse => self.parse_timeout,
            _ => self.analysis_timeout,
        }
    }

    /// Annotate `payload`, returning every failure to the caller.
    ///
    /// On success, required fields the model left out are filled from the
    /// stage default.
    pub async fn try_annotate(&self, payload: Payload<'_>, stage: Stage) -> Result<AnnotationResult> {
        let request = CompletionRequest {
            system: stage.system_prompt().to_string(),
            prompt: stage.render_prompt(&payload)?,
            temperature: stage.temperature(),
            max_tokens: stage.max_tokens(),
            timeout: self.timeout_for(stage),
        };

        debug!(stage = %stage, provider = self.provider().as_str(), "requesting annotation");
        let reply = self.backend.complete(&request).await?;
        let mut result = AnnotationResult::new(parse_object(&reply)?);

        let defaults = stage.default_result(&payload, "field missing from model reply");
        for (key, value) in defaults.as_map() {
            if key != "error" && !result.contains_key(key) {
                result.insert(key.clone(), value.clone());
            }
        }
        Ok(result)
    }

    /// Annotate `payload`, degrading to the stage default on transport or
    /// parse failures.
    ///
    /// Configuration errors, such as a missing API key, and payload mismatches
    /// are still returned.
    pub async fn annotate(&self, payload: Payload<'_>, stage: Stage) -> Result<AnnotationResult> {
        match self.try_annotate(payload, stage).await {
            Ok(result) => Ok(result),
            Err(e) if e.is_contained() => {
                warn!(stage = %stage, "annotation failed, using default result: {}", e);
                Ok(stage.default_result(&payload, &e.to_string()))
            }
            Err(e) => Err(e),
        }
    }
}

impl std::fmt::Debug for Annotator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Annotator")
            .field("provider", &self.provider())
            .field("model", &self.model())
            .field("parse_timeout", &self.parse_timeout)
            .field("analysis_timeout", &self.analysis_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::explorer::ExplorerTransaction;
    use crate::Error;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Backend that replays canned replies and records prompts.
    struct ScriptedBackend {
        reply: Mutex<Option<Result<String>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedBackend {
        fn new(reply: Result<String>) -> Arc<Self> {
            Arc::new(Self {
                reply: Mutex::new(Some(reply)),
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ChatBackend for ScriptedBackend {
        fn provider(&self) -> LlmProvider {
            LlmProvider::DeepSeek
        }

        fn model(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, request: &CompletionRequest) -> Result<String> {
            self.prompts.lock().unwrap().push(request.prompt.clone());
            self.reply
                .lock()
                .unwrap()
                .take()
                .unwrap_or_else(|| Err(Error::Transport("no more replies".into())))
        }
    }

    fn annotator(backend: Arc<ScriptedBackend>) -> Annotator {
        Annotator::with_timeouts(backend, Duration::from_secs(1), Duration::from_secs(1))
    }

    fn tx() -> ExplorerTransaction {
        ExplorerTransaction {
            hash: "0xabc".into(),
            value: "1000".into(),
            time_stamp: "1642234567".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_backfills_missing_fields() {
        let backend = ScriptedBackend::new(Ok(r#"{"action": "swap", "extra": 1}"#.into()));
        let tx = tx();
        let result = annotator(backend.clone())
            .try_annotate(Payload::Transaction(&tx), Stage::TransactionParse)
            .await
            .unwrap();

        assert_eq!(result.get_str("action"), Some("swap"));
        assert_eq!(result.get("extra"), Some(&serde_json::json!(1)));
        assert_eq!(result.get_str("token"), Some("ETH"));
        assert_eq!(result.get_str("time"), Some("2022-01-15T08:16:07Z"));
        assert!(!result.is_fallback());
        assert!(backend.prompts.lock().unwrap()[0].contains("0xabc"));
    }

    #[tokio::test]
    async fn test_malformed_reply_falls_back() {
        let backend = ScriptedBackend::new(Ok("I think this is a transfer.".into()));
        let tx = tx();
        let a = annotator(backend);

        let result = a
            .annotate(Payload::Transaction(&tx), Stage::TransactionParse)
            .await
            .unwrap();
        assert!(result.is_fallback());
        assert!(result.error().unwrap().contains("Malformed response"));
        assert_eq!(result.get_str("amount"), Some("1000"));
    }

    #[tokio::test]
    async fn test_try_annotate_surfaces_parse_error() {
        let backend = ScriptedBackend::new(Ok("[]".into()));
        let tx = tx();
        let err = annotator(backend)
            .try_annotate(Payload::Transaction(&tx), Stage::TransactionParse)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn test_config_error_propagates() {
        let backend = ScriptedBackend::new(Err(Error::Config("no key".into())));
        let err = annotator(backend)
            .annotate(Payload::Batch(&[]), Stage::Position)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn test_transport_error_falls_back() {
        let backend = ScriptedBackend::new(Err(Error::Transport("connection reset".into())));
        let result = annotator(backend)
            .annotate(Payload::Batch(&[]), Stage::Industry)
            .await
            .unwrap();
        assert_eq!(result.get_str("primary_sector"), Some("unknown"));
        assert!(result.error().unwrap().contains("connection reset"));
        assert!(result
            .get_str("summary")
            .unwrap()
            .starts_with("EN: Industry analysis failed"));
    }
}
