//! The four assistant flows and their prompt-driven implementation.
//!
//! | Flow        | Input                                  | Output                         |
//! |-------------|----------------------------------------|--------------------------------|
//! | `suggest`   | code context                           | [`Suggestion`]                 |
//! | `execute`   | code, language                         | [`ExecutionOutput`]            |
//! | `debug`     | code, language, error message          | [`DebugAnalysis`]              |
//! | `translate` | source code, source and target language| [`Translation`]                |
//!
//! Failures are surfaced as-is. Nothing here retries.

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use codesync_types::Language;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::llm::{CompletionRequest, LlmError, LlmProvider, Message};
use crate::prompts;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error("{flow} returned malformed output: {reason}")]
    MalformedOutput { flow: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suggestion {
    pub suggestion: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionOutput {
    pub output: String,
}

impl ExecutionOutput {
    /// Whether the predicted output reads like an error.
    pub fn is_error(&self) -> bool {
        crate::looks_like_error(&self.output)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugAnalysis {
    pub explanation: String,
    #[serde(alias = "suggestion")]
    pub suggested_fix: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Translation {
    pub translated_code: String,
}

/// The assistant operations available to an editing session.
#[async_trait]
pub trait AssistFlows: Send + Sync {
    async fn suggest(&self, code_context: &str) -> Result<Suggestion, FlowError>;

    async fn execute(&self, code: &str, language: Language) -> Result<ExecutionOutput, FlowError>;

    async fn debug(
        &self,
        code: &str,
        language: Language,
        error_message: &str,
    ) -> Result<DebugAnalysis, FlowError>;

    async fn translate(
        &self,
        source_code: &str,
        source: Language,
        target: Language,
    ) -> Result<Translation, FlowError>;
}

// ============================================================================
// Reply parsing
// ============================================================================

static JSON_OBJECT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\{.*\}").expect("valid regex"));

static CODE_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^\s*```[\w+#-]*[ \t]*\r?\n(.*?)\r?\n?```\s*$").expect("valid regex")
});

/// Decode the JSON object in a model reply, tolerating surrounding prose and
/// markdown fences.
pub(crate) fn parse_reply<T: DeserializeOwned>(flow: &'static str, reply: &str) -> Result<T, FlowError> {
    let malformed = |reason: String| FlowError::MalformedOutput { flow, reason };
    let object = JSON_OBJECT
        .find(reply)
        .ok_or_else(|| malformed("no JSON object in reply".into()))?;
    serde_json::from_str(object.as_str()).map_err(|e| malformed(e.to_string()))
}

/// Remove one enclosing markdown code fence, if present.
pub fn strip_code_fence(code: &str) -> &str {
    match CODE_FENCE.captures(code).and_then(|c| c.get(1)) {
        Some(inner) => inner.as_str(),
        None => code,
    }
}

// ============================================================================
// PromptFlows
// ============================================================================

/// [`AssistFlows`] over any [`LlmProvider`].
#[derive(Clone)]
pub struct PromptFlows {
    provider: Arc<dyn LlmProvider>,
    model: String,
    max_tokens: u32,
}

impl std::fmt::Debug for PromptFlows {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromptFlows")
            .field("provider", &self.provider.name())
            .field("model", &self.model)
            .finish()
    }
}

impl PromptFlows {
    pub fn new(provider: Arc<dyn LlmProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            max_tokens: 2048,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    async fn run<T: DeserializeOwned>(&self, flow: &'static str, prompt: String) -> Result<T, FlowError> {
        let request = CompletionRequest::new(&self.model, vec![Message::user(prompt)])
            .with_system(prompts::SYSTEM)
            .with_max_tokens(self.max_tokens)
            .with_temperature(0.0);
        let response = self.provider.complete(request).await?;
        debug!(
            flow,
            provider = self.provider.name(),
            tokens = response.usage.total(),
            "flow completed"
        );
        parse_reply(flow, &response.content)
    }
}

#[async_trait]
impl AssistFlows for PromptFlows {
    #[instrument(skip_all)]
    async fn suggest(&self, code_context: &str) -> Result<Suggestion, FlowError> {
        self.run("suggest", prompts::suggest(code_context)).await
    }

    #[instrument(skip(self, code))]
    async fn execute(&self, code: &str, language: Language) -> Result<ExecutionOutput, FlowError> {
        self.run("execute", prompts::execute(code, language)).await
    }

    #[instrument(skip(self, code, error_message))]
    async fn debug(
        &self,
        code: &str,
        language: Language,
        error_message: &str,
    ) -> Result<DebugAnalysis, FlowError> {
        self.run("debug", prompts::debug(code, language, error_message))
            .await
    }

    #[instrument(skip(self, source_code))]
    async fn translate(
        &self,
        source_code: &str,
        source: Language,
        target: Language,
    ) -> Result<Translation, FlowError> {
        let mut translation: Translation = self
            .run("translate", prompts::translate(source_code, source, target))
            .await?;
        translation.translated_code = strip_code_fence(&translation.translated_code).to_string();
        Ok(translation)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{CompletionResponse, LlmResult, Usage};
    use std::sync::Mutex;

    /// Replies with a fixed string and records the requests it saw.
    struct Scripted {
        reply: LlmResult<String>,
        seen: Mutex<Vec<CompletionRequest>>,
    }

    impl Scripted {
        fn replying(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Ok(reply.to_string()),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn failing(error: LlmError) -> Arc<Self> {
            Arc::new(Self {
                reply: Err(error),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl LlmProvider for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, request: CompletionRequest) -> LlmResult<CompletionResponse> {
            self.seen.lock().unwrap().push(request);
            let content = self.reply.clone()?;
            Ok(CompletionResponse {
                content,
                model: "test".into(),
                stop_reason: Some("end_turn".into()),
                usage: Usage::default(),
            })
        }
    }

    #[tokio::test]
    async fn test_suggest_parses_reply() {
        let provider = Scripted::replying(r#"{"suggestion": "console.log(x);"}"#);
        let flows = PromptFlows::new(provider.clone(), "m");

        let s = flows.suggest("let x = 1;").await.unwrap();
        assert_eq!(s.suggestion, "console.log(x);");

        let seen = provider.seen.lock().unwrap();
        assert_eq!(seen[0].model, "m");
        assert!(seen[0].messages[0].content.contains("let x = 1;"));
        assert_eq!(seen[0].system.as_deref(), Some(prompts::SYSTEM));
    }

    #[tokio::test]
    async fn test_execute_tolerates_fenced_json() {
        let reply = "Here you go:\n```json\n{\"output\": \"NameError: name 'y' is not defined\"}\n```";
        let flows = PromptFlows::new(Scripted::replying(reply), "m");

        let out = flows.execute("print(y)", Language::Python).await.unwrap();
        assert!(out.output.starts_with("NameError"));
        assert!(out.is_error());
    }

    #[tokio::test]
    async fn test_debug_accepts_either_fix_key() {
        let flows = PromptFlows::new(
            Scripted::replying(r#"{"explanation": "typo", "suggestion": "print(x)"}"#),
            "m",
        );
        let analysis = flows.debug("prnt(x)", Language::Python, "NameError").await.unwrap();
        assert_eq!(analysis.suggested_fix, "print(x)");

        let flows = PromptFlows::new(
            Scripted::replying(r#"{"explanation": "typo", "suggestedFix": "print(x)"}"#),
            "m",
        );
        let analysis = flows.debug("prnt(x)", Language::Python, "NameError").await.unwrap();
        assert_eq!(analysis.explanation, "typo");
    }

    #[tokio::test]
    async fn test_translate_strips_fences() {
        let flows = PromptFlows::new(
            Scripted::replying(r#"{"translatedCode": "```python\nprint(1)\n```"}"#),
            "m",
        );
        let t = flows
            .translate("console.log(1);", Language::Javascript, Language::Python)
            .await
            .unwrap();
        assert_eq!(t.translated_code, "print(1)");
    }

    #[tokio::test]
    async fn test_prose_reply_is_malformed() {
        let flows = PromptFlows::new(Scripted::replying("I cannot help with that."), "m");
        let err = flows.suggest("x").await.unwrap_err();
        assert!(matches!(err, FlowError::MalformedOutput { flow: "suggest", .. }));
    }

    #[tokio::test]
    async fn test_provider_error_surfaces_verbatim() {
        let flows = PromptFlows::new(
            Scripted::failing(LlmError::RateLimited("slow down".into())),
            "m",
        );
        let err = flows.execute("1", Language::Javascript).await.unwrap_err();
        assert!(matches!(err, FlowError::Llm(LlmError::RateLimited(ref m)) if m == "slow down"));
    }

    #[test]
    fn test_strip_code_fence_leaves_plain_code() {
        assert_eq!(strip_code_fence("print(1)"), "print(1)");
        assert_eq!(strip_code_fence("```cpp\nint x;\n```"), "int x;");
    }
}
