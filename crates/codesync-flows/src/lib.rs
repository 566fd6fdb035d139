//! Assistant flows for the CodeSync editor.
//!
//! The editor offers four assistant actions on the shared document: suggest a
//! continuation, predict what the code prints, explain an error with a fix,
//! and translate to another language. [`AssistFlows`] is the seam the editor
//! depends on; [`PromptFlows`] implements it by rendering a prompt per flow
//! and parsing the JSON reply of an [`LlmProvider`].

pub mod flows;
pub mod llm;
mod prompts;

pub use flows::{
    AssistFlows, DebugAnalysis, ExecutionOutput, FlowError, PromptFlows, Suggestion, Translation,
    strip_code_fence,
};
pub use llm::{
    CompletionRequest, CompletionResponse, LlmError, LlmProvider, LlmResult, Message, Role, Usage,
};

/// Whether execution output looks like an error (case-insensitive "error").
///
/// The editor offers the debug flow for such output.
pub fn looks_like_error(output: &str) -> bool {
    output.to_ascii_lowercase().contains("error")
}
