//! Prompt text for each flow. Every prompt asks for a single JSON object so
//! replies can be parsed without guessing at prose.

use codesync_types::Language;

pub(crate) const SYSTEM: &str = "You are a coding assistant embedded in a collaborative \
editor. Reply with exactly one JSON object and nothing else.";

pub(crate) fn suggest(code_context: &str) -> String {
    format!(
        "Provide a concise, relevant code suggestion that fits seamlessly after the \
existing code.\n\n\
Current code:\n{code_context}\n\n\
Reply as {{\"suggestion\": \"<code>\"}}."
    )
}

pub(crate) fn execute(code: &str, language: Language) -> String {
    format!(
        "Act as a code execution engine. Analyze the {label} program step by step and \
predict exactly what it prints to standard output.\n\
- If it has syntax or runtime errors, the output is a descriptive error message.\n\
- If it prints nothing, say that there is no output.\n\n\
Code:\n```{language}\n{code}\n```\n\n\
Reply as {{\"output\": \"<predicted output>\"}}.",
        label = language.label(),
    )
}

pub(crate) fn debug(code: &str, language: Language, error_message: &str) -> String {
    format!(
        "Act as an expert debugger. Explain the error below and give a fixed version of \
the code.\n\n\
Language: {label}\n\
Error message:\n```\n{error_message}\n```\n\
Code:\n```{language}\n{code}\n```\n\n\
Reply as {{\"explanation\": \"<why it fails>\", \"suggestedFix\": \"<fixed code>\"}}.",
        label = language.label(),
    )
}

pub(crate) fn translate(source_code: &str, source: Language, target: Language) -> String {
    format!(
        "Translate the code from {source_label} to {target_label}. Keep the logic, make it \
syntactically correct and well formatted.\n\n\
Source code:\n```{source}\n{source_code}\n```\n\n\
Reply as {{\"translatedCode\": \"<{target} code without markdown fences>\"}}.",
        source_label = source.label(),
        target_label = target.label(),
    )
}
