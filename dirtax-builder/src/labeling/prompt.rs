//! Completion prompts

use crate::models::{Axis, TopicCandidate};

pub const SYSTEM_PROMPT: &str = "You are a precise taxonomy analyst. Return valid JSON only.";

/// Examples quoted in a label prompt
pub const PROMPT_EXAMPLES: usize = 12;

/// Extra rules appended on retry attempts; stricter as attempts increase.
pub fn retry_suffix(attempt: u32, keys: &[&str]) -> String {
    if attempt == 0 {
        return String::new();
    }
    let mut suffix = String::from(
        "\n\nIMPORTANT RETRY RULES:\n\
         - Output must be a single valid JSON object.\n\
         - No markdown fences, no comments, no trailing text.\n\
         - Ensure all quotes/commas/brackets are valid JSON.",
    );
    if attempt >= 2 && !keys.is_empty() {
        let quoted: Vec<String> = keys.iter().map(|k| format!("\"{}\"", k)).collect();
        suffix.push_str(&format!(
            "\n- Use exactly these top-level keys: {}.",
            quoted.join(", ")
        ));
    }
    suffix
}

pub const LABEL_KEYS: &[&str] = &["l2_name", "definition", "aliases"];

pub fn build_label_prompt(axis: Axis, candidate: &TopicCandidate) -> String {
    let keywords = if candidate.keywords.is_empty() {
        "none".to_string()
    } else {
        candidate.keywords.join(", ")
    };
    let examples: Vec<&str> = candidate
        .examples
        .iter()
        .take(PROMPT_EXAMPLES)
        .map(String::as_str)
        .collect();

    format!(
        "Axis: {axis}\n\
         Topic id: {topic_id}\n\
         Top keywords: {keywords}\n\
         Example directions:\n- {examples}\n\n\
         Return strict JSON:\n\
         {{\n  \"l2_name\": string,\n  \"definition\": string,\n  \"aliases\": string[]\n}}\n\n\
         Rules:\n\
         - l2_name should be short, stable, and canonical.\n\
         - definition should be one sentence.\n\
         - aliases can include paraphrases, abbreviations, and close variants.\n\
         - Do not output markdown.",
        axis = axis,
        topic_id = candidate.topic_id,
        keywords = keywords,
        examples = examples.join("\n- "),
    )
}
