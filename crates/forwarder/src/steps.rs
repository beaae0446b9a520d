//! Step-like output detection and naming (§4.6.5).

use serde_json::Value;
use std::collections::HashMap;

const INDICATORS: &[&str] = &[
    "step",
    "stage",
    "phase",
    "iteration",
    "round",
    "formatted_prompt",
    "initial_response",
    "extracted_info",
    "refined_analysis",
    "structured_content",
    "final_analysis",
    "validation_result",
    "first",
    "second",
    "third",
    "final",
    "last",
];

fn matches_indicator(key: &str) -> bool {
    let lower = key.to_lowercase();
    INDICATORS.iter().any(|ind| lower.contains(ind))
}

/// Whether `outputs` exhibits step-like structure per §4.6.5.
pub fn is_step_like(outputs: &HashMap<String, Value>) -> bool {
    if outputs.keys().any(|k| matches_indicator(k)) {
        return true;
    }
    outputs.len() >= 3 && outputs.keys().filter(|k| matches_indicator(k)).count() >= 2
}

/// Maps a well-known output key to a human label; unknown keys are
/// title-cased by splitting on underscores.
pub fn step_name(key: &str) -> String {
    match key.to_lowercase().as_str() {
        "formatted_prompt" => "Prompt Template".to_string(),
        "initial_response" => "Initial Response".to_string(),
        "extracted_info" => "Extracted Info".to_string(),
        "refined_analysis" => "Refined Analysis".to_string(),
        "structured_content" => "Structured Content".to_string(),
        "final_analysis" => "Final Analysis".to_string(),
        "validation_result" => "Validation".to_string(),
        _ => key
            .split('_')
            .filter(|part| !part.is_empty())
            .map(title_case_word)
            .collect::<Vec<_>>()
            .join(" "),
    }
}

fn title_case_word(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}
