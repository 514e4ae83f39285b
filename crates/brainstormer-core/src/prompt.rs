//! Instruction text for one language-model pass.
//!
//! [`compose_instructions`] is a pure function of the phrase set and the
//! pass mode. Sampling randomness lives in the model call, not here.
//!
//! Every variant asks for one item per line with no bullets or numbering,
//! which is the framing contract [`crate::framer::TokenFramer`] relies on.

use crate::phrase::MatchMode;

const LINE_RULES: &[&str] = &[
    "Each item should be on its own line with NO prefix characters (no bullet points, no dashes)",
    "Do not number your list",
    "Separate items using ONLY line breaks",
];

/// Build the system instructions for a single model invocation.
///
/// - One phrase: scattershot brainstorm of at least 100 items for it.
/// - Several phrases, [`MatchMode::Or`]: each item relates to at least one phrase.
/// - Several phrases, [`MatchMode::And`]: each item relates to every phrase,
///   precision over volume.
pub fn compose_instructions(phrases: &[String], mode: MatchMode) -> String {
    match (phrases, mode) {
        ([], _) => single_phrase(""),
        ([only], _) => single_phrase(only),
        (many, MatchMode::Or) => any_phrase(many),
        (many, MatchMode::And) => all_phrases(many),
    }
}

fn quoted(phrases: &[String], joiner: &str) -> String {
    phrases
        .iter()
        .map(|p| format!("\"{}\"", p))
        .collect::<Vec<_>>()
        .join(joiner)
}

fn render(preamble: String, rules: &[String], goal: String) -> String {
    let mut out = preamble;
    out.push_str("\nInstructions:\n");
    for rule in rules.iter().map(String::as_str).chain(LINE_RULES.iter().copied()) {
        out.push_str("- ");
        out.push_str(rule);
        out.push('\n');
    }
    out.push('\n');
    out.push_str(&goal);
    out
}

fn single_phrase(phrase: &str) -> String {
    render(
        format!(
            "You are a Scattershot Brainstormer. Your job is to generate a diverse list of at least 100 keywords related to \"{}\".",
            phrase
        ),
        &[
            format!("Generate at least 100 words or phrases related to \"{}\"", phrase),
            "Include both single words and multi-word phrases, evenly mixed".to_string(),
            "The words should not be organized in any particular order".to_string(),
            "Ensure diversity across different fields: science, medicine, gaming, design, history, etc.".to_string(),
        ],
        format!(
            "The goal is to provide a wide range of potential connections to \"{}\" across different domains and contexts.",
            phrase
        ),
    )
}

fn any_phrase(phrases: &[String]) -> String {
    let list = quoted(phrases, ", ");
    render(
        format!(
            "You are a Scattershot Brainstormer. Your job is to generate a diverse list of at least 100 keywords related to ANY of these phrases: {}.",
            list
        ),
        &[
            format!(
                "Generate at least 100 words or phrases related to ONE OR MORE of these phrases: {}",
                list
            ),
            "Each suggestion should clearly relate to at least one of the phrases".to_string(),
            "Include both single words and multi-word phrases, evenly mixed".to_string(),
            "The words should not be organized in any particular order".to_string(),
            "Ensure diversity across different fields: science, medicine, gaming, design, history, etc.".to_string(),
        ],
        format!(
            "The goal is to provide a wide range of potential connections to any of these phrases: {}.",
            list
        ),
    )
}

fn all_phrases(phrases: &[String]) -> String {
    let list = quoted(phrases, " AND ");
    render(
        format!(
            "You are a Focused Brainstormer. Your job is to generate keywords that MUST be strongly related to ALL of the following concepts simultaneously: {}.",
            list
        ),
        &[
            format!(
                "Generate words or phrases that have a DIRECT and MEANINGFUL connection to EACH of these concepts: {}",
                list
            ),
            "Each suggestion MUST strongly relate to ALL concepts, not just one or some of them".to_string(),
            "Be extremely strict about this requirement - if a word only relates to one phrase but not others, DO NOT include it".to_string(),
            "Aim for quality over quantity - it's better to provide fewer results that truly connect all concepts".to_string(),
            "Prefer more specific terms that clearly demonstrate the intersection of all concepts".to_string(),
            "Include both single words and multi-word phrases".to_string(),
        ],
        "The goal is to find the TRUE intersection of these different concepts - words that genuinely relate to ALL of them simultaneously.".to_string(),
    )
}
