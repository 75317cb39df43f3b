use std::sync::OnceLock;

use regex::Regex;

use super::vocabulary::Marker;

pub const SCENE_SUMMARY_PLACEHOLDER: &str = "Generating your visualization...";

/// Scene summary and render prompt pulled out of one assistant reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    pub scene_summary: String,
    pub visual_prompt: String,
}

struct Grammar {
    visual_prompt: Regex,
    scene_summary: Regex,
    summary_marker: Regex,
}

// `[VISUAL_PROMPT]` runs greedy to end of text from its first occurrence.
// `[SCENE_SUMMARY]` runs lazily up to the first `[VISUAL_PROMPT]` (or end).
fn grammar() -> &'static Grammar {
    static GRAMMAR: OnceLock<Grammar> = OnceLock::new();
    GRAMMAR.get_or_init(|| {
        let visual = Marker::VisualPrompt.pattern();
        let summary = Marker::SceneSummary.pattern();
        Grammar {
            visual_prompt: compile(&format!(r"(?s){visual}\s*(.*)")),
            scene_summary: compile(&format!(r"(?s){summary}\s*(.*?)(?:{visual}|$)")),
            summary_marker: compile(&summary),
        }
    })
}

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("marker grammar is a valid regex")
}

pub fn extract_directive(text: &str) -> Option<Directive> {
    let grammar = grammar();
    let visual_prompt = grammar
        .visual_prompt
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())?;
    let scene_summary = grammar
        .scene_summary
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_else(|| SCENE_SUMMARY_PLACEHOLDER.to_string());
    Some(Directive {
        scene_summary,
        visual_prompt,
    })
}

/// Reply text as it should be shown in the chat: the render prompt and the
/// summary marker are internal and get dropped.
pub fn display_text(text: &str) -> String {
    let grammar = grammar();
    let visible = match grammar.visual_prompt.find(text) {
        Some(found) => &text[..found.start()],
        None => text,
    };
    grammar
        .summary_marker
        .replace_all(visible, "")
        .trim()
        .to_string()
}
