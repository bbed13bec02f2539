//! Prompt templates for the search and format stages.
//!
//! Both builders are pure: the same inputs always produce the same prompt.
//! Slot values are inserted verbatim in a single pass, so text inside a
//! value is never treated as another slot.

use std::borrow::Cow;
use std::sync::OnceLock;

use regex::{Captures, Regex};

/// Instruction text sent to the search-augmented model ahead of the question.
pub const SEARCH_INSTRUCTIONS: &str = "\
Search the web for current technical information about automotive diagnostics.
Find detailed troubleshooting information, causes, solutions, and technical specifications.
Include sources and provide comprehensive technical data that will help diagnose automotive issues.";

/// Template for the format stage. Slots: `{question}`, `{searchResult}`.
pub const FORMAT_TEMPLATE: &str = "\
You are KDijagnostika Support - professional automotive diagnostic technician.

Transform the web search results below into a structured diagnostic response:

**Format required:**
- **Diagnosis**: What's likely happening (1-2 lines)
- **Likely causes**: Top 3-4 causes ranked by probability
- **Quick checks**: Step-by-step troubleshooting actions
- **If still stuck**: Next recommended steps
- **Our solution**: When relevant, mention our tested Delphi/Autocom interfaces

Use professional tone, be specific with technical details, make it actionable for technicians.

---
ORIGINAL QUESTION: {question}
---
WEB SEARCH DATA: {searchResult}
---
";

/// Slot name for the user's question.
pub const QUESTION_SLOT: &str = "question";
/// Slot name for the search stage output.
pub const SEARCH_RESULT_SLOT: &str = "searchResult";

fn slot_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        // Literal pattern, always compiles.
        Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("slot pattern is valid")
    })
}

/// Fill `{name}` slots in `template` with the matching value.
///
/// Slots without a value are left untouched.
pub fn render<'a>(template: &'a str, slots: &[(&str, &str)]) -> Cow<'a, str> {
    slot_pattern().replace_all(template, |caps: &Captures<'_>| {
        let name = &caps[1];
        slots
            .iter()
            .find(|(slot, _)| *slot == name)
            .map(|(_, value)| (*value).to_string())
            .unwrap_or_else(|| caps[0].to_string())
    })
}

/// Build the prompt for the search-augmented model.
pub fn search_prompt(question: &str) -> String {
    format!("{}\n\nUser question: {}", SEARCH_INSTRUCTIONS, question)
}

/// Build the prompt for the format model.
pub fn format_prompt(question: &str, search_result: &str) -> String {
    render(
        FORMAT_TEMPLATE,
        &[(QUESTION_SLOT, question), (SEARCH_RESULT_SLOT, search_result)],
    )
    .into_owned()
}
