//! Prompt construction for single-token multiple-choice answers.
//!
//! The instruction tells the model to reply with one digit per choice, so the
//! only valid next tokens are `"1"` through `"N"` and each answer can be
//! scored from a single next-token distribution.

use crate::dataset::AnnotationRecord;

/// Instruction used for the four-choice protocol, reproduced verbatim.
pub const FOUR_CHOICE_INSTRUCTION: &str = "The following question/proposition has 4 possible answers that are presented in numerical order. You must respond to the question with '1', '2', '3', or '4', where each number corresponds to its respective answer choice.";

/// Instruction for `n` choices. Identical to [`FOUR_CHOICE_INSTRUCTION`] when `n == 4`.
pub fn instruction(n: usize) -> String {
    let digits: Vec<String> = (1..=n).map(|i| format!("'{}'", i)).collect();
    let listed = match digits.as_slice() {
        [] => String::new(),
        [only] => only.clone(),
        [first, second] => format!("{} or {}", first, second),
        [init @ .., last] => format!("{}, or {}", init.join(", "), last),
    };

    format!(
        "The following question/proposition has {} possible answers that are presented in numerical order. You must respond to the question with {}, where each number corresponds to its respective answer choice.",
        n, listed
    )
}

/// Tokens the model may answer with, `"1"` for the first choice onwards.
pub fn candidate_tokens(n: usize) -> Vec<String> {
    (1..=n).map(|i| i.to_string()).collect()
}

/// Build the full prompt for a record.
///
/// Layout: instruction, blank line, question, then one `"{i}. {choice}"` line
/// per choice in record order.
pub fn build_prompt(record: &AnnotationRecord) -> String {
    render(record.question(), record.choices())
}

/// Build a prompt from raw parts.
pub fn render(question: &str, choices: &[String]) -> String {
    let mut prompt = instruction(choices.len());
    prompt.push_str("\n\n");
    prompt.push_str(question.trim());
    for (idx, choice) in choices.iter().enumerate() {
        prompt.push('\n');
        prompt.push_str(&format!("{}. {}", idx + 1, choice));
    }
    prompt
}
