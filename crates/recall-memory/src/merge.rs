//! Fact-merge prompt.
//!
//! When a new fact lands in the "similar" band of an existing one, the two
//! are merged into a single sentence by the [`TextGenerator`].  The new fact
//! wins on contradiction.
//!
//! [`TextGenerator`]: crate::collaborator::TextGenerator

/// Render the merge request for `old_fact` and `new_fact`.
///
/// Both facts are inserted verbatim; braces inside them are not expanded.
pub fn merge_prompt(old_fact: &str, new_fact: &str) -> String {
    format!(
        "Merge the following two facts into a single, concise sentence.\n\
         Old fact: {old_fact}\n\
         New fact: {new_fact}\n\
         \n\
         Rule: If there is a contradiction, the 'New fact' strictly overrides the 'Old fact'.\n\
         Output EXACTLY and ONLY the final merged sentence. Do not add any conversational \
         filler, explanations, or prefixes like 'Merged fact:'."
    )
}

/// Normalise a generator reply into the merged fact.
///
/// Trims whitespace, a leading `Merged fact:` label and wrapping quotes.
/// Returns `None` when nothing usable is left.
pub fn clean_merge_reply(reply: &str) -> Option<String> {
    let mut text = reply.trim();
    if let Some(prefix) = text.get(..12)
        && prefix.eq_ignore_ascii_case("merged fact:")
    {
        text = text[12..].trim_start();
    }
    for quote in ['"', '\'', '`'] {
        if text.len() >= 2 && text.starts_with(quote) && text.ends_with(quote) {
            text = text[1..text.len() - 1].trim();
        }
    }
    (!text.is_empty()).then(|| text.to_string())
}
