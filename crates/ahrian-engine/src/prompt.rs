/// Re-planning prompt after the user picked a clarification option.
///
/// Embeds the original request verbatim alongside the chosen value.
pub fn clarified_prompt(original: &str, chosen: &str) -> String {
    format!(
        "The user's original request was: \"{}\". I asked for clarification, and the user chose: \"{}\". Now, please generate the execution plan based on this clarified request.",
        original, chosen
    )
}
