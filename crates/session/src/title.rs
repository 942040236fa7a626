/// Title shown for threads that have not been titled yet.
pub const DEFAULT_TITLE: &str = "New conversation";

/// Derive a thread title from the first user message.
///
/// Keeps the first `max_words` whitespace-separated words, then upper-cases
/// the first character and lower-cases the rest.
pub fn generate_title(text: &str, max_words: usize) -> String {
    let joined = text.split_whitespace().take(max_words).collect::<Vec<_>>().join(" ");
    let mut chars = joined.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => DEFAULT_TITLE.to_string(),
    }
}
