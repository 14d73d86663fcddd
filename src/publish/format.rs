// src/publish/format.rs
use crate::config::PLATFORM_MESSAGE_LIMIT;
use crate::generate::truncate_on_word;

/// Truncate to `max_len` characters, then HTML-escape. If escaping pushes the
/// message past the platform limit the plain budget shrinks until it fits.
pub fn render_text(text: &str, max_len: usize) -> String {
    let text = text.trim();
    let mut budget = max_len.min(PLATFORM_MESSAGE_LIMIT);
    loop {
        let cut = truncate_on_word(text, budget);
        let escaped = html_escape::encode_text(&cut).to_string();
        let n = escaped.chars().count();
        if n <= PLATFORM_MESSAGE_LIMIT || budget == 0 {
            return escaped;
        }
        budget = (budget * PLATFORM_MESSAGE_LIMIT / n).min(budget - 1);
    }
}
