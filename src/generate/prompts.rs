// src/generate/prompts.rs
use super::ContentKind;

/// System + user message pair handed to a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

pub fn build(kind: ContentKind, text: &str, max_chars: usize, language: &str) -> Prompt {
    match kind {
        ContentKind::NewsItem => news_item(text, max_chars, language),
        ContentKind::ListingPolish => listing_polish(text, max_chars, language),
        ContentKind::FreeformListing => freeform_listing(text, max_chars, language),
        ContentKind::AdPolish => ad_polish(text, max_chars, language),
    }
}

fn news_item(text: &str, max_chars: usize, language: &str) -> Prompt {
    let system = format!(
        "You are an editor of a technology news channel. Write in {language}. \
         Output only the finished post text."
    );
    let user = format!(
        "Rewrite the news item below as a short channel post in {language}.\n\
         \n\
         Requirements:\n\
         - Keep all facts, names, companies and figures; do not invent anything\n\
         - One short headline line, then 1-2 compact paragraphs\n\
         - No links, hashtags or emoji\n\
         - At most {max_chars} characters, ending on a complete sentence\n\
         \n\
         Source:\n{text}"
    );
    Prompt { system, user }
}

fn listing_polish(text: &str, max_chars: usize, language: &str) -> Prompt {
    let system = format!(
        "You edit job vacancy posts. Write in {language}. Output only the final vacancy text."
    );
    let user = format!(
        "Turn the vacancy below into a professional, attractive post in {language}.\n\
         \n\
         Requirements:\n\
         - Clear structure: role, duties, requirements, conditions, contact\n\
         - Businesslike and friendly tone, no cliches\n\
         - Keep the contact details exactly as given\n\
         - No emoji or hashtags\n\
         - At most {max_chars} characters\n\
         \n\
         Vacancy:\n{text}"
    );
    Prompt { system, user }
}

fn freeform_listing(text: &str, max_chars: usize, language: &str) -> Prompt {
    let system = format!(
        "You structure job vacancies written in free form. Write in {language}. \
         Output only the structured text."
    );
    let user = format!(
        "Extract the vacancy below into labelled lines, in this order, in {language}:\n\
         🧑‍💻 Position, 🏢 Company, 📍 Location, 💰 Salary, 🧪 Experience, \
         📝 Description, ✅ Requirements, 🎁 Conditions, 📬 Contact\n\
         \n\
         Requirements:\n\
         - One line per field as \"<label>: <value>\"; omit fields with no data\n\
         - If the text contains an http(s) link, end with \"🔗 Link: <url>\"\n\
         - Do not invent details; keep the contact exactly as given\n\
         - No other comments or headings\n\
         - At most {max_chars} characters\n\
         \n\
         Vacancy:\n{text}"
    );
    Prompt { system, user }
}

fn ad_polish(text: &str, max_chars: usize, language: &str) -> Prompt {
    let system = format!(
        "You write advertisement posts for a technology channel. Write in {language}. \
         Output only the final post text."
    );
    let user = format!(
        "Turn the advertisement data below into a persuasive post in {language}.\n\
         \n\
         Requirements:\n\
         - A short catchy lead, then 2-3 paragraphs: what it is, the offer, a call to action\n\
         - Friendly, professional tone without heavy cliches\n\
         - Keep the link and the contact exactly as given\n\
         - No emoji or hashtags\n\
         - At most {max_chars} characters\n\
         \n\
         Advertisement:\n{text}"
    );
    Prompt { system, user }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn templates_carry_text_language_and_budget() {
        let p = build(ContentKind::NewsItem, "Baidu launched X", 700, "Russian");
        assert!(p.user.contains("Baidu launched X"));
        assert!(p.user.contains("700 characters"));
        assert!(p.system.contains("Russian"));

        let l = build(ContentKind::ListingPolish, "Position: Rust dev", 1200, "English");
        assert!(l.user.contains("Position: Rust dev"));
        assert!(l.user.contains("role, duties, requirements"));

        let f = build(ContentKind::FreeformListing, "Need a Go dev https://x.io/1", 900, "English");
        assert!(f.user.contains("https://x.io/1"));
        assert!(f.user.contains("🔗 Link"));

        let a = build(ContentKind::AdPolish, "Title: Rust course", 900, "English");
        assert!(a.user.contains("call to action"));
    }
}
