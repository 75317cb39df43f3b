use super::vocabulary::EDIT_INTENT_KEYWORDS;

/// Decides whether a user message asks to modify the latest concept.
///
/// The dispatcher only consults this after it has established that at least
/// one image exists, so implementations only judge the text.
pub trait EditIntentClassifier: Send + Sync {
    fn is_edit_request(&self, text: &str) -> bool;
}

/// Substring match against a fixed keyword list.
///
/// Known to be loose: "address" contains "add" and a brand new scene request
/// that mentions "change" is read as an edit.
#[derive(Debug, Clone)]
pub struct KeywordEditClassifier {
    keywords: Vec<String>,
}

impl KeywordEditClassifier {
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut normalized: Vec<String> = Vec::new();
        for keyword in keywords {
            let value = keyword.as_ref().trim().to_lowercase();
            if !value.is_empty() && !normalized.contains(&value) {
                normalized.push(value);
            }
        }
        Self {
            keywords: normalized,
        }
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }
}

impl Default for KeywordEditClassifier {
    fn default() -> Self {
        Self::new(EDIT_INTENT_KEYWORDS.iter().copied())
    }
}

impl EditIntentClassifier for KeywordEditClassifier {
    fn is_edit_request(&self, text: &str) -> bool {
        let lowered = text.to_lowercase();
        self.keywords
            .iter()
            .any(|keyword| lowered.contains(keyword.as_str()))
    }
}
