mod directive;
mod edit_intent;
mod vocabulary;

pub use directive::{display_text, extract_directive, Directive, SCENE_SUMMARY_PLACEHOLDER};
pub use edit_intent::{EditIntentClassifier, KeywordEditClassifier};
pub use vocabulary::{EditPreset, Marker, EDIT_INTENT_KEYWORDS};
