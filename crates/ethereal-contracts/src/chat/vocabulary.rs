/// Section markers the consultant embeds in a reply once it has enough detail
/// to render a scene.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Marker {
    SceneSummary,
    VisualPrompt,
}

impl Marker {
    pub fn token(self) -> &'static str {
        match self {
            Marker::SceneSummary => "[SCENE_SUMMARY]",
            Marker::VisualPrompt => "[VISUAL_PROMPT]",
        }
    }

    /// Regex fragment matching the token case-insensitively with an optional
    /// trailing colon.
    pub(crate) fn pattern(self) -> String {
        format!("(?i:{}):?", regex::escape(self.token()))
    }
}

/// Lowercase fragments that flag a follow-up message as an edit of the latest
/// concept. Matched as substrings.
pub const EDIT_INTENT_KEYWORDS: &[&str] = &["filter", "change", "add", "remove"];

/// One-click edits offered next to every gallery image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EditPreset {
    Vintage,
    BlackAndWhite,
}

impl EditPreset {
    pub const ALL: [EditPreset; 2] = [EditPreset::Vintage, EditPreset::BlackAndWhite];

    pub fn command(self) -> &'static str {
        match self {
            EditPreset::Vintage => "vintage",
            EditPreset::BlackAndWhite => "bw",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            EditPreset::Vintage => "Vintage",
            EditPreset::BlackAndWhite => "B&W",
        }
    }

    pub fn instruction(self) -> &'static str {
        match self {
            EditPreset::Vintage => {
                "Apply a vintage film grain and a warmer, sepia-toned filter to this image."
            }
            EditPreset::BlackAndWhite => {
                "Convert this to a high-contrast black and white editorial photograph."
            }
        }
    }

    pub fn from_command(command: &str) -> Option<Self> {
        let normalized = command.trim().trim_start_matches('/').to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|preset| preset.command() == normalized)
    }
}
