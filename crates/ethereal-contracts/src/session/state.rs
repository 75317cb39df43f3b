use serde::{Deserialize, Serialize};

use super::assets::AssetStore;
use super::message::{ImageHandle, Message};

pub const WELCOME_MESSAGE: &str = "Welcome to Ethereal Weddings. I'm your photography consultant. To begin visualizing your dream photoshoot, could you please upload a few photos of you and your partner? This helps me understand your unique features for the most accurate visualization.";

/// Coarse stage of the consultation.
///
/// `Preview` is sticky: once an image exists the session never leaves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Identity,
    Gathering,
    Preview,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Identity => "identity",
            Phase::Gathering => "gathering",
            Phase::Preview => "preview",
        }
    }
}

/// Whole conversation aggregate.
///
/// Every transition consumes the old value and returns the next one, so a
/// holder swaps in complete states and never exposes a half-applied update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationState {
    messages: Vec<Message>,
    reference_photos: Vec<ImageHandle>,
    assets: AssetStore,
    busy: bool,
    phase: Phase,
}

impl Default for ConversationState {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationState {
    pub fn new() -> Self {
        Self::empty().with_message(Message::assistant(WELCOME_MESSAGE))
    }

    /// State without the greeting.
    pub fn empty() -> Self {
        Self {
            messages: Vec::new(),
            reference_photos: Vec::new(),
            assets: AssetStore::new(),
            busy: false,
            phase: Phase::Identity,
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn reference_photos(&self) -> &[ImageHandle] {
        &self.reference_photos
    }

    pub fn assets(&self) -> &AssetStore {
        &self.assets
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    #[must_use]
    pub fn with_message(mut self, message: Message) -> Self {
        self.messages.push(message);
        self
    }

    #[must_use]
    pub fn with_photos(mut self, photos: impl IntoIterator<Item = ImageHandle>) -> Self {
        self.reference_photos.extend(photos);
        self
    }

    /// Upload step: photos and the user message that carries them land together.
    #[must_use]
    pub fn with_upload(self, message: Message) -> Self {
        let photos = message.images.clone();
        self.with_photos(photos).with_message(message)
    }

    /// Newest image goes to the front and the session enters `Preview`.
    #[must_use]
    pub fn with_generated(mut self, image: ImageHandle) -> Self {
        self.assets = self.assets.prepend(image);
        self.phase = Phase::Preview;
        self
    }

    /// Edits are prepended like any other asset; the phase is left alone.
    #[must_use]
    pub fn with_edited(mut self, image: ImageHandle) -> Self {
        self.assets = self.assets.prepend(image);
        self
    }

    #[must_use]
    pub fn with_busy(mut self, busy: bool) -> Self {
        self.busy = busy;
        self
    }

    /// Front-end driven phase change. `Preview` cannot be left.
    #[must_use]
    pub fn with_phase(mut self, phase: Phase) -> Self {
        if self.phase != Phase::Preview {
            self.phase = phase;
        }
        self
    }
}
