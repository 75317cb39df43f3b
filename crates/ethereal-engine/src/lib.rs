use std::collections::BTreeMap;
use std::env;
use std::sync::Arc;

use anyhow::Result;
use ethereal_contracts::session::{ImageHandle, Message};

pub mod credential;
pub mod dispatch;
mod dryrun;
mod gemini;
pub mod prompts;
pub mod session;

pub use credential::{Credential, CredentialState, CredentialStore};
pub use dispatch::{plan_dispatch, DispatchPlan};
pub use dryrun::DryrunBackend;
pub use gemini::GeminiBackend;
pub use session::{ConsultantSession, ImageOutcome, SessionError, TurnOutcome};

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_TEXT_MODEL: &str = "gemini-3-flash-preview";
pub const DEFAULT_IMAGE_MODEL: &str = "gemini-2.5-flash-image";

/// Hosted chat and image service the consultant talks to.
///
/// Every call is attempted once. `Ok(None)` from the image calls means the
/// service answered without an image payload.
pub trait StudioBackend: Send + Sync {
    fn name(&self) -> &str;

    fn chat(
        &self,
        credential: &Credential,
        history: &[Message],
        new_images: &[ImageHandle],
    ) -> Result<String>;

    fn generate_image(
        &self,
        credential: &Credential,
        prompt: &str,
        references: &[ImageHandle],
    ) -> Result<Option<ImageHandle>>;

    fn edit_image(
        &self,
        credential: &Credential,
        base: &ImageHandle,
        instruction: &str,
    ) -> Result<Option<ImageHandle>>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub api_base: String,
    pub text_model: String,
    pub image_model: String,
    pub temperature: f64,
    pub aspect_ratio: String,
    pub request_timeout_s: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            text_model: DEFAULT_TEXT_MODEL.to_string(),
            image_model: DEFAULT_IMAGE_MODEL.to_string(),
            temperature: 0.7,
            aspect_ratio: "3:4".to_string(),
            request_timeout_s: 120.0,
        }
    }
}

impl EngineConfig {
    /// Defaults with `GEMINI_API_BASE` applied when set.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(base) = non_empty_env("GEMINI_API_BASE") {
            config.api_base = base.trim_end_matches('/').to_string();
        }
        config
    }

    pub fn with_text_model(mut self, model: Option<String>) -> Self {
        if let Some(model) = model.filter(|value| !value.trim().is_empty()) {
            self.text_model = model.trim().to_string();
        }
        self
    }

    pub fn with_image_model(mut self, model: Option<String>) -> Self {
        if let Some(model) = model.filter(|value| !value.trim().is_empty()) {
            self.image_model = model.trim().to_string();
        }
        self
    }
}

#[derive(Default)]
pub struct BackendRegistry {
    backends: BTreeMap<String, Arc<dyn StudioBackend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<B: StudioBackend + 'static>(&mut self, backend: B) {
        self.backends
            .insert(backend.name().to_string(), Arc::new(backend));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn StudioBackend>> {
        self.backends.get(name.trim()).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.backends.keys().cloned().collect()
    }
}

pub fn default_backend_registry(config: &EngineConfig) -> BackendRegistry {
    let mut backends = BackendRegistry::new();
    backends.register(DryrunBackend::new());
    backends.register(GeminiBackend::new(config.clone()));
    backends
}

pub(crate) fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
