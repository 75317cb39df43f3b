use std::io::Cursor;

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use ethereal_contracts::chat::{extract_directive, Marker};
use ethereal_contracts::session::{ImageHandle, Message, Role};
use image::{ImageFormat, Rgb, RgbImage};
use sha2::{Digest, Sha256};

use crate::credential::Credential;
use crate::StudioBackend;

// 3:4 portrait, like the hosted renders.
const DRYRUN_WIDTH: u32 = 48;
const DRYRUN_HEIGHT: u32 = 64;

const PILLAR_QUESTIONS: [&str; 3] = [
    "Thank you, you two look wonderful! Let's talk attire: what style of dress and suit are you imagining?",
    "Beautiful choice. Where should the shoot take place? A vineyard, a cliffside, a grand ballroom?",
    "Almost there. What mood or interaction would you like captured: playful, romantic, candid?",
];

/// Offline backend. Replies follow the consultant workflow from the
/// conversation shape and images are solid colours derived from the prompt.
#[derive(Debug, Clone, Default)]
pub struct DryrunBackend;

impl DryrunBackend {
    pub fn new() -> Self {
        Self
    }

    fn scripted_reply(history: &[Message], new_images: &[ImageHandle]) -> String {
        let upload_at = history
            .iter()
            .position(|message| message.role == Role::User && !message.images.is_empty());
        if upload_at.is_none() && new_images.is_empty() {
            return "Before we dream big, could you upload a few photos of the two of you? Clear faces and full-length shots work best.".to_string();
        }

        let already_rendered = history.iter().any(|message| {
            message.role == Role::Assistant && extract_directive(&message.content).is_some()
        });
        if already_rendered {
            return "Noted! I'm refining the latest concept for you.".to_string();
        }

        // Only answers given after the photos count towards the pillars.
        let details: Vec<&str> = history
            .iter()
            .skip(upload_at.map_or(history.len(), |index| index + 1))
            .filter(|message| message.role == Role::User && message.images.is_empty())
            .map(|message| message.content.trim())
            .filter(|text| !text.is_empty())
            .collect();
        if let Some(question) = PILLAR_QUESTIONS.get(details.len()) {
            return (*question).to_string();
        }

        format!(
            "Here is your scene!\n{} A celebration of {}.\n{} Editorial wedding photograph, {}, rim lighting, volumetric fog, 85mm f/1.8.",
            Marker::SceneSummary.token(),
            details.join("; "),
            Marker::VisualPrompt.token(),
            details.join(", "),
        )
    }

    fn render(seed_parts: &[&str]) -> Result<ImageHandle> {
        let mut hasher = Sha256::new();
        for part in seed_parts {
            hasher.update(part.as_bytes());
            hasher.update([0u8]);
        }
        let digest = hasher.finalize();
        let color = Rgb([digest[0], digest[1], digest[2]]);
        let image = RgbImage::from_pixel(DRYRUN_WIDTH, DRYRUN_HEIGHT, color);

        let mut bytes = Cursor::new(Vec::new());
        image
            .write_to(&mut bytes, ImageFormat::Png)
            .context("dryrun image encode failed")?;
        tracing::debug!(digest = %hex::encode(&digest[..4]), "dryrun image rendered");
        Ok(ImageHandle::from_base64(
            "image/png",
            &BASE64.encode(bytes.into_inner()),
        ))
    }
}

impl StudioBackend for DryrunBackend {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn chat(
        &self,
        _credential: &Credential,
        history: &[Message],
        new_images: &[ImageHandle],
    ) -> Result<String> {
        Ok(Self::scripted_reply(history, new_images))
    }

    fn generate_image(
        &self,
        _credential: &Credential,
        prompt: &str,
        references: &[ImageHandle],
    ) -> Result<Option<ImageHandle>> {
        let count = references.len().to_string();
        Self::render(&["generate", prompt, &count]).map(Some)
    }

    fn edit_image(
        &self,
        _credential: &Credential,
        base: &ImageHandle,
        instruction: &str,
    ) -> Result<Option<ImageHandle>> {
        Self::render(&["edit", base.payload(), instruction]).map(Some)
    }
}
