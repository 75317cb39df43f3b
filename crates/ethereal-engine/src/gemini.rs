use std::time::Duration;

use anyhow::{bail, Context, Result};
use ethereal_contracts::session::{ImageHandle, Message, Role};
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde_json::{json, Value};

use crate::credential::Credential;
use crate::prompts::{CHAT_FALLBACK_REPLY, SYSTEM_INSTRUCTION};
use crate::{truncate_text, EngineConfig, StudioBackend};

// Uploaded photos come from camera rolls; generated assets are PNG.
const REFERENCE_MIME: &str = "image/jpeg";
const ASSET_MIME: &str = "image/png";

pub struct GeminiBackend {
    config: EngineConfig,
    http: HttpClient,
}

impl GeminiBackend {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            http: HttpClient::new(),
        }
    }

    fn endpoint_for_model(&self, model: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!(
            "{}/{}:generateContent",
            self.config.api_base.trim_end_matches('/'),
            model_path
        )
    }

    fn chat_payload(&self, history: &[Message], new_images: &[ImageHandle]) -> Value {
        let mut contents: Vec<Value> = history
            .iter()
            .map(|message| {
                json!({
                    "role": wire_role(message.role),
                    "parts": [{ "text": message.content }],
                })
            })
            .collect();

        if let Some(last) = contents.last_mut() {
            if let Some(parts) = last.get_mut("parts").and_then(Value::as_array_mut) {
                for image in new_images {
                    parts.push(inline_part(image, REFERENCE_MIME));
                }
            }
        }

        json!({
            "contents": contents,
            "systemInstruction": {
                "parts": [{ "text": SYSTEM_INSTRUCTION }],
            },
            "generationConfig": {
                "temperature": self.config.temperature,
            },
        })
    }

    fn generate_payload(&self, prompt: &str, references: &[ImageHandle]) -> Value {
        let mut parts = vec![json!({ "text": prompt })];
        for reference in references {
            parts.push(inline_part(reference, REFERENCE_MIME));
        }
        json!({
            "contents": [{ "parts": parts }],
            "generationConfig": {
                "imageConfig": {
                    "aspectRatio": self.config.aspect_ratio,
                },
            },
        })
    }

    fn edit_payload(&self, base: &ImageHandle, instruction: &str) -> Value {
        json!({
            "contents": [{
                "parts": [
                    inline_part(base, ASSET_MIME),
                    { "text": instruction },
                ],
            }],
        })
    }

    fn post(&self, model: &str, credential: &Credential, payload: &Value) -> Result<Value> {
        let endpoint = self.endpoint_for_model(model);
        tracing::debug!(%endpoint, "gemini request");
        let response = self
            .http
            .post(&endpoint)
            .query(&[("key", credential.expose())])
            .timeout(Duration::from_secs_f64(self.config.request_timeout_s))
            .json(payload)
            .send()
            .with_context(|| format!("Gemini request failed ({endpoint})"))?;
        response_json_or_error("Gemini", response)
    }
}

impl StudioBackend for GeminiBackend {
    fn name(&self) -> &str {
        "gemini"
    }

    fn chat(
        &self,
        credential: &Credential,
        history: &[Message],
        new_images: &[ImageHandle],
    ) -> Result<String> {
        let payload = self.chat_payload(history, new_images);
        let response = self.post(&self.config.text_model, credential, &payload)?;
        let text = extract_reply_text(&response);
        if text.trim().is_empty() {
            return Ok(CHAT_FALLBACK_REPLY.to_string());
        }
        Ok(text)
    }

    fn generate_image(
        &self,
        credential: &Credential,
        prompt: &str,
        references: &[ImageHandle],
    ) -> Result<Option<ImageHandle>> {
        let payload = self.generate_payload(prompt, references);
        let response = self.post(&self.config.image_model, credential, &payload)?;
        Ok(extract_first_image(&response))
    }

    fn edit_image(
        &self,
        credential: &Credential,
        base: &ImageHandle,
        instruction: &str,
    ) -> Result<Option<ImageHandle>> {
        let payload = self.edit_payload(base, instruction);
        let response = self.post(&self.config.image_model, credential, &payload)?;
        Ok(extract_first_image(&response))
    }
}

fn wire_role(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "model",
    }
}

fn inline_part(image: &ImageHandle, mime_type: &str) -> Value {
    json!({
        "inlineData": {
            "mimeType": mime_type,
            "data": image.payload(),
        }
    })
}

fn first_candidate_parts(response: &Value) -> Vec<Value> {
    response
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|candidates| candidates.first())
        .and_then(|candidate| candidate.get("content"))
        .and_then(|content| content.get("parts"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

fn extract_reply_text(response: &Value) -> String {
    first_candidate_parts(response)
        .iter()
        .filter(|part| !part.get("thought").and_then(Value::as_bool).unwrap_or(false))
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect::<Vec<&str>>()
        .join("")
}

fn extract_first_image(response: &Value) -> Option<ImageHandle> {
    first_candidate_parts(response).iter().find_map(|part| {
        let inline = part
            .get("inlineData")
            .or_else(|| part.get("inline_data"))?;
        let data = inline.get("data").and_then(Value::as_str)?;
        if data.is_empty() {
            return None;
        }
        Some(ImageHandle::from_base64(ASSET_MIME, data))
    })
}

fn response_json_or_error(provider: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .with_context(|| format!("{provider} response body read failed"))?;
    if !status.is_success() {
        bail!(
            "{provider} request failed ({code}): {}",
            truncate_text(&body, 512)
        );
    }
    let parsed: Value = serde_json::from_str(&body)
        .with_context(|| format!("{provider} returned invalid JSON payload"))?;
    Ok(parsed)
}
