pub mod composite;
pub mod input;
pub mod session;
pub mod settings;

use std::collections::BTreeMap;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use photolab_contracts::credentials::CredentialSlot;
use photolab_contracts::errors::EnhanceError;
use photolab_contracts::images::EncodedImage;
use photolab_contracts::modes::AspectRatio;
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

pub use session::{LabSession, PendingEnhancement, COMPARISON_FILE_NAME, EXPORT_FILE_NAME};
pub use settings::LabSettings;

/// MIME type assigned to every image returned by a gateway.
pub const OUTPUT_MIME_TYPE: &str = "image/png";

const API_KEY_HEADER: &str = "x-goog-api-key";
const DRYRUN_LONGEST_SIDE: u32 = 64;

/// Fixed framing around the mode prompt, sent as the request's text part.
pub const INSTRUCTION_FRAME: &str = "Acting as a master photo restoration and digital artist expert. Task: {task}.
If restoration is requested: Remove scratches, tears, grain, and physical damage. Fill in missing parts realistically.
If resizing is requested: Re-compose the image to the new aspect ratio intelligently, extending the background or focusing on the main subject as needed.
Preserve the original character and essential features while maximizing definition and dynamic range.";

/// One external enhancement call: image + prompt + ratio in, image out.
///
/// Implementations make exactly one attempt per call and never touch
/// caller-owned state.
pub trait EnhancementGateway: Send + Sync {
    fn name(&self) -> &str;
    fn enhance(
        &self,
        image: &EncodedImage,
        prompt: &str,
        aspect_ratio: AspectRatio,
    ) -> Result<EncodedImage, EnhanceError>;
}

#[derive(Default)]
pub struct GatewayRegistry {
    gateways: BTreeMap<String, Arc<dyn EnhancementGateway>>,
}

impl GatewayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<G: EnhancementGateway + 'static>(&mut self, gateway: G) {
        self.gateways
            .insert(gateway.name().to_string(), Arc::new(gateway));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn EnhancementGateway>> {
        self.gateways.get(name.trim()).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.gateways.keys().cloned().collect()
    }
}

pub fn default_gateway_registry(
    settings: &LabSettings,
    credentials: Arc<CredentialSlot>,
) -> GatewayRegistry {
    let mut registry = GatewayRegistry::new();
    registry.register(DryrunGateway);
    registry.register(GeminiGateway::new(settings, credentials));
    registry
}

/// Offline gateway: answers with a solid PNG whose colour is derived from the
/// prompt and the input, sized to the requested ratio.
pub struct DryrunGateway;

impl EnhancementGateway for DryrunGateway {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn enhance(
        &self,
        image: &EncodedImage,
        prompt: &str,
        aspect_ratio: AspectRatio,
    ) -> Result<EncodedImage, EnhanceError> {
        let (width, height) = aspect_ratio.dimensions(DRYRUN_LONGEST_SIDE);
        let (r, g, b) = color_from_prompt(prompt, image.payload());
        let canvas = RgbImage::from_pixel(width, height, Rgb([r, g, b]));
        let bytes = encode_png(DynamicImage::ImageRgb8(canvas))
            .map_err(|err| EnhanceError::Transport(format!("dryrun encode failed: {err}")))?;
        EncodedImage::from_bytes(&bytes, OUTPUT_MIME_TYPE)
            .map_err(|err| EnhanceError::Transport(format!("dryrun output unusable: {err}")))
    }
}

pub struct GeminiGateway {
    api_base: String,
    model: String,
    timeout: Duration,
    credentials: Arc<CredentialSlot>,
    http: HttpClient,
}

impl GeminiGateway {
    pub fn new(settings: &LabSettings, credentials: Arc<CredentialSlot>) -> Self {
        Self::with_http_client(settings, credentials, HttpClient::new())
    }

    pub fn with_http_client(
        settings: &LabSettings,
        credentials: Arc<CredentialSlot>,
        http: HttpClient,
    ) -> Self {
        Self {
            api_base: settings.api_base.clone(),
            model: settings.model.clone(),
            timeout: settings.request_timeout(),
            credentials,
            http,
        }
    }

    pub fn endpoint(&self) -> String {
        let trimmed = self.model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }

    pub fn frame_instruction(prompt: &str) -> String {
        let task = prompt.trim().trim_end_matches('.');
        INSTRUCTION_FRAME.replace("{task}", task)
    }

    pub fn build_payload(image: &EncodedImage, prompt: &str, aspect_ratio: AspectRatio) -> Value {
        json!({
            "contents": [{
                "role": "user",
                "parts": [
                    {
                        "inlineData": {
                            "mimeType": image.mime_type(),
                            "data": image.payload(),
                        }
                    },
                    { "text": Self::frame_instruction(prompt) },
                ],
            }],
            "generationConfig": {
                "responseModalities": ["IMAGE"],
                "imageConfig": {
                    "aspectRatio": aspect_ratio.as_str(),
                },
            },
        })
    }

    /// Maps a status code and body to the first returned image or a typed
    /// failure.
    pub fn interpret_response(status: u16, body: &str) -> Result<EncodedImage, EnhanceError> {
        if !(200..300).contains(&status) {
            return Err(Self::classify_failure(status, body));
        }
        let payload: Value = serde_json::from_str(body).map_err(|err| {
            EnhanceError::Transport(format!("Gemini returned invalid JSON payload: {err}"))
        })?;
        match Self::extract_first_image(&payload)? {
            Some(bytes) => EncodedImage::from_bytes(&bytes, OUTPUT_MIME_TYPE).map_err(|err| {
                EnhanceError::Transport(format!("Gemini image is not usable: {err}"))
            }),
            None => Err(EnhanceError::EmptyResponse(Self::describe_missing_image(
                &payload,
            ))),
        }
    }

    fn classify_failure(status: u16, body: &str) -> EnhanceError {
        let parsed: Option<Value> = serde_json::from_str(body).ok();
        let error = parsed.as_ref().and_then(|value| value.get("error"));
        let api_status = error
            .and_then(|value| value.get("status"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_ascii_uppercase();
        let message = error
            .and_then(|value| value.get("message"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| truncate_text(body.trim(), 512));
        let detail = format!("Gemini request failed ({status}): {message}");
        let mentions_key = message.to_ascii_lowercase().contains("api key");

        if status == 401
            || api_status == "UNAUTHENTICATED"
            || (mentions_key && matches!(status, 400 | 403))
        {
            return EnhanceError::Authentication(detail);
        }
        if status == 429 || api_status == "RESOURCE_EXHAUSTED" {
            return EnhanceError::QuotaExceeded(detail);
        }
        if matches!(status, 403 | 404)
            || matches!(api_status.as_str(), "NOT_FOUND" | "PERMISSION_DENIED")
        {
            return EnhanceError::ModelUnavailable(detail);
        }
        EnhanceError::Transport(detail)
    }

    fn extract_first_image(payload: &Value) -> Result<Option<Vec<u8>>, EnhanceError> {
        let candidates = payload
            .get("candidates")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        for candidate in candidates {
            let parts = candidate
                .get("content")
                .and_then(|content| content.get("parts"))
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or_default();
            for part in parts {
                let data = part
                    .get("inlineData")
                    .or_else(|| part.get("inline_data"))
                    .and_then(|inline| inline.get("data"))
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                if data.is_empty() {
                    continue;
                }
                let bytes = BASE64.decode(data.as_bytes()).map_err(|err| {
                    EnhanceError::Transport(format!("Gemini image base64 decode failed: {err}"))
                })?;
                return Ok(Some(bytes));
            }
        }
        Ok(None)
    }

    fn describe_missing_image(payload: &Value) -> String {
        if let Some(reason) = payload
            .get("promptFeedback")
            .and_then(|feedback| feedback.get("blockReason"))
            .and_then(Value::as_str)
        {
            return format!("request blocked by the model ({reason})");
        }
        let texts: Vec<&str> = payload
            .get("candidates")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|candidate| candidate.get("content")?.get("parts")?.as_array())
            .flatten()
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .filter(|text| !text.trim().is_empty())
            .collect();
        if !texts.is_empty() {
            return format!(
                "Gemini returned text but no image part: {}",
                truncate_text(texts.join(" ").trim(), 200)
            );
        }
        if let Some(reason) = payload
            .get("candidates")
            .and_then(|candidates| candidates.get(0))
            .and_then(|candidate| candidate.get("finishReason"))
            .and_then(Value::as_str)
        {
            return format!("no image part (finish reason {reason})");
        }
        "No output generated from Gemini.".to_string()
    }

    fn transport_error_text(&self, endpoint: &str, err: &reqwest::Error) -> String {
        if err.is_timeout() {
            return format!(
                "Gemini request timed out after {:.0}s ({endpoint})",
                self.timeout.as_secs_f64()
            );
        }
        let mut parts = vec![format!("Gemini request failed ({endpoint})")];
        let mut source: Option<&dyn std::error::Error> = Some(err);
        while let Some(cause) = source {
            let text = cause.to_string();
            if !text.trim().is_empty() && parts.last() != Some(&text) {
                parts.push(text);
            }
            source = cause.source();
        }
        truncate_text(&parts.join(" | caused by: "), 400)
    }
}

impl EnhancementGateway for GeminiGateway {
    fn name(&self) -> &str {
        "gemini"
    }

    fn enhance(
        &self,
        image: &EncodedImage,
        prompt: &str,
        aspect_ratio: AspectRatio,
    ) -> Result<EncodedImage, EnhanceError> {
        let api_key = self.credentials.key_for_request()?;
        let endpoint = self.endpoint();
        let payload = Self::build_payload(image, prompt, aspect_ratio);

        let response = self
            .http
            .post(&endpoint)
            .header(API_KEY_HEADER, api_key.as_str())
            .timeout(self.timeout)
            .json(&payload)
            .send()
            .map_err(|err| EnhanceError::Transport(self.transport_error_text(&endpoint, &err)))?;
        let status = response.status().as_u16();
        let body = response.text().map_err(|err| {
            EnhanceError::Transport(format!("Gemini response body read failed: {err}"))
        })?;

        let outcome = Self::interpret_response(status, &body);
        match &outcome {
            Ok(_) => self.credentials.mark_verified(&api_key),
            Err(EnhanceError::Authentication(_)) => self.credentials.revoke(&api_key),
            Err(_) => {}
        }
        outcome
    }
}

/// Short stable identifier for an image, for logs.
pub fn image_fingerprint(image: &EncodedImage) -> String {
    let mut hasher = Sha256::new();
    hasher.update(image.payload().as_bytes());
    hex::encode(&hasher.finalize()[..6])
}

fn encode_png(image: DynamicImage) -> image::ImageResult<Vec<u8>> {
    let mut out = Vec::new();
    image.write_to(&mut Cursor::new(&mut out), ImageFormat::Png)?;
    Ok(out)
}

fn color_from_prompt(prompt: &str, salt: &str) -> (u8, u8, u8) {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    hasher.update(salt.as_bytes());
    let digest = hasher.finalize();
    (digest[0], digest[1], digest[2])
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
