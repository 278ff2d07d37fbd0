use std::collections::BTreeMap;
use std::env;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use cardgen_contracts::config::ProviderConfig;
use cardgen_contracts::request::ImageSize;
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use reqwest::blocking::multipart::{Form as MultipartForm, Part as MultipartPart};
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};

const DEFAULT_OPENAI_API_BASE: &str = "https://api.openai.com/v1";

/// One call against the image service. A request carrying a reference image
/// is an edit; anything else is a plain generation.
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    pub model: String,
    pub prompt: String,
    pub n: u32,
    pub size: ImageSize,
    pub reference: Option<Vec<u8>>,
}

impl ProviderRequest {
    pub fn is_edit(&self) -> bool {
        self.reference.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ImageDatum {
    #[serde(default)]
    pub b64_json: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ProviderResponse {
    #[serde(default)]
    pub data: Vec<ImageDatum>,
    #[serde(default)]
    pub created: Option<i64>,
}

pub trait ImageProvider: Send + Sync {
    fn name(&self) -> &str;
    fn generate(&self, request: &ProviderRequest) -> Result<ProviderResponse>;
}

#[derive(Default)]
pub struct ImageProviderRegistry {
    providers: BTreeMap<String, Arc<dyn ImageProvider>>,
}

impl ImageProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<P: ImageProvider + 'static>(&mut self, provider: P) {
        self.providers
            .insert(provider.name().to_string(), Arc::new(provider));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ImageProvider>> {
        self.providers.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }
}

pub fn default_provider_registry(config: &ProviderConfig) -> Result<ImageProviderRegistry> {
    let mut providers = ImageProviderRegistry::new();
    providers.register(DryrunProvider);
    providers.register(OpenAiProvider::new(config)?);
    Ok(providers)
}

/// Looks up the provider named in the config.
pub fn build_provider(config: &ProviderConfig) -> Result<Arc<dyn ImageProvider>> {
    let registry = default_provider_registry(config)?;
    let name = config.name.trim().to_ascii_lowercase();
    match registry.get(&name) {
        Some(provider) => Ok(provider),
        None => bail!(
            "unknown image provider '{}' (available: {})",
            config.name,
            registry.names().join(", ")
        ),
    }
}

/// Offline provider: answers every call with solid-colour PNGs derived from
/// the prompt, encoded the same way the hosted service encodes its output.
pub struct DryrunProvider;

impl ImageProvider for DryrunProvider {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn generate(&self, request: &ProviderRequest) -> Result<ProviderResponse> {
        let (width, height) = request.size.dims();
        let mut data = Vec::new();
        for idx in 0..request.n.max(1) {
            let (r, g, b) = color_from_prompt(
                &request.prompt,
                request.reference.as_deref().unwrap_or_default(),
                idx,
            );
            let image = DynamicImage::ImageRgba8(RgbaImage::from_pixel(
                width,
                height,
                Rgba([r, g, b, 255]),
            ));
            let mut buffer = Cursor::new(Vec::new());
            image
                .write_to(&mut buffer, ImageFormat::Png)
                .context("dryrun image encode failed")?;
            data.push(ImageDatum {
                b64_json: Some(BASE64.encode(buffer.into_inner())),
            });
        }
        Ok(ProviderResponse {
            data,
            created: Some(unix_timestamp_secs()),
        })
    }
}

pub struct OpenAiProvider {
    api_base: String,
    http: HttpClient,
}

impl OpenAiProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let api_base = non_empty_env("OPENAI_API_BASE")
            .or_else(|| config.api_base.clone())
            .map(|value| value.trim().trim_end_matches('/').to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_OPENAI_API_BASE.to_string());
        let http = HttpClient::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .context("failed building OpenAI HTTP client")?;
        Ok(Self { api_base, http })
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    fn api_key() -> Option<String> {
        non_empty_env("OPENAI_API_KEY")
    }

    fn generate_images(&self, request: &ProviderRequest, api_key: &str) -> Result<ProviderResponse> {
        let endpoint = format!("{}/images/generations", self.api_base);
        let payload = generation_payload(request);
        let response = self
            .http
            .post(&endpoint)
            .bearer_auth(api_key)
            .json(&Value::Object(payload))
            .send()
            .with_context(|| format!("OpenAI request failed ({endpoint})"))?;
        let parsed = response_json_or_error("OpenAI", response)?;
        parse_images_response(parsed)
    }

    fn edit_images(&self, request: &ProviderRequest, api_key: &str) -> Result<ProviderResponse> {
        let endpoint = format!("{}/images/edits", self.api_base);
        let Some(reference) = request.reference.as_ref() else {
            bail!("OpenAI image edits require a reference image");
        };
        let mut form = MultipartForm::new();
        for (key, value) in edit_form_fields(request) {
            form = form.text(key, value);
        }
        let part = MultipartPart::bytes(reference.clone())
            .file_name("reference.png")
            .mime_str("image/png")
            .context("invalid mime 'image/png' for reference image")?;
        form = form.part("image", part);

        let response = self
            .http
            .post(&endpoint)
            .bearer_auth(api_key)
            .multipart(form)
            .send()
            .context("OpenAI edits request failed")?;
        let parsed = response_json_or_error("OpenAI edits", response)?;
        parse_images_response(parsed)
    }
}

impl ImageProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn generate(&self, request: &ProviderRequest) -> Result<ProviderResponse> {
        let Some(api_key) = Self::api_key() else {
            bail!("OPENAI_API_KEY not set");
        };
        if request.is_edit() {
            return self.edit_images(request, &api_key);
        }
        self.generate_images(request, &api_key)
    }
}

fn is_openai_gpt_image_model(model: &str) -> bool {
    model.trim().to_ascii_lowercase().starts_with("gpt-image")
}

fn generation_payload(request: &ProviderRequest) -> Map<String, Value> {
    let mut payload = map_object(json!({
        "model": request.model,
        "prompt": request.prompt,
        "n": request.n.max(1),
        "size": request.size.as_str(),
    }));
    // gpt-image models always answer with base64; older ones need asking.
    if !is_openai_gpt_image_model(&request.model) {
        payload.insert(
            "response_format".to_string(),
            Value::String("b64_json".to_string()),
        );
    }
    payload
}

fn edit_form_fields(request: &ProviderRequest) -> Vec<(&'static str, String)> {
    let mut fields = vec![
        ("model", request.model.clone()),
        ("prompt", request.prompt.clone()),
        ("n", request.n.max(1).to_string()),
        ("size", request.size.as_str().to_string()),
    ];
    if !is_openai_gpt_image_model(&request.model) {
        fields.push(("response_format", "b64_json".to_string()));
    }
    fields
}

fn parse_images_response(payload: Value) -> Result<ProviderResponse> {
    serde_json::from_value(payload).context("OpenAI returned an unexpected images payload")
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

/// Flattens an error chain into one line, skipping repeated messages.
pub fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts: Vec<String> = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        if parts
            .last()
            .map(|existing| existing == trimmed)
            .unwrap_or(false)
        {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    if parts.is_empty() {
        return truncate_text(&err.to_string(), max_chars);
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn color_from_prompt(prompt: &str, reference: &[u8], idx: u32) -> (u8, u8, u8) {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    hasher.update(reference);
    hasher.update(idx.to_be_bytes());
    let digest = hasher.finalize();
    (digest[0], digest[1], digest[2])
}

fn unix_timestamp_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|duration| duration.as_secs() as i64)
        .unwrap_or(0)
}

fn map_object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}
