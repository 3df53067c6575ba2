use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use currency_assist_common::config::RecognitionConfig;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{Confidence, Detection, RecognitionService, ServiceError};

const PROMPT: &str = r#"You are an expert currency detection system optimized for low-quality images from a small wearable camera.
Analyze the image and return ONLY a JSON object (no markdown, no explanations):

{"currency": "<ISO 4217 code>", "denomination": <number>, "confidence": "high|medium|low"}

RULES:
- currency: ISO code of the banknote or coin in view, e.g. "INR", "USD", "EUR"
- denomination: face value as a number, e.g. 100
- If no banknote or coin is clearly visible, return {"currency": null, "denomination": null, "confidence": "low"}
- Return ONLY valid JSON, nothing else"#;

#[derive(Serialize)]
struct GeminiRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct GenerationConfig {
    temperature: f32,
    #[serde(rename = "responseMimeType")]
    response_mime_type: &'static str,
}

#[derive(Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum Part {
    Text { text: String },
    InlineData { inline_data: InlineData },
}

#[derive(Serialize)]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<ResponseContent>,
}

#[derive(Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: String,
}

/// The JSON object the model is asked to produce.
#[derive(Deserialize)]
struct NoteReply {
    currency: Option<String>,
    denomination: Option<serde_json::Value>,
    confidence: Option<String>,
}

/// Note recognition through Gemini `generateContent`.
pub struct GeminiService {
    client: reqwest::Client,
    url: String,
    api_key: String,
}

impl GeminiService {
    pub fn new(config: &RecognitionConfig, api_key: String) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ServiceError::Rejected(format!("failed to build HTTP client: {e}")))?;
        let url = format!(
            "{}/models/{}:generateContent",
            config.endpoint.trim_end_matches('/'),
            config.model.trim_start_matches("models/")
        );
        Ok(Self {
            client,
            url,
            api_key,
        })
    }

    fn build_request(jpeg: &[u8]) -> GeminiRequest {
        GeminiRequest {
            contents: vec![Content {
                parts: vec![
                    Part::InlineData {
                        inline_data: InlineData {
                            mime_type: "image/jpeg".to_string(),
                            data: general_purpose::STANDARD.encode(jpeg),
                        },
                    },
                    Part::Text {
                        text: PROMPT.to_string(),
                    },
                ],
            }],
            generation_config: GenerationConfig {
                temperature: 0.0,
                response_mime_type: "application/json",
            },
        }
    }
}

#[async_trait]
impl RecognitionService for GeminiService {
    async fn detect(&self, jpeg: &[u8]) -> Result<Detection, ServiceError> {
        let request = Self::build_request(jpeg);

        let response = self
            .client
            .post(&self.url)
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = format!("Gemini API error ({status}): {}", truncate(&body, 200));
            return Err(classify_status(status.as_u16(), message));
        }

        let gemini_response: GeminiResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::Transient(format!("failed to read Gemini response: {e}")))?;

        let text = gemini_response
            .candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .and_then(|c| c.parts.first())
            .map(|p| p.text.as_str())
            .unwrap_or_default();

        debug!(reply = truncate(text, 200), "Gemini reply");
        Ok(parse_detection(text))
    }

    fn name(&self) -> &str {
        "gemini"
    }
}

/// 5xx and request timeouts are worth another try; everything else the
/// service said no to (bad request, auth, quota) is not.
fn classify_status(status: u16, message: String) -> ServiceError {
    match status {
        408 | 500..=599 => ServiceError::Transient(message),
        _ => ServiceError::Rejected(message),
    }
}

fn classify_transport_error(e: reqwest::Error) -> ServiceError {
    if e.is_builder() {
        ServiceError::Rejected(format!("malformed request: {e}"))
    } else {
        ServiceError::Transient(format!("Gemini request failed: {e}"))
    }
}

/// Turn the model's text into a detection. Anything that does not name a
/// currency and a face value counts as "no note".
pub fn parse_detection(text: &str) -> Detection {
    let mut clean = text.trim();
    if clean.starts_with("```") {
        clean = clean.trim_matches('`').trim();
    }
    if let Some(rest) = clean
        .get(..4)
        .filter(|tag| tag.eq_ignore_ascii_case("json"))
        .and_then(|_| clean.get(4..))
    {
        clean = rest.trim();
    }

    let reply: NoteReply = match serde_json::from_str(clean) {
        Ok(r) => r,
        Err(e) => {
            if !clean.is_empty() {
                warn!(error = %e, reply = truncate(clean, 200), "unparseable model reply");
            }
            return Detection::NoNote;
        }
    };

    let currency = match reply.currency.as_deref().map(str::trim) {
        Some(c) if !is_placeholder(c) => c.to_string(),
        _ => return Detection::NoNote,
    };

    let denomination = match reply.denomination {
        Some(serde_json::Value::Number(n)) => n.as_f64(),
        Some(serde_json::Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    let Some(denomination) = denomination.filter(|d| d.is_finite() && *d > 0.0) else {
        return Detection::NoNote;
    };

    let confidence = reply
        .confidence
        .as_deref()
        .map(Confidence::from_label)
        .unwrap_or(Confidence::Low);

    Detection::Note {
        currency,
        denomination,
        confidence,
    }
}

fn is_placeholder(currency: &str) -> bool {
    currency.is_empty()
        || matches!(
            currency.to_ascii_lowercase().as_str(),
            "none" | "unknown" | "null" | "n/a"
        )
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
