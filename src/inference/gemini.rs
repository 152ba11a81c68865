//! Gemini API client for text completions and web-grounded answers.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use super::{Inference, InferenceError, SearchAnswer, Source};

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

const TEMPERATURE: f32 = 0.7;
const MAX_OUTPUT_TOKENS: u32 = 1500;

pub struct GeminiClient {
    api_key: String,
    model: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Tool>>,
}

#[derive(Serialize)]
struct Content {
    role: &'static str,
    parts: Vec<Part>,
}

#[derive(Serialize)]
struct Part {
    text: String,
}

#[derive(Serialize)]
struct GenerationConfig {
    temperature: f32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
}

#[derive(Serialize)]
struct Tool {
    google_search: GoogleSearch,
}

#[derive(Serialize)]
struct GoogleSearch {}

#[derive(Deserialize, Debug)]
struct GenerateResponse {
    candidates: Option<Vec<Candidate>>,
    error: Option<ApiError>,
}

#[derive(Deserialize, Debug)]
struct ApiError {
    message: String,
}

#[derive(Deserialize, Debug)]
struct Candidate {
    content: Option<CandidateContent>,
    #[serde(rename = "groundingMetadata")]
    grounding_metadata: Option<GroundingMetadata>,
}

#[derive(Deserialize, Debug)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize, Debug)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Deserialize, Debug)]
struct GroundingMetadata {
    #[serde(rename = "groundingChunks", default)]
    grounding_chunks: Vec<GroundingChunk>,
}

#[derive(Deserialize, Debug)]
struct GroundingChunk {
    web: Option<WebSource>,
}

#[derive(Deserialize, Debug)]
struct WebSource {
    uri: Option<String>,
    title: Option<String>,
}

impl GeminiClient {
    pub fn new(api_key: String, model: String, timeout: Duration) -> Result<Self, InferenceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| InferenceError::Http(e.to_string()))?;

        Ok(Self { api_key, model, client })
    }

    fn request_body(prompt: &str, web_search: bool) -> GenerateRequest {
        GenerateRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: TEMPERATURE,
                max_output_tokens: MAX_OUTPUT_TOKENS,
            },
            tools: web_search.then(|| {
                vec![Tool {
                    google_search: GoogleSearch {},
                }]
            }),
        }
    }

    async fn generate(&self, request: &GenerateRequest) -> Result<SearchAnswer, InferenceError> {
        let url = format!("{}/{}:generateContent", GEMINI_API_BASE, self.model);

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| InferenceError::Http(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| InferenceError::Http(e.to_string()))?;

        debug!("Gemini response status: {status}");

        if !status.is_success() {
            return Err(InferenceError::Api(format!("{status}: {body}")));
        }

        extract_answer(&body)
    }
}

/// Text of the first candidate plus the distinct web pages it cites.
fn extract_answer(body: &str) -> Result<SearchAnswer, InferenceError> {
    let parsed: GenerateResponse =
        serde_json::from_str(body).map_err(|e| InferenceError::Parse(e.to_string()))?;

    if let Some(error) = parsed.error {
        return Err(InferenceError::Api(error.message));
    }

    let Some(candidate) = parsed.candidates.unwrap_or_default().into_iter().next() else {
        return Err(InferenceError::Empty);
    };

    let text: String = candidate
        .content
        .map(|content| content.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();
    let text = text.trim();
    if text.is_empty() {
        return Err(InferenceError::Empty);
    }

    let mut sources: Vec<Source> = Vec::new();
    let chunks = candidate
        .grounding_metadata
        .map(|m| m.grounding_chunks)
        .unwrap_or_default();
    for web in chunks.into_iter().filter_map(|c| c.web) {
        let Some(uri) = web.uri.filter(|u| !u.is_empty()) else {
            continue;
        };
        if sources.iter().any(|s| s.uri == uri) {
            continue;
        }
        sources.push(Source {
            title: web.title.unwrap_or_else(|| "Source".to_string()),
            uri,
        });
    }

    Ok(SearchAnswer {
        text: text.to_string(),
        sources,
    })
}

#[async_trait]
impl Inference for GeminiClient {
    async fn complete(&self, prompt: &str) -> Result<String, InferenceError> {
        let answer = self.generate(&Self::request_body(prompt, false)).await?;
        info!("Gemini answered ({} chars)", answer.text.len());
        Ok(answer.text)
    }

    async fn search(&self, prompt: &str) -> Result<SearchAnswer, InferenceError> {
        let answer = self.generate(&Self::request_body(prompt, true)).await?;
        info!(
            "Gemini search answered ({} chars, {} sources)",
            answer.text.len(),
            answer.sources.len()
        );
        Ok(answer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_shape() {
        let body = serde_json::to_value(GeminiClient::request_body("hello", false)).unwrap();
        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(body["contents"][0]["parts"][0]["text"], "hello");
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 1500);
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn test_search_request_enables_google_search() {
        let body = serde_json::to_value(GeminiClient::request_body("news", true)).unwrap();
        assert_eq!(body["tools"], serde_json::json!([{ "google_search": {} }]));
    }

    #[test]
    fn test_extract_joins_parts() {
        let body = r#"{"candidates":[{"content":{"parts":[{"text":" Hello"},{"text":" world "}]}}]}"#;
        let answer = extract_answer(body).unwrap();
        assert_eq!(answer.text, "Hello world");
        assert!(answer.sources.is_empty());
    }

    #[test]
    fn test_extract_grounding_sources() {
        let body = r#"{"candidates":[{
            "content":{"parts":[{"text":"Rust 1.80 is out."}]},
            "groundingMetadata":{"groundingChunks":[
                {"web":{"uri":"https://blog.rust-lang.org/a","title":"Rust Blog"}},
                {"web":{"uri":"https://blog.rust-lang.org/a","title":"Rust Blog"}},
                {"web":{"uri":"https://example.org/b"}},
                {"retrievedContext":{}}
            ]}
        }]}"#;
        let answer = extract_answer(body).unwrap();
        assert_eq!(answer.text, "Rust 1.80 is out.");
        assert_eq!(
            answer.sources,
            vec![
                Source { title: "Rust Blog".into(), uri: "https://blog.rust-lang.org/a".into() },
                Source { title: "Source".into(), uri: "https://example.org/b".into() },
            ]
        );
    }

    #[test]
    fn test_extract_api_error() {
        let body = r#"{"error":{"message":"quota exceeded"}}"#;
        assert!(matches!(extract_answer(body), Err(InferenceError::Api(m)) if m == "quota exceeded"));
    }

    #[test]
    fn test_extract_empty() {
        assert!(matches!(extract_answer(r#"{"candidates":[]}"#), Err(InferenceError::Empty)));
        assert!(matches!(extract_answer(r#"{"candidates":[{}]}"#), Err(InferenceError::Empty)));
        assert!(matches!(extract_answer("not json"), Err(InferenceError::Parse(_))));
    }
}
