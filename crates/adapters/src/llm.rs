use std::env;
use std::thread;
use std::time::Duration;

use log::{debug, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::blocking::Client;
use reqwest::header::{self, HeaderValue};
use reqwest::StatusCode;
use serde::de::IgnoredAny;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use remix_core::config::{Config, LlmConfig};
use remix_core::{GenerationOptions, LanguageModel, LanguageModelError};

use crate::base_url::{gemini_base_url, openai_base_url};
use crate::error::AdapterError;
use crate::retry::{call_with_retry, RetryConfig};

/// Checked in order when a profile leaves `api_key` blank.
pub const API_KEY_ENV_VARS: &[&str] = &["API_KEY", "GEMINI_API_KEY", "OPENAI_API_KEY"];

const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash";
const SYSTEM_PROMPT: &str = "You are a professional screenwriter and script doctor.";

pub fn create_llm_adapter(
    config: &Config,
    profile_name: &str,
) -> Result<Box<dyn LanguageModel>, AdapterError> {
    let profile = config.get_llm_profile(profile_name).ok_or_else(|| {
        AdapterError::InvalidConfig(format!("unknown LLM profile `{}`", profile_name))
    })?;
    create_llm_adapter_from_profile(profile)
}

/// An empty `interface_format` selects Gemini.
pub fn create_llm_adapter_from_profile(
    profile: &LlmConfig,
) -> Result<Box<dyn LanguageModel>, AdapterError> {
    let fmt = profile.interface_format.trim().to_lowercase();
    let settings = Settings::from_profile(profile);

    if fmt.is_empty() || fmt == "gemini" {
        return Ok(Box::new(GeminiAdapter::new(
            &profile.base_url,
            &profile.model_name,
            settings,
        )?));
    }

    let (default_base, key_required) = match fmt.as_str() {
        "openai" => ("https://api.openai.com/v1", true),
        "deepseek" => ("https://api.deepseek.com/v1", true),
        "grok" => ("https://api.x.ai/v1", true),
        "ollama" => ("http://localhost:11434/v1", false),
        "lm studio" => ("http://localhost:1234/v1", false),
        "阿里云百炼" | "火山引擎" | "硅基流动" => ("", true),
        other => {
            return Err(AdapterError::InvalidConfig(format!(
                "unknown interface_format: {}",
                other
            )))
        }
    };
    let credential = Credential {
        required: key_required,
        ..settings.credential.clone()
    };
    Ok(Box::new(OpenAiLikeAdapter::new(
        openai_base_url(&profile.base_url, default_base),
        profile.model_name.clone(),
        Settings {
            credential,
            ..settings
        },
    )?))
}

/// Knobs shared by every adapter, lifted out of an [`LlmConfig`].
#[derive(Clone, Debug)]
struct Settings {
    credential: Credential,
    max_tokens: Option<u32>,
    temperature: f32,
    timeout: Duration,
    retry: RetryConfig,
}

impl Settings {
    fn from_profile(profile: &LlmConfig) -> Self {
        Self {
            credential: Credential {
                configured: Some(profile.api_key.trim().to_string())
                    .filter(|key| !key.is_empty()),
                required: true,
            },
            max_tokens: Some(profile.max_tokens).filter(|tokens| *tokens > 0),
            temperature: profile.temperature,
            timeout: Duration::from_secs(profile.timeout.max(1)),
            retry: RetryConfig::new(profile.max_retries, Duration::from_secs(2)),
        }
    }
}

/// The API key is resolved on every call so the environment can supply it
/// after the adapter was built.
#[derive(Clone, Debug)]
struct Credential {
    configured: Option<String>,
    required: bool,
}

impl Credential {
    fn resolve(&self) -> Result<Option<String>, AdapterError> {
        self.resolve_with(|name| env::var(name).ok())
    }

    fn resolve_with<F>(&self, lookup: F) -> Result<Option<String>, AdapterError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = &self.configured {
            return Ok(Some(key.clone()));
        }
        let from_env = API_KEY_ENV_VARS
            .iter()
            .filter_map(|name| lookup(name))
            .map(|value| value.trim().to_string())
            .find(|value| !value.is_empty());
        match from_env {
            Some(key) => Ok(Some(key)),
            None if self.required => Err(AdapterError::MissingCredential(API_KEY_ENV_VARS)),
            None => Ok(None),
        }
    }
}

struct OpenAiLikeAdapter {
    client: Client,
    url: String,
    model_name: String,
    settings: Settings,
}

impl OpenAiLikeAdapter {
    fn new(base_url: String, model_name: String, settings: Settings) -> Result<Self, AdapterError> {
        if base_url.trim().is_empty() {
            return Err(AdapterError::InvalidConfig(
                "base_url must not be empty".to_string(),
            ));
        }

        if model_name.trim().is_empty() {
            return Err(AdapterError::InvalidConfig(
                "model_name must not be empty".to_string(),
            ));
        }

        let client = Client::builder().timeout(settings.timeout).build()?;

        Ok(Self {
            client,
            url: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            model_name,
            settings,
        })
    }

    fn invoke_once(&self, prompt: &str, options: &GenerationOptions) -> Result<String, AdapterError> {
        let api_key = self.settings.credential.resolve()?;
        let body = ChatCompletionRequest {
            model: &self.model_name,
            messages: vec![
                ChatMessageRequest {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessageRequest {
                    role: "user",
                    content: prompt,
                },
            ],
            max_tokens: self.settings.max_tokens,
            temperature: options.temperature.unwrap_or(self.settings.temperature),
            response_format: options.schema.as_ref().map(|schema| ResponseFormat {
                kind: "json_schema",
                json_schema: JsonSchemaFormat {
                    name: "structured_output",
                    schema: openai_schema(schema),
                },
            }),
        };

        let mut request = self.client.post(&self.url).header(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        if let Some(key) = api_key {
            request = request.bearer_auth(key);
        }

        let response = request.json(&body).send()?;
        handle_chat_response(response)
    }
}

impl LanguageModel for OpenAiLikeAdapter {
    fn invoke(&self, prompt: &str, options: &GenerationOptions) -> Result<String, LanguageModelError> {
        call_with_retry(|| self.invoke_once(prompt, options), &self.settings.retry)
            .map_err(LanguageModelError::from)
    }
}

struct GeminiAdapter {
    client: Client,
    url: String,
    settings: Settings,
    base_delay: Duration,
}

impl GeminiAdapter {
    fn new(base_url: &str, model_name: &str, settings: Settings) -> Result<Self, AdapterError> {
        let model = match model_name.trim() {
            "" => DEFAULT_GEMINI_MODEL,
            name => name,
        };
        let client = Client::builder().timeout(settings.timeout).build()?;

        Ok(Self {
            client,
            url: format!("{}/models/{model}:generateContent", gemini_base_url(base_url)),
            settings,
            base_delay: Duration::from_secs(5),
        })
    }

    fn invoke_once(&self, prompt: &str, options: &GenerationOptions) -> Result<String, AdapterError> {
        let api_key = self.settings.credential.resolve()?.unwrap_or_default();
        let request = gemini_request(prompt, options, &self.settings);

        let response = self
            .client
            .post(&self.url)
            .header("x-goog-api-key", api_key)
            .json(&request)
            .send()?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            return Err(AdapterError::HttpStatus { status, body });
        }

        let parsed: GeminiResponse = response.json()?;
        Ok(parse_gemini_response(parsed))
    }

    fn rate_limit_delay(&self, err: &AdapterError, attempt: usize) -> Option<Duration> {
        let AdapterError::HttpStatus { status, body } = err else {
            return None;
        };
        let lower = body.to_ascii_lowercase();
        if *status != StatusCode::TOO_MANY_REQUESTS
            && !lower.contains("quota")
            && !lower.contains("rate limit")
        {
            return None;
        }
        if let Some(secs) = parse_retry_delay(body) {
            return Some(Duration::from_secs(secs + 5));
        }
        let multiplier = 1u32.checked_shl(attempt as u32).unwrap_or(1);
        self.base_delay
            .checked_mul(multiplier)
            .or(Some(self.base_delay))
    }
}

impl LanguageModel for GeminiAdapter {
    /// Rate-limit responses are retried with the server's suggested delay;
    /// anything else surfaces after the first failure.
    fn invoke(&self, prompt: &str, options: &GenerationOptions) -> Result<String, LanguageModelError> {
        let attempts = self.settings.retry.max_retries.max(1);
        let mut attempt = 0;

        loop {
            let err = match self.invoke_once(prompt, options) {
                Ok(text) => return Ok(text),
                Err(err) => err,
            };
            attempt += 1;
            let delay = match self.rate_limit_delay(&err, attempt) {
                Some(delay) if attempt < attempts => delay,
                _ if attempts > 1 && attempt >= attempts && err.is_retryable() => {
                    return Err(AdapterError::retry_exhausted(attempts, err).into())
                }
                _ => return Err(err.into()),
            };
            warn!(
                "Gemini rate limit encountered, retrying in {:?} (attempt {}/{})",
                delay, attempt, attempts
            );
            thread::sleep(delay);
        }
    }
}

fn handle_chat_response(response: reqwest::blocking::Response) -> Result<String, AdapterError> {
    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().unwrap_or_default();
        return Err(AdapterError::HttpStatus { status, body });
    }

    let parsed: ChatCompletionResponse = response.json()?;
    Ok(extract_choice_content(parsed).unwrap_or_else(|| {
        warn!("chat completion returned no text content");
        String::new()
    }))
}

/// Gemini schemas use uppercase type names; JSON Schema wants lowercase.
fn openai_schema(schema: &Value) -> Value {
    match schema {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, value)| {
                    let converted = match (key.as_str(), value) {
                        ("type", Value::String(kind)) => Value::String(kind.to_lowercase()),
                        _ => openai_schema(value),
                    };
                    (key.clone(), converted)
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(openai_schema).collect()),
        other => other.clone(),
    }
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessageRequest<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Serialize)]
struct ChatMessageRequest<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
    json_schema: JsonSchemaFormat,
}

#[derive(Serialize)]
struct JsonSchemaFormat {
    name: &'static str,
    schema: Value,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    #[serde(default)]
    message: Option<ChatMessage>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

fn extract_choice_content(response: ChatCompletionResponse) -> Option<String> {
    response.choices.into_iter().find_map(|choice| {
        if choice.finish_reason.as_deref() == Some("length") {
            warn!("chat completion truncated due to max_tokens limit");
        }
        choice
            .message
            .and_then(|message| message.content)
            .filter(|content| !content.trim().is_empty())
    })
}

fn gemini_request<'a>(
    prompt: &'a str,
    options: &'a GenerationOptions,
    settings: &Settings,
) -> GeminiRequest<'a> {
    GeminiRequest {
        contents: vec![GeminiRequestContent {
            role: "user",
            parts: vec![GeminiRequestPart { text: prompt }],
        }],
        generation_config: GeminiGenerationConfig {
            max_output_tokens: settings.max_tokens,
            temperature: options.temperature.unwrap_or(settings.temperature),
            response_mime_type: options.schema.as_ref().map(|_| "application/json"),
            response_schema: options.schema.as_ref(),
        },
    }
}

#[derive(Serialize)]
struct GeminiRequest<'a> {
    contents: Vec<GeminiRequestContent<'a>>,
    #[serde(rename = "generationConfig")]
    generation_config: GeminiGenerationConfig<'a>,
}

#[derive(Serialize)]
struct GeminiRequestContent<'a> {
    role: &'static str,
    parts: Vec<GeminiRequestPart<'a>>,
}

#[derive(Serialize)]
struct GeminiRequestPart<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_schema: Option<&'a Value>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiContent>,
    #[serde(rename = "finishReason")]
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum GeminiPart {
    Text { text: String },
    Other(IgnoredAny),
}

/// Concatenated text of the first candidate that has any; empty otherwise.
fn parse_gemini_response(response: GeminiResponse) -> String {
    for candidate in response.candidates {
        match candidate.finish_reason.as_deref() {
            Some("MAX_TOKENS") => warn!("Gemini response truncated due to max_tokens limit"),
            Some("SAFETY") => warn!("Gemini response blocked by safety filters"),
            Some("RECITATION") => warn!("Gemini response blocked due to recitation concerns"),
            _ => {}
        }

        let text: String = candidate
            .content
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|part| match part {
                        GeminiPart::Text { text } => Some(text),
                        GeminiPart::Other(_) => None,
                    })
                    .collect()
            })
            .unwrap_or_default();
        if !text.trim().is_empty() {
            return text;
        }
    }

    debug!("Gemini response carried no text");
    String::new()
}

static RETRY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"retry[_ ]?delay[^0-9]*(\d+)").expect("valid regex for retry delay"));

fn parse_retry_delay(body: &str) -> Option<u64> {
    let from_details = serde_json::from_str::<Value>(body).ok().and_then(|value| {
        value
            .get("error")
            .and_then(|v| v.get("details"))
            .and_then(Value::as_array)
            .and_then(|details| {
                details.iter().find_map(|detail| {
                    detail
                        .get("retryDelay")
                        .or_else(|| detail.get("retry_delay"))
                        .and_then(parse_delay_value)
                })
            })
    });
    from_details.or_else(|| {
        RETRY_RE
            .captures(body)
            .and_then(|caps| caps.get(1))
            .and_then(|matched| matched.as_str().parse().ok())
    })
}

fn parse_delay_value(value: &Value) -> Option<u64> {
    value
        .as_u64()
        .or_else(|| value.as_str().and_then(|text| text.trim_end_matches('s').parse().ok()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use remix_core::blueprint_schema;

    fn settings() -> Settings {
        Settings::from_profile(&LlmConfig {
            api_key: "k".into(),
            ..LlmConfig::default()
        })
    }

    #[test]
    fn credential_prefers_profile_then_environment() {
        let configured = Credential {
            configured: Some("from-profile".into()),
            required: true,
        };
        assert_eq!(
            configured.resolve_with(|_| Some("env".into())).unwrap(),
            Some("from-profile".into())
        );

        let from_env = Credential {
            configured: None,
            required: true,
        };
        let resolved = from_env
            .resolve_with(|name| (name == "GEMINI_API_KEY").then(|| "gk".to_string()))
            .unwrap();
        assert_eq!(resolved, Some("gk".into()));

        let error = from_env.resolve_with(|_| None).unwrap_err();
        assert!(matches!(error, AdapterError::MissingCredential(_)));
        let local = Credential {
            configured: None,
            required: false,
        };
        assert_eq!(local.resolve_with(|_| None).unwrap(), None);
    }

    #[test]
    fn schema_types_are_lowercased_for_openai() {
        let converted = openai_schema(&blueprint_schema());
        assert_eq!(converted["type"], "object");
        assert_eq!(converted["properties"]["sequences"]["type"], "array");
        assert_eq!(
            converted["properties"]["sequences"]["items"]["properties"]["title"]["type"],
            "string"
        );
        assert_eq!(converted["required"][0], "feasibilityReport");
    }

    #[test]
    fn gemini_request_carries_schema_and_temperature() {
        let options = GenerationOptions::new()
            .with_schema(blueprint_schema())
            .with_temperature(1.5);
        let request = gemini_request("写", &options, &settings());
        let json = serde_json::to_value(&request).unwrap();
        let config = &json["generationConfig"];
        assert_eq!(config["temperature"].as_f64().unwrap() as f32, 1.5);
        assert_eq!(config["responseMimeType"], "application/json");
        assert_eq!(config["responseSchema"]["type"], "OBJECT");
        assert_eq!(config["maxOutputTokens"], 8192);

        let plain_options = GenerationOptions::new();
        let plain = gemini_request("写", &plain_options, &settings());
        let json = serde_json::to_value(&plain).unwrap();
        assert!(json["generationConfig"].get("responseSchema").is_none());
        assert_eq!(
            json["generationConfig"]["temperature"].as_f64().unwrap() as f32,
            0.7
        );
    }

    #[test]
    fn gemini_without_text_yields_empty_string() {
        let response: GeminiResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"parts":[{"inlineData":{}}]},"finishReason":"SAFETY"}]}"#,
        )
        .unwrap();
        assert_eq!(parse_gemini_response(response), "");

        let response: GeminiResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"parts":[{"text":"内景"},{"text":"·夜"}]}}]}"#,
        )
        .unwrap();
        assert_eq!(parse_gemini_response(response), "内景·夜");
    }

    #[test]
    fn gemini_skips_non_text_parts_between_text() {
        let response: GeminiResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"parts":[
                {"text":"外景"},
                {"functionCall":{"name":"lookup","args":{"q":[1,2]}}},
                {"thought":true,"inlineData":{"mimeType":"image/png","data":"AA=="}},
                {"text":"·日"}
            ]}}]}"#,
        )
        .unwrap();
        assert_eq!(parse_gemini_response(response), "外景·日");
    }

    #[test]
    fn chat_choice_without_content_is_none() {
        let response: ChatCompletionResponse =
            serde_json::from_str(r#"{"choices":[{"message":{"content":"  "}}]}"#).unwrap();
        assert_eq!(extract_choice_content(response), None);

        let response: ChatCompletionResponse =
            serde_json::from_str(r#"{"choices":[{"message":{"content":"剧本"}}]}"#).unwrap();
        assert_eq!(extract_choice_content(response).as_deref(), Some("剧本"));
    }

    #[test]
    fn retry_delay_from_details_or_text() {
        let body = r#"{"error":{"details":[{"retryDelay":"17s"}]}}"#;
        assert_eq!(parse_retry_delay(body), Some(17));
        assert_eq!(parse_retry_delay("please retry_delay: 9 seconds"), Some(9));
        assert_eq!(parse_retry_delay("nothing here"), None);
    }

    #[test]
    fn unknown_format_is_rejected() {
        let profile = LlmConfig {
            interface_format: "carrier-pigeon".into(),
            ..LlmConfig::default()
        };
        assert!(matches!(
            create_llm_adapter_from_profile(&profile),
            Err(AdapterError::InvalidConfig(_))
        ));
    }

    #[test]
    fn openai_like_requires_model_name() {
        let profile = LlmConfig {
            interface_format: "OpenAI".into(),
            api_key: "k".into(),
            ..LlmConfig::default()
        };
        assert!(matches!(
            create_llm_adapter_from_profile(&profile),
            Err(AdapterError::InvalidConfig(_))
        ));
    }

    #[test]
    fn unknown_profile_name_is_rejected() {
        assert!(matches!(
            create_llm_adapter(&Config::default(), "missing"),
            Err(AdapterError::InvalidConfig(_))
        ));
    }

    #[test]
    fn gemini_is_the_default_backend() {
        assert!(create_llm_adapter_from_profile(&LlmConfig::default()).is_ok());
    }
}
