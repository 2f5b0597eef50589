use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use reqwest::header::{self, HeaderValue};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use ebook_core::config::Settings;
use ebook_core::{CompletionRequest, LanguageModel, LanguageModelError, ResponseFormat};

use crate::base_url::resolve_base_url;
use crate::error::AdapterError;

/// Connection and sampling parameters for an OpenAI-compatible endpoint.
#[derive(Clone, Debug, PartialEq)]
pub struct ChatOptions {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model_name: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub frequency_penalty: f32,
    pub presence_penalty: f32,
    pub timeout: u64,
}

impl ChatOptions {
    pub fn from_settings(settings: &Settings) -> Result<Self, AdapterError> {
        let interface = settings.llm_interface.trim();
        let base_url =
            resolve_base_url(&settings.openai_base_url, interface).ok_or_else(|| {
                AdapterError::invalid_config(format!("unknown LLM_INTERFACE: {interface}"))
            })?;
        Ok(Self {
            base_url,
            api_key: optional_string(&settings.openai_api_key),
            model_name: settings.model_name.clone(),
            temperature: settings.openai_temperature,
            max_tokens: settings.max_tokens,
            frequency_penalty: settings.frequency_penalty,
            presence_penalty: settings.presence_penalty,
            timeout: settings.llm_timeout,
        })
    }
}

fn optional_string(value: &str) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value.trim().to_string())
    }
}

/// Chat-completions client for OpenAI, DeepSeek, Ollama and Grok.
pub struct OpenAiCompatibleModel {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model_name: String,
    temperature: f32,
    max_tokens: Option<u32>,
    frequency_penalty: f32,
    presence_penalty: f32,
}

impl OpenAiCompatibleModel {
    pub fn new(options: ChatOptions) -> Result<Self, AdapterError> {
        if options.base_url.trim().is_empty() {
            return Err(AdapterError::invalid_config("base_url must not be empty"));
        }
        if options.model_name.trim().is_empty() {
            return Err(AdapterError::invalid_config("model_name must not be empty"));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(options.timeout.max(1)))
            .build()?;

        Ok(Self {
            client,
            base_url: options.base_url.trim_end_matches('/').to_string(),
            api_key: options.api_key,
            model_name: options.model_name,
            temperature: options.temperature,
            max_tokens: if options.max_tokens == 0 {
                None
            } else {
                Some(options.max_tokens)
            },
            frequency_penalty: options.frequency_penalty,
            presence_penalty: options.presence_penalty,
        })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, AdapterError> {
        Self::new(ChatOptions::from_settings(settings)?)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    fn build_body<'a>(&'a self, request: &'a CompletionRequest) -> ChatCompletionRequest<'a> {
        ChatCompletionRequest {
            model: &self.model_name,
            messages: vec![ChatMessageRequest {
                role: "user",
                content: &request.prompt,
            }],
            temperature: self.temperature,
            max_tokens: request.max_tokens.or(self.max_tokens),
            frequency_penalty: self.frequency_penalty,
            presence_penalty: self.presence_penalty,
            response_format: match request.response_format {
                ResponseFormat::Text => None,
                ResponseFormat::JsonObject => Some(ResponseFormatRequest {
                    kind: "json_object",
                }),
            },
        }
    }

    pub async fn chat(&self, request: &CompletionRequest) -> Result<String, AdapterError> {
        let body = self.build_body(request);
        debug!(
            "chat completion: model={} max_tokens={:?} json={}",
            self.model_name,
            body.max_tokens,
            body.response_format.is_some()
        );

        let mut http = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            );
        if let Some(key) = &self.api_key {
            http = http.bearer_auth(key);
        }

        let response = http.json(&body).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!("chat completion failed with status {status}");
            return Err(AdapterError::HttpStatus { status, body });
        }

        let parsed: ChatCompletionResponse = response.json().await?;
        extract_choice_content(parsed).ok_or(AdapterError::EmptyResponse)
    }

    /// Lists the provider's models; any 2xx answer counts as reachable.
    pub async fn test_connection(&self) -> Result<(), AdapterError> {
        let mut http = self.client.get(format!("{}/models", self.base_url));
        if let Some(key) = &self.api_key {
            http = http.bearer_auth(key);
        }
        let response = http.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AdapterError::HttpStatus { status, body });
        }
        Ok(())
    }
}

#[async_trait]
impl LanguageModel for OpenAiCompatibleModel {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LanguageModelError> {
        self.chat(request).await.map_err(LanguageModelError::new)
    }
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessageRequest<'a>>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    frequency_penalty: f32,
    presence_penalty: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormatRequest>,
}

#[derive(Serialize)]
struct ChatMessageRequest<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormatRequest {
    #[serde(rename = "type")]
    kind: &'static str,
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
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

fn extract_choice_content(response: ChatCompletionResponse) -> Option<String> {
    response
        .choices
        .into_iter()
        .filter_map(|choice| choice.message.and_then(|message| message.content))
        .find(|content| !content.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_server::serve_once;
    use std::collections::HashMap;

    fn options(base_url: &str) -> ChatOptions {
        ChatOptions {
            base_url: base_url.to_string(),
            api_key: Some("sk-test".into()),
            model_name: "gpt-4o".into(),
            temperature: 0.7,
            max_tokens: 3000,
            frequency_penalty: 0.1,
            presence_penalty: 0.2,
            timeout: 5,
        }
    }

    fn settings(vars: &[(&str, &str)]) -> Settings {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_vars(None, vars).unwrap()
    }

    #[test]
    fn options_follow_the_interface() {
        let ollama = ChatOptions::from_settings(&settings(&[
            ("LLM_INTERFACE", "ollama"),
            ("MODEL_NAME", "llama3"),
        ]))
        .unwrap();
        assert_eq!(ollama.base_url, "http://localhost:11434/v1");
        assert_eq!(ollama.api_key, None);

        let unknown = ChatOptions::from_settings(&settings(&[
            ("OPENAI_API_KEY", "sk-test"),
            ("LLM_INTERFACE", "carrier-pigeon"),
        ]));
        assert!(matches!(unknown, Err(AdapterError::InvalidConfig(_))));
    }

    #[test]
    fn rejects_blank_model_name() {
        let mut opts = options("http://localhost");
        opts.model_name = " ".into();
        assert!(matches!(
            OpenAiCompatibleModel::new(opts),
            Err(AdapterError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn sends_json_mode_request_with_bearer_auth() {
        let (base, server) = serve_once(
            200,
            r#"{"choices":[{"message":{"role":"assistant","content":"{\"chapters\":[]}"}}]}"#,
        )
        .await;
        let model = OpenAiCompatibleModel::new(options(&base)).unwrap();

        let answer = model
            .complete(&CompletionRequest::json("outline please").with_max_tokens(1234))
            .await
            .unwrap();
        assert_eq!(answer, r#"{"chapters":[]}"#);

        let captured = server.await.unwrap();
        assert!(captured.head.starts_with("POST /chat/completions"));
        assert_eq!(captured.header("authorization"), Some("Bearer sk-test"));
        let body = captured.json();
        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"], "outline please");
        assert_eq!(body["max_tokens"], 1234);
        assert_eq!(body["response_format"]["type"], "json_object");
    }

    #[tokio::test]
    async fn text_requests_fall_back_to_default_budget() {
        let (base, server) =
            serve_once(200, r##"{"choices":[{"message":{"content":"# Intro"}}]}"##).await;
        let model = OpenAiCompatibleModel::new(options(&base)).unwrap();

        model.chat(&CompletionRequest::text("chapter")).await.unwrap();

        let body = server.await.unwrap().json();
        assert_eq!(body["max_tokens"], 3000);
        assert!(body.get("response_format").is_none());
    }

    #[tokio::test]
    async fn non_success_status_is_reported() {
        let (base, _server) = serve_once(429, r#"{"error":"slow down"}"#).await;
        let model = OpenAiCompatibleModel::new(options(&base)).unwrap();

        let err = model.chat(&CompletionRequest::text("hi")).await.unwrap_err();
        match err {
            AdapterError::HttpStatus { status, body } => {
                assert_eq!(status.as_u16(), 429);
                assert!(body.contains("slow down"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn blank_choices_are_empty_responses() {
        let (base, _server) =
            serve_once(200, r#"{"choices":[{"message":{"content":"  "}}]}"#).await;
        let model = OpenAiCompatibleModel::new(options(&base)).unwrap();

        let err = model.chat(&CompletionRequest::text("hi")).await.unwrap_err();
        assert!(matches!(err, AdapterError::EmptyResponse));
    }

    #[tokio::test]
    async fn connection_check_lists_models() {
        let (base, server) = serve_once(200, r#"{"data":[]}"#).await;
        let model = OpenAiCompatibleModel::new(options(&base)).unwrap();

        model.test_connection().await.unwrap();
        assert!(server.await.unwrap().head.starts_with("GET /models"));
    }
}
