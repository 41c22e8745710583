//! # API module
//!
//! Thin layer over the OpenAI compatible chat-completion endpoint: building
//! the client and the request, and reading the reply either in one piece
//! ([`fetch_response`]) or as a stream of deltas ([`stream_response`]).
//!
//! Prompt assembly, memory and fallback handling live in
//! [`crate::chat::ChatSession`].

use async_openai::{
    Client,
    config::OpenAIConfig,
    error::OpenAIError,
    types::chat::{ChatCompletionRequestMessage, CreateChatCompletionRequest, CreateChatCompletionRequestArgs},
};
use futures::StreamExt;
use tracing::{debug, error};

use crate::config::ParleyConfig;
use crate::personality::Personality;

/// Create a client for `config.api_base` authenticated with `config.api_key`.
pub fn create_client(config: &ParleyConfig) -> Client<OpenAIConfig> {
    let openai_config = OpenAIConfig::new()
        .with_api_key(config.api_key.clone())
        .with_api_base(config.api_base.clone());
    debug!("Client created for {}", config.api_base);
    Client::with_config(openai_config)
}

/// Effective sampling temperature: the config wins over the personality.
pub fn effective_temperature(config: &ParleyConfig, personality: &Personality) -> Option<f32> {
    config.temperature.or(personality.temperature)
}

/// Build a chat-completion request for `messages`.
#[allow(deprecated)]
pub fn build_request(
    config: &ParleyConfig,
    personality: &Personality,
    messages: Vec<ChatCompletionRequestMessage>,
    stream: bool,
) -> Result<CreateChatCompletionRequest, OpenAIError> {
    let mut args = CreateChatCompletionRequestArgs::default();
    args.model(config.model.clone())
        .max_tokens(config.max_response_tokens)
        .messages(messages)
        .stream(stream);

    if let Some(temperature) = effective_temperature(config, personality) {
        args.temperature(temperature);
    }
    if !config.stop_words.is_empty() {
        args.stop(config.stop_words.clone());
    }

    args.build()
}

/// Send `request` and return the concatenated content of all choices.
pub async fn fetch_response(
    client: &Client<OpenAIConfig>,
    request: CreateChatCompletionRequest,
) -> Result<String, OpenAIError> {
    debug!("Sending request: {:?}", request);
    let response = client.chat().create(request).await?;

    let mut response_string = String::new();
    for choice in response.choices {
        if let Some(text) = choice.message.content {
            response_string.push_str(&text);
        }
    }
    Ok(response_string)
}

/// Stream `request`, handing each delta to `on_delta`, and return the full text.
///
/// An error before the first delta is returned as is. A failure in the middle
/// of the stream ends it early and keeps the partial text.
pub async fn stream_response<F>(
    client: &Client<OpenAIConfig>,
    request: CreateChatCompletionRequest,
    mut on_delta: F,
) -> Result<String, OpenAIError>
where
    F: FnMut(&str),
{
    debug!("Streaming request: {:?}", request);
    let mut stream = client.chat().create_stream(request).await?;

    let mut response_string = String::new();
    while let Some(result) = stream.next().await {
        match result {
            Ok(response) => {
                for choice in response.choices {
                    if let Some(content) = choice.delta.content {
                        on_delta(&content);
                        response_string.push_str(&content);
                    }
                }
            }
            Err(err) if response_string.is_empty() => return Err(err),
            Err(err) => {
                error!("Stream interrupted: {err}");
                break;
            }
        }
    }

    Ok(response_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{Role, Turn};
    use crate::personality;
    use httpmock::prelude::*;
    use serde_json::json;

    fn mock_config(api_base: String) -> ParleyConfig {
        ParleyConfig {
            api_key: "mock_api_key".to_string(),
            api_base,
            model: "mock_model".to_string(),
            ..ParleyConfig::default()
        }
    }

    fn completion_body(content: &str) -> serde_json::Value {
        json!({
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "created": 1_700_000_000,
            "model": "mock_model",
            "choices": [{
                "index": 0,
                "message": { "role": "assistant", "content": content },
                "finish_reason": "stop"
            }],
            "usage": { "prompt_tokens": 5, "completion_tokens": 3, "total_tokens": 8 }
        })
    }

    #[test]
    fn test_build_request_uses_personality_temperature_unless_overridden() {
        let tutor = personality::find("tutor", None).unwrap();
        let mut config = mock_config("http://localhost".into());
        let messages = vec![Turn::new(Role::User, "hi".into()).to_request_message()];

        let request = build_request(&config, &tutor, messages.clone(), false).unwrap();
        assert_eq!(request.temperature, tutor.temperature);
        assert_eq!(request.model, "mock_model");

        config.temperature = Some(0.1);
        let request = build_request(&config, &tutor, messages, false).unwrap();
        assert_eq!(request.temperature, Some(0.1));
    }

    #[tokio::test]
    async fn test_fetch_response() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/chat/completions")
                    .header("authorization", "Bearer mock_api_key")
                    .body_includes("\"model\":\"mock_model\"");
                then.status(200).json_body(completion_body("Hello from the mock"));
            })
            .await;

        let config = mock_config(server.base_url());
        let client = create_client(&config);
        let p = personality::find("assistant", None).unwrap();
        let messages = vec![Turn::new(Role::User, "hi".into()).to_request_message()];
        let request = build_request(&config, &p, messages, false).unwrap();

        let text = fetch_response(&client, request).await.unwrap();
        assert_eq!(text, "Hello from the mock");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_stream_response_collects_deltas() {
        let server = MockServer::start_async().await;
        let chunk = |content: &str| {
            json!({
                "id": "chatcmpl-1",
                "object": "chat.completion.chunk",
                "created": 1_700_000_000,
                "model": "mock_model",
                "choices": [{ "index": 0, "delta": { "content": content }, "finish_reason": null }]
            })
        };
        let body = format!(
            "data: {}\n\ndata: {}\n\ndata: [DONE]\n\n",
            chunk("Hel"),
            chunk("lo")
        );
        server
            .mock_async(|when, then| {
                when.method(POST).path("/chat/completions");
                then.status(200)
                    .header("content-type", "text/event-stream")
                    .body(body);
            })
            .await;

        let config = mock_config(server.base_url());
        let client = create_client(&config);
        let p = personality::find("assistant", None).unwrap();
        let messages = vec![Turn::new(Role::User, "hi".into()).to_request_message()];
        let request = build_request(&config, &p, messages, true).unwrap();

        let mut deltas = Vec::new();
        let text = stream_response(&client, request, |d| deltas.push(d.to_string()))
            .await
            .unwrap();
        assert_eq!(text, "Hello");
        assert_eq!(deltas, vec!["Hel", "lo"]);
    }

    #[tokio::test]
    async fn test_api_error_is_returned() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/chat/completions");
                then.status(401).json_body(json!({
                    "error": { "message": "bad key", "type": "invalid_request_error", "param": null, "code": "invalid_api_key" }
                }));
            })
            .await;

        let config = mock_config(server.base_url());
        let client = create_client(&config);
        let p = personality::find("assistant", None).unwrap();
        let messages = vec![Turn::new(Role::User, "hi".into()).to_request_message()];
        let request = build_request(&config, &p, messages, false).unwrap();

        let err = fetch_response(&client, request).await.unwrap_err();
        assert!(!crate::fallback::is_unreachable(&err));
    }
}
