//! Integration tests for everything that talks HTTP
//!
//! Model providers, the Ollama embedder and the web actions all run against
//! a local wiremock server, so none of these need network access.

use praxis_engine::actions::web::{FetchUrl, SearchWeb};
use praxis_engine::config::LLMConfig;
use praxis_engine::llm::{GenerationRequest, Generator, LLMGateway};
use praxis_engine::memory::{Embedder, OllamaEmbedder};
use sdk::{Action, ActionParams, EngineError};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn ollama_config(base_url: &str) -> LLMConfig {
    let mut config = LLMConfig::default();
    config.provider = "ollama".to_string();
    config.ollama.base_url = base_url.to_string();
    config.ollama.model = "llama3.1:8b".to_string();
    config.timeout_secs = 5;
    config
}

#[tokio::test]
async fn test_ollama_generation_and_usage() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .and(body_partial_json(json!({
            "model": "llama3.1:8b",
            "stream": false,
            "system": "be brief",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "response": "[{\"action\": \"get_system_info\"}]",
            "prompt_eval_count": 12,
            "eval_count": 8,
        })))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = LLMGateway::from_config(&ollama_config(&server.uri())).unwrap();
    let response = gateway
        .generate(GenerationRequest::new("plan it").with_system("be brief"))
        .await;

    assert!(response.success, "{:?}", response.error);
    assert_eq!(response.provider, "ollama");
    assert_eq!(response.model, "llama3.1:8b");
    assert_eq!(response.tokens_used, 20);
    assert!(response.content.contains("get_system_info"));

    let usage = gateway.usage().await;
    assert_eq!(usage.total_requests, 1);
    assert_eq!(usage.total_tokens, 20);
    assert_eq!(usage.session_tokens, 20);

    gateway.reset_session().await;
    assert_eq!(gateway.usage().await.session_tokens, 0);
}

#[tokio::test]
async fn test_ollama_error_falls_back_to_openai() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(500).set_body_string("model not loaded"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("Authorization", "Bearer sk-local-test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"role": "assistant", "content": "fallback answer"}}],
            "usage": {"total_tokens": 42},
        })))
        .expect(1)
        .mount(&server)
        .await;

    let key_var = "PRAXIS_HTTP_TEST_OPENAI_KEY";
    std::env::set_var(key_var, "sk-local-test");

    let mut config = ollama_config(&server.uri());
    config.fallback_provider = Some("openai".to_string());
    config.openai.base_url = format!("{}/v1", server.uri());
    config.openai.api_key_env = key_var.to_string();

    let gateway = LLMGateway::from_config(&config).unwrap();
    let response = gateway.generate(GenerationRequest::new("hello")).await;

    assert!(response.success);
    assert_eq!(response.provider, "openai");
    assert_eq!(response.content, "fallback answer");

    let usage = gateway.usage().await;
    // the request as a whole succeeded; only the primary attempt failed
    assert_eq!(usage.total_requests, 1);
    assert_eq!(usage.failed_requests, 0);
    assert_eq!(usage.by_provider["ollama"].failures, 1);
    assert_eq!(usage.by_provider["openai"].tokens, 42);
}

#[tokio::test]
async fn test_anthropic_messages_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(header("x-api-key", "ak-local-test"))
        .and(header("anthropic-version", "2023-06-01"))
        .and(body_partial_json(json!({
            "model": "claude-3-5-sonnet-latest",
            "system": "plan carefully",
            "messages": [{"role": "user", "content": "list the steps"}],
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "content": [
                {"type": "text", "text": "[{\"action\": "},
                {"type": "text", "text": "\"list_directory\"}]"}
            ],
            "usage": {"input_tokens": 30, "output_tokens": 12},
        })))
        .expect(1)
        .mount(&server)
        .await;

    let key_var = "PRAXIS_HTTP_TEST_ANTHROPIC_KEY";
    std::env::set_var(key_var, "ak-local-test");

    let mut config = LLMConfig::default();
    config.provider = "anthropic".to_string();
    config.anthropic.base_url = format!("{}/v1", server.uri());
    config.anthropic.api_key_env = key_var.to_string();

    let gateway = LLMGateway::from_config(&config).unwrap();
    let response = gateway
        .generate(GenerationRequest::new("list the steps").with_system("plan carefully"))
        .await;

    assert!(response.success, "{:?}", response.error);
    assert_eq!(response.provider, "anthropic");
    assert_eq!(response.content, "[{\"action\": \"list_directory\"}]");
    assert_eq!(response.tokens_used, 42);
    assert_eq!(gateway.health().await, vec![("anthropic".to_string(), true)]);
}

#[tokio::test]
async fn test_anthropic_rate_limit_falls_back_to_ollama() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "response": "local answer",
            "eval_count": 3,
        })))
        .expect(1)
        .mount(&server)
        .await;

    let key_var = "PRAXIS_HTTP_TEST_ANTHROPIC_KEY_FALLBACK";
    std::env::set_var(key_var, "ak-local-test");

    let mut config = ollama_config(&server.uri());
    config.provider = "anthropic".to_string();
    config.fallback_provider = Some("ollama".to_string());
    config.anthropic.base_url = format!("{}/v1", server.uri());
    config.anthropic.api_key_env = key_var.to_string();

    let gateway = LLMGateway::from_config(&config).unwrap();
    let response = gateway.generate(GenerationRequest::new("hello")).await;

    assert!(response.success);
    assert_eq!(response.provider, "ollama");
    assert_eq!(response.content, "local answer");
    assert_eq!(gateway.usage().await.by_provider["anthropic"].failures, 1);
}

#[tokio::test]
async fn test_every_provider_failing_is_reported_not_raised() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let gateway = LLMGateway::from_config(&ollama_config(&server.uri())).unwrap();
    let response = gateway.generate(GenerationRequest::new("hello")).await;

    assert!(!response.success);
    assert!(response.error.unwrap().contains("ollama"));
    assert_eq!(gateway.usage().await.failed_requests, 1);
}

#[tokio::test]
async fn test_ollama_health_uses_tags_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"models": []})))
        .mount(&server)
        .await;

    let gateway = LLMGateway::from_config(&ollama_config(&server.uri())).unwrap();
    assert_eq!(gateway.health().await, vec![("ollama".to_string(), true)]);
}

#[tokio::test]
async fn test_ollama_embedder_checks_dimension() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embeddings"))
        .and(body_partial_json(json!({"model": "nomic-embed-text"})))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"embedding": [0.1, 0.2, 0.3, 0.4]})),
        )
        .mount(&server)
        .await;

    let embedder = OllamaEmbedder::new(server.uri(), "nomic-embed-text", 4);
    assert_eq!(embedder.dimension(), 4);
    assert_eq!(embedder.embed("hello").await.unwrap().len(), 4);

    let narrow = OllamaEmbedder::new(server.uri(), "nomic-embed-text", 3);
    assert!(matches!(
        narrow.embed("hello").await,
        Err(EngineError::Embedding(_))
    ));
}

#[tokio::test]
async fn test_search_web_flattens_instant_answer() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .and(query_param("q", "capital of France"))
        .and(query_param("format", "json"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/x-javascript")
                .set_body_string(
                    json!({
                        "Heading": "Paris",
                        "Abstract": "Paris is the capital of France.",
                        "AbstractURL": "https://en.wikipedia.org/wiki/Paris",
                        "RelatedTopics": [
                            {"Text": "Paris - city in France", "FirstURL": "https://duckduckgo.com/Paris"},
                            {"Name": "Places", "Topics": [
                                {"Text": "Lyon - another city", "FirstURL": "https://duckduckgo.com/Lyon"}
                            ]}
                        ]
                    })
                    .to_string(),
                ),
        )
        .mount(&server)
        .await;

    let search = SearchWeb::with_endpoint(server.uri(), true);
    let output = search
        .execute(
            &ActionParams::new()
                .with("query", json!("capital of France"))
                .with("num_results", json!(5)),
        )
        .await
        .unwrap();

    assert_eq!(output["count"], json!(3));
    let results = output["results"].as_array().unwrap();
    assert_eq!(results[0]["type"], json!("instant_answer"));
    assert_eq!(results[0]["title"], json!("Paris"));
    assert_eq!(results[1]["title"], json!("Paris"));
    assert_eq!(results[2]["url"], json!("https://duckduckgo.com/Lyon"));
}

#[tokio::test]
async fn test_search_web_http_error_is_action_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let search = SearchWeb::with_endpoint(server.uri(), true);
    let err = search
        .execute(&ActionParams::new().with("query", json!("anything")))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::ActionFailed(_)));
}

#[tokio::test]
async fn test_fetch_url_truncates_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/page"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/plain")
                .set_body_string("hello world"),
        )
        .mount(&server)
        .await;

    let fetch = FetchUrl::new(true);
    let url = format!("{}/page", server.uri());

    let full = fetch
        .execute(&ActionParams::new().with("url", json!(url)))
        .await
        .unwrap();
    assert_eq!(full["content"], json!("hello world"));
    assert_eq!(full["status_code"], json!(200));
    assert_eq!(full["truncated"], json!(false));

    let short = fetch
        .execute(
            &ActionParams::new()
                .with("url", json!(url))
                .with("max_bytes", json!(5)),
        )
        .await
        .unwrap();
    assert_eq!(short["content"], json!("hello"));
    assert_eq!(short["truncated"], json!(true));
}
