//! Web actions: `fetch_url`, `search_web` and `extract_text_from_html`
//!
//! Search uses the DuckDuckGo instant answer API, which needs no key and
//! returns an abstract plus related topics rather than full web results.
//! Text extraction works on markup already in hand and needs no network.

use async_trait::async_trait;
use reqwest::{Client, Url};
use scraper::{Html, Node};
use sdk::{Action, ActionParams, EngineError};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info};

pub const DUCKDUCKGO_API: &str = "https://api.duckduckgo.com/";

const USER_AGENT: &str = concat!("praxis/", env!("CARGO_PKG_VERSION"));
const DEFAULT_MAX_BYTES: u64 = 100_000;
const DEFAULT_NUM_RESULTS: u64 = 5;

fn http_client() -> Client {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(Duration::from_secs(30))
        .build()
        .unwrap_or_else(|_| Client::new())
}

fn network_disabled() -> EngineError {
    EngineError::PermissionDenied(
        "network access is disabled (security.allow_network_access)".to_string(),
    )
}

pub struct FetchUrl {
    client: Client,
    enabled: bool,
}

impl FetchUrl {
    pub fn new(enabled: bool) -> Self {
        Self {
            client: http_client(),
            enabled,
        }
    }
}

#[async_trait]
impl Action for FetchUrl {
    fn name(&self) -> &str {
        "fetch_url"
    }

    fn description(&self) -> &str {
        "Fetch an http(s) URL and return its body as text"
    }

    fn parameters(&self) -> &[&'static str] {
        &["url", "max_bytes"]
    }

    async fn execute(&self, params: &ActionParams) -> Result<Value, EngineError> {
        if !self.enabled {
            return Err(network_disabled());
        }

        let raw = params.str("url")?;
        let url = Url::parse(raw)
            .map_err(|e| EngineError::Validation(format!("invalid url '{}': {}", raw, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(EngineError::Validation(format!(
                "unsupported scheme '{}'",
                url.scheme()
            )));
        }
        let max_bytes = params.u64_opt("max_bytes").unwrap_or(DEFAULT_MAX_BYTES) as usize;

        info!("Fetching {}", url);
        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| EngineError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(EngineError::ActionFailed(format!("HTTP {}", status)));
        }

        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        let mut body = Vec::new();
        let mut truncated = false;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| EngineError::Transport(e.to_string()))?
        {
            let room = max_bytes.saturating_sub(body.len());
            if chunk.len() > room {
                body.extend_from_slice(&chunk[..room]);
                truncated = true;
                break;
            }
            body.extend_from_slice(&chunk);
        }

        debug!("Fetched {} bytes from {}", body.len(), final_url);
        Ok(json!({
            "url": final_url,
            "status_code": status.as_u16(),
            "content_type": content_type,
            "content": String::from_utf8_lossy(&body),
            "truncated": truncated,
        }))
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InstantAnswer {
    #[serde(default, rename = "Abstract")]
    abstract_text: String,
    #[serde(default)]
    heading: String,
    #[serde(default, rename = "AbstractURL")]
    abstract_url: String,
    #[serde(default)]
    related_topics: Vec<RelatedTopic>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RelatedTopic {
    #[serde(default)]
    text: Option<String>,
    #[serde(default, rename = "FirstURL")]
    first_url: String,
    /// Category groups nest further topics
    #[serde(default)]
    topics: Vec<RelatedTopic>,
}

pub struct SearchWeb {
    client: Client,
    endpoint: String,
    enabled: bool,
}

impl SearchWeb {
    pub fn new(enabled: bool) -> Self {
        Self::with_endpoint(DUCKDUCKGO_API, enabled)
    }

    pub fn with_endpoint(endpoint: impl Into<String>, enabled: bool) -> Self {
        Self {
            client: http_client(),
            endpoint: endpoint.into(),
            enabled,
        }
    }
}

#[async_trait]
impl Action for SearchWeb {
    fn name(&self) -> &str {
        "search_web"
    }

    fn description(&self) -> &str {
        "Search the web and return titles, snippets and URLs"
    }

    fn parameters(&self) -> &[&'static str] {
        &["query", "num_results"]
    }

    async fn execute(&self, params: &ActionParams) -> Result<Value, EngineError> {
        if !self.enabled {
            return Err(network_disabled());
        }

        let query = params.str("query")?;
        let limit = params
            .u64_opt("num_results")
            .unwrap_or(DEFAULT_NUM_RESULTS)
            .max(1) as usize;

        info!("Searching the web: {}", query);
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("q", query),
                ("format", "json"),
                ("no_html", "1"),
                ("skip_disambig", "1"),
            ])
            .send()
            .await
            .map_err(|e| EngineError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(EngineError::ActionFailed(format!(
                "search returned HTTP {}",
                response.status()
            )));
        }

        // The API answers `application/x-javascript`, so decode from text
        let text = response
            .text()
            .await
            .map_err(|e| EngineError::Transport(e.to_string()))?;
        let answer: InstantAnswer =
            serde_json::from_str(&text).map_err(|e| EngineError::Parse(e.to_string()))?;

        let results = collect_results(answer, limit);
        Ok(json!({
            "query": query,
            "count": results.len(),
            "results": results,
        }))
    }
}

fn collect_results(answer: InstantAnswer, limit: usize) -> Vec<Value> {
    let mut results = Vec::new();

    if !answer.abstract_text.is_empty() {
        let title = if answer.heading.is_empty() {
            "DuckDuckGo Answer".to_string()
        } else {
            answer.heading
        };
        results.push(json!({
            "title": title,
            "snippet": answer.abstract_text,
            "url": answer.abstract_url,
            "type": "instant_answer",
        }));
    }

    let mut topics: Vec<RelatedTopic> = answer.related_topics.into_iter().rev().collect();
    while let Some(topic) = topics.pop() {
        if results.len() >= limit {
            break;
        }
        if let Some(text) = topic.text {
            let title = text.split(" - ").next().unwrap_or(&text).to_string();
            results.push(json!({
                "title": title,
                "snippet": text,
                "url": topic.first_url,
                "type": "related_topic",
            }));
        }
        topics.extend(topic.topics.into_iter().rev());
    }

    results.truncate(limit);
    results
}

/// Elements whose text is never shown to a reader
const HIDDEN_ELEMENTS: &[&str] = &["script", "style", "noscript", "template"];

/// Visible text of `html` with whitespace collapsed to single spaces
pub fn visible_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut words: Vec<&str> = Vec::new();

    for node in document.root_element().descendants() {
        let Node::Text(text) = node.value() else {
            continue;
        };
        let hidden = node.ancestors().any(|ancestor| match ancestor.value() {
            Node::Element(element) => HIDDEN_ELEMENTS.contains(&element.name()),
            _ => false,
        });
        if !hidden {
            let content: &str = &text.text;
            words.extend(content.split_whitespace());
        }
    }

    words.join(" ")
}

pub struct ExtractTextFromHtml;

#[async_trait]
impl Action for ExtractTextFromHtml {
    fn name(&self) -> &str {
        "extract_text_from_html"
    }

    fn description(&self) -> &str {
        "Strip markup, scripts and styles from HTML and return the readable text"
    }

    fn parameters(&self) -> &[&'static str] {
        &["html"]
    }

    async fn execute(&self, params: &ActionParams) -> Result<Value, EngineError> {
        let html = params.str("html")?;
        let text = visible_text(html);
        debug!(
            "Extracted {} characters from {} bytes of HTML",
            text.chars().count(),
            html.len()
        );

        Ok(json!({
            "character_count": text.chars().count(),
            "text": text,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collect_results_flattens_groups() {
        let answer: InstantAnswer = serde_json::from_value(json!({
            "Abstract": "Paris is the capital of France.",
            "Heading": "Paris",
            "AbstractURL": "https://en.wikipedia.org/wiki/Paris",
            "RelatedTopics": [
                {"Text": "Paris - city", "FirstURL": "https://duckduckgo.com/Paris"},
                {"Name": "Places", "Topics": [
                    {"Text": "Louvre - museum", "FirstURL": "https://duckduckgo.com/Louvre"}
                ]}
            ]
        }))
        .unwrap();

        let results = collect_results(answer, 5);
        assert_eq!(results.len(), 3);
        assert_eq!(results[0]["type"], "instant_answer");
        assert_eq!(results[1]["title"], "Paris");
        assert_eq!(results[2]["title"], "Louvre");
    }

    #[test]
    fn test_collect_results_respects_limit() {
        let answer: InstantAnswer = serde_json::from_value(json!({
            "RelatedTopics": [
                {"Text": "a", "FirstURL": "u1"},
                {"Text": "b", "FirstURL": "u2"},
                {"Text": "c", "FirstURL": "u3"}
            ]
        }))
        .unwrap();
        assert_eq!(collect_results(answer, 2).len(), 2);
    }

    #[tokio::test]
    async fn test_disabled_network() {
        let err = SearchWeb::new(false)
            .execute(&ActionParams::new().with("query", json!("x")))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn test_fetch_rejects_non_http_scheme() {
        let err = FetchUrl::new(true)
            .execute(&ActionParams::new().with("url", json!("file:///etc/passwd")))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[test]
    fn test_visible_text_drops_scripts_and_styles() {
        let html = r#"<html><head><title>Report</title>
            <style>body { color: red; }</style>
            <script>var secret = 1;</script></head>
            <body><h1>Quarterly   results</h1>
            <p>Revenue
               grew.</p><noscript>enable js</noscript></body></html>"#;

        let text = visible_text(html);
        assert_eq!(text, "Report Quarterly results Revenue grew.");
    }

    #[tokio::test]
    async fn test_extract_text_action() {
        let output = ExtractTextFromHtml
            .execute(&ActionParams::new().with("html", json!("<p>a <b>b</b></p>")))
            .await
            .unwrap();
        assert_eq!(output["text"], "a b");
        assert_eq!(output["character_count"], 3);

        let err = ExtractTextFromHtml
            .execute(&ActionParams::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }
}
