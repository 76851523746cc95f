//! Question/answer generation through an OpenAI-compatible chat completions
//! endpoint.

use async_trait::async_trait;
use gleaner_core::config::GeneratorConfig;
use gleaner_scheduler::{QaGenerator, QaPair};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::SourceError;

const SYSTEM_PROMPT: &str = "You write FAQ entries for a website. \
Read the page text and write question/answer pairs a visitor would find useful. \
Answer only from the text. \
Reply with a JSON array of objects with \"question\" and \"answer\" string fields and nothing else.";

pub struct LlmQaGenerator {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
    max_tokens: u32,
    max_pairs: usize,
    max_input_chars: usize,
}

impl LlmQaGenerator {
    /// Without an API key (in config or `OPENAI_API_KEY`), requests are sent
    /// unauthenticated, which suits local OpenAI-compatible servers.
    pub fn new(config: &GeneratorConfig) -> Self {
        let api_key = config
            .api_key
            .clone()
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .filter(|k| !k.is_empty());
        if api_key.is_none() {
            warn!("no API key configured for QA generation");
        }
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            max_pairs: config.max_pairs,
            max_input_chars: config.max_input_chars,
        }
    }

    async fn complete(&self, text: &str) -> Result<String, SourceError> {
        let body = build_request_body(
            &self.model,
            self.max_tokens,
            self.max_pairs,
            truncate_chars(text, self.max_input_chars),
        );
        let url = format!("{}/v1/chat/completions", self.base_url);

        debug!(model = %self.model, bytes = text.len(), "requesting QA pairs");

        let mut req = self
            .client
            .post(&url)
            .header("content-type", "application/json")
            .json(&body);
        if let Some(ref key) = self.api_key {
            req = req.bearer_auth(key);
        }
        let resp = req.send().await?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "QA generation API error");
            return Err(SourceError::Api {
                status,
                message: text,
            });
        }

        let api_resp: ApiResponse = resp
            .json()
            .await
            .map_err(|e| SourceError::Parse(e.to_string()))?;

        Ok(api_resp
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default())
    }
}

#[async_trait]
impl QaGenerator for LlmQaGenerator {
    async fn generate(&self, text: &str) -> Vec<QaPair> {
        let content = match self.complete(text).await {
            Ok(content) => content,
            Err(e) => {
                warn!("QA generation failed: {e}");
                return Vec::new();
            }
        };
        match parse_pairs(&content, self.max_pairs) {
            Ok(pairs) => {
                info!(pairs = pairs.len(), "QA pairs generated");
                pairs
            }
            Err(e) => {
                warn!("unusable QA generation reply: {e}");
                Vec::new()
            }
        }
    }
}

fn build_request_body(
    model: &str,
    max_tokens: u32,
    max_pairs: usize,
    text: &str,
) -> serde_json::Value {
    serde_json::json!({
        "model": model,
        "messages": [
            { "role": "system", "content": SYSTEM_PROMPT },
            {
                "role": "user",
                "content": format!("Write at most {max_pairs} pairs.\n\nPage text:\n{text}"),
            },
        ],
        "max_tokens": max_tokens,
        "temperature": 0.2,
        "stream": false,
    })
}

/// Longest prefix of `text` with at most `max` chars, cut on a char boundary.
pub fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Pull QA pairs out of a model reply.
///
/// Accepts a bare JSON array, one wrapped in a code fence or surrounded by
/// prose, or an object holding the array under `pairs`, `qa_pairs`,
/// `qaPairs` or `faq`. Pairs with an empty side are dropped.
pub fn parse_pairs(reply: &str, max: usize) -> Result<Vec<QaPair>, SourceError> {
    let raw: Vec<RawPair> = match json_slice(reply, '[', ']') {
        Some(slice) => serde_json::from_str(slice).map_err(|e| SourceError::Parse(e.to_string()))?,
        None => {
            let slice = json_slice(reply, '{', '}')
                .ok_or_else(|| SourceError::Parse("no JSON in reply".to_string()))?;
            serde_json::from_str::<Wrapped>(slice)
                .map_err(|e| SourceError::Parse(e.to_string()))?
                .pairs
        }
    };

    Ok(raw
        .into_iter()
        .filter_map(|p| {
            let (q, a) = (p.question.trim(), p.answer.trim());
            (!q.is_empty() && !a.is_empty()).then(|| QaPair::new(q, a))
        })
        .take(max)
        .collect())
}

/// Text from the first `open` to the last `close`, inclusive.
fn json_slice(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    (end > start).then(|| &text[start..=end])
}

#[derive(Deserialize)]
struct RawPair {
    #[serde(alias = "q", default)]
    question: String,
    #[serde(alias = "a", default)]
    answer: String,
}

#[derive(Deserialize)]
struct Wrapped {
    #[serde(alias = "qa_pairs", alias = "qaPairs", alias = "faq")]
    pairs: Vec<RawPair>,
}

#[derive(Deserialize)]
struct ApiResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn parses_bare_array() {
        let pairs = parse_pairs(
            r#"[{"question":"What?","answer":"Hello world."}]"#,
            10,
        )
        .unwrap();
        assert_eq!(pairs, vec![QaPair::new("What?", "Hello world.")]);
    }

    #[test]
    fn parses_fenced_array_with_prose() {
        let reply = "Sure! Here are the pairs:\n```json\n[\n  {\"question\": \" Who? \", \"answer\": \"Us.\"},\n  {\"question\": \"Where?\", \"answer\": \"Here.\"}\n]\n```\nLet me know if you need more.";
        let pairs = parse_pairs(reply, 10).unwrap();
        assert_eq!(
            pairs,
            vec![QaPair::new("Who?", "Us."), QaPair::new("Where?", "Here.")]
        );
    }

    #[test]
    fn parses_wrapped_object() {
        let reply = r#"{"qa_pairs": [{"q": "Why?", "a": "Because."}]}"#;
        assert_eq!(
            parse_pairs(reply, 10).unwrap(),
            vec![QaPair::new("Why?", "Because.")]
        );
    }

    #[test]
    fn drops_empty_pairs_and_caps_count() {
        let reply = r#"[
            {"question": "", "answer": "orphan"},
            {"question": "One?", "answer": "1"},
            {"question": "Two?", "answer": "2"},
            {"question": "Three?", "answer": "3"}
        ]"#;
        let pairs = parse_pairs(reply, 2).unwrap();
        assert_eq!(pairs, vec![QaPair::new("One?", "1"), QaPair::new("Two?", "2")]);
    }

    #[test]
    fn prose_only_reply_is_error() {
        assert!(parse_pairs("I could not find any questions.", 10).is_err());
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("short", 100), "short");
        assert_eq!(truncate_chars("", 3), "");
    }

    #[test]
    fn request_body_carries_model_and_limits() {
        let body = build_request_body("gpt-4o-mini", 512, 5, "page");
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["max_tokens"], 512);
        assert_eq!(body["messages"][0]["role"], "system");
        let user = body["messages"][1]["content"].as_str().unwrap();
        assert!(user.contains("at most 5 pairs"));
        assert!(user.ends_with("page"));
    }

    async fn serve_once(status: &str, body: &str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let response = format!(
            "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
            body.len()
        );
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 8192];
            let _ = socket.read(&mut buf).await;
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
        });
        format!("http://{addr}")
    }

    fn generator(base_url: String) -> LlmQaGenerator {
        LlmQaGenerator::new(&GeneratorConfig {
            base_url,
            api_key: Some("test-key".to_string()),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn generates_pairs_from_completion() {
        let completion = serde_json::json!({
            "choices": [{
                "message": {
                    "content": "```json\n[{\"question\":\"What?\",\"answer\":\"Hello world.\"}]\n```"
                }
            }]
        })
        .to_string();
        let url = serve_once("200 OK", &completion).await;

        let pairs = generator(url).generate("Hello world.").await;

        assert_eq!(pairs, vec![QaPair::new("What?", "Hello world.")]);
    }

    #[tokio::test]
    async fn api_error_yields_no_pairs() {
        let url = serve_once("500 Internal Server Error", r#"{"error":"boom"}"#).await;
        assert!(generator(url).generate("text").await.is_empty());
    }
}
