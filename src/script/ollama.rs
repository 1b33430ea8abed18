use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::LlmConfig;
use crate::error::{Result, SkitError};
use super::{parse_script_response, ScriptGenerator, ScriptModel};

#[derive(Debug, Clone, Serialize)]
pub struct GenerateRequest {
    pub model: String,
    pub system: String,
    pub prompt: String,
    pub format: String,
    pub stream: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GenerateResponse {
    pub response: String,
}

/// Dialogue writer backed by an Ollama server
pub struct OllamaScriptGenerator {
    client: Client,
    config: LlmConfig,
    actors: BTreeSet<String>,
}

impl OllamaScriptGenerator {
    pub fn new(config: LlmConfig, actors: BTreeSet<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            config,
            actors,
        })
    }

    async fn request_once(&self, topic: &str) -> Result<String> {
        let request = GenerateRequest {
            model: self.config.model.clone(),
            system: self.config.system_prompt.clone(),
            prompt: format!("TOPIC: {}", topic),
            format: "json".to_string(),
            stream: false,
        };

        let url = format!("{}/api/generate", self.config.endpoint.trim_end_matches('/'));
        debug!("Sending script request to: {}", url);

        let response = self.client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| SkitError::ScriptGeneration(format!("HTTP request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(SkitError::ScriptGeneration(format!(
                "Ollama API error {}: {}", status, error_text
            )));
        }

        let body: GenerateResponse = response.json().await
            .map_err(|e| SkitError::ScriptGeneration(format!("Failed to parse response: {}", e)))?;

        debug!("Raw Ollama response: {}", body.response);
        Ok(body.response)
    }
}

#[async_trait]
impl ScriptGenerator for OllamaScriptGenerator {
    async fn generate(&self, topic: &str) -> Result<ScriptModel> {
        info!("Generating script for topic: {}", topic);

        let attempts = self.config.max_retries.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            let outcome = match self.request_once(topic).await {
                Ok(raw) => parse_script_response(&raw, topic, &self.actors, self.config.max_lines),
                Err(e) => Err(e),
            };

            match outcome {
                Ok(script) => {
                    info!("Script generated with {} lines", script.len());
                    return Ok(script);
                }
                Err(e) => {
                    warn!("Script attempt {}/{} failed: {}", attempt, attempts, e);
                    last_error = Some(e);
                }
            }
        }

        Err(match last_error {
            Some(SkitError::ScriptGeneration(cause)) => SkitError::ScriptGeneration(format!(
                "Gave up after {} attempts: {}", attempts, cause
            )),
            Some(other) => SkitError::ScriptGeneration(other.to_string()),
            None => SkitError::ScriptGeneration("No attempts were made".to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    const VALID_SCRIPT: &str = r#"{"script": [{"actor": "A", "line": "hi"}, {"actor": "B", "line": "yo"}]}"#;

    /// Local stand-in for `/api/generate`: the first `bad_replies` requests
    /// get prose instead of a script, later ones a valid script
    struct MockOllama {
        addr: SocketAddr,
        hits: Arc<AtomicUsize>,
        last_body: Arc<Mutex<String>>,
    }

    impl MockOllama {
        async fn start(bad_replies: usize) -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            let hits = Arc::new(AtomicUsize::new(0));
            let last_body = Arc::new(Mutex::new(String::new()));

            let (task_hits, task_body) = (hits.clone(), last_body.clone());
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let hit = task_hits.fetch_add(1, Ordering::SeqCst);
                    let reply = if hit < bad_replies {
                        "Sure! Here is a fun dialogue about cats.".to_string()
                    } else {
                        VALID_SCRIPT.to_string()
                    };
                    serve_one(stream, &reply, &task_body).await;
                }
            });

            Self { addr, hits, last_body }
        }

        fn endpoint(&self) -> String {
            format!("http://{}", self.addr)
        }

        fn hits(&self) -> usize {
            self.hits.load(Ordering::SeqCst)
        }
    }

    async fn serve_one(mut stream: TcpStream, reply: &str, last_body: &Mutex<String>) {
        let mut received = Vec::new();
        let mut chunk = [0u8; 4096];
        let header_end = loop {
            let n = stream.read(&mut chunk).await.unwrap();
            if n == 0 {
                return;
            }
            received.extend_from_slice(&chunk[..n]);
            if let Some(pos) = received.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
        };

        let headers = String::from_utf8_lossy(&received[..header_end]).to_lowercase();
        let content_length: usize = headers
            .lines()
            .find_map(|line| line.strip_prefix("content-length:"))
            .map(|v| v.trim().parse().unwrap())
            .unwrap_or(0);
        while received.len() < header_end + content_length {
            let n = stream.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            received.extend_from_slice(&chunk[..n]);
        }
        *last_body.lock().unwrap() = String::from_utf8_lossy(&received[header_end..]).to_string();

        let body = serde_json::json!({ "model": "test", "response": reply, "done": true }).to_string();
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            body.len(),
            body
        );
        stream.write_all(response.as_bytes()).await.unwrap();
        stream.shutdown().await.unwrap();
    }

    fn generator(endpoint: String, max_retries: u32) -> OllamaScriptGenerator {
        let mut config = Config::default().llm;
        config.endpoint = endpoint;
        config.max_retries = max_retries;
        config.timeout_secs = 5;
        let actors: BTreeSet<String> = ["A", "B"].iter().map(|s| s.to_string()).collect();
        OllamaScriptGenerator::new(config, actors).unwrap()
    }

    #[tokio::test]
    async fn test_malformed_replies_are_retried_until_a_script_arrives() {
        let upstream = MockOllama::start(2).await;
        let generator = generator(upstream.endpoint(), 3);

        let script = generator.generate("cats").await.unwrap();

        assert_eq!(upstream.hits(), 3);
        assert_eq!(script.topic, "cats");
        assert_eq!(script.len(), 2);
        assert_eq!(script.lines[1].actor.as_str(), "B");

        let request: serde_json::Value = serde_json::from_str(&upstream.last_body.lock().unwrap()).unwrap();
        assert_eq!(request["prompt"], "TOPIC: cats");
        assert_eq!(request["format"], "json");
        assert_eq!(request["stream"], false);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let upstream = MockOllama::start(usize::MAX).await;
        let generator = generator(upstream.endpoint(), 2);

        let err = generator.generate("cats").await.unwrap_err();

        assert_eq!(upstream.hits(), 2);
        match err {
            SkitError::ScriptGeneration(message) => {
                assert!(message.starts_with("Gave up after 2 attempts"), "unexpected message: {}", message);
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_unreachable_server_is_a_script_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let err = generator(endpoint, 1).generate("cats").await.unwrap_err();
        assert!(matches!(err, SkitError::ScriptGeneration(_)));
    }
}
