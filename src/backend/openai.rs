//! OpenAI-compatible chat completions backend.
//!
//! # Responsibilities
//! - POST `{base_url}/chat/completions` with the prompt as a single user message
//! - Forward call options as top-level request fields
//! - Decode `choices[0].message.content`, or `choices[0].delta.content`
//!   from server-sent events when streaming
//!
//! # Design Decisions
//! - The HTTP client carries the request timeout; the proxy never adds one
//! - Non-2xx responses become `BackendError::Status` with the body preserved

use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt};
use serde_json::{json, Map, Value};
use url::Url;

use crate::backend::{BackendError, ChunkStream, InferenceBackend, InvokeOptions};

pub struct OpenAiBackend {
    client: reqwest::Client,
    endpoint: Url,
    api_key: Option<String>,
    default_model: String,
    timeout: Duration,
}

impl OpenAiBackend {
    pub fn new(
        base_url: &str,
        default_model: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, BackendError> {
        let mut base = Url::parse(base_url)
            .map_err(|e| BackendError::Request(format!("invalid base url {base_url}: {e}")))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let endpoint = base
            .join("chat/completions")
            .map_err(|e| BackendError::Request(e.to_string()))?;

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::Request(e.to_string()))?;

        Ok(Self {
            client,
            endpoint,
            api_key,
            default_model: default_model.into(),
            timeout,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn request_body(&self, prompt: &str, options: &InvokeOptions, stream: bool) -> Value {
        let mut body = Map::new();
        body.insert(
            "model".to_string(),
            Value::String(options.model().unwrap_or(&self.default_model).to_string()),
        );
        body.insert(
            "messages".to_string(),
            json!([{ "role": "user", "content": prompt }]),
        );
        for (key, value) in options.iter() {
            if key != "model" {
                body.insert(key.clone(), value.clone());
            }
        }
        if stream {
            body.insert("stream".to_string(), Value::Bool(true));
        }
        Value::Object(body)
    }

    async fn send(&self, body: &Value) -> Result<reqwest::Response, BackendError> {
        let mut request = self.client.post(self.endpoint.clone()).json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| self.classify(e))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    fn classify(&self, err: reqwest::Error) -> BackendError {
        if err.is_timeout() {
            BackendError::Timeout(self.timeout)
        } else {
            BackendError::Request(err.to_string())
        }
    }
}

#[async_trait]
impl InferenceBackend for OpenAiBackend {
    async fn invoke(&self, prompt: &str, options: &InvokeOptions) -> Result<String, BackendError> {
        let body = self.request_body(prompt, options, false);
        let response = self.send(&body).await?;
        let payload: Value = response.json().await.map_err(|e| self.classify(e))?;

        payload
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| BackendError::Decode("missing choices[0].message.content".to_string()))
    }

    async fn stream(&self, prompt: &str, options: &InvokeOptions) -> Result<ChunkStream, BackendError> {
        let body = self.request_body(prompt, options, true);
        let response = self.send(&body).await?;
        let timeout = self.timeout;

        let bytes = response
            .bytes_stream()
            .map(move |chunk| {
                chunk.map(|b| b.to_vec()).map_err(|e| {
                    if e.is_timeout() {
                        BackendError::Timeout(timeout)
                    } else {
                        BackendError::Request(e.to_string())
                    }
                })
            })
            .boxed();

        Ok(sse_chunks(bytes))
    }
}

enum SseEvent {
    Chunk(String),
    Done,
}

struct SseState {
    body: BoxStream<'static, Result<Vec<u8>, BackendError>>,
    buffer: Vec<u8>,
    eof: bool,
    done: bool,
}

/// Turn a raw SSE byte stream into content deltas.
fn sse_chunks(body: BoxStream<'static, Result<Vec<u8>, BackendError>>) -> ChunkStream {
    let state = SseState {
        body,
        buffer: Vec::new(),
        eof: false,
        done: false,
    };

    stream::unfold(state, |mut st| async move {
        loop {
            if st.done {
                return None;
            }

            if let Some(pos) = st.buffer.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = st.buffer.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&line);
                match parse_sse_line(line.trim()) {
                    Some(Ok(SseEvent::Chunk(text))) => return Some((Ok(text), st)),
                    Some(Ok(SseEvent::Done)) => return None,
                    Some(Err(e)) => {
                        st.done = true;
                        return Some((Err(e), st));
                    }
                    None => continue,
                }
            }

            if st.eof {
                if st.buffer.iter().all(u8::is_ascii_whitespace) {
                    return None;
                }
                st.buffer.push(b'\n');
                continue;
            }

            match st.body.next().await {
                Some(Ok(bytes)) => st.buffer.extend_from_slice(&bytes),
                Some(Err(e)) => {
                    st.done = true;
                    return Some((Err(e), st));
                }
                None => st.eof = true,
            }
        }
    })
    .boxed()
}

/// Parse one SSE line. `None` means the line carries no content.
fn parse_sse_line(line: &str) -> Option<Result<SseEvent, BackendError>> {
    let data = line.strip_prefix("data:")?.trim();
    if data == "[DONE]" {
        return Some(Ok(SseEvent::Done));
    }

    let payload: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => return Some(Err(BackendError::Decode(format!("bad stream event: {e}")))),
    };

    if let Some(message) = payload.pointer("/error/message").and_then(Value::as_str) {
        return Some(Err(BackendError::Unavailable(message.to_string())));
    }

    payload
        .pointer("/choices/0/delta/content")
        .and_then(Value::as_str)
        .filter(|text| !text.is_empty())
        .map(|text| Ok(SseEvent::Chunk(text.to_string())))
}
