use async_stream::try_stream;
use futures_util::{Stream, StreamExt};
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::fragment::Fragment;
use super::sse::SseDecoder;
use super::{FragmentStream, ReplyService};
use crate::error::ServiceError;
use crate::state::{ChatRole, ChatTurn};

pub const DEFAULT_MODEL: &str = "gemini-pro";
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    role: String,
    #[serde(default)]
    parts: Vec<Part>,
}

impl Content {
    fn new(role: &str, text: String) -> Self {
        Self {
            role: role.to_string(),
            parts: vec![Part { text: Some(text) }],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Serialize)]
struct GenerateContentRequest<'a> {
    contents: &'a [Content],
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    error: Option<ApiError>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Deserialize)]
struct ApiError {
    #[serde(default)]
    code: u16,
    #[serde(default)]
    message: String,
}

/// Decode one `data:` payload of the stream into a fragment.
///
/// The text payload is the concatenated text parts of the first candidate.
/// Chunks without candidate content keep only their raw JSON.
fn parse_chunk(data: &str) -> Result<Fragment, ServiceError> {
    let chunk: GenerateContentResponse =
        serde_json::from_str(data).map_err(|e| ServiceError::Malformed(format!("{e}: {data}")))?;

    if let Some(err) = chunk.error {
        return Err(ServiceError::Api(format!("{} {}", err.code, err.message)));
    }

    let text = chunk
        .candidates
        .first()
        .and_then(|c| c.content.as_ref())
        .map(|content| {
            content
                .parts
                .iter()
                .filter_map(|p| p.text.as_deref())
                .collect::<String>()
        });

    Ok(Fragment::new(text, data.to_string()))
}

async fn check_status(response: Response) -> Result<Response, ServiceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    warn!(%status, %body, "Gemini API error response");
    Err(ServiceError::Status { status, body })
}

/// A running Gemini chat conversation.
///
/// The conversation context lives here, client side: a user message and the
/// model's reply are committed together once the reply stream completes. A
/// failed turn leaves the context as it was.
#[derive(Clone)]
pub struct GeminiChat {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
    context: Vec<Content>,
}

impl GeminiChat {
    pub fn new(api_key: &str, model: &str) -> Result<Self, ServiceError> {
        if api_key.trim().is_empty() {
            return Err(ServiceError::MissingApiKey);
        }

        Ok(Self {
            client: Client::new(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            context: Vec::new(),
        })
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    /// Seed the conversation context with turns from an earlier session.
    ///
    /// Only answered exchanges are committed, as during a live session: a
    /// user turn with no reply after it (left behind by a failed turn) is
    /// skipped, so roles in the context always alternate user, model.
    pub fn with_history(mut self, history: &[ChatTurn]) -> Self {
        self.context.clear();
        let mut turns = history.iter().peekable();
        while let Some(turn) = turns.next() {
            if turn.role != ChatRole::User {
                continue;
            }
            if let Some(reply) = turns.next_if(|next| next.role == ChatRole::Assistant) {
                self.context.push(Content::new("user", turn.content.clone()));
                self.context.push(Content::new("model", reply.content.clone()));
            }
        }
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Number of messages in the running conversation context
    pub fn context_len(&self) -> usize {
        self.context.len()
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:streamGenerateContent?alt=sse",
            self.base_url, self.model
        )
    }

    fn reply_stream<'a>(
        &'a mut self,
        text: String,
    ) -> impl Stream<Item = Result<Fragment, ServiceError>> + Send + 'a {
        try_stream! {
            let user = Content::new("user", text);
            let mut contents = self.context.clone();
            contents.push(user.clone());

            debug!(model = %self.model, context = self.context.len(), "sending message");
            let response = self
                .client
                .post(self.endpoint())
                .header("x-goog-api-key", &self.api_key)
                .json(&GenerateContentRequest { contents: &contents })
                .send()
                .await?;

            let response = check_status(response).await?;

            let mut reply = String::new();
            let mut decoder = SseDecoder::new();
            let mut body = response.bytes_stream();

            while let Some(chunk) = body.next().await {
                let chunk = chunk?;
                for data in decoder.push(&chunk) {
                    let fragment = parse_chunk(&data)?;
                    fragment.append_to(&mut reply);
                    yield fragment;
                }
            }
            for data in decoder.finish() {
                let fragment = parse_chunk(&data)?;
                fragment.append_to(&mut reply);
                yield fragment;
            }

            self.context.push(user);
            self.context.push(Content::new("model", reply));
        }
    }
}

impl ReplyService for GeminiChat {
    fn send_message<'a>(&'a mut self, text: &str) -> FragmentStream<'a> {
        Box::pin(self.reply_stream(text.to_string()))
    }

    fn reset(&mut self) {
        self.context.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    /// Serve one canned HTTP response per accepted connection and hand back
    /// the request bodies that were received.
    async fn spawn_server(responses: Vec<String>) -> (String, JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let mut bodies = Vec::new();
            for response in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                bodies.push(read_request_body(&mut socket).await);
                socket.write_all(response.as_bytes()).await.unwrap();
                socket.shutdown().await.unwrap();
            }
            bodies
        });

        (format!("http://{}", addr), handle)
    }

    async fn read_request_body(socket: &mut tokio::net::TcpStream) -> String {
        let mut buf = Vec::new();
        let mut tmp = [0u8; 4096];
        loop {
            let n = socket.read(&mut tmp).await.unwrap();
            buf.extend_from_slice(&tmp[..n]);
            if let Some(end) = find_header_end(&buf) {
                let headers = String::from_utf8_lossy(&buf[..end]).to_lowercase();
                let len = headers
                    .lines()
                    .find_map(|l| l.strip_prefix("content-length:"))
                    .map(|v| v.trim().parse::<usize>().unwrap())
                    .unwrap_or(0);
                while buf.len() < end + 4 + len {
                    let n = socket.read(&mut tmp).await.unwrap();
                    if n == 0 {
                        break;
                    }
                    buf.extend_from_slice(&tmp[..n]);
                }
                return String::from_utf8_lossy(&buf[end + 4..]).to_string();
            }
            if n == 0 {
                return String::new();
            }
        }
    }

    fn find_header_end(buf: &[u8]) -> Option<usize> {
        buf.windows(4).position(|w| w == b"\r\n\r\n")
    }

    fn sse_response(chunks: &[&str]) -> String {
        let mut body = String::new();
        for chunk in chunks {
            let json = serde_json::json!({
                "candidates": [{ "content": { "role": "model", "parts": [{ "text": chunk }] } }]
            });
            body.push_str(&format!("data: {}\r\n\r\n", json));
        }
        format!(
            "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nConnection: close\r\n\r\n{}",
            body
        )
    }

    fn local_chat(base_url: &str) -> GeminiChat {
        let client = Client::builder().no_proxy().build().unwrap();
        GeminiChat::new("test-key", DEFAULT_MODEL)
            .unwrap()
            .with_client(client)
            .with_base_url(base_url)
    }

    async fn collect_reply(chat: &mut GeminiChat, text: &str) -> Result<String, ServiceError> {
        let mut stream = chat.send_message(text);
        let mut reply = String::new();
        while let Some(fragment) = stream.next().await {
            fragment?.append_to(&mut reply);
        }
        Ok(reply)
    }

    #[test]
    fn test_missing_api_key() {
        assert!(matches!(
            GeminiChat::new("  ", DEFAULT_MODEL),
            Err(ServiceError::MissingApiKey)
        ));
    }

    #[test]
    fn test_endpoint() {
        let chat = GeminiChat::new("key", "gemini-pro")
            .unwrap()
            .with_base_url("http://localhost:9000/");
        assert_eq!(
            chat.endpoint(),
            "http://localhost:9000/v1beta/models/gemini-pro:streamGenerateContent?alt=sse"
        );
    }

    #[test]
    fn test_parse_chunk_joins_parts() {
        let data = r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"Hel"},{"text":"lo"}]}}]}"#;
        let fragment = parse_chunk(data).unwrap();
        assert_eq!(fragment.payload(), Some("Hello"));
    }

    #[test]
    fn test_parse_chunk_without_candidates_falls_back_to_raw() {
        let data = r#"{"promptFeedback":{"blockReason":"SAFETY"}}"#;
        let fragment = parse_chunk(data).unwrap();
        assert_eq!(fragment.payload(), None);
        assert_eq!(fragment.to_string(), data);
    }

    #[test]
    fn test_parse_chunk_error_object() {
        let data = r#"{"error":{"code":429,"message":"quota exceeded","status":"RESOURCE_EXHAUSTED"}}"#;
        assert!(matches!(parse_chunk(data), Err(ServiceError::Api(_))));
    }

    #[test]
    fn test_parse_chunk_malformed() {
        assert!(matches!(parse_chunk("{not json"), Err(ServiceError::Malformed(_))));
    }

    #[test]
    fn test_with_history_maps_roles() {
        let chat = GeminiChat::new("key", DEFAULT_MODEL)
            .unwrap()
            .with_history(&[ChatTurn::user("a"), ChatTurn::assistant("b")]);
        assert_eq!(chat.context_len(), 2);
        assert_eq!(chat.context[1].role, "model");
        assert_eq!(chat.model(), DEFAULT_MODEL);
    }

    #[test]
    fn test_with_history_skips_unanswered_user_turns() {
        let chat = GeminiChat::new("key", DEFAULT_MODEL).unwrap().with_history(&[
            ChatTurn::user("lost"),
            ChatTurn::user("a"),
            ChatTurn::assistant("b"),
            ChatTurn::user("Hi"),
        ]);
        let roles: Vec<&str> = chat.context.iter().map(|c| c.role.as_str()).collect();
        assert_eq!(roles, vec!["user", "model"]);
        assert_eq!(chat.context[0].parts[0].text.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn test_resumed_after_failed_turn_sends_alternating_roles() {
        let (base_url, server) = spawn_server(vec![sse_response(&["ok"])]).await;
        let mut chat = local_chat(&base_url).with_history(&[
            ChatTurn::user("a"),
            ChatTurn::assistant("b"),
            ChatTurn::user("Hi"),
        ]);

        assert_eq!(collect_reply(&mut chat, "again").await.unwrap(), "ok");

        let bodies = server.await.unwrap();
        let sent: serde_json::Value = serde_json::from_str(&bodies[0]).unwrap();
        let roles: Vec<&str> = sent["contents"]
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["role"].as_str().unwrap())
            .collect();
        assert_eq!(roles, vec!["user", "model", "user"]);
        assert_eq!(sent["contents"][2]["parts"][0]["text"], "again");
    }

    #[tokio::test]
    async fn test_streams_reply_and_commits_context() {
        let (base_url, server) = spawn_server(vec![
            sse_response(&["Hi", " there"]),
            sse_response(&["Again"]),
        ])
        .await;
        let mut chat = local_chat(&base_url);

        assert_eq!(collect_reply(&mut chat, "Hi").await.unwrap(), "Hi there");
        assert_eq!(chat.context_len(), 2);

        assert_eq!(collect_reply(&mut chat, "More").await.unwrap(), "Again");
        assert_eq!(chat.context_len(), 4);

        let bodies = server.await.unwrap();
        let second: serde_json::Value = serde_json::from_str(&bodies[1]).unwrap();
        let contents = second["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[0]["parts"][0]["text"], "Hi");
        assert_eq!(contents[1]["role"], "model");
        assert_eq!(contents[1]["parts"][0]["text"], "Hi there");
        assert_eq!(contents[2]["parts"][0]["text"], "More");
    }

    #[tokio::test]
    async fn test_error_status_leaves_context_untouched() {
        let body = r#"{"error":{"code":400,"message":"API key not valid"}}"#;
        let response = format!(
            "HTTP/1.1 400 Bad Request\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            body.len(),
            body
        );
        let (base_url, _server) = spawn_server(vec![response]).await;
        let mut chat = local_chat(&base_url);

        let err = collect_reply(&mut chat, "Hi").await.unwrap_err();
        match err {
            ServiceError::Status { status, body } => {
                assert_eq!(status.as_u16(), 400);
                assert!(body.contains("API key not valid"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(chat.context_len(), 0);
    }

    #[tokio::test]
    async fn test_reset_clears_context() {
        let (base_url, _server) = spawn_server(vec![sse_response(&["ok"])]).await;
        let mut chat = local_chat(&base_url);

        collect_reply(&mut chat, "Hi").await.unwrap();
        assert_eq!(chat.context_len(), 2);
        chat.reset();
        assert_eq!(chat.context_len(), 0);
    }
}
