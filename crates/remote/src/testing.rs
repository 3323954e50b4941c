//! Minimal scripted HTTP server for exercising the clients over real
//! sockets.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::Mutex;

use atelier_core::AuthSession;

pub fn session(user_id: &str) -> AuthSession {
    AuthSession {
        user_id: user_id.to_string(),
        access_token: format!("token-{}", user_id),
    }
}

#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub request_line: String,
    pub headers: HashMap<String, String>,
    pub body: String,
}

#[derive(Debug, Clone)]
pub struct MockResponse {
    pub status: u16,
    pub body: Vec<u8>,
    pub content_type: &'static str,
}

impl MockResponse {
    pub fn json(status: u16, body: &str) -> Self {
        Self {
            status,
            body: body.as_bytes().to_vec(),
            content_type: "application/json",
        }
    }

    pub fn bytes(status: u16, body: Vec<u8>) -> Self {
        Self {
            status,
            body,
            content_type: "application/octet-stream",
        }
    }
}

fn header_end_offset(buffer: &[u8]) -> Option<usize> {
    buffer.windows(4).position(|window| window == b"\r\n\r\n")
}

fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        400 => "Bad Request",
        404 => "Not Found",
        500 => "Internal Server Error",
        _ => "Error",
    }
}

async fn read_http_request(stream: &mut tokio::net::TcpStream) -> Option<CapturedRequest> {
    let mut buffer = Vec::new();
    loop {
        let mut chunk = [0_u8; 2048];
        let read = stream.read(&mut chunk).await.ok()?;
        if read == 0 {
            return None;
        }
        buffer.extend_from_slice(&chunk[..read]);
        if header_end_offset(&buffer).is_some() {
            break;
        }
    }

    let header_end = header_end_offset(&buffer)?;
    let head = String::from_utf8_lossy(&buffer[..header_end]).to_string();
    let mut lines = head.lines();
    let request_line = lines.next()?.to_string();

    let mut headers = HashMap::new();
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }

    let content_length = headers
        .get("content-length")
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(0);

    let mut body = buffer[header_end + 4..].to_vec();
    while body.len() < content_length {
        let mut chunk = [0_u8; 2048];
        let read = stream.read(&mut chunk).await.ok()?;
        if read == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..read]);
    }

    Some(CapturedRequest {
        request_line,
        headers,
        body: String::from_utf8_lossy(&body).to_string(),
    })
}

async fn write_http_response(
    stream: &mut tokio::net::TcpStream,
    response: &MockResponse,
) -> std::io::Result<()> {
    let head = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        response.status,
        status_text(response.status),
        response.content_type,
        response.body.len(),
    );
    stream.write_all(head.as_bytes()).await?;
    stream.write_all(&response.body).await?;
    stream.flush().await
}

/// Start a one-shot-per-connection HTTP server that answers with the given
/// responses in order and records every request it sees.
pub async fn start_mock_server(
    responses: Vec<MockResponse>,
) -> (
    String,
    Arc<Mutex<Vec<CapturedRequest>>>,
    tokio::task::JoinHandle<()>,
) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let addr = listener.local_addr().expect("listener addr");
    let captured = Arc::new(Mutex::new(Vec::<CapturedRequest>::new()));
    let scripted = Arc::new(Mutex::new(VecDeque::from(responses)));
    let captured_clone = Arc::clone(&captured);
    let scripted_clone = Arc::clone(&scripted);

    let handle = tokio::spawn(async move {
        loop {
            let (mut stream, _) = match listener.accept().await {
                Ok(value) => value,
                Err(_) => break,
            };
            let captured_inner = Arc::clone(&captured_clone);
            let scripted_inner = Arc::clone(&scripted_clone);
            tokio::spawn(async move {
                let Some(request) = read_http_request(&mut stream).await else {
                    return;
                };
                captured_inner.lock().await.push(request);

                let response = scripted_inner
                    .lock()
                    .await
                    .pop_front()
                    .unwrap_or_else(|| MockResponse::json(500, r#"{"message":"unexpected request"}"#));
                let _ = write_http_response(&mut stream, &response).await;
            });
        }
    });

    (format!("http://{}", addr), captured, handle)
}
