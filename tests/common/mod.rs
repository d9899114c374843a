// tests/common/mod.rs
// Canned-response HTTP fixture for exercising clients without real services

#![allow(dead_code)]

use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Serve one canned HTTP response per incoming connection, in order, then
/// stop accepting. Returns the base URL. Each response closes its
/// connection so the client opens a fresh one per request.
pub async fn serve_responses(responses: Vec<String>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let responses = Arc::new(responses);

    tokio::spawn(async move {
        for response in responses.iter() {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            // Drain the request head and body enough to unblock the client
            let mut buf = vec![0u8; 65536];
            let mut read_total = 0usize;
            loop {
                match socket.read(&mut buf[read_total..]).await {
                    Ok(0) => break,
                    Ok(n) => {
                        read_total += n;
                        let head = String::from_utf8_lossy(&buf[..read_total]);
                        if let Some(header_end) = head.find("\r\n\r\n") {
                            let content_length = head
                                .lines()
                                .find_map(|l| {
                                    let (name, value) = l.split_once(':')?;
                                    if name.eq_ignore_ascii_case("content-length") {
                                        value.trim().parse::<usize>().ok()
                                    } else {
                                        None
                                    }
                                })
                                .unwrap_or(0);
                            if read_total >= header_end + 4 + content_length {
                                break;
                            }
                        }
                        if read_total == buf.len() {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        }
    });

    format!("http://{addr}")
}

/// Build an HTTP/1.1 response with a JSON body and Connection: close.
pub fn json_response(status: &str, extra_headers: &[(&str, &str)], body: &str) -> String {
    let mut headers = String::new();
    for (name, value) in extra_headers {
        headers.push_str(&format!("{name}: {value}\r\n"));
    }
    format!(
        "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n{headers}\r\n{body}",
        body.len()
    )
}

/// A successful upstream messages-API response with the given text.
pub fn message_response(text: &str) -> String {
    let body = serde_json::json!({
        "id": "msg_test",
        "type": "message",
        "role": "assistant",
        "content": [{"type": "text", "text": text}],
        "usage": {"input_tokens": 10, "output_tokens": 5},
    })
    .to_string();
    json_response("200 OK", &[], &body)
}

/// An embedding-service response with `count` vectors of dimension `dim`.
pub fn embeddings_response(count: usize, dim: usize) -> String {
    let vector: Vec<f32> = vec![0.1; dim];
    let embeddings: Vec<&Vec<f32>> = (0..count).map(|_| &vector).collect();
    let body = serde_json::json!({ "embeddings": embeddings }).to_string();
    json_response("200 OK", &[], &body)
}
