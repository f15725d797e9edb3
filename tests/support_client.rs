use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

pub type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub const READ_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn connect(url: &str) -> Result<Client, String> {
    let (client, _) = connect_async(url)
        .await
        .map_err(|err| format!("connect failed: {}", err))?;
    Ok(client)
}

pub async fn send_text(client: &mut Client, text: &str) -> Result<(), String> {
    client
        .send(Message::Text(text.to_owned()))
        .await
        .map_err(|err| format!("send failed: {}", err))
}

/// Reads frames until a JSON object whose `type` equals `kind` arrives.
/// Metric pushes and other replies are skipped.
pub async fn next_of_type(client: &mut Client, kind: &str) -> Result<Value, String> {
    tokio::time::timeout(READ_TIMEOUT, async {
        loop {
            match client.next().await {
                Some(Ok(Message::Text(text))) => {
                    let value: Value = serde_json::from_str(&text)
                        .map_err(|err| format!("invalid json {}: {}", text, err))?;
                    if value.get("type").and_then(Value::as_str) == Some(kind) {
                        return Ok(value);
                    }
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => return Err(format!("read failed: {}", err)),
                None => return Err(format!("stream ended before `{}`", kind)),
            }
        }
    })
    .await
    .map_err(|err| format!("timed out waiting for `{}`: {}", kind, err))?
}

/// Reads until the server closes the stream. Returns every text frame seen.
pub async fn read_until_closed(client: &mut Client, limit: Duration) -> Result<Vec<Value>, String> {
    tokio::time::timeout(limit, async {
        let mut seen = Vec::new();
        while let Some(frame) = client.next().await {
            match frame {
                Ok(Message::Text(text)) => {
                    if let Ok(value) = serde_json::from_str::<Value>(&text) {
                        seen.push(value);
                    }
                }
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(_) => break,
            }
        }
        seen
    })
    .await
    .map_err(|err| format!("connection was not closed in time: {}", err))
}

/// Minimal HTTP/1.1 GET returning status and body.
pub async fn http_get(addr: SocketAddr, path: &str) -> Result<(u16, String), String> {
    http_request(addr, "GET", path).await
}

/// Sends a body-less request and returns status and body.
pub async fn http_request(
    addr: SocketAddr,
    method: &str,
    path: &str,
) -> Result<(u16, String), String> {
    let mut stream = TcpStream::connect(addr)
        .await
        .map_err(|err| format!("connect failed: {}", err))?;
    let request = format!(
        "{} {} HTTP/1.1\r\nHost: {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        method, path, addr
    );
    stream
        .write_all(request.as_bytes())
        .await
        .map_err(|err| format!("write failed: {}", err))?;
    let mut raw = Vec::new();
    tokio::time::timeout(READ_TIMEOUT, stream.read_to_end(&mut raw))
        .await
        .map_err(|err| format!("http read timed out: {}", err))?
        .map_err(|err| format!("read failed: {}", err))?;
    let text = String::from_utf8_lossy(&raw).into_owned();
    let (head, body) = text
        .split_once("\r\n\r\n")
        .ok_or_else(|| format!("malformed response: {}", text))?;
    let status = head
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse::<u16>().ok())
        .ok_or_else(|| format!("missing status in {}", head))?;
    Ok((status, body.to_owned()))
}

pub async fn metrics_text(addr: SocketAddr) -> Result<String, String> {
    let (status, body) = http_get(addr, "/metrics").await?;
    if status != 200 {
        return Err(format!("/metrics returned {}", status));
    }
    Ok(body)
}

/// Polls `/metrics` until `line` shows up.
pub async fn wait_for_metric(addr: SocketAddr, line: &str) -> Result<String, String> {
    let started = tokio::time::Instant::now();
    loop {
        let body = metrics_text(addr).await?;
        if body.lines().any(|candidate| candidate == line) {
            return Ok(body);
        }
        if started.elapsed() >= READ_TIMEOUT {
            return Err(format!("metric `{}` never appeared in:\n{}", line, body));
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

/// Reads past data frames until the peer's close frame. Fails if the stream
/// ends or errors without one.
pub async fn expect_close_reply(client: &mut Client) -> Result<(), String> {
    tokio::time::timeout(READ_TIMEOUT, async {
        loop {
            match client.next().await {
                Some(Ok(Message::Close(_))) => return Ok(()),
                Some(Ok(_)) => {}
                Some(Err(err)) => return Err(format!("closed without a reply: {}", err)),
                None => return Err("stream ended without a close reply".to_owned()),
            }
        }
    })
    .await
    .map_err(|err| format!("timed out waiting for the close reply: {}", err))?
}
