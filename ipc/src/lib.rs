//! Request transport for the runmate run-server
//!
//! Requests and responses travel as single-line JSON frames over TCP.
//! This crate provides the framing primitives shared by client and
//! daemon, the retrying request client, and the connection-upgrade
//! handshake used by the stdio helpers.

pub mod error;

pub use error::{IpcError, Result};

use std::time::Duration;

use schema::{ClientConfig, Request, Response, StdioRole};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::debug;

/// Maximum allowed frame size (64KB)
/// This prevents unbounded memory growth from malicious or buggy peers
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Serialize `value` as one newline-terminated frame.
pub async fn write_frame<W, T>(writer: &mut W, value: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut data = serde_json::to_vec(value)
        .map_err(|e| IpcError::SerializationFailed(e.to_string()))?;
    data.push(b'\n');
    writer
        .write_all(&data)
        .await
        .map_err(|e| IpcError::SendFailed(e.to_string()))
}

/// Read one newline-terminated frame with bounded buffering.
pub async fn read_frame<R, T>(reader: &mut R) -> Result<T>
where
    R: AsyncBufRead + Unpin,
    T: DeserializeOwned,
{
    let mut buffer = Vec::with_capacity(4096);
    loop {
        let chunk = reader
            .fill_buf()
            .await
            .map_err(|e| IpcError::ReceiveFailed(e.to_string()))?;
        if chunk.is_empty() {
            if buffer.is_empty() {
                return Err(IpcError::EmptyResponse);
            }
            return Err(IpcError::ProtocolError(
                "incomplete frame: connection closed before newline terminator".to_string(),
            ));
        }

        let newline_pos = chunk.iter().position(|b| *b == b'\n');
        let to_copy = newline_pos.map_or(chunk.len(), |idx| idx + 1);
        let next_len = buffer.len() + to_copy;
        if next_len > MAX_FRAME_SIZE {
            return Err(IpcError::ProtocolError(format!(
                "Frame size {next_len} exceeds maximum allowed size of {MAX_FRAME_SIZE} bytes"
            )));
        }

        buffer.extend_from_slice(&chunk[..to_copy]);
        reader.consume(to_copy);
        if newline_pos.is_some() {
            break;
        }
    }

    // Trim trailing newline/carriage return
    if matches!(buffer.last(), Some(b'\n')) {
        buffer.pop();
        if matches!(buffer.last(), Some(b'\r')) {
            buffer.pop();
        }
    }

    serde_json::from_slice(&buffer).map_err(|e| IpcError::DeserializationFailed(e.to_string()))
}

/// Client for sending requests to a run-server daemon
#[derive(Debug, Clone)]
pub struct IpcClient {
    target: String,
    retries: u32,
    retry_delay: Duration,
}

impl IpcClient {
    /// Create a client for the daemon at `target` (`host:port`).
    pub fn new(target: impl Into<String>, config: &ClientConfig) -> Self {
        Self {
            target: target.into(),
            retries: config.retries.max(1),
            retry_delay: Duration::from_millis(config.retry_delay_ms),
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Connect, send one request, and read the response.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection fails, the request cannot be
    /// serialized, or the response cannot be read or deserialized.
    pub async fn send_request(&self, request: &Request) -> Result<Response> {
        debug!("Connecting to daemon at {}", self.target);
        let stream = TcpStream::connect(&self.target)
            .await
            .map_err(|e| IpcError::ConnectionFailed(e.to_string()))?;

        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);

        write_frame(&mut writer, request).await?;
        read_frame(&mut reader).await
    }

    /// Like [`IpcClient::send_request`], but retries refused
    /// connections a bounded number of times with a fixed delay.
    pub async fn send_with_retry(&self, request: &Request) -> Result<Response> {
        for attempt in 0..self.retries {
            match self.send_request(request).await {
                Err(IpcError::ConnectionFailed(e)) => {
                    debug!(
                        "Attempt {}/{} to reach {} failed: {}",
                        attempt + 1,
                        self.retries,
                        self.target,
                        e
                    );
                    if attempt + 1 < self.retries {
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
                other => return other,
            }
        }
        Err(IpcError::ConnectionFailed(
            "Cannot connect to remote server, aborting...".to_string(),
        ))
    }
}

/// Open a TCP connection, retrying refused connects a bounded number
/// of times with a fixed delay.
pub async fn connect_with_retry(target: &str, config: &ClientConfig) -> Result<TcpStream> {
    let retries = config.retries.max(1);
    for attempt in 0..retries {
        match TcpStream::connect(target).await {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                debug!(
                    "Attempt {}/{} to reach {} failed: {}",
                    attempt + 1,
                    retries,
                    target,
                    e
                );
                if attempt + 1 < retries {
                    tokio::time::sleep(Duration::from_millis(config.retry_delay_ms)).await;
                }
            }
        }
    }
    Err(IpcError::ConnectionFailed(
        "Cannot connect to remote server, aborting...".to_string(),
    ))
}

/// Connect to a stdio server and upgrade the connection into a raw
/// byte stream for `session`, retrying refused connections.
///
/// On success the returned stream carries only session bytes; the
/// acknowledgement frame has been consumed.
pub async fn connect_attach(
    target: &str,
    session: &str,
    role: StdioRole,
    config: &ClientConfig,
) -> Result<TcpStream> {
    let mut stream = connect_with_retry(target, config).await?;

    let request = Request::StdioAttach {
        session: session.to_string(),
        role,
    };
    write_frame(&mut stream, &request).await?;

    // Read the acknowledgement byte-by-byte: anything after the
    // newline already belongs to the session stream and must not be
    // swallowed by a buffer.
    let mut line = Vec::new();
    let mut byte = [0_u8; 1];
    loop {
        let n = stream
            .read(&mut byte)
            .await
            .map_err(|e| IpcError::ReceiveFailed(e.to_string()))?;
        if n == 0 {
            return Err(IpcError::ProtocolError(
                "incomplete frame: connection closed before newline terminator".to_string(),
            ));
        }
        if byte[0] == b'\n' {
            break;
        }
        if line.len() >= MAX_FRAME_SIZE {
            return Err(IpcError::ProtocolError(format!(
                "Frame exceeds maximum allowed size of {MAX_FRAME_SIZE} bytes"
            )));
        }
        line.push(byte[0]);
    }
    let response: Response = serde_json::from_slice(&line)
        .map_err(|e| IpcError::DeserializationFailed(e.to_string()))?;
    match response {
        Response::Ack { .. } => Ok(stream),
        Response::Error { message } => Err(IpcError::Rejected(message)),
        other => Err(IpcError::ProtocolError(format!(
            "unexpected attach response: {other:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use schema::ClientConfig;
    use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    fn quick_config() -> ClientConfig {
        ClientConfig {
            retries: 2,
            retry_delay_ms: 10,
        }
    }

    #[tokio::test]
    async fn empty_response_on_immediate_eof() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut reader = BufReader::new(stream);
            let mut request = Vec::new();
            let _ = reader.read_until(b'\n', &mut request).await.unwrap();
        });

        let client = IpcClient::new(addr.to_string(), &quick_config());
        let result = client.send_request(&Request::Ps).await;
        assert!(matches!(result, Err(IpcError::EmptyResponse)));

        server.await.unwrap();
    }

    #[tokio::test]
    async fn protocol_error_on_incomplete_frame() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut reader = BufReader::new(stream);
            let mut request = Vec::new();
            let _ = reader.read_until(b'\n', &mut request).await.unwrap();
            let mut stream = reader.into_inner();
            stream.write_all(b"{\"ack\":{\"messa").await.unwrap();
        });

        let client = IpcClient::new(addr.to_string(), &quick_config());
        let result = client.send_request(&Request::Ps).await;
        match result {
            Err(IpcError::ProtocolError(msg)) => assert!(msg.contains("incomplete frame")),
            other => panic!("expected ProtocolError for incomplete frame, got {other:?}"),
        }

        server.await.unwrap();
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut reader = BufReader::new(stream);
            let mut request = Vec::new();
            let _ = reader.read_until(b'\n', &mut request).await.unwrap();
            let mut stream = reader.into_inner();
            let junk = vec![b'x'; MAX_FRAME_SIZE + 16];
            let _ = stream.write_all(&junk).await;
        });

        let client = IpcClient::new(addr.to_string(), &quick_config());
        let result = client.send_request(&Request::Ps).await;
        match result {
            Err(IpcError::ProtocolError(msg)) => assert!(msg.contains("maximum allowed size")),
            other => panic!("expected ProtocolError for oversized frame, got {other:?}"),
        }

        server.await.unwrap();
    }

    #[tokio::test]
    async fn retries_exhaust_with_the_abort_message() {
        // Bind-then-drop gives a port with nothing listening.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = IpcClient::new(addr.to_string(), &quick_config());
        let result = client.send_with_retry(&Request::Ps).await;
        match result {
            Err(IpcError::ConnectionFailed(msg)) => {
                assert_eq!(msg, "Cannot connect to remote server, aborting...");
            }
            other => panic!("expected ConnectionFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn round_trip_request_and_response() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut reader = BufReader::new(stream);
            let request: Request = read_frame(&mut reader).await.unwrap();
            assert!(matches!(request, Request::Sysinfo));
            let mut stream = reader.into_inner();
            write_frame(
                &mut stream,
                &Response::Ack {
                    message: "ok".to_string(),
                },
            )
            .await
            .unwrap();
        });

        let client = IpcClient::new(addr.to_string(), &quick_config());
        let response = client.send_request(&Request::Sysinfo).await.unwrap();
        match response {
            Response::Ack { message } => assert_eq!(message, "ok"),
            other => panic!("unexpected response: {other:?}"),
        }

        server.await.unwrap();
    }

    #[tokio::test]
    async fn attach_consumes_only_the_ack_frame() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut reader = BufReader::new(stream);
            let request: Request = read_frame(&mut reader).await.unwrap();
            match request {
                Request::StdioAttach { session, role } => {
                    assert_eq!(session, "srv/1/a-0");
                    assert_eq!(role, StdioRole::Output);
                }
                other => panic!("unexpected request: {other:?}"),
            }
            let mut stream = reader.into_inner();
            // Ack and first payload bytes in one write.
            stream
                .write_all(b"{\"ack\":{\"message\":\"attached\"}}\npayload")
                .await
                .unwrap();
        });

        let mut stream = connect_attach(&addr.to_string(), "srv/1/a-0", StdioRole::Output, &quick_config())
            .await
            .unwrap();
        let mut payload = [0_u8; 7];
        stream.read_exact(&mut payload).await.unwrap();
        assert_eq!(&payload, b"payload");

        server.await.unwrap();
    }
}
