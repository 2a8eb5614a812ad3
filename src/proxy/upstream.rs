//! Upstream connection and request forwarding
//!
//! Connects to the target named by a matched rule, sends the rewritten
//! request, and relays the response. One attempt per inbound request:
//! a failure is reported to the caller as 502/504, never retried.

use std::collections::HashMap;

use anyhow::{Context, Result};
use bytes::{Buf, BytesMut};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::http::request::{Method, Request};
use crate::http::response::{Response, ResponseBuilder, Status};
use crate::proxy::rules::ProxyRule;

/// Default buffer size for upstream reads
const BUFFER_SIZE: usize = 8192;

/// Headers that are per-hop and must not be relayed on either side.
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "Connection",
    "Keep-Alive",
    "Proxy-Connection",
    "Transfer-Encoding",
    "Upgrade",
    "TE",
    "Trailer",
];

/// Why a forwarding attempt failed.
#[derive(Debug)]
pub enum ForwardError {
    /// Connect refused, DNS failure, or an I/O error mid-exchange → 502
    Unreachable(anyhow::Error),
    /// Connect or exchange exceeded the configured bound → 504
    Timeout,
}

/// Forwards matched requests to their rule's target.
pub struct UpstreamClient {
    /// Connection timeout duration
    connection_timeout: Duration,

    /// Full request/response exchange timeout duration
    request_timeout: Duration,
}

impl UpstreamClient {
    pub fn new(connection_timeout: Duration, request_timeout: Duration) -> Self {
        Self {
            connection_timeout,
            request_timeout,
        }
    }

    /// Forwards `request` to the target of `rule` and returns the response
    /// to relay: the upstream's on success, a 502/504 diagnostic on failure.
    ///
    /// Failures are isolated to this request; the caller keeps serving.
    pub async fn forward(&self, rule: &ProxyRule, request: &Request) -> Response {
        tracing::debug!(
            target = rule.target.as_str(),
            method = request.method.as_str(),
            path = %request.path,
            "Forwarding request to upstream"
        );

        match self.try_forward(rule, request).await {
            Ok(response) => {
                tracing::info!(
                    target = rule.target.as_str(),
                    status = response.status.as_u16(),
                    method = request.method.as_str(),
                    path = %request.path,
                    "Request forwarded"
                );
                response
            }
            Err(ForwardError::Timeout) => {
                tracing::warn!(
                    target = rule.target.as_str(),
                    path = %request.path,
                    "Upstream timed out"
                );
                ResponseBuilder::new(Status::GATEWAY_TIMEOUT)
                    .header("Content-Type", "text/plain")
                    .body(b"504 Gateway Timeout\r\n\r\nThe upstream server did not respond in time.".to_vec())
                    .build()
            }
            Err(ForwardError::Unreachable(e)) => {
                tracing::warn!(
                    target = rule.target.as_str(),
                    path = %request.path,
                    error = %e,
                    "Upstream unreachable"
                );
                ResponseBuilder::new(Status::BAD_GATEWAY)
                    .header("Content-Type", "text/plain")
                    .body(b"502 Bad Gateway\r\n\r\nFailed to reach the upstream server.".to_vec())
                    .build()
            }
        }
    }

    async fn try_forward(
        &self,
        rule: &ProxyRule,
        request: &Request,
    ) -> std::result::Result<Response, ForwardError> {
        let addr = rule.target.connect_addr();

        let stream = match timeout(self.connection_timeout, TcpStream::connect(&addr)).await {
            Err(_) => return Err(ForwardError::Timeout),
            Ok(Err(e)) => {
                return Err(ForwardError::Unreachable(
                    anyhow::Error::new(e).context(format!("Failed to connect to {addr}")),
                ));
            }
            Ok(Ok(stream)) => stream,
        };

        tracing::trace!(target = rule.target.as_str(), "Connected to upstream");

        match timeout(
            self.request_timeout,
            self.send_request_and_receive_response(stream, rule, request),
        )
        .await
        {
            Err(_) => Err(ForwardError::Timeout),
            Ok(Err(e)) => Err(ForwardError::Unreachable(e)),
            Ok(Ok(response)) => Ok(response),
        }
    }

    /// Send request to upstream and receive response
    async fn send_request_and_receive_response(
        &self,
        mut stream: TcpStream,
        rule: &ProxyRule,
        request: &Request,
    ) -> Result<Response> {
        let request_bytes = self.build_outbound_request(rule, request);
        stream.write_all(&request_bytes).await?;
        stream.flush().await?;

        tracing::trace!("Request sent to upstream");

        self.read_http_response(&mut stream, request.method).await
    }

    /// Build the outbound HTTP request bytes for a matched rule.
    ///
    /// Note: This method is made public for integration testing purposes
    pub fn build_outbound_request(&self, rule: &ProxyRule, request: &Request) -> Vec<u8> {
        let mut buffer = Vec::new();

        // Request line: rewritten path, original query relayed unchanged
        let mut path = rule.outbound_path(&request.path);
        if let Some(query) = &request.query {
            path.push('?');
            path.push_str(query);
        }

        buffer.extend_from_slice(
            format!("{} {} {}\r\n", request.method.as_str(), path, request.version).as_bytes(),
        );

        let mut headers = request.headers.clone();

        for name in HOP_BY_HOP_HEADERS {
            remove_header(&mut headers, name);
        }

        // Host is rewritten only when the rule says so; otherwise the
        // original inbound Host travels through untouched.
        if rule.change_origin {
            remove_header(&mut headers, "Host");
            headers.insert("Host".to_string(), rule.target.host_header());
        }

        // Body length is re-framed for this hop
        remove_header(&mut headers, "Content-Length");
        if !request.body.is_empty() {
            headers.insert("Content-Length".to_string(), request.body.len().to_string());
        }

        // One exchange per connection
        headers.insert("Connection".to_string(), "close".to_string());

        for (key, value) in &headers {
            buffer.extend_from_slice(format!("{}: {}\r\n", key, value).as_bytes());
        }

        buffer.extend_from_slice(b"\r\n");

        if !request.body.is_empty() {
            buffer.extend_from_slice(&request.body);
        }

        buffer
    }

    /// Read the upstream HTTP response
    async fn read_http_response(&self, stream: &mut TcpStream, method: Method) -> Result<Response> {
        let mut buffer = BytesMut::with_capacity(BUFFER_SIZE);

        loop {
            let n = stream.read_buf(&mut buffer).await?;

            if n == 0 {
                anyhow::bail!("Connection closed before complete response received");
            }

            // Complete headers end with \r\n\r\n
            if let Some(headers_end) = buffer
                .windows(4)
                .position(|window| window == b"\r\n\r\n")
            {
                let headers_bytes = buffer.split_to(headers_end + 4);
                let (status, mut headers) = parse_response_head(&headers_bytes)?;

                // Responses to HEAD, and 1xx/204/304 responses, end at the
                // header block even when they declare a Content-Length;
                // waiting on that length would hang until the timeout.
                let body = if response_has_body(method, status) {
                    self.read_response_body(stream, &mut buffer, &headers).await?
                } else {
                    Vec::new()
                };

                let declared_length = headers
                    .iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case("Content-Length"))
                    .map(|(_, v)| v.clone());

                // Per-hop headers are ours to manage, not the upstream's
                for name in HOP_BY_HOP_HEADERS {
                    remove_header(&mut headers, name);
                }

                let mut response = ResponseBuilder::new(status)
                    .headers(headers)
                    .body(body)
                    .build();

                // A bodiless relay advertises the upstream's declared
                // length (what the matching GET would carry), not the
                // zero bytes this hop sent.
                if !response_has_body(method, status) {
                    if let Some(length) = declared_length {
                        response
                            .headers
                            .insert("Content-Length".to_string(), length);
                    }
                }

                return Ok(response);
            }

            if buffer.len() > 64 * 1024 {
                anyhow::bail!("Response headers too large");
            }
        }
    }

    /// Read response body based on Content-Length, or to EOF without one
    async fn read_response_body(
        &self,
        stream: &mut TcpStream,
        buffer: &mut BytesMut,
        headers: &HashMap<String, String>,
    ) -> Result<Vec<u8>> {
        let content_length = headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("Content-Length"))
            .and_then(|(_, v)| v.parse::<usize>().ok());

        let Some(content_length) = content_length else {
            // No Content-Length: the upstream closes the connection when done
            let mut body = buffer.to_vec();
            buffer.clear();
            loop {
                let n = stream.read_buf(buffer).await?;
                if n == 0 {
                    break;
                }
                body.extend_from_slice(&buffer[..n]);
                buffer.clear();
            }
            return Ok(body);
        };

        if content_length == 0 {
            return Ok(Vec::new());
        }

        let mut body = Vec::with_capacity(content_length);

        // Use bytes already buffered past the headers first
        let from_buffer = buffer.len().min(content_length);
        body.extend_from_slice(&buffer[..from_buffer]);
        buffer.advance(from_buffer);

        while body.len() < content_length {
            let remaining = content_length - body.len();
            let to_read = remaining.min(BUFFER_SIZE);

            buffer.resize(to_read, 0);
            let n = stream.read(&mut buffer[..to_read]).await?;

            if n == 0 {
                anyhow::bail!("Connection closed before complete body received");
            }

            body.extend_from_slice(&buffer[..n]);
        }

        Ok(body)
    }
}

/// Parse the upstream status line and headers. The status code is relayed
/// verbatim, whatever it is.
fn parse_response_head(headers_bytes: &[u8]) -> Result<(Status, HashMap<String, String>)> {
    let headers_str = std::str::from_utf8(headers_bytes)
        .context("Invalid UTF-8 in response headers")?;

    let mut lines = headers_str.lines();

    let status_line = lines.next().context("Empty response")?;
    let parts: Vec<&str> = status_line.splitn(3, ' ').collect();

    if parts.len() < 2 {
        anyhow::bail!("Invalid status line: {}", status_line);
    }

    let status_code: u16 = parts[1].parse().context("Invalid status code")?;

    let mut headers = HashMap::new();
    for line in lines {
        if line.is_empty() {
            break;
        }

        if let Some((key, value)) = line.split_once(':') {
            headers.insert(
                key.trim().to_string(),
                value.trim().to_string(),
            );
        }
    }

    Ok((Status(status_code), headers))
}

fn remove_header(headers: &mut HashMap<String, String>, name: &str) {
    headers.retain(|k, _| !k.eq_ignore_ascii_case(name));
}

/// Whether a response carries a message body on the wire (RFC 7230 §3.3.3):
/// HEAD responses and 1xx/204/304 statuses do not, regardless of their
/// Content-Length header.
fn response_has_body(method: Method, status: Status) -> bool {
    if method == Method::HEAD {
        return false;
    }
    !matches!(status.as_u16(), 100..=199 | 204 | 304)
}
