//! Minimal HTTP/1.1 request reader with a deadline on the whole request.

use std::io::{self, Read};
use std::net::TcpStream;
use std::time::{Duration, Instant};

use thiserror::Error;

pub(crate) const MAX_HEAD_BYTES: usize = 16 * 1024;
pub(crate) const MAX_BODY_BYTES: usize = 1024 * 1024;
const HEAD_TERMINATOR: &[u8] = b"\r\n\r\n";

/// A parsed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct HttpRequest {
    pub method: String,
    /// Target without its query string.
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpRequest {
    /// First header named `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Debug, Error)]
pub(crate) enum RequestError {
    #[error("connection closed before a request arrived")]
    Closed,
    #[error("request not received in time")]
    Timeout,
    #[error("request head exceeds {} bytes", MAX_HEAD_BYTES)]
    HeadTooLarge,
    #[error("request body exceeds {} bytes", MAX_BODY_BYTES)]
    BodyTooLarge,
    #[error("malformed request: {0}")]
    Malformed(&'static str),
    #[error("failed to read request: {0}")]
    Io(#[from] io::Error),
}

/// Reads one request, giving the client `timeout` to deliver all of it.
pub(crate) fn read_request(
    stream: &mut TcpStream,
    timeout: Duration,
) -> Result<HttpRequest, RequestError> {
    let deadline = Instant::now() + timeout;
    let mut buffer = Vec::with_capacity(1024);
    let mut chunk = [0_u8; 4096];

    let head_end = loop {
        if let Some(position) = find_terminator(&buffer) {
            break position;
        }
        if buffer.len() > MAX_HEAD_BYTES {
            return Err(RequestError::HeadTooLarge);
        }
        let read = read_before(stream, &mut chunk, deadline)?;
        if read == 0 {
            return Err(if buffer.is_empty() {
                RequestError::Closed
            } else {
                RequestError::Malformed("connection closed inside the request head")
            });
        }
        buffer.extend_from_slice(&chunk[..read]);
    };

    let (method, path, headers) = parse_head(&buffer[..head_end])?;
    let length = content_length(&headers)?;
    if length > MAX_BODY_BYTES {
        return Err(RequestError::BodyTooLarge);
    }

    let mut body = buffer.split_off(head_end + HEAD_TERMINATOR.len());
    while body.len() < length {
        let read = read_before(stream, &mut chunk, deadline)?;
        if read == 0 {
            return Err(RequestError::Malformed("connection closed inside the body"));
        }
        body.extend_from_slice(&chunk[..read]);
    }
    body.truncate(length);

    Ok(HttpRequest {
        method,
        path,
        headers,
        body,
    })
}

fn find_terminator(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(HEAD_TERMINATOR.len())
        .position(|window| window == HEAD_TERMINATOR)
}

fn read_before(
    stream: &mut TcpStream,
    chunk: &mut [u8],
    deadline: Instant,
) -> Result<usize, RequestError> {
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(RequestError::Timeout);
        }
        stream.set_read_timeout(Some(remaining))?;
        match stream.read(chunk) {
            Ok(read) => return Ok(read),
            Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
            Err(error)
                if matches!(
                    error.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                ) =>
            {
                return Err(RequestError::Timeout);
            }
            Err(error) => return Err(RequestError::Io(error)),
        }
    }
}

type Head = (String, String, Vec<(String, String)>);

fn parse_head(raw: &[u8]) -> Result<Head, RequestError> {
    let text = std::str::from_utf8(raw).map_err(|_| RequestError::Malformed("head is not UTF-8"))?;
    let mut lines = text.split("\r\n");
    let request_line = lines
        .next()
        .ok_or(RequestError::Malformed("missing request line"))?;
    let mut parts = request_line.split_whitespace();
    let (Some(method), Some(target), Some(version), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(RequestError::Malformed("bad request line"));
    };
    if !version.starts_with("HTTP/") {
        return Err(RequestError::Malformed("bad protocol version"));
    }
    let path = target.split('?').next().unwrap_or(target).to_owned();

    let mut headers = Vec::new();
    for line in lines {
        let (name, value) = line
            .split_once(':')
            .ok_or(RequestError::Malformed("bad header line"))?;
        headers.push((name.trim().to_ascii_lowercase(), value.trim().to_owned()));
    }
    Ok((method.to_ascii_uppercase(), path, headers))
}

fn content_length(headers: &[(String, String)]) -> Result<usize, RequestError> {
    headers
        .iter()
        .find(|(name, _)| name == "content-length")
        .map_or(Ok(0), |(_, value)| {
            value
                .parse()
                .map_err(|_| RequestError::Malformed("bad content-length"))
        })
}
