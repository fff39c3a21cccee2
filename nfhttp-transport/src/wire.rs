//! HTTP/1.1 message framing: request-line/header serialization, status-line
//! and header parsing, message-length computation (RFC 7230 §3.3.3) and
//! chunked transfer encoding/decoding.

use nfhttp_types::{HeaderMap, Method, NfError, Request, Result};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// How the body of a response is delimited, decided per RFC 7230 §3.3.3
/// from the response's headers (and, for HEAD/204/304, from context the
/// caller must supply since those never carry a body regardless of what
/// `Content-Length` claims).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyLength {
    /// No body is present at all (HEAD, 1xx, 204, 304).
    Empty,
    /// `Transfer-Encoding: chunked` framing.
    Chunked,
    /// A known `Content-Length` in bytes.
    Fixed(u64),
    /// Neither header present: body runs until the connection closes.
    UntilClose,
}

/// Determines framing for a response with the given status code and
/// headers. `is_head` suppresses a body regardless of headers.
pub fn response_body_length(status: u16, is_head: bool, headers: &HeaderMap) -> BodyLength {
    if is_head || status == 204 || status == 304 || (100..200).contains(&status) {
        return BodyLength::Empty;
    }
    if let Some(te) = headers.get("Transfer-Encoding") {
        if te.to_ascii_lowercase().contains("chunked") {
            return BodyLength::Chunked;
        }
    }
    if let Some(len) = headers.get("Content-Length") {
        if let Ok(n) = len.trim().parse::<u64>() {
            return BodyLength::Fixed(n);
        }
    }
    BodyLength::UntilClose
}

/// Writes the request line and headers (but not the body) to `out`.
/// `request_target` is either the path+query (direct/tunnelled) or the
/// absolute URL (plain-HTTP proxy requests).
pub async fn write_request_head<W: AsyncWrite + Unpin>(
    out: &mut W,
    request: &Request,
    request_target: &str,
    extra_headers: &[(String, String)],
) -> Result<()> {
    let mut head = format!("{} {} HTTP/1.1\r\n", request.method(), request_target);
    for (name, value) in request.headers().iter() {
        head.push_str(name);
        head.push_str(": ");
        head.push_str(value);
        head.push_str("\r\n");
    }
    for (name, value) in extra_headers {
        head.push_str(name);
        head.push_str(": ");
        head.push_str(value);
        head.push_str("\r\n");
    }
    head.push_str("\r\n");
    out.write_all(head.as_bytes()).await.map_err(|e| NfError::Io(e.to_string()))?;
    Ok(())
}

/// Writes a CONNECT request line for a proxy tunnel.
pub async fn write_connect_head<W: AsyncWrite + Unpin>(
    out: &mut W,
    host: &str,
    port: u16,
    extra_headers: &[(String, String)],
) -> Result<()> {
    let mut head = format!("CONNECT {host}:{port} HTTP/1.1\r\nHost: {host}:{port}\r\n");
    for (name, value) in extra_headers {
        head.push_str(name);
        head.push_str(": ");
        head.push_str(value);
        head.push_str("\r\n");
    }
    head.push_str("\r\n");
    out.write_all(head.as_bytes()).await.map_err(|e| NfError::Io(e.to_string()))?;
    Ok(())
}

pub struct StatusLine {
    pub status: u16,
    pub reason: String,
}

/// Reads and parses the status line (`HTTP/1.1 200 OK`) from a buffered
/// reader positioned at the start of a response.
pub async fn read_status_line<R: AsyncBufReadExt + Unpin>(reader: &mut R) -> Result<StatusLine> {
    let mut line = String::new();
    let n = reader
        .read_line(&mut line)
        .await
        .map_err(|e| NfError::Io(e.to_string()))?;
    if n == 0 {
        return Err(NfError::ProtocolError("connection closed before status line".into()));
    }
    parse_status_line(line.trim_end())
}

fn parse_status_line(line: &str) -> Result<StatusLine> {
    let mut parts = line.splitn(3, ' ');
    let version = parts
        .next()
        .ok_or_else(|| NfError::ProtocolError("missing HTTP version".into()))?;
    if !version.starts_with("HTTP/1.") {
        return Err(NfError::ProtocolError(format!("unsupported HTTP version: {version}")));
    }
    let status: u16 = parts
        .next()
        .ok_or_else(|| NfError::ProtocolError("missing status code".into()))?
        .parse()
        .map_err(|_| NfError::ProtocolError("non-numeric status code".into()))?;
    let reason = parts.next().unwrap_or("").to_string();
    Ok(StatusLine { status, reason })
}

/// Reads header lines until the terminating blank line, folding obsolete
/// line-folding is not supported (RFC 7230 deprecates it; we reject it).
pub async fn read_headers<R: AsyncBufReadExt + Unpin>(reader: &mut R) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    loop {
        let mut line = String::new();
        let n = reader
            .read_line(&mut line)
            .await
            .map_err(|e| NfError::Io(e.to_string()))?;
        if n == 0 {
            return Err(NfError::ProtocolError("connection closed while reading headers".into()));
        }
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            break;
        }
        if line.starts_with([' ', '\t']) {
            return Err(NfError::ProtocolError("obsolete header line folding is not supported".into()));
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| NfError::ProtocolError(format!("malformed header line: {line}")))?;
        headers.insert(name.trim(), value.trim());
    }
    Ok(headers)
}

/// Reads exactly `len` bytes of body.
pub async fn read_fixed_body<R: AsyncReadExt + Unpin>(reader: &mut R, len: u64) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len as usize];
    reader
        .read_exact(&mut buf)
        .await
        .map_err(|e| NfError::Io(e.to_string()))?;
    Ok(buf)
}

/// Reads the remainder of the stream, used for `BodyLength::UntilClose`.
pub async fn read_until_close<R: AsyncReadExt + Unpin>(reader: &mut R) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    reader
        .read_to_end(&mut buf)
        .await
        .map_err(|e| NfError::Io(e.to_string()))?;
    Ok(buf)
}

/// Reads a `Transfer-Encoding: chunked` body, including trailer headers,
/// and returns the decoded payload with trailers merged into `trailers`.
pub async fn read_chunked_body<R: AsyncBufReadExt + Unpin>(
    reader: &mut R,
    trailers: &mut HeaderMap,
) -> Result<Vec<u8>> {
    let mut body = Vec::new();
    loop {
        let mut size_line = String::new();
        let n = reader
            .read_line(&mut size_line)
            .await
            .map_err(|e| NfError::Io(e.to_string()))?;
        if n == 0 {
            return Err(NfError::ProtocolError("connection closed mid-chunk".into()));
        }
        let size_line = size_line.trim_end();
        let size_str = size_line.split(';').next().unwrap_or("").trim();
        let size = u64::from_str_radix(size_str, 16)
            .map_err(|_| NfError::ProtocolError(format!("invalid chunk size: {size_str}")))?;
        if size == 0 {
            let trailer_headers = read_headers(reader).await?;
            trailers.merge_overwrite(&trailer_headers);
            break;
        }
        let mut chunk = vec![0u8; size as usize];
        reader
            .read_exact(&mut chunk)
            .await
            .map_err(|e| NfError::Io(e.to_string()))?;
        body.extend_from_slice(&chunk);
        let mut crlf = [0u8; 2];
        reader
            .read_exact(&mut crlf)
            .await
            .map_err(|e| NfError::Io(e.to_string()))?;
        if &crlf != b"\r\n" {
            return Err(NfError::ProtocolError("malformed chunk terminator".into()));
        }
    }
    Ok(body)
}

/// Encodes a body as a single chunk followed by the terminating zero chunk,
/// used when uploading a request body under `Transfer-Encoding: chunked`.
pub fn encode_chunked(body: &[u8]) -> Vec<u8> {
    if body.is_empty() {
        return b"0\r\n\r\n".to_vec();
    }
    let mut out = Vec::with_capacity(body.len() + 32);
    out.extend_from_slice(format!("{:x}\r\n", body.len()).as_bytes());
    out.extend_from_slice(body);
    out.extend_from_slice(b"\r\n0\r\n\r\n");
    out
}

/// Wraps a reader so status/header lines can be read line-by-line while
/// still exposing the raw `AsyncRead` for the body.
pub fn buffered<R: tokio::io::AsyncRead + Unpin>(reader: R) -> BufReader<R> {
    BufReader::new(reader)
}

pub(crate) fn method_is_head(method: Method) -> bool {
    matches!(method, Method::Head)
}
