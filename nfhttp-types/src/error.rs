use miette::Diagnostic;
use thiserror::Error;

/// A `Result` typedef used throughout the nfhttp pipeline.
pub type Result<T> = std::result::Result<T, NfError>;

/// Error kinds surfaced by any layer of the client pipeline.
///
/// Every variant maps onto one of the status-code-shaped failures described
/// for the transport, cache, coalescer and modifier layers: a single enum so
/// callers can match on a stable error surface regardless of which layer
/// produced it. Each variant carries a `diagnostic(code(...))` so a `miette`
/// reporter at the application boundary can print a stable, greppable code
/// alongside the human-readable message.
#[derive(Error, Diagnostic, Debug, Clone, PartialEq, Eq)]
pub enum NfError {
    /// Malformed URL, invalid method, or missing scheme.
    #[error("invalid request: {0}")]
    #[diagnostic(code(nfhttp::invalid_request))]
    InvalidRequest(String),
    /// DNS resolution failed.
    #[error("dns resolution failed: {0}")]
    #[diagnostic(code(nfhttp::dns_failure))]
    DnsFailure(String),
    /// TCP connect failed.
    #[error("connect failed: {0}")]
    #[diagnostic(code(nfhttp::connect_failure))]
    ConnectFailure(String),
    /// TLS handshake or certificate verification failed.
    #[error("tls failure: {0}")]
    #[diagnostic(code(nfhttp::tls_failure))]
    TlsFailure(String),
    /// The proxy refused the CONNECT tunnel.
    #[error("proxy handshake failed: {0}")]
    #[diagnostic(code(nfhttp::proxy_handshake_failed))]
    ProxyHandshakeFailed(String),
    /// The per-request timer fired before completion.
    #[error("request timed out")]
    #[diagnostic(code(nfhttp::timed_out))]
    TimedOut,
    /// Bad status line, malformed headers, or a bad chunk header.
    #[error("protocol error: {0}")]
    #[diagnostic(code(nfhttp::protocol_error))]
    ProtocolError(String),
    /// `Content-Encoding` cannot be decoded by this build.
    #[error("unsupported content-encoding: {0}")]
    #[diagnostic(code(nfhttp::unsupported_encoding))]
    UnsupportedEncoding(String),
    /// A supported encoding failed to decode.
    #[error("decompression failed: {0}")]
    #[diagnostic(code(nfhttp::decompression_failed))]
    DecompressionFailed(String),
    /// The operation was terminated by an external cancel.
    #[error("request cancelled")]
    #[diagnostic(code(nfhttp::canceled))]
    Canceled,
    /// A 401/407 arrived but no credentials or seekable body were available for replay.
    #[error("auth challenge unsatisfiable")]
    #[diagnostic(code(nfhttp::auth_challenge_unsatisfiable))]
    AuthChallengeUnsatisfiable,
    /// Metadata referenced a payload blob that could not be read; promoted to a cache miss.
    #[error("cache integrity violation: {0}")]
    #[diagnostic(code(nfhttp::cache_integrity))]
    CacheIntegrity(String),
    /// A request or response modifier never invoked its `done` callback.
    #[error("modifier dropped request without calling done")]
    #[diagnostic(code(nfhttp::modifier_dropped_request))]
    ModifierDroppedRequest,
    /// Underlying I/O failure not otherwise classified above.
    #[error("io error: {0}")]
    #[diagnostic(code(nfhttp::io))]
    Io(String),
    /// Cache storage backend failure (the on-disk metadata store).
    #[error("cache storage error: {0}")]
    #[diagnostic(code(nfhttp::storage))]
    Storage(String),
}

impl From<std::io::Error> for NfError {
    fn from(e: std::io::Error) -> Self {
        NfError::Io(e.to_string())
    }
}

impl From<url::ParseError> for NfError {
    fn from(e: url::ParseError) -> Self {
        NfError::InvalidRequest(e.to_string())
    }
}

impl From<serde_json::Error> for NfError {
    fn from(e: serde_json::Error) -> Self {
        NfError::ProtocolError(e.to_string())
    }
}
