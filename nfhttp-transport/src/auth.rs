//! Authentication: Basic credential encoding, and WinHTTP-style challenge
//! scheme selection when a response carries more than one
//! `WWW-Authenticate`/`Proxy-Authenticate` challenge.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use nfhttp_types::NfError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn basic_header_value(&self) -> String {
        let raw = format!("{}:{}", self.username, self.password);
        format!("Basic {}", BASE64.encode(raw))
    }
}

/// Challenge schemes ordered exactly as WinHTTP prioritizes a resend:
/// strongest first. We can only ever *satisfy* `Basic`; the others are
/// recognized purely so [`select_scheme`] reports the right
/// "unsatisfiable" diagnosis instead of silently trying Basic against a
/// server that demanded Negotiate.
const PRIORITY: &[&str] = &["negotiate", "ntlm", "passport", "digest", "basic"];

/// Picks the highest-priority scheme out of a `WWW-Authenticate` header's
/// (possibly multiple, comma-free since RFC 7235 challenges cannot be
/// comma-joined unambiguously) challenge list, and decides whether this
/// client can respond to it.
pub fn select_scheme(challenges: &[String]) -> Result<&'static str, NfError> {
    let present: Vec<String> = challenges
        .iter()
        .filter_map(|c| c.split_whitespace().next())
        .map(|s| s.to_ascii_lowercase())
        .collect();

    let chosen = PRIORITY
        .iter()
        .find(|scheme| present.iter().any(|p| p == *scheme))
        .copied();

    match chosen {
        Some("basic") => Ok("basic"),
        Some(_) => Err(NfError::AuthChallengeUnsatisfiable),
        None => Err(NfError::AuthChallengeUnsatisfiable),
    }
}
