//! HTTP proxy CONNECT tunneling: establishes a plain TCP connection to the
//! proxy, issues `CONNECT host:port`, and on a `200` response hands back the
//! raw socket so TLS (if any) can be layered on top of the tunnel rather
//! than the proxy connection itself.

use nfhttp_types::{NfError, Result};
use tokio::net::TcpStream;

use crate::auth::Credentials;
use crate::wire;

#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub host: String,
    pub port: u16,
    pub credentials: Option<Credentials>,
}

/// Opens a tunnel through `proxy` to `target_host:target_port`. Returns the
/// raw stream positioned right after the proxy's response headers, ready
/// for a TLS handshake (or plaintext use) with the origin.
pub async fn tunnel(proxy: &ProxyConfig, target_host: &str, target_port: u16) -> Result<TcpStream> {
    let mut stream = TcpStream::connect((proxy.host.as_str(), proxy.port))
        .await
        .map_err(|e| NfError::ConnectFailure(e.to_string()))?;

    let mut extra = vec![("Proxy-Connection".to_string(), "Keep-Alive".to_string())];
    if let Some(creds) = &proxy.credentials {
        extra.push(("Proxy-Authorization".to_string(), creds.basic_header_value()));
    }
    wire::write_connect_head(&mut stream, target_host, target_port, &extra)
        .await
        .map_err(|e| NfError::ProxyHandshakeFailed(e.to_string()))?;

    let mut reader = wire::buffered(&mut stream);
    let status = wire::read_status_line(&mut reader)
        .await
        .map_err(|e| NfError::ProxyHandshakeFailed(e.to_string()))?;
    let _headers = wire::read_headers(&mut reader)
        .await
        .map_err(|e| NfError::ProxyHandshakeFailed(e.to_string()))?;

    if status.status == 407 {
        // The proxy itself is demanding credentials on the tunnel; this is
        // not the origin's auth flow and there is no second leg to resend on.
        return Err(NfError::AuthChallengeUnsatisfiable);
    }
    if status.status != 200 {
        return Err(NfError::ProxyHandshakeFailed(format!(
            "proxy refused CONNECT: {} {}",
            status.status, status.reason
        )));
    }
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn tunnel_succeeds_on_200_and_fails_on_other_status() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let n = sock.read(&mut buf).await.unwrap();
            assert!(String::from_utf8_lossy(&buf[..n]).starts_with("CONNECT example.invalid:443"));
            sock.write_all(b"HTTP/1.1 200 Connection Established\r\n\r\n").await.unwrap();
        });

        let proxy = ProxyConfig { host: "127.0.0.1".into(), port: addr.port(), credentials: None };
        let result = tunnel(&proxy, "example.invalid", 443).await;
        assert!(result.is_ok());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn tunnel_treats_407_as_an_unsatisfiable_auth_challenge() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let _ = sock.read(&mut buf).await.unwrap();
            sock.write_all(b"HTTP/1.1 407 Proxy Authentication Required\r\n\r\n").await.unwrap();
        });

        let proxy = ProxyConfig { host: "127.0.0.1".into(), port: addr.port(), credentials: None };
        let result = tunnel(&proxy, "example.invalid", 443).await;
        match result {
            Err(e) => assert_eq!(e, NfError::AuthChallengeUnsatisfiable),
            Ok(_) => panic!("expected Err(NfError::AuthChallengeUnsatisfiable), got Ok"),
        }
    }

    #[tokio::test]
    async fn tunnel_rejects_other_non_200_statuses() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let _ = sock.read(&mut buf).await.unwrap();
            sock.write_all(b"HTTP/1.1 502 Bad Gateway\r\n\r\n").await.unwrap();
        });

        let proxy = ProxyConfig { host: "127.0.0.1".into(), port: addr.port(), credentials: None };
        let result = tunnel(&proxy, "example.invalid", 443).await;
        assert!(matches!(result, Err(NfError::ProxyHandshakeFailed(_))));
    }

    #[tokio::test]
    async fn tunnel_sends_proxy_connection_keep_alive() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let n = sock.read(&mut buf).await.unwrap();
            let head = String::from_utf8_lossy(&buf[..n]);
            assert!(head.contains("Proxy-Connection: Keep-Alive"));
            sock.write_all(b"HTTP/1.1 200 Connection Established\r\n\r\n").await.unwrap();
        });

        let proxy = ProxyConfig { host: "127.0.0.1".into(), port: addr.port(), credentials: None };
        let result = tunnel(&proxy, "example.invalid", 443).await;
        assert!(result.is_ok());
        server.await.unwrap();
    }
}
