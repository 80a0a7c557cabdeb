use crate::error::ShimError;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::copy_bidirectional;
use tokio::net::{TcpListener, TcpStream, UnixStream};

/// Bound on how long an accepted client may sit idle before sending its
/// request head.
const READ_HEADER_TIMEOUT: Duration = Duration::from_secs(10);

/// Expose a unix-domain control-plane socket over local TCP.
///
/// Parses `unix://<path>`, binds a listener on an ephemeral localhost port
/// and relays every accepted connection to the socket at `<path>`. The
/// accept loop is a background task that lives for the remainder of the
/// process; its consumer terminates before or with us, so there is no
/// shutdown path. Returns the reachable `http://localhost:<port>` address.
pub async fn proxy_api(addr: &str) -> Result<String, ShimError> {
    let socket_path = parse_unix_addr(addr)?;

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();

    tracing::debug!(port = port, socket = %socket_path.display(), "control-plane proxy listening");

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((conn, peer)) => {
                    let socket_path = socket_path.clone();
                    tokio::spawn(async move {
                        if let Err(e) = relay(conn, &socket_path).await {
                            tracing::debug!(%peer, "control-plane relay ended: {}", e);
                        }
                    });
                }
                Err(e) => {
                    tracing::warn!("control-plane accept failed: {}", e);
                }
            }
        }
    });

    Ok(format!("http://localhost:{}", port))
}

fn parse_unix_addr(addr: &str) -> Result<PathBuf, ShimError> {
    let path = addr
        .strip_prefix("unix://")
        .ok_or_else(|| ShimError::InvalidAddress(addr.to_string()))?;
    if path.is_empty() {
        return Err(ShimError::InvalidAddress(addr.to_string()));
    }
    Ok(PathBuf::from(path))
}

async fn relay(mut conn: TcpStream, socket_path: &Path) -> std::io::Result<()> {
    // Wait for the request head before dialing the backend.
    tokio::time::timeout(READ_HEADER_TIMEOUT, conn.readable())
        .await
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "read header timeout"))??;

    // A dead control-plane socket would otherwise fail silently; make it
    // visible.
    let mut upstream = match UnixStream::connect(socket_path).await {
        Ok(upstream) => upstream,
        Err(e) => {
            tracing::warn!(socket = %socket_path.display(), "control-plane dial failed: {}", e);
            return Err(e);
        }
    };
    copy_bidirectional(&mut conn, &mut upstream).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::UnixListener;

    #[test]
    fn test_parse_unix_addr() {
        assert_eq!(
            parse_unix_addr("unix:///run/dagger.sock").unwrap(),
            PathBuf::from("/run/dagger.sock")
        );
        assert!(matches!(
            parse_unix_addr("tcp://localhost:80"),
            Err(ShimError::InvalidAddress(_))
        ));
        assert!(matches!(
            parse_unix_addr("unix://"),
            Err(ShimError::InvalidAddress(_))
        ));
    }

    #[tokio::test]
    async fn test_proxy_invalid_address() {
        assert!(proxy_api("http://localhost:8080").await.is_err());
    }

    #[tokio::test]
    async fn test_proxy_backend_unreachable_drops_connection() {
        let temp_dir = TempDir::new().unwrap();
        let socket_path = temp_dir.path().join("gone.sock");

        // Nothing listens on the socket; the listener still comes up and
        // each connection is dropped without a response.
        let addr = proxy_api(&format!("unix://{}", socket_path.display()))
            .await
            .unwrap();
        let port: u16 = addr.rsplit(':').next().unwrap().parse().unwrap();

        let mut conn = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        conn.write_all(b"GET / HTTP/1.1\r\nhost: localhost\r\n\r\n")
            .await
            .unwrap();
        conn.shutdown().await.unwrap();

        let mut response = Vec::new();
        // The drop may surface as EOF or as a reset, but never as a response.
        let _ = conn.read_to_end(&mut response).await;
        assert!(response.is_empty());
    }

    #[tokio::test]
    async fn test_proxy_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let socket_path = temp_dir.path().join("api.sock");
        let peer = UnixListener::bind(&socket_path).unwrap();

        // Minimal HTTP peer: read the request head, answer 200, close.
        tokio::spawn(async move {
            let (mut stream, _) = peer.accept().await.unwrap();
            let mut buf = vec![0u8; 1024];
            let mut request = Vec::new();
            loop {
                let n = stream.read(&mut buf).await.unwrap();
                request.extend_from_slice(&buf[..n]);
                if n == 0 || request.windows(4).any(|w| w == b"\r\n\r\n") {
                    break;
                }
            }
            stream
                .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 2\r\nconnection: close\r\n\r\nok")
                .await
                .unwrap();
        });

        let addr = proxy_api(&format!("unix://{}", socket_path.display()))
            .await
            .unwrap();
        let port: u16 = addr.rsplit(':').next().unwrap().parse().unwrap();

        let mut conn = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        conn.write_all(b"GET / HTTP/1.1\r\nhost: localhost\r\nconnection: close\r\n\r\n")
            .await
            .unwrap();
        // Half-close so the relay sees EOF on the client side.
        conn.shutdown().await.unwrap();

        let mut response = Vec::new();
        conn.read_to_end(&mut response).await.unwrap();
        let response = String::from_utf8(response).unwrap();
        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert!(response.ends_with("ok"));
    }
}
