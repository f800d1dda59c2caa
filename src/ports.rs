use std::time::Duration;
use tokio::net::TcpListener;

pub const PORT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How long a stop waits for monitored ports to be released before giving
/// up with a warning.
pub const DEFAULT_PORT_RELEASE_TIMEOUT_MS: u64 = 10_000;

/// Extracts the port from an endpoint URL such as `http://localhost:4001`
/// or `https://127.0.0.1:8443/path`. Returns `None` for URLs without an
/// explicit port.
pub fn port_from_url(url: &str) -> Option<u16> {
    let rest = match url.split_once("://") {
        Some((_, rest)) => rest,
        None => url,
    };
    let authority = rest.split(['/', '?', '#']).next()?;
    let (_, port) = authority.rsplit_once(':')?;
    port.parse().ok()
}

/// A port is considered free once we can bind it locally. Some server
/// frameworks release the OS process before the kernel tears the socket
/// down, so "process gone" is not the same as "port free".
pub async fn is_port_free(port: u16) -> bool {
    match TcpListener::bind(("127.0.0.1", port)).await {
        Ok(listener) => {
            drop(listener);
            true
        }
        Err(_) => false,
    }
}

/// Polls until every port binds successfully or the timeout elapses.
/// Returns `false` on timeout.
pub async fn wait_for_release(ports: &[u16], timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    let mut remaining: Vec<u16> = ports.to_vec();
    loop {
        let mut still_bound = Vec::new();
        for port in remaining {
            if !is_port_free(port).await {
                still_bound.push(port);
            }
        }
        if still_bound.is_empty() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        remaining = still_bound;
        tokio::time::sleep(PORT_POLL_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_from_url_plain() {
        assert_eq!(port_from_url("http://localhost:4001"), Some(4001));
    }

    #[test]
    fn test_port_from_url_with_path() {
        assert_eq!(port_from_url("https://127.0.0.1:8443/api/v1"), Some(8443));
    }

    #[test]
    fn test_port_from_url_no_scheme() {
        assert_eq!(port_from_url("localhost:3000"), Some(3000));
    }

    #[test]
    fn test_port_from_url_without_port() {
        assert_eq!(port_from_url("http://localhost"), None);
        assert_eq!(port_from_url("http://localhost/path"), None);
    }

    #[test]
    fn test_port_from_url_garbage() {
        assert_eq!(port_from_url("http://localhost:notaport"), None);
        assert_eq!(port_from_url(""), None);
    }

    #[tokio::test]
    async fn test_bound_port_is_not_free() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(!is_port_free(port).await);
        drop(listener);
        assert!(is_port_free(port).await);
    }

    #[tokio::test]
    async fn test_wait_for_release_returns_once_freed() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            drop(listener);
        });

        let start = tokio::time::Instant::now();
        let released = wait_for_release(&[port], Duration::from_secs(5)).await;
        assert!(released);
        assert!(start.elapsed() >= Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_wait_for_release_times_out() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let released = wait_for_release(&[port], Duration::from_millis(300)).await;
        assert!(!released);
        drop(listener);
    }

    #[tokio::test]
    async fn test_wait_for_release_empty_is_immediate() {
        assert!(wait_for_release(&[], Duration::from_millis(10)).await);
    }
}
