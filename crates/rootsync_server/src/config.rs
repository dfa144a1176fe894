//! Server configuration.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the sync server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the administrative HTTP API binds to.
    pub bind_addr: SocketAddr,
    /// Directory of the persistent store (`None` keeps data in memory).
    pub data_dir: Option<PathBuf>,
    /// Password every client must present at registration.
    pub server_password: Option<String>,
    /// Upper bound on the redemption limit of a share link.
    pub max_share_count: u64,
    /// Deadline for pushing one notification to a client.
    pub notify_timeout: Duration,
    /// Largest inbound message accepted on a transaction stream.
    pub max_message_size: usize,
}

impl ServerConfig {
    /// Creates a new server configuration.
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            data_dir: None,
            server_password: None,
            max_share_count: 1000,
            notify_timeout: Duration::from_secs(5),
            max_message_size: 16 * 1024 * 1024,
        }
    }

    /// Sets the store directory.
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    /// Requires clients to present `password` at registration.
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.server_password = Some(password.into());
        self
    }

    /// Sets the maximum redemption limit of share links.
    pub fn with_max_share_count(mut self, max: u64) -> Self {
        self.max_share_count = max;
        self
    }

    /// Sets the notification push deadline.
    pub fn with_notify_timeout(mut self, timeout: Duration) -> Self {
        self.notify_timeout = timeout;
        self
    }

    /// Sets the maximum inbound message size.
    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(SocketAddr::from(([127, 0, 0, 1], 6120)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.max_share_count, 1000);
        assert!(config.server_password.is_none());
        assert!(config.data_dir.is_none());
    }

    #[test]
    fn config_builder() {
        let config = ServerConfig::new("0.0.0.0:9000".parse().unwrap())
            .with_data_dir("/var/lib/rootsync")
            .with_password("secret")
            .with_max_share_count(5)
            .with_notify_timeout(Duration::from_millis(250))
            .with_max_message_size(1024);

        assert_eq!(config.bind_addr.port(), 9000);
        assert_eq!(config.data_dir, Some(PathBuf::from("/var/lib/rootsync")));
        assert_eq!(config.server_password.as_deref(), Some("secret"));
        assert_eq!(config.max_share_count, 5);
        assert_eq!(config.notify_timeout, Duration::from_millis(250));
        assert_eq!(config.max_message_size, 1024);
    }
}
