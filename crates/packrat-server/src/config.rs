use std::path::PathBuf;
use std::time::Duration;

use rand::distributions::Alphanumeric;
use rand::Rng;

const TOKEN_LENGTH: usize = 40;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port for the loopback ingest endpoints. 0 picks an ephemeral port.
    pub http_port: u16,
    /// Per-session token the capture script must present.
    pub token: String,
    /// Database file path; `None` uses the platform data directory.
    pub db_path: Option<PathBuf>,
    pub download_workers: usize,
    pub download_batch: usize,
    /// Attachments larger than this are recorded as skipped, not stored.
    pub download_size_cap: Option<u64>,
    pub request_timeout: Duration,
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 50000,
            token: generate_token(),
            db_path: None,
            download_workers: 4,
            download_batch: 16,
            download_size_cap: None,
            request_timeout: Duration::from_secs(30),
            max_body_bytes: 32 * 1024 * 1024,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(port) = std::env::var("PACKRAT_HTTP_PORT") {
            if let Ok(parsed) = port.parse::<u16>() {
                config.http_port = parsed;
            } else {
                tracing::warn!(value = %port, "Invalid PACKRAT_HTTP_PORT, using default");
            }
        }

        if let Ok(token) = std::env::var("PACKRAT_TOKEN") {
            if !token.is_empty() {
                config.token = token;
            }
        }

        if let Ok(path) = std::env::var("PACKRAT_DB_PATH") {
            config.db_path = Some(PathBuf::from(path));
        }

        if let Ok(val) = std::env::var("PACKRAT_DOWNLOAD_WORKERS") {
            if let Ok(n) = val.parse::<usize>() {
                if n > 0 {
                    config.download_workers = n;
                }
            } else {
                tracing::warn!(value = %val, "Invalid PACKRAT_DOWNLOAD_WORKERS, using default");
            }
        }

        if let Ok(val) = std::env::var("PACKRAT_DOWNLOAD_BATCH") {
            if let Ok(n) = val.parse::<usize>() {
                if n > 0 {
                    config.download_batch = n;
                }
            } else {
                tracing::warn!(value = %val, "Invalid PACKRAT_DOWNLOAD_BATCH, using default");
            }
        }

        if let Ok(val) = std::env::var("PACKRAT_DOWNLOAD_SIZE_CAP") {
            if let Ok(n) = val.parse::<u64>() {
                config.download_size_cap = Some(n);
            } else {
                tracing::warn!(value = %val, "Invalid PACKRAT_DOWNLOAD_SIZE_CAP, using default");
            }
        }

        if let Ok(val) = std::env::var("PACKRAT_REQUEST_TIMEOUT_SECS") {
            if let Ok(n) = val.parse::<u64>() {
                config.request_timeout = Duration::from_secs(n);
            } else {
                tracing::warn!(value = %val, "Invalid PACKRAT_REQUEST_TIMEOUT_SECS, using default");
            }
        }

        if let Ok(val) = std::env::var("PACKRAT_MAX_BODY_BYTES") {
            if let Ok(n) = val.parse::<usize>() {
                config.max_body_bytes = n;
            } else {
                tracing::warn!(value = %val, "Invalid PACKRAT_MAX_BODY_BYTES, using default");
            }
        }

        config
    }
}

fn generate_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LENGTH)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.http_port, 50000);
        assert_eq!(config.download_workers, 4);
        assert_eq!(config.download_batch, 16);
        assert_eq!(config.max_body_bytes, 32 * 1024 * 1024);
        assert_eq!(config.token.len(), TOKEN_LENGTH);
    }

    #[test]
    fn generated_tokens_differ() {
        assert_ne!(generate_token(), generate_token());
    }
}
