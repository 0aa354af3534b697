use std::path::PathBuf;

use serde::Deserialize;

/// Top-level server configuration, loaded from `parlor.toml` when present
/// and overridden by environment variables and CLI flags.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub ssl_cert: Option<PathBuf>,
    pub ssl_key: Option<PathBuf>,
    pub status_file: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            db_path: PathBuf::from("parlor.db"),
            ssl_cert: None,
            ssl_key: None,
            status_file: None,
        }
    }
}

impl ServerConfig {
    /// Load config from `parlor.toml` if it exists, then apply env var
    /// overrides.
    pub fn load() -> Self {
        let mut config = match std::fs::read_to_string("parlor.toml") {
            Ok(content) => match toml::from_str::<ServerConfig>(&content) {
                Ok(cfg) => {
                    tracing::info!("Loaded configuration from parlor.toml");
                    cfg
                },
                Err(e) => {
                    tracing::warn!("Failed to parse parlor.toml: {e}, using defaults");
                    ServerConfig::default()
                },
            },
            Err(_) => ServerConfig::default(),
        };

        if let Ok(host) = std::env::var("PARLOR_HOST")
            && !host.is_empty()
        {
            config.host = host;
        }
        if let Ok(port) = std::env::var("PARLOR_PORT")
            && let Ok(port) = port.parse()
        {
            config.port = port;
        }
        if let Ok(path) = std::env::var("PARLOR_DB_PATH")
            && !path.is_empty()
        {
            config.db_path = PathBuf::from(path);
        }

        config
    }

    /// Validate configuration; returns an error message for fatal
    /// problems.
    pub fn validate(&self) -> Result<(), String> {
        match (&self.ssl_cert, &self.ssl_key) {
            (Some(_), None) | (None, Some(_)) => {
                Err("Both --ssl-cert and --ssl-key must be provided together".to_string())
            },
            _ => Ok(()),
        }
    }

    pub fn tls_enabled(&self) -> bool {
        self.ssl_cert.is_some() && self.ssl_key.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.host, "0.0.0.0");
        assert_eq!(cfg.port, 8000);
        assert_eq!(cfg.db_path, PathBuf::from("parlor.db"));
        assert!(cfg.ssl_cert.is_none());
    }

    #[test]
    fn parse_minimal_toml() {
        let toml_str = r#"
host = "127.0.0.1"
port = 9000
db_path = "/tmp/test.db"
"#;
        let cfg: ServerConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.host, "127.0.0.1");
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.db_path, PathBuf::from("/tmp/test.db"));
    }

    #[test]
    fn cert_without_key_is_rejected() {
        let cfg = ServerConfig {
            ssl_cert: Some(PathBuf::from("cert.pem")),
            ..ServerConfig::default()
        };
        assert!(cfg.validate().is_err());

        let cfg = ServerConfig {
            ssl_cert: Some(PathBuf::from("cert.pem")),
            ssl_key: Some(PathBuf::from("key.pem")),
            ..ServerConfig::default()
        };
        assert!(cfg.validate().is_ok());
        assert!(cfg.tls_enabled());
    }
}
