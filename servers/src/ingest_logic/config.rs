use anyhow::{bail, Context, Result};
use clap::Parser;
use lib_propagation::DownstreamNode;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

const DEFAULT_CONFIG_FILE: &str = "server_ingest.conf";
const DEFAULT_NOTIFY_ADDRESS: &str = "ws://localhost:8000/ws/notifications";

/// One configuration layer. Every field is optional so layers can be merged.
#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default)]
#[clap(about = "Metadata ingestion and change-propagation server", version)]
#[serde(rename_all = "camelCase")]
pub struct ConfigLayer {
    #[clap(long, env = "INGEST_PORT", help = "Port to listen on for HTTP and WebSocket clients.")]
    pub port: Option<u16>,

    #[clap(long, env = "INGEST_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "INGEST_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "INGEST_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "DATABASE_URL", help = "PostgreSQL URL for the document and graph stores.")]
    pub database_url: Option<String>,

    #[clap(long, env = "REDIS_URL", help = "Redis URL for the state cache and the stream broker.")]
    pub redis_url: Option<String>,

    #[clap(long, env = "INGEST_STREAM_PREFIX", help = "Prefix prepended to every broker topic stream key.")]
    pub stream_prefix: Option<String>,

    #[clap(long, env = "INGEST_NOTIFY_ADDRESS", help = "Externally advertised live notification address of this process.")]
    pub notify_address: Option<String>,

    #[clap(
        long,
        env = "INGEST_MEMORY",
        num_args = 0..=1,
        default_missing_value = "true",
        help = "Run on in-memory backends instead of Postgres and Redis."
    )]
    pub memory: Option<bool>,

    /// Downstream registry; only settable from the config file.
    #[clap(skip)]
    pub downstream: Option<Vec<DownstreamNode>>,
}

impl ConfigLayer {
    // Merge two layers, where 'other' overrides 'self' for Some values
    fn merge(self, other: ConfigLayer) -> ConfigLayer {
        ConfigLayer {
            port: other.port.or(self.port),
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            database_url: other.database_url.or(self.database_url),
            redis_url: other.redis_url.or(self.redis_url),
            stream_prefix: other.stream_prefix.or(self.stream_prefix),
            notify_address: other.notify_address.or(self.notify_address),
            memory: other.memory.or(self.memory),
            downstream: other.downstream.or(self.downstream),
        }
    }

    fn defaults() -> ConfigLayer {
        ConfigLayer {
            port: Some(8000),
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
            stream_prefix: Some(String::new()),
            notify_address: Some(DEFAULT_NOTIFY_ADDRESS.to_string()),
            memory: Some(false),
            ..Default::default()
        }
    }
}

/// Fully resolved server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub log_dir: PathBuf,
    pub log_level: String,
    pub database_url: Option<String>,
    pub redis_url: Option<String>,
    pub stream_prefix: String,
    pub notify_address: String,
    pub memory: bool,
    pub downstream: Vec<DownstreamNode>,
}

/// The reference registry: one queue sink and one live channel on our own address.
pub fn default_downstream(notify_address: &str) -> Vec<DownstreamNode> {
    vec![
        DownstreamNode::queue("kafka_node", "downstream_topic"),
        DownstreamNode::live_channel("websocket_node", notify_address),
    ]
}

/// Applies defaults < file < environment/CLI and checks the result.
pub fn resolve(file: Option<ConfigLayer>, cli: ConfigLayer) -> Result<Config> {
    let mut layered = ConfigLayer::defaults();
    if let Some(file) = file {
        layered = layered.merge(file);
    }
    layered = layered.merge(cli);

    let notify_address = layered.notify_address.unwrap_or_else(|| DEFAULT_NOTIFY_ADDRESS.to_string());
    let config = Config {
        port: layered.port.unwrap_or(8000),
        log_dir: layered.log_dir.unwrap_or_else(|| PathBuf::from("./logs")),
        log_level: layered.log_level.unwrap_or_else(|| "info".to_string()),
        database_url: layered.database_url,
        redis_url: layered.redis_url,
        stream_prefix: layered.stream_prefix.unwrap_or_default(),
        memory: layered.memory.unwrap_or(false),
        downstream: layered
            .downstream
            .unwrap_or_else(|| default_downstream(&notify_address)),
        notify_address,
    };

    let mut seen = HashSet::new();
    for node in &config.downstream {
        if !seen.insert(node.id.as_str()) {
            bail!("downstream node id '{}' is listed more than once", node.id);
        }
    }

    if !config.memory {
        if config.database_url.is_none() {
            bail!("databaseUrl (DATABASE_URL) is required unless running with --memory");
        }
        if config.redis_url.is_none() {
            bail!("redisUrl (REDIS_URL) is required unless running with --memory");
        }
    }

    Ok(config)
}

fn read_file_layer(path: &Path) -> Result<Option<ConfigLayer>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).with_context(|| format!("Failed to read config file {}", path.display()))?;
    let layer = serde_json::from_str::<ConfigLayer>(&raw)
        .with_context(|| format!("Failed to parse config file {}", path.display()))?;
    Ok(Some(layer))
}

/// Loads `.env`, the JSON config file and the CLI/environment, in that order.
pub fn load_config() -> Result<Config> {
    // A missing .env file is normal.
    let _ = dotenvy::dotenv();

    let cli = ConfigLayer::parse();
    let config_file_path = cli
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    let file = read_file_layer(&config_file_path)?;
    resolve(file, cli)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lib_propagation::Sink;

    fn memory_cli() -> ConfigLayer {
        ConfigLayer {
            memory: Some(true),
            ..Default::default()
        }
    }

    #[test]
    fn defaults_use_reference_registry() {
        let config = resolve(None, memory_cli()).unwrap();
        assert_eq!(config.port, 8000);
        assert_eq!(config.notify_address, DEFAULT_NOTIFY_ADDRESS);
        assert_eq!(config.downstream, default_downstream(DEFAULT_NOTIFY_ADDRESS));
    }

    #[test]
    fn cli_overrides_file_and_file_overrides_defaults() {
        let file: ConfigLayer = serde_json::from_str(
            r#"{
                "port": 9100,
                "logLevel": "debug",
                "notifyAddress": "ws://ingest:9100/ws/notifications",
                "downstream": [{"id": "audit", "type": "queue", "topic": "audit_events"}]
            }"#,
        )
        .unwrap();
        let cli = ConfigLayer {
            port: Some(9200),
            ..memory_cli()
        };

        let config = resolve(Some(file), cli).unwrap();
        assert_eq!(config.port, 9200);
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.notify_address, "ws://ingest:9100/ws/notifications");
        assert_eq!(config.downstream.len(), 1);
        assert_eq!(
            config.downstream[0].sink,
            Sink::Queue {
                topic: "audit_events".into()
            }
        );
    }

    #[test]
    fn default_live_channel_follows_notify_address() {
        let cli = ConfigLayer {
            notify_address: Some("ws://10.0.0.5:8000/ws/notifications".into()),
            ..memory_cli()
        };
        let config = resolve(None, cli).unwrap();
        assert_eq!(
            config.downstream[1].sink,
            Sink::LiveChannel {
                address: "ws://10.0.0.5:8000/ws/notifications".into()
            }
        );
    }

    #[test]
    fn duplicate_downstream_ids_are_rejected() {
        let file: ConfigLayer = serde_json::from_str(
            r#"{
                "downstream": [
                    {"id": "n", "type": "queue", "topic": "a"},
                    {"id": "n", "type": "queue", "topic": "b"}
                ]
            }"#,
        )
        .unwrap();

        let err = resolve(Some(file), memory_cli()).unwrap_err();
        assert!(err.to_string().contains("'n'"), "{}", err);
    }

    #[test]
    fn real_backends_need_urls() {
        assert!(resolve(None, ConfigLayer::default()).is_err());

        let cli = ConfigLayer {
            database_url: Some("postgres://localhost/metadata".into()),
            redis_url: Some("redis://127.0.0.1/".into()),
            ..Default::default()
        };
        assert!(!resolve(None, cli).unwrap().memory);
    }

    #[test]
    fn file_layer_is_optional() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_file_layer(&dir.path().join("absent.conf")).unwrap().is_none());

        let path = dir.path().join("server_ingest.conf");
        fs::write(&path, r#"{"redisUrl": "redis://cache:6379/"}"#).unwrap();
        let layer = read_file_layer(&path).unwrap().unwrap();
        assert_eq!(layer.redis_url.as_deref(), Some("redis://cache:6379/"));

        fs::write(&path, "not json").unwrap();
        assert!(read_file_layer(&path).is_err());
    }
}
