#![forbid(unsafe_code)]

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context as _, anyhow};
use huddle_util::SecretString;
use serde::Deserialize;
use tracing::info;

/// Default config path: `~/.huddle/config.toml`.
pub fn default_config_path() -> anyhow::Result<PathBuf> {
	let home = dirs::home_dir().ok_or_else(|| anyhow!("could not determine home directory"))?;
	Ok(home.join(".huddle").join("config.toml"))
}

/// Load the server config from TOML and env overrides.
#[allow(dead_code)]
pub fn load_server_config() -> anyhow::Result<ServerConfig> {
	let path = default_config_path()?;
	load_server_config_from_path(&path)
}

/// Same as `load_server_config` but with an explicit config path.
pub fn load_server_config_from_path(path: &Path) -> anyhow::Result<ServerConfig> {
	let file_cfg = read_toml_if_exists(path)
		.with_context(|| format!("read config from {}", path.display()))?
		.unwrap_or_default();

	let mut cfg = ServerConfig::from_file(file_cfg);

	apply_env_overrides(&mut cfg);

	Ok(cfg)
}

/// Server config (v1).
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
	pub server: ServerSettings,
	pub persistence: PersistenceSettings,
}

/// Server settings loaded by the server.
#[derive(Debug, Clone, Default)]
pub struct ServerSettings {
	/// PEM-encoded certificate path for QUIC/TLS.
	pub tls_cert_path: Option<PathBuf>,
	/// PEM-encoded private key path for QUIC/TLS.
	pub tls_key_path: Option<PathBuf>,
	/// Optional metrics exporter bind address (host:port).
	pub metrics_bind: Option<String>,
	/// Optional health/readiness HTTP bind address (host:port).
	pub health_bind: Option<String>,
	/// HMAC secret for connection credentials; unset disables verification.
	pub auth_hmac_secret: Option<SecretString>,
	/// Per-connection outbound event queue capacity.
	pub subscriber_queue_capacity: usize,
}

/// Persistence settings loaded by the server.
#[derive(Debug, Clone, Default)]
pub struct PersistenceSettings {
	/// Enable the SQL-backed stores. Disabled means in-memory stores whose
	/// contents are lost on restart.
	pub enabled: bool,
	/// Database URL (sqlite:, postgres: or mysql:).
	pub database_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileConfig {
	#[serde(default)]
	server: FileServerSettings,

	#[serde(default)]
	persistence: FilePersistenceSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileServerSettings {
	tls_cert_path: Option<String>,
	tls_key_path: Option<String>,
	metrics_bind: Option<String>,
	health_bind: Option<String>,
	auth_hmac_secret: Option<String>,
	subscriber_queue_capacity: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FilePersistenceSettings {
	enabled: Option<bool>,
	database_url: Option<String>,
}

impl ServerConfig {
	fn from_file(file: FileConfig) -> Self {
		Self {
			server: ServerSettings {
				tls_cert_path: file.server.tls_cert_path.filter(|s| !s.trim().is_empty()).map(PathBuf::from),
				tls_key_path: file.server.tls_key_path.filter(|s| !s.trim().is_empty()).map(PathBuf::from),
				metrics_bind: file.server.metrics_bind.filter(|s| !s.trim().is_empty()),
				health_bind: file.server.health_bind.filter(|s| !s.trim().is_empty()),
				auth_hmac_secret: file
					.server
					.auth_hmac_secret
					.filter(|s| !s.trim().is_empty())
					.map(SecretString::new),
				subscriber_queue_capacity: file.server.subscriber_queue_capacity.unwrap_or(256),
			},
			persistence: PersistenceSettings {
				enabled: file.persistence.enabled.unwrap_or(false),
				database_url: file.persistence.database_url.filter(|s| !s.trim().is_empty()),
			},
		}
	}
}

fn parse_env_bool(v: &str) -> Option<bool> {
	match v.trim().to_ascii_lowercase().as_str() {
		"1" | "true" | "yes" | "on" => Some(true),
		"0" | "false" | "no" | "off" => Some(false),
		_ => None,
	}
}

fn read_toml_if_exists(path: &Path) -> anyhow::Result<Option<FileConfig>> {
	match fs::read_to_string(path) {
		Ok(s) => {
			let cfg: FileConfig = toml::from_str(&s).context("parse TOML")?;
			Ok(Some(cfg))
		}
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
		Err(e) => Err(anyhow!(e).context("read config file")),
	}
}

fn apply_env_overrides(cfg: &mut ServerConfig) {
	if let Ok(v) = std::env::var("HUDDLE_SERVER_AUTH_HMAC_SECRET") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.server.auth_hmac_secret = Some(SecretString::new(v));
			info!("server auth: auth_hmac_secret overridden by env");
		}
	}

	if let Ok(v) = std::env::var("HUDDLE_SERVER_TLS_CERT") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.server.tls_cert_path = Some(PathBuf::from(v));
			info!("server config: tls_cert_path overridden by env");
		}
	}

	if let Ok(v) = std::env::var("HUDDLE_SERVER_TLS_KEY") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.server.tls_key_path = Some(PathBuf::from(v));
			info!("server config: tls_key_path overridden by env");
		}
	}

	if let Ok(v) = std::env::var("HUDDLE_METRICS_BIND") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.server.metrics_bind = Some(v);
			info!("server config: metrics_bind overridden by env");
		}
	}

	if let Ok(v) = std::env::var("HUDDLE_HEALTH_BIND") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.server.health_bind = Some(v);
			info!("server config: health_bind overridden by env");
		}
	}

	if let Ok(v) = std::env::var("HUDDLE_SUBSCRIBER_QUEUE_CAPACITY")
		&& let Ok(capacity) = v.trim().parse::<usize>()
		&& capacity > 0
	{
		cfg.server.subscriber_queue_capacity = capacity;
		info!(capacity, "server config: subscriber_queue_capacity overridden by env");
	}

	if let Ok(v) = std::env::var("HUDDLE_PERSISTENCE_ENABLED")
		&& let Some(enabled) = parse_env_bool(&v)
	{
		cfg.persistence.enabled = enabled;
		info!(enabled, "persistence: enabled overridden by env");
	}

	if let Ok(v) = std::env::var("HUDDLE_PERSISTENCE_DATABASE_URL") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.persistence.database_url = Some(v);
			info!("persistence: database_url overridden by env");
		}
	}
}
