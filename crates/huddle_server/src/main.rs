#![forbid(unsafe_code)]

mod config;
mod quic;
mod server;
mod util;

use std::net::SocketAddr;
use std::sync::Arc;

use huddle_util::endpoint::QuicEndpoint;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::quic::config::QuicServerConfig;
use crate::server::connection::{ConnectionSettings, handle_connection};
use crate::server::health::{HealthState, spawn_health_server};
use crate::server::hub::{ChannelHub, ChannelHubConfig};
use crate::server::service::RealtimeService;
use crate::server::store::{
	InMemoryMessageStore, InMemoryPrincipalStore, MessageStore, PrincipalStore, SqlBackend, SqlMessageStore,
	SqlPrincipalStore,
};

fn usage_and_exit() -> ! {
	eprintln!(
		"Usage: huddle_server [--bind quic://host:port]\n\
\n\
Options:\n\
\t--bind    Bind endpoint (default: quic://127.0.0.1:18500)\n\
\t         Format: quic://host:port\n\
\t--help   Show this help\n\
"
	);
	std::process::exit(2)
}

fn parse_args() -> SocketAddr {
	let mut bind_endpoint = "quic://127.0.0.1:18500".to_string();

	let mut it = std::env::args().skip(1);
	while let Some(arg) = it.next() {
		match arg.as_str() {
			"--help" | "-h" => usage_and_exit(),
			"--bind" | "--listen" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				if v.trim().is_empty() {
					eprintln!("--bind must be non-empty (expected quic://host:port)");
					usage_and_exit();
				}
				bind_endpoint = v;
			}
			other => {
				eprintln!("Unknown argument: {other}");
				usage_and_exit();
			}
		}
	}

	let bind = QuicEndpoint::parse(&bind_endpoint).unwrap_or_else(|e| {
		eprintln!("{e}");
		usage_and_exit();
	});

	let addr: SocketAddr = bind.to_socket_addr_if_ip_literal().unwrap_or_else(|e| {
		eprintln!("{e}");
		usage_and_exit();
	});

	addr
}

fn init_rustls_crypto_provider() {
	let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}

fn init_tracing() {
	let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info,huddle_server=debug".to_string());

	let otlp_endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
		.ok()
		.map(|v| v.trim().to_string())
		.filter(|v| !v.is_empty());
	let base = tracing_subscriber::registry()
		.with(tracing_subscriber::EnvFilter::new(filter))
		.with(tracing_subscriber::fmt::layer().with_target(false));

	if let Some(endpoint) = otlp_endpoint {
		use opentelemetry::global;
		use opentelemetry::trace::TracerProvider as _;
		use opentelemetry_otlp::WithExportConfig;

		match opentelemetry_otlp::SpanExporter::builder()
			.with_tonic()
			.with_endpoint(endpoint.clone())
			.build()
		{
			Ok(exporter) => {
				let tracer_provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
					.with_batch_exporter(exporter)
					.build();
				let tracer = tracer_provider.tracer("huddle_server");
				global::set_tracer_provider(tracer_provider);

				let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);
				base.with(otel_layer).init();
				info!(endpoint = %endpoint, "otlp tracing enabled");
			}
			Err(e) => {
				base.init();
				warn!(error = %e, "failed to initialize otlp tracing");
			}
		}
	} else {
		base.init();
	}
}

fn init_metrics(bind: Option<&str>) {
	let Some(bind) = bind else {
		return;
	};

	match bind.parse::<std::net::SocketAddr>() {
		Ok(addr) => {
			if let Err(e) = metrics_exporter_prometheus::PrometheusBuilder::new()
				.with_http_listener(addr)
				.install()
			{
				warn!(error = %e, "failed to start metrics exporter");
			} else {
				info!(%addr, "metrics exporter listening");
			}
		}
		Err(e) => {
			warn!(error = %e, %bind, "invalid metrics bind address (expected host:port)");
		}
	}
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	init_rustls_crypto_provider();
	init_tracing();

	let bind_addr = parse_args();

	let config_path = crate::config::default_config_path()?;
	let server_cfg = crate::config::load_server_config_from_path(&config_path)?;
	info!(path = %config_path.display(), "loaded server config (toml + env overrides)");

	init_metrics(server_cfg.server.metrics_bind.as_deref());

	let health_state = HealthState::new();
	if let Some(bind) = server_cfg.server.health_bind.as_deref() {
		match bind.parse::<std::net::SocketAddr>() {
			Ok(addr) => {
				spawn_health_server(addr, health_state.clone());
				info!(%addr, "health server listening");
			}
			Err(e) => warn!(error = %e, %bind, "invalid health bind address (expected host:port)"),
		}
	}

	let quic_cfg = QuicServerConfig::dev(bind_addr);
	let endpoint = if let (Some(cert_path), Some(key_path)) = (
		server_cfg.server.tls_cert_path.as_deref(),
		server_cfg.server.tls_key_path.as_deref(),
	) {
		info!(cert = %cert_path.display(), key = %key_path.display(), "loading TLS cert/key");
		quic_cfg.bind_endpoint_with_tls(cert_path, key_path)?
	} else {
		let (endpoint, server_cert_der) = quic_cfg.bind_dev_endpoint()?;
		info!(
			bind = %bind_addr,
			cert_der_len = server_cert_der.len(),
			"huddle_server: QUIC endpoint ready (dev self-signed cert)"
		);
		endpoint
	};

	if server_cfg.server.auth_hmac_secret.is_none() {
		warn!("no auth_hmac_secret configured; connection credentials are not verified");
	}

	let (messages, principals): (Arc<dyn MessageStore>, Arc<dyn PrincipalStore>) = if server_cfg.persistence.enabled {
		let Some(database_url) = server_cfg.persistence.database_url.as_deref() else {
			return Err(anyhow::anyhow!("persistence enabled but no database_url configured"));
		};

		let backend = SqlBackend::connect(database_url).await?;
		let messages = SqlMessageStore::initialize(backend.clone()).await?;
		let principals = SqlPrincipalStore::initialize(backend).await?;
		info!("persistence enabled; using SQL-backed stores");
		(Arc::new(messages), Arc::new(principals))
	} else {
		warn!("persistence disabled; using in-memory stores (history and read state are lost on restart)");
		(
			Arc::new(InMemoryMessageStore::default()),
			Arc::new(InMemoryPrincipalStore::default()),
		)
	};

	let hub = ChannelHub::new(ChannelHubConfig {
		subscriber_queue_capacity: server_cfg.server.subscriber_queue_capacity,
		..ChannelHubConfig::default()
	});

	// Presence and unread counts are cross-connection state; one service
	// instance is shared by every connection handler.
	let service = Arc::new(RealtimeService::new(hub, messages, principals));

	let conn_settings = ConnectionSettings {
		auth_hmac_secret: server_cfg.server.auth_hmac_secret.clone(),
		..ConnectionSettings::default()
	};

	health_state.mark_ready();

	let mut next_conn_id: u64 = 1;

	loop {
		let Some(connecting) = endpoint.accept().await else {
			break;
		};

		let conn_id = next_conn_id;
		next_conn_id += 1;
		metrics::counter!("huddle_server_connections_total").increment(1);

		let service = Arc::clone(&service);
		let conn_settings = conn_settings.clone();

		tokio::spawn(async move {
			match connecting.await {
				Ok(connection) => {
					info!(conn_id, remote = %connection.remote_address(), "accepted connection");

					if let Err(e) = handle_connection(conn_id, connection, service, conn_settings).await {
						warn!(conn_id, error = %e, "connection handler exited with error");
					}
				}
				Err(e) => {
					warn!(conn_id, error = %e, "failed to establish QUIC connection");
				}
			}
		});
	}

	Ok(())
}
