#![forbid(unsafe_code)]

use std::sync::Arc;

use anyhow::{Context as _, anyhow};
use huddle_protocol::events::{ClientEvent, ServerEvent};
use huddle_protocol::framing::{DEFAULT_MAX_FRAME_SIZE, FramingError, decode_frame, encode_frame};
use huddle_util::SecretString;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::server::auth::{AuthClaims, verify_hmac_token};
use crate::server::service::RealtimeService;
use crate::util::time::unix_ms_now;

/// Per-connection server settings.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
	pub max_frame_bytes: usize,

	/// HMAC secret for connection credentials; `None` disables verification
	/// (dev mode).
	pub auth_hmac_secret: Option<SecretString>,
}

impl Default for ConnectionSettings {
	fn default() -> Self {
		Self {
			max_frame_bytes: DEFAULT_MAX_FRAME_SIZE,
			auth_hmac_secret: None,
		}
	}
}

/// Drive one client connection to completion.
///
/// The first bidirectional stream the client opens carries length-prefixed
/// JSON frames in both directions. The first frame must be `hello`; when an
/// HMAC secret is configured, a bad credential rejects the connection before
/// any other event is processed.
pub async fn handle_connection(
	conn_id: u64,
	connection: quinn::Connection,
	service: Arc<RealtimeService>,
	settings: ConnectionSettings,
) -> anyhow::Result<()> {
	struct ConnectionGaugeGuard;
	impl Drop for ConnectionGaugeGuard {
		fn drop(&mut self) {
			metrics::gauge!("huddle_server_active_connections").decrement(1.0);
		}
	}

	metrics::gauge!("huddle_server_active_connections").increment(1.0);
	let _conn_guard = ConnectionGaugeGuard;

	let (mut control_send, mut control_recv) =
		connection.accept_bi().await.context("accept control bidirectional stream")?;

	let max_frame_bytes = settings.max_frame_bytes;
	let (event_tx, mut event_rx) = mpsc::unbounded_channel::<ClientEvent>();
	let reader_task = tokio::spawn(async move {
		let mut buf = Vec::<u8>::with_capacity(16 * 1024);
		let mut tmp = [0u8; 8192];

		loop {
			let n = match control_recv.read(&mut tmp).await {
				Ok(Some(n)) => n,
				Ok(None) => return Ok::<(), anyhow::Error>(()),
				Err(e) => return Err(anyhow!(e).context("control stream read failed")),
			};

			metrics::counter!("huddle_server_control_bytes_in_total").increment(n as u64);

			buf.extend_from_slice(&tmp[..n]);

			loop {
				match decode_frame::<serde_json::Value>(&buf, max_frame_bytes) {
					Ok((value, used)) => {
						buf.drain(0..used);
						metrics::counter!("huddle_server_events_in_total").increment(1);

						match serde_json::from_value::<ClientEvent>(value) {
							Ok(event) => {
								if event_tx.send(event).is_err() {
									return Ok(());
								}
							}
							Err(e) => {
								metrics::counter!("huddle_server_unknown_events_total").increment(1);
								warn!(conn_id, error = %e, "ignoring unrecognized client event");
							}
						}
					}
					Err(FramingError::InsufficientData { .. }) => break,
					Err(e) => {
						metrics::counter!("huddle_server_control_decode_errors_total").increment(1);
						return Err(anyhow!(e).context("failed to decode control frame"));
					}
				}
			}
		}
	});

	let token = wait_for_hello(&mut event_rx).await?;
	metrics::counter!("huddle_server_hello_total").increment(1);

	let mut auth_claims: Option<AuthClaims> = None;
	if let Some(secret) = settings.auth_hmac_secret.as_ref() {
		match verify_hmac_token(token.trim(), secret.expose()) {
			Ok(claims) => {
				debug!(conn_id, sub = %claims.sub, "connection credential verified");
				auth_claims = Some(claims);
			}
			Err(e) => {
				warn!(conn_id, error = %e, "rejecting connection: invalid credential");
				metrics::counter!("huddle_server_handshake_rejected_total").increment(1);
				let frame = encode_frame(
					&ServerEvent::Error {
						message: "Authentication error: Invalid token".to_string(),
					},
					max_frame_bytes,
				)
				.map_err(|e| anyhow!(e))?;
				control_send.write_all(&frame).await.ok();
				return Ok(());
			}
		}
	}

	let mut outbound_rx = service.attach(conn_id).await;

	let writer_task = tokio::spawn(async move {
		while let Some(event) = outbound_rx.recv().await {
			let frame = match encode_frame(&event, max_frame_bytes) {
				Ok(frame) => frame,
				Err(e) => {
					warn!(conn_id, error = %e, "failed to encode outbound frame; dropping event");
					continue;
				}
			};

			metrics::counter!("huddle_server_control_bytes_out_total").increment(frame.len() as u64);

			if let Err(e) = control_send.write_all(&frame).await {
				return Err(anyhow!(e).context("control stream write failed"));
			}
		}
		Ok::<(), anyhow::Error>(())
	});

	service
		.send_to_conn(
			conn_id,
			ServerEvent::Welcome {
				server_name: format!("huddle-server/{}", env!("CARGO_PKG_VERSION")),
				server_time_unix_ms: unix_ms_now(),
				max_frame_bytes: max_frame_bytes as u32,
			},
		)
		.await;

	while let Some(event) = event_rx.recv().await {
		match event {
			ClientEvent::Hello { .. } => {
				debug!(conn_id, "ignoring duplicate hello");
			}

			ClientEvent::Authenticate { user_id, username } => {
				if let Some(claims) = auth_claims.as_ref()
					&& claims.sub != user_id
				{
					warn!(
						conn_id,
						claimed = %claims.sub,
						declared = %user_id,
						"authenticate user id differs from credential subject"
					);
				}

				service.authenticate(conn_id, &user_id, &username).await;
			}

			ClientEvent::BoardJoin { board_id } => service.join_board(conn_id, &board_id).await,
			ClientEvent::BoardLeave { board_id } => service.leave_board(conn_id, &board_id).await,
			ClientEvent::TaskJoin { task_id } => service.join_task(conn_id, &task_id).await,
			ClientEvent::TaskLeave { task_id } => service.leave_task(conn_id, &task_id).await,

			ClientEvent::CommentTyping { task_id, is_typing } => {
				service.comment_typing(conn_id, &task_id, is_typing).await;
			}

			ClientEvent::SendMessage { text, file, temp_id } => {
				service.send_message(conn_id, text, file, temp_id).await;
			}

			ClientEvent::MessageRead { message_ids } => {
				service.mark_read(conn_id, message_ids).await;
			}

			ClientEvent::UnreadRequest {} => {
				service.recompute_and_push().await;
			}
		}
	}

	info!(conn_id, "connection closing");
	service.disconnect(conn_id).await;

	// Disconnect drops the hub sender, which ends the writer's queue.
	let reader_result = reader_task.await;
	let _ = writer_task.await;

	match reader_result {
		Ok(result) => result,
		Err(e) => Err(anyhow!(e).context("reader task panicked")),
	}
}

async fn wait_for_hello(event_rx: &mut mpsc::UnboundedReceiver<ClientEvent>) -> anyhow::Result<String> {
	while let Some(event) = event_rx.recv().await {
		if let ClientEvent::Hello { token } = event {
			return Ok(token);
		}
	}
	Err(anyhow!("connection closed before hello"))
}
