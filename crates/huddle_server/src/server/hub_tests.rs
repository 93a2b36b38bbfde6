#![forbid(unsafe_code)]

use std::time::Duration;

use huddle_domain::{BoardId, ChannelName};
use huddle_protocol::events::ServerEvent;
use tokio::time::timeout;

use crate::server::hub::{ChannelHub, ChannelHubConfig};

fn board(id: &str) -> ChannelName {
	ChannelName::Board(BoardId::new(id).expect("valid BoardId"))
}

fn error_event(tag: &str) -> ServerEvent {
	ServerEvent::Error {
		message: tag.to_string(),
	}
}

fn hub(capacity: usize) -> ChannelHub {
	ChannelHub::new(ChannelHubConfig {
		subscriber_queue_capacity: capacity,
		debug_logs: false,
	})
}

#[tokio::test]
async fn publish_reaches_channel_members_only() {
	let hub = hub(16);

	let mut rx1 = hub.register_conn(1).await;
	let mut rx2 = hub.register_conn(2).await;

	hub.join(1, board("a")).await;
	hub.join(2, board("b")).await;

	hub.publish(&board("a"), error_event("for-a"), None).await;

	let got = timeout(Duration::from_millis(250), rx1.recv())
		.await
		.expect("expected event within timeout")
		.expect("channel open");
	assert_eq!(got, error_event("for-a"));

	let unexpected = timeout(Duration::from_millis(50), rx2.recv()).await;
	assert!(unexpected.is_err(), "member of another channel received the event");
}

#[tokio::test]
async fn publish_excludes_the_originating_connection() {
	let hub = hub(16);

	let mut rx1 = hub.register_conn(1).await;
	let mut rx2 = hub.register_conn(2).await;

	hub.join(1, board("a")).await;
	hub.join(2, board("a")).await;

	hub.publish(&board("a"), error_event("typing"), Some(1)).await;

	let got = timeout(Duration::from_millis(250), rx2.recv())
		.await
		.expect("expected event within timeout")
		.expect("channel open");
	assert_eq!(got, error_event("typing"));

	let unexpected = timeout(Duration::from_millis(50), rx1.recv()).await;
	assert!(unexpected.is_err(), "excluded sender received its own event");
}

#[tokio::test]
async fn broadcast_reaches_every_registered_connection() {
	let hub = hub(16);

	let mut rx1 = hub.register_conn(1).await;
	let mut rx2 = hub.register_conn(2).await;
	let mut rx3 = hub.register_conn(3).await;

	hub.broadcast(error_event("all"), Some(2)).await;

	for rx in [&mut rx1, &mut rx3] {
		let got = timeout(Duration::from_millis(250), rx.recv())
			.await
			.expect("expected event within timeout")
			.expect("channel open");
		assert_eq!(got, error_event("all"));
	}

	let unexpected = timeout(Duration::from_millis(50), rx2.recv()).await;
	assert!(unexpected.is_err(), "excluded connection received the broadcast");
}

#[tokio::test]
async fn unicast_to_unknown_connection_is_a_noop() {
	let hub = hub(16);

	assert!(!hub.send_to_conn(42, error_event("nobody")).await);
}

#[tokio::test]
async fn leave_and_unregister_stop_delivery() {
	let hub = hub(16);

	let mut rx1 = hub.register_conn(1).await;

	hub.join(1, board("a")).await;
	hub.leave(1, &board("a")).await;
	hub.publish(&board("a"), error_event("gone"), None).await;

	let unexpected = timeout(Duration::from_millis(50), rx1.recv()).await;
	assert!(unexpected.is_err(), "received event after leaving the channel");

	hub.join(1, board("a")).await;
	hub.unregister_conn(1).await;

	let counts = hub.channel_member_counts().await;
	assert_eq!(counts.get(&board("a")).copied().unwrap_or(0), 0);
}

#[tokio::test]
async fn full_queue_drops_instead_of_blocking() {
	let hub = hub(1);

	let mut rx1 = hub.register_conn(1).await;
	hub.join(1, board("a")).await;

	hub.publish(&board("a"), error_event("first"), None).await;
	hub.publish(&board("a"), error_event("second"), None).await;

	let got = timeout(Duration::from_millis(250), rx1.recv())
		.await
		.expect("expected first event")
		.expect("channel open");
	assert_eq!(got, error_event("first"));

	let unexpected = timeout(Duration::from_millis(50), rx1.recv()).await;
	assert!(unexpected.is_err(), "second event should have been dropped");
}

#[tokio::test]
async fn closed_receivers_are_pruned_on_delivery() {
	let hub = hub(16);

	{
		let _rx = hub.register_conn(1).await;
	}
	let mut rx2 = hub.register_conn(2).await;

	hub.join(1, board("a")).await;
	hub.join(2, board("a")).await;

	// Delivery to the dropped receiver must not prevent delivery to others.
	hub.publish(&board("a"), error_event("still-works"), None).await;

	let got = timeout(Duration::from_millis(250), rx2.recv())
		.await
		.expect("expected event within timeout")
		.expect("channel open");
	assert_eq!(got, error_event("still-works"));

	let counts = hub.channel_member_counts().await;
	assert_eq!(counts.get(&board("a")).copied().unwrap_or(0), 1);
}
