// SPDX-License-Identifier: Apache-2.0

//! The keepalive engine (§4.8): a per-connection PING/PONG liveness handler
//! plus a retry-with-backoff connect driver, both reusable by any bridge
//! (the WebSocket proxy is the only caller today, but nothing here is
//! WebSocket-specific).

use qntx_plugin_proto::types::WsFrame;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::warn;

use crate::config::KeepaliveConfig;

fn now_nanos() -> i64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.unwrap_or_default()
		.as_nanos() as i64
}

const MAX_LATENCY_SAMPLES: usize = 100;

/// Concurrency-safe counters for one connection's keepalive traffic.
#[derive(Debug, Default)]
pub struct KeepaliveMetrics {
	pings_sent: AtomicU64,
	pongs_received: AtomicU64,
	reconnects: AtomicU64,
	latencies: Mutex<VecDeque<i64>>,
	last_ping_nanos: AtomicU64,
	last_pong_nanos: AtomicU64,
	started_nanos: AtomicU64,
}

impl KeepaliveMetrics {
	pub fn new() -> Arc<Self> {
		let metrics = KeepaliveMetrics::default();
		metrics.started_nanos.store(now_nanos() as u64, Ordering::Relaxed);
		Arc::new(metrics)
	}

	pub fn pings_sent(&self) -> u64 {
		self.pings_sent.load(Ordering::Relaxed)
	}

	pub fn pongs_received(&self) -> u64 {
		self.pongs_received.load(Ordering::Relaxed)
	}

	pub fn reconnects(&self) -> u64 {
		self.reconnects.load(Ordering::Relaxed)
	}

	fn record_ping(&self) {
		self.pings_sent.fetch_add(1, Ordering::Relaxed);
		self.last_ping_nanos.store(now_nanos() as u64, Ordering::Relaxed);
	}

	fn record_reconnect(&self) {
		self.reconnects.fetch_add(1, Ordering::Relaxed);
	}

	async fn record_pong(&self, embedded_ts_nanos: i64) {
		self.pongs_received.fetch_add(1, Ordering::Relaxed);
		self.last_pong_nanos.store(now_nanos() as u64, Ordering::Relaxed);

		let latency = (now_nanos() - embedded_ts_nanos).max(0);
		let mut latencies = self.latencies.lock().await;
		latencies.push_back(latency);
		while latencies.len() > MAX_LATENCY_SAMPLES {
			latencies.pop_front();
		}
	}

	/// Mean of the bounded ring of recent latencies, in nanoseconds.
	pub async fn average_latency_nanos(&self) -> f64 {
		let latencies = self.latencies.lock().await;
		if latencies.is_empty() {
			return 0.0;
		}
		let sum: i64 = latencies.iter().sum();
		sum as f64 / latencies.len() as f64
	}

	pub async fn sample_count(&self) -> usize {
		self.latencies.lock().await.len()
	}

	fn seconds_since_last_pong(&self) -> Option<f64> {
		let last = self.last_pong_nanos.load(Ordering::Relaxed);
		if last == 0 {
			return None;
		}
		Some((now_nanos() as u64).saturating_sub(last) as f64 / 1_000_000_000.0)
	}
}

/// A frame the keepalive loop produced in response to an inbound frame, or
/// an error surfaced from an `Error` frame.
pub enum KeepaliveOutcome {
	/// Nothing to send back; the frame was fully handled (e.g. an inbound
	/// PING auto-answered) or fell through untouched.
	None,
	Reply(WsFrame),
	Error(Vec<u8>),
}

/// Per-connection keepalive state. `Start` is idempotent: calling it twice
/// on a running handler is a no-op, guarded by the `running` flag.
pub struct KeepaliveHandler {
	config: KeepaliveConfig,
	metrics: Arc<KeepaliveMetrics>,
	running: Mutex<bool>,
}

impl KeepaliveHandler {
	pub fn new(config: KeepaliveConfig) -> Self {
		KeepaliveHandler {
			config,
			metrics: KeepaliveMetrics::new(),
			running: Mutex::new(false),
		}
	}

	pub fn metrics(&self) -> Arc<KeepaliveMetrics> {
		Arc::clone(&self.metrics)
	}

	/// Drive `connect` with this handler's own reconnect-attempt/backoff
	/// config, recording each retry on this handler's metrics (§4.8
	/// "ConnectWithRetry").
	pub async fn reconnect<T, E, F, Fut>(&self, connect: F) -> Result<T, E>
	where
		F: FnMut() -> Fut,
		Fut: Future<Output = Result<T, E>>,
	{
		connect_with_retry(&self.config, &self.metrics, connect).await
	}

	/// Drive the ping loop, calling `send_ping` on each tick. `send_ping`
	/// returning an error is logged but never stops the loop: the transport
	/// or a higher layer is responsible for reconnecting.
	pub async fn start<F, Fut>(&self, mut send_ping: F)
	where
		F: FnMut(WsFrame) -> Fut,
		Fut: Future<Output = Result<(), String>>,
	{
		{
			let mut running = self.running.lock().await;
			if *running {
				return;
			}
			*running = true;
		}

		if !self.config.enabled {
			return;
		}

		let mut ticker = tokio::time::interval(self.config.ping_interval());
		ticker.tick().await; // first tick fires immediately; skip it

		loop {
			ticker.tick().await;

			if let Some(since) = self.metrics.seconds_since_last_pong() {
				if since > self.config.pong_timeout().as_secs_f64() {
					warn!(since_secs = since, "keepalive: pong timeout exceeded, continuing");
				}
			}

			self.metrics.record_ping();
			let ts_millis = now_nanos() / 1_000_000;
			let frame = WsFrame::Ping { ts_millis };
			if let Err(e) = send_ping(frame).await {
				warn!(error = %e, "keepalive: failed to send ping");
			}

			if !*self.running.lock().await {
				break;
			}
		}
	}

	pub async fn stop(&self) {
		*self.running.lock().await = false;
	}

	/// Handle an inbound frame, producing whatever (if anything) should be
	/// sent back or surfaced as an error.
	pub async fn handle_frame(&self, frame: &WsFrame) -> KeepaliveOutcome {
		match frame {
			WsFrame::Pong { ts_millis } => {
				self.metrics.record_pong(ts_millis.saturating_mul(1_000_000)).await;
				KeepaliveOutcome::None
			}
			WsFrame::Ping { ts_millis } => KeepaliveOutcome::Reply(WsFrame::Pong { ts_millis: *ts_millis }),
			WsFrame::Error { bytes } => KeepaliveOutcome::Error(bytes.clone()),
			_ => KeepaliveOutcome::None,
		}
	}
}

/// Drive `connect` with attempt-indexed exponential backoff
/// (`base * 2^(attempt-1)` before the Nth retry), respecting `attempts`
/// tries. Returns the last underlying error if every attempt fails.
pub async fn connect_with_retry<T, E, F, Fut>(
	config: &KeepaliveConfig,
	metrics: &KeepaliveMetrics,
	mut connect: F,
) -> Result<T, E>
where
	F: FnMut() -> Fut,
	Fut: Future<Output = Result<T, E>>,
{
	let mut last_err = None;
	for attempt in 0..config.reconnect_attempts {
		if attempt > 0 {
			metrics.record_reconnect();
			let backoff = config.backoff_base() * 2u32.pow(attempt.saturating_sub(1));
			tokio::time::sleep_until(Instant::now() + backoff).await;
		}
		match connect().await {
			Ok(value) => return Ok(value),
			Err(e) => last_err = Some(e),
		}
	}
	Err(last_err.expect("reconnect_attempts is always >= 1"))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn pong_updates_metrics_with_bounded_latency_ring() {
		let handler = KeepaliveHandler::new(KeepaliveConfig {
			enabled: true,
			..Default::default()
		});

		for _ in 0..150 {
			let ts_millis = now_nanos() / 1_000_000;
			handler.handle_frame(&WsFrame::Pong { ts_millis }).await;
		}

		assert_eq!(handler.metrics().pongs_received(), 150);
		assert_eq!(handler.metrics().sample_count().await, MAX_LATENCY_SAMPLES);
	}

	#[tokio::test]
	async fn ping_is_echoed_as_pong() {
		let handler = KeepaliveHandler::new(KeepaliveConfig::default());
		let outcome = handler.handle_frame(&WsFrame::Ping { ts_millis: 42 }).await;
		match outcome {
			KeepaliveOutcome::Reply(WsFrame::Pong { ts_millis }) => assert_eq!(ts_millis, 42),
			_ => panic!("expected pong reply"),
		}
	}

	#[tokio::test]
	async fn error_frame_surfaces_to_caller() {
		let handler = KeepaliveHandler::new(KeepaliveConfig::default());
		let outcome = handler.handle_frame(&WsFrame::Error { bytes: b"boom".to_vec() }).await;
		assert!(matches!(outcome, KeepaliveOutcome::Error(bytes) if bytes == b"boom"));
	}

	#[tokio::test]
	async fn connect_with_retry_succeeds_on_final_attempt() {
		let config = KeepaliveConfig {
			reconnect_attempts: 3,
			backoff_base_secs: 0,
			..Default::default()
		};
		let metrics = KeepaliveMetrics::default();
		let attempts = std::sync::atomic::AtomicU32::new(0);

		let result: Result<(), &str> = connect_with_retry(&config, &metrics, || {
			let n = attempts.fetch_add(1, Ordering::SeqCst);
			async move { if n < 2 { Err("not yet") } else { Ok(()) } }
		})
		.await;

		assert!(result.is_ok());
		assert_eq!(metrics.reconnects(), 2);
	}

	#[tokio::test]
	async fn connect_with_retry_returns_last_error_after_exhausting_attempts() {
		let config = KeepaliveConfig {
			reconnect_attempts: 2,
			backoff_base_secs: 0,
			..Default::default()
		};
		let metrics = KeepaliveMetrics::default();

		let result: Result<(), &str> = connect_with_retry(&config, &metrics, || async { Err("nope") }).await;

		assert_eq!(result, Err("nope"));
	}
}
