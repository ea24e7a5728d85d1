// SPDX-License-Identifier: Apache-2.0

//! Captures a launched plugin's stdout/stderr and re-levels it into the
//! host's structured log (§4.1 "Port auto-increment cooperation", §5
//! blocking point (b)).
//!
//! The single `QNTX_PLUGIN_PORT=<decimal>` line is parsed off-band within a
//! ~2 second grace window and never forwarded to application logs: it is a
//! control signal between the manager and the plugin's own main, not
//! diagnostic output.

use serde_json::Value;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

const PORT_LINE_PREFIX: &str = "QNTX_PLUGIN_PORT=";
pub const PORT_ANNOUNCEMENT_GRACE: Duration = Duration::from_secs(2);

/// Spawn a task that copies `stdout` lines into the host's log, tagged with
/// `plugin_name`, skipping the port announcement line and forwarding it
/// instead over `port_tx`. Returns immediately; the task runs until the
/// stream ends.
pub fn bridge_stdout<R>(plugin_name: String, stdout: R, port_tx: oneshot::Sender<u16>)
where
	R: AsyncRead + Unpin + Send + 'static,
{
	tokio::spawn(async move {
		let mut lines = BufReader::new(stdout).lines();
		let mut port_tx = Some(port_tx);

		loop {
			match lines.next_line().await {
				Ok(Some(line)) => {
					if let Some(port) = parse_port_announcement(&line) {
						if let Some(tx) = port_tx.take() {
							let _ = tx.send(port);
						}
						continue;
					}
					relevel_and_log(&plugin_name, &line);
				}
				Ok(None) => break,
				Err(e) => {
					warn!(plugin = %plugin_name, error = %e, "error reading plugin stdout");
					break;
				}
			}
		}
	});
}

/// Spawn a task that copies `stderr` lines into the host's log at `warn`,
/// tagged with `plugin_name`. Stderr never carries the port announcement.
pub fn bridge_stderr<R>(plugin_name: String, stderr: R)
where
	R: AsyncRead + Unpin + Send + 'static,
{
	tokio::spawn(async move {
		let mut lines = BufReader::new(stderr).lines();
		while let Ok(Some(line)) = lines.next_line().await {
			warn!(plugin = %plugin_name, "{}", line);
		}
	});
}

/// Wait up to [`PORT_ANNOUNCEMENT_GRACE`] for the announced port. Returns
/// `None` on timeout, meaning the plugin bound on the requested port.
pub async fn await_port_announcement(rx: oneshot::Receiver<u16>) -> Option<u16> {
	timeout(PORT_ANNOUNCEMENT_GRACE, rx).await.ok()?.ok()
}

fn parse_port_announcement(line: &str) -> Option<u16> {
	line.strip_prefix(PORT_LINE_PREFIX)?.trim().parse().ok()
}

/// Structured-JSON lines carrying a recognizable `level` field are re-levelled
/// into the host's own log at that level; everything else is tagged at
/// `info` with the raw text preserved.
fn relevel_and_log(plugin_name: &str, line: &str) {
	if let Ok(Value::Object(object)) = serde_json::from_str::<Value>(line) {
		if let Some(level) = object.get("level").and_then(Value::as_str) {
			let message = object
				.get("message")
				.or_else(|| object.get("msg"))
				.and_then(Value::as_str)
				.unwrap_or(line);
			match level.to_ascii_lowercase().as_str() {
				"error" | "fatal" | "critical" => error!(plugin = plugin_name, "{}", message),
				"warn" | "warning" => warn!(plugin = plugin_name, "{}", message),
				"debug" | "trace" => debug!(plugin = plugin_name, "{}", message),
				_ => info!(plugin = plugin_name, "{}", message),
			}
			return;
		}
	}
	info!(plugin = plugin_name, "{}", line);
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_port_announcement_line() {
		assert_eq!(parse_port_announcement("QNTX_PLUGIN_PORT=38701"), Some(38701));
		assert_eq!(parse_port_announcement("QNTX_PLUGIN_PORT=not-a-number"), None);
		assert_eq!(parse_port_announcement("hello world"), None);
	}

	#[tokio::test]
	async fn bridges_announced_port_to_receiver() {
		let data = b"starting up\nQNTX_PLUGIN_PORT=40000\nready\n".as_slice();
		let (tx, rx) = oneshot::channel();
		bridge_stdout("test-plugin".to_owned(), data, tx);
		let port = await_port_announcement(rx).await;
		assert_eq!(port, Some(40000));
	}

	#[tokio::test]
	async fn missing_announcement_times_out_to_none() {
		let data = b"no announcement here\n".as_slice();
		let (tx, rx) = oneshot::channel();
		bridge_stdout("test-plugin".to_owned(), data, tx);
		let port = await_port_announcement(rx).await;
		assert_eq!(port, None);
	}
}
