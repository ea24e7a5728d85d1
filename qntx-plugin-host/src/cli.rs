// SPDX-License-Identifier: Apache-2.0

//! Data structures for the plugin host's CLI.

use clap_verbosity_flag::{InfoLevel, Verbosity};
use std::path::PathBuf;

/// Discover, launch, and proxy out-of-process QNTX plugins.
#[derive(Debug, clap::Parser)]
#[command(about, version, long_about = None)]
pub struct Args {
	/// Path to the host's JSON configuration file (loader, keepalive, origin
	/// policy). TOML configuration-file loading is out of scope; the file
	/// this flag points at carries the same shape a TOML loader would
	/// otherwise produce.
	#[arg(short, long, value_name = "FILE", default_value = "qntx-plugin-host.json")]
	pub config: PathBuf,

	/// Directory plugin binaries resolve against when a `PluginConfig`
	/// names a relative path.
	#[arg(short = 'p', long, value_name = "DIR", default_value = "plugins")]
	pub plugins_dir: PathBuf,

	/// Address the HTTP/WebSocket surface binds to.
	#[arg(short, long, value_name = "ADDR", default_value = "127.0.0.1:8080")]
	pub bind: String,

	#[clap(flatten)]
	pub verbose: Verbosity<InfoLevel>,
}
