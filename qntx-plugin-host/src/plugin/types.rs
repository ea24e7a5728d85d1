// SPDX-License-Identifier: Apache-2.0

//! The manager's per-plugin runtime record (§3 "ManagedPlugin").

use std::sync::Arc;
use tokio::process::Child;

use crate::config::PluginConfig;
use crate::plugin::proxy::ExternalProxy;

/// Created by a successful `load_plugin`, removed only by `shutdown`. At
/// most one record exists per logical name at a time; no two records share
/// a port (§3 Invariants i, iv).
pub struct ManagedPlugin {
	/// The configuration this plugin was loaded from.
	pub config: PluginConfig,

	/// The live gRPC connection and cached identity.
	pub proxy: Arc<ExternalProxy>,

	/// The plugin's actual bound port, which may differ from the port
	/// requested at launch if auto-increment collision recovery kicked in.
	pub port: u16,

	/// The child process, present only for plugins the manager launched
	/// itself. `None` for plugins configured with a pre-running `address`.
	pub process: Option<Child>,
}

impl ManagedPlugin {
	pub fn name(&self) -> &str {
		&self.config.name
	}
}
