// SPDX-License-Identifier: Apache-2.0

//! The loader (§4.1 "Loader", §6 "Binary naming conventions"): turns an
//! enabled-plugin name list and a set of search paths into concrete
//! `PluginConfig`s by locating executable binaries. Parsing per-plugin TOML
//! files is a collaborator's concern (§1 Non-goals "configuration-file
//! loading"); this module accepts already-parsed overrides instead.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use which::which_in;

use crate::config::{LoaderConfig, PluginConfig, PluginConfigOverride};

/// Resolves search paths (`~` and relative-to-cwd expansion) once at
/// construction, then probes the binary naming convention per plugin name.
pub struct Loader {
	search_paths: Vec<PathBuf>,
}

impl Loader {
	pub fn new(config: &LoaderConfig) -> Self {
		Loader {
			search_paths: config.search_paths.iter().map(|p| expand_path(p)).collect(),
		}
	}

	/// For every enabled name, probe `qntx-N-plugin`, `qntx-N`, then `N` in
	/// each search path in order; the first executable file wins (§6).
	/// Names with no matching binary are skipped with a warning, never
	/// failing the whole discovery pass (§4.1 "resilient partial-failure
	/// loading" applies here too, one level up). Repeated names in
	/// `config.enabled` collapse to a single entry.
	pub fn discover(&self, config: &LoaderConfig, overrides: &HashMap<String, PluginConfigOverride>) -> Vec<PluginConfig> {
		let mut discovered = Vec::new();
		let mut seen = HashSet::new();

		for name in &config.enabled {
			if !seen.insert(name.as_str()) {
				continue;
			}

			let Some(binary) = self.probe(name) else {
				warn!(plugin = %name, search_paths = ?self.search_paths, "no binary found for plugin under any naming convention");
				continue;
			};

			let base = PluginConfig {
				name: name.clone(),
				enabled: true,
				address: None,
				binary: Some(binary),
				args: Vec::new(),
				env: HashMap::new(),
				auto_start: true,
				config: HashMap::new(),
			};

			discovered.push(apply_override(base, overrides.get(name)));
		}

		discovered
	}

	fn probe(&self, name: &str) -> Option<PathBuf> {
		for candidate in [format!("qntx-{name}-plugin"), format!("qntx-{name}"), name.to_owned()] {
			for dir in &self.search_paths {
				if let Ok(found) = which_in(&candidate, Some(dir), dir) {
					debug!(plugin = %name, binary = %found.display(), "resolved plugin binary");
					return Some(found);
				}
			}
		}
		None
	}
}

fn expand_path(path: &Path) -> PathBuf {
	let Ok(stripped) = path.strip_prefix("~") else {
		return path.to_path_buf();
	};
	match dirs::home_dir() {
		Some(home) => home.join(stripped),
		None => path.to_path_buf(),
	}
}

fn apply_override(mut base: PluginConfig, over: Option<&PluginConfigOverride>) -> PluginConfig {
	let Some(over) = over else {
		return base;
	};
	if let Some(enabled) = over.enabled {
		base.enabled = enabled;
	}
	if let Some(address) = over.address.clone() {
		base.address = Some(address);
	}
	if let Some(binary) = over.binary.clone() {
		base.binary = Some(binary);
	}
	if !over.args.is_empty() {
		base.args = over.args.clone();
	}
	base.env.extend(over.env.clone());
	if let Some(auto_start) = over.auto_start {
		base.auto_start = auto_start;
	}
	base.config.extend(over.config.clone());
	base
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn expand_path_resolves_home_prefix() {
		if let Some(home) = dirs::home_dir() {
			let expanded = expand_path(Path::new("~/plugins"));
			assert_eq!(expanded, home.join("plugins"));
		}
	}

	#[test]
	fn expand_path_passes_through_non_tilde_paths() {
		let expanded = expand_path(Path::new("/opt/plugins"));
		assert_eq!(expanded, PathBuf::from("/opt/plugins"));
	}

	#[test]
	fn apply_override_merges_selected_fields() {
		let base = PluginConfig::for_address("mock", "127.0.0.1:1");
		let over = PluginConfigOverride {
			enabled: Some(false),
			..Default::default()
		};
		let merged = apply_override(base, Some(&over));
		assert!(!merged.enabled);
		assert_eq!(merged.address.as_deref(), Some("127.0.0.1:1"));
	}

	#[test]
	fn apply_override_is_noop_when_absent() {
		let base = PluginConfig::for_address("mock", "127.0.0.1:1");
		let merged = apply_override(base.clone(), None);
		assert_eq!(merged.name, "mock");
	}

	#[test]
	fn discover_collapses_repeated_names() {
		let dir = tempfile::tempdir().expect("tempdir");
		let binary = dir.path().join("echo");
		std::fs::write(&binary, b"#!/bin/sh\n").expect("write stub binary");
		#[cfg(unix)]
		{
			use std::os::unix::fs::PermissionsExt;
			std::fs::set_permissions(&binary, std::fs::Permissions::from_mode(0o755)).expect("chmod");
		}

		let config = LoaderConfig {
			enabled: vec!["echo".to_owned(), "echo".to_owned()],
			search_paths: vec![dir.path().to_path_buf()],
			..Default::default()
		};
		let loader = Loader::new(&config);
		let discovered = loader.discover(&config, &HashMap::new());
		assert_eq!(discovered.len(), 1, "repeated logical name must collapse to one PluginConfig");
	}
}
