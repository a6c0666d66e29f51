// Copyright 2025 Muvon Un Limited
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// The namespace separator used for synthetic tool/prompt names. A server
/// `id` containing this sequence would make synthetic names ambiguous to split.
pub const NAMESPACE_SEPARATOR: &str = "__";

fn default_log_level() -> String {
	"INFO".to_string()
}

fn default_response_timeout() -> f64 {
	30.0
}

fn default_startup_timeout() -> f64 {
	15.0
}

fn default_shutdown_grace() -> f64 {
	2.0
}

fn default_stdio_mode() -> String {
	"content-length".to_string()
}

/// One downstream MCP server to launch and supervise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
	/// Client-visible alias; used as the namespace prefix for synthetic names.
	pub id: String,

	/// Argv used to spawn the child process.
	pub command: Vec<String>,

	/// Additional environment variables, merged over the parent's environment.
	#[serde(default)]
	pub env: std::collections::HashMap<String, String>,

	/// Timeout, in seconds, applied to the upstream `initialize` handshake.
	#[serde(default = "default_startup_timeout")]
	pub startup_timeout: f64,

	/// Timeout, in seconds, applied to the upstream graceful `shutdown` request.
	#[serde(default = "default_shutdown_grace")]
	pub shutdown_grace: f64,

	/// Framing preference (`"content-length"` or `"newline"`); the codec still
	/// autodetects on first read regardless of this setting.
	#[serde(default = "default_stdio_mode")]
	pub stdio_mode: String,
}

impl ServerConfig {
	pub fn prefers_newline(&self) -> bool {
		self.stdio_mode == "newline"
	}
}

/// Top-level, immutable-after-load configuration for the proxy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
	pub servers: Vec<ServerConfig>,

	#[serde(default = "default_log_level")]
	pub log_level: String,

	#[serde(default = "default_response_timeout")]
	pub response_timeout: f64,

	#[serde(default)]
	pub auth_token: Option<String>,

	#[serde(default)]
	pub rate_limit_per_minute: Option<u32>,

	#[serde(default)]
	pub structured_logging: bool,

	#[serde(default)]
	pub healthcheck_interval: Option<f64>,

	#[serde(default)]
	pub healthcheck_timeout: Option<f64>,
}

impl ProxyConfig {
	/// `healthcheck_interval` and `healthcheck_timeout` are only meaningful
	/// together; either one alone leaves health checks disabled.
	pub fn healthcheck_enabled(&self) -> bool {
		self.healthcheck_interval.is_some() && self.healthcheck_timeout.is_some()
	}

	/// Parse and validate the JSON config file at `path`.
	pub fn load(path: impl AsRef<Path>) -> Result<Self> {
		let path = path.as_ref();
		let content = fs::read_to_string(path)
			.with_context(|| format!("failed to read config file '{}'", path.display()))?;
		let config: ProxyConfig = serde_json::from_str(&content)
			.with_context(|| format!("failed to parse config file '{}'", path.display()))?;
		config.validate()?;
		Ok(config)
	}

	fn validate(&self) -> Result<()> {
		if self.servers.is_empty() {
			bail!("at least one downstream server must be configured");
		}

		let mut seen_ids = HashSet::new();
		for server in &self.servers {
			if server.id.is_empty() {
				bail!("server entry is missing a required 'id'");
			}
			if server.command.is_empty() {
				bail!("server '{}' is missing a required 'command'", server.id);
			}
			if server.id.contains(NAMESPACE_SEPARATOR) {
				bail!(
					"server id '{}' must not contain the namespace separator '{}'",
					server.id,
					NAMESPACE_SEPARATOR
				);
			}
			if !seen_ids.insert(server.id.clone()) {
				bail!("duplicate server id '{}'", server.id);
			}
			if server.stdio_mode != "content-length" && server.stdio_mode != "newline" {
				bail!(
					"invalid stdio_mode '{}' for server '{}': expected 'content-length' or 'newline'",
					server.stdio_mode,
					server.id
				);
			}
		}
		Ok(())
	}
}

pub fn default_config_path() -> PathBuf {
	PathBuf::from("mcp-aggregator.json")
}

#[cfg(test)]
mod tests {
	use super::*;

	fn write_temp(contents: &str) -> tempfile_path::TempConfig {
		tempfile_path::TempConfig::new(contents)
	}

	/// Minimal std::env::temp_dir-based fixture writer; avoids pulling in a
	/// dev-dependency just to drop a JSON file on disk for a test.
	mod tempfile_path {
		use std::path::PathBuf;

		pub struct TempConfig {
			pub path: PathBuf,
		}

		impl TempConfig {
			pub fn new(contents: &str) -> Self {
				let mut path = std::env::temp_dir();
				let unique = format!(
					"mcp-aggregator-test-{}-{}.json",
					std::process::id(),
					contents.len()
				);
				path.push(unique);
				std::fs::write(&path, contents).unwrap();
				Self { path }
			}
		}

		impl Drop for TempConfig {
			fn drop(&mut self) {
				let _ = std::fs::remove_file(&self.path);
			}
		}
	}

	#[test]
	fn loads_minimal_config_with_defaults() {
		let temp = write_temp(
			r#"{"servers": [{"id": "alpha", "command": ["echo", "hi"]}]}"#,
		);
		let config = ProxyConfig::load(&temp.path).unwrap();
		assert_eq!(config.log_level, "INFO");
		assert_eq!(config.response_timeout, 30.0);
		assert_eq!(config.servers[0].startup_timeout, 15.0);
		assert_eq!(config.servers[0].shutdown_grace, 2.0);
		assert_eq!(config.servers[0].stdio_mode, "content-length");
		assert!(!config.healthcheck_enabled());
	}

	#[test]
	fn rejects_empty_servers() {
		let temp = write_temp(r#"{"servers": []}"#);
		assert!(ProxyConfig::load(&temp.path).is_err());
	}

	#[test]
	fn rejects_missing_id_or_command() {
		let temp = write_temp(r#"{"servers": [{"command": ["x"]}]}"#);
		assert!(ProxyConfig::load(&temp.path).is_err());
	}

	#[test]
	fn rejects_duplicate_ids() {
		let temp = write_temp(
			r#"{"servers": [{"id": "a", "command": ["x"]}, {"id": "a", "command": ["y"]}]}"#,
		);
		assert!(ProxyConfig::load(&temp.path).is_err());
	}

	#[test]
	fn rejects_id_containing_separator() {
		let temp = write_temp(r#"{"servers": [{"id": "a__b", "command": ["x"]}]}"#);
		assert!(ProxyConfig::load(&temp.path).is_err());
	}

	#[test]
	fn rejects_unknown_stdio_mode() {
		let temp = write_temp(
			r#"{"servers": [{"id": "a", "command": ["x"], "stdio_mode": "carrier-pigeon"}]}"#,
		);
		assert!(ProxyConfig::load(&temp.path).is_err());
	}

	#[test]
	fn healthcheck_requires_both_fields() {
		let temp = write_temp(
			r#"{"servers": [{"id": "a", "command": ["x"]}], "healthcheck_interval": 30}"#,
		);
		let config = ProxyConfig::load(&temp.path).unwrap();
		assert!(!config.healthcheck_enabled());
	}
}
