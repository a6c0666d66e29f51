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

//! Logging setup for the proxy. The client reads the proxy's stdout as
//! protocol bytes, so logs must never land there; a rolling JSON file layer is
//! always on, and a console layer (on stderr) is added only in debug mode.

use std::path::PathBuf;
use std::sync::OnceLock;

use tracing::{debug, error, info, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt::Layer, prelude::*, registry::Registry, reload, EnvFilter};

static MCP_LOG_DIR: OnceLock<PathBuf> = OnceLock::new();

/// Handle onto the live `EnvFilter`, so `logging/setLevel` can change the
/// root log level at runtime instead of only seeding it once at startup.
static FILTER_HANDLE: OnceLock<reload::Handle<EnvFilter, Registry>> = OnceLock::new();

/// Initialize logging. `log_level` seeds the filter when `RUST_LOG` is unset;
/// `debug_mode` (`ProxyConfig.structured_logging`) additionally turns on a
/// stderr console layer for interactive debugging.
pub fn init_logging(log_level: &str, debug_mode: bool) -> Result<(), anyhow::Error> {
	let log_dir = std::env::temp_dir().join("mcp-aggregator").join("logs");
	std::fs::create_dir_all(&log_dir)?;
	MCP_LOG_DIR
		.set(log_dir.clone())
		.map_err(|_| anyhow::anyhow!("logging already initialized"))?;

	let file_appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, "mcp-aggregator.log");

	let env_filter = EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| EnvFilter::new(log_level.to_ascii_lowercase()));
	let (env_filter, filter_handle) = reload::Layer::new(env_filter);
	FILTER_HANDLE
		.set(filter_handle)
		.map_err(|_| anyhow::anyhow!("logging already initialized"))?;

	let file_layer = Layer::new()
		.with_writer(file_appender)
		.with_ansi(false)
		.with_target(true)
		.with_file(true)
		.with_line_number(true)
		.with_thread_ids(true)
		.with_thread_names(true)
		.json();

	let console_layer = if debug_mode {
		Some(
			Layer::new()
				.with_writer(std::io::stderr)
				.with_ansi(true)
				.with_target(false)
				.with_thread_ids(false)
				.with_thread_names(false),
		)
	} else {
		None
	};

	let registry = Registry::default().with(file_layer).with(env_filter);
	if let Some(console) = console_layer {
		registry.with(console).init();
	} else {
		registry.init();
	}

	info!(
		log_directory = %log_dir.display(),
		log_level,
		debug_mode,
		"mcp-aggregator logging initialized"
	);
	Ok(())
}

/// Log an inbound client request.
pub fn log_request(method: &str, params: Option<&serde_json::Value>, request_id: Option<&serde_json::Value>) {
	info!(
		method,
		request_id = ?request_id,
		params_size = params.map(|p| p.to_string().len()).unwrap_or(0),
		"client request received"
	);
	if let Some(params) = params {
		debug!(method, params = %params, "client request parameters");
	}
}

/// Log the outcome of handling a client request.
pub fn log_response(method: &str, success: bool, request_id: Option<&serde_json::Value>, duration_ms: Option<u64>) {
	if success {
		info!(method, request_id = ?request_id, duration_ms, "client request processed successfully");
	} else {
		warn!(method, request_id = ?request_id, duration_ms, "client request processing failed");
	}
}

/// Log a critical, process-level error with its source chain.
pub fn log_critical_error(context: &str, error: &anyhow::Error) {
	error!(context, error = %error, error_chain = ?error.chain().skip(1).collect::<Vec<_>>(), "critical error in proxy");
}

pub fn get_log_directory() -> Option<PathBuf> {
	MCP_LOG_DIR.get().cloned()
}

/// Change the root log level at runtime (the `logging/setLevel` handler).
/// A level tracing's `EnvFilter` cannot parse is rejected rather than silently
/// ignored.
pub fn set_level(level: &str) -> Result<(), anyhow::Error> {
	let handle = FILTER_HANDLE
		.get()
		.ok_or_else(|| anyhow::anyhow!("logging not yet initialized"))?;
	let filter = EnvFilter::try_new(level.to_ascii_lowercase())
		.map_err(|err| anyhow::anyhow!("invalid log level '{level}': {err}"))?;
	handle
		.reload(filter)
		.map_err(|err| anyhow::anyhow!("failed to reload log filter: {err}"))?;
	info!(level, "root log level changed");
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn set_level_before_init_reports_uninitialized() {
		// `init_logging` calls `tracing_subscriber::Registry::init()`, which
		// panics if a global subscriber is already installed, so it cannot be
		// exercised from a test process alongside other tests. The guard this
		// test checks (no handle yet) is reachable without installing one.
		if FILTER_HANDLE.get().is_some() {
			return;
		}
		assert!(set_level("debug").is_err());
	}
}
