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

//! A single downstream MCP server process and its request lifecycle. Owns
//! the child process, the framed stream to it, and the background tasks that
//! keep it alive: a stderr pump, a reply dispatcher, and an optional health
//! loop that drives the restart supervisor.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::mcp::codec::JsonRpcCodec;
use crate::mcp::router::Router;
use crate::mcp::types::{JsonRpcError, McpError};

type UpstreamCodec = JsonRpcCodec<tokio::process::ChildStdout, tokio::process::ChildStdin>;

struct RunningProcess {
	child: Child,
	codec: Arc<UpstreamCodec>,
	listen_task: JoinHandle<()>,
	stderr_task: JoinHandle<()>,
	health_task: Option<JoinHandle<()>>,
}

/// Supervises one downstream server: spawning, the `initialize` handshake,
/// request/response correlation, health checks, and restart-on-failure.
pub struct UpstreamSession {
	config: ServerConfig,
	router: std::sync::Weak<Router>,
	process: Mutex<Option<RunningProcess>>,
	pending: Mutex<HashMap<i64, oneshot::Sender<Result<Value, JsonRpcError>>>>,
	request_counter: AtomicI64,
	initialized: AtomicBool,
	healthy: AtomicBool,
	initialize_result: RwLock<Option<Value>>,
	last_init_params: RwLock<Option<Value>>,
	restart_lock: Mutex<()>,
}

impl UpstreamSession {
	pub fn new(config: ServerConfig, router: std::sync::Weak<Router>) -> Self {
		Self {
			config,
			router,
			process: Mutex::new(None),
			pending: Mutex::new(HashMap::new()),
			request_counter: AtomicI64::new(0),
			initialized: AtomicBool::new(false),
			healthy: AtomicBool::new(true),
			initialize_result: RwLock::new(None),
			last_init_params: RwLock::new(None),
			restart_lock: Mutex::new(()),
		}
	}

	pub fn alias(&self) -> &str {
		&self.config.id
	}

	pub async fn is_running(&self) -> bool {
		self.process.lock().await.is_some()
	}

	pub async fn is_healthy(&self) -> bool {
		self.healthy.load(Ordering::SeqCst)
	}

	pub async fn initialize_result(&self) -> Option<Value> {
		self.initialize_result.read().await.clone()
	}

	/// Spawn the child process and wire up its stdio if it is not already running.
	pub async fn ensure_started(self: &Arc<Self>) -> Result<()> {
		if self.is_running().await {
			return Ok(());
		}
		let mut guard = self.process.lock().await;
		if guard.is_some() {
			return Ok(());
		}

		let (program, args) = self
			.config
			.command
			.split_first()
			.ok_or_else(|| anyhow!("server '{}' has an empty command", self.alias()))?;
		let mut command = Command::new(program);
		command
			.args(args)
			.envs(&self.config.env)
			.stdin(Stdio::piped())
			.stdout(Stdio::piped())
			.stderr(Stdio::piped());

		let mut child = command
			.spawn()
			.with_context(|| format!("failed to spawn upstream server '{}'", self.alias()))?;
		let stdin = child.stdin.take().expect("piped stdin");
		let stdout = child.stdout.take().expect("piped stdout");
		let stderr = child.stderr.take().expect("piped stderr");
		let pid = child.id();

		let codec = Arc::new(JsonRpcCodec::new(
			stdout,
			stdin,
			self.alias().to_string(),
			self.config.prefers_newline(),
		));

		let listen_task = tokio::spawn(Self::listen_loop(Arc::clone(self), Arc::clone(&codec)));
		let stderr_task = tokio::spawn(Self::pump_stderr(self.alias().to_string(), stderr));
		let health_task = self.spawn_healthcheck();

		info!(server = self.alias(), pid = ?pid, "started upstream server");
		*guard = Some(RunningProcess {
			child,
			codec,
			listen_task,
			stderr_task,
			health_task,
		});
		Ok(())
	}

	/// Send the MCP `initialize` handshake, memoizing the result. Idempotent:
	/// a server already initialized returns its cached result without resending.
	pub async fn initialize(self: &Arc<Self>, params: Value) -> Result<Value, McpError> {
		self.ensure_started()
			.await
			.map_err(|e| McpError::upstream_unavailable(e.to_string()))?;
		if self.initialized.load(Ordering::SeqCst) {
			if let Some(result) = self.initialize_result().await {
				return Ok(result);
			}
		}

		let mut payload = params.clone();
		*self.last_init_params.write().await = Some(params);
		let client_info = payload
			.get("clientInfo")
			.cloned()
			.unwrap_or_else(|| json!({}));
		let name = client_info
			.get("name")
			.and_then(Value::as_str)
			.unwrap_or("mcp-client");
		let version = client_info
			.get("version")
			.and_then(Value::as_str)
			.unwrap_or("0.0");
		if let Some(obj) = payload.as_object_mut() {
			obj.insert(
				"clientInfo".to_string(),
				json!({ "name": format!("{name}-through-proxy"), "version": version }),
			);
		}
		debug!(server = self.alias(), ?payload, "initializing upstream");

		let timeout = Duration::from_secs_f64(self.config.startup_timeout);
		let result = self
			.request("initialize", Some(payload), Some(timeout))
			.await?;
		*self.initialize_result.write().await = Some(result.clone());
		self.initialized.store(true, Ordering::SeqCst);
		if let Err(err) = self.notify("notifications/initialized", None).await {
			debug!(server = self.alias(), %err, "notifications/initialized failed");
		}
		Ok(result)
	}

	/// Send a request and await its correlated response (or a timeout/upstream error).
	pub async fn request(
		self: &Arc<Self>,
		method: &str,
		params: Option<Value>,
		timeout: Option<Duration>,
	) -> Result<Value, McpError> {
		self.ensure_started()
			.await
			.map_err(|e| McpError::upstream_unavailable(e.to_string()))?;
		let codec = self.codec().await.ok_or_else(|| {
			McpError::upstream_unavailable(format!("server '{}' is not running", self.alias()))
		})?;

		let id = self.request_counter.fetch_add(1, Ordering::SeqCst) + 1;
		let (tx, rx) = oneshot::channel();
		self.pending.lock().await.insert(id, tx);

		let mut message = json!({ "jsonrpc": "2.0", "id": id, "method": method });
		if let Some(params) = params {
			message["params"] = params;
		}
		if let Err(err) = codec.write_message(&message).await {
			self.pending.lock().await.remove(&id);
			return Err(McpError::upstream_unavailable(err.to_string()));
		}

		let wait = async {
			match rx.await {
				Ok(result) => result.map_err(McpError::from),
				Err(_) => Err(McpError::upstream_unavailable("upstream closed before replying")),
			}
		};
		let outcome = match timeout {
			Some(duration) => match tokio::time::timeout(duration, wait).await {
				Ok(result) => result,
				Err(_) => Err(McpError::upstream_unavailable(format!(
					"timed out waiting for '{method}' from '{}'",
					self.alias()
				))),
			},
			None => wait.await,
		};
		self.pending.lock().await.remove(&id);
		outcome
	}

	/// Fire-and-forget notification; no reply is expected.
	pub async fn notify(self: &Arc<Self>, method: &str, params: Option<Value>) -> Result<()> {
		self.ensure_started().await?;
		let codec = self
			.codec()
			.await
			.ok_or_else(|| anyhow!("server '{}' is not running", self.alias()))?;
		let mut message = json!({ "jsonrpc": "2.0", "method": method });
		if let Some(params) = params {
			message["params"] = params;
		}
		codec.write_message(&message).await
	}

	/// Forward a pre-built JSON-RPC message verbatim (used to route client
	/// responses, and synthetic error replies, back to this upstream).
	pub async fn send_raw(&self, payload: Value) -> Result<()> {
		let codec = self
			.codec()
			.await
			.ok_or_else(|| anyhow!("server '{}' is not running", self.alias()))?;
		codec.write_message(&payload).await
	}

	/// Graceful shutdown: ask the server to stop, then terminate and, if it
	/// lingers past its grace period, kill it outright.
	pub async fn shutdown(self: &Arc<Self>) {
		if !self.is_running().await {
			return;
		}
		let grace = Duration::from_secs_f64(self.config.shutdown_grace);
		if let Err(err) = self.request("shutdown", None, Some(grace)).await {
			warn!(server = self.alias(), %err, "graceful shutdown request failed");
		}

		let mut guard = self.process.lock().await;
		if let Some(mut running) = guard.take() {
			let _ = running.child.start_kill();
			match tokio::time::timeout(Duration::from_secs(2), running.child.wait()).await {
				Ok(_) => {}
				Err(_) => {
					warn!(server = self.alias(), "killing stalled upstream server");
					let _ = running.child.kill().await;
				}
			}
			running.listen_task.abort();
			running.stderr_task.abort();
			if let Some(health) = running.health_task {
				health.abort();
			}
		}
		self.initialized.store(false, Ordering::SeqCst);
		self.healthy.store(false, Ordering::SeqCst);
	}

	async fn codec(&self) -> Option<Arc<UpstreamCodec>> {
		self.process.lock().await.as_ref().map(|p| Arc::clone(&p.codec))
	}

	async fn pump_stderr(alias: String, stderr: tokio::process::ChildStderr) {
		let mut lines = BufReader::new(stderr).lines();
		loop {
			match lines.next_line().await {
				Ok(Some(line)) => debug!(server = %alias, stderr = %line, "upstream stderr"),
				Ok(None) => return,
				Err(err) => {
					warn!(server = %alias, %err, "error reading upstream stderr");
					return;
				}
			}
		}
	}

	async fn listen_loop(session: Arc<Self>, codec: Arc<UpstreamCodec>) {
		loop {
			match codec.read_message().await {
				Ok(Some(value)) => session.handle_incoming(value).await,
				Ok(None) => {
					info!(server = session.alias(), "upstream closed its stream");
					session.mark_unhealthy_and_maybe_restart().await;
					return;
				}
				Err(err) => {
					error!(server = session.alias(), %err, "error reading from upstream");
					session.mark_unhealthy_and_maybe_restart().await;
					return;
				}
			}
		}
	}

	async fn handle_incoming(self: &Arc<Self>, value: Value) {
		let has_id = value.get("id").is_some();
		let has_method = value.get("method").is_some();
		if !has_method && has_id {
			let id = value.get("id").and_then(Value::as_i64);
			let Some(id) = id else { return };
			let sender = self.pending.lock().await.remove(&id);
			let Some(sender) = sender else {
				debug!(server = self.alias(), id, "unexpected response id from upstream");
				return;
			};
			let outcome = if let Some(error) = value.get("error") {
				match serde_json::from_value::<JsonRpcError>(error.clone()) {
					Ok(err) => Err(err),
					Err(_) => Err(JsonRpcError {
						code: -32000,
						message: "malformed upstream error".to_string(),
						data: None,
					}),
				}
			} else {
				Ok(value.get("result").cloned().unwrap_or(Value::Null))
			};
			let _ = sender.send(outcome);
			return;
		}

		let Some(router) = self.router.upgrade() else { return };
		if has_method && has_id {
			router.forward_server_request(self.alias(), value).await;
		} else if has_method {
			router.forward_server_notification(self.alias(), value).await;
		}
	}

	fn spawn_healthcheck(self: &Arc<Self>) -> Option<JoinHandle<()>> {
		let router = self.router.upgrade()?;
		let (interval, timeout) = router.healthcheck_timings()?;
		let session = Arc::clone(self);
		Some(tokio::spawn(async move {
			session.health_loop(interval, timeout).await;
		}))
	}

	async fn health_loop(self: Arc<Self>, interval: Duration, timeout: Duration) {
		loop {
			tokio::time::sleep(interval).await;
			if !self.is_running().await {
				continue;
			}
			match self.request("ping", None, Some(timeout)).await {
				Ok(_) => {
					if !self.healthy.swap(true, Ordering::SeqCst) {
						info!(server = self.alias(), "upstream recovered");
					}
				}
				Err(err) => {
					warn!(server = self.alias(), %err, "health check failed");
					self.mark_unhealthy_and_maybe_restart().await;
				}
			}
		}
	}

	async fn mark_unhealthy_and_maybe_restart(self: &Arc<Self>) {
		self.healthy.store(false, Ordering::SeqCst);
		// A crash or EOF restarts the upstream whether or not periodic health
		// checks are configured; the health loop is just one of the two
		// triggers into this supervisor, not a precondition for it.
		let Ok(_guard) = self.restart_lock.try_lock() else {
			return;
		};
		self.shutdown().await;

		let mut backoff = Duration::from_secs(1);
		for attempt in 1..=5 {
			info!(server = self.alias(), attempt, "attempting upstream restart");
			let last_params = self.last_init_params.read().await.clone().unwrap_or_else(|| json!({}));
			let outcome: Result<(), McpError> = async {
				self.ensure_started()
					.await
					.map_err(|e| McpError::upstream_unavailable(e.to_string()))?;
				self.initialize(last_params).await?;
				Ok(())
			}
			.await;
			match outcome {
				Ok(()) => {
					self.healthy.store(true, Ordering::SeqCst);
					info!(server = self.alias(), "restarted upstream server");
					return;
				}
				Err(err) => {
					error!(server = self.alias(), attempt, %err, "restart attempt failed");
					tokio::time::sleep(backoff).await;
					backoff = (backoff * 2).min(Duration::from_secs(30));
				}
			}
		}
		error!(server = self.alias(), "exceeded restart attempts");
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn echo_config(id: &str, shutdown_grace: f64) -> ServerConfig {
		ServerConfig {
			id: id.to_string(),
			command: vec!["cat".to_string()],
			env: HashMap::new(),
			startup_timeout: 5.0,
			shutdown_grace,
			stdio_mode: "newline".to_string(),
		}
	}

	#[tokio::test]
	async fn new_session_reports_alias_and_initial_state() {
		let session = Arc::new(UpstreamSession::new(echo_config("alpha", 1.0), std::sync::Weak::new()));
		assert_eq!(session.alias(), "alpha");
		assert!(!session.is_running().await);
		assert!(session.is_healthy().await);
	}

	#[tokio::test]
	async fn ensure_started_spawns_a_real_child_and_shutdown_terminates_it() {
		let session = Arc::new(UpstreamSession::new(echo_config("echo", 0.2), std::sync::Weak::new()));
		session.ensure_started().await.unwrap();
		assert!(session.is_running().await);
		session.shutdown().await;
		assert!(!session.is_running().await);
	}

	#[tokio::test]
	async fn request_times_out_when_the_reply_never_arrives() {
		// `cat` echoes our own request back verbatim; that echo still carries
		// `method`, so it is routed as a request rather than satisfying the
		// pending reply, and the call correctly times out.
		let session = Arc::new(UpstreamSession::new(echo_config("silent", 0.2), std::sync::Weak::new()));
		let result = session.request("ping", None, Some(Duration::from_millis(200))).await;
		assert!(result.is_err());
		session.shutdown().await;
	}
}
