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

//! Orchestrates all traffic between the one MCP client this process serves and
//! the downstream servers configured for it. Dispatches client requests,
//! aggregates catalogs across upstreams, namespaces tools/prompts/resources so
//! their names never collide, and relays upstream-originated requests and
//! notifications back to the client.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use parking_lot::Mutex as SyncMutex;
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, warn};

use crate::config::ProxyConfig;
use crate::mcp::auth::AuthGate;
use crate::mcp::capabilities;
use crate::mcp::codec::JsonRpcCodec;
use crate::mcp::logging::{log_request, log_response};
use crate::mcp::ratelimit::RateLimiter;
use crate::mcp::types::{McpError, Message};
use crate::mcp::upstream::UpstreamSession;

const PROXY_NAME: &str = "mcp-proxy";
const PROXY_VERSION: &str = "0.1.0";
const NAMESPACE_SEPARATOR: &str = "__";
const RESOURCE_SCHEME: &str = "proxy://resource/";
const DEFAULT_PROTOCOL_VERSION: &str = "2025-06-18";

/// Anything the router can deliver a JSON-RPC message to. Lets `Router` stay
/// non-generic while `main` wires it to a concrete stdio codec.
#[async_trait]
pub trait ClientSink: Send + Sync {
	async fn send(&self, message: Value) -> Result<()>;
}

#[async_trait]
impl<R, W> ClientSink for JsonRpcCodec<R, W>
where
	R: AsyncRead + Unpin + Send,
	W: AsyncWrite + Unpin + Send,
{
	async fn send(&self, message: Value) -> Result<()> {
		self.write_message(&message).await
	}
}

pub struct Router {
	config: ProxyConfig,
	sessions: HashMap<String, Arc<UpstreamSession>>,
	client: Arc<dyn ClientSink>,
	auth_gate: AuthGate,
	rate_limiter: RateLimiter,
	tool_registry: SyncMutex<HashMap<String, (String, String)>>,
	prompt_registry: SyncMutex<HashMap<String, (String, String)>>,
	resource_registry: SyncMutex<HashMap<String, (String, String)>>,
	/// Synthetic client-facing request id -> (upstream alias, original upstream id).
	reverse_request_router: SyncMutex<HashMap<String, (String, Value)>>,
	client_request_counter: AtomicI64,
	initialized: AtomicBool,
}

impl Router {
	pub fn new(config: ProxyConfig, client: Arc<dyn ClientSink>) -> Arc<Self> {
		Arc::new_cyclic(|weak: &Weak<Router>| {
			let sessions = config
				.servers
				.iter()
				.map(|server_config| {
					let session = Arc::new(UpstreamSession::new(server_config.clone(), weak.clone()));
					(server_config.id.clone(), session)
				})
				.collect();
			let auth_gate = AuthGate::new(config.auth_token.clone());
			let rate_limiter = RateLimiter::new(config.rate_limit_per_minute);
			Router {
				config,
				sessions,
				client,
				auth_gate,
				rate_limiter,
				tool_registry: SyncMutex::new(HashMap::new()),
				prompt_registry: SyncMutex::new(HashMap::new()),
				resource_registry: SyncMutex::new(HashMap::new()),
				reverse_request_router: SyncMutex::new(HashMap::new()),
				client_request_counter: AtomicI64::new(0),
				initialized: AtomicBool::new(false),
			}
		})
	}

	pub fn healthcheck_timings(&self) -> Option<(Duration, Duration)> {
		let interval = self.config.healthcheck_interval?;
		let timeout = self.config.healthcheck_timeout?;
		Some((Duration::from_secs_f64(interval), Duration::from_secs_f64(timeout)))
	}

	fn response_timeout(&self) -> Duration {
		Duration::from_secs_f64(self.config.response_timeout)
	}

	/// Entry point for every message read off the client stream.
	pub async fn handle_client_message(self: &Arc<Self>, value: Value) {
		debug!(?value, "received client message");
		match Message::from_value(value.clone()) {
			Some(Message::Request(_)) => self.handle_client_request(value).await,
			Some(Message::Response(_)) => self.forward_client_response(value).await,
			Some(Message::Notification { method, params }) => {
				self.handle_client_notification(method, params).await
			}
			None => debug!("ignoring unrecognized client payload"),
		}
	}

	async fn handle_client_request(self: &Arc<Self>, value: Value) {
		let id = value.get("id").cloned();
		let method = value
			.get("method")
			.and_then(Value::as_str)
			.unwrap_or_default()
			.to_string();
		let mut params = value.get("params").cloned().unwrap_or(Value::Null);
		let params_for_log = if params.is_null() { None } else { Some(params.clone()) };
		log_request(&method, params_for_log.as_ref(), id.as_ref());
		let start = std::time::Instant::now();

		if !self.ensure_authorized(id.clone(), &mut params).await {
			log_response(&method, false, id.as_ref(), Some(start.elapsed().as_millis() as u64));
			return;
		}

		let result = match method.as_str() {
			"initialize" => self.handle_initialize(params).await,
			"shutdown" => self.handle_shutdown().await,
			"ping" => Ok(json!({ "ok": true })),
			"tools/list" => self.handle_list("tools/list", "tools", params, Self::wrap_tool_descriptor).await,
			"tools/call" => self.handle_call_by_name(params, "name", "toolName", &self.tool_registry, "tool", "tools/call").await,
			"resources/list" => {
				self.handle_list("resources/list", "resources", params, Self::wrap_resource_descriptor)
					.await
			}
			"resources/read" => self.handle_resource_read(params).await,
			"resources/templates/list" => {
				self.handle_list(
					"resources/templates/list",
					"resourceTemplates",
					params,
					Self::wrap_resource_template,
				)
				.await
			}
			"prompts/list" => {
				self.handle_list("prompts/list", "prompts", params, Self::wrap_prompt_descriptor)
					.await
			}
			"prompts/get" => {
				self.handle_call_by_name(params, "name", "promptName", &self.prompt_registry, "prompt", "prompts/get")
					.await
			}
			"logging/setLevel" => self.handle_set_level(&params),
			other => Err(McpError::method_not_found(
				format!("Method {other} is not supported by {PROXY_NAME}"),
				other.to_string(),
			)),
		};

		let duration_ms = start.elapsed().as_millis() as u64;
		match result {
			Ok(value) => {
				log_response(&method, true, id.as_ref(), Some(duration_ms));
				self.send_result(id, value).await;
			}
			Err(err) => {
				log_response(&method, false, id.as_ref(), Some(duration_ms));
				self.send_error(id, err).await;
			}
		}
	}

	async fn handle_initialize(self: &Arc<Self>, params: Value) -> Result<Value, McpError> {
		let starts = self.sessions.values().map(|session| {
			let session = Arc::clone(session);
			async move { session.ensure_started().await }
		});
		for outcome in futures::future::join_all(starts).await {
			outcome.map_err(|e| McpError::upstream_unavailable(e.to_string()))?;
		}

		let initializations = self.sessions.values().map(|session| {
			let session = Arc::clone(session);
			let params = params.clone();
			async move { session.initialize(params).await }
		});
		let mut init_results = Vec::with_capacity(self.sessions.len());
		for outcome in futures::future::join_all(initializations).await {
			init_results.push(Some(outcome?));
		}
		self.initialized.store(true, Ordering::SeqCst);

		let capabilities = capabilities::aggregate(&init_results);
		let protocol_version = params
			.get("protocolVersion")
			.and_then(Value::as_str)
			.unwrap_or(DEFAULT_PROTOCOL_VERSION);
		Ok(json!({
			"serverInfo": { "name": PROXY_NAME, "version": PROXY_VERSION },
			"capabilities": capabilities,
			"protocolVersion": protocol_version,
		}))
	}

	fn handle_set_level(self: &Arc<Self>, params: &Value) -> Result<Value, McpError> {
		let level = params
			.get("level")
			.or_else(|| params.get("logLevel"))
			.and_then(Value::as_str)
			.ok_or_else(|| McpError::invalid_params("logging/setLevel requires a level", "logging/setLevel"))?;
		crate::mcp::logging::set_level(level)
			.map_err(|err| McpError::invalid_params(err.to_string(), "logging/setLevel"))?;
		Ok(json!({}))
	}

	async fn handle_shutdown(self: &Arc<Self>) -> Result<Value, McpError> {
		self.shutdown_all().await;
		Ok(json!({}))
	}

	pub async fn shutdown_all(self: &Arc<Self>) {
		let shutdowns = self.sessions.values().map(|session| {
			let session = Arc::clone(session);
			async move { session.shutdown().await }
		});
		futures::future::join_all(shutdowns).await;
	}

	async fn handle_list(
		self: &Arc<Self>,
		upstream_method: &str,
		response_key: &str,
		params: Value,
		wrap: impl Fn(&Self, &str, &Value) -> Option<Value>,
	) -> Result<Value, McpError> {
		// Registries are replaced, not merged, on every list call; entries
		// handed out before this call still resolve via the name/URI fallback.
		self.registry_for(response_key).map(|registry| registry.lock().clear());

		let mut aggregated = Vec::new();
		for session in self.sessions.values() {
			let result = session
				.request(upstream_method, Some(params.clone()), Some(self.response_timeout()))
				.await;
			let result = match result {
				Ok(r) => r,
				Err(err) => {
					warn!(server = session.alias(), %err, "{upstream_method} failed");
					continue;
				}
			};
			for item in extract_sequence(&result, response_key) {
				if let Some(wrapped) = wrap(self, session.alias(), &item) {
					aggregated.push(wrapped);
				} else {
					warn!(server = session.alias(), "{upstream_method} returned a malformed item, skipping it");
				}
			}
		}
		let (page, next_cursor) = apply_cursor(aggregated, &params);
		let mut response = serde_json::Map::new();
		response.insert(response_key.to_string(), Value::Array(page));
		if let Some(cursor) = next_cursor {
			response.insert("nextCursor".to_string(), Value::String(cursor));
		}
		Ok(Value::Object(response))
	}

	async fn handle_call_by_name(
		self: &Arc<Self>,
		mut params: Value,
		primary_key: &str,
		legacy_key: &str,
		registry: &SyncMutex<HashMap<String, (String, String)>>,
		kind: &str,
		upstream_method: &str,
	) -> Result<Value, McpError> {
		let name = params
			.get(primary_key)
			.or_else(|| params.get(legacy_key))
			.and_then(Value::as_str)
			.map(str::to_string);
		let Some(name) = name else {
			return Err(McpError::invalid_params(
				format!("{upstream_method} requires a {kind} name"),
				upstream_method.to_string(),
			));
		};

		let (alias, raw_name) = resolve_namespaced(registry, &name, kind)?;
		let session = self.sessions.get(&alias).ok_or_else(|| {
			McpError::invalid_params(format!("Unknown {kind} namespace {alias}"), upstream_method.to_string())
		})?;

		if let Some(obj) = params.as_object_mut() {
			obj.insert(primary_key.to_string(), Value::String(raw_name));
		}
		session
			.request(upstream_method, Some(params), Some(self.response_timeout()))
			.await
	}

	async fn handle_resource_read(self: &Arc<Self>, mut params: Value) -> Result<Value, McpError> {
		let uri = params
			.get("uri")
			.and_then(Value::as_str)
			.map(str::to_string)
			.ok_or_else(|| McpError::invalid_params("resources/read requires a uri", "resources/read"))?;

		let (alias, raw_uri) = resolve_resource_uri(&self.resource_registry, &uri)?;
		let session = self
			.sessions
			.get(&alias)
			.ok_or_else(|| McpError::invalid_params(format!("Resource belongs to unknown server {alias}"), "resources/read"))?;

		if let Some(obj) = params.as_object_mut() {
			obj.insert("uri".to_string(), Value::String(raw_uri));
		}
		session
			.request("resources/read", Some(params), Some(self.response_timeout()))
			.await
	}

	async fn handle_client_notification(self: &Arc<Self>, method: String, params: Option<Value>) {
		let sends = self.sessions.values().map(|session| {
			let session = Arc::clone(session);
			let message = json!({ "jsonrpc": "2.0", "method": method, "params": params });
			async move {
				if let Err(err) = session.send_raw(message).await {
					debug!(server = session.alias(), %err, "failed to broadcast client notification");
				}
			}
		});
		futures::future::join_all(sends).await;
	}

	async fn forward_client_response(self: &Arc<Self>, value: Value) {
		let Some(id) = value.get("id").and_then(Value::as_str).map(str::to_string) else {
			debug!("client response carries a non-string id, cannot route it");
			return;
		};
		let route = self.reverse_request_router.lock().remove(&id);
		let Some((alias, upstream_id)) = route else {
			debug!(id, "received client response for unknown request id");
			return;
		};
		let Some(session) = self.sessions.get(&alias) else {
			warn!(alias, "server no longer registered for response routing");
			return;
		};
		let mut outbound = value;
		outbound["id"] = upstream_id;
		if let Err(err) = session.send_raw(outbound).await {
			warn!(server = alias, %err, "failed to route client response upstream");
		}
	}

	/// Relay a request originating from an upstream server to the client,
	/// assigning it a proxy-scoped id so the reply can be routed back.
	pub async fn forward_server_request(self: &Arc<Self>, alias: &str, message: Value) {
		let method = message.get("method").and_then(Value::as_str).unwrap_or_default();
		if !self.initialized.load(Ordering::SeqCst) && method == "roots/list" {
			debug!(alias, "serving pre-initialize roots/list with empty result");
			let reply = json!({
				"jsonrpc": "2.0",
				"id": message.get("id").cloned().unwrap_or(Value::Null),
				"result": { "roots": [] },
			});
			if let Some(session) = self.sessions.get(alias) {
				if let Err(err) = session.send_raw(reply).await {
					warn!(alias, %err, "failed to answer pre-initialize roots/list");
				}
			}
			return;
		}

		let counter = self.client_request_counter.fetch_add(1, Ordering::SeqCst) + 1;
		let client_id = format!("{alias}:{counter}");
		let upstream_id = message.get("id").cloned().unwrap_or(Value::Null);
		self.reverse_request_router
			.lock()
			.insert(client_id.clone(), (alias.to_string(), upstream_id));

		let mut payload = message;
		payload["id"] = Value::String(client_id);
		annotate_proxy_server(&mut payload, alias);
		if let Err(err) = self.client.send(payload).await {
			warn!(alias, %err, "failed to forward upstream request to client");
		}
	}

	/// Relay a notification originating from an upstream server to the client.
	pub async fn forward_server_notification(self: &Arc<Self>, alias: &str, message: Value) {
		let mut payload = message;
		annotate_proxy_server(&mut payload, alias);
		if let Err(err) = self.client.send(payload).await {
			warn!(alias, %err, "failed to forward upstream notification to client");
		}
	}

	async fn ensure_authorized(self: &Arc<Self>, id: Option<Value>, params: &mut Value) -> bool {
		let token = params
			.get("proxy")
			.and_then(|p| p.get("authToken"))
			.and_then(Value::as_str)
			.map(str::to_string);

		if !self.auth_gate.validate(token.as_deref()) {
			self.send_error(id, McpError::new(-32001, "Unauthorized", None)).await;
			return false;
		}
		if !self.rate_limiter.allow(token.as_deref()) {
			self.send_error(id, McpError::new(-32002, "Rate limit exceeded", None)).await;
			return false;
		}
		if let Some(proxy_meta) = params.get_mut("proxy").and_then(Value::as_object_mut) {
			proxy_meta.remove("authToken");
		}
		true
	}

	async fn send_result(self: &Arc<Self>, id: Option<Value>, result: Value) {
		let message = json!({ "jsonrpc": "2.0", "id": id, "result": result });
		if let Err(err) = self.client.send(message).await {
			warn!(%err, "failed to send result to client");
		}
	}

	async fn send_error(self: &Arc<Self>, id: Option<Value>, err: McpError) {
		let message = json!({
			"jsonrpc": "2.0",
			"id": id,
			"error": { "code": err.code, "message": err.message, "data": err.data },
		});
		if let Err(send_err) = self.client.send(message).await {
			warn!(%send_err, "failed to send error to client");
		}
	}

	/// The registry a given list response key is backed by, if any
	/// (resource templates carry no client-routable name, so none exists).
	fn registry_for(&self, response_key: &str) -> Option<&SyncMutex<HashMap<String, (String, String)>>> {
		match response_key {
			"tools" => Some(&self.tool_registry),
			"prompts" => Some(&self.prompt_registry),
			"resources" => Some(&self.resource_registry),
			_ => None,
		}
	}

	fn wrap_tool_descriptor(&self, alias: &str, tool: &Value) -> Option<Value> {
		wrap_namespaced(&self.tool_registry, alias, tool, "name")
	}

	fn wrap_prompt_descriptor(&self, alias: &str, prompt: &Value) -> Option<Value> {
		wrap_namespaced(&self.prompt_registry, alias, prompt, "name")
	}

	/// Namespace a resource descriptor's `uri`. Returns `None` (and logs) when
	/// the upstream handed back something other than a JSON object, since a
	/// single malformed item from one upstream must not take down aggregation
	/// for the rest.
	fn wrap_resource_descriptor(&self, alias: &str, resource: &Value) -> Option<Value> {
		let mut result = resource.clone();
		let Some(obj) = result.as_object_mut() else {
			warn!(alias, "resource descriptor from upstream is not a JSON object, skipping it");
			return None;
		};
		let original_uri = obj.get("uri").and_then(Value::as_str).unwrap_or_default().to_string();
		let synthetic_uri = encode_resource_uri(alias, &original_uri);
		obj.insert("uri".to_string(), Value::String(synthetic_uri.clone()));
		set_proxy_metadata(obj, json!({ "server": alias, "originalUri": original_uri }));
		self.resource_registry
			.lock()
			.insert(synthetic_uri, (alias.to_string(), original_uri));
		Some(result)
	}

	fn wrap_resource_template(&self, alias: &str, template: &Value) -> Option<Value> {
		let mut result = template.clone();
		let Some(obj) = result.as_object_mut() else {
			warn!(alias, "resource template from upstream is not a JSON object, skipping it");
			return None;
		};
		set_proxy_metadata(obj, json!({ "server": alias }));
		Some(result)
	}
}

/// Insert `params.proxy.server` into an outbound JSON-RPC message, tolerating
/// a payload or params value that isn't a JSON object instead of panicking —
/// JSON-RPC 2.0 permits array params and an upstream is not guaranteed to send
/// well-formed objects.
fn annotate_proxy_server(payload: &mut Value, alias: &str) {
	let Some(payload_obj) = payload.as_object_mut() else {
		warn!(alias, "cannot annotate proxy metadata: message is not a JSON object");
		return;
	};
	let params = payload_obj.entry("params").or_insert_with(|| json!({}));
	if params.is_null() {
		*params = json!({});
	}
	let Some(params_obj) = params.as_object_mut() else {
		warn!(alias, "cannot annotate proxy metadata: params is not a JSON object");
		return;
	};
	let proxy = params_obj.entry("proxy").or_insert_with(|| json!({}));
	if proxy.is_null() {
		*proxy = json!({});
	}
	let Some(proxy_obj) = proxy.as_object_mut() else {
		warn!(alias, "cannot annotate proxy metadata: params.proxy is not a JSON object");
		return;
	};
	proxy_obj.insert("server".to_string(), json!(alias));
}

/// Set `metadata.proxy` on a descriptor object, coercing a non-object
/// `metadata` field (or none at all) into a fresh object rather than panicking.
fn set_proxy_metadata(obj: &mut serde_json::Map<String, Value>, proxy: Value) {
	let metadata = obj.entry("metadata").or_insert_with(|| json!({}));
	if !metadata.is_object() {
		*metadata = json!({});
	}
	metadata
		.as_object_mut()
		.expect("metadata was just coerced into an object above")
		.insert("proxy".to_string(), proxy);
}

fn wrap_namespaced(
	registry: &SyncMutex<HashMap<String, (String, String)>>,
	alias: &str,
	item: &Value,
	name_key: &str,
) -> Option<Value> {
	let mut result = item.clone();
	let Some(obj) = result.as_object_mut() else {
		warn!(alias, name_key, "descriptor from upstream is not a JSON object, skipping it");
		return None;
	};
	let original_name = obj.get(name_key).and_then(Value::as_str).unwrap_or_default().to_string();
	let synthetic_name = format!("{alias}{NAMESPACE_SEPARATOR}{original_name}");
	obj.insert(name_key.to_string(), Value::String(synthetic_name.clone()));
	set_proxy_metadata(obj, json!({ "server": alias, "originalName": original_name }));
	registry.lock().insert(synthetic_name, (alias.to_string(), original_name));
	Some(result)
}

fn resolve_namespaced(
	registry: &SyncMutex<HashMap<String, (String, String)>>,
	synthetic_name: &str,
	kind: &str,
) -> Result<(String, String), McpError> {
	if let Some(entry) = registry.lock().get(synthetic_name) {
		return Ok(entry.clone());
	}
	if let Some((alias, name)) = synthetic_name.split_once(NAMESPACE_SEPARATOR) {
		return Ok((alias.to_string(), name.to_string()));
	}
	Err(McpError::invalid_params(
		format!("Unknown {kind} {synthetic_name}"),
		synthetic_name.to_string(),
	))
}

fn resolve_resource_uri(
	registry: &SyncMutex<HashMap<String, (String, String)>>,
	uri: &str,
) -> Result<(String, String), McpError> {
	if let Some(entry) = registry.lock().get(uri) {
		return Ok(entry.clone());
	}
	if let Some(token) = uri.strip_prefix(RESOURCE_SCHEME) {
		let decoded = URL_SAFE_NO_PAD
			.decode(token)
			.map_err(|_| McpError::invalid_params(format!("Unknown resource uri {uri}"), uri.to_string()))?;
		let payload: Value = serde_json::from_slice(&decoded)
			.map_err(|_| McpError::invalid_params(format!("Unknown resource uri {uri}"), uri.to_string()))?;
		let server = payload.get("server").and_then(Value::as_str).map(str::to_string);
		let original_uri = payload.get("uri").and_then(Value::as_str).map(str::to_string);
		if let (Some(server), Some(original_uri)) = (server, original_uri) {
			return Ok((server, original_uri));
		}
	}
	Err(McpError::invalid_params(format!("Unknown resource uri {uri}"), uri.to_string()))
}

fn encode_resource_uri(alias: &str, uri: &str) -> String {
	let payload = json!({ "server": alias, "uri": uri }).to_string();
	format!("{RESOURCE_SCHEME}{}", URL_SAFE_NO_PAD.encode(payload))
}

/// Pull a list of items out of a tolerant response shape: `{key: [...]}`,
/// `{data: [...]}`, or a bare array.
fn extract_sequence(result: &Value, key: &str) -> Vec<Value> {
	match result {
		Value::Object(map) => {
			if let Some(Value::Array(items)) = map.get(key) {
				items.clone()
			} else if let Some(Value::Array(items)) = map.get("data") {
				items.clone()
			} else {
				Vec::new()
			}
		}
		Value::Array(items) => items.clone(),
		_ => Vec::new(),
	}
}

fn apply_cursor(items: Vec<Value>, params: &Value) -> (Vec<Value>, Option<String>) {
	let page_size = params
		.get("limit")
		.and_then(Value::as_u64)
		.map(|n| n.max(1) as usize)
		.unwrap_or(items.len());
	let offset = params
		.get("cursor")
		.and_then(Value::as_str)
		.map(decode_cursor)
		.unwrap_or(0);
	let offset = offset.min(items.len());
	let end = (offset + page_size).min(items.len());
	let next_offset = end;
	let page = items[offset..end].to_vec();
	let next_cursor = if next_offset < items.len() {
		Some(encode_cursor(next_offset))
	} else {
		None
	};
	(page, next_cursor)
}

fn decode_cursor(cursor: &str) -> usize {
	URL_SAFE_NO_PAD
		.decode(cursor)
		.ok()
		.and_then(|bytes| serde_json::from_slice::<Value>(&bytes).ok())
		.and_then(|v| v.get("offset").and_then(Value::as_u64))
		.unwrap_or(0) as usize
}

fn encode_cursor(offset: usize) -> String {
	let payload = json!({ "offset": offset }).to_string();
	URL_SAFE_NO_PAD.encode(payload)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn extracts_named_key_then_data_then_bare_array() {
		assert_eq!(extract_sequence(&json!({"tools": [1, 2]}), "tools"), vec![json!(1), json!(2)]);
		assert_eq!(extract_sequence(&json!({"data": [3]}), "tools"), vec![json!(3)]);
		assert_eq!(extract_sequence(&json!([4, 5]), "tools"), vec![json!(4), json!(5)]);
		assert_eq!(extract_sequence(&json!({"other": 1}), "tools"), Vec::<Value>::new());
	}

	#[test]
	fn cursor_round_trips_through_base64() {
		let cursor = encode_cursor(7);
		assert_eq!(decode_cursor(&cursor), 7);
	}

	#[test]
	fn apply_cursor_paginates_and_stops_when_exhausted() {
		let items: Vec<Value> = (0..5).map(|i| json!(i)).collect();
		let (page, next) = apply_cursor(items.clone(), &json!({"limit": 2}));
		assert_eq!(page, vec![json!(0), json!(1)]);
		let next = next.unwrap();
		let (page2, next2) = apply_cursor(items, &json!({"limit": 2, "cursor": next}));
		assert_eq!(page2, vec![json!(2), json!(3)]);
		assert!(next2.is_some());
	}

	#[test]
	fn resource_uri_round_trips() {
		let encoded = encode_resource_uri("alpha", "file:///a.txt");
		let registry = SyncMutex::new(HashMap::new());
		let (alias, uri) = resolve_resource_uri(&registry, &encoded).unwrap();
		assert_eq!(alias, "alpha");
		assert_eq!(uri, "file:///a.txt");
	}

	#[test]
	fn resolve_namespaced_falls_back_to_splitting_when_not_registered() {
		let registry = SyncMutex::new(HashMap::new());
		let (alias, name) = resolve_namespaced(&registry, "alpha__search", "tool").unwrap();
		assert_eq!(alias, "alpha");
		assert_eq!(name, "search");
	}

	#[test]
	fn resolve_namespaced_rejects_unknown_unnamespaced_name() {
		let registry = SyncMutex::new(HashMap::new());
		assert!(resolve_namespaced(&registry, "search", "tool").is_err());
	}

	#[test]
	fn wrap_namespaced_registers_synthetic_name_and_clearing_falls_back_to_splitting() {
		let registry = SyncMutex::new(HashMap::new());
		let wrapped = wrap_namespaced(&registry, "alpha", &json!({"name": "search"}), "name").unwrap();
		assert_eq!(wrapped["name"], json!("alpha__search"));
		assert_eq!(wrapped["metadata"]["proxy"]["server"], json!("alpha"));
		let (alias, original) = resolve_namespaced(&registry, "alpha__search", "tool").unwrap();
		assert_eq!((alias.as_str(), original.as_str()), ("alpha", "search"));

		// A fresh list call replaces the registry; a name handed out before
		// that still resolves via the `__` split fallback, not the registry.
		registry.lock().clear();
		let (alias, original) = resolve_namespaced(&registry, "alpha__search", "tool").unwrap();
		assert_eq!((alias.as_str(), original.as_str()), ("alpha", "search"));
	}

	#[test]
	fn wrap_namespaced_skips_non_object_items_instead_of_panicking() {
		let registry = SyncMutex::new(HashMap::new());
		assert!(wrap_namespaced(&registry, "alpha", &json!(["not", "an", "object"]), "name").is_none());
		assert!(wrap_namespaced(&registry, "alpha", &json!("also not an object"), "name").is_none());
	}
}
