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

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// JSON-RPC 2.0 request (and notification, when `id` is absent).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
	pub jsonrpc: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub id: Option<Value>,
	pub method: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub params: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
	pub jsonrpc: String,
	pub id: Option<Value>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub result: Option<Value>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<JsonRpcError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
	pub code: i32,
	pub message: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub data: Option<Value>,
}

impl JsonRpcResponse {
	pub fn result(id: Option<Value>, result: Value) -> Self {
		Self {
			jsonrpc: "2.0".to_string(),
			id,
			result: Some(result),
			error: None,
		}
	}

	pub fn error(id: Option<Value>, code: i32, message: impl Into<String>, data: Option<Value>) -> Self {
		Self {
			jsonrpc: "2.0".to_string(),
			id,
			result: None,
			error: Some(JsonRpcError {
				code,
				message: message.into(),
				data,
			}),
		}
	}
}

/// A raw JSON-RPC message read off the wire, before we know which shape it is.
///
/// Distinguishing request/response/notification follows the JSON-RPC 2.0 grammar:
/// a message with `method` and `id` is a request, `method` without `id` is a
/// notification, and a message with `id` plus `result`/`error` is a response.
#[derive(Debug, Clone)]
pub enum Message {
	Request(JsonRpcRequest),
	Response(JsonRpcResponse),
	Notification { method: String, params: Option<Value> },
}

impl Message {
	pub fn from_value(value: Value) -> Option<Self> {
		let obj = value.as_object()?;
		let has_id = obj.contains_key("id");
		let has_method = obj.contains_key("method");
		if has_method && has_id {
			return serde_json::from_value(value).ok().map(Message::Request);
		}
		if has_method {
			let method = obj.get("method")?.as_str()?.to_string();
			let params = obj.get("params").cloned();
			return Some(Message::Notification { method, params });
		}
		if has_id && (obj.contains_key("result") || obj.contains_key("error")) {
			return serde_json::from_value(value).ok().map(Message::Response);
		}
		None
	}
}

/// Structured error used across the router and upstream layers. Converts
/// cleanly into the JSON-RPC error object that crosses the wire.
#[derive(Debug, Clone)]
pub struct McpError {
	pub code: i32,
	pub message: String,
	pub data: Option<Value>,
}

impl McpError {
	pub fn new(code: i32, message: impl Into<String>, data: Option<Value>) -> Self {
		Self {
			code,
			message: message.into(),
			data,
		}
	}

	pub fn invalid_params(message: impl Into<String>, context: impl Into<String>) -> Self {
		let context = context.into();
		Self::new(-32602, message, Some(serde_json::json!({ "context": context })))
	}

	pub fn method_not_found(message: impl Into<String>, context: impl Into<String>) -> Self {
		let context = context.into();
		Self::new(-32601, message, Some(serde_json::json!({ "context": context })))
	}

	pub fn internal_error(message: impl Into<String>, context: impl Into<String>) -> Self {
		let context = context.into();
		Self::new(-32603, message, Some(serde_json::json!({ "context": context })))
	}

	/// Generic upstream-facing failure: timeout or unavailable upstream.
	pub fn upstream_unavailable(message: impl Into<String>) -> Self {
		Self::new(-32000, message, None)
	}

	pub fn into_jsonrpc(self) -> JsonRpcError {
		JsonRpcError {
			code: self.code,
			message: self.message,
			data: self.data,
		}
	}
}

impl fmt::Display for McpError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{} (code {})", self.message, self.code)
	}
}

impl std::error::Error for McpError {}

impl From<JsonRpcError> for McpError {
	fn from(err: JsonRpcError) -> Self {
		Self {
			code: err.code,
			message: err.message,
			data: err.data,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn classifies_request() {
		let v = json!({"jsonrpc": "2.0", "id": 1, "method": "ping"});
		match Message::from_value(v).unwrap() {
			Message::Request(r) => assert_eq!(r.method, "ping"),
			_ => panic!("expected request"),
		}
	}

	#[test]
	fn classifies_notification() {
		let v = json!({"jsonrpc": "2.0", "method": "notifications/initialized"});
		match Message::from_value(v).unwrap() {
			Message::Notification { method, .. } => assert_eq!(method, "notifications/initialized"),
			_ => panic!("expected notification"),
		}
	}

	#[test]
	fn classifies_response() {
		let v = json!({"jsonrpc": "2.0", "id": 1, "result": {"ok": true}});
		match Message::from_value(v).unwrap() {
			Message::Response(r) => assert_eq!(r.id, Some(json!(1))),
			_ => panic!("expected response"),
		}
	}

	#[test]
	fn mcp_error_round_trips_into_jsonrpc() {
		let err = McpError::invalid_params("bad", "tools/call");
		let rpc = err.into_jsonrpc();
		assert_eq!(rpc.code, -32602);
	}
}
