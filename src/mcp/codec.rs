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

//! Frame codec: reads and writes JSON-RPC messages over a pair of byte streams,
//! autodetecting between length-prefixed (`Content-Length` header) and
//! newline-delimited framing per peer.

use anyhow::Result;
use serde_json::Value;
use std::collections::HashMap;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Wraps one (reader, writer) pair and autodetects its framing.
///
/// `use_newline` starts from the caller's stated preference (`ServerConfig::stdio_mode`
/// for upstreams, always newline-preferring for the client since most MCP clients speak
/// newline-delimited JSON) but flips to match whatever framing is actually observed on
/// read, and writes mirror that observed framing so a peer never receives a
/// reply framed differently than the requests it sent.
pub struct JsonRpcCodec<R, W> {
	reader: Mutex<BufReader<R>>,
	writer: Mutex<W>,
	name: String,
	use_newline: Mutex<bool>,
}

impl<R, W> JsonRpcCodec<R, W>
where
	R: AsyncRead + Unpin,
	W: AsyncWrite + Unpin,
{
	pub fn new(reader: R, writer: W, name: impl Into<String>, prefer_newline: bool) -> Self {
		Self {
			reader: Mutex::new(BufReader::new(reader)),
			writer: Mutex::new(writer),
			name: name.into(),
			use_newline: Mutex::new(prefer_newline),
		}
	}

	/// Read the next JSON-RPC message, or `None` on a clean end-of-stream.
	pub async fn read_message(&self) -> Result<Option<Value>> {
		let mut reader = self.reader.lock().await;
		loop {
			let mut first_line = Vec::new();
			let bytes_read = reader.read_until(b'\n', &mut first_line).await?;
			if bytes_read == 0 {
				return Ok(None);
			}
			let trimmed = trim_bytes(&first_line);
			if trimmed.is_empty() {
				// Blank line between frames; keep scanning.
				continue;
			}
			if trimmed[0] == b'{' || trimmed[0] == b'[' {
				*self.use_newline.lock().await = true;
				let value = serde_json::from_slice(trimmed)?;
				return Ok(Some(value));
			}

			*self.use_newline.lock().await = false;
			let headers = match read_headers(&mut *reader, trimmed).await? {
				Some(h) => h,
				None => return Ok(None),
			};
			let length: usize = headers
				.get("content-length")
				.and_then(|v| v.parse().ok())
				.unwrap_or(0);
			let mut payload = vec![0u8; length];
			reader.read_exact(&mut payload).await?;
			let value = serde_json::from_slice(&payload)?;
			return Ok(Some(value));
		}
	}

	/// Serialize and write a message, framed according to the framing last observed
	/// on read (or the initial preference, if nothing has been read yet). Writes to
	/// one codec are serialized so concurrent senders never interleave frames.
	pub async fn write_message(&self, message: &Value) -> Result<()> {
		let data = serde_json::to_vec(message)?;
		let use_newline = *self.use_newline.lock().await;
		let mut writer = self.writer.lock().await;
		if use_newline {
			writer.write_all(&data).await?;
			writer.write_all(b"\n").await?;
		} else {
			let header = format!("Content-Length: {}\r\n\r\n", data.len());
			writer.write_all(header.as_bytes()).await?;
			writer.write_all(&data).await?;
		}
		writer.flush().await?;
		Ok(())
	}

	pub fn name(&self) -> &str {
		&self.name
	}
}

fn trim_bytes(bytes: &[u8]) -> &[u8] {
	let start = bytes.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(bytes.len());
	let end = bytes.iter().rposition(|b| !b.is_ascii_whitespace()).map(|i| i + 1).unwrap_or(0);
	if start >= end {
		&[]
	} else {
		&bytes[start..end]
	}
}

/// Parse `Name: Value` header lines up to a blank line. Malformed lines are logged
/// and skipped rather than aborting the stream.
async fn read_headers<R: AsyncRead + Unpin>(
	reader: &mut BufReader<R>,
	first_line: &[u8],
) -> Result<Option<HashMap<String, String>>> {
	let mut headers = HashMap::new();
	let mut line = first_line.to_vec();
	loop {
		let trimmed = trim_bytes(&line);
		if trimmed.is_empty() {
			break;
		}
		match std::str::from_utf8(trimmed).ok().and_then(|s| s.split_once(':')) {
			Some((name, value)) => {
				headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
			}
			None => {
				warn!(line = %String::from_utf8_lossy(trimmed), "malformed header line, skipping");
			}
		}
		line.clear();
		let bytes_read = reader.read_until(b'\n', &mut line).await?;
		if bytes_read == 0 {
			debug!("end of stream while reading header block");
			return Ok(None);
		}
	}
	Ok(Some(headers))
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;
	use tokio::io::duplex;

	#[tokio::test]
	async fn round_trips_newline_framing() {
		let (client, server) = duplex(4096);
		let (client_r, client_w) = tokio::io::split(client);
		let (server_r, server_w) = tokio::io::split(server);
		let client_codec = JsonRpcCodec::new(client_r, client_w, "client", true);
		let server_codec = JsonRpcCodec::new(server_r, server_w, "server", true);

		let msg = json!({"jsonrpc": "2.0", "id": 1, "method": "ping"});
		client_codec.write_message(&msg).await.unwrap();
		let received = server_codec.read_message().await.unwrap().unwrap();
		assert_eq!(received, msg);
	}

	#[tokio::test]
	async fn round_trips_content_length_framing() {
		let (client, server) = duplex(4096);
		let (client_r, client_w) = tokio::io::split(client);
		let (server_r, server_w) = tokio::io::split(server);
		let client_codec = JsonRpcCodec::new(client_r, client_w, "client", false);
		let server_codec = JsonRpcCodec::new(server_r, server_w, "server", false);

		let msg = json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"});
		client_codec.write_message(&msg).await.unwrap();
		let received = server_codec.read_message().await.unwrap().unwrap();
		assert_eq!(received, msg);
	}

	#[tokio::test]
	async fn autodetects_newline_when_preferring_content_length() {
		let (client, server) = duplex(4096);
		let (client_r, client_w) = tokio::io::split(client);
		let (server_r, server_w) = tokio::io::split(server);
		// Server prefers content-length but the peer sends newline-delimited JSON.
		let client_codec = JsonRpcCodec::new(client_r, client_w, "client", true);
		let server_codec = JsonRpcCodec::new(server_r, server_w, "server", false);

		let msg = json!({"jsonrpc": "2.0", "method": "notifications/initialized"});
		client_codec.write_message(&msg).await.unwrap();
		let received = server_codec.read_message().await.unwrap().unwrap();
		assert_eq!(received, msg);

		// After autodetecting newline framing on read, writes mirror it.
		let reply = json!({"jsonrpc": "2.0", "id": 1, "result": {}});
		server_codec.write_message(&reply).await.unwrap();
		let echoed = client_codec.read_message().await.unwrap().unwrap();
		assert_eq!(echoed, reply);
	}

	#[tokio::test]
	async fn eof_mid_stream_yields_no_message() {
		let (client, server) = duplex(4096);
		drop(client);
		let (server_r, server_w) = tokio::io::split(server);
		let codec = JsonRpcCodec::new(server_r, server_w, "server", false);
		assert!(codec.read_message().await.unwrap().is_none());
	}

	#[tokio::test]
	async fn blank_lines_between_frames_are_skipped() {
		let (client, server) = duplex(4096);
		let (client_r, mut client_w) = tokio::io::split(client);
		let (server_r, server_w) = tokio::io::split(server);
		let server_codec = JsonRpcCodec::new(server_r, server_w, "server", true);

		client_w.write_all(b"\n\n{\"jsonrpc\":\"2.0\",\"id\":5,\"method\":\"ping\"}\n").await.unwrap();
		client_w.flush().await.unwrap();
		let received = server_codec.read_message().await.unwrap().unwrap();
		assert_eq!(received["id"], json!(5));
		drop(client_r);
	}
}
