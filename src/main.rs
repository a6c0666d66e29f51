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

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use mcp_aggregator::config::ProxyConfig;
use mcp_aggregator::mcp::logging;
use mcp_aggregator::mcp::router::Router;

#[derive(Parser)]
#[command(name = "mcp-aggregator")]
#[command(version = "0.1.0")]
#[command(about = "Aggregates multiple downstream MCP servers behind a single client session")]
struct Args {
	/// Path to the JSON proxy configuration file.
	#[arg(long)]
	config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
	let args = Args::parse();

	let config = ProxyConfig::load(&args.config)?;
	logging::init_logging(&config.log_level, config.structured_logging)?;

	let client_codec = Arc::new(mcp_aggregator::mcp::codec::JsonRpcCodec::new(
		tokio::io::stdin(),
		tokio::io::stdout(),
		"client",
		true,
	));
	let router = Router::new(config, client_codec.clone());

	loop {
		match client_codec.read_message().await {
			Ok(Some(value)) => router.handle_client_message(value).await,
			Ok(None) => {
				tracing::info!("client connection closed");
				router.shutdown_all().await;
				break;
			}
			Err(err) => {
				logging::log_critical_error("reading client stream", &err);
				router.shutdown_all().await;
				return Err(err);
			}
		}
	}

	Ok(())
}
