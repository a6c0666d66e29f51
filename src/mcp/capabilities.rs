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

//! Folds the memoized `initialize` results of every upstream into the single
//! capability set the proxy advertises to its client.

use serde_json::{json, Value};

/// Aggregate capabilities across all upstream `initialize` results: a
/// capability is advertised if at least one upstream offers it. `logging` is
/// always advertised since the proxy itself terminates `logging/setLevel`.
pub fn aggregate(initialize_results: &[Option<Value>]) -> Value {
	let has = |key: &str| {
		initialize_results.iter().any(|result| {
			result
				.as_ref()
				.and_then(|r| r.get("capabilities"))
				.and_then(|c| c.get(key))
				.is_some()
		})
	};

	let mut capabilities = serde_json::Map::new();
	if has("tools") {
		capabilities.insert("tools".to_string(), json!({ "list": true, "call": true }));
	}
	if has("resources") {
		capabilities.insert(
			"resources".to_string(),
			json!({ "list": true, "read": true, "templates": { "list": true } }),
		);
	}
	if has("prompts") {
		capabilities.insert("prompts".to_string(), json!({ "list": true, "get": true }));
	}
	capabilities.insert("logging".to_string(), json!({ "setLevel": true }));
	Value::Object(capabilities)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn empty_upstreams_still_advertise_logging() {
		let result = aggregate(&[]);
		assert_eq!(result["logging"]["setLevel"], json!(true));
		assert!(result.get("tools").is_none());
	}

	#[test]
	fn any_upstream_with_tools_advertises_tools() {
		let results = vec![
			Some(json!({"capabilities": {}})),
			Some(json!({"capabilities": {"tools": {}}})),
		];
		let result = aggregate(&results);
		assert_eq!(result["tools"], json!({"list": true, "call": true}));
	}

	#[test]
	fn missing_initialize_result_is_treated_as_no_capabilities() {
		let results = vec![None, None];
		let result = aggregate(&results);
		assert!(result.get("tools").is_none());
		assert!(result.get("resources").is_none());
		assert!(result.get("prompts").is_none());
	}

	#[test]
	fn all_three_can_be_advertised_together() {
		let results = vec![Some(json!({
			"capabilities": {"tools": {}, "resources": {}, "prompts": {}}
		}))];
		let result = aggregate(&results);
		assert_eq!(result["tools"]["call"], json!(true));
		assert_eq!(result["resources"]["templates"]["list"], json!(true));
		assert_eq!(result["prompts"]["get"], json!(true));
	}
}
