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

//! Bearer-token auth gate. A simple token-based authenticator that can be
//! swapped with a real implementation later; deliberately not pluggable beyond a
//! shared secret.

/// Validates a presented token against a configured shared secret. Requests pass
/// through untouched when no secret is configured.
pub struct AuthGate {
	token: Option<String>,
}

impl AuthGate {
	pub fn new(token: Option<String>) -> Self {
		Self { token }
	}

	pub fn is_configured(&self) -> bool {
		self.token.is_some()
	}

	pub fn validate(&self, presented: Option<&str>) -> bool {
		match &self.token {
			None => true,
			Some(expected) => presented == Some(expected.as_str()),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn passes_everything_when_unconfigured() {
		let gate = AuthGate::new(None);
		assert!(gate.validate(None));
		assert!(gate.validate(Some("anything")));
	}

	#[test]
	fn requires_exact_match_when_configured() {
		let gate = AuthGate::new(Some("s3cret".to_string()));
		assert!(!gate.validate(None));
		assert!(!gate.validate(Some("wrong")));
		assert!(gate.validate(Some("s3cret")));
	}
}
