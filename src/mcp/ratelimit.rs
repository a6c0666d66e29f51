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

//! Per-key token bucket rate limiter. Naive and in-memory by design; unbounded
//! bucket growth is a redesign candidate for multi-tenant deployments, out of
//! scope here.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Instant;

struct Bucket {
	tokens: f64,
	updated: Instant,
}

/// Token bucket keyed by presented auth token (or `"anonymous"` without one).
/// Capacity and refill rate are both derived from `max_per_minute`. New buckets
/// start full so a burst of the configured size always succeeds immediately.
pub struct RateLimiter {
	max_per_minute: Option<u32>,
	buckets: Mutex<HashMap<String, Bucket>>,
}

const ANONYMOUS_KEY: &str = "anonymous";

impl RateLimiter {
	pub fn new(max_per_minute: Option<u32>) -> Self {
		Self {
			max_per_minute,
			buckets: Mutex::new(HashMap::new()),
		}
	}

	pub fn is_configured(&self) -> bool {
		self.max_per_minute.is_some()
	}

	/// `key` should be the presented token, or `None` for an anonymous caller.
	pub fn allow(&self, key: Option<&str>) -> bool {
		let Some(max) = self.max_per_minute else {
			return true;
		};
		let max = max as f64;
		let key = key.unwrap_or(ANONYMOUS_KEY);
		let mut buckets = self.buckets.lock();
		let now = Instant::now();
		let bucket = buckets.entry(key.to_string()).or_insert_with(|| Bucket {
			tokens: max,
			updated: now,
		});
		let elapsed = now.duration_since(bucket.updated).as_secs_f64();
		bucket.updated = now;
		bucket.tokens = (bucket.tokens + elapsed * (max / 60.0)).min(max);
		if bucket.tokens >= 1.0 {
			bucket.tokens -= 1.0;
			true
		} else {
			false
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn passes_everything_when_unconfigured() {
		let limiter = RateLimiter::new(None);
		for _ in 0..1000 {
			assert!(limiter.allow(Some("x")));
		}
	}

	#[test]
	fn exhausts_then_refuses_within_the_same_instant() {
		let limiter = RateLimiter::new(Some(3));
		assert!(limiter.allow(Some("tok")));
		assert!(limiter.allow(Some("tok")));
		assert!(limiter.allow(Some("tok")));
		assert!(!limiter.allow(Some("tok")));
	}

	#[test]
	fn buckets_are_independent_per_key() {
		let limiter = RateLimiter::new(Some(1));
		assert!(limiter.allow(Some("a")));
		assert!(!limiter.allow(Some("a")));
		assert!(limiter.allow(Some("b")));
	}

	#[test]
	fn anonymous_key_used_when_no_token_presented() {
		let limiter = RateLimiter::new(Some(1));
		assert!(limiter.allow(None));
		assert!(!limiter.allow(None));
	}
}
