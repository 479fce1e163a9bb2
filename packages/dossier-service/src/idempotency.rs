use std::{
	collections::{HashMap, VecDeque},
	sync::Mutex,
	time::{Duration, Instant},
};

use crate::{observe::ObserveResponse, patch::PatchResponse};

#[derive(Clone, Debug)]
pub(crate) enum CachedResponse {
	Observe(ObserveResponse),
	Patch(PatchResponse),
}

struct CacheSlot {
	stored_at: Instant,
	response: CachedResponse,
}

#[derive(Default)]
struct CacheState {
	slots: HashMap<String, CacheSlot>,
	order: VecDeque<String>,
}

/// Bounded per-process replay cache keyed by `"<kind>:<subject>:<caller-key>"`. Entries
/// expire after the configured TTL; when full, the oldest entry is evicted; expired
/// entries are pruned opportunistically on insert.
pub(crate) struct IdempotencyCache {
	ttl: Duration,
	max_entries: usize,
	state: Mutex<CacheState>,
}
impl IdempotencyCache {
	pub(crate) fn new(cfg: &dossier_config::Idempotency) -> Self {
		Self {
			ttl: Duration::from_millis(cfg.ttl_ms),
			max_entries: cfg.max_entries,
			state: Mutex::new(CacheState::default()),
		}
	}

	pub(crate) fn key(kind: &str, subject: &str, caller_key: &str) -> String {
		format!("{kind}:{subject}:{caller_key}")
	}

	pub(crate) fn get(&self, key: &str) -> Option<CachedResponse> {
		let state = self.state.lock().unwrap_or_else(|err| err.into_inner());
		let slot = state.slots.get(key)?;

		if slot.stored_at.elapsed() >= self.ttl {
			return None;
		}

		Some(slot.response.clone())
	}

	pub(crate) fn insert(&self, key: String, response: CachedResponse) {
		let mut state = self.state.lock().unwrap_or_else(|err| err.into_inner());
		let ttl = self.ttl;

		while let Some(front) = state.order.front() {
			let expired = state
				.slots
				.get(front)
				.map(|slot| slot.stored_at.elapsed() >= ttl)
				.unwrap_or(true);

			if !expired {
				break;
			}

			let front = front.clone();

			state.slots.remove(&front);
			state.order.pop_front();
		}

		if !state.slots.contains_key(&key) && state.slots.len() >= self.max_entries {
			if let Some(oldest) = state.order.pop_front() {
				state.slots.remove(&oldest);
			}
		}
		if !state.slots.contains_key(&key) {
			state.order.push_back(key.clone());
		}

		state.slots.insert(key, CacheSlot { stored_at: Instant::now(), response });
	}
}
