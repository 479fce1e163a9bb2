use std::{
	panic::{AssertUnwindSafe, catch_unwind},
	sync::{Arc, Mutex},
};

use serde_json::{Map, Value};

use dossier_domain::merge::Rejection;

use crate::observe::ObserveResponse;

#[derive(Clone, Debug)]
pub enum Event {
	Update { subject: String, updated: Map<String, Value>, profile: Map<String, Value> },
	Conflict { subject: String, rejected: Vec<Rejection> },
	ObserveComplete {
		subject: String,
		request_id: String,
		result: Option<ObserveResponse>,
		error: Option<String>,
	},
}

pub type EventListener = dyn Fn(&Event) + Send + Sync;

/// Process-wide listener registry. Listeners run synchronously in registration order;
/// a panicking listener is logged and skipped, never propagated.
#[derive(Default)]
pub(crate) struct EventBus {
	listeners: Mutex<Vec<Arc<EventListener>>>,
}
impl EventBus {
	pub(crate) fn subscribe(&self, listener: Arc<EventListener>) {
		self.listeners.lock().unwrap_or_else(|err| err.into_inner()).push(listener);
	}

	pub(crate) fn emit(&self, event: &Event) {
		let listeners =
			self.listeners.lock().unwrap_or_else(|err| err.into_inner()).clone();

		for listener in listeners {
			if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
				tracing::warn!("An event listener panicked; continuing.");
			}
		}
	}
}
