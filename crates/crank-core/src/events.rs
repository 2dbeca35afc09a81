//! Certificate lifecycle observability.
//!
//! `emit()` logs one structured `tracing` event per certificate lifecycle
//! transition and fans it out to whatever handlers a caller has
//! registered for that event kind, matching the closed taxonomy and
//! handler-isolation contract of the original certificate event bus
//! this platform is modeled on.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::Level;
use uuid::Uuid;

/// Closed taxonomy of certificate lifecycle events. Adding a new kind
/// is a deliberate protocol change, not an extension point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CertificateEvent {
	CsrGenerated,
	CsrSubmitted,
	CertIssued,
	CertRenewed,
	CertExpiringSoon,
	CertExpired,
	CertValidationFailed,
	CsrFailed,
	CaUnavailable,
	CertRevoked,
}

impl CertificateEvent {
	pub fn as_str(&self) -> &'static str {
		match self {
			Self::CsrGenerated => "csr_generated",
			Self::CsrSubmitted => "csr_submitted",
			Self::CertIssued => "cert_issued",
			Self::CertRenewed => "cert_renewed",
			Self::CertExpiringSoon => "cert_expiring_soon",
			Self::CertExpired => "cert_expired",
			Self::CertValidationFailed => "cert_validation_failed",
			Self::CsrFailed => "csr_failed",
			Self::CaUnavailable => "ca_unavailable",
			Self::CertRevoked => "cert_revoked",
		}
	}
}

/// Structured context carried by every emitted event.
#[derive(Debug, Clone, Serialize)]
pub struct EventContext {
	pub event: CertificateEvent,
	pub worker_id: String,
	pub correlation_id: String,
	pub timestamp: chrono::DateTime<chrono::Utc>,
	#[serde(flatten)]
	pub metadata: Map<String, Value>,
}

pub type EventHandler = Box<dyn Fn(&EventContext) + Send + Sync>;

#[derive(Default)]
struct HandlerRegistry {
	handlers: HashMap<CertificateEvent, Vec<EventHandler>>,
}

static HANDLERS: RwLock<Option<HandlerRegistry>> = RwLock::new(None);

/// Register a callback invoked for every future `emit()` of `event`.
/// No ordering is guaranteed among handlers for the same event.
pub fn register_handler(event: CertificateEvent, handler: EventHandler) {
	let mut guard = HANDLERS.write().expect("event handler registry poisoned");
	guard
		.get_or_insert_with(HandlerRegistry::default)
		.handlers
		.entry(event)
		.or_default()
		.push(handler);
}

/// Emit a certificate lifecycle event: generate a correlation id if none
/// was supplied, log a structured record, then notify every registered
/// handler. A handler that panics is caught and logged; it never stops
/// the remaining handlers or propagates to the caller.
pub fn emit(
	event: CertificateEvent,
	worker_id: &str,
	correlation_id: Option<String>,
	metadata: Map<String, Value>,
	level: Level,
) -> EventContext {
	let ctx = EventContext {
		event,
		worker_id: worker_id.to_string(),
		correlation_id: correlation_id.unwrap_or_else(generate_correlation_id),
		timestamp: chrono::Utc::now(),
		metadata,
	};

	log_event(&ctx, level);

	let guard = HANDLERS.read().expect("event handler registry poisoned");
	if let Some(registry) = guard.as_ref()
		&& let Some(handlers) = registry.handlers.get(&event)
	{
		for handler in handlers {
			let result = std::panic::catch_unwind(AssertUnwindSafe(|| handler(&ctx)));
			if let Err(panic) = result {
				tracing::error!(
					event = ctx.event.as_str(),
					worker_id = %ctx.worker_id,
					correlation_id = %ctx.correlation_id,
					?panic,
					"certificate event handler panicked",
				);
			}
		}
	}

	ctx
}

fn log_event(ctx: &EventContext, level: Level) {
	let metadata = serde_json::Value::Object(ctx.metadata.clone());
	macro_rules! log_at {
		($lvl:expr) => {
			tracing::event!(
				$lvl,
				event = ctx.event.as_str(),
				worker_id = %ctx.worker_id,
				correlation_id = %ctx.correlation_id,
				timestamp = %ctx.timestamp.to_rfc3339(),
				metadata = %metadata,
				"certificate event"
			)
		};
	}
	match level {
		Level::ERROR => log_at!(Level::ERROR),
		Level::WARN => log_at!(Level::WARN),
		Level::DEBUG => log_at!(Level::DEBUG),
		Level::TRACE => log_at!(Level::TRACE),
		_ => log_at!(Level::INFO),
	}
}

fn generate_correlation_id() -> String {
	format!("cert_{}", Uuid::new_v4().simple())
}

/// Generate (or pass through) a request correlation id the way the
/// controller API echoes `X-Correlation-Id`.
pub fn correlation_id_or_new(supplied: Option<&str>) -> String {
	supplied
		.filter(|s| !s.is_empty())
		.map(str::to_string)
		.unwrap_or_else(|| Uuid::new_v4().to_string())
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::{AtomicUsize, Ordering};
	use std::sync::Arc;

	use super::*;

	#[test]
	fn emits_generates_correlation_id_when_absent() {
		let ctx = emit(
			CertificateEvent::CsrGenerated,
			"w1",
			None,
			Map::new(),
			Level::INFO,
		);
		assert!(ctx.correlation_id.starts_with("cert_"));
	}

	#[test]
	fn emit_preserves_supplied_correlation_id() {
		let ctx = emit(
			CertificateEvent::CsrGenerated,
			"w1",
			Some("abc-123".to_string()),
			Map::new(),
			Level::INFO,
		);
		assert_eq!(ctx.correlation_id, "abc-123");
	}

	#[test]
	fn handler_panic_does_not_propagate() {
		let calls = Arc::new(AtomicUsize::new(0));
		let calls_clone = calls.clone();
		register_handler(
			CertificateEvent::CertRevoked,
			Box::new(move |_ctx| {
				calls_clone.fetch_add(1, Ordering::SeqCst);
				panic!("boom");
			}),
		);

		// Must not unwind out of emit().
		emit(
			CertificateEvent::CertRevoked,
			"w1",
			None,
			Map::new(),
			Level::ERROR,
		);

		assert_eq!(calls.load(Ordering::SeqCst), 1);
	}
}
