//! LIFO shutdown callback registry. Hooks run in reverse registration
//! order so default runtime hooks, registered earliest, run last —
//! after any hooks a concrete worker adds during `setup_routes`.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

pub struct ShutdownHook {
	pub name: String,
	pub description: String,
	pub timeout: Duration,
	pub tags: Vec<String>,
	run: Box<dyn FnOnce() -> BoxFuture + Send>,
}

impl ShutdownHook {
	pub fn new<F, Fut>(name: impl Into<String>, description: impl Into<String>, timeout: Duration, run: F) -> Self
	where
		F: FnOnce() -> Fut + Send + 'static,
		Fut: Future<Output = ()> + Send + 'static,
	{
		Self {
			name: name.into(),
			description: description.into(),
			timeout,
			tags: Vec::new(),
			run: Box::new(move || Box::pin(run())),
		}
	}

	pub fn with_tags(mut self, tags: impl IntoIterator<Item = impl Into<String>>) -> Self {
		self.tags = tags.into_iter().map(Into::into).collect();
		self
	}
}

/// Ordered list of shutdown hooks, executed LIFO on shutdown. A
/// timed-out hook is abandoned, never panicked on, and the next hook
/// still runs.
#[derive(Default)]
pub struct ShutdownRegistry {
	hooks: Vec<ShutdownHook>,
}

impl ShutdownRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn register(&mut self, hook: ShutdownHook) {
		self.hooks.push(hook);
	}

	pub async fn run_all(self) {
		for hook in self.hooks.into_iter().rev() {
			tracing::info!(hook = %hook.name, "running shutdown hook");
			let timeout = hook.timeout;
			let name = hook.name.clone();
			let fut = (hook.run)();
			match tokio::time::timeout(timeout, fut).await {
				Ok(()) => tracing::debug!(hook = %name, "shutdown hook completed"),
				Err(_) => tracing::warn!(hook = %name, timeout_secs = timeout.as_secs(), "shutdown hook timed out, abandoning"),
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::{AtomicUsize, Ordering};
	use std::sync::Arc;

	#[tokio::test]
	async fn hooks_run_in_lifo_order() {
		let order = Arc::new(std::sync::Mutex::new(Vec::new()));
		let mut registry = ShutdownRegistry::new();

		let o1 = order.clone();
		registry.register(ShutdownHook::new("first", "", Duration::from_secs(1), move || async move {
			o1.lock().unwrap().push("first");
		}));
		let o2 = order.clone();
		registry.register(ShutdownHook::new("second", "", Duration::from_secs(1), move || async move {
			o2.lock().unwrap().push("second");
		}));

		registry.run_all().await;
		assert_eq!(*order.lock().unwrap(), vec!["second", "first"]);
	}

	#[tokio::test(start_paused = true)]
	async fn timed_out_hook_is_abandoned_and_next_still_runs() {
		let ran = Arc::new(AtomicUsize::new(0));
		let mut registry = ShutdownRegistry::new();

		registry.register(ShutdownHook::new("slow", "", Duration::from_millis(10), || async move {
			tokio::time::sleep(Duration::from_secs(60)).await;
		}));
		let r = ran.clone();
		registry.register(ShutdownHook::new("fast", "", Duration::from_secs(1), move || async move {
			r.fetch_add(1, Ordering::SeqCst);
		}));

		registry.run_all().await;
		assert_eq!(ran.load(Ordering::SeqCst), 1);
	}
}
