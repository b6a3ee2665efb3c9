//! Ordered teardown callbacks run once before the CLI exits.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use tracing::debug;

type TeardownFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;
type TeardownFn = Box<dyn FnOnce() -> TeardownFuture + Send>;

/// Callbacks to run on shutdown, in registration order.
///
/// Cloning shares the same list. `run` drains it, so a second call (or a
/// second clone calling it) does nothing.
#[derive(Clone, Default)]
pub struct TeardownRegistry {
    entries: Arc<Mutex<Vec<(String, TeardownFn)>>>,
}

impl TeardownRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F, Fut>(&self, name: impl Into<String>, callback: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let boxed: TeardownFn = Box::new(move || Box::pin(callback()));
        if let Ok(mut entries) = self.entries.lock() {
            entries.push((name.into(), boxed));
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    /// Runs every registered callback in order. Failures do not stop later
    /// callbacks; they are collected and returned.
    pub async fn run(&self) -> Vec<anyhow::Error> {
        let entries = match self.entries.lock() {
            Ok(mut entries) => std::mem::take(&mut *entries),
            Err(_) => return Vec::new(),
        };
        let mut errors = Vec::new();
        for (name, callback) in entries {
            debug!(step = %name, "running teardown");
            if let Err(err) = callback().await {
                errors.push(err.context(format!("teardown step `{}` failed", name)));
            }
        }
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn runs_in_registration_order_once() {
        let registry = TeardownRegistry::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for step in ["kill", "after-hook"] {
            let order = Arc::clone(&order);
            registry.register(step, move || async move {
                order.lock().unwrap().push(step);
                Ok(())
            });
        }
        assert_eq!(registry.len(), 2);
        assert!(registry.run().await.is_empty());
        assert!(registry.clone().run().await.is_empty());
        assert_eq!(*order.lock().unwrap(), vec!["kill", "after-hook"]);
    }

    #[tokio::test]
    async fn failures_are_collected_and_later_steps_still_run() {
        let registry = TeardownRegistry::new();
        let ran = Arc::new(Mutex::new(false));
        registry.register("boom", || async { Err(anyhow::anyhow!("boom")) });
        let flag = Arc::clone(&ran);
        registry.register("after", move || async move {
            *flag.lock().unwrap() = true;
            Ok(())
        });
        let errors = registry.run().await;
        assert_eq!(errors.len(), 1);
        assert!(format!("{:#}", errors[0]).contains("boom"));
        assert!(*ran.lock().unwrap());
    }
}
