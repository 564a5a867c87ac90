use futures::future::BoxFuture;
use std::future::Future;

use crate::error::FetchError;
use crate::models::{DataSource, Sourced};

type Step<'a, T> = BoxFuture<'a, Result<Option<Sourced<T>>, FetchError>>;

/// Ordered list of data sources tried until one yields a value.
///
/// Each step answers `Ok(Some(_))` with a value, `Ok(None)` when its tier
/// has nothing, or an error. Steps are futures and only run once reached.
pub struct FallbackChain<'a, T> {
    label: &'static str,
    steps: Vec<Step<'a, T>>,
}

impl<'a, T: Send + 'a> FallbackChain<'a, T> {
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            steps: Vec::new(),
        }
    }

    pub fn then<F>(mut self, step: F) -> Self
    where
        F: Future<Output = Result<Option<Sourced<T>>, FetchError>> + Send + 'a,
    {
        self.steps.push(Box::pin(step));
        self
    }

    /// Convenience for a step that cannot fail, such as a cache read.
    pub fn then_optional<F>(self, source: DataSource, step: F) -> Self
    where
        F: Future<Output = Option<T>> + Send + 'a,
    {
        self.then(async move { Ok(step.await.map(|value| Sourced::new(value, source))) })
    }

    /// First value produced, or the last error seen, or `NotFound`.
    pub async fn first_available(self) -> Result<Sourced<T>, FetchError> {
        let mut last_error = None;

        for (index, step) in self.steps.into_iter().enumerate() {
            match step.await {
                Ok(Some(found)) => {
                    if index > 0 {
                        tracing::info!(
                            "{}: served from {} after {} fallback step(s)",
                            self.label,
                            found.source.as_str(),
                            index
                        );
                    }
                    return Ok(found);
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!("{}: step {} failed: {}", self.label, index + 1, e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| FetchError::NotFound(self.label.to_string())))
    }

    /// Like `first_available` but never fails: `default` supplies the value
    /// when every step came up empty.
    pub async fn or_default(self, default: impl FnOnce() -> T) -> Sourced<T> {
        let label = self.label;
        match self.first_available().await {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!("{}: using placeholder data ({})", label, e);
                Sourced::new(default(), DataSource::Placeholder)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn live<T: Send + 'static>(value: T) -> impl Future<Output = Result<Option<Sourced<T>>, FetchError>> {
        async move { Ok(Some(Sourced::new(value, DataSource::Live))) }
    }

    fn failing<T>() -> impl Future<Output = Result<Option<Sourced<T>>, FetchError>> {
        async { Err(FetchError::Timeout) }
    }

    #[tokio::test]
    async fn first_success_wins_and_later_steps_never_run() {
        let later_runs = AtomicUsize::new(0);

        let result = FallbackChain::new("test")
            .then(live(1))
            .then_optional(DataSource::Persisted, async {
                later_runs.fetch_add(1, Ordering::SeqCst);
                Some(2)
            })
            .first_available()
            .await
            .unwrap();

        assert_eq!(result, Sourced::new(1, DataSource::Live));
        assert_eq!(later_runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn falls_through_failures_and_empty_tiers() {
        let result = FallbackChain::new("test")
            .then(failing())
            .then_optional(DataSource::MemoryCache, async { None })
            .then_optional(DataSource::Persisted, async { Some("stale") })
            .or_default(|| "placeholder")
            .await;

        assert_eq!(result, Sourced::new("stale", DataSource::Persisted));
    }

    #[tokio::test]
    async fn default_is_used_when_everything_is_empty() {
        let result = FallbackChain::new("test")
            .then(failing::<Vec<u8>>())
            .then_optional(DataSource::Persisted, async { None })
            .or_default(Vec::new)
            .await;

        assert_eq!(result.source, DataSource::Placeholder);
        assert!(result.value.is_empty());
    }

    #[tokio::test]
    async fn reports_last_error_or_not_found() {
        let err = FallbackChain::<u8>::new("lookup")
            .then_optional(DataSource::Live, async { None })
            .then(failing())
            .first_available()
            .await
            .unwrap_err();
        assert_eq!(err, FetchError::Timeout);

        let err = FallbackChain::<u8>::new("lookup")
            .then_optional(DataSource::Live, async { None })
            .first_available()
            .await
            .unwrap_err();
        assert_eq!(err, FetchError::NotFound("lookup".to_string()));
    }
}
