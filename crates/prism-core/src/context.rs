//! Per-request deadline, cancellation, and forwarded client headers.
//!
//! # Design
//! - Cancellation is a `watch` channel; every clone of a context observes the
//!   same signal, and derived contexts inherit it.
//! - Deadlines only ever tighten: a derived context keeps the earlier of its
//!   parent's deadline and its own.
//! - `run` races a stage future against cancellation and the effective
//!   deadline so no stage can outlive its request.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::{ImageError, ImageResult};

/// Request-scoped execution context.
#[derive(Debug, Clone)]
pub struct RequestContext {
    deadline: Option<Instant>,
    cancel_rx: watch::Receiver<bool>,
    cancel_tx: Arc<watch::Sender<bool>>,
    headers: Arc<[(String, String)]>,
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::background()
    }
}

impl RequestContext {
    /// Root context with no deadline.
    #[must_use]
    pub fn background() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            deadline: None,
            cancel_rx: rx,
            cancel_tx: Arc::new(tx),
            headers: Arc::from(Vec::new()),
        }
    }

    /// Derive a context whose deadline is at most `timeout` from now.
    #[must_use]
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        let deadline = Some(self.deadline.map_or(candidate, |current| current.min(candidate)));
        Self {
            deadline,
            ..self.clone()
        }
    }

    /// Derive a fresh root context that keeps the forwarded headers but is
    /// detached from this request's cancellation and deadline.
    #[must_use]
    pub fn detached(&self) -> Self {
        Self {
            headers: Arc::clone(&self.headers),
            ..Self::background()
        }
    }

    /// Attach client headers that loaders may forward upstream.
    #[must_use]
    pub fn with_headers(mut self, headers: Vec<(String, String)>) -> Self {
        self.headers = Arc::from(headers);
        self
    }

    /// Forwardable client headers.
    #[must_use]
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Case-insensitive header lookup.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Effective deadline, if any.
    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Signal cancellation to every clone of this context.
    pub fn cancel(&self) {
        self.cancel_tx.send_replace(true);
    }

    /// Whether cancellation was signalled.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        *self.cancel_rx.borrow()
    }

    /// Whether the context is canceled or past its deadline.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.is_canceled() || self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }

    /// Resolve once cancellation is signalled.
    pub async fn cancelled(&self) {
        let mut rx = self.cancel_rx.clone();
        if rx.wait_for(|canceled| *canceled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }

    /// Check the context before starting a stage.
    ///
    /// # Errors
    ///
    /// Returns `Canceled` or `Timeout` tagged with `stage`.
    pub fn check(&self, stage: &'static str) -> ImageResult<()> {
        if self.is_canceled() {
            return Err(ImageError::Canceled { stage });
        }
        if self.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Err(ImageError::Timeout { stage });
        }
        Ok(())
    }

    /// Run a stage future bounded by cancellation, the request deadline, and
    /// an optional stage timeout.
    ///
    /// # Errors
    ///
    /// Returns `Canceled` if the context is canceled first, `Timeout` if a
    /// deadline elapses first, otherwise the future's own result.
    pub async fn run<F, T>(
        &self,
        stage: &'static str,
        stage_timeout: Option<Duration>,
        fut: F,
    ) -> ImageResult<T>
    where
        F: Future<Output = ImageResult<T>>,
    {
        let bounded = match stage_timeout {
            Some(timeout) => self.with_timeout(timeout),
            None => self.clone(),
        };
        tokio::select! {
            biased;
            () = bounded.cancelled() => Err(ImageError::Canceled { stage }),
            () = sleep_until(bounded.deadline) => Err(ImageError::Timeout { stage }),
            out = fut => out,
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stage_timeout_yields_timeout() {
        let ctx = RequestContext::background();
        let result = ctx
            .run("load", Some(Duration::from_millis(10)), async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(ImageError::Timeout { stage: "load" })));
    }

    #[tokio::test]
    async fn cancellation_reaches_every_clone() {
        let ctx = RequestContext::background().with_timeout(Duration::from_secs(30));
        let clone = ctx.clone();
        let task = tokio::spawn(async move {
            clone
                .run("process", None, async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(1)
                })
                .await
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        ctx.cancel();
        let result = task.await.ok();
        assert!(matches!(
            result,
            Some(Err(ImageError::Canceled { stage: "process" }))
        ));
        assert!(ctx.is_canceled());
        assert!(ctx.check("load").is_err());
    }

    #[tokio::test]
    async fn derived_deadlines_only_tighten() {
        let short = RequestContext::background().with_timeout(Duration::from_millis(5));
        let longer = short.with_timeout(Duration::from_secs(60));
        assert_eq!(short.deadline(), longer.deadline());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(longer.is_done());
        assert!(matches!(
            longer.check("cache"),
            Err(ImageError::Timeout { stage: "cache" })
        ));
    }

    #[tokio::test]
    async fn detached_contexts_ignore_parent_cancellation() {
        let ctx = RequestContext::background()
            .with_headers(vec![("Accept".into(), "image/webp".into())]);
        let detached = ctx.detached();
        ctx.cancel();
        assert!(!detached.is_canceled());
        assert_eq!(detached.header("accept"), Some("image/webp"));
        let value = detached.run("save", None, async { Ok(7) }).await;
        assert!(matches!(value, Ok(7)));
    }
}
