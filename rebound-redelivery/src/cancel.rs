//! Cancellation of in-flight redelivery loops.
//!
//! A [`CancelHandle`] is held by whoever may want to stop an exchange; the
//! loop observes it through a [`CancelToken`]. Tokens can be merged so that
//! one loop watches both its own handle and engine-wide shutdown.

use std::sync::Arc;

use futures_util::future::{self, BoxFuture, FutureExt};
use tokio::sync::watch;

/// Requests cancellation of every token derived from it
#[derive(Debug, Clone)]
pub struct CancelHandle {
    sender: Arc<watch::Sender<bool>>,
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelHandle {
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Cancel; idempotent
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }

    #[must_use]
    pub fn token(&self) -> CancelToken {
        CancelToken {
            receivers: vec![self.sender.subscribe()],
        }
    }
}

/// Observes one or more [`CancelHandle`]s
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    receivers: Vec<watch::Receiver<bool>>,
}

impl CancelToken {
    /// A token that is never cancelled
    #[must_use]
    pub fn never() -> Self {
        Self::default()
    }

    pub(crate) fn from_receiver(receiver: watch::Receiver<bool>) -> Self {
        Self {
            receivers: vec![receiver],
        }
    }

    /// A token cancelled when either `self` or `other` is
    #[must_use]
    pub fn merge(mut self, other: Self) -> Self {
        self.receivers.extend(other.receivers);
        self
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.receivers.iter().any(|receiver| *receiver.borrow())
    }

    /// Resolves once any source is cancelled.
    ///
    /// A source whose handle was dropped without cancelling can no longer
    /// cancel, so it never resolves.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }

        let waits = self
            .receivers
            .iter()
            .map(|receiver| {
                let mut receiver = receiver.clone();
                async move {
                    let closed = receiver.wait_for(|cancelled| *cancelled).await.is_err();
                    if closed {
                        future::pending::<()>().await;
                    }
                }
                .boxed()
            })
            .collect::<Vec<BoxFuture<'static, ()>>>();

        if waits.is_empty() {
            future::pending::<()>().await;
        }

        let _ = future::select_all(waits).await;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn never_is_never_cancelled() {
        assert!(!CancelToken::never().is_cancelled());
    }

    #[test]
    fn cancel_is_visible_to_tokens() {
        let handle = CancelHandle::new();
        let token = handle.token();
        assert!(!token.is_cancelled());

        handle.cancel();
        handle.cancel();
        assert!(handle.is_cancelled());
        assert!(token.is_cancelled());
        assert!(handle.token().is_cancelled());
    }

    #[tokio::test]
    async fn merged_token_wakes_on_either_source() {
        let first = CancelHandle::new();
        let second = CancelHandle::new();
        let token = first.token().merge(second.token());

        let waiter = tokio::spawn(async move { token.cancelled().await });
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        second.cancel();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn dropped_handle_never_fires() {
        let handle = CancelHandle::new();
        let token = handle.token();
        drop(handle);

        let result = tokio::time::timeout(Duration::from_millis(20), token.cancelled()).await;
        assert!(result.is_err());
    }
}
