//! Per-request deadline and cancellation.

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::error::{DependencyError, EngineError, SourceError};

/// Deadline and cancellation signal carried through every collaborator call.
#[derive(Debug, Clone)]
pub struct RequestContext {
    deadline: Instant,
    cancel: CancellationToken,
}

impl RequestContext {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Instant::now() + timeout,
            cancel: CancellationToken::new(),
        }
    }

    /// Context bound to a token owned by the caller (e.g. the HTTP layer's
    /// connection-closed signal).
    pub fn with_cancellation(timeout: Duration, cancel: CancellationToken) -> Self {
        Self {
            deadline: Instant::now() + timeout,
            cancel,
        }
    }

    /// A child context with its own deadline of `timeout` from now. It is
    /// cancelled with its parent but does not inherit the parent's deadline.
    pub fn child(&self, timeout: Duration) -> Self {
        Self {
            deadline: Instant::now() + timeout,
            cancel: self.cancel.child_token(),
        }
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// Fail fast if the request was abandoned or its deadline has passed.
    pub fn check(&self, operation: &str) -> Result<(), EngineError> {
        if self.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        if self.is_expired() {
            return Err(DependencyError::Timeout {
                operation: operation.to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Same check, in the collaborator's error vocabulary.
    pub fn check_source(&self) -> Result<(), SourceError> {
        if self.is_cancelled() {
            return Err(SourceError::Cancelled);
        }
        if self.is_expired() {
            return Err(SourceError::Timeout);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_context_passes() {
        let ctx = RequestContext::with_timeout(Duration::from_secs(1));
        assert!(ctx.check("fetch").is_ok());
        assert!(ctx.remaining() > Duration::ZERO);
    }

    #[test]
    fn test_expired_context_times_out() {
        let ctx = RequestContext::with_timeout(Duration::ZERO);
        let err = ctx.check("fetch dives").unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(ctx.check_source(), Err(SourceError::Timeout));
    }

    #[test]
    fn test_cancellation_wins_over_deadline() {
        let ctx = RequestContext::with_timeout(Duration::ZERO);
        ctx.cancel();
        assert_eq!(ctx.check("fetch"), Err(EngineError::Cancelled));
    }

    #[test]
    fn test_child_context_follows_parent_cancel() {
        let parent = RequestContext::with_timeout(Duration::from_secs(1));
        let child = parent.child(Duration::from_secs(5));
        assert!(child.deadline() > parent.deadline());
        assert!(!child.is_cancelled());

        parent.cancel();
        assert!(child.is_cancelled());
    }
}
