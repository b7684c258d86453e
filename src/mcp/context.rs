//! Per-request context carried into every method handler.

use std::{future::Future, sync::Arc, time::Duration};

use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use crate::domain::model::AuthenticatedUser;
use crate::errors::ServiceError;

#[derive(Debug, Clone)]
pub struct RequestContext {
    pub correlation_id: Arc<str>,
    pub user: Option<AuthenticatedUser>,
    cancellation: CancellationToken,
    deadline: Option<Instant>,
}

impl RequestContext {
    pub fn new(
        correlation_id: impl Into<Arc<str>>,
        user: Option<AuthenticatedUser>,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            user,
            cancellation,
            deadline: None,
        }
    }

    /// Narrows the deadline. An earlier deadline already in place wins.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        self.deadline = Some(self.deadline.map_or(candidate, |current| current.min(candidate)));
        self
    }

    /// Derived context whose cancellation does not propagate to the parent.
    pub fn child_with_timeout(&self, timeout: Duration) -> Self {
        Self {
            correlation_id: Arc::clone(&self.correlation_id),
            user: self.user.clone(),
            cancellation: self.cancellation.child_token(),
            deadline: self.deadline,
        }
        .with_timeout(timeout)
    }

    pub fn user_id(&self) -> Option<String> {
        self.user.as_ref().map(|user| user.id.to_string())
    }

    pub fn require_user(&self) -> Result<&AuthenticatedUser, ServiceError> {
        self.user
            .as_ref()
            .ok_or(ServiceError::Unauthorized("authentication required"))
    }

    /// The caller, provided their role may modify planning entities.
    pub fn require_editor(&self) -> Result<&AuthenticatedUser, ServiceError> {
        let user = self.require_user()?;
        user.require_editor()?;
        Ok(user)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Drives `work` until it completes, the request is canceled or the
    /// deadline passes.
    pub async fn run<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: From<ServiceError>,
    {
        let deadline = async {
            match self.deadline {
                Some(deadline) => sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancellation.cancelled() => Err(ServiceError::Canceled.into()),
            _ = deadline => Err(ServiceError::Timeout.into()),
            result = work => result,
        }
    }
}
