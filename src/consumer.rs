//! Consumer callbacks for fulfilled proof requests.
use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tracing::debug;

use crate::oracle::Notification;

/// Implemented by whoever registered a request and wants to hear about it.
///
/// Whatever happens in here stays in here: an error, a panic or running
/// past the budget is logged at debug and otherwise ignored.
#[async_trait]
pub trait ProofConsumer: Send + Sync {
    /// A transaction matching request `notification.id` was proven.
    async fn notify(&self, notification: &Notification) -> anyhow::Result<()>;
}

/// How a callback ended. Informational only; never turned into an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallbackOutcome {
    /// `notify` returned `Ok`.
    Delivered,
    /// `notify` returned an error.
    Failed,
    /// `notify` panicked.
    Panicked,
    /// `notify` was aborted after the budget ran out.
    TimedOut,
    /// No consumer is registered under the request's consumer identity.
    NoConsumer,
}

/// Run `consumer` on its own task with a hard `budget`.
pub async fn call_callback(
    consumer: Arc<dyn ProofConsumer>,
    notification: Notification,
    budget: Duration,
) -> CallbackOutcome {
    let id = notification.id;
    let mut task = tokio::spawn(async move { consumer.notify(&notification).await });

    match tokio::time::timeout(budget, &mut task).await {
        Ok(Ok(Ok(()))) => {
            debug!(%id, "consumer notified");
            CallbackOutcome::Delivered
        }
        Ok(Ok(Err(e))) => {
            debug!(%id, error = %e, "consumer callback failed");
            CallbackOutcome::Failed
        }
        Ok(Err(e)) => {
            debug!(%id, error = %e, "consumer callback panicked");
            CallbackOutcome::Panicked
        }
        Err(_) => {
            task.abort();
            debug!(%id, ?budget, "consumer callback ran out of budget");
            CallbackOutcome::TimedOut
        }
    }
}
