//! ## Status Reporting System
//!
//! Lets long-running tasks of the pool report why they stopped to the main runtime loop.
//!
//! Each task wraps its report in a [`Status`] and sends it over an async channel, tagged with a
//! [`StatusSender`] variant that identifies the source subsystem.

use tracing::{debug, error, warn};

use crate::error::PoolError;

/// Identifies the component that originated a [`Status`] update.
#[derive(Debug, Clone)]
pub enum StatusSender {
    /// The upstream UCP connection loop.
    Upstream(async_channel::Sender<Status>),
    /// The task feeding upstream jobs into the registry.
    TemplateIntake(async_channel::Sender<Status>),
    /// The task reacting to registry events.
    RegistryEvents(async_channel::Sender<Status>),
}

impl StatusSender {
    /// Sends a [`Status`] update.
    pub async fn send(&self, status: Status) -> Result<(), async_channel::SendError<Status>> {
        match self {
            Self::Upstream(tx) => {
                debug!("Sending status from Upstream: {:?}", status.state);
                tx.send(status).await
            }
            Self::TemplateIntake(tx) => {
                debug!("Sending status from TemplateIntake: {:?}", status.state);
                tx.send(status).await
            }
            Self::RegistryEvents(tx) => {
                debug!("Sending status from RegistryEvents: {:?}", status.state);
                tx.send(status).await
            }
        }
    }
}

/// The component that stopped and why.
#[derive(Debug)]
pub enum State {
    UpstreamShutdown(PoolError),
    TemplateIntakeShutdown(PoolError),
    RegistryEventsShutdown(PoolError),
}

/// A message reporting the current [`State`] of a component.
#[derive(Debug)]
pub struct Status {
    pub state: State,
}

/// Logs `e` and reports the shutdown of the component behind `sender`.
pub async fn handle_error(sender: &StatusSender, e: PoolError) {
    let state = match sender {
        StatusSender::Upstream(_) => {
            warn!("Upstream shutting down due to error: {e:?}");
            State::UpstreamShutdown(e)
        }
        StatusSender::TemplateIntake(_) => {
            warn!("TemplateIntake shutting down due to error: {e:?}");
            State::TemplateIntakeShutdown(e)
        }
        StatusSender::RegistryEvents(_) => {
            warn!("RegistryEvents shutting down due to error: {e:?}");
            State::RegistryEventsShutdown(e)
        }
    };

    if let Err(e) = sender.send(Status { state }).await {
        error!("Failed to send status update from {sender:?}: {e:?}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_handle_error_tags_the_source() {
        let (tx, rx) = async_channel::unbounded();
        handle_error(&StatusSender::TemplateIntake(tx), PoolError::ChannelErrorSender).await;
        let status = rx.recv().await.unwrap();
        assert!(matches!(
            status.state,
            State::TemplateIntakeShutdown(PoolError::ChannelErrorSender)
        ));
    }
}
