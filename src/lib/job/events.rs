//! Notifications emitted by the [`JobRegistry`](super::JobRegistry) when templates arrive.
use tracing::warn;

use super::template::MiningNotify;

/// Collaborators told about registry changes.
///
/// On a new block the registry calls, in order, [`Self::on_network_difficulty`],
/// [`Self::on_new_block`] and [`Self::on_template`]. Other templates only trigger
/// [`Self::on_template`]. Calls happen after the template is reachable through
/// [`JobRegistry::get_job`](super::JobRegistry::get_job).
pub trait RegistryHooks: Send + Sync {
    fn on_network_difficulty(&self, difficulty: f64);
    fn on_new_block(&self, prev_hash: &str);
    /// `notify.clean_jobs` equals `is_new_block`.
    fn on_template(&self, is_new_block: bool, notify: &MiningNotify);
}

/// Owned form of the [`RegistryHooks`] calls, for handling them on another task.
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryEvent {
    NetworkDifficulty(f64),
    NewBlock(String),
    Template {
        is_new_block: bool,
        notify: MiningNotify,
    },
}

impl RegistryHooks for async_channel::Sender<RegistryEvent> {
    fn on_network_difficulty(&self, difficulty: f64) {
        forward(self, RegistryEvent::NetworkDifficulty(difficulty));
    }

    fn on_new_block(&self, prev_hash: &str) {
        forward(self, RegistryEvent::NewBlock(prev_hash.to_string()));
    }

    fn on_template(&self, is_new_block: bool, notify: &MiningNotify) {
        forward(
            self,
            RegistryEvent::Template {
                is_new_block,
                notify: notify.clone(),
            },
        );
    }
}

fn forward(tx: &async_channel::Sender<RegistryEvent>, event: RegistryEvent) {
    if let Err(e) = tx.try_send(event) {
        warn!("Dropping registry event, receiver unavailable: {e}");
    }
}
