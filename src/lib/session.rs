//! Per-connection state shared between the miner-facing transport and the pool core.
use std::collections::HashMap;

use crate::{extranonce::EXTRANONCE_SIZE, utils::Mutex};

/// Fields the core reads and writes on a miner connection.
#[derive(Debug, Clone, Default)]
pub struct Session {
    /// Set on `mining.subscribe`.
    pub extranonce: Option<[u8; EXTRANONCE_SIZE]>,
    /// Current share difficulty, retargeted by vardiff.
    pub difficulty: f64,
    /// Authorized worker names and the password they logged in with.
    pub authorized: HashMap<String, String>,
}

impl Session {
    pub fn is_authorized(&self, worker_name: &str) -> bool {
        self.authorized.contains_key(worker_name)
    }
}

/// A miner connection as seen by the core.
pub trait MinerConnection: Send + Sync {
    fn session(&self) -> &Mutex<Session>;

    /// Queues a `mining.set_difficulty` notification for this connection.
    fn send_set_difficulty(&self, difficulty: f64);
}
