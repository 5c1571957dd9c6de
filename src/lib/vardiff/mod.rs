//! ## Variable Difficulty
//!
//! Retargets each worker's share difficulty so it submits roughly one share every
//! `target_time` seconds.
//!
//! The controller is fed the timestamp of every accepted share. Intervals between shares go into a
//! per-worker [`SpeedBuffer`]. At most once per `retarget_time` the average interval is compared
//! with the tolerated band around `target_time` and the difficulty moves towards it, bounded by
//! `min_difficulty` below and by the lower of `max_difficulty` and the network difficulty above.
pub mod speed_buffer;

use std::{collections::HashMap, sync::Arc};

use tracing::{debug, info, warn};

pub use speed_buffer::SpeedBuffer;

use crate::{config::VardiffConfig, session::MinerConnection, utils::Mutex};

/// Workers silent for this many retarget windows lose their statistics.
pub const IDLE_RETARGET_WINDOWS: u64 = 4;

#[derive(Debug)]
struct WorkerStats {
    last_retarget: u64,
    last_share: u64,
    buffer: SpeedBuffer,
}

#[derive(Debug)]
pub struct VarDiffController {
    config: VardiffConfig,
    /// Average intervals above this mean the difficulty is too high.
    tmax: f64,
    /// Average intervals below this mean the difficulty is too low.
    tmin: f64,
    workers: Mutex<HashMap<String, Arc<Mutex<WorkerStats>>>>,
    network_difficulty: Mutex<f64>,
}

impl VarDiffController {
    pub fn new(config: VardiffConfig) -> Self {
        let target = config.target_time as f64;
        let variance = target * config.variance_percent / 100.0;
        let network_difficulty = config.max_difficulty;
        Self {
            tmax: target + variance,
            tmin: target - variance,
            config,
            workers: Mutex::new(HashMap::new()),
            network_difficulty: Mutex::new(network_difficulty),
        }
    }

    /// Lowers or raises the retarget ceiling. Difficulties already assigned are left alone.
    pub fn update_network_difficulty(&self, difficulty: f64) {
        debug!("Vardiff ceiling follows network difficulty {difficulty}");
        self.network_difficulty.super_safe_lock(|d| *d = difficulty);
    }

    fn ceiling(&self) -> f64 {
        let network = self.network_difficulty.super_safe_lock(|d| *d);
        self.config.max_difficulty.min(network)
    }

    /// Records an accepted share of `worker_name` at unix time `timestamp`.
    ///
    /// When a retarget changes the difficulty, the new value is stored in the connection's
    /// session, announced with `mining.set_difficulty` and returned.
    pub fn submit(
        &self,
        connection: &dyn MinerConnection,
        worker_name: &str,
        timestamp: u64,
        current_difficulty: f64,
    ) -> Option<f64> {
        let retarget_time = self.config.retarget_time;
        let stats = self.workers.super_safe_lock(|workers| {
            if workers.contains_key(worker_name) {
                return workers.get(worker_name).cloned();
            }
            workers.insert(
                worker_name.to_string(),
                Arc::new(Mutex::new(WorkerStats {
                    last_retarget: timestamp.saturating_sub(retarget_time / 2),
                    last_share: timestamp,
                    buffer: SpeedBuffer::new(self.config.buffer_size()),
                })),
            );
            None
        })?;

        stats.super_safe_lock(|stats| {
            stats
                .buffer
                .append(timestamp.saturating_sub(stats.last_share));
            stats.last_share = timestamp;

            if timestamp.saturating_sub(stats.last_retarget) < retarget_time
                && stats.buffer.size() > 0
            {
                return None;
            }

            stats.last_retarget = timestamp;
            let mut avg = stats.buffer.average();
            debug!(
                "Checking retarget for {worker_name} ({current_difficulty}) avg. {avg} target {}",
                self.config.target_time
            );
            if avg < 1.0 {
                warn!("Average share interval of {worker_name} below one second, using 1");
                avg = 1.0;
            }

            let new_difficulty = self.retarget(current_difficulty, avg)?;
            if new_difficulty == current_difficulty {
                return None;
            }
            info!("Retarget for {worker_name} old: {current_difficulty} new: {new_difficulty}");

            stats.buffer.clear();
            connection
                .session()
                .super_safe_lock(|session| session.difficulty = new_difficulty);
            connection.send_set_difficulty(new_difficulty);
            Some(new_difficulty)
        })
    }

    /// New difficulty for an average share interval of `avg` seconds, `None` when inside the band.
    fn retarget(&self, current: f64, avg: f64) -> Option<f64> {
        let floor = self.config.min_difficulty;
        if avg > self.tmax {
            if self.config.multiplicative {
                let halved = current * 0.5;
                return Some(if halved < floor { floor } else { halved });
            }
            let delta = self.delta(current, avg).min(-self.config.min_change);
            return Some(if current + delta < floor {
                floor
            } else {
                current + delta
            });
        }
        if avg < self.tmin {
            let ceiling = self.ceiling();
            if self.config.multiplicative {
                let doubled = current * 2.0;
                return Some(if doubled > ceiling { ceiling } else { doubled });
            }
            let delta = self.delta(current, avg).max(self.config.min_change);
            return Some(if current + delta > ceiling {
                ceiling
            } else {
                current + delta
            });
        }
        None
    }

    fn delta(&self, current: f64, avg: f64) -> f64 {
        let delta = current * (self.config.target_time as f64 / avg) - current;
        if self.config.float_deltas {
            delta
        } else {
            delta.trunc()
        }
    }

    /// Drops the statistics of a worker that went away.
    pub fn forget_worker(&self, worker_name: &str) {
        if self
            .workers
            .super_safe_lock(|workers| workers.remove(worker_name))
            .is_some()
        {
            debug!("Vardiff stopped tracking {worker_name}");
        }
    }

    /// Drops every worker without a share in the last [`IDLE_RETARGET_WINDOWS`] retarget windows
    /// before `now`. Returns how many were dropped.
    pub fn prune_idle(&self, now: u64) -> usize {
        let idle_after = self.config.retarget_time * IDLE_RETARGET_WINDOWS;
        let pruned = self.workers.super_safe_lock(|workers| {
            let before = workers.len();
            workers.retain(|_, stats| {
                let last_share = stats.super_safe_lock(|stats| stats.last_share);
                now.saturating_sub(last_share) <= idle_after
            });
            before - workers.len()
        });
        if pruned > 0 {
            info!("Vardiff dropped {pruned} idle workers");
        }
        pruned
    }

    /// Number of workers with retarget statistics.
    pub fn tracked_workers(&self) -> usize {
        self.workers.super_safe_lock(|workers| workers.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::test_utils::RecordingConnection;

    fn config(multiplicative: bool) -> VardiffConfig {
        VardiffConfig {
            target_time: 15,
            retarget_time: 90,
            variance_percent: 30.0,
            min_difficulty: 1.0,
            max_difficulty: 1e12,
            min_change: 1.0,
            multiplicative,
            float_deltas: false,
        }
    }

    /// Feeds shares `interval` seconds apart, following any retarget, and returns every change.
    fn feed(
        controller: &VarDiffController,
        connection: &RecordingConnection,
        start: u64,
        interval: u64,
        shares: usize,
    ) -> Vec<(u64, f64)> {
        let mut changes = Vec::new();
        for n in 0..shares as u64 {
            let ts = start + n * interval;
            if let Some(new) = controller.submit(connection, "w1", ts, connection.difficulty()) {
                changes.push((ts, new));
            }
        }
        changes
    }

    #[test]
    fn test_first_share_only_registers_worker() {
        let controller = VarDiffController::new(config(true));
        let connection = RecordingConnection::with_difficulty(1000.0);
        assert_eq!(controller.submit(&connection, "w1", 1_000, 1000.0), None);
        assert!(connection.sent().is_empty());
    }

    #[test]
    fn test_steady_rate_never_retargets() {
        for multiplicative in [true, false] {
            let controller = VarDiffController::new(config(multiplicative));
            let connection = RecordingConnection::with_difficulty(1000.0);
            assert!(feed(&controller, &connection, 1_000, 15, 100).is_empty());
            assert_eq!(connection.difficulty(), 1000.0);
        }
    }

    #[test]
    fn test_fast_worker_is_doubled_at_retarget_boundary() {
        let controller = VarDiffController::new(config(true));
        let connection = RecordingConnection::with_difficulty(1000.0);
        let changes = feed(&controller, &connection, 1_000, 1, 60);
        // Retarget window starts half a window before the first share.
        assert_eq!(changes[0], (1_045, 2000.0));
        assert_eq!(connection.sent()[0], 2000.0);
        for pair in changes.windows(2) {
            assert_eq!(pair[1].1, pair[0].1 * 2.0);
        }
    }

    #[test]
    fn test_slow_worker_is_halved() {
        let controller = VarDiffController::new(config(true));
        let connection = RecordingConnection::with_difficulty(1000.0);
        let changes = feed(&controller, &connection, 1_000, 150, 4);
        assert_eq!(
            changes.iter().map(|c| c.1).collect::<Vec<_>>(),
            vec![500.0, 250.0, 125.0]
        );
        assert_eq!(connection.difficulty(), 125.0);
    }

    #[test]
    fn test_multiplicative_clamps_to_floor_and_ceiling() {
        let mut cfg = config(true);
        cfg.min_difficulty = 800.0;
        let controller = VarDiffController::new(cfg);
        let connection = RecordingConnection::with_difficulty(1000.0);
        let changes = feed(&controller, &connection, 1_000, 150, 2);
        assert_eq!(changes, vec![(1_150, 800.0)]);

        let controller = VarDiffController::new(config(true));
        controller.update_network_difficulty(1500.0);
        let connection = RecordingConnection::with_difficulty(1000.0);
        let changes = feed(&controller, &connection, 1_000, 1, 200);
        assert_eq!(changes[0].1, 1500.0);
        assert!(changes.iter().all(|c| c.1 == 1500.0));
        assert_eq!(changes.len(), 1);
    }

    #[test]
    fn test_additive_moves_by_truncated_delta() {
        let controller = VarDiffController::new(config(false));
        let connection = RecordingConnection::with_difficulty(1000.0);
        let changes = feed(&controller, &connection, 1_000, 7, 8);
        // 1000 * 15 / 7 - 1000 = 1142.86
        assert_eq!(changes[0].1, 2142.0);
    }

    #[test]
    fn test_additive_float_deltas_keep_fraction() {
        let mut cfg = config(false);
        cfg.float_deltas = true;
        let controller = VarDiffController::new(cfg);
        let connection = RecordingConnection::with_difficulty(1000.0);
        let changes = feed(&controller, &connection, 1_000, 7, 8);
        assert!((changes[0].1 - 2142.857).abs() < 0.001);
    }

    #[test]
    fn test_additive_stays_within_bounds() {
        let mut cfg = config(false);
        cfg.min_difficulty = 500.0;
        cfg.max_difficulty = 5000.0;
        let controller = VarDiffController::new(cfg);

        let slow = RecordingConnection::with_difficulty(1000.0);
        let changes = feed(&controller, &slow, 1_000, 150, 2);
        assert_eq!(changes, vec![(1_150, 500.0)]);

        let fast = RecordingConnection::default();
        fast.session.super_safe_lock(|s| s.difficulty = 1000.0);
        for n in 0..100u64 {
            if let Some(new) = controller.submit(&fast, "w2", 5_000 + n, fast.difficulty()) {
                assert!((500.0..=5000.0).contains(&new));
            }
        }
        assert_eq!(fast.difficulty(), 5000.0);
    }

    #[test]
    fn test_network_difficulty_update_keeps_assigned_difficulty() {
        let controller = VarDiffController::new(config(true));
        let connection = RecordingConnection::with_difficulty(4000.0);
        controller.submit(&connection, "w1", 1_000, 4000.0);
        controller.update_network_difficulty(100.0);
        assert_eq!(connection.difficulty(), 4000.0);
        assert!(connection.sent().is_empty());
    }

    #[test]
    fn test_workers_are_tracked_independently() {
        let controller = VarDiffController::new(config(true));
        let connection = RecordingConnection::with_difficulty(1000.0);
        assert_eq!(controller.submit(&connection, "a", 1_000, 1000.0), None);
        assert_eq!(controller.submit(&connection, "b", 1_150, 1000.0), None);
        assert_eq!(controller.submit(&connection, "a", 1_150, 1000.0), Some(500.0));
        controller.forget_worker("a");
        assert_eq!(controller.submit(&connection, "a", 1_300, 500.0), None);
    }

    #[test]
    fn test_forgotten_workers_release_their_records() {
        let controller = VarDiffController::new(config(true));
        let connection = RecordingConnection::with_difficulty(1000.0);
        for n in 0..10_000u64 {
            controller.submit(&connection, &format!("rig{n}"), 1_000 + n, 1000.0);
        }
        assert_eq!(controller.tracked_workers(), 10_000);
        for n in 0..10_000u64 {
            controller.forget_worker(&format!("rig{n}"));
        }
        assert_eq!(controller.tracked_workers(), 0);
    }

    #[test]
    fn test_prune_idle_keeps_recent_workers() {
        let controller = VarDiffController::new(config(true));
        let connection = RecordingConnection::with_difficulty(1000.0);
        // Idle limit is 4 * 90 seconds.
        controller.submit(&connection, "gone", 1_000, 1000.0);
        controller.submit(&connection, "edge", 1_040, 1000.0);
        controller.submit(&connection, "active", 1_300, 1000.0);

        assert_eq!(controller.prune_idle(1_360), 0);
        assert_eq!(controller.prune_idle(1_400), 1);
        assert_eq!(controller.tracked_workers(), 2);
        assert_eq!(controller.prune_idle(1_401), 1);
        assert_eq!(controller.tracked_workers(), 1);

        // A pruned worker starts over on its next share.
        assert_eq!(controller.submit(&connection, "gone", 1_402, 1000.0), None);
        assert_eq!(controller.tracked_workers(), 2);
    }
}
