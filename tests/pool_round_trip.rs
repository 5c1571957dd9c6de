use std::{
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use futures::StreamExt;
use serde_json::{json, Value};
use tokio::{
    io::AsyncWriteExt,
    net::{tcp::OwnedWriteHalf, TcpListener},
};
use tokio_util::codec::{FramedRead, LinesCodec};
use ucp_pool::{
    config::{PoolConfig, UpstreamConfig, VardiffConfig},
    pow::{PowAlgorithm, PowHasher},
    service::{AllowAllWorkers, ShareObserver},
    session::{MinerConnection, Session},
    target::POW_HASH_SIZE,
    ucp::ConnectionState,
    utils::{Mutex, ShutdownMessage, SystemClock},
    PoolParts, UcpPool,
};

/// Every header hashes to zero, so every share is a block candidate.
struct ZeroPow;

impl PowHasher for ZeroPow {
    fn hash(&self, _header: &[u8]) -> [u8; POW_HASH_SIZE] {
        [0; POW_HASH_SIZE]
    }
}

#[derive(Default)]
struct BlockObserver {
    blocks: Mutex<Vec<Option<bool>>>,
    accepted_shares: Mutex<usize>,
}

impl ShareObserver for BlockObserver {
    fn on_network_block(&self, _prev_hash: &str) {}

    fn on_submit_share(
        &self,
        _worker_name: &str,
        _header_hex: Option<&str>,
        _hash_hex: Option<&str>,
        _difficulty: f64,
        _timestamp: u64,
        accepted: bool,
    ) {
        if accepted {
            self.accepted_shares.super_safe_lock(|n| *n += 1);
        }
    }

    fn on_submit_block(
        &self,
        accepted: Option<bool>,
        _worker_name: &str,
        _header_hex: &str,
        _hash_hex: &str,
        _timestamp: u64,
    ) {
        self.blocks.super_safe_lock(|b| b.push(accepted));
    }
}

#[derive(Default)]
struct TestConnection {
    session: Mutex<Session>,
}

impl MinerConnection for TestConnection {
    fn session(&self) -> &Mutex<Session> {
        &self.session
    }

    fn send_set_difficulty(&self, _difficulty: f64) {}
}

fn typed(kind: &str, data: Value) -> Value {
    json!({"type": kind, "data": data})
}

fn mining_job(job_id: u64, timestamp: u32) -> Value {
    json!({
        "command": "MINING_JOB",
        "request_id": typed("REQUEST_ID", json!(99)),
        "job_id": typed("JOB_ID", json!(job_id)),
        "block_index": typed("BLOCK_INDEX", json!(1_234_567)),
        "block_version": typed("BLOCK_VERSION", json!(2)),
        "previous_block_hash": typed("BLOCK_HASH", json!("0000000000000000a1b2c3d4e5f60718293a4b5c6d7e8f90")),
        "second_previous_block_hash": typed("BLOCK_HASH", json!("00000000000000001111111111111111aaaaaaaaaaaaaaaa")),
        "third_previous_block_hash": typed("BLOCK_HASH", json!("00000000000000002222222222222222bbbbbbbbbbbbbbbb")),
        "merkle_root": typed("MERKLE_ROOT", json!("33".repeat(16))),
        "pop_transaction_merkle_root": typed("MERKLE_ROOT", json!("44".repeat(32))),
        "normal_transaction_merkle_root": typed("MERKLE_ROOT", json!("55".repeat(32))),
        "intermediate_metapackage_hash": typed("INTERMEDIATE_METAPACKAGE_HASH", json!("66".repeat(32))),
        "difficulty": typed("DIFFICULTY", json!("0500ffff")),
        "timestamp": typed("TIMESTAMP", json!(timestamp)),
    })
}

async fn write_json(writer: &mut OwnedWriteHalf, value: Value) {
    writer
        .write_all(format!("{value}\n").as_bytes())
        .await
        .unwrap();
}

#[tokio::test]
async fn share_becomes_block_submission_and_gets_confirmed() {
    let node = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = node.local_addr().unwrap().port();

    let mut upstream = UpstreamConfig::new("127.0.0.1".into(), port, "VWallet".into());
    upstream.reconnect_min_delay_ms = 10;
    upstream.reconnect_max_delay_ms = 100;
    let vardiff = VardiffConfig {
        target_time: 15,
        retarget_time: 90,
        variance_percent: 30.0,
        min_difficulty: 1.0,
        max_difficulty: 1e12,
        min_change: 1.0,
        multiplicative: true,
        float_deltas: false,
    };
    let config = PoolConfig::new(5, 64.0, PowAlgorithm::Blake3, upstream, vardiff);

    let observer = Arc::new(BlockObserver::default());
    let pool = UcpPool::new(
        config,
        PoolParts {
            hasher: Arc::new(ZeroPow),
            authorizer: Arc::new(AllowAllWorkers),
            observer: observer.clone(),
            clock: Arc::new(SystemClock),
        },
    )
    .unwrap();
    let service = pool.service();
    let upstream_handle = pool.upstream();
    let mut notify_rx = pool.subscribe_notify();
    let shutdown = pool.shutdown_sender();
    let pool_task = tokio::spawn(pool.start());

    // Node side handshake.
    let (stream, _) = node.accept().await.unwrap();
    let (reader, mut writer) = stream.into_split();
    let mut lines = FramedRead::new(reader, LinesCodec::new());

    let auth: Value = serde_json::from_str(&lines.next().await.unwrap().unwrap()).unwrap();
    assert_eq!(auth["command"], "MINING_AUTH");
    write_json(
        &mut writer,
        json!({"command": "MINING_AUTH_SUCCESS", "request_id": auth["request_id"].clone()}),
    )
    .await;
    let subscribe: Value = serde_json::from_str(&lines.next().await.unwrap().unwrap()).unwrap();
    assert_eq!(subscribe["command"], "MINING_SUBSCRIBE");

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs() as u32;
    write_json(&mut writer, mining_job(4242, now)).await;

    // The job reaches miners only once it is registered.
    let notify = tokio::time::timeout(Duration::from_secs(5), notify_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(notify.job_id, "1");
    assert!(notify.clean_jobs);
    assert_eq!(notify.prev_hash, "e5f60718293a4b5c6d7e8f90");
    assert_eq!(notify.to_params().as_array().unwrap().len(), 10);
    assert_eq!(upstream_handle.state(), ConnectionState::Ready);

    // Miner side.
    let connection = TestConnection::default();
    let (extranonce, size) = service.subscribe(&connection);
    assert_eq!(size, 8);
    assert!(service.authorize(&connection, "miner.rig", "x"));
    assert_eq!(
        service.notify_args_for_new_subscriber().unwrap().job_id,
        "1"
    );
    service
        .submit(
            &connection,
            "miner.rig",
            &notify.job_id,
            &extranonce,
            &format!("{now:08x}"),
            "0000002a",
        )
        .unwrap();

    // The block candidate is relayed to the node.
    let submit: Value = serde_json::from_str(&lines.next().await.unwrap().unwrap()).unwrap();
    assert_eq!(submit["command"], "MINING_SUBMIT");
    assert_eq!(submit["job_id"], json!({"type": "JOB_ID", "data": 4242}));
    assert_eq!(submit["nTime"]["data"], json!(now));
    assert_eq!(submit["nonce"]["data"], json!(42));
    assert_eq!(
        submit["extra_nonce"]["data"],
        json!(u64::from_str_radix(&extranonce, 16).unwrap())
    );
    write_json(
        &mut writer,
        json!({"command": "MINING_SUBMIT_SUCCESS", "request_id": submit["request_id"].clone()}),
    )
    .await;

    tokio::time::timeout(Duration::from_secs(5), async {
        while observer.blocks.super_safe_lock(|b| b.is_empty()) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(observer.blocks.super_safe_lock(|b| b.clone()), vec![Some(true)]);
    assert_eq!(observer.accepted_shares.super_safe_lock(|n| *n), 1);

    // Resubmitting the same solution is a duplicate.
    let duplicate = service.submit(
        &connection,
        "miner.rig",
        &notify.job_id,
        &extranonce,
        &format!("{now:08x}"),
        "0000002a",
    );
    assert_eq!(duplicate.unwrap_err().to_string(), "Duplicate share");

    shutdown.send(ShutdownMessage::ShutdownAll).unwrap();
    tokio::time::timeout(Duration::from_secs(10), pool_task)
        .await
        .unwrap()
        .unwrap();
}
