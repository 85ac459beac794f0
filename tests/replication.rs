//! Master/slave replication: a slave pulls, persists, and replays a
//! master's segments while staying read-only to client mutations
//! throughout.

use std::sync::Arc;
use std::time::Duration;

use ferrokv::protocol::Request;
use ferrokv::replication::{Master, Slave, SlaveConfig};
use ferrokv::storage::{Orchestrator, Role};
use ferrokv::store::Engine;
use ferrokv::wal::SegmentFsys;
use tempfile::TempDir;

async fn wait_until<F: Fn() -> bool>(condition: F, timeout: Duration) -> bool {
    let step = Duration::from_millis(20);
    let mut waited = Duration::ZERO;
    while waited < timeout {
        if condition() {
            return true;
        }
        tokio::time::sleep(step).await;
        waited += step;
    }
    condition()
}

/// A slave starting from an empty directory pulls, persists, and replays a
/// master's existing segments; client mutations on the slave are rejected
/// throughout, and replayed keys become visible.
#[tokio::test]
async fn slave_replays_masters_segments_and_stays_read_only() {
    let master_dir = TempDir::new().unwrap();
    let master_fsys = SegmentFsys::new(master_dir.path(), "write_ahead").unwrap();
    master_fsys.write_segment(0, b"SET x 1\n").unwrap();
    master_fsys.write_segment(1, b"DEL x\n").unwrap();
    master_fsys.write_segment(2, b"SET y 3\n").unwrap();

    let master = Arc::new(Master::new(
        SegmentFsys::new(master_dir.path(), "write_ahead").unwrap(),
        1 << 20,
    ));
    let master_addr = "127.0.0.1:17901";
    tokio::spawn(async move {
        master.serve(master_addr).await.unwrap();
    });
    // give the master listener a moment to bind
    tokio::time::sleep(Duration::from_millis(50)).await;

    let slave_dir = TempDir::new().unwrap();
    let slave = Slave::start(SlaveConfig {
        dir: slave_dir.path().to_path_buf(),
        prefix: "write_ahead".to_string(),
        master_addr: master_addr.to_string(),
        interval: Duration::from_millis(50),
        max_message_size: 1 << 20,
        max_batch_bytes: 4096,
    })
    .unwrap();

    let engine = Arc::new(Engine::new(4));
    let orchestrator =
        Orchestrator::new(engine, None, Some(Role::Slave), Some(slave.into_receiver()), None).unwrap();

    // Before anything has replayed: client mutations are rejected.
    let err = orchestrator
        .handle_request(&Request::set("q", "9"))
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "slave node is read-only");

    let persisted = wait_until(
        || {
            SegmentFsys::new(slave_dir.path(), "write_ahead")
                .unwrap()
                .list_segments()
                .unwrap()
                .len()
                >= 3
        },
        Duration::from_secs(3),
    )
    .await;
    assert!(persisted, "slave must persist all three of the master's segments");

    // Give the replay task time to drain the pulled segments, then
    // check the mutations became visible (interval is 50ms; allow margin).
    let mut replayed = false;
    for _ in 0..100 {
        if orchestrator.handle_request(&Request::get("y")).await.unwrap() == "3" {
            replayed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(replayed, "replayed mutations must become visible on the slave");

    assert_eq!(
        orchestrator.handle_request(&Request::get("x")).await.unwrap(),
        "NOT FOUND",
        "the DEL that followed the SET on the master must also have replayed"
    );

    // After replay: client mutations are still rejected, and
    // reads of replayed keys still work.
    let err = orchestrator
        .handle_request(&Request::del("y"))
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "slave node is read-only");
    assert_eq!(
        orchestrator.handle_request(&Request::get("y")).await.unwrap(),
        "3"
    );
}

/// In isolation: a freshly constructed slave orchestrator with
/// nothing replayed yet still rejects mutations and serves reads.
#[tokio::test]
async fn slave_is_read_only_for_client_mutations_before_any_replay() {
    let (_replay_tx, replay_rx) = tokio::sync::mpsc::channel(1);
    let engine = Arc::new(Engine::new(4));
    let orchestrator = Orchestrator::new(engine, None, Some(Role::Slave), Some(replay_rx), None).unwrap();

    let err = orchestrator
        .handle_request(&Request::set("q", "9"))
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "slave node is read-only");

    let err = orchestrator.handle_request(&Request::del("q")).await.unwrap_err();
    assert_eq!(err.to_string(), "slave node is read-only");

    let resp = orchestrator.handle_request(&Request::get("q")).await.unwrap();
    assert_eq!(resp, "NOT FOUND");
}
