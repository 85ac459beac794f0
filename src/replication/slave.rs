//! Slave side of replication: pulls segments from a master on a timer,
//! persists them locally, and publishes their parsed mutations for replay.
//!
//! Reconnects to the master with capped exponential backoff on I/O
//! failure rather than dialing once and giving up.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{interval, sleep};
use tracing::{debug, error, warn};

use crate::metrics::Metrics;
use crate::wal::{Batch, SegmentFsys};

use super::protocol::{read_message, write_message, Request, Response, ResponseStatus};

const MAX_RECONNECT_BACKOFF: Duration = Duration::from_secs(30);
const INITIAL_RECONNECT_BACKOFF: Duration = Duration::from_millis(200);

#[derive(Debug, Clone)]
pub struct SlaveConfig {
    pub dir: PathBuf,
    pub prefix: String,
    pub master_addr: String,
    pub interval: Duration,
    pub max_message_size: usize,
    pub max_batch_bytes: usize,
}

/// Runs the slave's pull/persist loop as a background task and exposes a
/// channel of recovered batches for the orchestrator to replay.
pub struct Slave {
    replay_rx: mpsc::Receiver<Batch>,
    _task: tokio::task::JoinHandle<()>,
}

impl Slave {
    pub fn start(config: SlaveConfig) -> Result<Self, crate::wal::SegmentFsError> {
        Self::start_with_metrics(config, None)
    }

    /// Like [`Slave::start`], but reports pull attempts and failures to
    /// `metrics`.
    pub fn start_with_metrics(
        config: SlaveConfig,
        metrics: Option<Arc<Metrics>>,
    ) -> Result<Self, crate::wal::SegmentFsError> {
        let fsys = SegmentFsys::new(&config.dir, &config.prefix)?;
        let last_file_name = fsys.last_segment_name()?.unwrap_or_default();

        let (replay_tx, replay_rx) = mpsc::channel(16);
        let task = tokio::spawn(Self::run(config, fsys, last_file_name, replay_tx, metrics));

        Ok(Self {
            replay_rx,
            _task: task,
        })
    }

    /// Receive the next batch of replayed mutations; `None` once the
    /// background task has stopped.
    pub async fn recv(&mut self) -> Option<Batch> {
        self.replay_rx.recv().await
    }

    /// Hand the replay channel to a consumer (the storage orchestrator),
    /// leaving the pull/persist task running in the background.
    pub fn into_receiver(self) -> mpsc::Receiver<Batch> {
        self.replay_rx
    }

    async fn run(
        config: SlaveConfig,
        fsys: SegmentFsys,
        mut last_file_name: String,
        replay_tx: mpsc::Sender<Batch>,
        metrics: Option<Arc<Metrics>>,
    ) {
        let mut ticker = interval(config.interval);
        let mut stream: Option<TcpStream> = None;
        let mut backoff = INITIAL_RECONNECT_BACKOFF;

        loop {
            ticker.tick().await;

            if stream.is_none() {
                match TcpStream::connect(&config.master_addr).await {
                    Ok(s) => {
                        debug!("connected to replication master at {}", config.master_addr);
                        stream = Some(s);
                        backoff = INITIAL_RECONNECT_BACKOFF;
                    }
                    Err(e) => {
                        warn!("could not reach replication master: {e}; retrying in {backoff:?}");
                        if let Some(m) = &metrics {
                            m.replication_pull_errors_total.inc();
                        }
                        sleep(backoff).await;
                        backoff = (backoff * 2).min(MAX_RECONNECT_BACKOFF);
                        continue;
                    }
                }
            }

            let req = if last_file_name.is_empty() {
                Request::read_all()
            } else {
                Request::read_last(last_file_name.clone())
            };

            if let Some(m) = &metrics {
                m.replication_pulls_total.inc();
            }

            match Self::pull(stream.as_mut().unwrap(), &req, config.max_message_size).await {
                Ok(resp) => {
                    if Self::has_new_files(&resp, &mut last_file_name) {
                        if let Err(e) = Self::write_to_disk(&fsys, &resp) {
                            error!("could not persist pulled segments: {e}");
                        }
                        Self::send_to_storage(&resp, config.max_batch_bytes, &replay_tx).await;
                    }
                }
                Err(e) => {
                    warn!("replication pull failed, will reconnect: {e}");
                    if let Some(m) = &metrics {
                        m.replication_pull_errors_total.inc();
                    }
                    stream = None;
                }
            }
        }
    }

    async fn pull(
        stream: &mut TcpStream,
        req: &Request,
        max_message_size: usize,
    ) -> Result<Response, String> {
        let encoded = serde_json::to_vec(req).map_err(|e| e.to_string())?;
        write_message(stream, &encoded)
            .await
            .map_err(|e| e.to_string())?;
        let raw = read_message(stream, max_message_size)
            .await
            .map_err(|e| e.to_string())?;
        serde_json::from_slice(&raw).map_err(|e| e.to_string())
    }

    fn has_new_files(resp: &Response, last_file_name: &mut String) -> bool {
        if resp.status == ResponseStatus::NotFound || resp.file_names.is_empty() {
            return false;
        }
        *last_file_name = resp.file_names.last().cloned().unwrap_or_default();
        true
    }

    fn write_to_disk(fsys: &SegmentFsys, resp: &Response) -> Result<(), crate::wal::SegmentFsError> {
        for (name, data) in resp.file_names.iter().zip(resp.data.iter()) {
            fsys.adopt_segment(name, data)?;
        }
        Ok(())
    }

    async fn send_to_storage(resp: &Response, max_batch_bytes: usize, replay_tx: &mpsc::Sender<Batch>) {
        let mut batch = Batch::new(max_batch_bytes);
        for data in &resp.data {
            if let Err(e) = batch.load_bytes(data) {
                warn!("pulled segment had unparseable records: {e}");
            }
        }
        if replay_tx.send(batch).await.is_err() {
            error!("replay channel closed; orchestrator is no longer consuming");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::net::TcpListener;

    /// A single-shot fake master: accepts one connection, replies to every
    /// request with a fixed response, then closes.
    async fn fake_master_once(listener: TcpListener, response: Response) {
        let (mut stream, _) = listener.accept().await.unwrap();
        loop {
            let raw = match read_message(&mut stream, 1 << 20).await {
                Ok(raw) => raw,
                Err(_) => return,
            };
            let _req: Request = serde_json::from_slice(&raw).unwrap();
            let encoded = serde_json::to_vec(&response).unwrap();
            if write_message(&mut stream, &encoded).await.is_err() {
                return;
            }
        }
    }

    #[tokio::test]
    async fn slave_persists_and_replays_pulled_segments() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let master_addr = listener.local_addr().unwrap().to_string();

        let response = Response::ok_one_file("write_ahead00000000000000000000.log", b"SET x 1\nDEL x\nSET y 3\n".to_vec());
        tokio::spawn(fake_master_once(listener, response));

        let dir = TempDir::new().unwrap();
        let metrics = Arc::new(Metrics::new().unwrap());
        let mut slave = Slave::start_with_metrics(
            SlaveConfig {
                dir: dir.path().to_path_buf(),
                prefix: "write_ahead".to_string(),
                master_addr,
                interval: Duration::from_millis(20),
                max_message_size: 1 << 20,
                max_batch_bytes: 4096,
            },
            Some(Arc::clone(&metrics)),
        )
        .unwrap();

        let batch = tokio::time::timeout(Duration::from_secs(2), slave.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(batch.len(), 3);
        assert_eq!(batch.items()[2], crate::protocol::Request::set("y", "3"));

        let fsys = SegmentFsys::new(dir.path(), "write_ahead").unwrap();
        assert_eq!(fsys.list_segments().unwrap().len(), 1);
        assert!(metrics.replication_pulls_total.get() >= 1);
    }

    #[tokio::test]
    async fn slave_ignores_not_found_responses() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let master_addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(fake_master_once(listener, Response::not_found()));

        let dir = TempDir::new().unwrap();
        let mut slave = Slave::start(SlaveConfig {
            dir: dir.path().to_path_buf(),
            prefix: "write_ahead".to_string(),
            master_addr,
            interval: Duration::from_millis(20),
            max_message_size: 1 << 20,
            max_batch_bytes: 4096,
        })
        .unwrap();

        let result = tokio::time::timeout(Duration::from_millis(200), slave.recv()).await;
        assert!(result.is_err(), "NotFound must not be published for replay");
    }
}
