//! Master side of replication: serves WAL segments to replicas on request.
//! Stateless across requests — any number of replicas may poll
//! independently.

use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, warn};

use crate::wal::SegmentFsys;

use super::protocol::{read_message, write_message, Request, RequestKind, Response};

pub struct Master {
    fsys: SegmentFsys,
    max_message_size: usize,
}

impl Master {
    pub fn new(fsys: SegmentFsys, max_message_size: usize) -> Self {
        Self {
            fsys,
            max_message_size,
        }
    }

    /// Bind `addr` and serve replication requests until the process exits
    /// or the listener errors. Each connection is handled on its own task.
    pub async fn serve(self: Arc<Self>, addr: &str) -> std::io::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        debug!("replication master listening on {addr}");

        loop {
            let (stream, peer) = listener.accept().await?;
            let master = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(e) = master.handle_connection(stream).await {
                    warn!("replication connection from {peer} ended with error: {e}");
                }
            });
        }
    }

    async fn handle_connection(&self, mut stream: TcpStream) -> Result<(), std::io::Error> {
        loop {
            let raw = match read_message(&mut stream, self.max_message_size).await {
                Ok(raw) => raw,
                Err(_) => return Ok(()),
            };

            let response = match serde_json::from_slice::<Request>(&raw) {
                Ok(req) => self.handle_request(&req),
                Err(e) => {
                    error!("could not decode replication request: {e}");
                    Response::error(e)
                }
            };

            let encoded = serde_json::to_vec(&response).unwrap_or_else(|e| {
                error!("could not encode replication response: {e}");
                Vec::new()
            });
            if write_message(&mut stream, &encoded).await.is_err() {
                return Ok(());
            }
        }
    }

    fn handle_request(&self, req: &Request) -> Response {
        match req.kind {
            RequestKind::ReadLast => self.read_last(&req.last_file_name),
            RequestKind::ReadAll => self.read_all(),
        }
    }

    fn read_last(&self, last_file_name: &str) -> Response {
        let names = match self.fsys.list_segments() {
            Ok(names) => names,
            Err(e) => return Response::error(e),
        };

        let index = if last_file_name.is_empty() {
            None
        } else {
            SegmentFsys::find_name(&names, last_file_name)
        };

        let next_index = match index {
            Some(i) if i + 1 < names.len() => i + 1,
            Some(_) => return Response::not_found(),
            None if last_file_name.is_empty() => 0,
            None => return Response::not_found(),
        };

        if next_index >= names.len() {
            return Response::not_found();
        }

        let target = &names[next_index];
        match self.fsys.read_segment(target, self.max_message_size) {
            Ok(data) => Response::ok_one_file(target.clone(), data),
            Err(e) => Response::error(e),
        }
    }

    fn read_all(&self) -> Response {
        let names = match self.fsys.list_segments() {
            Ok(names) => names,
            Err(e) => return Response::error(e),
        };

        // `ok_names` and `data` are already aligned index-for-index by
        // `SegmentFsys::read_all`; a segment that failed to read is simply
        // absent from both, so the response never pairs a name with the
        // wrong segment's bytes.
        let (ok_names, data, result) = self.fsys.read_all(&names, self.max_message_size);
        if let Err(e) = result {
            warn!("read_all completed with unreadable segments, returning only the readable ones: {e}");
        }
        Response::ok_all_files(ok_names, data)
    }
}
