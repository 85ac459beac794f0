//! The WAL reader: bulk recovery of every segment in a directory.

use crate::wal::segment_fs::{SegmentFsError, SegmentFsys};

/// Default per-file read cap used only when no batch/segment size informs
/// a tighter one. Prefer [`read_buffer_for`] wherever a batch/segment
/// threshold is actually configured.
pub const DEFAULT_READ_BUFFER: usize = 65536;

/// Headroom added on top of a configured batch/segment byte threshold when
/// sizing a read buffer. `Batch::byte_size` (see `wal::batch`) counts a flat
/// per-item overhead, but the actual serialized record
/// (`COMMAND ARG[ ARG]\n`) runs a few bytes over that per item, so a flush
/// triggered by crossing the threshold can write a segment somewhat larger
/// than the threshold itself. A read cap merely equal to the threshold
/// would then reject that segment on recovery; this headroom must clear
/// the gap, not just match it.
pub const READ_BUFFER_HEADROOM_BYTES: usize = 4096;

/// The read buffer a WAL reader/coordinator should use to read back
/// segments produced by a given configured batch/segment byte threshold.
pub fn read_buffer_for(max_configured_bytes: usize) -> usize {
    max_configured_bytes.saturating_add(READ_BUFFER_HEADROOM_BYTES)
}

pub struct WalReader {
    fsys: SegmentFsys,
    max_bytes: usize,
}

impl WalReader {
    pub fn new(fsys: SegmentFsys) -> Self {
        Self {
            fsys,
            max_bytes: DEFAULT_READ_BUFFER,
        }
    }

    pub fn with_read_buffer(fsys: SegmentFsys, max_bytes: usize) -> Self {
        Self { fsys, max_bytes }
    }

    /// Every segment's bytes, in directory (== numeric) order. Segments
    /// that don't fit the read buffer are skipped; the caller is told via
    /// the returned error, but the successfully read segments are still
    /// usable.
    pub fn read_all(&self) -> (Vec<Vec<u8>>, Result<(), SegmentFsError>) {
        let names = match self.fsys.list_segments() {
            Ok(names) => names,
            Err(e) => return (Vec::new(), Err(e)),
        };
        let (_names, data, result) = self.fsys.read_all(&names, self.max_bytes);
        (data, result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn reads_segments_in_directory_order() {
        let tmp = TempDir::new().unwrap();
        let fsys = SegmentFsys::new(tmp.path(), "write_ahead").unwrap();
        fsys.write_segment(0, b"SET a 1\n").unwrap();
        fsys.write_segment(1, b"DEL a\n").unwrap();

        let reader = WalReader::new(SegmentFsys::new(tmp.path(), "write_ahead").unwrap());
        let (segments, result) = reader.read_all();
        assert!(result.is_ok());
        assert_eq!(segments, vec![b"SET a 1\n".to_vec(), b"DEL a\n".to_vec()]);
    }

    #[test]
    fn oversized_segment_is_skipped_with_reported_error() {
        let tmp = TempDir::new().unwrap();
        let fsys = SegmentFsys::new(tmp.path(), "write_ahead").unwrap();
        fsys.write_segment(0, b"SET a 1\n").unwrap();
        fsys.write_segment(1, &vec![b'x'; 32]).unwrap();

        let reader = WalReader::with_read_buffer(
            SegmentFsys::new(tmp.path(), "write_ahead").unwrap(),
            16,
        );
        let (segments, result) = reader.read_all();
        assert!(result.is_err());
        assert_eq!(segments, vec![b"SET a 1\n".to_vec()]);
    }

    #[test]
    fn empty_directory_yields_no_segments() {
        let tmp = TempDir::new().unwrap();
        let reader = WalReader::new(SegmentFsys::new(tmp.path(), "write_ahead").unwrap());
        let (segments, result) = reader.read_all();
        assert!(result.is_ok());
        assert!(segments.is_empty());
    }
}
