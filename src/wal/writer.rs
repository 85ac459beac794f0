//! The WAL writer: one fresh segment file per flush.
//!
//! `maxSegmentBytes` is advisory here — it is consulted by the coordinator's
//! batcher to decide *when* to flush, never by the writer to split a batch
//! across files. Every flush becomes exactly one new segment.

use crate::wal::segment_fs::{SegmentFsError, SegmentFsys};

#[derive(Debug, thiserror::Error)]
pub enum WalWriterError {
    #[error("data is empty")]
    EmptyData,
    #[error(transparent)]
    Fs(#[from] SegmentFsError),
}

pub struct WalWriter {
    fsys: SegmentFsys,
    next_index: u64,
    current_name: Option<String>,
}

impl WalWriter {
    pub fn new(fsys: SegmentFsys) -> Result<Self, WalWriterError> {
        let next_index = fsys.next_index()?;
        let current_name = fsys.last_segment_name()?;
        Ok(Self {
            fsys,
            next_index,
            current_name,
        })
    }

    pub fn current_name(&self) -> Option<&str> {
        self.current_name.as_deref()
    }

    /// Write `bytes` as a brand-new segment file, fsync it, and advance
    /// `next_index`. Returns the number of bytes written.
    pub fn write(&mut self, bytes: &[u8]) -> Result<usize, WalWriterError> {
        if bytes.is_empty() {
            return Err(WalWriterError::EmptyData);
        }

        let name = self.fsys.write_segment(self.next_index, bytes)?;
        self.next_index += 1;
        self.current_name = Some(name);
        Ok(bytes.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fsys(dir: &TempDir) -> SegmentFsys {
        SegmentFsys::new(dir.path(), "write_ahead").unwrap()
    }

    #[test]
    fn write_rejects_empty_data() {
        let tmp = TempDir::new().unwrap();
        let mut writer = WalWriter::new(fsys(&tmp)).unwrap();
        assert!(matches!(writer.write(b""), Err(WalWriterError::EmptyData)));
    }

    #[test]
    fn each_write_creates_a_new_segment_file() {
        let tmp = TempDir::new().unwrap();
        let mut writer = WalWriter::new(fsys(&tmp)).unwrap();
        writer.write(b"SET a 1\n").unwrap();
        writer.write(b"SET b 2\n").unwrap();

        let names = fsys(&tmp).list_segments().unwrap();
        assert_eq!(names.len(), 2);
    }

    #[test]
    fn resumes_indexing_after_existing_segments() {
        let tmp = TempDir::new().unwrap();
        {
            let f = fsys(&tmp);
            f.write_segment(0, b"SET a 1\n").unwrap();
            f.write_segment(1, b"SET b 2\n").unwrap();
        }

        let mut writer = WalWriter::new(fsys(&tmp)).unwrap();
        writer.write(b"SET c 3\n").unwrap();

        let names = fsys(&tmp).list_segments().unwrap();
        assert_eq!(names.len(), 3);
    }
}
