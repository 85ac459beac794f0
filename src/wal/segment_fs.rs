//! Filesystem operations over a directory of WAL segment files.
//!
//! Segment files are named `<prefix><index:020>.log`: the index is
//! zero-padded to 20 digits so that lexicographic sort (what `read_dir`
//! gives us for free) agrees with numeric sort, avoiding a trap where
//! `write_ahead10.log` would otherwise sort before `write_ahead2.log`.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

const INDEX_WIDTH: usize = 20;
const FILE_EXTENSION: &str = ".log";

#[derive(Debug, thiserror::Error)]
pub enum SegmentFsError {
    #[error("could not create WAL directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not read WAL directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not create segment file {path}: {source}")]
    CreateFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not write segment file {path}: {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not sync segment file {path}: {source}")]
    SyncFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not read segment file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("reading segment {path} overflowed a {limit}-byte buffer")]
    ReadOverflow { path: PathBuf, limit: usize },
    #[error("one or more segment files could not be processed: {0}")]
    Partial(String),
}

/// Owns the on-disk directory a WAL writes its segments into.
pub struct SegmentFsys {
    dir: PathBuf,
    prefix: String,
}

impl SegmentFsys {
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Result<Self, SegmentFsError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| SegmentFsError::CreateDir {
            path: dir.clone(),
            source,
        })?;
        Ok(Self {
            dir,
            prefix: prefix.into(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn segment_name(&self, index: u64) -> String {
        format!("{}{:0width$}{}", self.prefix, index, FILE_EXTENSION, width = INDEX_WIDTH)
    }

    fn parse_index(&self, name: &str) -> Option<u64> {
        let stripped = name.strip_prefix(&self.prefix)?;
        let stripped = stripped.strip_suffix(FILE_EXTENSION)?;
        stripped.parse::<u64>().ok()
    }

    /// All segment file names belonging to this WAL, in numeric (== lexicographic) order.
    pub fn list_segments(&self) -> Result<Vec<String>, SegmentFsError> {
        let entries = fs::read_dir(&self.dir).map_err(|source| SegmentFsError::ReadDir {
            path: self.dir.clone(),
            source,
        })?;

        let mut names: Vec<String> = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| SegmentFsError::ReadDir {
                path: self.dir.clone(),
                source,
            })?;
            if entry.path().is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if self.parse_index(&name).is_some() {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    /// The most recently written segment's file name, if any segments exist.
    pub fn last_segment_name(&self) -> Result<Option<String>, SegmentFsError> {
        Ok(self.list_segments()?.into_iter().last())
    }

    /// The next index to write to: one past the highest existing segment,
    /// or `0` if the directory is empty.
    pub fn next_index(&self) -> Result<u64, SegmentFsError> {
        let names = self.list_segments()?;
        match names.last() {
            Some(name) => Ok(self.parse_index(name).unwrap_or(0) + 1),
            None => Ok(0),
        }
    }

    /// Binary search for `target` in an already-sorted name list.
    pub fn find_name(names: &[String], target: &str) -> Option<usize> {
        names.binary_search_by(|n| n.as_str().cmp(target)).ok()
    }

    /// Write a brand-new segment at `index` and fsync it before returning.
    pub fn write_segment(&self, index: u64, data: &[u8]) -> Result<String, SegmentFsError> {
        let name = self.segment_name(index);
        let path = self.dir.join(&name);

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .map_err(|source| SegmentFsError::CreateFile {
                path: path.clone(),
                source,
            })?;

        file.write_all(data)
            .map_err(|source| SegmentFsError::WriteFile {
                path: path.clone(),
                source,
            })?;

        file.sync_all().map_err(|source| SegmentFsError::SyncFile {
            path: path.clone(),
            source,
        })?;

        Ok(name)
    }

    /// Persist a segment pulled from a replication peer under its own
    /// (already-allocated) name, rather than allocating a new index. Used
    /// by the replica to mirror a master's segment file byte-for-byte.
    pub fn adopt_segment(&self, name: &str, data: &[u8]) -> Result<(), SegmentFsError> {
        let path = self.dir.join(name);

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .map_err(|source| SegmentFsError::CreateFile {
                path: path.clone(),
                source,
            })?;

        file.write_all(data)
            .map_err(|source| SegmentFsError::WriteFile {
                path: path.clone(),
                source,
            })?;

        file.sync_all().map_err(|source| SegmentFsError::SyncFile {
            path: path.clone(),
            source,
        })?;

        Ok(())
    }

    /// Read a single segment's full contents, capped at `max_bytes`: a file
    /// larger than `max_bytes` is rejected with [`SegmentFsError::ReadOverflow`],
    /// but a file exactly `max_bytes` long reads through. The probe buffer is
    /// one byte larger than the cap so a file sitting exactly at the cap can
    /// still hit true EOF (a `0`-byte read) before overflow is declared.
    pub fn read_segment(&self, name: &str, max_bytes: usize) -> Result<Vec<u8>, SegmentFsError> {
        let path = self.dir.join(name);
        let mut file = File::open(&path).map_err(|source| SegmentFsError::ReadFile {
            path: path.clone(),
            source,
        })?;

        let mut buf = vec![0u8; max_bytes + 1];
        let mut total = 0usize;
        loop {
            let n = file
                .read(&mut buf[total..])
                .map_err(|source| SegmentFsError::ReadFile {
                    path: path.clone(),
                    source,
                })?;
            if n == 0 {
                break;
            }
            total += n;
            if total > max_bytes {
                return Err(SegmentFsError::ReadOverflow {
                    path,
                    limit: max_bytes,
                });
            }
        }
        buf.truncate(total);
        Ok(buf)
    }

    /// Read every named segment, skipping (and reporting) any that error
    /// rather than aborting the whole batch. The returned names and data are
    /// always the same length and correspond index-for-index: a name only
    /// appears if its segment was actually read, so a caller zipping the two
    /// lists together can never pair a name with the wrong segment's bytes.
    pub fn read_all(
        &self,
        names: &[String],
        max_bytes: usize,
    ) -> (Vec<String>, Vec<Vec<u8>>, Result<(), SegmentFsError>) {
        let mut ok_names = Vec::with_capacity(names.len());
        let mut out = Vec::with_capacity(names.len());
        let mut bad = Vec::new();

        for name in names {
            match self.read_segment(name, max_bytes) {
                Ok(data) => {
                    ok_names.push(name.clone());
                    out.push(data);
                }
                Err(_) => bad.push(name.clone()),
            }
        }

        if bad.is_empty() {
            (ok_names, out, Ok(()))
        } else {
            (ok_names, out, Err(SegmentFsError::Partial(bad.join(", "))))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn segment_names_zero_pad_so_sort_order_matches_numeric_order() {
        let tmp = TempDir::new().unwrap();
        let fsys = SegmentFsys::new(tmp.path(), "write_ahead").unwrap();
        fsys.write_segment(2, b"a").unwrap();
        fsys.write_segment(10, b"b").unwrap();
        let names = fsys.list_segments().unwrap();
        assert_eq!(names.len(), 2);
        assert!(names[0] < names[1]);
        assert!(names[0].contains("00000000000000000002"));
    }

    #[test]
    fn next_index_is_zero_on_empty_directory() {
        let tmp = TempDir::new().unwrap();
        let fsys = SegmentFsys::new(tmp.path(), "write_ahead").unwrap();
        assert_eq!(fsys.next_index().unwrap(), 0);
    }

    #[test]
    fn next_index_continues_after_existing_segments() {
        let tmp = TempDir::new().unwrap();
        let fsys = SegmentFsys::new(tmp.path(), "write_ahead").unwrap();
        fsys.write_segment(0, b"a").unwrap();
        fsys.write_segment(1, b"b").unwrap();
        assert_eq!(fsys.next_index().unwrap(), 2);
    }

    #[test]
    fn write_then_read_round_trips_bytes() {
        let tmp = TempDir::new().unwrap();
        let fsys = SegmentFsys::new(tmp.path(), "write_ahead").unwrap();
        let name = fsys.write_segment(0, b"SET a 1\n").unwrap();
        let data = fsys.read_segment(&name, 4096).unwrap();
        assert_eq!(data, b"SET a 1\n");
    }

    #[test]
    fn read_segment_reports_overflow_past_cap() {
        let tmp = TempDir::new().unwrap();
        let fsys = SegmentFsys::new(tmp.path(), "write_ahead").unwrap();
        let name = fsys.write_segment(0, b"0123456789").unwrap();
        let result = fsys.read_segment(&name, 4);
        assert!(matches!(result, Err(SegmentFsError::ReadOverflow { .. })));
    }

    #[test]
    fn read_segment_allows_a_file_exactly_at_the_cap() {
        let tmp = TempDir::new().unwrap();
        let fsys = SegmentFsys::new(tmp.path(), "write_ahead").unwrap();
        let name = fsys.write_segment(0, b"0123456789").unwrap();
        let data = fsys.read_segment(&name, 10).unwrap();
        assert_eq!(data, b"0123456789");
    }

    #[test]
    fn read_all_keeps_names_and_data_aligned_when_a_segment_is_unreadable() {
        let tmp = TempDir::new().unwrap();
        let fsys = SegmentFsys::new(tmp.path(), "write_ahead").unwrap();
        fsys.write_segment(0, b"SET a 1\n").unwrap();
        fsys.write_segment(1, &vec![b'x'; 64]).unwrap();
        let names = fsys.list_segments().unwrap();

        let (ok_names, data, result) = fsys.read_all(&names, 16);
        assert!(result.is_err());
        assert_eq!(ok_names.len(), data.len());
        assert_eq!(data, vec![b"SET a 1\n".to_vec()]);
    }

    #[test]
    fn find_name_locates_existing_entries_by_binary_search() {
        let tmp = TempDir::new().unwrap();
        let fsys = SegmentFsys::new(tmp.path(), "write_ahead").unwrap();
        fsys.write_segment(0, b"a").unwrap();
        fsys.write_segment(1, b"b").unwrap();
        let names = fsys.list_segments().unwrap();
        let target = names[1].clone();
        assert_eq!(SegmentFsys::find_name(&names, &target), Some(1));
        assert_eq!(SegmentFsys::find_name(&names, "missing.log"), None);
    }
}
