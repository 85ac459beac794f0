//! Write-ahead log: batching, segment files, and the coordinator that
//! ties them together.

pub mod batch;
pub mod coordinator;
pub mod reader;
pub mod segment_fs;
pub mod writer;

pub use batch::{Batch, LoadError};
pub use coordinator::{AckMode, WalCoordinator, WalCoordinatorConfig, WalCoordinatorError};
pub use reader::{read_buffer_for, WalReader, DEFAULT_READ_BUFFER, READ_BUFFER_HEADROOM_BYTES};
pub use segment_fs::{SegmentFsError, SegmentFsys};
pub use writer::{WalWriter, WalWriterError};
