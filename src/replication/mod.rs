//! Replication: a master that serves WAL segments on demand and a slave
//! that pulls, persists, and replays them.

pub mod master;
pub mod protocol;
pub mod slave;

pub use master::Master;
pub use protocol::{Request, RequestKind, Response, ResponseStatus};
pub use slave::{Slave, SlaveConfig};
