//! 远端网关模块
//!
//! 把远端多写者实时文档库抽象为点读、点写、过滤查询与快照订阅
//! 四个操作。线缆协议与传输在引擎之外，进程内实现见 [`memory`]。

pub mod gateway;
pub mod memory;

pub use gateway::{Filter, OrderBy, RemoteDocument, RemoteGateway, Snapshot, SnapshotStream};
pub use memory::MemoryGateway;
