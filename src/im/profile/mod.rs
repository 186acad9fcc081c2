//! 用户资料模块
//!
//! 对端用户资料的本地缓存与按需刷新。资料只由其所有者（或在线
//! 状态更新）修改，本端只读缓存。

pub mod dao;
pub mod models;
pub mod service;

pub use dao::ProfileDao;
pub use models::LocalProfile;
pub use service::ProfileSyncer;
