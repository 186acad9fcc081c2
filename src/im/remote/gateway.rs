//! 远端网关契约
//!
//! 订阅是服务端推送：匹配集合每次变化都会重新推送**整个**当前
//! 结果集（不是增量），引擎必须把每次推送当作"远端此刻认为的全部"
//! 来做整体替换合并。瞬时网络故障时订阅静默（不推错误帧），
//! 恢复连接后以一帧全新快照继续；流内的 `Err` 意味着流终止。
//!
//! 文档以未解码的 JSON 字段跨越边界，单条记录解码失败时合并方
//! 可以跳过该条、继续应用其余记录。

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde_json::Value;

use crate::im::error::GatewayError;

/// 远端文档：ID 加未解码的字段对象
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteDocument {
    pub id: String,
    pub fields: Value,
}

impl RemoteDocument {
    pub fn new(id: impl Into<String>, fields: Value) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }
}

/// 一帧完整结果集快照
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub docs: Vec<RemoteDocument>,
}

/// 快照流；`Err` 表示流已终止（按"流结束、未观察到内容"处理）
pub type SnapshotStream = BoxStream<'static, Result<Snapshot, GatewayError>>;

/// 查询过滤条件
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// 不过滤，返回集合全量
    All,
    /// 数组字段包含指定值（会话列表按成员过滤）
    ArrayContains { field: String, value: String },
    /// 文档 ID 在给定集合内（按 ID 批量取用户资料）
    IdIn(Vec<String>),
}

impl Filter {
    pub fn array_contains(field: impl Into<String>, value: impl Into<String>) -> Self {
        Filter::ArrayContains {
            field: field.into(),
            value: value.into(),
        }
    }
}

/// 排序方式（按单个整数字段）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderBy {
    None,
    Asc(&'static str),
    Desc(&'static str),
}

/// 远端文档库网关
///
/// `add` 在文档自带 ID 时按该 ID 落库（已存在则整体覆盖），
/// ID 为空时由远端分配；两种情况都返回最终落库的 ID。
/// 消息 ID 由客户端生成且永不重分配，重放同一条消息会覆盖
/// 远端同一文档而不是产生副本。
#[async_trait]
pub trait RemoteGateway: Send + Sync {
    /// 点读单个文档，不存在返回 None
    async fn get(&self, collection: &str, id: &str) -> Result<Option<RemoteDocument>, GatewayError>;

    /// 写入文档，返回落库 ID
    async fn add(&self, collection: &str, doc: RemoteDocument) -> Result<String, GatewayError>;

    /// 一次性过滤查询
    async fn query(
        &self,
        collection: &str,
        filter: Filter,
        order: OrderBy,
    ) -> Result<Vec<RemoteDocument>, GatewayError>;

    /// 订阅过滤结果集的快照流
    ///
    /// 建立即推一帧当前结果集；之后匹配集合每次变化再推全量。
    async fn subscribe(
        &self,
        collection: &str,
        filter: Filter,
        order: OrderBy,
    ) -> Result<SnapshotStream, GatewayError>;
}
