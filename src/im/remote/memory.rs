//! 进程内文档库
//!
//! [`RemoteGateway`] 的内存实现：多个客户端可共享同一实例，任何
//! 一方的写入都会让所有相关订阅收到一帧全新的完整快照。带有
//! 连通性开关，离线期间读写返回 [`GatewayError::Offline`]、订阅
//! 静默；恢复在线时对所有存活订阅重推一帧全量快照。
//!
//! 用途：端到端测试（含离线场景）与演示程序；同时作为将来接入
//! 真实传输时的语义参照。

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use crate::im::error::GatewayError;
use crate::im::remote::gateway::{Filter, OrderBy, RemoteDocument, RemoteGateway, Snapshot, SnapshotStream};
use crate::im::serialization::generate_record_id;

struct Subscriber {
    collection: String,
    filter: Filter,
    order: OrderBy,
    tx: mpsc::UnboundedSender<Result<Snapshot, GatewayError>>,
}

#[derive(Default)]
struct GatewayState {
    /// 集合路径 → (文档 ID → 字段)
    collections: HashMap<String, BTreeMap<String, Value>>,
    subscribers: Vec<Subscriber>,
}

/// 内存文档库网关
pub struct MemoryGateway {
    state: Mutex<GatewayState>,
    online: AtomicBool,
    writes: AtomicU64,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(GatewayState::default()),
            online: AtomicBool::new(true),
            writes: AtomicU64::new(0),
        }
    }

    /// 切换连通性；恢复在线时对所有存活订阅重推全量快照
    pub async fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
        debug!("[MemoryGW] 连通性切换: online={}", online);
        if online {
            let mut state = self.state.lock().await;
            Self::push_snapshots_to_all(&mut state);
        }
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// 成功落库的写入次数（仅统计 `add`）
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// 某集合当前的文档数量
    pub async fn document_count(&self, collection: &str) -> usize {
        let state = self.state.lock().await;
        state
            .collections
            .get(collection)
            .map(|docs| docs.len())
            .unwrap_or(0)
    }

    /// 直接植入一篇文档（测试夹具/带外数据），不受连通性开关限制，
    /// 不计入 `write_count`。在线时照常触发订阅重推；离线期间
    /// 植入的数据要等重连快照才可见。
    pub async fn seed_document(&self, collection: &str, id: &str, fields: Value) {
        let mut state = self.state.lock().await;
        state
            .collections
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), fields);
        if self.is_online() {
            Self::push_snapshots_for(&mut state, collection);
        }
    }

    fn offline_guard(&self) -> Result<(), GatewayError> {
        if self.is_online() {
            Ok(())
        } else {
            Err(GatewayError::Offline)
        }
    }

    fn filter_matches(filter: &Filter, id: &str, fields: &Value) -> bool {
        match filter {
            Filter::All => true,
            Filter::ArrayContains { field, value } => fields
                .get(field)
                .and_then(|v| v.as_array())
                .map(|arr| arr.iter().any(|item| item.as_str() == Some(value)))
                .unwrap_or(false),
            Filter::IdIn(ids) => ids.iter().any(|candidate| candidate == id),
        }
    }

    fn order_key(fields: &Value, field: &str) -> i64 {
        fields.get(field).and_then(|v| v.as_i64()).unwrap_or(0)
    }

    /// 求某个订阅条件此刻的完整结果集
    fn evaluate(
        collections: &HashMap<String, BTreeMap<String, Value>>,
        collection: &str,
        filter: &Filter,
        order: OrderBy,
    ) -> Snapshot {
        let mut docs: Vec<RemoteDocument> = collections
            .get(collection)
            .map(|m| {
                m.iter()
                    .filter(|(id, fields)| Self::filter_matches(filter, id, fields))
                    .map(|(id, fields)| RemoteDocument::new(id.clone(), fields.clone()))
                    .collect()
            })
            .unwrap_or_default();

        match order {
            OrderBy::None => {}
            OrderBy::Asc(field) => docs.sort_by(|a, b| {
                Self::order_key(&a.fields, field)
                    .cmp(&Self::order_key(&b.fields, field))
                    .then_with(|| a.id.cmp(&b.id))
            }),
            OrderBy::Desc(field) => docs.sort_by(|a, b| {
                Self::order_key(&b.fields, field)
                    .cmp(&Self::order_key(&a.fields, field))
                    .then_with(|| a.id.cmp(&b.id))
            }),
        }

        Snapshot { docs }
    }

    /// 对某集合的所有订阅重推全量快照，顺带清理已关闭的订阅
    fn push_snapshots_for(state: &mut GatewayState, collection: &str) {
        let mut dead = Vec::new();
        for i in 0..state.subscribers.len() {
            if state.subscribers[i].collection != collection {
                continue;
            }
            let snapshot = {
                let sub = &state.subscribers[i];
                Self::evaluate(&state.collections, &sub.collection, &sub.filter, sub.order)
            };
            if state.subscribers[i].tx.send(Ok(snapshot)).is_err() {
                dead.push(i);
            }
        }
        for i in dead.into_iter().rev() {
            state.subscribers.remove(i);
        }
    }

    fn push_snapshots_to_all(state: &mut GatewayState) {
        let mut collections: Vec<String> = state
            .subscribers
            .iter()
            .map(|sub| sub.collection.clone())
            .collect();
        collections.sort();
        collections.dedup();
        for collection in collections {
            Self::push_snapshots_for(state, &collection);
        }
    }
}

impl Default for MemoryGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteGateway for MemoryGateway {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<RemoteDocument>, GatewayError> {
        self.offline_guard()?;
        let state = self.state.lock().await;
        Ok(state
            .collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .map(|fields| RemoteDocument::new(id, fields.clone())))
    }

    async fn add(&self, collection: &str, doc: RemoteDocument) -> Result<String, GatewayError> {
        self.offline_guard()?;
        let id = if doc.id.is_empty() {
            generate_record_id()
        } else {
            doc.id
        };

        let mut state = self.state.lock().await;
        state
            .collections
            .entry(collection.to_string())
            .or_default()
            .insert(id.clone(), doc.fields);
        self.writes.fetch_add(1, Ordering::SeqCst);
        debug!("[MemoryGW] 写入文档 {}/{}", collection, id);

        Self::push_snapshots_for(&mut state, collection);
        Ok(id)
    }

    async fn query(
        &self,
        collection: &str,
        filter: Filter,
        order: OrderBy,
    ) -> Result<Vec<RemoteDocument>, GatewayError> {
        self.offline_guard()?;
        let state = self.state.lock().await;
        Ok(Self::evaluate(&state.collections, collection, &filter, order).docs)
    }

    async fn subscribe(
        &self,
        collection: &str,
        filter: Filter,
        order: OrderBy,
    ) -> Result<SnapshotStream, GatewayError> {
        self.offline_guard()?;
        let (tx, rx) = mpsc::unbounded_channel();

        let mut state = self.state.lock().await;
        // 建立即推一帧当前结果集
        let initial = Self::evaluate(&state.collections, collection, &filter, order);
        let _ = tx.send(Ok(initial));
        state.subscribers.push(Subscriber {
            collection: collection.to_string(),
            filter,
            order,
            tx,
        });
        debug!("[MemoryGW] 新增订阅: {}", collection);

        let stream = futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        Ok(Box::pin(stream))
    }
}
