//! 同步引擎集成测试：
//!
//! - 乐观发送与离线队列（PENDING -> SYNCED 单调、重放恰好补发一次）
//! - 快照整帧合并（幂等、坏记录跳过、列表随时间戳重排）
//! - 查找或创建两人会话的稳定性
//! - 作用域生命周期（关闭即停写、断流只服务缓存）

use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;
use tokio::time::{sleep, timeout};

use chat_sdk_core::im::client::{ChatClient, ClientConfig};
use chat_sdk_core::im::identity::StaticIdentity;
use chat_sdk_core::im::listener::SyncListener;
use chat_sdk_core::im::remote::MemoryGateway;
use chat_sdk_core::im::types::{collections, SyncState};

const WAIT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// 辅助：记录所有回调的监听器
// ---------------------------------------------------------------------------

#[derive(Default)]
struct RecordingListener {
    chat_merges: Mutex<Vec<(usize, usize)>>,
    message_merges: Mutex<Vec<(String, usize, usize)>>,
    synced: Mutex<Vec<String>>,
    flush_failures: Mutex<Vec<(String, String)>>,
    replays: Mutex<Vec<(String, usize, usize)>>,
    closed_streams: Mutex<Vec<(String, String)>>,
}

#[async_trait::async_trait]
impl SyncListener for RecordingListener {
    async fn on_chat_snapshot_merged(&self, applied: usize, skipped: usize) {
        self.chat_merges.lock().unwrap().push((applied, skipped));
    }

    async fn on_message_snapshot_merged(&self, chat_id: String, applied: usize, skipped: usize) {
        self.message_merges
            .lock()
            .unwrap()
            .push((chat_id, applied, skipped));
    }

    async fn on_message_synced(&self, message_id: String) {
        self.synced.lock().unwrap().push(message_id);
    }

    async fn on_flush_failed(&self, message_id: String, reason: String) {
        self.flush_failures
            .lock()
            .unwrap()
            .push((message_id, reason));
    }

    async fn on_replay_finished(&self, chat_id: String, flushed: usize, failed: usize) {
        self.replays.lock().unwrap().push((chat_id, flushed, failed));
    }

    async fn on_stream_closed(&self, scope: String, reason: String) {
        self.closed_streams.lock().unwrap().push((scope, reason));
    }
}

// ---------------------------------------------------------------------------
// 辅助：客户端装配与远端数据播种
// ---------------------------------------------------------------------------

async fn connected_client(
    user: &str,
    dir: &tempfile::TempDir,
    gateway: &Arc<MemoryGateway>,
    listener: Option<Arc<RecordingListener>>,
) -> ChatClient {
    let db_url = format!(
        "sqlite://{}/chat-{}.db?mode=rwc",
        dir.path().display(),
        user
    );
    let mut client = ChatClient::new(
        ClientConfig::new(db_url),
        gateway.clone(),
        StaticIdentity::signed_in(user),
    );
    if let Some(listener) = listener {
        client.set_sync_listener(listener);
    }
    client.connect().await.expect("客户端连接失败");
    client
}

async fn seed_profile(gateway: &MemoryGateway, user_id: &str, name: &str) {
    gateway
        .seed_document(
            collections::USERS,
            user_id,
            json!({
                "email": format!("{}@example.com", user_id),
                "displayName": name,
                "isOnline": true,
                "lastSeen": 0,
            }),
        )
        .await;
}

async fn seed_chat(
    gateway: &MemoryGateway,
    chat_id: &str,
    members: &[&str],
    last_message_ts: i64,
    preview: &str,
    unread: i64,
) {
    gateway
        .seed_document(
            collections::CONVERSATIONS,
            chat_id,
            json!({
                "memberIds": members,
                "lastMessage": preview,
                "lastMessageTimestamp": last_message_ts,
                "lastMessageType": "TEXT",
                "unreadCount": unread,
                "isGroup": false,
                "groupName": null,
            }),
        )
        .await;
}

async fn seed_message(
    gateway: &MemoryGateway,
    chat_id: &str,
    message_id: &str,
    sender: &str,
    content: &str,
    timestamp: i64,
) {
    gateway
        .seed_document(
            &collections::messages_of(chat_id),
            message_id,
            json!({
                "senderId": sender,
                "content": content,
                "timestamp": timestamp,
                "type": "TEXT",
                "readBy": [],
                "deliveredTo": [],
            }),
        )
        .await;
}

/// 轮询等待远端某集合达到期望的文档数
async fn wait_doc_count(gateway: &MemoryGateway, collection: &str, expected: usize) {
    timeout(WAIT, async {
        loop {
            if gateway.document_count(collection).await == expected {
                break;
            }
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap_or_else(|_| {
        panic!("等待集合 {} 达到 {} 个文档超时", collection, expected);
    });
}

// ---------------------------------------------------------------------------
// 在线发送链路
// ---------------------------------------------------------------------------

#[tokio::test]
async fn online_send_reaches_counterpart_view() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = Arc::new(MemoryGateway::new());
    seed_profile(&gateway, "alice", "Alice").await;
    seed_profile(&gateway, "bob", "Bob").await;

    let alice = connected_client("alice", &dir, &gateway, None).await;
    let bob = connected_client("bob", &dir, &gateway, None).await;

    let chat_id = alice.start_conversation("bob").await.unwrap();
    let _conv_a = alice.open_conversation(&chat_id).await.unwrap();
    let conv_b = bob.open_conversation(&chat_id).await.unwrap();

    alice
        .send_text_message(&chat_id, "你好，Bob")
        .await
        .unwrap()
        .expect("非空消息应该落库");

    let mut view_b = conv_b.messages();
    let messages = timeout(WAIT, view_b.wait_for(|msgs| msgs.len() == 1))
        .await
        .expect("等待 Bob 收到消息超时")
        .unwrap()
        .clone();
    assert_eq!(messages[0].content, "你好，Bob");
    assert_eq!(messages[0].sender_id, "alice");
    assert_eq!(messages[0].sync_state, SyncState::Synced);

    // 该消息在远端恰好一个文档
    assert_eq!(
        gateway.document_count(&collections::messages_of(&chat_id)).await,
        1
    );
}

#[tokio::test]
async fn blank_send_is_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = Arc::new(MemoryGateway::new());
    seed_profile(&gateway, "alice", "Alice").await;

    let alice = connected_client("alice", &dir, &gateway, None).await;
    let chat_id = alice.start_conversation("bob").await.unwrap();

    let sent = alice.send_text_message(&chat_id, "   \t  ").await.unwrap();
    assert!(sent.is_none());
    assert_eq!(
        gateway.document_count(&collections::messages_of(&chat_id)).await,
        0
    );
}

// ---------------------------------------------------------------------------
// 离线队列与重放
// ---------------------------------------------------------------------------

#[tokio::test]
async fn offline_send_stays_pending_then_replays_exactly_once() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = Arc::new(MemoryGateway::new());
    seed_profile(&gateway, "alice", "Alice").await;
    seed_profile(&gateway, "bob", "Bob").await;

    let listener = Arc::new(RecordingListener::default());
    let alice = connected_client("alice", &dir, &gateway, Some(listener.clone())).await;

    let chat_id = alice.start_conversation("bob").await.unwrap();
    let conv = alice.open_conversation(&chat_id).await.unwrap();
    let messages_collection = collections::messages_of(&chat_id);
    let writes_before = gateway.write_count();

    // 断网发送：本地落库，远端没有任何写入
    gateway.set_online(false).await;
    let queued = conv
        .send_text("断网期间排队的消息")
        .await
        .unwrap()
        .expect("非空消息应该落库");
    assert_eq!(queued.sync_state, SyncState::Pending);
    assert_eq!(gateway.document_count(&messages_collection).await, 0);
    assert_eq!(alice.flush_failure_count(), 1);
    assert_eq!(listener.flush_failures.lock().unwrap().len(), 1);

    // 模拟重启：关掉旧作用域，恢复联网后重新打开触发重放
    drop(conv);
    gateway.set_online(true).await;
    let conv = alice.open_conversation(&chat_id).await.unwrap();

    wait_doc_count(&gateway, &messages_collection, 1).await;
    let mut view = conv.messages();
    let messages = timeout(
        WAIT,
        view.wait_for(|msgs| msgs.iter().all(|m| m.sync_state == SyncState::Synced)),
    )
    .await
    .expect("等待消息转为 SYNCED 超时")
    .unwrap()
    .clone();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].message_id, queued.message_id);

    // 整条链路对这条消息只产生一次成功的远端写入
    assert_eq!(gateway.write_count() - writes_before, 1);

    // 队列已空，再重放一轮不产生新的写入
    let report = loop {
        match conv.replay_pending().await.unwrap() {
            Some(report) => break report,
            // 打开作用域时的首轮重放还握着门闩，稍后再试
            None => sleep(Duration::from_millis(20)).await,
        }
    };
    assert_eq!(report.attempted, 0);
    assert_eq!(gateway.write_count() - writes_before, 1);
    assert_eq!(gateway.document_count(&messages_collection).await, 1);
}

#[tokio::test]
async fn replay_reports_failures_and_keeps_queue_when_still_offline() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = Arc::new(MemoryGateway::new());
    seed_profile(&gateway, "alice", "Alice").await;

    let listener = Arc::new(RecordingListener::default());
    let alice = connected_client("alice", &dir, &gateway, Some(listener.clone())).await;
    let chat_id = alice.start_conversation("bob").await.unwrap();
    let conv = alice.open_conversation(&chat_id).await.unwrap();

    gateway.set_online(false).await;
    conv.send_text("第一条").await.unwrap();
    conv.send_text("第二条").await.unwrap();

    // 仍然断网：重放全部失败，消息留在队列里
    let report = loop {
        match conv.replay_pending().await.unwrap() {
            Some(report) => break report,
            // 打开作用域时的首轮重放还握着门闩，稍后再试
            None => sleep(Duration::from_millis(20)).await,
        }
    };
    assert_eq!(report.attempted, 2);
    assert_eq!(report.flushed, 0);
    assert_eq!(report.failed, 2);
    assert_eq!(
        gateway.document_count(&collections::messages_of(&chat_id)).await,
        0
    );

    let mut view = conv.messages();
    let messages = timeout(WAIT, view.wait_for(|msgs| msgs.len() == 2))
        .await
        .expect("等待本地视图超时")
        .unwrap()
        .clone();
    assert!(messages.iter().all(|m| m.sync_state == SyncState::Pending));
}

// ---------------------------------------------------------------------------
// 快照合并
// ---------------------------------------------------------------------------

#[tokio::test]
async fn duplicate_snapshots_merge_idempotently() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = Arc::new(MemoryGateway::new());
    seed_profile(&gateway, "bob", "Bob").await;
    seed_chat(&gateway, "c1", &["alice", "bob"], 1_000, "你好", 0).await;

    let listener = Arc::new(RecordingListener::default());
    let alice = connected_client("alice", &dir, &gateway, Some(listener.clone())).await;
    let scope = alice.open_chat_list().await.unwrap();

    let mut list = scope.chat_list();
    timeout(WAIT, list.wait_for(|entries| entries.len() == 1))
        .await
        .expect("等待会话列表超时")
        .unwrap();

    // 同一帧快照再推一次（set_online(true) 会向所有订阅重发全量帧）
    gateway.set_online(true).await;
    timeout(WAIT, async {
        loop {
            if listener.chat_merges.lock().unwrap().len() >= 2 {
                break;
            }
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("等待第二帧快照超时");

    let entries = list.borrow().clone();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].chat.chat_id, "c1");
    assert_eq!(entries[0].chat.last_message, "你好");
    // 两帧都完整应用，没有记录被跳过
    let merges = listener.chat_merges.lock().unwrap().clone();
    assert!(merges.iter().all(|&(applied, skipped)| applied == 1 && skipped == 0));
}

#[tokio::test]
async fn malformed_records_are_skipped_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = Arc::new(MemoryGateway::new());
    seed_chat(&gateway, "c1", &["alice", "bob"], 1_000, "", 0).await;
    seed_message(&gateway, "c1", "m1", "bob", "第一条", 1).await;
    seed_message(&gateway, "c1", "m2", "bob", "第二条", 2).await;
    // 时间戳字段形状不合法，这条应被跳过
    gateway
        .seed_document(
            &collections::messages_of("c1"),
            "bad",
            json!({
                "senderId": "bob",
                "content": "坏记录",
                "timestamp": "不是数字",
                "type": "TEXT",
            }),
        )
        .await;

    let listener = Arc::new(RecordingListener::default());
    let alice = connected_client("alice", &dir, &gateway, Some(listener.clone())).await;
    let conv = alice.open_conversation("c1").await.unwrap();

    let mut view = conv.messages();
    let messages = timeout(WAIT, view.wait_for(|msgs| msgs.len() == 2))
        .await
        .expect("等待好记录入库超时")
        .unwrap()
        .clone();
    assert_eq!(messages[0].content, "第一条");
    assert_eq!(messages[1].content, "第二条");

    let merges = listener.message_merges.lock().unwrap().clone();
    let last = merges.last().expect("应有合并回调");
    assert_eq!(last.1, 2);
    assert_eq!(last.2, 1);
}

#[tokio::test]
async fn remote_messages_order_by_timestamp_ascending() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = Arc::new(MemoryGateway::new());
    seed_chat(&gateway, "c1", &["alice", "bob"], 0, "", 0).await;
    // 乱序播种：100, 50, 75
    seed_message(&gateway, "c1", "m-100", "bob", "一百", 100).await;
    seed_message(&gateway, "c1", "m-50", "bob", "五十", 50).await;
    seed_message(&gateway, "c1", "m-75", "bob", "七十五", 75).await;

    let alice = connected_client("alice", &dir, &gateway, None).await;
    let conv = alice.open_conversation("c1").await.unwrap();

    let mut view = conv.messages();
    let messages = timeout(WAIT, view.wait_for(|msgs| msgs.len() == 3))
        .await
        .expect("等待消息入库超时")
        .unwrap()
        .clone();
    let timestamps: Vec<i64> = messages.iter().map(|m| m.send_time).collect();
    assert_eq!(timestamps, vec![50, 75, 100]);
}

#[tokio::test]
async fn snapshot_update_reorders_chat_list() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = Arc::new(MemoryGateway::new());
    seed_profile(&gateway, "bob", "Bob").await;
    seed_profile(&gateway, "carol", "Carol").await;
    seed_chat(&gateway, "c-bob", &["alice", "bob"], 1_000, "旧消息", 0).await;
    seed_chat(&gateway, "c-carol", &["alice", "carol"], 2_000, "新消息", 0).await;

    let alice = connected_client("alice", &dir, &gateway, None).await;
    let scope = alice.open_chat_list().await.unwrap();

    let mut list = scope.chat_list();
    let entries = timeout(WAIT, list.wait_for(|entries| entries.len() == 2))
        .await
        .expect("等待会话列表超时")
        .unwrap()
        .clone();
    assert_eq!(entries[0].chat.chat_id, "c-carol");
    assert_eq!(entries[1].chat.chat_id, "c-bob");

    // Bob 的会话出现更新的消息，列表应重排到最前
    seed_chat(&gateway, "c-bob", &["alice", "bob"], 3_000, "最新消息", 1).await;
    let entries = timeout(
        WAIT,
        list.wait_for(|entries| {
            entries.len() == 2 && entries[0].chat.chat_id == "c-bob"
        }),
    )
    .await
    .expect("等待列表重排超时")
    .unwrap()
    .clone();
    assert_eq!(entries[0].chat.last_message, "最新消息");
    assert_eq!(entries[0].counterpart.display_name, "Bob");
}

#[tokio::test]
async fn list_entries_without_profile_are_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = Arc::new(MemoryGateway::new());
    seed_profile(&gateway, "bob", "Bob").await;
    seed_chat(&gateway, "c-bob", &["alice", "bob"], 2_000, "", 0).await;
    // ghost 没有用户资料，这个会话条目应被投影丢弃
    seed_chat(&gateway, "c-ghost", &["alice", "ghost"], 1_000, "", 0).await;

    let alice = connected_client("alice", &dir, &gateway, None).await;
    let scope = alice.open_chat_list().await.unwrap();

    let mut list = scope.chat_list();
    let entries = timeout(
        WAIT,
        list.wait_for(|entries| {
            entries.len() == 1 && entries[0].counterpart.display_name == "Bob"
        }),
    )
    .await
    .expect("等待会话列表超时")
    .unwrap()
    .clone();
    assert_eq!(entries[0].chat.chat_id, "c-bob");
}

// ---------------------------------------------------------------------------
// 查找或创建两人会话
// ---------------------------------------------------------------------------

#[tokio::test]
async fn find_or_create_is_stable_for_both_sides() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = Arc::new(MemoryGateway::new());
    seed_profile(&gateway, "alice", "Alice").await;
    seed_profile(&gateway, "bob", "Bob").await;

    let alice = connected_client("alice", &dir, &gateway, None).await;
    let bob = connected_client("bob", &dir, &gateway, None).await;

    let first = alice.start_conversation("bob").await.unwrap();
    let second = alice.start_conversation("bob").await.unwrap();
    assert_eq!(first, second);

    // 对端发起也命中同一个会话
    let from_bob = bob.start_conversation("alice").await.unwrap();
    assert_eq!(first, from_bob);
    assert_eq!(gateway.document_count(collections::CONVERSATIONS).await, 1);
}

#[tokio::test]
async fn find_or_create_ignores_group_chats() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = Arc::new(MemoryGateway::new());
    seed_profile(&gateway, "alice", "Alice").await;
    seed_profile(&gateway, "bob", "Bob").await;
    // alice 和 bob 同在一个群里，不算已有两人会话
    gateway
        .seed_document(
            collections::CONVERSATIONS,
            "g1",
            json!({
                "memberIds": ["alice", "bob", "carol"],
                "lastMessage": "",
                "lastMessageTimestamp": 1_000,
                "lastMessageType": "TEXT",
                "unreadCount": 0,
                "isGroup": true,
                "groupName": "周末小组",
            }),
        )
        .await;

    let alice = connected_client("alice", &dir, &gateway, None).await;
    let chat_id = alice.start_conversation("bob").await.unwrap();

    assert_ne!(chat_id, "g1");
    assert_eq!(gateway.document_count(collections::CONVERSATIONS).await, 2);
}

// ---------------------------------------------------------------------------
// 作用域生命周期
// ---------------------------------------------------------------------------

#[tokio::test]
async fn closed_scope_stops_mirror_writes() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = Arc::new(MemoryGateway::new());
    seed_profile(&gateway, "bob", "Bob").await;
    seed_chat(&gateway, "c1", &["alice", "bob"], 1_000, "", 0).await;

    let alice = connected_client("alice", &dir, &gateway, None).await;
    let scope = alice.open_chat_list().await.unwrap();
    let mut list = scope.chat_list();
    timeout(WAIT, list.wait_for(|entries| entries.len() == 1))
        .await
        .expect("等待会话列表超时")
        .unwrap();
    assert_eq!(alice.total_unread_count().await.unwrap(), 0);

    // 关闭作用域后远端的新快照不再写进本地镜像
    drop(scope);
    seed_chat(&gateway, "c2", &["alice", "bob"], 2_000, "新会话", 5).await;
    sleep(Duration::from_millis(200)).await;
    assert_eq!(alice.total_unread_count().await.unwrap(), 0);
}

#[tokio::test]
async fn offline_open_serves_cache_and_reports_closed_stream() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = Arc::new(MemoryGateway::new());
    seed_profile(&gateway, "bob", "Bob").await;
    seed_chat(&gateway, "c1", &["alice", "bob"], 1_000, "缓存里的会话", 0).await;

    let listener = Arc::new(RecordingListener::default());
    let alice = connected_client("alice", &dir, &gateway, Some(listener.clone())).await;

    // 第一次在线打开，把会话吸进本地镜像
    {
        let scope = alice.open_chat_list().await.unwrap();
        let mut list = scope.chat_list();
        timeout(WAIT, list.wait_for(|entries| entries.len() == 1))
            .await
            .expect("等待会话列表超时")
            .unwrap();
    }

    // 断网重开：订阅建立失败，但列表仍从缓存给出
    gateway.set_online(false).await;
    let scope = alice.open_chat_list().await.unwrap();
    let mut list = scope.chat_list();
    let entries = timeout(WAIT, list.wait_for(|entries| entries.len() == 1))
        .await
        .expect("等待缓存列表超时")
        .unwrap()
        .clone();
    assert_eq!(entries[0].chat.last_message, "缓存里的会话");

    let closed = listener.closed_streams.lock().unwrap().clone();
    assert!(closed.iter().any(|(scope, _)| scope == "chat_list"));
}
