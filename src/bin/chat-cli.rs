//! 聊天 CLI 客户端（演示版）
//!
//! 非交互式 CLI，用内存网关模拟远端，演示本地优先同步的完整链路：
//! 两个客户端各持一份 SQLite 镜像，在线互发消息、断网排队、
//! 恢复后重放补发。

use anyhow::Result;
use chat_sdk_core::im::client::{ChatClient, ClientConfig};
use chat_sdk_core::im::identity::StaticIdentity;
use chat_sdk_core::im::listener::SyncListener;
use chat_sdk_core::im::remote::{MemoryGateway, RemoteGateway};
use chat_sdk_core::im::types::collections;
use clap::Parser;
use serde_json::json;
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{info, warn};

/// 聊天 CLI 客户端
#[derive(Parser, Debug)]
#[command(name = "chat-cli")]
#[command(about = "聊天 CLI 客户端 - 演示本地优先同步链路", long_about = None)]
struct Args {
    /// 第一个用户 ID（默认: alice）
    #[arg(long, default_value = "alice")]
    user_a: String,

    /// 第二个用户 ID（默认: bob）
    #[arg(long, default_value = "bob")]
    user_b: String,

    /// 本地镜像数据库存放目录
    #[arg(long, default_value = ".")]
    db_dir: String,

    /// 演示结束后的停留时长（秒），0 表示立即退出
    #[arg(short, long, default_value = "3")]
    duration: u64,

    /// 日志级别（默认: info,chat_sdk_core=debug）
    #[arg(long, default_value = "info,chat_sdk_core=debug")]
    log_level: String,
}

/// 初始化日志（同时输出到 stdout 和文件）
fn init_logger(log_level: &str) {
    use std::fs::OpenOptions;
    use std::io;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    // 优先使用环境变量 RUST_LOG（如果设置了），否则使用命令行参数
    let filter_layer =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    // 创建日志文件（追加模式）
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open("debug.log")
        .expect("无法创建日志文件 debug.log");

    // 输出到 stdout（控制台），保留 ANSI 颜色代码用于终端显示
    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stdout)
        .with_file(true)
        .with_line_number(true)
        .with_target(false)
        .with_ansi(true);

    // 输出到文件，禁用 ANSI 颜色代码（文件不需要颜色）
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_file(true)
        .with_line_number(true)
        .with_target(false)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    info!("[CLI] 📝 日志已同时输出到控制台和文件: debug.log");
}

/// 同步事件监听器（输出所有回调）
struct CliSyncListener {
    tag: &'static str,
}

#[async_trait::async_trait]
impl SyncListener for CliSyncListener {
    async fn on_chat_snapshot_merged(&self, applied: usize, skipped: usize) {
        info!(
            "[CLI/{}] 📋 会话快照合并: 入库 {} 条, 跳过 {} 条",
            self.tag, applied, skipped
        );
    }

    async fn on_message_snapshot_merged(&self, chat_id: String, applied: usize, skipped: usize) {
        info!(
            "[CLI/{}] 💬 消息快照合并: chat={} 入库 {} 条, 跳过 {} 条",
            self.tag, chat_id, applied, skipped
        );
    }

    async fn on_message_synced(&self, message_id: String) {
        info!("[CLI/{}] ✅ 消息已同步: {}", self.tag, message_id);
    }

    async fn on_flush_failed(&self, message_id: String, reason: String) {
        warn!(
            "[CLI/{}] ⏳ 刷写失败，消息排队等待重放: {} ({})",
            self.tag, message_id, reason
        );
    }

    async fn on_replay_finished(&self, chat_id: String, flushed: usize, failed: usize) {
        info!(
            "[CLI/{}] 📤 重放完成: chat={} 成功 {} 条, 失败 {} 条",
            self.tag, chat_id, flushed, failed
        );
    }

    async fn on_stream_closed(&self, scope: String, reason: String) {
        warn!("[CLI/{}] 🔌 订阅流关闭: {} ({})", self.tag, scope, reason);
    }
}

/// 往内存网关里播种用户目录
async fn seed_users(gateway: &MemoryGateway, args: &Args) {
    gateway
        .seed_document(
            collections::USERS,
            &args.user_a,
            json!({
                "email": format!("{}@example.com", args.user_a),
                "displayName": args.user_a,
                "isOnline": true,
                "lastSeen": chrono::Utc::now().timestamp_millis(),
            }),
        )
        .await;
    gateway
        .seed_document(
            collections::USERS,
            &args.user_b,
            json!({
                "email": format!("{}@example.com", args.user_b),
                "displayName": args.user_b,
                "isOnline": true,
                "lastSeen": chrono::Utc::now().timestamp_millis(),
            }),
        )
        .await;
    info!("[CLI] 👥 用户目录已播种: {}, {}", args.user_a, args.user_b);
}

/// 创建并连接一个客户端
async fn build_client(
    user_id: &str,
    tag: &'static str,
    db_dir: &str,
    gateway: Arc<dyn RemoteGateway>,
) -> Result<ChatClient> {
    let config = ClientConfig::new(format!("sqlite://{}/chat-{}.db?mode=rwc", db_dir, user_id));
    let identity = StaticIdentity::signed_in(user_id);
    let mut client = ChatClient::new(config, gateway, identity);
    client.set_sync_listener(Arc::new(CliSyncListener { tag }));
    client.connect().await?;
    Ok(client)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 初始化日志
    init_logger(&args.log_level);

    info!("[CLI] 🚀 聊天 CLI 客户端（演示模式）");
    info!("[CLI] 👤 用户: {} 和 {}", args.user_a, args.user_b);

    // 共享的内存网关扮演远端后端
    let gateway = Arc::new(MemoryGateway::new());
    seed_users(&gateway, &args).await;

    let client_a = build_client(&args.user_a, "A", &args.db_dir, gateway.clone()).await?;
    let client_b = build_client(&args.user_b, "B", &args.db_dir, gateway.clone()).await?;

    // 用户目录
    let directory = client_a.fetch_user_directory().await?;
    info!("[CLI] 📖 {} 可见的用户目录（共 {} 个）:", args.user_a, directory.len());
    for profile in &directory {
        info!("[CLI]   - {} <{}>", profile.display_name, profile.email);
    }

    // 查找或创建两人会话
    let chat_id = client_a.start_conversation(&args.user_b).await?;
    info!("[CLI] 🆕 会话就绪: {}", chat_id);

    // 双方打开会话列表与会话作用域
    let list_scope_a = client_a.open_chat_list().await?;
    let _list_scope_b = client_b.open_chat_list().await?;
    let conv_a = client_a.open_conversation(&chat_id).await?;
    let conv_b = client_b.open_conversation(&chat_id).await?;

    // 持续打印 B 侧的实时消息视图
    let mut view_b = conv_b.messages();
    tokio::spawn(async move {
        loop {
            let messages = view_b.borrow_and_update().clone();
            if !messages.is_empty() {
                info!("[CLI/B] 💬 当前视图共 {} 条消息:", messages.len());
                for m in &messages {
                    let state = if m.sync_state.is_synced() {
                        "SYNCED"
                    } else {
                        "PENDING"
                    };
                    info!("[CLI/B]   - [{}] {}: {}", state, m.sender_id, m.content);
                }
            }
            if view_b.changed().await.is_err() {
                break;
            }
        }
    });
    sleep(Duration::from_millis(300)).await;

    // 在线发送：立即落库并刷写远端
    info!("[CLI] ── 在线发送 ──");
    client_a.send_text_message(&chat_id, "你好，这是在线发出的第一条消息").await?;
    sleep(Duration::from_millis(300)).await;

    // 断网发送：消息落库保持 PENDING
    info!("[CLI] ── 断网发送 ──");
    gateway.set_online(false).await;
    if let Some(queued) = conv_a.send_text("这条是断网期间发出的，先排队").await? {
        info!(
            "[CLI] ⏳ 断网消息已落库: {} (state={:?})",
            queued.message_id, queued.sync_state
        );
    }
    info!("[CLI] 📊 累计刷写失败次数: {}", client_a.flush_failure_count());
    sleep(Duration::from_millis(300)).await;

    // 恢复联网并重放队列
    info!("[CLI] ── 恢复联网，重放队列 ──");
    gateway.set_online(true).await;
    if let Some(report) = conv_a.replay_pending().await? {
        info!(
            "[CLI] 📤 重放报告: 扫描 {} 条, 补发成功 {} 条, 仍失败 {} 条",
            report.attempted, report.flushed, report.failed
        );
    }
    sleep(Duration::from_millis(300)).await;

    // 会话列表视图与未读聚合
    let list_a = list_scope_a.chat_list().borrow().clone();
    info!("[CLI] 📋 {} 的会话列表（共 {} 个）:", args.user_a, list_a.len());
    for entry in &list_a {
        info!(
            "[CLI]   - 与 {} | 最新: {}",
            entry.counterpart.display_name, entry.chat.last_message
        );
    }
    let unread = client_b.total_unread_count().await?;
    info!("[CLI] 📬 {} 的总未读数: {}", args.user_b, unread);
    info!("[CLI] 🌐 远端成功写入次数: {}", gateway.write_count());

    if args.duration > 0 {
        info!("[CLI] ⏰ {} 秒后自动退出", args.duration);
        sleep(Duration::from_secs(args.duration)).await;
    }
    info!("[CLI] 👋 程序退出");
    Ok(())
}
