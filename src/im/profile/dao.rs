//! 用户资料数据访问层（DAO）

use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Pool, Row, Sqlite};
use tracing::debug;

use crate::im::db::{ChangeNotifier, Table};
use crate::im::profile::models::LocalProfile;

const PROFILE_COLUMNS: &str = r#"
    user_id,
    email,
    display_name,
    face_url,
    is_online,
    last_seen_time
"#;

/// 用户资料 DAO（基于 sqlx）
pub struct ProfileDao {
    db: Pool<Sqlite>,
    notifier: Arc<ChangeNotifier>,
}

impl ProfileDao {
    /// 创建新的用户资料 DAO
    pub fn new(db: Pool<Sqlite>, notifier: Arc<ChangeNotifier>) -> Self {
        Self { db, notifier }
    }

    fn placeholders(n: usize) -> String {
        if n == 0 {
            String::new()
        } else {
            vec!["?"; n].join(",")
        }
    }

    fn row_to_profile(row: &SqliteRow) -> LocalProfile {
        let is_online: i64 = row.get("is_online");
        LocalProfile {
            user_id: row.get("user_id"),
            email: row.get("email"),
            display_name: row.get("display_name"),
            face_url: row.get("face_url"),
            is_online: is_online != 0,
            last_seen_time: row.get("last_seen_time"),
        }
    }

    /// 获取全部本地缓存的用户资料
    pub async fn get_all_profiles(&self) -> Result<Vec<LocalProfile>> {
        let sql = format!(
            "SELECT {} FROM local_users ORDER BY user_id ASC",
            PROFILE_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .fetch_all(&self.db)
            .await
            .context("查询用户资料列表失败")?;

        let profiles: Vec<LocalProfile> = rows.iter().map(Self::row_to_profile).collect();
        debug!("[UserDAO] 获取本地用户资料，共 {} 条", profiles.len());
        Ok(profiles)
    }

    /// 按用户 ID 集合批量查询缓存
    pub async fn get_profiles_by_ids(&self, ids: &[String]) -> Result<Vec<LocalProfile>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT {} FROM local_users WHERE user_id IN ({})",
            PROFILE_COLUMNS,
            Self::placeholders(ids.len())
        );
        let mut query = sqlx::query(&sql);
        for id in ids {
            query = query.bind(id);
        }
        let rows = query
            .fetch_all(&self.db)
            .await
            .context("按 ID 查询用户资料失败")?;

        Ok(rows.iter().map(Self::row_to_profile).collect())
    }

    async fn upsert_profile_no_notify(&self, profile: &LocalProfile) -> Result<()> {
        let sql = r#"
            INSERT INTO local_users (
                user_id,
                email,
                display_name,
                face_url,
                is_online,
                last_seen_time
            ) VALUES (?,?,?,?,?,?)
            ON CONFLICT(user_id) DO UPDATE SET
                email = excluded.email,
                display_name = excluded.display_name,
                face_url = excluded.face_url,
                is_online = excluded.is_online,
                last_seen_time = excluded.last_seen_time
        "#;

        sqlx::query(sql)
            .bind(&profile.user_id)
            .bind(&profile.email)
            .bind(&profile.display_name)
            .bind(&profile.face_url)
            .bind(if profile.is_online { 1 } else { 0 })
            .bind(profile.last_seen_time)
            .execute(&self.db)
            .await
            .context("插入或更新用户资料失败")?;
        Ok(())
    }

    /// 插入或更新单条用户资料
    pub async fn upsert_profile(&self, profile: &LocalProfile) -> Result<()> {
        self.upsert_profile_no_notify(profile).await?;
        self.notifier.bump(Table::Profiles);
        Ok(())
    }

    /// 批量插入或更新用户资料
    pub async fn upsert_profiles(&self, profiles: &[LocalProfile]) -> Result<()> {
        if profiles.is_empty() {
            return Ok(());
        }
        for profile in profiles {
            self.upsert_profile_no_notify(profile).await?;
        }
        self.notifier.bump(Table::Profiles);
        debug!("[UserDAO] 批量更新 {} 条用户资料", profiles.len());
        Ok(())
    }
}
