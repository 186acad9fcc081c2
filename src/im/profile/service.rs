//! 用户资料同步器
//!
//! 资料缓存按需刷新：会话列表每次合并后刷新对端集合，
//! 用户目录在进入"发起会话"入口时一次性拉取。刷新失败不清缓存，
//! 旧资料继续服务（离线连续性）。

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::im::profile::dao::ProfileDao;
use crate::im::profile::models::LocalProfile;
use crate::im::remote::{Filter, OrderBy, RemoteDocument, RemoteGateway};
use crate::im::types::collections;

/// 用户资料同步器
pub struct ProfileSyncer {
    gateway: Arc<dyn RemoteGateway>,
    profile_dao: Arc<ProfileDao>,
}

impl ProfileSyncer {
    /// 创建新的资料同步器
    pub fn new(gateway: Arc<dyn RemoteGateway>, profile_dao: Arc<ProfileDao>) -> Self {
        Self {
            gateway,
            profile_dao,
        }
    }

    fn decode_docs(docs: &[RemoteDocument]) -> (Vec<LocalProfile>, usize) {
        let mut profiles = Vec::with_capacity(docs.len());
        let mut skipped = 0usize;
        for doc in docs {
            match LocalProfile::from_remote(doc) {
                Ok(profile) => profiles.push(profile),
                Err(e) => {
                    skipped += 1;
                    warn!("[ProfileSync] 跳过无法解码的用户资料 {}: {:#}", doc.id, e);
                }
            }
        }
        (profiles, skipped)
    }

    /// 按用户 ID 集合刷新资料缓存，返回入库条数
    pub async fn refresh_profiles(&self, ids: &[String]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let docs = self
            .gateway
            .query(collections::USERS, Filter::IdIn(ids.to_vec()), OrderBy::None)
            .await
            .context("拉取用户资料失败")?;

        let (profiles, skipped) = Self::decode_docs(&docs);
        self.profile_dao.upsert_profiles(&profiles).await?;
        debug!(
            "[ProfileSync] 刷新用户资料 {} 条，跳过 {} 条",
            profiles.len(),
            skipped
        );
        Ok(profiles.len())
    }

    /// 拉取用户目录（除指定用户外的全部用户），同时写入缓存
    ///
    /// 这是"发起新会话"的入口数据源。
    pub async fn fetch_user_directory(&self, exclude_user_id: &str) -> Result<Vec<LocalProfile>> {
        let docs = self
            .gateway
            .query(collections::USERS, Filter::All, OrderBy::None)
            .await
            .context("拉取用户目录失败")?;

        let (profiles, skipped) = Self::decode_docs(&docs);
        self.profile_dao.upsert_profiles(&profiles).await?;
        if skipped > 0 {
            debug!("[ProfileSync] 用户目录跳过 {} 条坏记录", skipped);
        }

        Ok(profiles
            .into_iter()
            .filter(|p| p.user_id != exclude_user_id)
            .collect())
    }
}
