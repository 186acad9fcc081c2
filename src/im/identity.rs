//! 身份边界
//!
//! 凭证与会话管理在引擎之外，这里只依赖一个能稳定给出
//! 当前用户 ID 的能力。未登录时返回 None，由调用方决定如何提示。

use std::sync::Arc;

/// 当前用户身份提供者
pub trait IdentityProvider: Send + Sync {
    /// 当前已登录用户的 ID，未登录返回 None
    fn current_user_id(&self) -> Option<String>;
}

/// 固定身份提供者，用于嵌入方直接注入已知用户
pub struct StaticIdentity {
    user_id: Option<String>,
}

impl StaticIdentity {
    /// 以已登录用户构造
    pub fn signed_in(user_id: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            user_id: Some(user_id.into()),
        })
    }

    /// 未登录状态
    pub fn signed_out() -> Arc<Self> {
        Arc::new(Self { user_id: None })
    }
}

impl IdentityProvider for StaticIdentity {
    fn current_user_id(&self) -> Option<String> {
        self.user_id.clone()
    }
}
