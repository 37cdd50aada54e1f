//! 用量限制：运行开始前按预估步数做一次检查，拒绝则运行不会开始

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

#[async_trait]
pub trait UsageLimiter: Send + Sync {
    /// 返回 Err(原因) 表示拒绝
    async fn check(&self, user_id: &str, estimated_steps: u32) -> Result<(), String>;
}

/// 不做限制
#[derive(Debug, Default)]
pub struct Unlimited;

#[async_trait]
impl UsageLimiter for Unlimited {
    async fn check(&self, _user_id: &str, _estimated_steps: u32) -> Result<(), String> {
        Ok(())
    }
}

/// 每用户累计步数配额：通过检查时按预估步数预留
#[derive(Debug)]
pub struct StepQuotaLimiter {
    quota: u32,
    used: Mutex<HashMap<String, u32>>,
}

impl StepQuotaLimiter {
    pub fn new(quota: u32) -> Self {
        Self {
            quota,
            used: Mutex::new(HashMap::new()),
        }
    }

    pub async fn used(&self, user_id: &str) -> u32 {
        self.used.lock().await.get(user_id).copied().unwrap_or(0)
    }

    pub async fn reset(&self, user_id: &str) {
        self.used.lock().await.remove(user_id);
    }
}

#[async_trait]
impl UsageLimiter for StepQuotaLimiter {
    async fn check(&self, user_id: &str, estimated_steps: u32) -> Result<(), String> {
        let mut used = self.used.lock().await;
        let current = used.entry(user_id.to_string()).or_insert(0);
        let requested = current.saturating_add(estimated_steps);
        if requested > self.quota {
            return Err(format!(
                "step quota exceeded for {user_id}: {current} used, {estimated_steps} requested, quota {}",
                self.quota
            ));
        }
        *current = requested;
        Ok(())
    }
}
