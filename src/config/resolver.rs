//! 配置解析器：基线 + 用户覆盖（缓存）+ 单次运行覆盖

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::config::{
    validate_config, ConfigError, ConfigOverrides, RunConfig, SettingsError, SettingsStore,
};

pub struct ConfigResolver {
    store: Arc<dyn SettingsStore>,
    cache: Mutex<Option<Arc<RunConfig>>>,
}

impl ConfigResolver {
    pub fn new(store: Arc<dyn SettingsStore>) -> Self {
        Self {
            store,
            cache: Mutex::new(None),
        }
    }

    /// 硬编码基线
    pub fn get_defaults(&self) -> RunConfig {
        RunConfig::default()
    }

    /// 基线 + 持久化覆盖；结果缓存到下一次 invalidate。
    /// 覆盖读取失败或越界时记录警告并退回基线，不影响运行启动。
    pub fn get_effective_defaults(&self) -> Arc<RunConfig> {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(cfg) = cache.as_ref() {
            return Arc::clone(cfg);
        }

        let baseline = self.get_defaults();
        let effective = match self.store.load() {
            Ok(overrides) => match baseline
                .merged(&overrides)
                .and_then(|cfg| validate_config(&cfg).map(|_| cfg))
            {
                Ok(cfg) => cfg,
                Err(e) => {
                    tracing::warn!("Persisted overrides rejected ({}), using defaults", e);
                    baseline
                }
            },
            Err(e) => {
                tracing::warn!("Settings load failed ({}), using defaults", e);
                baseline
            }
        };

        let effective = Arc::new(effective);
        *cache = Some(Arc::clone(&effective));
        effective
    }

    /// 在有效默认值上叠加单次运行覆盖并校验
    pub fn with_overrides(&self, overrides: &ConfigOverrides) -> Result<Arc<RunConfig>, ConfigError> {
        let base = self.get_effective_defaults();
        if overrides.is_empty() {
            return Ok(base);
        }
        let cfg = base.merged(overrides)?;
        validate_config(&cfg)?;
        Ok(Arc::new(cfg))
    }

    pub fn validate_config(&self, config: &RunConfig) -> Result<(), ConfigError> {
        validate_config(config)
    }

    /// 将 `overrides` 叠加到已持久化的覆盖上，校验后保存并失效缓存
    pub fn update_defaults(&self, overrides: &ConfigOverrides) -> Result<Arc<RunConfig>, SettingsError> {
        let persisted = self.store.load()?;
        let combined = persisted.layered(overrides);
        let candidate = self.get_defaults().merged(&combined)?;
        validate_config(&candidate)?;
        self.store.save(&combined)?;
        self.invalidate();
        Ok(self.get_effective_defaults())
    }

    /// 清除所有持久化覆盖
    pub fn reset_to_defaults(&self) -> Result<(), SettingsError> {
        self.store.save(&ConfigOverrides::default())?;
        self.invalidate();
        Ok(())
    }

    pub fn invalidate(&self) {
        *self.cache.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// 后台监听设置变更并失效缓存；存储关闭时任务结束
    pub fn watch_settings(self: &Arc<Self>) -> JoinHandle<()> {
        let mut rx = self.store.subscribe();
        let resolver = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(_) | Err(RecvError::Lagged(_)) => {
                        tracing::debug!("settings changed, invalidating config cache");
                        resolver.invalidate();
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ApprovalMode, InMemorySettingsStore};

    fn resolver_with(initial: ConfigOverrides) -> (Arc<InMemorySettingsStore>, ConfigResolver) {
        let store = Arc::new(InMemorySettingsStore::new(initial));
        let resolver = ConfigResolver::new(store.clone());
        (store, resolver)
    }

    #[test]
    fn test_effective_defaults_apply_persisted() {
        let (_, resolver) = resolver_with(ConfigOverrides {
            max_steps: Some(40),
            ..Default::default()
        });
        let cfg = resolver.get_effective_defaults();
        assert_eq!(cfg.max_steps, 40);
        assert_eq!(cfg.max_duration_ms, resolver.get_defaults().max_duration_ms);
    }

    #[test]
    fn test_effective_defaults_cached_until_invalidated() {
        let (store, resolver) = resolver_with(ConfigOverrides::default());
        assert_eq!(resolver.get_effective_defaults().max_steps, 12);

        // 直接写存储但不失效：仍返回缓存值
        *store.overrides.lock().unwrap() = ConfigOverrides {
            max_steps: Some(7),
            ..Default::default()
        };
        assert_eq!(resolver.get_effective_defaults().max_steps, 12);

        resolver.invalidate();
        assert_eq!(resolver.get_effective_defaults().max_steps, 7);
    }

    #[test]
    fn test_invalid_persisted_falls_back_to_baseline() {
        let (_, resolver) = resolver_with(ConfigOverrides {
            max_steps: Some(500),
            ..Default::default()
        });
        assert_eq!(*resolver.get_effective_defaults(), RunConfig::default());
    }

    #[test]
    fn test_with_overrides_validates_and_does_not_touch_defaults() {
        let (_, resolver) = resolver_with(ConfigOverrides::default());
        let cfg = resolver
            .with_overrides(&ConfigOverrides {
                approval_mode: Some("always".into()),
                max_steps: Some(3),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(cfg.approval_mode, ApprovalMode::Always);
        assert_eq!(cfg.max_steps, 3);
        assert_eq!(resolver.get_effective_defaults().max_steps, 12);

        let err = resolver
            .with_overrides(&ConfigOverrides {
                max_duration_ms: Some(999),
                ..Default::default()
            })
            .unwrap_err();
        assert_eq!(err, ConfigError::TimeBudgetOutOfRange(999));
    }

    #[test]
    fn test_update_and_reset_defaults() {
        let (_, resolver) = resolver_with(ConfigOverrides::default());
        let cfg = resolver
            .update_defaults(&ConfigOverrides {
                max_steps: Some(25),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(cfg.max_steps, 25);

        let cfg = resolver
            .update_defaults(&ConfigOverrides {
                approval_mode: Some("never".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(cfg.max_steps, 25);
        assert_eq!(cfg.approval_mode, ApprovalMode::Never);

        resolver.reset_to_defaults().unwrap();
        assert_eq!(*resolver.get_effective_defaults(), RunConfig::default());
    }

    #[test]
    fn test_update_defaults_rejects_invalid() {
        let (store, resolver) = resolver_with(ConfigOverrides::default());
        let err = resolver
            .update_defaults(&ConfigOverrides {
                max_steps: Some(0),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, SettingsError::Invalid(_)));
        assert!(store.load().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_watch_settings_invalidates_cache() {
        let (store, resolver) = resolver_with(ConfigOverrides::default());
        let resolver = Arc::new(resolver);
        let _watcher = resolver.watch_settings();
        assert_eq!(resolver.get_effective_defaults().max_steps, 12);

        store
            .save(&ConfigOverrides {
                max_steps: Some(9),
                ..Default::default()
            })
            .unwrap();

        let mut observed = 0;
        for _ in 0..50 {
            observed = resolver.get_effective_defaults().max_steps;
            if observed == 9 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(observed, 9);
    }
}
