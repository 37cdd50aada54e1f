//! 用户设置存储：持久化的配置覆盖 + 变更通知
//!
//! ConfigResolver 订阅变更通知以失效缓存；TomlSettingsStore 写入 settings.toml，InMemorySettingsStore 用于测试与无盘运行。

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use thiserror::Error;
use tokio::sync::broadcast;

use crate::config::{ConfigError, ConfigOverrides};

/// 设置读写错误
#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("settings io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("settings parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("settings serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid settings: {0}")]
    Invalid(#[from] ConfigError),
}

/// 设置变更通知（不携带内容，订阅方自行重新加载）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettingsChanged;

/// 设置存储：加载 / 保存用户覆盖，并广播变更
pub trait SettingsStore: Send + Sync {
    fn load(&self) -> Result<ConfigOverrides, SettingsError>;

    fn save(&self, overrides: &ConfigOverrides) -> Result<(), SettingsError>;

    fn subscribe(&self) -> broadcast::Receiver<SettingsChanged>;
}

/// 内存设置存储
pub struct InMemorySettingsStore {
    pub(crate) overrides: Mutex<ConfigOverrides>,
    changed_tx: broadcast::Sender<SettingsChanged>,
}

impl InMemorySettingsStore {
    pub fn new(initial: ConfigOverrides) -> Self {
        let (changed_tx, _) = broadcast::channel(16);
        Self {
            overrides: Mutex::new(initial),
            changed_tx,
        }
    }
}

impl Default for InMemorySettingsStore {
    fn default() -> Self {
        Self::new(ConfigOverrides::default())
    }
}

impl SettingsStore for InMemorySettingsStore {
    fn load(&self) -> Result<ConfigOverrides, SettingsError> {
        Ok(self
            .overrides
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn save(&self, overrides: &ConfigOverrides) -> Result<(), SettingsError> {
        *self.overrides.lock().unwrap_or_else(PoisonError::into_inner) = overrides.clone();
        let _ = self.changed_tx.send(SettingsChanged);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<SettingsChanged> {
        self.changed_tx.subscribe()
    }
}

/// TOML 文件设置存储；文件不存在时视为无覆盖
pub struct TomlSettingsStore {
    path: PathBuf,
    changed_tx: broadcast::Sender<SettingsChanged>,
}

impl TomlSettingsStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        let (changed_tx, _) = broadcast::channel(16);
        Self {
            path: path.as_ref().to_path_buf(),
            changed_tx,
        }
    }

    /// 文件被外部修改时由调用方触发（如文件监听、管理接口）
    pub fn notify_changed(&self) {
        let _ = self.changed_tx.send(SettingsChanged);
    }
}

impl SettingsStore for TomlSettingsStore {
    fn load(&self) -> Result<ConfigOverrides, SettingsError> {
        if !self.path.exists() {
            return Ok(ConfigOverrides::default());
        }
        let data = std::fs::read_to_string(&self.path)?;
        Ok(toml::from_str(&data)?)
    }

    fn save(&self, overrides: &ConfigOverrides) -> Result<(), SettingsError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, toml::to_string_pretty(overrides)?)?;
        tracing::info!(path = %self.path.display(), "settings saved");
        self.notify_changed();
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<SettingsChanged> {
        self.changed_tx.subscribe()
    }
}
