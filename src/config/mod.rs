//! 配置：进程级 AppConfig（config/default.toml + 环境变量）与单次运行配置解析
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `WEAVER__*` 覆盖（双下划线表示嵌套，如 `WEAVER__SURFACE__BASE_URL=...`）。
//! 运行参数（步数、时间预算、审批模式等）不在此处，由 ConfigResolver 从基线与用户覆盖合并得到。

pub mod resolver;
pub mod run_config;
pub mod settings;

use std::path::PathBuf;

use serde::Deserialize;

pub use resolver::ConfigResolver;
pub use run_config::{
    validate_config, ApprovalMode, ConfigError, ConfigOverrides, FeatureOverrides, FeatureToggles,
    HistoryOverrides, HistoryRetention, RunConfig,
};
pub use settings::{InMemorySettingsStore, SettingsChanged, SettingsError, SettingsStore, TomlSettingsStore};

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub settings: SettingsSection,
    pub history: HistorySection,
    pub surface: SurfaceSection,
    pub reporter: ReporterSection,
}

/// [app] 段：应用名、数据目录
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 数据目录，未设置时用 ./data
    pub data_dir: Option<PathBuf>,
}

impl AppSection {
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| PathBuf::from("data"))
    }
}

/// [settings] 段：用户覆盖文件
#[derive(Debug, Clone, Deserialize, Default)]
pub struct SettingsSection {
    /// 未设置时为 <data_dir>/settings.toml
    pub path: Option<PathBuf>,
}

/// [history] 段：运行历史数据库
#[derive(Debug, Clone, Deserialize, Default)]
pub struct HistorySection {
    /// 未设置时为 <data_dir>/history.db
    pub db_path: Option<PathBuf>,
}

/// [surface] 段：执行面；未配置 base_url 时使用内存文档
#[derive(Debug, Clone, Deserialize)]
pub struct SurfaceSection {
    pub base_url: Option<String>,
    /// 共享令牌所在环境变量名
    #[serde(default = "default_token_env")]
    pub token_env: String,
    #[serde(default = "default_surface_timeout")]
    pub timeout_secs: u64,
}

fn default_surface_timeout() -> u64 {
    30
}

fn default_token_env() -> String {
    "WEAVER_SURFACE_TOKEN".to_string()
}

impl Default for SurfaceSection {
    fn default() -> Self {
        Self {
            base_url: None,
            token_env: default_token_env(),
            timeout_secs: default_surface_timeout(),
        }
    }
}

/// [reporter] 段：无头运行时是否自动批准
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ReporterSection {
    #[serde(default)]
    pub auto_approve: bool,
}

/// 从 config 目录加载配置，环境变量 WEAVER__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 WEAVER__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("WEAVER")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

impl AppConfig {
    pub fn settings_path(&self) -> PathBuf {
        self.settings
            .path
            .clone()
            .unwrap_or_else(|| self.app.data_dir().join("settings.toml"))
    }

    pub fn history_path(&self) -> PathBuf {
        self.history
            .db_path
            .clone()
            .unwrap_or_else(|| self.app.data_dir().join("history.db"))
    }
}
