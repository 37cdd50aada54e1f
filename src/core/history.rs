//! 运行历史（SQLite）
//!
//! 每个结束的运行写入一行：目标、用户、解析后的配置、结果报告与完成时间。
//! 按条数（先删最旧）与时长两种方式清理。

use std::path::Path;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::RunConfig;
use crate::core::RunReport;

#[derive(Error, Debug)]
pub enum HistoryError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("history io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("history serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// 一条历史记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub run_id: String,
    pub goal: String,
    pub user_id: String,
    pub config: RunConfig,
    pub report: RunReport,
    pub completed_at: DateTime<Utc>,
}

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS runs (
    id TEXT PRIMARY KEY,
    goal TEXT NOT NULL,
    user_id TEXT NOT NULL,
    config_json TEXT NOT NULL,
    result_json TEXT NOT NULL,
    completed_at_ms INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_runs_completed ON runs(completed_at_ms);";

pub struct RunHistory {
    conn: Mutex<Connection>,
}

impl RunHistory {
    /// 打开（或创建）数据库文件；父目录不存在时自动创建
    pub fn open(path: impl AsRef<Path>) -> Result<Self, HistoryError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Self::with_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, HistoryError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, HistoryError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn record(&self, entry: &HistoryEntry) -> Result<(), HistoryError> {
        let config_json = serde_json::to_string(&entry.config)?;
        let result_json = serde_json::to_string(&entry.report)?;
        self.lock().execute(
            "INSERT OR REPLACE INTO runs (id, goal, user_id, config_json, result_json, completed_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                entry.run_id,
                entry.goal,
                entry.user_id,
                config_json,
                result_json,
                entry.completed_at.timestamp_millis()
            ],
        )?;
        Ok(())
    }

    /// 最近的 `limit` 条记录，新的在前
    pub fn recent(&self, limit: usize) -> Result<Vec<HistoryEntry>, HistoryError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, goal, user_id, config_json, result_json, completed_at_ms
             FROM runs ORDER BY completed_at_ms DESC, rowid DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, i64>(5)?,
            ))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (run_id, goal, user_id, config_json, result_json, completed_at_ms) = row?;
            entries.push(HistoryEntry {
                run_id,
                goal,
                user_id,
                config: serde_json::from_str(&config_json)?,
                report: serde_json::from_str(&result_json)?,
                completed_at: Utc
                    .timestamp_millis_opt(completed_at_ms)
                    .single()
                    .unwrap_or_default(),
            });
        }
        Ok(entries)
    }

    pub fn count(&self) -> Result<usize, HistoryError> {
        let n: i64 = self
            .lock()
            .query_row("SELECT COUNT(*) FROM runs", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    /// 只保留最新的 `max` 条；返回删除条数
    pub fn trim_to(&self, max: usize) -> Result<usize, HistoryError> {
        let removed = self.lock().execute(
            "DELETE FROM runs WHERE id NOT IN (
                SELECT id FROM runs ORDER BY completed_at_ms DESC, rowid DESC LIMIT ?1
            )",
            params![max as i64],
        )?;
        Ok(removed)
    }

    /// 删除早于 `max_age` 的记录；返回删除条数
    pub fn prune_older_than(&self, max_age: chrono::Duration) -> Result<usize, HistoryError> {
        let cutoff = (Utc::now() - max_age).timestamp_millis();
        let removed = self
            .lock()
            .execute("DELETE FROM runs WHERE completed_at_ms < ?1", params![cutoff])?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{RunStatus, StopReason};

    fn entry(id: &str, completed_at: DateTime<Utc>) -> HistoryEntry {
        HistoryEntry {
            run_id: id.to_string(),
            goal: "create a wall".into(),
            user_id: "u1".into(),
            config: RunConfig::default(),
            report: RunReport {
                run_id: id.to_string(),
                goal: "create a wall".into(),
                status: RunStatus::Completed,
                reason: StopReason::PlanComplete,
                steps: 1,
                replans: 0,
                duration_ms: 12,
                plan: None,
            },
            completed_at,
        }
    }

    #[test]
    fn test_record_and_recent() {
        let history = RunHistory::open_in_memory().unwrap();
        let now = Utc::now();
        history.record(&entry("run_1", now - chrono::Duration::minutes(2))).unwrap();
        history.record(&entry("run_2", now)).unwrap();

        let recent = history.recent(10).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].run_id, "run_2");
        assert_eq!(recent[0].report.status, RunStatus::Completed);
        assert_eq!(recent[0].config.max_steps, 12);
    }

    #[test]
    fn test_trim_removes_oldest() {
        let history = RunHistory::open_in_memory().unwrap();
        let now = Utc::now();
        for i in 0..5 {
            history
                .record(&entry(&format!("run_{i}"), now + chrono::Duration::seconds(i)))
                .unwrap();
        }
        assert_eq!(history.trim_to(3).unwrap(), 2);
        let ids: Vec<String> = history.recent(10).unwrap().into_iter().map(|e| e.run_id).collect();
        assert_eq!(ids, vec!["run_4", "run_3", "run_2"]);
    }

    #[test]
    fn test_prune_by_age() {
        let history = RunHistory::open_in_memory().unwrap();
        let now = Utc::now();
        history.record(&entry("old", now - chrono::Duration::days(40))).unwrap();
        history.record(&entry("fresh", now)).unwrap();
        assert_eq!(history.prune_older_than(chrono::Duration::days(30)).unwrap(), 1);
        assert_eq!(history.count().unwrap(), 1);
    }

    #[test]
    fn test_open_file_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("history.db");
        {
            let history = RunHistory::open(&path).unwrap();
            history.record(&entry("run_1", Utc::now())).unwrap();
        }
        let reopened = RunHistory::open(&path).unwrap();
        assert_eq!(reopened.count().unwrap(), 1);
    }
}
