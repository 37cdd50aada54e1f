//! HTTP 执行面：把工具调用转发到设计文档服务
//!
//! - `POST {base}/api/tools/{name}`，请求头 `X-TW-Token` 携带共享令牌，请求体为参数 JSON
//! - HTTP >= 400 映射为 `{ok: false, error: {code: "E_HTTP", title: <status>, hint: <body>}}`
//! - 对象列表：`GET {base}/api/objects`，恢复：`PUT {base}/api/objects`

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::tools::{ExecutionSurface, SurfaceError, SurfaceResult};

const TOKEN_HEADER: &str = "X-TW-Token";

pub struct HttpSurface {
    client: reqwest::Client,
    base_url: String,
    token: String,
    operations: Vec<String>,
}

impl HttpSurface {
    pub fn new(
        base_url: impl Into<String>,
        token: impl Into<String>,
        operations: Vec<String>,
        timeout_secs: u64,
    ) -> Result<Self, SurfaceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            operations,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

/// 将 HTTP 状态与响应体映射为操作结果
pub(crate) fn map_response(status: u16, body: &str) -> SurfaceResult {
    if status >= 400 {
        return SurfaceResult::failure("E_HTTP", status.to_string(), Some(body.to_string()));
    }
    match serde_json::from_str::<SurfaceResult>(body) {
        Ok(result) => result,
        Err(_) => match serde_json::from_str::<Value>(body) {
            // 服务端未返回 ok 字段：按成功处理，字段原样保留
            Ok(Value::Object(fields)) => SurfaceResult::success(fields),
            _ => SurfaceResult::failure(
                "E_BAD_RESPONSE",
                "surface returned a non-object body",
                Some(body.chars().take(200).collect()),
            ),
        },
    }
}

#[async_trait]
impl ExecutionSurface for HttpSurface {
    fn operations(&self) -> Vec<String> {
        self.operations.clone()
    }

    async fn invoke(&self, name: &str, args: Value) -> SurfaceResult {
        let response = self
            .client
            .post(self.url(&format!("/api/tools/{name}")))
            .header(TOKEN_HEADER, &self.token)
            .json(&args)
            .send()
            .await;
        match response {
            Ok(resp) => {
                let status = resp.status().as_u16();
                let body = resp.text().await.unwrap_or_default();
                map_response(status, &body)
            }
            Err(e) => SurfaceResult::failure("E_TRANSPORT", e.to_string(), None),
        }
    }

    async fn list_objects(&self) -> Result<Vec<Value>, SurfaceError> {
        let resp = self
            .client
            .get(self.url("/api/objects"))
            .header(TOKEN_HEADER, &self.token)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(SurfaceError::Status {
                status: status.as_u16(),
                body: resp.text().await.unwrap_or_default(),
            });
        }
        Ok(resp.json::<Vec<Value>>().await?)
    }

    async fn restore_objects(&self, objects: Vec<Value>) -> Result<(), SurfaceError> {
        let resp = self
            .client
            .put(self.url("/api/objects"))
            .header(TOKEN_HEADER, &self.token)
            .json(&objects)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(SurfaceError::Status {
                status: status.as_u16(),
                body: resp.text().await.unwrap_or_default(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_http_error() {
        let r = map_response(403, "Forbidden: bad token");
        assert!(!r.ok);
        assert_eq!(r.error_message(), "E_HTTP: 403 (Forbidden: bad token)");
    }

    #[test]
    fn test_map_body_shapes() {
        assert!(map_response(200, r#"{"ok": true, "id": "w1"}"#).ok);
        assert!(!map_response(200, r#"{"ok": false, "error": "nope"}"#).ok);
        let bare = map_response(200, r#"{"id": "w1"}"#);
        assert!(bare.ok);
        assert_eq!(bare.fields["id"], "w1");
        assert_eq!(
            map_response(200, "<html>").error_message(),
            "E_BAD_RESPONSE: surface returned a non-object body (<html>)"
        );
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let s = HttpSurface::new("http://127.0.0.1:8080/", "t", vec![], 5).unwrap();
        assert_eq!(s.url("/api/objects"), "http://127.0.0.1:8080/api/objects");
    }
}
