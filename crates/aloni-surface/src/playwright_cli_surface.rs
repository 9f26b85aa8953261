use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::surface_contract::{
    ClickMode, ElementHandle, QuerySpec, Surface, SurfaceError, SurfaceResult,
};

const DEFAULT_OPERATION_TIMEOUT_MS: u64 = 30_000;

/// One surface operation as sent to the bridge executable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SurfaceBridgeRequest {
    pub operation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle: Option<ElementHandle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<ElementHandle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<QuerySpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribute: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<ClickMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dx: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dy: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl SurfaceBridgeRequest {
    fn new(operation: &str) -> Self {
        Self {
            operation: operation.to_string(),
            handle: None,
            scope: None,
            query: None,
            attribute: None,
            mode: None,
            dx: None,
            dy: None,
            label: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SurfaceBridgeResponse {
    pub status_code: u16,
    #[serde(default)]
    pub error_code: String,
    #[serde(default)]
    pub response_body: Value,
}

impl SurfaceBridgeResponse {
    fn into_body(self) -> SurfaceResult<Value> {
        if (200..300).contains(&self.status_code) {
            return Ok(self.response_body);
        }
        let detail = self
            .response_body
            .get("detail")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("status_code={}", self.status_code));
        Err(SurfaceError::from_code(&self.error_code, detail))
    }
}

/// Live [`Surface`] that drives a browser through an external Playwright
/// bridge. Every operation is one invocation of
/// `<cli> execute-action '<json request>'`; the bridge answers with a single
/// JSON [`SurfaceBridgeResponse`] on stdout.
#[derive(Debug)]
pub struct PlaywrightCliSurface {
    cli_path: String,
    operation_timeout: Duration,
    session_started: AtomicBool,
    session_shutdown: AtomicBool,
}

impl PlaywrightCliSurface {
    pub fn new(cli_path: impl Into<String>) -> Result<Self, SurfaceError> {
        let cli_path = cli_path.into();
        if cli_path.trim().is_empty() {
            return Err(SurfaceError::Transport(
                "surface bridge cli path cannot be empty".to_string(),
            ));
        }
        Ok(Self {
            cli_path: cli_path.trim().to_string(),
            operation_timeout: Duration::from_millis(DEFAULT_OPERATION_TIMEOUT_MS),
            session_started: AtomicBool::new(false),
            session_shutdown: AtomicBool::new(false),
        })
    }

    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    pub async fn start_session(&self) -> SurfaceResult<()> {
        if self.session_started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Err(error) = self.invoke_command("start-session", None).await {
            self.session_started.store(false, Ordering::SeqCst);
            return Err(error);
        }
        tracing::debug!(cli = %self.cli_path, "surface bridge session started");
        Ok(())
    }

    pub async fn shutdown_session(&self) -> SurfaceResult<()> {
        if !self.session_started.load(Ordering::SeqCst)
            || self.session_shutdown.swap(true, Ordering::SeqCst)
        {
            return Ok(());
        }
        self.invoke_command("shutdown-session", None).await?;
        tracing::debug!(cli = %self.cli_path, "surface bridge session shut down");
        Ok(())
    }

    /// Asks the bridge to persist a screenshot/trace under `label`.
    pub async fn capture(&self, label: &str) -> SurfaceResult<()> {
        let mut request = SurfaceBridgeRequest::new("capture");
        request.label = Some(label.to_string());
        self.execute(&request).await.map(|_| ())
    }

    async fn execute(&self, request: &SurfaceBridgeRequest) -> SurfaceResult<Value> {
        self.start_session().await?;
        let output = self
            .invoke_command("execute-action", Some(request))
            .await?;
        if output.trim().is_empty() {
            return Err(SurfaceError::MalformedResponse(format!(
                "bridge returned empty response for operation '{}'",
                request.operation
            )));
        }
        let parsed = serde_json::from_str::<SurfaceBridgeResponse>(&output).map_err(|error| {
            SurfaceError::MalformedResponse(format!("{error}: {output}"))
        })?;
        if parsed.status_code == 0 {
            return Err(SurfaceError::MalformedResponse(
                "bridge response is missing non-zero status_code".to_string(),
            ));
        }
        parsed.into_body()
    }

    async fn invoke_command(
        &self,
        subcommand: &str,
        payload: Option<&SurfaceBridgeRequest>,
    ) -> SurfaceResult<String> {
        let mut command = tokio::process::Command::new(self.cli_path.as_str());
        command.arg(subcommand).kill_on_drop(true);
        if let Some(payload) = payload {
            let encoded = serde_json::to_string(payload).map_err(|error| {
                SurfaceError::Transport(format!("serialize surface bridge request: {error}"))
            })?;
            command.arg(encoded);
        }

        let output = tokio::time::timeout(self.operation_timeout, command.output())
            .await
            .map_err(|_| {
                SurfaceError::Transport(format!(
                    "surface bridge subcommand '{subcommand}' timed out after {}ms",
                    self.operation_timeout.as_millis()
                ))
            })?
            .map_err(|error| {
                SurfaceError::Transport(format!(
                    "failed to launch surface bridge '{}': {error}",
                    self.cli_path
                ))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
            let detail = if !stderr.is_empty() {
                stderr
            } else if !stdout.is_empty() {
                stdout
            } else {
                "no output".to_string()
            };
            return Err(SurfaceError::Transport(format!(
                "surface bridge subcommand '{subcommand}' failed: {detail}"
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl Surface for PlaywrightCliSurface {
    async fn query(
        &self,
        scope: Option<&ElementHandle>,
        spec: &QuerySpec,
    ) -> SurfaceResult<Vec<ElementHandle>> {
        let mut request = SurfaceBridgeRequest::new("query");
        request.scope = scope.cloned();
        request.query = Some(spec.clone());
        let body = self.execute(&request).await?;
        let handles = body
            .get("handles")
            .cloned()
            .unwrap_or_else(|| Value::Array(Vec::new()));
        serde_json::from_value::<Vec<ElementHandle>>(handles)
            .map_err(|error| SurfaceError::MalformedResponse(format!("query handles: {error}")))
    }

    async fn read_text(&self, handle: &ElementHandle) -> SurfaceResult<String> {
        let mut request = SurfaceBridgeRequest::new("read-text");
        request.handle = Some(handle.clone());
        let body = self.execute(&request).await?;
        body.get("text")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| SurfaceError::MalformedResponse("read_text missing 'text'".to_string()))
    }

    async fn read_attribute(
        &self,
        handle: &ElementHandle,
        name: &str,
    ) -> SurfaceResult<Option<String>> {
        let mut request = SurfaceBridgeRequest::new("read-attribute");
        request.handle = Some(handle.clone());
        request.attribute = Some(name.to_string());
        let body = self.execute(&request).await?;
        match body.get("value") {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(value)) => Ok(Some(value.clone())),
            Some(other) => Err(SurfaceError::MalformedResponse(format!(
                "read_attribute value must be a string or null, got {other}"
            ))),
        }
    }

    async fn is_visible(&self, handle: &ElementHandle) -> SurfaceResult<bool> {
        let mut request = SurfaceBridgeRequest::new("is-visible");
        request.handle = Some(handle.clone());
        let body = self.execute(&request).await?;
        body.get("visible").and_then(Value::as_bool).ok_or_else(|| {
            SurfaceError::MalformedResponse("is_visible missing 'visible'".to_string())
        })
    }

    async fn click(&self, handle: &ElementHandle, mode: ClickMode) -> SurfaceResult<()> {
        let mut request = SurfaceBridgeRequest::new("click");
        request.handle = Some(handle.clone());
        request.mode = Some(mode);
        self.execute(&request).await.map(|_| ())
    }

    async fn scroll(
        &self,
        container: Option<&ElementHandle>,
        dx: i64,
        dy: i64,
    ) -> SurfaceResult<()> {
        let mut request = SurfaceBridgeRequest::new("scroll");
        request.handle = container.cloned();
        request.dx = Some(dx);
        request.dy = Some(dy);
        self.execute(&request).await.map(|_| ())
    }
}

impl Drop for PlaywrightCliSurface {
    fn drop(&mut self) {
        if !self.session_started.load(Ordering::SeqCst)
            || self.session_shutdown.swap(true, Ordering::SeqCst)
        {
            return;
        }
        let _ = std::process::Command::new(self.cli_path.as_str())
            .arg("shutdown-session")
            .output();
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::path::Path;

    use tempfile::tempdir;

    use super::{PlaywrightCliSurface, SurfaceBridgeRequest, SurfaceBridgeResponse};
    use crate::surface_contract::{ClickMode, ElementHandle, QuerySpec, Surface, SurfaceError};

    fn write_mock_bridge(path: &Path) {
        std::fs::write(
            path,
            r#"#!/bin/sh
session_file="$0.session"
case "$1" in
  start-session)
    echo active > "$session_file"
    echo '{"status":"ok"}'
    exit 0
    ;;
  shutdown-session)
    rm -f "$session_file"
    echo '{"status":"ok"}'
    exit 0
    ;;
  execute-action)
    case "$2" in
      *'"operation":"query"'*)
        echo '{"status_code":200,"response_body":{"handles":["cell-1","cell-2"]}}' ;;
      *'"operation":"read-text"'*)
        echo '{"status_code":200,"response_body":{"text":"  Wed 11 "}}' ;;
      *'"operation":"read-attribute"'*)
        echo '{"status_code":200,"response_body":{"value":null}}' ;;
      *'"operation":"is-visible"'*)
        echo '{"status_code":200,"response_body":{"visible":true}}' ;;
      *'"operation":"click"'*)
        echo '{"status_code":409,"error_code":"surface_not_interactable","response_body":{"detail":"covered by overlay"}}' ;;
      *'"operation":"scroll"'*)
        echo 'not json' ;;
      *)
        echo '{"status_code":400,"error_code":"surface_invalid_operation"}' ;;
    esac
    exit 0
    ;;
  *)
    echo "unsupported command" >&2
    exit 2
    ;;
esac
"#,
        )
        .expect("write mock bridge");
        use std::os::unix::fs::PermissionsExt;
        let mut perms = std::fs::metadata(path).expect("stat").permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(path, perms).expect("chmod");
    }

    #[test]
    fn unit_surface_rejects_empty_cli_path() {
        let error = PlaywrightCliSurface::new("   ").expect_err("empty path should fail");
        assert!(error.to_string().contains("cannot be empty"));
    }

    #[test]
    fn regression_bridge_request_uses_hyphenated_operation_names() {
        let mut request = SurfaceBridgeRequest::new("read-attribute");
        request.handle = Some(ElementHandle::new("cell-1"));
        request.attribute = Some("data-date".to_string());
        let encoded = serde_json::to_value(&request).expect("encode");
        assert_eq!(
            encoded,
            serde_json::json!({
                "operation": "read-attribute",
                "handle": "cell-1",
                "attribute": "data-date",
            })
        );
    }

    #[test]
    fn unit_bridge_response_maps_error_codes_to_surface_errors() {
        let response = SurfaceBridgeResponse {
            status_code: 410,
            error_code: "surface_stale_handle".to_string(),
            response_body: serde_json::json!({"detail": "row-7"}),
        };
        assert_eq!(
            response.into_body().expect_err("stale"),
            SurfaceError::StaleHandle("row-7".to_string())
        );
    }

    #[tokio::test]
    async fn functional_surface_round_trips_operations_through_bridge() {
        let temp = tempdir().expect("tempdir");
        let script = temp.path().join("mock-bridge.sh");
        write_mock_bridge(&script);
        let session_file = temp.path().join("mock-bridge.sh.session");

        let surface =
            PlaywrightCliSurface::new(script.to_string_lossy().to_string()).expect("surface");
        let handles = surface
            .query(None, &QuerySpec::selector("div.cal-date"))
            .await
            .expect("query");
        assert_eq!(
            handles,
            vec![ElementHandle::new("cell-1"), ElementHandle::new("cell-2")]
        );
        assert!(session_file.exists());

        let text = surface.read_text(&handles[0]).await.expect("text");
        assert_eq!(text, "  Wed 11 ");
        let first_text = surface
            .query_text(None, &QuerySpec::selector("div.cal-date"))
            .await
            .expect("query text");
        assert_eq!(first_text.as_deref(), Some("Wed 11"));
        let attribute = surface
            .read_attribute(&handles[0], "data-date")
            .await
            .expect("attribute");
        assert_eq!(attribute, None);
        assert!(surface.is_visible(&handles[0]).await.expect("visible"));

        let click_error = surface
            .click(&handles[0], ClickMode::Normal)
            .await
            .expect_err("click should be rejected");
        assert_eq!(
            click_error,
            SurfaceError::NotInteractable("covered by overlay".to_string())
        );

        let scroll_error = surface
            .scroll(None, 0, 400)
            .await
            .expect_err("malformed output");
        assert!(matches!(scroll_error, SurfaceError::MalformedResponse(_)));

        surface.shutdown_session().await.expect("shutdown");
        assert!(!session_file.exists());
    }

    #[tokio::test]
    async fn regression_drop_shuts_down_started_session() {
        let temp = tempdir().expect("tempdir");
        let script = temp.path().join("mock-bridge.sh");
        write_mock_bridge(&script);
        let session_file = temp.path().join("mock-bridge.sh.session");

        let surface =
            PlaywrightCliSurface::new(script.to_string_lossy().to_string()).expect("surface");
        surface.start_session().await.expect("start");
        assert!(session_file.exists());
        drop(surface);
        assert!(!session_file.exists());
    }

    #[tokio::test]
    async fn integration_missing_bridge_maps_to_transport_error() {
        let temp = tempdir().expect("tempdir");
        let surface = PlaywrightCliSurface::new(
            temp.path().join("absent-bridge").to_string_lossy().to_string(),
        )
        .expect("surface");
        let error = surface
            .query(None, &QuerySpec::selector("body"))
            .await
            .expect_err("missing executable");
        assert!(matches!(error, SurfaceError::Transport(_)));
        assert!(!error.is_recoverable());
    }
}
