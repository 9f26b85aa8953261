use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const SURFACE_ERROR_STALE_HANDLE: &str = "surface_stale_handle";
pub const SURFACE_ERROR_NOT_INTERACTABLE: &str = "surface_not_interactable";
pub const SURFACE_ERROR_TRANSPORT: &str = "surface_transport";
pub const SURFACE_ERROR_MALFORMED_RESPONSE: &str = "surface_malformed_response";

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Opaque reference to an element materialized by the surface.
///
/// Handles are only meaningful until the next navigation action or list
/// re-render; a backend may answer any later use with
/// [`SurfaceError::StaleHandle`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ElementHandle(String);

impl ElementHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn id(&self) -> &str {
        self.0.as_str()
    }
}

impl std::fmt::Display for ElementHandle {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.0.as_str())
    }
}

/// Typed element query. `selector` is a backend-native selector taken from
/// the surface profile; the remaining fields narrow the match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QuerySpec {
    /// Every element matching the selector, in document order.
    Selector { selector: String },
    /// Elements whose attribute `name` equals `value` exactly.
    Attribute {
        selector: String,
        name: String,
        value: String,
    },
    /// Elements whose label attribute contains every token, case-insensitively.
    Label {
        selector: String,
        attribute: String,
        tokens: Vec<String>,
    },
    /// Elements whose rendered text contains `text`, case-insensitively.
    Text { selector: String, text: String },
}

impl QuerySpec {
    pub fn selector(selector: impl Into<String>) -> Self {
        Self::Selector {
            selector: selector.into(),
        }
    }

    pub fn attribute(
        selector: impl Into<String>,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self::Attribute {
            selector: selector.into(),
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn label(
        selector: impl Into<String>,
        attribute: impl Into<String>,
        tokens: Vec<String>,
    ) -> Self {
        Self::Label {
            selector: selector.into(),
            attribute: attribute.into(),
            tokens,
        }
    }

    pub fn text(selector: impl Into<String>, text: impl Into<String>) -> Self {
        Self::Text {
            selector: selector.into(),
            text: text.into(),
        }
    }

    pub fn selector_str(&self) -> &str {
        match self {
            Self::Selector { selector }
            | Self::Attribute { selector, .. }
            | Self::Label { selector, .. }
            | Self::Text { selector, .. } => selector.as_str(),
        }
    }
}

/// How a click is delivered, from least to most forceful.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClickMode {
    /// Regular click honoring interactability checks.
    Normal,
    /// Click that bypasses visibility/enabled/obscured checks.
    Forced,
    /// Pointer down/up dispatched at the element's visual center.
    PointerAtCenter,
    /// pointerenter, pointerdown, pointerup, click dispatched as synthetic events.
    SyntheticEvents,
}

impl ClickMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Forced => "forced",
            Self::PointerAtCenter => "pointer_at_center",
            Self::SyntheticEvents => "synthetic_events",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SurfaceError {
    #[error("element handle '{0}' is stale")]
    StaleHandle(String),
    #[error("element '{0}' is not interactable")]
    NotInteractable(String),
    #[error("surface transport failure: {0}")]
    Transport(String),
    #[error("surface returned a malformed response: {0}")]
    MalformedResponse(String),
}

impl SurfaceError {
    /// Stale and non-interactable elements are expected while the surface
    /// re-renders; everything else means the session itself is unusable.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::StaleHandle(_) | Self::NotInteractable(_))
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::StaleHandle(_) => SURFACE_ERROR_STALE_HANDLE,
            Self::NotInteractable(_) => SURFACE_ERROR_NOT_INTERACTABLE,
            Self::Transport(_) => SURFACE_ERROR_TRANSPORT,
            Self::MalformedResponse(_) => SURFACE_ERROR_MALFORMED_RESPONSE,
        }
    }

    pub fn from_code(code: &str, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        match code.trim() {
            SURFACE_ERROR_STALE_HANDLE => Self::StaleHandle(detail),
            SURFACE_ERROR_NOT_INTERACTABLE => Self::NotInteractable(detail),
            SURFACE_ERROR_MALFORMED_RESPONSE => Self::MalformedResponse(detail),
            _ => Self::Transport(detail),
        }
    }
}

pub type SurfaceResult<T> = Result<T, SurfaceError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Settled,
    TimedOut,
}

/// Capability set the engine consumes from an asynchronously rendering view.
///
/// `query` never fails for "nothing matched"; it returns an empty list and
/// reserves errors for transport-level problems.
#[async_trait]
pub trait Surface: Send + Sync {
    async fn query(
        &self,
        scope: Option<&ElementHandle>,
        spec: &QuerySpec,
    ) -> SurfaceResult<Vec<ElementHandle>>;

    async fn read_text(&self, handle: &ElementHandle) -> SurfaceResult<String>;

    async fn read_attribute(
        &self,
        handle: &ElementHandle,
        name: &str,
    ) -> SurfaceResult<Option<String>>;

    async fn is_visible(&self, handle: &ElementHandle) -> SurfaceResult<bool>;

    async fn click(&self, handle: &ElementHandle, mode: ClickMode) -> SurfaceResult<()>;

    async fn scroll(&self, container: Option<&ElementHandle>, dx: i64, dy: i64)
        -> SurfaceResult<()>;

    async fn query_first(
        &self,
        scope: Option<&ElementHandle>,
        spec: &QuerySpec,
    ) -> SurfaceResult<Option<ElementHandle>> {
        Ok(self.query(scope, spec).await?.into_iter().next())
    }

    /// Trimmed text of the first match, `None` when nothing matched.
    async fn query_text(
        &self,
        scope: Option<&ElementHandle>,
        spec: &QuerySpec,
    ) -> SurfaceResult<Option<String>> {
        match self.query_first(scope, spec).await? {
            Some(handle) => Ok(Some(self.read_text(&handle).await?.trim().to_string())),
            None => Ok(None),
        }
    }
}

/// Polls `predicate` until it reports true or `timeout` elapses.
///
/// The predicate always runs at least once, so a zero timeout performs a
/// single check. Surface errors from the predicate abort the wait.
pub async fn wait_for<F, Fut>(
    timeout: Duration,
    poll_interval: Duration,
    mut predicate: F,
) -> SurfaceResult<WaitOutcome>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = SurfaceResult<bool>>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if predicate().await? {
            return Ok(WaitOutcome::Settled);
        }
        let now = tokio::time::Instant::now();
        if now >= deadline {
            return Ok(WaitOutcome::TimedOut);
        }
        let pause = poll_interval.max(MIN_POLL_INTERVAL).min(deadline - now);
        tokio::time::sleep(pause).await;
    }
}
