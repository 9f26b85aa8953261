use std::sync::Arc;

use aloni_engine::{CaptureRequest, Diagnostics, TracingDiagnostics};
use aloni_surface::PlaywrightCliSurface;
use async_trait::async_trait;

/// Logs the capture request, then asks the bridge to persist a screenshot
/// and trace under the request label. Bridge failures are only logged.
pub(crate) struct BridgeDiagnostics {
    surface: Arc<PlaywrightCliSurface>,
}

impl BridgeDiagnostics {
    pub(crate) fn new(surface: Arc<PlaywrightCliSurface>) -> Self {
        Self { surface }
    }
}

#[async_trait]
impl Diagnostics for BridgeDiagnostics {
    async fn capture(&self, request: &CaptureRequest) {
        TracingDiagnostics.capture(request).await;
        if let Err(error) = self.surface.capture(&request.label).await {
            tracing::warn!(
                label = request.label.as_str(),
                error = %error,
                "surface bridge capture failed"
            );
        }
    }
}
