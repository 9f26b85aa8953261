//! Side collaborators invoked at phase boundaries: overlay cleanup and
//! failure diagnostics. Neither may change the run's outcome.

use aloni_surface::{ClickMode, QuerySpec, Surface, SurfaceResult};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::config::SurfaceProfile;

/// Removes transient overlays that would intercept input.
#[async_trait]
pub trait StabilizeSurface: Send + Sync {
    /// Returns how many overlays were dismissed.
    async fn stabilize(&self, surface: &dyn Surface) -> SurfaceResult<usize>;
}

/// Clicks every visible close control from the profile's overlay list.
#[derive(Debug, Clone, Default)]
pub struct OverlayDismisser {
    close_selectors: Vec<String>,
}

impl OverlayDismisser {
    pub fn new(close_selectors: Vec<String>) -> Self {
        Self { close_selectors }
    }

    pub fn from_profile(profile: &SurfaceProfile) -> Self {
        Self::new(profile.overlay_close.clone())
    }
}

#[async_trait]
impl StabilizeSurface for OverlayDismisser {
    async fn stabilize(&self, surface: &dyn Surface) -> SurfaceResult<usize> {
        let mut dismissed = 0usize;
        for selector in &self.close_selectors {
            if selector.trim().is_empty() {
                continue;
            }
            for control in surface
                .query(None, &QuerySpec::selector(selector.as_str()))
                .await?
            {
                match surface.is_visible(&control).await {
                    Ok(true) => {}
                    Ok(false) => continue,
                    Err(error) if error.is_recoverable() => continue,
                    Err(error) => return Err(error),
                }
                match surface.click(&control, ClickMode::Normal).await {
                    Ok(()) => {
                        dismissed += 1;
                        tracing::debug!(selector = selector.as_str(), "dismissed overlay");
                    }
                    Err(error) if error.is_recoverable() => {
                        tracing::debug!(
                            selector = selector.as_str(),
                            error = %error,
                            "overlay close control not clickable"
                        );
                    }
                    Err(error) => return Err(error),
                }
            }
        }
        Ok(dismissed)
    }
}

/// One failure capture, emitted at most once per run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureRequest {
    pub label: String,
    pub phase: String,
    pub target_date: Option<NaiveDate>,
    pub reason: String,
}

#[async_trait]
pub trait Diagnostics: Send + Sync {
    async fn capture(&self, request: &CaptureRequest);
}

/// Writes the capture request to the log and nothing else.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingDiagnostics;

#[async_trait]
impl Diagnostics for TracingDiagnostics {
    async fn capture(&self, request: &CaptureRequest) {
        tracing::error!(
            label = request.label.as_str(),
            phase = request.phase.as_str(),
            target_date = ?request.target_date,
            reason = request.reason.as_str(),
            "run failed; diagnostics captured"
        );
    }
}

#[cfg(test)]
mod tests {
    use aloni_surface::{ClickMode, Surface};

    use super::{OverlayDismisser, StabilizeSurface};
    use crate::config::SurfaceProfile;
    use crate::test_support::StaticSurface;

    #[tokio::test]
    async fn functional_overlay_dismisser_clicks_each_close_control() {
        let profile = SurfaceProfile::default();
        let surface = StaticSurface::default();
        surface.add(&profile.overlay_close[0], "promo-close", "Close", &[]);
        surface.add(&profile.overlay_close[1], "cookie-close", "", &[]);
        surface.reject_normal_clicks("cookie-close");

        let dismisser = OverlayDismisser::from_profile(&profile);
        let dismissed = dismisser
            .stabilize(&surface as &dyn Surface)
            .await
            .expect("stabilize");
        assert_eq!(dismissed, 1);
        assert_eq!(
            surface.clicks(),
            vec![("promo-close".to_string(), ClickMode::Normal)]
        );
    }

    #[tokio::test]
    async fn unit_overlay_dismisser_without_overlays_is_a_no_op() {
        let surface = StaticSurface::default();
        let dismisser = OverlayDismisser::new(vec![String::new()]);
        assert_eq!(
            dismisser
                .stabilize(&surface as &dyn Surface)
                .await
                .expect("stabilize"),
            0
        );
        assert!(surface.clicks().is_empty());
    }
}
