use std::time::Duration;

use aloni_surface::{QuerySpec, Surface, SurfaceResult};

use crate::config::{ReloadConfig, SurfaceProfile};

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReloadObservation {
    /// The list went blank and then repopulated inside the window.
    pub observed_reload: bool,
    pub polls: usize,
}

/// Detects the "result list empties, then repopulates" signature that marks
/// the end of an asynchronous refresh. A timeout is a normal outcome: some
/// navigations never trigger a reload.
pub struct ReloadAwaiter<'a, S: Surface + ?Sized> {
    surface: &'a S,
    profile: &'a SurfaceProfile,
    config: &'a ReloadConfig,
}

impl<'a, S: Surface + ?Sized> ReloadAwaiter<'a, S> {
    pub fn new(surface: &'a S, profile: &'a SurfaceProfile, config: &'a ReloadConfig) -> Self {
        Self {
            surface,
            profile,
            config,
        }
    }

    pub async fn await_reload(&self) -> SurfaceResult<ReloadObservation> {
        self.await_reload_within(self.config.timeout()).await
    }

    pub async fn await_reload_within(&self, timeout: Duration) -> SurfaceResult<ReloadObservation> {
        let deadline = tokio::time::Instant::now() + timeout;
        let poll_interval = self.config.poll_interval().max(MIN_POLL_INTERVAL);
        let mut saw_blank = false;
        let mut polls = 0usize;
        loop {
            polls += 1;
            let populated = self.list_populated().await?;
            if !populated {
                saw_blank = true;
            } else if saw_blank {
                tracing::debug!(polls, "result list reloaded");
                return Ok(ReloadObservation {
                    observed_reload: true,
                    polls,
                });
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                tracing::debug!(polls, saw_blank, "no reload observed before timeout");
                return Ok(ReloadObservation {
                    observed_reload: false,
                    polls,
                });
            }
            tokio::time::sleep(poll_interval.min(deadline - now)).await;
        }
    }

    async fn list_populated(&self) -> SurfaceResult<bool> {
        let list_spec = QuerySpec::selector(self.profile.result_list.as_str());
        let Some(list) = self.surface.query_first(None, &list_spec).await? else {
            return Ok(false);
        };
        match self.surface.is_visible(&list).await {
            Ok(true) => {}
            Ok(false) => return Ok(false),
            Err(error) if error.is_recoverable() => return Ok(false),
            Err(error) => return Err(error),
        }
        let rows = self
            .surface
            .query(Some(&list), &QuerySpec::selector(self.profile.row.as_str()))
            .await;
        match rows {
            Ok(rows) => Ok(!rows.is_empty()),
            Err(error) if error.is_recoverable() => Ok(false),
            Err(error) => Err(error),
        }
    }
}
