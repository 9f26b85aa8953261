//! Target-state convergence and guarded-commit engine.
//!
//! Drives an asynchronously rendering calendar surface to a computed target
//! day, confirms the selection actually stuck, finds exactly one bookable
//! session row and commits it at most once after a fresh re-validation.

pub mod calendar_locator;
pub mod clock;
pub mod collaborators;
pub mod config;
pub mod date_target;
pub mod date_text;
pub mod drift_detector;
pub mod engine;
pub mod guarded_commit;
pub mod navigation;
pub mod reload_awaiter;
pub mod scripted_surface;
pub mod session_matcher;

#[cfg(test)]
mod test_support;

pub use calendar_locator::{CalendarLocator, DayCellHandle, LocateOutcome, LocateStrategy};
pub use clock::{Clock, FixedClock, SystemClock};
pub use collaborators::{
    CaptureRequest, Diagnostics, OverlayDismisser, StabilizeSurface, TracingDiagnostics,
};
pub use config::{
    load_engine_config, parse_engine_config, validate_engine_config, EngineConfig, SurfaceProfile,
    WeekdayGate,
};
pub use date_target::{resolve_target_date, TargetDate, TargetDateError, TargetResolution};
pub use drift_detector::{DriftDetector, DriftVerdict, SelectionSignals};
pub use engine::{BookingEngine, RunOutcome, RunPhase, RunReport};
pub use guarded_commit::{
    CommitFailure, CommitGuardResult, CommitOutcome, CommitRung, GuardFailure, GuardedCommitter,
};
pub use navigation::{
    NavigationAttemptCounter, NavigationController, NavigationError, NavigationPhase,
    NavigationReport, StepStrategy,
};
pub use reload_awaiter::{ReloadAwaiter, ReloadObservation};
pub use scripted_surface::{
    load_schedule_fixture, parse_schedule_fixture, ScheduleFixture, ScriptedLog, ScriptedSurface,
};
pub use session_matcher::{
    DisqualifyingTerms, MatchError, MatchStats, SessionFields, SessionMatcher, SessionPredicate,
    SessionRow,
};
