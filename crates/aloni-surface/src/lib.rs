//! Abstract interactive-surface contract consumed by the Aloni booking engine.
//!
//! Defines the typed element query model, click modes, surface errors and the
//! bounded polling helper, plus a live surface backed by an external
//! Playwright bridge executable.

pub mod playwright_cli_surface;
pub mod surface_contract;

pub use playwright_cli_surface::PlaywrightCliSurface;
pub use surface_contract::{
    wait_for, ClickMode, ElementHandle, QuerySpec, Surface, SurfaceError, SurfaceResult,
    WaitOutcome,
};
