//! Deterministic in-memory schedule view.
//!
//! `ScriptedSurface` renders a week-strip calendar and a virtualized session
//! list from a JSON fixture and reacts to clicks and scrolls the way the live
//! schedule page does: selections trigger a blank-then-repopulate reload, the
//! selection can snap back to today, and commit clicks raise either a success
//! indicator or a destructive confirmation dialog. Every interaction is
//! recorded in a [`ScriptedLog`] so scenarios can assert on side effects.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use aloni_surface::{ClickMode, ElementHandle, QuerySpec, Surface, SurfaceError, SurfaceResult};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::config::SurfaceProfile;

pub const SCHEDULE_FIXTURE_SCHEMA_VERSION: u32 = 1;

const DESTRUCTIVE_OPTION_SELECTOR: &str = "button:has-text('Cancel booking')";

fn schedule_fixture_schema_version() -> u32 {
    SCHEDULE_FIXTURE_SCHEMA_VERSION
}

fn default_window_days() -> usize {
    7
}

fn default_cta() -> String {
    "Book".to_string()
}

fn default_true() -> bool {
    true
}

fn default_reload_blank_polls() -> usize {
    2
}

fn default_cell_width_px() -> i64 {
    60
}

fn default_row_height_px() -> i64 {
    100
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScheduledSession {
    pub time: String,
    pub location: String,
    pub category: String,
    #[serde(default)]
    pub status: String,
    #[serde(default = "default_cta")]
    pub cta: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScheduledDay {
    pub date: NaiveDate,
    #[serde(default)]
    pub sessions: Vec<ScheduledSession>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScriptedBehavior {
    #[serde(default = "default_true")]
    pub date_attributes: bool,
    #[serde(default = "default_true")]
    pub day_labels: bool,
    #[serde(default = "default_true")]
    pub paging: bool,
    #[serde(default = "default_true")]
    pub strip_scroll: bool,
    /// Row-list reads that come back empty after each selection change.
    #[serde(default = "default_reload_blank_polls")]
    pub reload_blank_polls: usize,
    /// The Nth day selection silently reverts to today (once).
    #[serde(default)]
    pub snap_back_after_selections: Option<usize>,
    /// After N row-list reads on a non-today day the selection reverts to
    /// today (once).
    #[serde(default)]
    pub snap_back_after_row_scans: Option<usize>,
    /// Rows rendered at a time; `None` renders the whole list.
    #[serde(default)]
    pub rows_visible: Option<usize>,
    #[serde(default = "default_cell_width_px")]
    pub cell_width_px: i64,
    #[serde(default = "default_row_height_px")]
    pub row_height_px: i64,
    /// Overlays covering the page at start; each intercepts normal clicks.
    #[serde(default)]
    pub open_overlays: usize,
}

impl Default for ScriptedBehavior {
    fn default() -> Self {
        Self {
            date_attributes: true,
            day_labels: true,
            paging: true,
            strip_scroll: true,
            reload_blank_polls: default_reload_blank_polls(),
            snap_back_after_selections: None,
            snap_back_after_row_scans: None,
            rows_visible: None,
            cell_width_px: default_cell_width_px(),
            row_height_px: default_row_height_px(),
            open_overlays: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CommitEffect {
    #[default]
    Success,
    DestructiveDialog,
    Nothing,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScriptedCommitBehavior {
    #[serde(default)]
    pub effect: CommitEffect,
    /// Click modes the call-to-action refuses as not interactable.
    #[serde(default)]
    pub rejected_modes: Vec<ClickMode>,
    #[serde(default)]
    pub reject_inner_text: bool,
    /// Accepted commit clicks that produce no visible effect before the
    /// configured effect kicks in.
    #[serde(default)]
    pub silent_clicks: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScheduleFixture {
    #[serde(default = "schedule_fixture_schema_version")]
    pub schema_version: u32,
    #[serde(default)]
    pub name: String,
    pub today: NaiveDate,
    #[serde(default = "default_window_days")]
    pub window_days: usize,
    /// Offset of the first rendered day relative to today.
    #[serde(default)]
    pub window_start_offset: i64,
    #[serde(default)]
    pub days: Vec<ScheduledDay>,
    #[serde(default)]
    pub behavior: ScriptedBehavior,
    #[serde(default)]
    pub commit: ScriptedCommitBehavior,
}

pub fn parse_schedule_fixture(raw: &str) -> Result<ScheduleFixture> {
    let fixture = serde_json::from_str::<ScheduleFixture>(raw)
        .context("failed to parse schedule fixture")?;
    validate_schedule_fixture(&fixture)?;
    Ok(fixture)
}

pub fn load_schedule_fixture(path: &Path) -> Result<ScheduleFixture> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    parse_schedule_fixture(&raw).with_context(|| format!("invalid fixture {}", path.display()))
}

pub fn validate_schedule_fixture(fixture: &ScheduleFixture) -> Result<()> {
    if fixture.schema_version != SCHEDULE_FIXTURE_SCHEMA_VERSION {
        bail!(
            "unsupported schedule fixture schema_version {} (expected {})",
            fixture.schema_version,
            SCHEDULE_FIXTURE_SCHEMA_VERSION
        );
    }
    if fixture.window_days == 0 {
        bail!("schedule fixture window_days must be greater than 0");
    }
    if fixture.behavior.cell_width_px <= 0 || fixture.behavior.row_height_px <= 0 {
        bail!("schedule fixture cell_width_px and row_height_px must be greater than 0");
    }
    if fixture.behavior.rows_visible == Some(0) {
        bail!("schedule fixture rows_visible must be greater than 0 when set");
    }
    let mut seen = std::collections::HashSet::new();
    for day in &fixture.days {
        if !seen.insert(day.date) {
            bail!("schedule fixture lists {} more than once", day.date);
        }
    }
    shift_date(fixture.today, fixture.window_start_offset)
        .context("schedule fixture window_start_offset is out of range")?;
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitClick {
    pub date: NaiveDate,
    pub time: String,
    /// Click mode name, or `inner_text` for clicks on the inner label.
    pub mode: String,
}

/// Side effects observed by the scripted surface.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptedLog {
    pub selection_clicks: Vec<NaiveDate>,
    pub page_clicks: usize,
    pub strip_scrolls: usize,
    pub list_scrolls: usize,
    pub snap_backs: usize,
    pub commit_clicks: Vec<CommitClick>,
    pub bookings: Vec<CommitClick>,
    pub dialogs_kept: usize,
    pub destructive_confirmations: usize,
    pub success_dismissals: usize,
    pub overlays_dismissed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Role {
    DayCell,
    SelectedCell,
    TodayCell,
    Heading,
    PageNext,
    PagePrev,
    Strip,
    List,
    Row,
    RowTime,
    RowLocation,
    RowCategory,
    RowStatus,
    RowCta,
    CtaText,
    Success,
    Dialog,
    KeepOption,
    DestructiveOption,
    OverlayClose,
}

impl Role {
    fn is_row_part(self) -> bool {
        matches!(
            self,
            Self::RowTime
                | Self::RowLocation
                | Self::RowCategory
                | Self::RowStatus
                | Self::RowCta
                | Self::CtaText
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum RowField {
    Time,
    Location,
    Category,
    Status,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum ElementKey {
    Cell(NaiveDate),
    Heading,
    PageNext,
    PagePrev,
    Strip,
    List,
    Row(usize),
    Field(usize, RowField),
    Cta(usize),
    CtaText(usize),
    Success,
    Dialog,
    Keep,
    DestructiveOption,
    Overlay,
}

#[derive(Debug)]
struct ScriptedState {
    today: NaiveDate,
    window_days: usize,
    window_start_offset: i64,
    window_start: NaiveDate,
    selected: NaiveDate,
    generation: u64,
    handles: HashMap<String, ElementKey>,
    sessions: BTreeMap<NaiveDate, Vec<ScheduledSession>>,
    behavior: ScriptedBehavior,
    commit: ScriptedCommitBehavior,
    blank_reads_remaining: usize,
    row_offset: usize,
    row_scans: usize,
    selection_snapped: bool,
    scan_snapped: bool,
    snap_pending: bool,
    overlays_open: usize,
    accepted_commit_clicks: usize,
    success_visible: bool,
    dialog_visible: bool,
    log: ScriptedLog,
}

pub struct ScriptedSurface {
    roles: HashMap<String, Role>,
    names: AttributeNames,
    state: Mutex<ScriptedState>,
}

impl ScriptedSurface {
    pub fn new(fixture: ScheduleFixture, profile: &SurfaceProfile) -> Result<Self> {
        validate_schedule_fixture(&fixture)?;
        let window_start = shift_date(fixture.today, fixture.window_start_offset)
            .context("schedule fixture window_start_offset is out of range")?;
        let sessions = fixture
            .days
            .into_iter()
            .map(|day| (day.date, day.sessions))
            .collect();
        let overlays_open = fixture.behavior.open_overlays;
        Ok(Self {
            roles: role_table(profile),
            names: AttributeNames {
                date: profile.date_attribute.clone(),
                label: profile.label_attribute.clone(),
                selected: profile.selected_attribute.clone(),
            },
            state: Mutex::new(ScriptedState {
                today: fixture.today,
                window_days: fixture.window_days,
                window_start_offset: fixture.window_start_offset,
                window_start,
                selected: fixture.today,
                generation: 0,
                handles: HashMap::new(),
                sessions,
                behavior: fixture.behavior,
                commit: fixture.commit,
                blank_reads_remaining: 0,
                row_offset: 0,
                row_scans: 0,
                selection_snapped: false,
                scan_snapped: false,
                snap_pending: false,
                overlays_open,
                accepted_commit_clicks: 0,
                success_visible: false,
                dialog_visible: false,
                log: ScriptedLog::default(),
            }),
        })
    }

    pub fn today(&self) -> NaiveDate {
        self.lock().today
    }

    /// Snapshot of the interaction log.
    pub fn log(&self) -> ScriptedLog {
        self.lock().log.clone()
    }

    pub fn selected_date(&self) -> NaiveDate {
        self.lock().selected
    }

    fn lock(&self) -> MutexGuard<'_, ScriptedState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn role_of(&self, spec: &QuerySpec) -> Option<Role> {
        self.roles.get(spec.selector_str().trim()).copied()
    }
}

fn role_table(profile: &SurfaceProfile) -> HashMap<String, Role> {
    let mut roles = HashMap::new();
    let mut insert = |selector: &str, role: Role| {
        let selector = selector.trim();
        if !selector.is_empty() {
            roles.entry(selector.to_string()).or_insert(role);
        }
    };
    insert(&profile.selected_marker, Role::SelectedCell);
    insert(&profile.today_marker, Role::TodayCell);
    insert(&profile.day_cell, Role::DayCell);
    insert(&profile.heading, Role::Heading);
    insert(&profile.page_next, Role::PageNext);
    insert(&profile.page_prev, Role::PagePrev);
    insert(&profile.day_strip, Role::Strip);
    insert(&profile.result_list, Role::List);
    insert(&profile.list_scroll_container, Role::List);
    insert(&profile.row, Role::Row);
    insert(&profile.row_time, Role::RowTime);
    insert(&profile.row_location, Role::RowLocation);
    insert(&profile.row_category, Role::RowCategory);
    insert(&profile.row_status, Role::RowStatus);
    insert(&profile.row_cta, Role::RowCta);
    insert(&profile.cta_text, Role::CtaText);
    insert(&profile.success_indicator, Role::Success);
    insert(&profile.destructive_dialog, Role::Dialog);
    insert(&profile.dialog_keep_option, Role::KeepOption);
    insert(DESTRUCTIVE_OPTION_SELECTOR, Role::DestructiveOption);
    if let Some(first) = profile.overlay_close.first() {
        insert(first, Role::OverlayClose);
    }
    roles
}

fn shift_date(date: NaiveDate, days: i64) -> Option<NaiveDate> {
    if days >= 0 {
        date.checked_add_days(Days::new(days.unsigned_abs()))
    } else {
        date.checked_sub_days(Days::new(days.unsigned_abs()))
    }
}

impl ScriptedState {
    fn window(&self) -> Vec<NaiveDate> {
        (0..self.window_days)
            .filter_map(|offset| shift_date(self.window_start, i64::try_from(offset).ok()?))
            .collect()
    }

    fn in_window(&self, date: NaiveDate) -> bool {
        self.window().contains(&date)
    }

    fn selected_sessions(&self) -> &[ScheduledSession] {
        self.sessions
            .get(&self.selected)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    fn visible_rows(&self) -> std::ops::Range<usize> {
        let total = self.selected_sessions().len();
        match self.behavior.rows_visible {
            Some(visible) => {
                let start = self.row_offset.min(total);
                start..(start + visible).min(total)
            }
            None => 0..total,
        }
    }

    fn rerender(&mut self) {
        self.generation += 1;
        self.handles.clear();
    }

    fn register(&mut self, key: ElementKey) -> ElementHandle {
        let id = format!("g{}:{:?}", self.generation, key);
        self.handles.insert(id.clone(), key);
        ElementHandle::new(id)
    }

    fn resolve(&self, handle: &ElementHandle) -> SurfaceResult<ElementKey> {
        let key = self
            .handles
            .get(handle.id())
            .copied()
            .ok_or_else(|| SurfaceError::StaleHandle(handle.id().to_string()))?;
        let live = match key {
            ElementKey::Cell(date) => self.in_window(date),
            ElementKey::Row(index)
            | ElementKey::Field(index, _)
            | ElementKey::Cta(index)
            | ElementKey::CtaText(index) => {
                self.blank_reads_remaining == 0 && self.visible_rows().contains(&index)
            }
            ElementKey::PageNext | ElementKey::PagePrev => self.behavior.paging,
            ElementKey::Strip => self.behavior.strip_scroll,
            ElementKey::Success => self.success_visible,
            ElementKey::Dialog | ElementKey::Keep | ElementKey::DestructiveOption => {
                self.dialog_visible
            }
            ElementKey::Overlay => self.overlays_open > 0,
            ElementKey::Heading | ElementKey::List => true,
        };
        if live {
            Ok(key)
        } else {
            Err(SurfaceError::StaleHandle(handle.id().to_string()))
        }
    }

    fn reset_to_today(&mut self) {
        self.selected = self.today;
        if let Some(start) = shift_date(self.today, self.window_start_offset) {
            self.window_start = start;
        }
        self.row_offset = 0;
        self.row_scans = 0;
        self.blank_reads_remaining = self.behavior.reload_blank_polls;
        self.log.snap_backs += 1;
        self.rerender();
    }

    fn select(&mut self, date: NaiveDate) {
        self.log.selection_clicks.push(date);
        if date == self.selected {
            return;
        }
        self.selected = date;
        self.row_offset = 0;
        self.row_scans = 0;
        self.blank_reads_remaining = self.behavior.reload_blank_polls;
        self.rerender();
        let selections = self.log.selection_clicks.len();
        if !self.selection_snapped
            && self.behavior.snap_back_after_selections == Some(selections)
        {
            self.selection_snapped = true;
            self.reset_to_today();
        }
    }

    fn shift_window(&mut self, days: i64) {
        if let Some(start) = shift_date(self.window_start, days) {
            self.window_start = start;
            self.rerender();
        }
    }

    fn page_days(&self) -> i64 {
        i64::try_from(self.window_days).unwrap_or(i64::MAX)
    }

    fn candidates(&mut self, role: Role, scope: Option<ElementKey>) -> Vec<ElementKey> {
        match role {
            Role::DayCell => self.window().into_iter().map(ElementKey::Cell).collect(),
            Role::SelectedCell => {
                if self.in_window(self.selected) {
                    vec![ElementKey::Cell(self.selected)]
                } else {
                    Vec::new()
                }
            }
            Role::TodayCell => {
                if self.in_window(self.today) {
                    vec![ElementKey::Cell(self.today)]
                } else {
                    Vec::new()
                }
            }
            Role::Heading => vec![ElementKey::Heading],
            Role::PageNext if self.behavior.paging => vec![ElementKey::PageNext],
            Role::PagePrev if self.behavior.paging => vec![ElementKey::PagePrev],
            Role::Strip if self.behavior.strip_scroll => vec![ElementKey::Strip],
            Role::PageNext | Role::PagePrev | Role::Strip => Vec::new(),
            Role::List => vec![ElementKey::List],
            Role::Row => {
                if !matches!(scope, None | Some(ElementKey::List)) {
                    return Vec::new();
                }
                if self.blank_reads_remaining > 0 {
                    self.blank_reads_remaining -= 1;
                    return Vec::new();
                }
                self.note_row_scan();
                self.visible_rows().map(ElementKey::Row).collect()
            }
            Role::RowTime | Role::RowLocation | Role::RowCategory | Role::RowStatus => {
                let field = match role {
                    Role::RowTime => RowField::Time,
                    Role::RowLocation => RowField::Location,
                    Role::RowCategory => RowField::Category,
                    _ => RowField::Status,
                };
                match scope {
                    Some(ElementKey::Row(index)) => vec![ElementKey::Field(index, field)],
                    _ => Vec::new(),
                }
            }
            Role::RowCta => match scope {
                Some(ElementKey::Row(index)) => vec![ElementKey::Cta(index)],
                _ => Vec::new(),
            },
            Role::CtaText => match scope {
                Some(ElementKey::Cta(index)) => vec![ElementKey::CtaText(index)],
                _ => Vec::new(),
            },
            Role::Success if self.success_visible => vec![ElementKey::Success],
            Role::Dialog if self.dialog_visible => vec![ElementKey::Dialog],
            Role::KeepOption if self.dialog_visible => vec![ElementKey::Keep],
            Role::DestructiveOption if self.dialog_visible => vec![ElementKey::DestructiveOption],
            Role::OverlayClose if self.overlays_open > 0 => vec![ElementKey::Overlay],
            Role::Success
            | Role::Dialog
            | Role::KeepOption
            | Role::DestructiveOption
            | Role::OverlayClose => Vec::new(),
        }
    }

    fn note_row_scan(&mut self) {
        if self.selected == self.today {
            return;
        }
        self.row_scans += 1;
        if !self.scan_snapped && self.behavior.snap_back_after_row_scans == Some(self.row_scans) {
            // This read is still served; the revert lands before the next
            // query outside the row.
            self.scan_snapped = true;
            self.snap_pending = true;
        }
    }

    fn text(&self, key: ElementKey) -> String {
        let session = |index: usize| self.selected_sessions().get(index);
        match key {
            ElementKey::Cell(date) => date.format("%a %-d").to_string(),
            ElementKey::Heading => self.selected.format("%A, %b %d").to_string(),
            ElementKey::PageNext => "Next week".to_string(),
            ElementKey::PagePrev => "Previous week".to_string(),
            ElementKey::Strip | ElementKey::List | ElementKey::Row(_) => String::new(),
            ElementKey::Field(index, field) => session(index)
                .map(|session| match field {
                    RowField::Time => session.time.clone(),
                    RowField::Location => session.location.clone(),
                    RowField::Category => session.category.clone(),
                    RowField::Status => session.status.clone(),
                })
                .unwrap_or_default(),
            ElementKey::Cta(index) | ElementKey::CtaText(index) => session(index)
                .map(|session| session.cta.to_uppercase())
                .unwrap_or_default(),
            ElementKey::Success => "I'm done".to_string(),
            ElementKey::Dialog => "Cancel this booking?".to_string(),
            ElementKey::Keep => "Keep booking".to_string(),
            ElementKey::DestructiveOption => "Cancel booking".to_string(),
            ElementKey::Overlay => "Close".to_string(),
        }
    }

    fn attribute(&self, key: ElementKey, name: &str, names: &AttributeNames) -> Option<String> {
        let ElementKey::Cell(date) = key else {
            return None;
        };
        if name == names.date && self.behavior.date_attributes {
            return Some(date.format("%Y-%m-%d").to_string());
        }
        if name == names.label && self.behavior.day_labels {
            return Some(date.format("%A, %B %-d, %Y").to_string());
        }
        if name == names.selected {
            return Some((date == self.selected).to_string());
        }
        None
    }

    fn matches(&self, key: ElementKey, spec: &QuerySpec, names: &AttributeNames) -> bool {
        match spec {
            QuerySpec::Selector { .. } => true,
            QuerySpec::Attribute { name, value, .. } => {
                self.attribute(key, name, names).as_deref() == Some(value.as_str())
            }
            QuerySpec::Label {
                attribute, tokens, ..
            } => self.attribute(key, attribute, names).is_some_and(|label| {
                let label = label.to_lowercase();
                tokens
                    .iter()
                    .all(|token| label.contains(&token.to_lowercase()))
            }),
            QuerySpec::Text { text, .. } => self
                .text(key)
                .to_lowercase()
                .contains(&text.to_lowercase()),
        }
    }

    fn commit_click(&mut self, index: usize, mode_label: &str, rejected: bool) -> SurfaceResult<()> {
        if rejected {
            return Err(SurfaceError::NotInteractable(format!(
                "call-to-action refused {mode_label} click"
            )));
        }
        let Some(session) = self.selected_sessions().get(index).cloned() else {
            return Err(SurfaceError::StaleHandle(format!("row {index}")));
        };
        let click = CommitClick {
            date: self.selected,
            time: session.time.clone(),
            mode: mode_label.to_string(),
        };
        self.log.commit_clicks.push(click.clone());
        self.accepted_commit_clicks += 1;
        if self.accepted_commit_clicks <= self.commit.silent_clicks {
            return Ok(());
        }
        match self.commit.effect {
            CommitEffect::Success => {
                if let Some(session) = self
                    .sessions
                    .get_mut(&click.date)
                    .and_then(|sessions| sessions.get_mut(index))
                {
                    session.status = "Booked".to_string();
                    session.cta = "Cancel".to_string();
                }
                self.log.bookings.push(click);
                self.success_visible = true;
            }
            CommitEffect::DestructiveDialog => self.dialog_visible = true,
            CommitEffect::Nothing => {}
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct AttributeNames {
    date: String,
    label: String,
    selected: String,
}

#[async_trait]
impl Surface for ScriptedSurface {
    async fn query(
        &self,
        scope: Option<&ElementHandle>,
        spec: &QuerySpec,
    ) -> SurfaceResult<Vec<ElementHandle>> {
        let Some(role) = self.role_of(spec) else {
            return Ok(Vec::new());
        };
        let names = &self.names;
        let mut state = self.lock();
        if state.snap_pending && !role.is_row_part() {
            state.snap_pending = false;
            state.reset_to_today();
            state.blank_reads_remaining = 0;
        }
        let scope = match scope {
            Some(handle) => Some(state.resolve(handle)?),
            None => None,
        };
        let keys = state.candidates(role, scope);
        let matched: Vec<ElementKey> = keys
            .into_iter()
            .filter(|key| state.matches(*key, spec, names))
            .collect();
        Ok(matched.into_iter().map(|key| state.register(key)).collect())
    }

    async fn read_text(&self, handle: &ElementHandle) -> SurfaceResult<String> {
        let state = self.lock();
        let key = state.resolve(handle)?;
        Ok(state.text(key))
    }

    async fn read_attribute(
        &self,
        handle: &ElementHandle,
        name: &str,
    ) -> SurfaceResult<Option<String>> {
        let state = self.lock();
        let key = state.resolve(handle)?;
        Ok(state.attribute(key, name, &self.names))
    }

    async fn is_visible(&self, handle: &ElementHandle) -> SurfaceResult<bool> {
        let state = self.lock();
        state.resolve(handle).map(|_| true)
    }

    async fn click(&self, handle: &ElementHandle, mode: ClickMode) -> SurfaceResult<()> {
        let mut state = self.lock();
        let key = state.resolve(handle)?;
        let covered = state.overlays_open > 0 && mode == ClickMode::Normal;
        match key {
            ElementKey::Overlay => {
                state.overlays_open = state.overlays_open.saturating_sub(1);
                state.log.overlays_dismissed += 1;
                Ok(())
            }
            _ if covered => Err(SurfaceError::NotInteractable(format!(
                "{} is covered by an overlay",
                handle.id()
            ))),
            ElementKey::Cell(date) => {
                state.select(date);
                Ok(())
            }
            ElementKey::PageNext => {
                let days = state.page_days();
                state.log.page_clicks += 1;
                state.shift_window(days);
                Ok(())
            }
            ElementKey::PagePrev => {
                let days = state.page_days();
                state.log.page_clicks += 1;
                state.shift_window(-days);
                Ok(())
            }
            ElementKey::Cta(index) => {
                let rejected = state.commit.rejected_modes.contains(&mode);
                state.commit_click(index, mode.as_str(), rejected)
            }
            ElementKey::CtaText(index) => {
                let rejected = state.commit.reject_inner_text;
                state.commit_click(index, "inner_text", rejected)
            }
            ElementKey::Success => {
                state.success_visible = false;
                state.log.success_dismissals += 1;
                Ok(())
            }
            ElementKey::Keep => {
                state.dialog_visible = false;
                state.log.dialogs_kept += 1;
                Ok(())
            }
            ElementKey::DestructiveOption => {
                state.dialog_visible = false;
                state.log.destructive_confirmations += 1;
                Ok(())
            }
            ElementKey::Heading
            | ElementKey::Strip
            | ElementKey::List
            | ElementKey::Row(_)
            | ElementKey::Field(..)
            | ElementKey::Dialog => Ok(()),
        }
    }

    async fn scroll(
        &self,
        container: Option<&ElementHandle>,
        dx: i64,
        dy: i64,
    ) -> SurfaceResult<()> {
        let mut state = self.lock();
        let key = match container {
            Some(handle) => Some(state.resolve(handle)?),
            None => None,
        };
        match key {
            Some(ElementKey::Strip) => {
                if dx != 0 {
                    let width = state.behavior.cell_width_px.max(1);
                    let days = if dx.abs() < width {
                        dx.signum()
                    } else {
                        dx / width
                    };
                    state.log.strip_scrolls += 1;
                    state.shift_window(days);
                }
                Ok(())
            }
            Some(ElementKey::List) | None => {
                if dy != 0 {
                    let height = state.behavior.row_height_px.max(1);
                    let rows = usize::try_from((dy / height).unsigned_abs()).unwrap_or(usize::MAX);
                    state.row_offset = if dy > 0 {
                        state.row_offset.saturating_add(rows.max(1))
                    } else {
                        state.row_offset.saturating_sub(rows.max(1))
                    };
                    let total = state.selected_sessions().len();
                    state.row_offset = state.row_offset.min(total.saturating_sub(1));
                    state.log.list_scrolls += 1;
                }
                Ok(())
            }
            Some(_) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use aloni_surface::{ClickMode, QuerySpec, Surface, SurfaceError};
    use chrono::NaiveDate;

    use super::{parse_schedule_fixture, ScriptedSurface};
    use crate::config::SurfaceProfile;

    const FIXTURE: &str = r#"{
  "schema_version": 1,
  "name": "two-day week",
  "today": "2026-10-22",
  "days": [
    {
      "date": "2026-10-23",
      "sessions": [
        { "time": "6:15 pm", "location": "Flatiron", "category": "Yoga Sculpt" },
        { "time": "7:30 pm", "location": "Flatiron", "category": "C2", "status": "Waitlist" }
      ]
    }
  ],
  "behavior": { "reload_blank_polls": 1, "snap_back_after_selections": 2 }
}"#;

    fn date(month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, month, day).expect("date")
    }

    #[test]
    fn unit_fixture_validation_rejects_duplicate_days_and_unknown_schema() {
        let duplicated = FIXTURE.replace(
            r#""days": ["#,
            r#""days": [ { "date": "2026-10-23" },"#,
        );
        let error = parse_schedule_fixture(&duplicated).expect_err("duplicate day");
        assert!(error.to_string().contains("more than once"));

        let future = FIXTURE.replace(r#""schema_version": 1"#, r#""schema_version": 9"#);
        let error = parse_schedule_fixture(&future).expect_err("schema");
        assert!(error.to_string().contains("schema_version 9"));
    }

    #[tokio::test]
    async fn functional_selection_blanks_list_then_renders_rows_and_stales_old_handles() {
        let profile = SurfaceProfile::default();
        let fixture = parse_schedule_fixture(FIXTURE).expect("fixture");
        let surface = ScriptedSurface::new(fixture, &profile).expect("surface");

        let cells = surface
            .query(None, &QuerySpec::selector(profile.day_cell.as_str()))
            .await
            .expect("cells");
        assert_eq!(cells.len(), 7);
        assert_eq!(
            surface
                .read_attribute(&cells[0], &profile.selected_attribute)
                .await
                .expect("attribute")
                .as_deref(),
            Some("true")
        );
        assert_eq!(
            surface.read_text(&cells[1]).await.expect("text"),
            "Fri 23"
        );

        surface.click(&cells[1], ClickMode::Normal).await.expect("select");
        assert_eq!(surface.selected_date(), date(10, 23));
        assert!(matches!(
            surface.read_text(&cells[1]).await,
            Err(SurfaceError::StaleHandle(_))
        ));

        let rows_spec = QuerySpec::selector(profile.row.as_str());
        assert!(surface.query(None, &rows_spec).await.expect("rows").is_empty());
        let rows = surface.query(None, &rows_spec).await.expect("rows");
        assert_eq!(rows.len(), 2);
        let status = surface
            .query_text(
                Some(&rows[1]),
                &QuerySpec::selector(profile.row_status.as_str()),
            )
            .await
            .expect("status");
        assert_eq!(status.as_deref(), Some("Waitlist"));
        let heading = surface
            .query_text(None, &QuerySpec::selector(profile.heading.as_str()))
            .await
            .expect("heading");
        assert_eq!(heading.as_deref(), Some("Friday, Oct 23"));
    }

    #[tokio::test]
    async fn regression_configured_selection_snaps_back_to_today() {
        let profile = SurfaceProfile::default();
        let fixture = parse_schedule_fixture(FIXTURE).expect("fixture");
        let surface = ScriptedSurface::new(fixture, &profile).expect("surface");

        for (iso, selected_after) in [("2026-10-23", date(10, 23)), ("2026-10-24", date(10, 22))] {
            let cell = surface
                .query_first(
                    None,
                    &QuerySpec::attribute(profile.day_cell.as_str(), "data-date", iso),
                )
                .await
                .expect("query")
                .expect("cell");
            surface.click(&cell, ClickMode::Normal).await.expect("select");
            assert_eq!(surface.selected_date(), selected_after);
        }
        let log = surface.log();
        assert_eq!(log.snap_backs, 1);
        assert_eq!(log.selection_clicks, vec![date(10, 23), date(10, 24)]);
    }
}
