//! Domain model of a multiMATIC heating installation as seen by the hub.
//!
//! Scope: types and lookups only. The wire format lives in `models::wire`,
//! effective-mode resolution in `models::active_mode`.
//!
//! Notes
//! - A `System` is one fetched snapshot. The hub patches individual records
//!   after a successful remote call and replaces the whole value on refresh.
//! - Identifiers are newtype wrappers so zone/room/hot water ids cannot be
//!   mixed up at the session boundary.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// =====================
// Scalar ID newtype wrappers
// =====================

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ZoneId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HotWaterId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CirculationId(pub String);

// =====================
// Modes
// =====================

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperatingMode {
    Auto,
    Manual,
    Day,
    Night,
    Off,
    On,
    QuickVeto,
}

impl OperatingMode {
    pub fn name(&self) -> &'static str {
        match self {
            OperatingMode::Auto => "AUTO",
            OperatingMode::Manual => "MANUAL",
            OperatingMode::Day => "DAY",
            OperatingMode::Night => "NIGHT",
            OperatingMode::Off => "OFF",
            OperatingMode::On => "ON",
            OperatingMode::QuickVeto => "QUICK_VETO",
        }
    }

    /// Whether an entity of `kind` can be switched to this mode.
    pub fn is_valid_for(&self, kind: EntityKind) -> bool {
        use OperatingMode::*;
        match kind {
            EntityKind::Zone => matches!(self, Auto | Day | Night | Off),
            EntityKind::Room => matches!(self, Auto | Manual | Off),
            EntityKind::HotWater | EntityKind::Circulation => matches!(self, Auto | On | Off),
        }
    }
}

impl fmt::Display for OperatingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for OperatingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "AUTO" => Ok(OperatingMode::Auto),
            "MANUAL" => Ok(OperatingMode::Manual),
            "DAY" => Ok(OperatingMode::Day),
            "NIGHT" => Ok(OperatingMode::Night),
            "OFF" => Ok(OperatingMode::Off),
            "ON" => Ok(OperatingMode::On),
            "QUICK_VETO" => Ok(OperatingMode::QuickVeto),
            other => Err(format!("unknown operating mode: {}", other)),
        }
    }
}

/// Setting of a time program slot.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SettingMode {
    Day,
    Night,
    On,
    Off,
}

impl SettingMode {
    pub fn name(&self) -> &'static str {
        match self {
            SettingMode::Day => "DAY",
            SettingMode::Night => "NIGHT",
            SettingMode::On => "ON",
            SettingMode::Off => "OFF",
        }
    }
}

/// Kind of a controllable component. Resolved once from the entity handle,
/// everything downstream dispatches on it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Zone,
    Room,
    HotWater,
    Circulation,
}

/// System-wide named override.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuickMode {
    HotwaterBoost,
    VentilationBoost,
    OneDayAway,
    SystemOff,
    OneDayAtHome,
    Party,
}

impl QuickMode {
    pub const ALL: [QuickMode; 6] = [
        QuickMode::HotwaterBoost,
        QuickMode::VentilationBoost,
        QuickMode::OneDayAway,
        QuickMode::SystemOff,
        QuickMode::OneDayAtHome,
        QuickMode::Party,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            QuickMode::HotwaterBoost => "HOTWATER_BOOST",
            QuickMode::VentilationBoost => "VENTILATION_BOOST",
            QuickMode::OneDayAway => "ONE_DAY_AWAY",
            QuickMode::SystemOff => "SYSTEM_OFF",
            QuickMode::OneDayAtHome => "ONE_DAY_AT_HOME",
            QuickMode::Party => "PARTY",
        }
    }

    /// Name used by the remote API, e.g. `QM_PARTY`.
    pub fn wire_name(&self) -> String {
        format!("QM_{}", self.name())
    }

    pub fn for_zone(&self) -> bool {
        !matches!(self, QuickMode::HotwaterBoost)
    }

    pub fn for_room(&self) -> bool {
        matches!(self, QuickMode::SystemOff)
    }

    pub fn for_hot_water(&self) -> bool {
        matches!(self, QuickMode::HotwaterBoost | QuickMode::OneDayAway | QuickMode::SystemOff)
    }

    pub fn applies_to(&self, kind: EntityKind) -> bool {
        match kind {
            EntityKind::Zone => self.for_zone(),
            EntityKind::Room => self.for_room(),
            EntityKind::HotWater => self.for_hot_water(),
            EntityKind::Circulation => false,
        }
    }
}

impl fmt::Display for QuickMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for QuickMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        let name = upper.strip_prefix("QM_").unwrap_or(&upper);
        QuickMode::ALL
            .into_iter()
            .find(|qm| qm.name() == name)
            .ok_or_else(|| format!("unknown quick mode: {}", s))
    }
}

/// Mode that governs a component once overrides are taken into account.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Mode {
    Operating(OperatingMode),
    Quick(QuickMode),
    Holiday,
}

impl Mode {
    pub fn name(&self) -> &'static str {
        match self {
            Mode::Operating(m) => m.name(),
            Mode::Quick(q) => q.name(),
            Mode::Holiday => "HOLIDAY",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =====================
// Overrides
// =====================

/// Per-entity temperature override. Zones never report a remaining duration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuickVeto {
    pub target_temperature: f64,
    /// Remaining minutes, `None` when unbounded.
    pub remaining_duration: Option<u32>,
}

impl QuickVeto {
    pub fn new(target_temperature: f64, remaining_duration: Option<u32>) -> Self {
        QuickVeto {
            target_temperature,
            remaining_duration,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HolidayMode {
    pub active: bool,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub target_temperature: Option<f64>,
}

impl HolidayMode {
    pub fn new(start_date: NaiveDate, end_date: NaiveDate, target_temperature: f64) -> Self {
        HolidayMode {
            active: true,
            start_date: Some(start_date),
            end_date: Some(end_date),
            target_temperature: Some(target_temperature),
        }
    }

    pub fn inactive() -> Self {
        HolidayMode {
            active: false,
            start_date: None,
            end_date: None,
            target_temperature: None,
        }
    }

    /// Active and `today` falls inside the (inclusive) date range.
    pub fn is_applied(&self, today: NaiveDate) -> bool {
        if !self.active {
            return false;
        }
        match (self.start_date, self.end_date) {
            (Some(start), Some(end)) => start <= today && today <= end,
            _ => false,
        }
    }
}

// =====================
// Time programs
// =====================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimePeriodSetting {
    pub start: NaiveTime,
    pub target_temperature: Option<f64>,
    pub setting: Option<SettingMode>,
}

impl TimePeriodSetting {
    pub fn new(start: NaiveTime, target_temperature: Option<f64>, setting: Option<SettingMode>) -> Self {
        TimePeriodSetting {
            start,
            target_temperature,
            setting,
        }
    }
}

/// Weekly schedule, one list of slots per weekday (Monday first), each list
/// sorted by start time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TimeProgram {
    days: [Vec<TimePeriodSetting>; 7],
}

impl TimeProgram {
    pub fn new(mut days: [Vec<TimePeriodSetting>; 7]) -> Self {
        for day in days.iter_mut() {
            day.sort_by_key(|s| s.start);
        }
        TimeProgram { days }
    }

    /// Same slots every day of the week.
    pub fn uniform(settings: Vec<TimePeriodSetting>) -> Self {
        TimeProgram::new(std::array::from_fn(|_| settings.clone()))
    }

    pub fn day(&self, weekday: Weekday) -> &[TimePeriodSetting] {
        &self.days[weekday.num_days_from_monday() as usize]
    }

    /// Slot in force at `now`. Before the first slot of the day, the last
    /// slot of the closest previous day with slots applies.
    pub fn setting_at(&self, now: NaiveDateTime) -> Option<&TimePeriodSetting> {
        let time = now.time();
        if let Some(current) = self.day(now.weekday()).iter().rev().find(|s| s.start <= time) {
            return Some(current);
        }
        let mut weekday = now.weekday();
        for _ in 0..7 {
            weekday = weekday.pred();
            if let Some(last) = self.day(weekday).last() {
                return Some(last);
            }
        }
        None
    }

    /// Next slot change strictly after `now`, with the moment it starts.
    pub fn next_setting(&self, now: NaiveDateTime) -> Option<(NaiveDateTime, &TimePeriodSetting)> {
        let time = now.time();
        if let Some(next) = self.day(now.weekday()).iter().find(|s| s.start > time) {
            return Some((now.date().and_time(next.start), next));
        }
        let mut weekday = now.weekday();
        for offset in 1..=7 {
            weekday = weekday.succ();
            if let Some(first) = self.day(weekday).first() {
                let date = now.date() + Duration::days(offset);
                return Some((date.and_time(first.start), first));
            }
        }
        None
    }
}

// =====================
// Components
// =====================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub id: ZoneId,
    pub name: String,
    pub time_program: TimeProgram,
    pub current_temperature: Option<f64>,
    /// Day (comfort) temperature.
    pub target_temperature: f64,
    /// Night (setback) temperature.
    pub target_min_temperature: f64,
    pub operating_mode: OperatingMode,
    pub quick_veto: Option<QuickVeto>,
    pub active_function: Option<String>,
    /// Controlled room by room; such zones get no climate entity of their own.
    pub rbr: bool,
}

impl Zone {
    pub const MIN_TARGET_TEMP: f64 = 5.0;
    pub const MAX_TARGET_TEMP: f64 = 30.0;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub name: String,
    pub sgtin: String,
    pub device_type: String,
    pub battery_low: bool,
    pub radio_out_of_reach: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub name: String,
    pub time_program: TimeProgram,
    pub current_temperature: Option<f64>,
    pub target_temperature: f64,
    pub operating_mode: OperatingMode,
    pub quick_veto: Option<QuickVeto>,
    pub child_lock: bool,
    pub window_open: bool,
    pub devices: Vec<Device>,
}

impl Room {
    pub const MIN_TARGET_TEMP: f64 = 5.0;
    pub const MAX_TARGET_TEMP: f64 = 30.0;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HotWater {
    pub id: HotWaterId,
    pub name: String,
    pub time_program: TimeProgram,
    pub current_temperature: Option<f64>,
    pub target_temperature: f64,
    pub operating_mode: OperatingMode,
}

impl HotWater {
    pub const MIN_TARGET_TEMP: f64 = 35.0;
    pub const MAX_TARGET_TEMP: f64 = 70.0;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Circulation {
    pub id: CirculationId,
    pub name: String,
    pub time_program: TimeProgram,
    pub operating_mode: OperatingMode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoilerStatus {
    pub device_name: String,
    pub title: String,
    pub status_code: String,
    pub description: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub hint: Option<String>,
}

impl BoilerStatus {
    /// Fault codes are reported as `F.xx`.
    pub fn is_error(&self) -> bool {
        self.status_code.starts_with('F')
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoilerInfo {
    pub flow_temperature: Option<f64>,
    pub water_pressure: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemStatus {
    pub online: bool,
    pub up_to_date: bool,
}

/// Active error message reported by the installation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemError {
    pub device_name: String,
    pub title: String,
    pub status_code: String,
    pub description: Option<String>,
    pub timestamp: DateTime<Utc>,
}

// =====================
// Component identity
// =====================

/// Identity of a zone/room/hot water/circulation record, stable across
/// snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ComponentId {
    Zone(ZoneId),
    Room(RoomId),
    HotWater(HotWaterId),
    Circulation(CirculationId),
}

impl ComponentId {
    pub fn kind(&self) -> EntityKind {
        match self {
            ComponentId::Zone(_) => EntityKind::Zone,
            ComponentId::Room(_) => EntityKind::Room,
            ComponentId::HotWater(_) => EntityKind::HotWater,
            ComponentId::Circulation(_) => EntityKind::Circulation,
        }
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComponentId::Zone(id) => write!(f, "zone {}", id.0),
            ComponentId::Room(id) => write!(f, "room {}", id.0),
            ComponentId::HotWater(id) => write!(f, "hot water {}", id.0),
            ComponentId::Circulation(id) => write!(f, "circulation {}", id.0),
        }
    }
}

/// Borrowed view of a component inside a snapshot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Component<'a> {
    Zone(&'a Zone),
    Room(&'a Room),
    HotWater(&'a HotWater),
    Circulation(&'a Circulation),
}

// =====================
// System snapshot
// =====================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct System {
    pub holiday_mode: Option<HolidayMode>,
    pub quick_mode: Option<QuickMode>,
    pub zones: Vec<Zone>,
    pub rooms: Vec<Room>,
    pub hot_water: Option<HotWater>,
    pub circulation: Option<Circulation>,
    pub boiler_status: Option<BoilerStatus>,
    pub boiler_info: Option<BoilerInfo>,
    pub system_status: Option<SystemStatus>,
    pub outdoor_temperature: Option<f64>,
    pub errors: Vec<SystemError>,
}

impl System {
    pub fn zone(&self, id: &ZoneId) -> Option<&Zone> {
        self.zones.iter().find(|z| &z.id == id)
    }

    pub fn zone_mut(&mut self, id: &ZoneId) -> Option<&mut Zone> {
        self.zones.iter_mut().find(|z| &z.id == id)
    }

    pub fn room(&self, id: &RoomId) -> Option<&Room> {
        self.rooms.iter().find(|r| &r.id == id)
    }

    pub fn room_mut(&mut self, id: &RoomId) -> Option<&mut Room> {
        self.rooms.iter_mut().find(|r| &r.id == id)
    }

    pub fn hot_water_by_id(&self, id: &HotWaterId) -> Option<&HotWater> {
        self.hot_water.as_ref().filter(|h| &h.id == id)
    }

    pub fn hot_water_mut(&mut self, id: &HotWaterId) -> Option<&mut HotWater> {
        self.hot_water.as_mut().filter(|h| &h.id == id)
    }

    /// Holiday mode if it currently governs the installation.
    pub fn applied_holiday(&self, today: NaiveDate) -> Option<&HolidayMode> {
        self.holiday_mode.as_ref().filter(|h| h.is_applied(today))
    }

    /// Freshest copy of the component with the given identity.
    pub fn find_component(&self, id: &ComponentId) -> Option<Component<'_>> {
        match id {
            ComponentId::Zone(zid) => self.zone(zid).map(Component::Zone),
            ComponentId::Room(rid) => self.room(rid).map(Component::Room),
            ComponentId::HotWater(hid) => self.hot_water_by_id(hid).map(Component::HotWater),
            ComponentId::Circulation(cid) => self
                .circulation
                .as_ref()
                .filter(|c| &c.id == cid)
                .map(Component::Circulation),
        }
    }
}
