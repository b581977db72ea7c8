//! Test builders and a recording remote session.

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use std::cell::RefCell;
use std::rc::Rc;

use crate::client::{ApiError, RemoteSession};
use crate::entities::EntityUpdater;
use crate::models::multimatic::{
    BoilerInfo, BoilerStatus, Circulation, CirculationId, Device, HolidayMode, HotWater, HotWaterId, OperatingMode,
    QuickMode, QuickVeto, Room, RoomId, SettingMode, System, SystemStatus, TimePeriodSetting, TimeProgram, Zone,
    ZoneId,
};

/// Monday 2024-01-15 12:00.
pub fn now() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, 15)
        .unwrap()
        .and_hms_opt(12, 0, 0)
        .unwrap()
}

pub fn time_program(setting: Option<SettingMode>, temperature: Option<f64>) -> TimeProgram {
    TimeProgram::uniform(vec![TimePeriodSetting::new(NaiveTime::MIN, temperature, setting)])
}

/// Holiday running from yesterday to tomorrow relative to `now()`.
pub fn active_holiday_mode() -> HolidayMode {
    let today = now().date();
    HolidayMode::new(today - Duration::days(1), today + Duration::days(1), 15.0)
}

pub fn zone() -> Zone {
    Zone {
        id: ZoneId("zone_1".into()),
        name: "Zone 1".into(),
        time_program: time_program(Some(SettingMode::Off), Some(27.0)),
        current_temperature: Some(25.0),
        target_temperature: 30.0,
        target_min_temperature: 22.0,
        operating_mode: OperatingMode::Auto,
        quick_veto: None,
        active_function: Some("STANDBY".into()),
        rbr: false,
    }
}

pub fn room() -> Room {
    Room {
        id: RoomId("1".into()),
        name: "Room 1".into(),
        time_program: time_program(Some(SettingMode::Off), Some(20.0)),
        current_temperature: Some(22.0),
        target_temperature: 24.0,
        operating_mode: OperatingMode::Auto,
        quick_veto: None,
        child_lock: false,
        window_open: false,
        devices: vec![Device {
            name: "Device 1".into(),
            sgtin: "123456789".into(),
            device_type: "VALVE".into(),
            battery_low: false,
            radio_out_of_reach: false,
        }],
    }
}

pub fn hot_water() -> HotWater {
    HotWater {
        id: HotWaterId("hot_water".into()),
        name: "Hot water".into(),
        time_program: time_program(Some(SettingMode::Off), None),
        current_temperature: Some(45.0),
        target_temperature: 40.0,
        operating_mode: OperatingMode::Auto,
    }
}

pub fn system() -> System {
    System {
        holiday_mode: Some(HolidayMode::inactive()),
        quick_mode: None,
        zones: vec![zone()],
        rooms: vec![room()],
        hot_water: Some(hot_water()),
        circulation: Some(Circulation {
            id: CirculationId("circulation".into()),
            name: "Circulation".into(),
            time_program: time_program(Some(SettingMode::On), None),
            operating_mode: OperatingMode::Auto,
        }),
        boiler_status: Some(BoilerStatus {
            device_name: "boiler".into(),
            title: "Status".into(),
            status_code: "S.31".into(),
            description: Some("No heat demand".into()),
            timestamp: Utc.with_ymd_and_hms(2024, 1, 15, 11, 0, 0).unwrap(),
            hint: None,
        }),
        boiler_info: Some(BoilerInfo {
            flow_temperature: Some(43.5),
            water_pressure: Some(1.9),
        }),
        system_status: Some(SystemStatus {
            online: true,
            up_to_date: true,
        }),
        outdoor_temperature: Some(18.0),
        errors: Vec::new(),
    }
}

/// Remote session that records every call as a readable line and serves
/// `fetch_system` from an in-memory snapshot.
#[derive(Default)]
pub struct MockSession {
    calls: RefCell<Vec<String>>,
    system: RefCell<System>,
    failing: RefCell<Vec<&'static str>>,
}

impl MockSession {
    pub fn new(system: System) -> Self {
        MockSession {
            system: RefCell::new(system),
            ..Default::default()
        }
    }

    /// Makes every later call of `operation` fail with HTTP 500.
    pub fn fail_on(&self, operation: &'static str) {
        self.failing.borrow_mut().push(operation);
    }

    pub fn set_remote_system(&self, system: System) {
        *self.system.borrow_mut() = system;
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.borrow_mut().clear();
    }

    pub fn count(&self, operation: &str) -> usize {
        self.calls
            .borrow()
            .iter()
            .filter(|c| c.split_whitespace().next() == Some(operation))
            .count()
    }

    fn record(&self, operation: &'static str, args: String) -> Result<(), ApiError> {
        let line = if args.is_empty() {
            operation.to_string()
        } else {
            format!("{} {}", operation, args)
        };
        self.calls.borrow_mut().push(line);
        if self.failing.borrow().contains(&operation) {
            return Err(ApiError::Http {
                status: 500,
                message: format!("{} failed", operation),
            });
        }
        Ok(())
    }
}

fn veto_args(veto: &QuickVeto) -> String {
    match veto.remaining_duration {
        Some(d) => format!("{} {}", veto.target_temperature, d),
        None => format!("{}", veto.target_temperature),
    }
}

impl RemoteSession for MockSession {
    fn fetch_system(&self) -> Result<System, ApiError> {
        self.record("fetch_system", String::new())?;
        Ok(self.system.borrow().clone())
    }

    fn request_hvac_update(&self) -> Result<(), ApiError> {
        self.record("request_hvac_update", String::new())
    }

    fn set_hot_water_mode(&self, id: &HotWaterId, mode: OperatingMode) -> Result<(), ApiError> {
        self.record("set_hot_water_mode", format!("{} {}", id.0, mode))
    }

    fn set_hot_water_setpoint(&self, id: &HotWaterId, temperature: f64) -> Result<(), ApiError> {
        self.record("set_hot_water_setpoint", format!("{} {}", id.0, temperature))
    }

    fn set_room_mode(&self, id: &RoomId, mode: OperatingMode) -> Result<(), ApiError> {
        self.record("set_room_mode", format!("{} {}", id.0, mode))
    }

    fn set_room_setpoint(&self, id: &RoomId, temperature: f64) -> Result<(), ApiError> {
        self.record("set_room_setpoint", format!("{} {}", id.0, temperature))
    }

    fn set_room_quick_veto(&self, id: &RoomId, veto: &QuickVeto) -> Result<(), ApiError> {
        self.record("set_room_quick_veto", format!("{} {}", id.0, veto_args(veto)))
    }

    fn remove_room_quick_veto(&self, id: &RoomId) -> Result<(), ApiError> {
        self.record("remove_room_quick_veto", id.0.clone())
    }

    fn set_zone_mode(&self, id: &ZoneId, mode: OperatingMode) -> Result<(), ApiError> {
        self.record("set_zone_mode", format!("{} {}", id.0, mode))
    }

    fn set_zone_quick_veto(&self, id: &ZoneId, veto: &QuickVeto) -> Result<(), ApiError> {
        self.record("set_zone_quick_veto", format!("{} {}", id.0, veto_args(veto)))
    }

    fn remove_zone_quick_veto(&self, id: &ZoneId) -> Result<(), ApiError> {
        self.record("remove_zone_quick_veto", id.0.clone())
    }

    fn set_quick_mode(&self, mode: QuickMode) -> Result<(), ApiError> {
        self.record("set_quick_mode", mode.name().to_string())
    }

    fn remove_quick_mode(&self) -> Result<(), ApiError> {
        self.record("remove_quick_mode", String::new())
    }

    fn set_holiday_mode(&self, start: NaiveDate, end: NaiveDate, temperature: f64) -> Result<(), ApiError> {
        self.record("set_holiday_mode", format!("{} {} {}", start, end, temperature))
    }

    fn remove_holiday_mode(&self) -> Result<(), ApiError> {
        self.record("remove_holiday_mode", String::new())
    }

    fn logout(&self) -> Result<(), ApiError> {
        self.record("logout", String::new())
    }
}

/// Collects the entity ids passed to `schedule_update`, shared with the test
/// through the `Rc`.
#[derive(Clone, Default)]
pub struct RecordingUpdater {
    pub scheduled: Rc<RefCell<Vec<String>>>,
}

impl RecordingUpdater {
    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.scheduled.borrow_mut())
    }
}

impl EntityUpdater for RecordingUpdater {
    fn schedule_update(&self, entity_id: &str) {
        self.scheduled.borrow_mut().push(entity_id.to_string());
    }
}
