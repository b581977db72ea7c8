//! Payloads of the multiMATIC mobile API and their mapping into the domain
//! model.
//!
//! Notes
//! - Every response is wrapped in `{"body": ..., "meta": ...}`; only `body`
//!   is read.
//! - Time program start times are "HH:MM" strings keyed by lowercase weekday.
//! - Timestamps are epoch milliseconds.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;

use crate::models::multimatic::{
    BoilerInfo, BoilerStatus, Circulation, CirculationId, Device, HolidayMode, HotWater, HotWaterId, OperatingMode,
    QuickMode, QuickVeto, Room, RoomId, SettingMode, System, SystemError, SystemStatus, TimePeriodSetting,
    TimeProgram, Zone, ZoneId,
};

const WEEKDAYS: [&str; 7] = ["monday", "tuesday", "wednesday", "thursday", "friday", "saturday", "sunday"];

const REPORT_WATER_PRESSURE: &str = "WaterPressureSensor";
const REPORT_FLOW_TEMPERATURE: &str = "FlowTemperatureSensor";
const REPORT_DHW_TEMPERATURE: &str = "DomesticHotWaterTankTemperature";

#[derive(Debug, Clone, Deserialize)]
pub struct Envelope<T> {
    pub body: T,
}

// =====================
// Authentication / facilities
// =====================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTokenBody {
    pub auth_token: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FacilitiesBody {
    #[serde(default)]
    pub facilities_list: Vec<Facility>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Facility {
    pub serial_number: String,
    pub name: Option<String>,
}

// =====================
// System control
// =====================

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SystemControlBody {
    pub configuration: Option<SystemConfiguration>,
    pub status: Option<SystemControlStatus>,
    #[serde(default)]
    pub zones: Vec<ZoneDto>,
    #[serde(default)]
    pub dhw: Vec<DhwDto>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SystemConfiguration {
    pub holidaymode: Option<HolidayModeDto>,
    pub quickmode: Option<QuickModeDto>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HolidayModeDto {
    pub active: bool,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub temperature_setpoint: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuickModeDto {
    pub quickmode: String,
    pub duration: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SystemControlStatus {
    pub outside_temperature: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ZoneDto {
    #[serde(rename = "_id")]
    pub id: String,
    pub configuration: ZoneConfigurationDto,
    pub heating: Option<ZoneHeatingDto>,
    pub currently_controlled_by: Option<ControlledByDto>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ZoneConfigurationDto {
    pub name: String,
    pub inside_temperature: Option<f64>,
    pub active_function: Option<String>,
    pub quick_veto: Option<ZoneQuickVetoDto>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ZoneQuickVetoDto {
    pub active: bool,
    pub temperature_setpoint: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ZoneHeatingDto {
    pub configuration: ZoneHeatingConfigurationDto,
    pub timeprogram: Option<TimeProgramDto>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ZoneHeatingConfigurationDto {
    pub mode: OperatingMode,
    pub setpoint_temperature: f64,
    pub setback_temperature: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ControlledByDto {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DhwDto {
    #[serde(rename = "_id")]
    pub id: String,
    pub hotwater: Option<HotWaterDto>,
    pub circulation: Option<CirculationDto>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HotWaterDto {
    pub configuration: HotWaterConfigurationDto,
    pub timeprogram: Option<TimeProgramDto>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HotWaterConfigurationDto {
    pub name: Option<String>,
    pub operation_mode: OperatingMode,
    pub temperature_setpoint: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CirculationDto {
    pub configuration: CirculationConfigurationDto,
    pub timeprogram: Option<TimeProgramDto>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CirculationConfigurationDto {
    pub name: Option<String>,
    pub operation_mode: OperatingMode,
}

pub type TimeProgramDto = BTreeMap<String, Vec<TimePeriodDto>>;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimePeriodDto {
    pub start_time: String,
    pub setting: Option<SettingMode>,
    pub temperature_setpoint: Option<f64>,
}

// =====================
// Rooms
// =====================

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RoomsBody {
    #[serde(default)]
    pub rooms: Vec<RoomDto>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomDto {
    pub room_index: i64,
    pub configuration: RoomConfigurationDto,
    pub timeprogram: Option<TimeProgramDto>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomConfigurationDto {
    pub name: String,
    pub temperature_setpoint: Option<f64>,
    pub operation_mode: OperatingMode,
    pub current_temperature: Option<f64>,
    #[serde(default)]
    pub child_lock: bool,
    #[serde(default)]
    pub is_window_open: bool,
    #[serde(default)]
    pub devices: Vec<DeviceDto>,
    pub quick_veto: Option<RoomQuickVetoDto>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomQuickVetoDto {
    pub remaining_duration: Option<u32>,
    pub temperature_setpoint: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDto {
    pub name: String,
    pub sgtin: String,
    pub device_type: String,
    #[serde(default)]
    pub is_battery_low: bool,
    #[serde(default)]
    pub is_radio_out_of_reach: bool,
}

// =====================
// Live report / HVAC state
// =====================

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LiveReportBody {
    #[serde(default)]
    pub devices: Vec<LiveReportDeviceDto>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LiveReportDeviceDto {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub reports: Vec<ReportDto>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReportDto {
    #[serde(rename = "_id")]
    pub id: String,
    pub value: Option<f64>,
    pub unit: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HvacStateDto {
    pub hvac_messages: Option<HvacMessagesDto>,
    pub system_status: Option<SystemStatusDto>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct HvacMessagesDto {
    #[serde(default)]
    pub error_messages: Vec<HvacMessageDto>,
    #[serde(default)]
    pub status_messages: Vec<HvacMessageDto>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HvacMessageDto {
    pub status_code: String,
    pub title: String,
    pub description: Option<String>,
    pub hint: Option<String>,
    pub timestamp: i64,
    pub device_name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStatusDto {
    pub online_status: String,
    pub firmware_update_status: String,
}

// =====================
// Mapping
// =====================

/// The four reads that make up one system snapshot.
#[derive(Debug, Clone, Default)]
pub struct SystemPayloads {
    pub control: SystemControlBody,
    pub rooms: RoomsBody,
    pub live_report: LiveReportBody,
    pub hvac_state: Vec<HvacStateDto>,
}

pub fn assemble_system(payloads: SystemPayloads) -> Result<System, String> {
    let SystemPayloads {
        control,
        rooms,
        live_report,
        hvac_state,
    } = payloads;

    let configuration = control.configuration.unwrap_or_default();
    let holiday_mode = configuration.holidaymode.map(|h| HolidayMode {
        active: h.active,
        start_date: h.start_date,
        end_date: h.end_date,
        target_temperature: h.temperature_setpoint,
    });
    let quick_mode = configuration
        .quickmode
        .map(|q| q.quickmode.parse::<QuickMode>())
        .transpose()?;

    let zones = control.zones.into_iter().map(map_zone).collect::<Result<Vec<_>, _>>()?;
    let rooms = rooms.rooms.into_iter().map(map_room).collect::<Result<Vec<_>, _>>()?;

    let reports = live_report
        .devices
        .iter()
        .flat_map(|d| d.reports.iter())
        .filter_map(|r| r.value.map(|v| (r.id.as_str(), v)))
        .collect::<BTreeMap<_, _>>();

    let mut hot_water = None;
    let mut circulation = None;
    if let Some(dhw) = control.dhw.into_iter().next() {
        if let Some(hw) = dhw.hotwater {
            hot_water = Some(HotWater {
                id: HotWaterId(dhw.id.clone()),
                name: hw.configuration.name.unwrap_or_else(|| "Hot water".to_string()),
                time_program: map_time_program(hw.timeprogram)?,
                current_temperature: reports.get(REPORT_DHW_TEMPERATURE).copied(),
                target_temperature: hw.configuration.temperature_setpoint,
                operating_mode: hw.configuration.operation_mode,
            });
        }
        if let Some(circ) = dhw.circulation {
            circulation = Some(Circulation {
                id: CirculationId(dhw.id),
                name: circ.configuration.name.unwrap_or_else(|| "Circulation".to_string()),
                time_program: map_time_program(circ.timeprogram)?,
                operating_mode: circ.configuration.operation_mode,
            });
        }
    }

    let water_pressure = reports.get(REPORT_WATER_PRESSURE).copied();
    let flow_temperature = reports.get(REPORT_FLOW_TEMPERATURE).copied();
    let boiler_info = if water_pressure.is_some() || flow_temperature.is_some() {
        Some(BoilerInfo {
            flow_temperature,
            water_pressure,
        })
    } else {
        None
    };

    let mut boiler_status = None;
    let mut system_status = None;
    let mut errors = Vec::new();
    for state in hvac_state {
        if let Some(messages) = state.hvac_messages {
            if boiler_status.is_none() {
                if let Some(status) = messages.status_messages.into_iter().next() {
                    boiler_status = Some(BoilerStatus {
                        device_name: status.device_name,
                        title: status.title,
                        status_code: status.status_code,
                        description: status.description,
                        timestamp: millis_to_utc(status.timestamp)?,
                        hint: status.hint,
                    });
                }
            }
            for error in messages.error_messages {
                errors.push(SystemError {
                    device_name: error.device_name,
                    title: error.title,
                    status_code: error.status_code,
                    description: error.description,
                    timestamp: millis_to_utc(error.timestamp)?,
                });
            }
        }
        if let Some(status) = state.system_status {
            system_status = Some(SystemStatus {
                online: status.online_status == "ONLINE",
                up_to_date: status.firmware_update_status == "UPDATE_NOT_PENDING",
            });
        }
    }

    Ok(System {
        holiday_mode,
        quick_mode,
        zones,
        rooms,
        hot_water,
        circulation,
        boiler_status,
        boiler_info,
        system_status,
        outdoor_temperature: control.status.and_then(|s| s.outside_temperature),
        errors,
    })
}

fn map_zone(dto: ZoneDto) -> Result<Zone, String> {
    let heating = dto
        .heating
        .ok_or_else(|| format!("zone {} has no heating configuration", dto.id))?;
    let quick_veto = dto
        .configuration
        .quick_veto
        .filter(|q| q.active)
        .and_then(|q| q.temperature_setpoint)
        .map(|t| QuickVeto::new(t, None));
    let rbr = dto
        .currently_controlled_by
        .as_ref()
        .is_some_and(|c| c.name.eq_ignore_ascii_case("RBR"));

    Ok(Zone {
        time_program: map_time_program(heating.timeprogram)?,
        id: ZoneId(dto.id),
        name: dto.configuration.name,
        current_temperature: dto.configuration.inside_temperature,
        target_temperature: heating.configuration.setpoint_temperature,
        target_min_temperature: heating.configuration.setback_temperature,
        operating_mode: heating.configuration.mode,
        quick_veto,
        active_function: dto.configuration.active_function,
        rbr,
    })
}

fn map_room(dto: RoomDto) -> Result<Room, String> {
    let cfg = dto.configuration;
    let time_program = map_time_program(dto.timeprogram)?;
    let target_temperature = cfg
        .temperature_setpoint
        .ok_or_else(|| format!("room {} has no temperature setpoint", dto.room_index))?;

    Ok(Room {
        id: RoomId(dto.room_index.to_string()),
        name: cfg.name,
        time_program,
        current_temperature: cfg.current_temperature,
        target_temperature,
        operating_mode: cfg.operation_mode,
        quick_veto: cfg
            .quick_veto
            .map(|q| QuickVeto::new(q.temperature_setpoint, q.remaining_duration)),
        child_lock: cfg.child_lock,
        window_open: cfg.is_window_open,
        devices: cfg
            .devices
            .into_iter()
            .map(|d| Device {
                name: d.name,
                sgtin: d.sgtin,
                device_type: d.device_type,
                battery_low: d.is_battery_low,
                radio_out_of_reach: d.is_radio_out_of_reach,
            })
            .collect(),
    })
}

fn map_time_program(dto: Option<TimeProgramDto>) -> Result<TimeProgram, String> {
    let Some(mut dto) = dto else {
        return Ok(TimeProgram::default());
    };
    let mut days: [Vec<TimePeriodSetting>; 7] = Default::default();
    for (index, weekday) in WEEKDAYS.iter().enumerate() {
        let Some(periods) = dto.remove(*weekday) else { continue };
        days[index] = periods
            .into_iter()
            .map(|p| {
                let start = NaiveTime::parse_from_str(&p.start_time, "%H:%M")
                    .map_err(|_| format!("invalid start time {:?} on {}", p.start_time, weekday))?;
                Ok(TimePeriodSetting::new(start, p.temperature_setpoint, p.setting))
            })
            .collect::<Result<Vec<_>, String>>()?;
    }
    Ok(TimeProgram::new(days))
}

fn millis_to_utc(millis: i64) -> Result<DateTime<Utc>, String> {
    DateTime::from_timestamp_millis(millis).ok_or_else(|| format!("timestamp out of range: {}", millis))
}
