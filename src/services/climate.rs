//! Climate presentation: maps effective modes of zones and rooms to host
//! HVAC modes and back, builds state attributes, and routes the climate
//! actions (`set_temperature`, `set_hvac_mode`) to the hub.

use chrono::{Duration, NaiveDateTime};
use log::debug;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::client::RemoteSession;
use crate::hub::{ApiHub, HubError};
use crate::models::active_mode::ActiveMode;
use crate::models::multimatic::{
    ComponentId, EntityKind, Mode, OperatingMode, QuickMode, QuickVeto, SettingMode, System, TimeProgram,
};
use crate::utils::truncate_to_minute;

pub const ATTR_MODE: &str = "multimatic_mode";
pub const ATTR_QUICK_VETO_END: &str = "quick_veto_end";
pub const ATTR_NEXT_SETTING: &str = "next_setting";
pub const ATTR_SETTING_END: &str = "setting_end";
pub const ATTR_SETTING: &str = "setting";

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum HvacMode {
    Auto,
    Heat,
    Cool,
    Off,
    FanOnly,
}

impl HvacMode {
    pub fn name(&self) -> &'static str {
        match self {
            HvacMode::Auto => "auto",
            HvacMode::Heat => "heat",
            HvacMode::Cool => "cool",
            HvacMode::Off => "off",
            HvacMode::FanOnly => "fan_only",
        }
    }
}

impl fmt::Display for HvacMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HvacMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(HvacMode::Auto),
            "heat" => Ok(HvacMode::Heat),
            "cool" => Ok(HvacMode::Cool),
            "off" => Ok(HvacMode::Off),
            "fan_only" => Ok(HvacMode::FanOnly),
            other => Err(format!("unknown hvac mode: {}", other)),
        }
    }
}

fn heat_or_cool(active: &ActiveMode, current_temperature: Option<f64>) -> HvacMode {
    match (active.target_temperature, current_temperature) {
        (Some(target), Some(current)) if target > current => HvacMode::Heat,
        _ => HvacMode::Cool,
    }
}

pub fn zone_hvac_mode(active: &ActiveMode, current_temperature: Option<f64>) -> HvacMode {
    match active.current_mode {
        Mode::Operating(OperatingMode::Day) | Mode::Quick(QuickMode::Party) => HvacMode::Heat,
        Mode::Operating(OperatingMode::Night) => HvacMode::Cool,
        Mode::Operating(OperatingMode::Auto) | Mode::Quick(QuickMode::OneDayAtHome) => HvacMode::Auto,
        Mode::Operating(OperatingMode::Off)
        | Mode::Quick(QuickMode::OneDayAway | QuickMode::SystemOff)
        | Mode::Holiday => HvacMode::Off,
        Mode::Quick(QuickMode::VentilationBoost) => HvacMode::FanOnly,
        _ => heat_or_cool(active, current_temperature),
    }
}

pub fn room_hvac_mode(active: &ActiveMode, current_temperature: Option<f64>) -> HvacMode {
    match active.current_mode {
        Mode::Operating(OperatingMode::Auto) => HvacMode::Auto,
        Mode::Operating(OperatingMode::Off) | Mode::Quick(QuickMode::SystemOff) | Mode::Holiday => HvacMode::Off,
        _ => heat_or_cool(active, current_temperature),
    }
}

/// Operating mode to request for a host HVAC mode, `None` when the kind does
/// not support it.
pub fn operating_mode_for(kind: EntityKind, hvac: HvacMode) -> Option<OperatingMode> {
    match (kind, hvac) {
        (EntityKind::Zone, HvacMode::Auto) => Some(OperatingMode::Auto),
        (EntityKind::Zone, HvacMode::Off) => Some(OperatingMode::Off),
        (EntityKind::Zone, HvacMode::Heat) => Some(OperatingMode::Day),
        (EntityKind::Zone, HvacMode::Cool) => Some(OperatingMode::Night),
        (EntityKind::Room, HvacMode::Auto) => Some(OperatingMode::Auto),
        (EntityKind::Room, HvacMode::Off) => Some(OperatingMode::Off),
        _ => None,
    }
}

pub fn state_attributes(
    active: &ActiveMode,
    quick_veto: Option<&QuickVeto>,
    time_program: &TimeProgram,
    now: NaiveDateTime,
) -> BTreeMap<&'static str, String> {
    let mut attrs = BTreeMap::new();
    attrs.insert(ATTR_MODE, active.current_mode.name().to_string());

    if active.is_operating(OperatingMode::QuickVeto) {
        if let Some(minutes) = quick_veto.and_then(|v| v.remaining_duration).filter(|m| *m > 0) {
            let end = truncate_to_minute(now + Duration::minutes(i64::from(minutes)));
            attrs.insert(ATTR_QUICK_VETO_END, end.format("%Y-%m-%dT%H:%M:%S").to_string());
        }
    } else if active.is_operating(OperatingMode::Auto) {
        if let Some((start, next)) = time_program.next_setting(now) {
            let value = match (next.setting, next.target_temperature) {
                (Some(s), _) => s.name().to_string(),
                (None, Some(t)) => format!("{:.1}", t),
                (None, None) => "-".to_string(),
            };
            attrs.insert(ATTR_NEXT_SETTING, value);
            attrs.insert(ATTR_SETTING_END, start.format("%Y-%m-%dT%H:%M:%S").to_string());
        }
        if let Some(sub) = active.sub_mode {
            attrs.insert(ATTR_SETTING, sub.name().to_string());
        }
    }
    attrs
}

/// Rendered state of a zone or room climate.
#[derive(Debug, Clone, PartialEq)]
pub struct ClimateView {
    pub hvac_mode: HvacMode,
    pub target_temperature: Option<f64>,
    pub current_temperature: Option<f64>,
    pub attributes: BTreeMap<&'static str, String>,
}

pub fn climate_view(system: &System, component: &ComponentId, now: NaiveDateTime) -> Option<ClimateView> {
    match component {
        ComponentId::Zone(id) => {
            let zone = system.zone(id)?;
            let active = system.active_mode_zone(zone, now);
            Some(ClimateView {
                hvac_mode: zone_hvac_mode(&active, zone.current_temperature),
                target_temperature: active.target_temperature,
                current_temperature: zone.current_temperature,
                attributes: state_attributes(&active, zone.quick_veto.as_ref(), &zone.time_program, now),
            })
        }
        ComponentId::Room(id) => {
            let room = system.room(id)?;
            let active = system.active_mode_room(room, now);
            Some(ClimateView {
                hvac_mode: room_hvac_mode(&active, room.current_temperature),
                target_temperature: active.target_temperature,
                current_temperature: room.current_temperature,
                attributes: state_attributes(&active, room.quick_veto.as_ref(), &room.time_program, now),
            })
        }
        ComponentId::HotWater(_) | ComponentId::Circulation(_) => None,
    }
}

fn fmt_temp(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |t| format!("{:.1}", t))
}

/// One-line rendering of any component.
pub fn describe(system: &System, component: &ComponentId, now: NaiveDateTime) -> String {
    if let Some(view) = climate_view(system, component, now) {
        let mode = view.attributes.get(ATTR_MODE).map_or("-", String::as_str);
        return format!(
            "{} ({}) target {} current {}",
            view.hvac_mode,
            mode,
            fmt_temp(view.target_temperature),
            fmt_temp(view.current_temperature)
        );
    }
    match component {
        ComponentId::HotWater(id) => match system.hot_water_by_id(id) {
            Some(hw) => {
                let active = system.active_mode_hot_water(hw, now);
                format!(
                    "{} target {} current {}",
                    active.current_mode,
                    fmt_temp(active.target_temperature),
                    fmt_temp(hw.current_temperature)
                )
            }
            None => "unavailable".to_string(),
        },
        ComponentId::Circulation(_) => match system.find_component(component) {
            Some(crate::models::multimatic::Component::Circulation(c)) => {
                let active = system.active_mode_circulation(c, now);
                let on = active.is_operating(OperatingMode::On) || active.sub_mode == Some(SettingMode::On);
                format!("{} ({})", if on { "on" } else { "off" }, active.current_mode)
            }
            _ => "unavailable".to_string(),
        },
        _ => "unavailable".to_string(),
    }
}

/// Climate `set_temperature`. For zones a request equal to the current
/// effective target does nothing. Returns whether a remote call was made.
pub fn set_temperature<S: RemoteSession>(
    hub: &mut ApiHub<S>,
    entity_id: &str,
    temperature: f64,
) -> Result<bool, HubError> {
    let component = hub.component_of(entity_id)?;
    if let ComponentId::Zone(id) = &component {
        let now = hub.now();
        let system = hub.snapshot()?;
        let zone = system
            .zone(id)
            .ok_or_else(|| HubError::ComponentMissing(component.clone()))?;
        if system.active_mode_zone(zone, now).target_temperature == Some(temperature) {
            debug!("{} already targets {}, nothing to do", entity_id, temperature);
            return Ok(false);
        }
    }
    hub.set_target_temperature(entity_id, temperature)?;
    Ok(true)
}

/// Climate `set_hvac_mode`.
pub fn set_hvac_mode<S: RemoteSession>(hub: &mut ApiHub<S>, entity_id: &str, hvac: HvacMode) -> Result<(), HubError> {
    let kind = hub.component_of(entity_id)?.kind();
    let mode = operating_mode_for(kind, hvac).ok_or(HubError::Unsupported {
        operation: "set_hvac_mode",
        kind,
    })?;
    hub.set_operating_mode(entity_id, mode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{self, MockSession, RecordingUpdater};
    use crate::hub::HubConfig;
    use crate::models::multimatic::{RoomId, ZoneId};

    fn hub() -> ApiHub<MockSession> {
        let session = MockSession::new(fixtures::system());
        let mut hub = ApiHub::new(session, HubConfig::default(), Box::new(RecordingUpdater::default()));
        hub.set_clock(fixtures::now);
        hub.update_system();
        hub.session().clear_calls();
        hub
    }

    #[test]
    fn zone_mode_mapping() {
        let now = fixtures::now();
        let mut system = fixtures::system();
        let zone = system.zones[0].clone();
        assert_eq!(zone_hvac_mode(&system.active_mode_zone(&zone, now), zone.current_temperature), HvacMode::Auto);

        system.quick_mode = Some(QuickMode::VentilationBoost);
        assert_eq!(zone_hvac_mode(&system.active_mode_zone(&zone, now), None), HvacMode::FanOnly);
        system.quick_mode = Some(QuickMode::Party);
        assert_eq!(zone_hvac_mode(&system.active_mode_zone(&zone, now), None), HvacMode::Heat);

        system.quick_mode = None;
        system.holiday_mode = Some(fixtures::active_holiday_mode());
        assert_eq!(zone_hvac_mode(&system.active_mode_zone(&zone, now), None), HvacMode::Off);
    }

    #[test]
    fn veto_maps_to_heat_or_cool() {
        let now = fixtures::now();
        let system = fixtures::system();
        let mut zone = system.zones[0].clone();
        zone.quick_veto = Some(QuickVeto::new(28.0, None));
        let active = system.active_mode_zone(&zone, now);
        assert_eq!(zone_hvac_mode(&active, Some(25.0)), HvacMode::Heat);
        zone.quick_veto = Some(QuickVeto::new(14.0, None));
        let active = system.active_mode_zone(&zone, now);
        assert_eq!(zone_hvac_mode(&active, Some(25.0)), HvacMode::Cool);

        let mut room = system.rooms[0].clone();
        room.operating_mode = OperatingMode::Manual;
        let active = system.active_mode_room(&room, now);
        assert_eq!(room_hvac_mode(&active, Some(22.0)), HvacMode::Heat);
    }

    #[test]
    fn reverse_mapping_rejects_unsupported() {
        assert_eq!(operating_mode_for(EntityKind::Zone, HvacMode::Heat), Some(OperatingMode::Day));
        assert_eq!(operating_mode_for(EntityKind::Zone, HvacMode::Cool), Some(OperatingMode::Night));
        assert_eq!(operating_mode_for(EntityKind::Room, HvacMode::Off), Some(OperatingMode::Off));
        assert_eq!(operating_mode_for(EntityKind::Room, HvacMode::Heat), None);
        assert_eq!(operating_mode_for(EntityKind::Zone, HvacMode::FanOnly), None);
        assert_eq!("fan_only".parse::<HvacMode>(), Ok(HvacMode::FanOnly));
    }

    #[test]
    fn attributes_for_auto_and_veto() {
        let now = fixtures::now();
        let mut system = fixtures::system();
        let view = climate_view(&system, &ComponentId::Zone(ZoneId("zone_1".into())), now).unwrap();
        assert_eq!(view.attributes.get(ATTR_MODE).map(String::as_str), Some("AUTO"));
        assert_eq!(view.attributes.get(ATTR_NEXT_SETTING).map(String::as_str), Some("OFF"));
        assert_eq!(
            view.attributes.get(ATTR_SETTING_END).map(String::as_str),
            Some("2024-01-16T00:00:00")
        );
        assert_eq!(view.attributes.get(ATTR_SETTING).map(String::as_str), Some("NIGHT"));

        system.rooms[0].quick_veto = Some(QuickVeto::new(23.5, Some(90)));
        let view = climate_view(&system, &ComponentId::Room(RoomId("1".into())), now).unwrap();
        assert_eq!(view.attributes.get(ATTR_MODE).map(String::as_str), Some("QUICK_VETO"));
        assert_eq!(
            view.attributes.get(ATTR_QUICK_VETO_END).map(String::as_str),
            Some("2024-01-15T13:30:00")
        );
        assert!(!view.attributes.contains_key(ATTR_NEXT_SETTING));
    }

    #[test]
    fn zone_set_temperature_equal_to_target_is_noop() {
        let mut hub = hub();
        // fixture zone is AUTO on a night slot, effective target 22
        assert!(!set_temperature(&mut hub, "climate.multimatic_zone_1", 22.0).unwrap());
        assert!(hub.session().calls().is_empty());

        assert!(set_temperature(&mut hub, "climate.multimatic_zone_1", 21.0).unwrap());
        assert_eq!(hub.session().calls(), vec!["set_zone_quick_veto zone_1 21".to_string()]);
    }

    #[test]
    fn hvac_mode_routes_to_operating_mode() {
        let mut hub = hub();
        set_hvac_mode(&mut hub, "climate.multimatic_zone_1", HvacMode::Heat).unwrap();
        assert_eq!(hub.session().calls(), vec!["set_zone_mode zone_1 DAY".to_string()]);

        let err = set_hvac_mode(&mut hub, "climate.multimatic_room_1", HvacMode::Cool).unwrap_err();
        assert!(matches!(err, HubError::Unsupported { kind: EntityKind::Room, .. }));
    }

    #[test]
    fn describe_renders_every_kind() {
        let now = fixtures::now();
        let system = fixtures::system();
        assert_eq!(
            describe(&system, &ComponentId::Zone(ZoneId("zone_1".into())), now),
            "auto (AUTO) target 22.0 current 25.0"
        );
        let hw = ComponentId::HotWater(crate::models::multimatic::HotWaterId("hot_water".into()));
        assert_eq!(describe(&system, &hw, now), "AUTO target 35.0 current 45.0");
        let circ = ComponentId::Circulation(crate::models::multimatic::CirculationId("circulation".into()));
        assert_eq!(describe(&system, &circ, now), "on (AUTO)");
    }
}
