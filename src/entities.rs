//! Entities exposed to the host and the registry the hub keeps of them.
//!
//! An entity is a handle: its id, the component it renders (if any) and
//! whether it listens for system-wide override changes. State is always read
//! from the hub's snapshot, never cached on the handle.

use chrono::NaiveDateTime;
use log::{debug, info};
use std::collections::BTreeMap;

use crate::models::multimatic::{ComponentId, System};
use crate::utils::slugify;

pub const ID_PREFIX: &str = "multimatic";

pub const CLIMATE: &str = "climate";
pub const WATER_HEATER: &str = "water_heater";
pub const BINARY_SENSOR: &str = "binary_sensor";
pub const SENSOR: &str = "sensor";

/// What a handle without a component renders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readout {
    /// Rendered from its component.
    Component,
    Window(String),
    DeviceBattery(String),
    DeviceConnectivity(String),
    DeviceChildLock(String),
    SystemOnline,
    SystemUpdate,
    BoilerError,
    HolidayMode,
    QuickMode,
    SystemError(String),
    OutdoorTemperature,
    WaterPressure,
    FlowTemperature,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EntityHandle {
    pub entity_id: String,
    pub name: String,
    pub component: Option<ComponentId>,
    pub readout: Readout,
    /// Refreshed whenever holiday or quick mode changes.
    pub listening: bool,
    /// Dropped from the registry once its source vanishes from the snapshot.
    pub transient: bool,
}

impl EntityHandle {
    fn for_component(entity_id: String, name: &str, component: ComponentId, listening: bool) -> Self {
        EntityHandle {
            entity_id,
            name: name.to_string(),
            component: Some(component),
            readout: Readout::Component,
            listening,
            transient: false,
        }
    }

    fn readout(entity_id: String, name: &str, readout: Readout) -> Self {
        EntityHandle {
            entity_id,
            name: name.to_string(),
            component: None,
            readout,
            listening: false,
            transient: false,
        }
    }

    /// Whether the thing this handle renders is still part of `system`.
    pub fn is_backed_by(&self, system: &System) -> bool {
        if let Some(component) = &self.component {
            return system.find_component(component).is_some();
        }
        match &self.readout {
            Readout::SystemError(code) => system.errors.iter().any(|e| &e.status_code == code),
            _ => true,
        }
    }

    /// One-line state for logs and the `status` command.
    pub fn state(&self, system: &System, now: NaiveDateTime) -> String {
        if let Some(component) = &self.component {
            return crate::services::climate::describe(system, component, now);
        }
        let on_off = |b: bool| if b { "on" } else { "off" }.to_string();
        let device = |sgtin: &str| system.rooms.iter().flat_map(|r| r.devices.iter()).find(|d| d.sgtin == sgtin);
        match &self.readout {
            Readout::Component => "unavailable".to_string(),
            Readout::Window(room) => system
                .rooms
                .iter()
                .find(|r| &r.name == room)
                .map_or_else(|| "unavailable".to_string(), |r| on_off(r.window_open)),
            Readout::DeviceBattery(sgtin) => device(sgtin.as_str()).map_or_else(|| "unavailable".to_string(), |d| on_off(d.battery_low)),
            Readout::DeviceConnectivity(sgtin) => {
                device(sgtin.as_str()).map_or_else(|| "unavailable".to_string(), |d| on_off(!d.radio_out_of_reach))
            }
            Readout::DeviceChildLock(sgtin) => {
                let locked = system
                    .rooms
                    .iter()
                    .find(|r| r.devices.iter().any(|d| &d.sgtin == sgtin))
                    .map(|r| r.child_lock);
                locked.map_or_else(|| "unavailable".to_string(), on_off)
            }
            Readout::SystemOnline => system
                .system_status
                .as_ref()
                .map_or_else(|| "unavailable".to_string(), |s| on_off(s.online)),
            Readout::SystemUpdate => system
                .system_status
                .as_ref()
                .map_or_else(|| "unavailable".to_string(), |s| on_off(!s.up_to_date)),
            Readout::BoilerError => on_off(system.boiler_status.as_ref().is_some_and(|b| b.is_error())),
            Readout::HolidayMode => match system.applied_holiday(now.date()) {
                Some(h) => format!(
                    "on ({} - {}, {})",
                    h.start_date.map(|d| d.to_string()).unwrap_or_default(),
                    h.end_date.map(|d| d.to_string()).unwrap_or_default(),
                    h.target_temperature.map(|t| format!("{:.1}", t)).unwrap_or_default()
                ),
                None => "off".to_string(),
            },
            Readout::QuickMode => system
                .quick_mode
                .map_or_else(|| "off".to_string(), |qm| format!("on ({})", qm)),
            Readout::SystemError(code) => match system.errors.iter().find(|e| &e.status_code == code) {
                Some(e) => format!("on ({} on {})", e.title, e.device_name),
                None => "off".to_string(),
            },
            Readout::OutdoorTemperature => fmt_reading(system.outdoor_temperature, "°C"),
            Readout::WaterPressure => fmt_reading(system.boiler_info.as_ref().and_then(|b| b.water_pressure), "bar"),
            Readout::FlowTemperature => fmt_reading(system.boiler_info.as_ref().and_then(|b| b.flow_temperature), "°C"),
        }
    }
}

fn fmt_reading(value: Option<f64>, unit: &str) -> String {
    value.map_or_else(|| "unavailable".to_string(), |v| format!("{:.1} {}", v, unit))
}

/// `<domain>.multimatic_<slug>[_<device class>]`
pub fn entity_id(domain: &str, comp_id: &str, device_class: Option<&str>) -> String {
    match device_class {
        Some(class) => format!("{}.{}_{}_{}", domain, ID_PREFIX, slugify(comp_id), class),
        None => format!("{}.{}_{}", domain, ID_PREFIX, slugify(comp_id)),
    }
}

/// Receives refresh requests from the hub. The host decides when the entity
/// actually re-renders.
pub trait EntityUpdater {
    fn schedule_update(&self, entity_id: &str);
}

/// Updater for hosts without a render loop: only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingUpdater;

impl EntityUpdater for LoggingUpdater {
    fn schedule_update(&self, entity_id: &str) {
        debug!("Update scheduled for {}", entity_id);
    }
}

/// Handles for every entity `system` supports.
pub fn discover(system: &System) -> Vec<EntityHandle> {
    let mut out = Vec::new();

    for zone in system.zones.iter().filter(|z| !z.rbr) {
        out.push(EntityHandle::for_component(
            entity_id(CLIMATE, &zone.id.0, None),
            &zone.name,
            ComponentId::Zone(zone.id.clone()),
            true,
        ));
    }
    for room in &system.rooms {
        out.push(EntityHandle::for_component(
            entity_id(CLIMATE, &room.name, None),
            &room.name,
            ComponentId::Room(room.id.clone()),
            true,
        ));
        out.push(EntityHandle::readout(
            entity_id(BINARY_SENSOR, &room.name, Some("window")),
            &room.name,
            Readout::Window(room.name.clone()),
        ));
        for device in &room.devices {
            if device.device_type == "VALVE" {
                out.push(EntityHandle::readout(
                    entity_id(BINARY_SENSOR, &device.sgtin, Some("lock")),
                    &device.name,
                    Readout::DeviceChildLock(device.sgtin.clone()),
                ));
            }
            out.push(EntityHandle::readout(
                entity_id(BINARY_SENSOR, &device.sgtin, Some("battery")),
                &device.name,
                Readout::DeviceBattery(device.sgtin.clone()),
            ));
            out.push(EntityHandle::readout(
                entity_id(BINARY_SENSOR, &device.sgtin, Some("connectivity")),
                &device.name,
                Readout::DeviceConnectivity(device.sgtin.clone()),
            ));
        }
    }
    if let Some(hot_water) = &system.hot_water {
        out.push(EntityHandle::for_component(
            entity_id(WATER_HEATER, &hot_water.id.0, None),
            &hot_water.name,
            ComponentId::HotWater(hot_water.id.clone()),
            true,
        ));
    }
    if let Some(circulation) = &system.circulation {
        out.push(EntityHandle::for_component(
            entity_id(BINARY_SENSOR, &circulation.id.0, Some("power")),
            &circulation.name,
            ComponentId::Circulation(circulation.id.clone()),
            false,
        ));
    }
    if let Some(boiler) = &system.boiler_status {
        out.push(EntityHandle::readout(
            entity_id(BINARY_SENSOR, &boiler.device_name, None),
            &boiler.device_name,
            Readout::BoilerError,
        ));
    }
    if system.system_status.is_some() {
        out.push(EntityHandle::readout(
            entity_id(BINARY_SENSOR, "system_online", None),
            "System Online",
            Readout::SystemOnline,
        ));
        out.push(EntityHandle::readout(
            entity_id(BINARY_SENSOR, "system_update", None),
            "System update",
            Readout::SystemUpdate,
        ));
    }
    out.push(EntityHandle::readout(entity_id(BINARY_SENSOR, "holiday", None), "holiday", Readout::HolidayMode));
    out.push(EntityHandle::readout(
        entity_id(BINARY_SENSOR, "quick_mode", None),
        "quick_mode",
        Readout::QuickMode,
    ));
    for error in &system.errors {
        let mut handle = EntityHandle::readout(
            entity_id(BINARY_SENSOR, &format!("error_{}", error.status_code), None),
            &error.title,
            Readout::SystemError(error.status_code.clone()),
        );
        handle.transient = true;
        out.push(handle);
    }
    if system.outdoor_temperature.is_some() {
        out.push(EntityHandle::readout(
            entity_id(SENSOR, "outdoor", Some("temperature")),
            "Outdoor",
            Readout::OutdoorTemperature,
        ));
    }
    if let Some(info) = &system.boiler_info {
        let device = system.boiler_status.as_ref().map_or("boiler", |b| b.device_name.as_str());
        if info.water_pressure.is_some() {
            out.push(EntityHandle::readout(
                entity_id(SENSOR, device, Some("pressure")),
                device,
                Readout::WaterPressure,
            ));
        }
        if info.flow_temperature.is_some() {
            out.push(EntityHandle::readout(
                entity_id(SENSOR, device, Some("temperature")),
                device,
                Readout::FlowTemperature,
            ));
        }
    }
    out
}

#[derive(Debug, Default)]
pub struct EntityRegistry {
    entities: BTreeMap<String, EntityHandle>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when an entity with the same id is already registered.
    pub fn register(&mut self, handle: EntityHandle) -> bool {
        if self.entities.contains_key(&handle.entity_id) {
            return false;
        }
        self.entities.insert(handle.entity_id.clone(), handle);
        true
    }

    pub fn unregister(&mut self, entity_id: &str) -> Option<EntityHandle> {
        self.entities.remove(entity_id)
    }

    pub fn get(&self, entity_id: &str) -> Option<&EntityHandle> {
        self.entities.get(entity_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &EntityHandle> {
        self.entities.values()
    }

    pub fn listening(&self) -> impl Iterator<Item = &EntityHandle> {
        self.entities.values().filter(|e| e.listening)
    }

    /// Registers entities new in `system` and drops transient ones whose
    /// source is gone. Returns (added, removed).
    pub fn sync(&mut self, system: &System) -> (usize, usize) {
        let stale: Vec<String> = self
            .entities
            .values()
            .filter(|e| e.transient && !e.is_backed_by(system))
            .map(|e| e.entity_id.clone())
            .collect();
        for id in &stale {
            info!("Removing {}: no longer reported", id);
            self.unregister(id);
        }
        let mut added = 0;
        for handle in discover(system) {
            let id = handle.entity_id.clone();
            if self.register(handle) {
                debug!("Registered {}", id);
                added += 1;
            }
        }
        (added, stale.len())
    }
}
