//! Mode reconciliation hub.
//!
//! Owns the system snapshot, the entity registry and the remote session.
//! Every mutation follows the same shape:
//! 1) resolve the entity id to a component once,
//! 2) clear system-wide overrides that would mask the request,
//! 3) issue the remote calls in order, patching local state only after each
//!    call returned successfully,
//! 4) schedule entity refreshes, all listening entities when a system-wide
//!    override was touched, only the acting entity otherwise.
//!
//! Remote errors from mutations propagate unchanged. Refresh errors are
//! logged and swallowed; the throttle window stays consumed.

use chrono::{Local, NaiveDate, NaiveDateTime};
use log::{debug, error, info};
use std::time::{Duration, Instant};

use crate::client::{ApiError, RemoteSession};
use crate::entities::{EntityHandle, EntityRegistry, EntityUpdater};
use crate::models::multimatic::{
    Component, ComponentId, EntityKind, HolidayMode, HotWater, OperatingMode, QuickMode, QuickVeto, Room, System, Zone,
};
use crate::state::{Patch, SystemState};
use crate::throttle::Throttle;

pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_QUICK_VETO_DURATION_MINS: u32 = 3 * 60;

#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("remote api error: {0}")]
    Api(#[from] ApiError),
    #[error("no system snapshot loaded yet")]
    NoSnapshot,
    #[error("unknown entity: {0}")]
    UnknownEntity(String),
    #[error("entity {0} is not backed by a component")]
    NotAComponent(String),
    #[error("{0} not found in snapshot")]
    ComponentMissing(ComponentId),
    #[error("{operation} not supported for {kind:?}")]
    Unsupported { operation: &'static str, kind: EntityKind },
    #[error("mode {mode} not valid for {kind:?}")]
    InvalidMode { mode: OperatingMode, kind: EntityKind },
    #[error("temperature {temperature} outside {min}..={max}")]
    TemperatureOutOfRange { temperature: f64, min: f64, max: f64 },
    #[error("holiday ends ({end}) before it starts ({start})")]
    InvalidHolidayRange { start: NaiveDate, end: NaiveDate },
}

#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Minimum time between two remote fetches.
    pub scan_interval: Duration,
    /// Minutes applied to a quick veto when the caller gives none.
    pub quick_veto_duration: u32,
}

impl Default for HubConfig {
    fn default() -> Self {
        HubConfig {
            scan_interval: DEFAULT_SCAN_INTERVAL,
            quick_veto_duration: DEFAULT_QUICK_VETO_DURATION_MINS,
        }
    }
}

fn local_now() -> NaiveDateTime {
    Local::now().naive_local()
}

pub struct ApiHub<S: RemoteSession> {
    session: S,
    state: SystemState,
    registry: EntityRegistry,
    updater: Box<dyn EntityUpdater>,
    throttle: Throttle,
    quick_veto_duration: u32,
    clock: fn() -> NaiveDateTime,
    last_refresh_failed: bool,
}

impl<S: RemoteSession> ApiHub<S> {
    pub fn new(session: S, config: HubConfig, updater: Box<dyn EntityUpdater>) -> Self {
        ApiHub {
            session,
            state: SystemState::new(),
            registry: EntityRegistry::new(),
            updater,
            throttle: Throttle::new(config.scan_interval),
            quick_veto_duration: config.quick_veto_duration,
            clock: local_now,
            last_refresh_failed: false,
        }
    }

    /// Replaces the wall clock used for schedules and holiday ranges.
    pub fn set_clock(&mut self, clock: fn() -> NaiveDateTime) {
        self.clock = clock;
    }

    pub fn now(&self) -> NaiveDateTime {
        (self.clock)()
    }

    pub fn session(&self) -> &S {
        &self.session
    }

    pub fn snapshot(&self) -> Result<&System, HubError> {
        self.state.snapshot().ok_or(HubError::NoSnapshot)
    }

    pub fn version(&self) -> u64 {
        self.state.version()
    }

    /// The last throttled refresh failed and the snapshot may be stale.
    pub fn last_refresh_failed(&self) -> bool {
        self.last_refresh_failed
    }

    // ---------------------
    // Entity registry
    // ---------------------

    pub fn unregister_entity(&mut self, entity_id: &str) -> Option<EntityHandle> {
        self.registry.unregister(entity_id)
    }

    pub fn get_entity(&self, entity_id: &str) -> Option<&EntityHandle> {
        self.registry.get(entity_id)
    }

    pub fn entities(&self) -> impl Iterator<Item = &EntityHandle> {
        self.registry.iter()
    }

    /// Freshest copy of a component by identity.
    pub fn find_component(&self, id: &ComponentId) -> Option<Component<'_>> {
        self.state.snapshot()?.find_component(id)
    }

    pub fn component_of(&self, entity_id: &str) -> Result<ComponentId, HubError> {
        let handle = self
            .get_entity(entity_id)
            .ok_or_else(|| HubError::UnknownEntity(entity_id.to_string()))?;
        handle
            .component
            .clone()
            .ok_or_else(|| HubError::NotAComponent(entity_id.to_string()))
    }

    /// Asks every registered entity to re-render.
    pub fn notify_all(&self) {
        for handle in self.registry.iter() {
            self.updater.schedule_update(&handle.entity_id);
        }
    }

    fn refresh_entities(&self, acting: Option<&str>, full: bool) {
        if full {
            for handle in self.registry.listening() {
                self.updater.schedule_update(&handle.entity_id);
            }
        }
        if let Some(entity_id) = acting {
            self.updater.schedule_update(entity_id);
        }
    }

    fn patch(&mut self, patch: Patch) {
        self.state.apply_patch(patch);
    }

    // ---------------------
    // Refresh
    // ---------------------

    /// Throttled refresh. Returns true when a new snapshot was loaded.
    pub fn update_system(&mut self) -> bool {
        if !self.throttle.try_acquire(Instant::now()) {
            debug!("Skipping refresh, last one less than {:?} ago", self.throttle.min_interval());
            return false;
        }
        self.refresh()
    }

    fn refresh(&mut self) -> bool {
        let fetched = self
            .session
            .request_hvac_update()
            .and_then(|_| self.session.fetch_system());
        match fetched {
            Ok(system) => {
                let (added, removed) = self.registry.sync(&system);
                if added > 0 || removed > 0 {
                    info!("Entities: {} added, {} removed", added, removed);
                }
                self.state.replace_snapshot(system);
                self.last_refresh_failed = false;
                debug!("System refreshed (version {})", self.state.version());
                true
            }
            Err(e) => {
                error!("Cannot update system, keeping previous snapshot: {}", e);
                self.last_refresh_failed = true;
                false
            }
        }
    }

    // ---------------------
    // Override reconciliation
    // ---------------------

    /// Removes holiday mode when it governs the installation, otherwise the
    /// quick mode when it targets `kind`. True when something was removed.
    pub fn clear_conflicting_overrides(&mut self, kind: EntityKind) -> Result<bool, HubError> {
        let today = self.now().date();
        let (holiday, quick_mode) = {
            let system = self.snapshot()?;
            (system.applied_holiday(today).is_some(), system.quick_mode)
        };
        if holiday {
            debug!("Removing holiday mode before acting on {:?}", kind);
            self.session.remove_holiday_mode()?;
            self.patch(Patch::HolidayMode(Some(HolidayMode::inactive())));
            return Ok(true);
        }
        if let Some(qm) = quick_mode.filter(|qm| qm.applies_to(kind)) {
            debug!("Removing quick mode {} before acting on {:?}", qm, kind);
            self.session.remove_quick_mode()?;
            self.patch(Patch::QuickMode(None));
            return Ok(true);
        }
        Ok(false)
    }

    fn zone(&self, component: &ComponentId) -> Result<&Zone, HubError> {
        let missing = || HubError::ComponentMissing(component.clone());
        match component {
            ComponentId::Zone(id) => self.snapshot()?.zone(id).ok_or_else(missing),
            _ => Err(missing()),
        }
    }

    fn room(&self, component: &ComponentId) -> Result<&Room, HubError> {
        let missing = || HubError::ComponentMissing(component.clone());
        match component {
            ComponentId::Room(id) => self.snapshot()?.room(id).ok_or_else(missing),
            _ => Err(missing()),
        }
    }

    fn hot_water(&self, component: &ComponentId) -> Result<&HotWater, HubError> {
        let missing = || HubError::ComponentMissing(component.clone());
        match component {
            ComponentId::HotWater(id) => self.snapshot()?.hot_water_by_id(id).ok_or_else(missing),
            _ => Err(missing()),
        }
    }

    fn check_range(temperature: f64, min: f64, max: f64) -> Result<(), HubError> {
        if (min..=max).contains(&temperature) {
            Ok(())
        } else {
            Err(HubError::TemperatureOutOfRange { temperature, min, max })
        }
    }

    /// Target temperature for a zone, room or hot water.
    pub fn set_target_temperature(&mut self, entity_id: &str, temperature: f64) -> Result<(), HubError> {
        let component = self.component_of(entity_id)?;
        let touched = match &component {
            ComponentId::Zone(_) => self.set_zone_target_temperature(&component, temperature)?,
            ComponentId::Room(_) => self.set_room_target_temperature(&component, temperature)?,
            ComponentId::HotWater(_) => self.set_hot_water_target_temperature(&component, temperature)?,
            ComponentId::Circulation(_) => {
                return Err(HubError::Unsupported {
                    operation: "set_target_temperature",
                    kind: component.kind(),
                });
            }
        };
        self.refresh_entities(Some(entity_id), touched);
        Ok(())
    }

    fn set_zone_target_temperature(&mut self, component: &ComponentId, temperature: f64) -> Result<bool, HubError> {
        Self::check_range(temperature, Zone::MIN_TARGET_TEMP, Zone::MAX_TARGET_TEMP)?;
        let id = self.zone(component)?.id.clone();
        let touched = self.clear_conflicting_overrides(EntityKind::Zone)?;

        if self.zone(component)?.quick_veto.is_some() {
            self.session.remove_zone_quick_veto(&id)?;
            self.patch(Patch::ZoneQuickVeto(id.clone(), None));
        }
        let veto = QuickVeto::new(temperature, None);
        debug!("Setting quick veto {} on zone {}", temperature, id.0);
        self.session.set_zone_quick_veto(&id, &veto)?;
        self.patch(Patch::ZoneQuickVeto(id, Some(veto)));
        Ok(touched)
    }

    fn set_room_target_temperature(&mut self, component: &ComponentId, temperature: f64) -> Result<bool, HubError> {
        Self::check_range(temperature, Room::MIN_TARGET_TEMP, Room::MAX_TARGET_TEMP)?;
        let id = self.room(component)?.id.clone();
        let touched = self.clear_conflicting_overrides(EntityKind::Room)?;

        let now = self.now();
        let (manual, has_veto) = {
            let room = self.room(component)?;
            let active = self.snapshot()?.active_mode_room(room, now);
            (active.is_operating(OperatingMode::Manual), room.quick_veto.is_some())
        };
        if manual {
            debug!("Setting setpoint {} on manual room {}", temperature, id.0);
            self.session.set_room_setpoint(&id, temperature)?;
            self.patch(Patch::RoomSetpoint(id, temperature));
            return Ok(touched);
        }
        if has_veto {
            self.session.remove_room_quick_veto(&id)?;
            self.patch(Patch::RoomQuickVeto(id.clone(), None));
        }
        let veto = QuickVeto::new(temperature, Some(self.quick_veto_duration));
        debug!("Setting quick veto {} on room {}", temperature, id.0);
        self.session.set_room_quick_veto(&id, &veto)?;
        self.patch(Patch::RoomQuickVeto(id, Some(veto)));
        Ok(touched)
    }

    fn set_hot_water_target_temperature(
        &mut self,
        component: &ComponentId,
        temperature: f64,
    ) -> Result<bool, HubError> {
        Self::check_range(temperature, HotWater::MIN_TARGET_TEMP, HotWater::MAX_TARGET_TEMP)?;
        let id = self.hot_water(component)?.id.clone();
        let touched = self.clear_conflicting_overrides(EntityKind::HotWater)?;

        let now = self.now();
        let off = {
            let hot_water = self.hot_water(component)?;
            self.snapshot()?
                .active_mode_hot_water(hot_water, now)
                .is_operating(OperatingMode::Off)
        };
        if off || touched {
            debug!("Switching hot water {} on", id.0);
            self.session.set_hot_water_mode(&id, OperatingMode::On)?;
            self.patch(Patch::HotWaterMode(id.clone(), OperatingMode::On));
        }
        debug!("Setting hot water {} setpoint {}", id.0, temperature);
        self.session.set_hot_water_setpoint(&id, temperature)?;
        self.patch(Patch::HotWaterSetpoint(id, temperature));
        Ok(touched)
    }

    /// Switches the own operating mode of a zone, room or hot water,
    /// clearing overrides and any quick veto first.
    pub fn set_operating_mode(&mut self, entity_id: &str, mode: OperatingMode) -> Result<(), HubError> {
        let component = self.component_of(entity_id)?;
        let kind = component.kind();
        if kind == EntityKind::Circulation {
            return Err(HubError::Unsupported {
                operation: "set_operating_mode",
                kind,
            });
        }
        if !mode.is_valid_for(kind) {
            return Err(HubError::InvalidMode { mode, kind });
        }

        let touched = match &component {
            ComponentId::Zone(_) => {
                let id = self.zone(&component)?.id.clone();
                let touched = self.clear_conflicting_overrides(kind)?;
                if self.zone(&component)?.quick_veto.is_some() {
                    self.session.remove_zone_quick_veto(&id)?;
                    self.patch(Patch::ZoneQuickVeto(id.clone(), None));
                }
                debug!("Setting zone {} mode {}", id.0, mode);
                self.session.set_zone_mode(&id, mode)?;
                self.patch(Patch::ZoneMode(id, mode));
                touched
            }
            ComponentId::Room(_) => {
                let id = self.room(&component)?.id.clone();
                let touched = self.clear_conflicting_overrides(kind)?;
                if self.room(&component)?.quick_veto.is_some() {
                    self.session.remove_room_quick_veto(&id)?;
                    self.patch(Patch::RoomQuickVeto(id.clone(), None));
                }
                debug!("Setting room {} mode {}", id.0, mode);
                self.session.set_room_mode(&id, mode)?;
                self.patch(Patch::RoomMode(id, mode));
                touched
            }
            ComponentId::HotWater(_) => {
                let id = self.hot_water(&component)?.id.clone();
                let touched = self.clear_conflicting_overrides(kind)?;
                debug!("Setting hot water {} mode {}", id.0, mode);
                self.session.set_hot_water_mode(&id, mode)?;
                self.patch(Patch::HotWaterMode(id, mode));
                touched
            }
            ComponentId::Circulation(_) => false,
        };
        self.refresh_entities(Some(entity_id), touched);
        Ok(())
    }

    // ---------------------
    // Quick veto
    // ---------------------

    /// Sets a quick veto on a zone or room without touching holiday or quick
    /// mode. `duration` defaults to the configured minutes.
    pub fn set_quick_veto(&mut self, entity_id: &str, temperature: f64, duration: Option<u32>) -> Result<(), HubError> {
        let component = self.component_of(entity_id)?;
        let veto = QuickVeto::new(temperature, Some(duration.unwrap_or(self.quick_veto_duration)));
        match &component {
            ComponentId::Zone(_) => {
                Self::check_range(temperature, Zone::MIN_TARGET_TEMP, Zone::MAX_TARGET_TEMP)?;
                let zone = self.zone(&component)?;
                let (id, has_veto) = (zone.id.clone(), zone.quick_veto.is_some());
                if has_veto {
                    self.session.remove_zone_quick_veto(&id)?;
                    self.patch(Patch::ZoneQuickVeto(id.clone(), None));
                }
                self.session.set_zone_quick_veto(&id, &veto)?;
                self.patch(Patch::ZoneQuickVeto(id, Some(veto)));
            }
            ComponentId::Room(_) => {
                Self::check_range(temperature, Room::MIN_TARGET_TEMP, Room::MAX_TARGET_TEMP)?;
                let room = self.room(&component)?;
                let (id, has_veto) = (room.id.clone(), room.quick_veto.is_some());
                if has_veto {
                    self.session.remove_room_quick_veto(&id)?;
                    self.patch(Patch::RoomQuickVeto(id.clone(), None));
                }
                self.session.set_room_quick_veto(&id, &veto)?;
                self.patch(Patch::RoomQuickVeto(id, Some(veto)));
            }
            ComponentId::HotWater(_) | ComponentId::Circulation(_) => {
                return Err(HubError::Unsupported {
                    operation: "set_quick_veto",
                    kind: component.kind(),
                });
            }
        }
        self.refresh_entities(Some(entity_id), false);
        Ok(())
    }

    /// Removes the quick veto of a zone or room. False when there was none.
    pub fn remove_quick_veto(&mut self, entity_id: &str) -> Result<bool, HubError> {
        let component = self.component_of(entity_id)?;
        match &component {
            ComponentId::Zone(_) => {
                let zone = self.zone(&component)?;
                if zone.quick_veto.is_none() {
                    return Ok(false);
                }
                let id = zone.id.clone();
                self.session.remove_zone_quick_veto(&id)?;
                self.patch(Patch::ZoneQuickVeto(id, None));
            }
            ComponentId::Room(_) => {
                let room = self.room(&component)?;
                if room.quick_veto.is_none() {
                    return Ok(false);
                }
                let id = room.id.clone();
                self.session.remove_room_quick_veto(&id)?;
                self.patch(Patch::RoomQuickVeto(id, None));
            }
            ComponentId::HotWater(_) | ComponentId::Circulation(_) => {
                return Err(HubError::Unsupported {
                    operation: "remove_quick_veto",
                    kind: component.kind(),
                });
            }
        }
        self.refresh_entities(Some(entity_id), false);
        Ok(true)
    }

    // ---------------------
    // System-wide overrides
    // ---------------------

    /// Removes the quick mode. With an entity, only when the quick mode
    /// targets that entity's kind. True when a removal happened.
    pub fn remove_quick_mode(&mut self, entity_id: Option<&str>) -> Result<bool, HubError> {
        let Some(qm) = self.snapshot()?.quick_mode else {
            return Ok(false);
        };
        if let Some(entity_id) = entity_id {
            let kind = self.component_of(entity_id)?.kind();
            if !qm.applies_to(kind) {
                debug!("Quick mode {} does not target {:?}, keeping it", qm, kind);
                return Ok(false);
            }
        }
        debug!("Removing quick mode {}", qm);
        self.session.remove_quick_mode()?;
        self.patch(Patch::QuickMode(None));
        self.refresh_entities(entity_id, true);
        Ok(true)
    }

    /// True when an active holiday mode was removed.
    pub fn remove_holiday_mode(&mut self) -> Result<bool, HubError> {
        let active = self.snapshot()?.holiday_mode.as_ref().is_some_and(|h| h.active);
        if !active {
            return Ok(false);
        }
        debug!("Removing holiday mode");
        self.session.remove_holiday_mode()?;
        self.patch(Patch::HolidayMode(Some(HolidayMode::inactive())));
        self.refresh_entities(None, true);
        Ok(true)
    }

    pub fn set_holiday_mode(&mut self, start: NaiveDate, end: NaiveDate, temperature: f64) -> Result<(), HubError> {
        if end < start {
            return Err(HubError::InvalidHolidayRange { start, end });
        }
        Self::check_range(temperature, Zone::MIN_TARGET_TEMP, Zone::MAX_TARGET_TEMP)?;
        self.snapshot()?;
        debug!("Setting holiday mode {} to {} at {}", start, end, temperature);
        self.session.set_holiday_mode(start, end, temperature)?;
        self.patch(Patch::HolidayMode(Some(HolidayMode::new(start, end, temperature))));
        self.refresh_entities(None, true);
        Ok(())
    }

    /// Sets `mode`, removing any quick mode already set.
    pub fn set_quick_mode(&mut self, mode: QuickMode) -> Result<(), HubError> {
        if let Some(current) = self.snapshot()?.quick_mode {
            debug!("Replacing quick mode {} with {}", current, mode);
            self.session.remove_quick_mode()?;
            self.patch(Patch::QuickMode(None));
        }
        self.session.set_quick_mode(mode)?;
        self.patch(Patch::QuickMode(Some(mode)));
        self.refresh_entities(None, true);
        Ok(())
    }

    /// Ends the remote session. Failures are logged, never fatal.
    pub fn logout(&self) -> bool {
        match self.session.logout() {
            Ok(()) => {
                info!("Logged out");
                true
            }
            Err(e) => {
                error!("Cannot logout: {}", e);
                false
            }
        }
    }
}
