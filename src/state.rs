//! Owned system snapshot with a version counter.
//!
//! The hub is the single writer. A refresh goes through `replace_snapshot`,
//! every local update after a successful remote call through `apply_patch`.
//! Readers that hold on to a version can tell whether the snapshot changed
//! under them.

use log::warn;

use crate::models::multimatic::{
    HolidayMode, HotWaterId, OperatingMode, QuickMode, QuickVeto, RoomId, System, ZoneId,
};

/// Local update mirroring a remote mutation that already succeeded.
#[derive(Debug, Clone, PartialEq)]
pub enum Patch {
    HolidayMode(Option<HolidayMode>),
    QuickMode(Option<QuickMode>),
    ZoneQuickVeto(ZoneId, Option<QuickVeto>),
    ZoneMode(ZoneId, OperatingMode),
    RoomQuickVeto(RoomId, Option<QuickVeto>),
    RoomMode(RoomId, OperatingMode),
    RoomSetpoint(RoomId, f64),
    HotWaterMode(HotWaterId, OperatingMode),
    HotWaterSetpoint(HotWaterId, f64),
}

#[derive(Debug, Default)]
pub struct SystemState {
    snapshot: Option<System>,
    version: u64,
}

impl SystemState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Option<&System> {
        self.snapshot.as_ref()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn replace_snapshot(&mut self, system: System) {
        self.snapshot = Some(system);
        self.version += 1;
    }

    /// Applies `patch` to the snapshot. Returns false, leaving the version
    /// untouched, when there is no snapshot or the target component is gone.
    pub fn apply_patch(&mut self, patch: Patch) -> bool {
        let Some(system) = self.snapshot.as_mut() else {
            warn!("Dropping {:?}: no snapshot loaded", patch);
            return false;
        };
        let applied = match &patch {
            Patch::HolidayMode(holiday) => {
                system.holiday_mode = holiday.clone();
                true
            }
            Patch::QuickMode(qm) => {
                system.quick_mode = *qm;
                true
            }
            Patch::ZoneQuickVeto(id, veto) => system.zone_mut(id).map(|z| z.quick_veto = veto.clone()).is_some(),
            Patch::ZoneMode(id, mode) => system.zone_mut(id).map(|z| z.operating_mode = *mode).is_some(),
            Patch::RoomQuickVeto(id, veto) => system.room_mut(id).map(|r| r.quick_veto = veto.clone()).is_some(),
            Patch::RoomMode(id, mode) => system.room_mut(id).map(|r| r.operating_mode = *mode).is_some(),
            Patch::RoomSetpoint(id, t) => system.room_mut(id).map(|r| r.target_temperature = *t).is_some(),
            Patch::HotWaterMode(id, mode) => system.hot_water_mut(id).map(|h| h.operating_mode = *mode).is_some(),
            Patch::HotWaterSetpoint(id, t) => system.hot_water_mut(id).map(|h| h.target_temperature = *t).is_some(),
        };
        if applied {
            self.version += 1;
        } else {
            warn!("Dropping {:?}: component not in snapshot", patch);
        }
        applied
    }
}
