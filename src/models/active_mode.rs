//! Effective-mode resolution.
//!
//! Precedence, highest first: holiday mode, quick mode (when it targets the
//! component kind), quick veto, the component's own operating mode.

use chrono::NaiveDateTime;

use crate::models::multimatic::{
    Circulation, HotWater, Mode, OperatingMode, QuickMode, Room, SettingMode, System, Zone,
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActiveMode {
    pub target_temperature: Option<f64>,
    pub current_mode: Mode,
    pub sub_mode: Option<SettingMode>,
}

impl ActiveMode {
    fn new(target_temperature: impl Into<Option<f64>>, current_mode: Mode) -> Self {
        ActiveMode {
            target_temperature: target_temperature.into(),
            current_mode,
            sub_mode: None,
        }
    }

    fn with_sub_mode(mut self, sub_mode: Option<SettingMode>) -> Self {
        self.sub_mode = sub_mode;
        self
    }

    pub fn is_operating(&self, mode: OperatingMode) -> bool {
        self.current_mode == Mode::Operating(mode)
    }
}

impl Zone {
    /// Mode of the zone ignoring system-wide overrides.
    pub fn active_mode(&self, now: NaiveDateTime) -> ActiveMode {
        if let Some(veto) = &self.quick_veto {
            return ActiveMode::new(veto.target_temperature, Mode::Operating(OperatingMode::QuickVeto));
        }
        match self.operating_mode {
            OperatingMode::Auto => self.scheduled(now, Mode::Operating(OperatingMode::Auto)),
            OperatingMode::Night => ActiveMode::new(self.target_min_temperature, Mode::Operating(OperatingMode::Night)),
            OperatingMode::Off => ActiveMode::new(Zone::MIN_TARGET_TEMP, Mode::Operating(OperatingMode::Off)),
            other => ActiveMode::new(self.target_temperature, Mode::Operating(other)),
        }
    }

    fn scheduled(&self, now: NaiveDateTime, mode: Mode) -> ActiveMode {
        let day = self
            .time_program
            .setting_at(now)
            .and_then(|s| s.setting)
            .is_some_and(|s| s == SettingMode::Day);
        if day {
            ActiveMode::new(self.target_temperature, mode).with_sub_mode(Some(SettingMode::Day))
        } else {
            ActiveMode::new(self.target_min_temperature, mode).with_sub_mode(Some(SettingMode::Night))
        }
    }
}

impl Room {
    /// Mode of the room ignoring system-wide overrides.
    pub fn active_mode(&self, now: NaiveDateTime) -> ActiveMode {
        if let Some(veto) = &self.quick_veto {
            return ActiveMode::new(veto.target_temperature, Mode::Operating(OperatingMode::QuickVeto));
        }
        match self.operating_mode {
            OperatingMode::Auto => {
                let target = self
                    .time_program
                    .setting_at(now)
                    .and_then(|s| s.target_temperature)
                    .unwrap_or(self.target_temperature);
                ActiveMode::new(target, Mode::Operating(OperatingMode::Auto))
            }
            OperatingMode::Off => ActiveMode::new(Room::MIN_TARGET_TEMP, Mode::Operating(OperatingMode::Off)),
            other => ActiveMode::new(self.target_temperature, Mode::Operating(other)),
        }
    }
}

impl HotWater {
    /// Mode of the hot water ignoring system-wide overrides.
    pub fn active_mode(&self, now: NaiveDateTime) -> ActiveMode {
        match self.operating_mode {
            OperatingMode::Auto => {
                let setting = self.time_program.setting_at(now).and_then(|s| s.setting);
                let mode = Mode::Operating(OperatingMode::Auto);
                if setting == Some(SettingMode::On) {
                    ActiveMode::new(self.target_temperature, mode).with_sub_mode(Some(SettingMode::On))
                } else {
                    ActiveMode::new(HotWater::MIN_TARGET_TEMP, mode).with_sub_mode(Some(SettingMode::Off))
                }
            }
            OperatingMode::Off => ActiveMode::new(HotWater::MIN_TARGET_TEMP, Mode::Operating(OperatingMode::Off)),
            other => ActiveMode::new(self.target_temperature, Mode::Operating(other)),
        }
    }
}

impl Circulation {
    pub fn active_mode(&self, now: NaiveDateTime) -> ActiveMode {
        let mode = Mode::Operating(self.operating_mode);
        match self.operating_mode {
            OperatingMode::Auto => {
                let setting = self.time_program.setting_at(now).and_then(|s| s.setting);
                ActiveMode::new(None::<f64>, mode).with_sub_mode(setting)
            }
            _ => ActiveMode::new(None::<f64>, mode),
        }
    }
}

impl System {
    pub fn active_mode_zone(&self, zone: &Zone, now: NaiveDateTime) -> ActiveMode {
        if let Some(holiday) = self.applied_holiday(now.date()) {
            return ActiveMode::new(holiday.target_temperature, Mode::Holiday);
        }
        if let Some(qm) = self.quick_mode.filter(|qm| qm.for_zone()) {
            let mode = Mode::Quick(qm);
            return match qm {
                QuickMode::Party => ActiveMode::new(zone.target_temperature, mode),
                QuickMode::OneDayAtHome => zone.scheduled(now, mode),
                _ => ActiveMode::new(Zone::MIN_TARGET_TEMP, mode),
            };
        }
        zone.active_mode(now)
    }

    pub fn active_mode_room(&self, room: &Room, now: NaiveDateTime) -> ActiveMode {
        if let Some(holiday) = self.applied_holiday(now.date()) {
            return ActiveMode::new(holiday.target_temperature, Mode::Holiday);
        }
        if let Some(qm) = self.quick_mode.filter(|qm| qm.for_room()) {
            return ActiveMode::new(Room::MIN_TARGET_TEMP, Mode::Quick(qm));
        }
        room.active_mode(now)
    }

    pub fn active_mode_hot_water(&self, hot_water: &HotWater, now: NaiveDateTime) -> ActiveMode {
        if self.applied_holiday(now.date()).is_some() {
            return ActiveMode::new(HotWater::MIN_TARGET_TEMP, Mode::Holiday);
        }
        match self.quick_mode {
            Some(QuickMode::HotwaterBoost) => {
                ActiveMode::new(hot_water.target_temperature, Mode::Quick(QuickMode::HotwaterBoost))
            }
            Some(qm @ (QuickMode::SystemOff | QuickMode::OneDayAway)) => {
                ActiveMode::new(HotWater::MIN_TARGET_TEMP, Mode::Quick(qm))
            }
            _ => hot_water.active_mode(now),
        }
    }

    pub fn active_mode_circulation(&self, circulation: &Circulation, now: NaiveDateTime) -> ActiveMode {
        if self.applied_holiday(now.date()).is_some() {
            return ActiveMode::new(None::<f64>, Mode::Holiday).with_sub_mode(Some(SettingMode::Off));
        }
        match self.quick_mode {
            Some(QuickMode::HotwaterBoost) => {
                ActiveMode::new(None::<f64>, Mode::Quick(QuickMode::HotwaterBoost)).with_sub_mode(Some(SettingMode::On))
            }
            Some(qm @ (QuickMode::SystemOff | QuickMode::OneDayAway)) => {
                ActiveMode::new(None::<f64>, Mode::Quick(qm)).with_sub_mode(Some(SettingMode::Off))
            }
            _ => circulation.active_mode(now),
        }
    }
}
