//! One-shot service commands, parsed from command-line arguments.

use chrono::NaiveDate;
use log::info;

use crate::client::RemoteSession;
use crate::hub::{ApiHub, HubError};
use crate::models::multimatic::QuickMode;
use crate::services::climate::{self, HvacMode};
use crate::utils::parse_temperature;

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    SetHolidayMode { start: NaiveDate, end: NaiveDate, temperature: f64 },
    RemoveHolidayMode,
    SetQuickMode(QuickMode),
    RemoveQuickMode { entity_id: Option<String> },
    SetQuickVeto { entity_id: String, temperature: f64, duration: Option<u32> },
    RemoveQuickVeto { entity_id: String },
    SetTemperature { entity_id: String, temperature: f64 },
    SetHvacMode { entity_id: String, mode: HvacMode },
    Status,
}

pub const USAGE: &str = "commands:
  set_holiday_mode START END TEMPERATURE   dates as YYYY-MM-DD
  remove_holiday_mode
  set_quick_mode QUICK_MODE                e.g. PARTY, QM_SYSTEM_OFF
  remove_quick_mode [ENTITY_ID]
  set_quick_veto ENTITY_ID TEMPERATURE [DURATION_MINUTES]
  remove_quick_veto ENTITY_ID
  set_temperature ENTITY_ID TEMPERATURE
  set_hvac_mode ENTITY_ID auto|heat|cool|off
  status
without a command the poll loop runs";

fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| format!("date must be in YYYY-MM-DD format, got {}", raw))
}

fn arity(name: &str, args: &[String], min: usize, max: usize) -> Result<(), String> {
    if args.len() < min || args.len() > max {
        return Err(format!("{}: wrong number of arguments\n{}", name, USAGE));
    }
    Ok(())
}

impl Command {
    /// `None` when no command was given.
    pub fn parse(args: &[String]) -> Result<Option<Command>, String> {
        let Some((name, rest)) = args.split_first() else {
            return Ok(None);
        };
        let cmd = match name.as_str() {
            "set_holiday_mode" => {
                arity(name, rest, 3, 3)?;
                Command::SetHolidayMode {
                    start: parse_date(&rest[0])?,
                    end: parse_date(&rest[1])?,
                    temperature: parse_temperature(&rest[2])?,
                }
            }
            "remove_holiday_mode" => {
                arity(name, rest, 0, 0)?;
                Command::RemoveHolidayMode
            }
            "set_quick_mode" => {
                arity(name, rest, 1, 1)?;
                Command::SetQuickMode(rest[0].parse()?)
            }
            "remove_quick_mode" => {
                arity(name, rest, 0, 1)?;
                Command::RemoveQuickMode {
                    entity_id: rest.first().cloned(),
                }
            }
            "set_quick_veto" => {
                arity(name, rest, 2, 3)?;
                let duration = match rest.get(2) {
                    Some(raw) => Some(
                        raw.parse::<u32>()
                            .ok()
                            .filter(|d| *d > 0)
                            .ok_or_else(|| format!("invalid duration: {}", raw))?,
                    ),
                    None => None,
                };
                Command::SetQuickVeto {
                    entity_id: rest[0].clone(),
                    temperature: parse_temperature(&rest[1])?,
                    duration,
                }
            }
            "remove_quick_veto" => {
                arity(name, rest, 1, 1)?;
                Command::RemoveQuickVeto {
                    entity_id: rest[0].clone(),
                }
            }
            "set_temperature" => {
                arity(name, rest, 2, 2)?;
                Command::SetTemperature {
                    entity_id: rest[0].clone(),
                    temperature: parse_temperature(&rest[1])?,
                }
            }
            "set_hvac_mode" => {
                arity(name, rest, 2, 2)?;
                Command::SetHvacMode {
                    entity_id: rest[0].clone(),
                    mode: rest[1].parse()?,
                }
            }
            "status" => {
                arity(name, rest, 0, 0)?;
                Command::Status
            }
            other => return Err(format!("unknown command: {}\n{}", other, USAGE)),
        };
        Ok(Some(cmd))
    }
}

/// Runs `cmd` against a hub that already holds a snapshot and returns the
/// line to print.
pub fn execute<S: RemoteSession>(hub: &mut ApiHub<S>, cmd: &Command) -> Result<String, HubError> {
    info!("Running {:?}", cmd);
    let message = match cmd {
        Command::SetHolidayMode { start, end, temperature } => {
            hub.set_holiday_mode(*start, *end, *temperature)?;
            format!("holiday mode set from {} to {} at {:.1}", start, end, temperature)
        }
        Command::RemoveHolidayMode => {
            if hub.remove_holiday_mode()? {
                "holiday mode removed".to_string()
            } else {
                "holiday mode was not active".to_string()
            }
        }
        Command::SetQuickMode(qm) => {
            hub.set_quick_mode(*qm)?;
            format!("quick mode {} set", qm)
        }
        Command::RemoveQuickMode { entity_id } => {
            if hub.remove_quick_mode(entity_id.as_deref())? {
                "quick mode removed".to_string()
            } else {
                "no quick mode to remove".to_string()
            }
        }
        Command::SetQuickVeto {
            entity_id,
            temperature,
            duration,
        } => {
            hub.set_quick_veto(entity_id, *temperature, *duration)?;
            format!("quick veto {:.1} set on {}", temperature, entity_id)
        }
        Command::RemoveQuickVeto { entity_id } => {
            if hub.remove_quick_veto(entity_id)? {
                format!("quick veto removed from {}", entity_id)
            } else {
                format!("{} had no quick veto", entity_id)
            }
        }
        Command::SetTemperature { entity_id, temperature } => {
            if climate::set_temperature(hub, entity_id, *temperature)? {
                format!("{} target set to {:.1}", entity_id, temperature)
            } else {
                format!("{} already targets {:.1}", entity_id, temperature)
            }
        }
        Command::SetHvacMode { entity_id, mode } => {
            climate::set_hvac_mode(hub, entity_id, *mode)?;
            format!("{} switched to {}", entity_id, mode)
        }
        Command::Status => status(hub)?,
    };
    Ok(message)
}

/// Multi-line summary of the snapshot and every registered entity.
pub fn status<S: RemoteSession>(hub: &ApiHub<S>) -> Result<String, HubError> {
    let system = hub.snapshot()?;
    let now = hub.now();
    let mut lines = vec![format!(
        "snapshot v{}{}",
        hub.version(),
        if hub.last_refresh_failed() { " (stale)" } else { "" }
    )];
    for handle in hub.entities() {
        lines.push(format!("{}: {}", handle.entity_id, handle.state(system, now)));
    }
    Ok(lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{self, MockSession, RecordingUpdater};
    use crate::hub::HubConfig;

    fn args(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn hub() -> ApiHub<MockSession> {
        let mut hub = ApiHub::new(
            MockSession::new(fixtures::system()),
            HubConfig::default(),
            Box::new(RecordingUpdater::default()),
        );
        hub.set_clock(fixtures::now);
        hub.update_system();
        hub.session().clear_calls();
        hub
    }

    #[test]
    fn parses_commands() {
        assert_eq!(Command::parse(&[]).unwrap(), None);
        assert_eq!(
            Command::parse(&args(&["set_holiday_mode", "2024-07-01", "2024-07-14", "12"])).unwrap(),
            Some(Command::SetHolidayMode {
                start: NaiveDate::from_ymd_opt(2024, 7, 1).unwrap(),
                end: NaiveDate::from_ymd_opt(2024, 7, 14).unwrap(),
                temperature: 12.0,
            })
        );
        assert_eq!(
            Command::parse(&args(&["set_quick_mode", "qm_party"])).unwrap(),
            Some(Command::SetQuickMode(QuickMode::Party))
        );
        assert_eq!(
            Command::parse(&args(&["remove_quick_mode"])).unwrap(),
            Some(Command::RemoveQuickMode { entity_id: None })
        );
        assert_eq!(
            Command::parse(&args(&["set_quick_veto", "climate.multimatic_zone_1", "21.5", "60"])).unwrap(),
            Some(Command::SetQuickVeto {
                entity_id: "climate.multimatic_zone_1".into(),
                temperature: 21.5,
                duration: Some(60),
            })
        );
        assert_eq!(
            Command::parse(&args(&["set_hvac_mode", "climate.multimatic_room_1", "off"])).unwrap(),
            Some(Command::SetHvacMode {
                entity_id: "climate.multimatic_room_1".into(),
                mode: HvacMode::Off,
            })
        );
    }

    #[test]
    fn rejects_bad_arguments() {
        assert!(Command::parse(&args(&["frobnicate"])).is_err());
        assert!(Command::parse(&args(&["status", "extra"])).is_err());
        assert!(Command::parse(&args(&["set_holiday_mode", "01.07.2024", "2024-07-14", "12"])).is_err());
        assert!(Command::parse(&args(&["set_quick_mode", "SIESTA"])).is_err());
        assert!(Command::parse(&args(&["set_quick_veto", "climate.x", "20", "0"])).is_err());
        assert!(Command::parse(&args(&["set_temperature", "climate.x", "hot"])).is_err());
    }

    #[test]
    fn executes_against_hub() {
        let mut hub = hub();
        let msg = execute(&mut hub, &Command::SetQuickMode(QuickMode::Party)).unwrap();
        assert_eq!(msg, "quick mode PARTY set");
        let msg = execute(
            &mut hub,
            &Command::RemoveQuickMode {
                entity_id: Some("climate.multimatic_room_1".into()),
            },
        )
        .unwrap();
        assert_eq!(msg, "no quick mode to remove");
        let msg = execute(&mut hub, &Command::RemoveHolidayMode).unwrap();
        assert_eq!(msg, "holiday mode was not active");
        assert_eq!(hub.session().calls(), vec!["set_quick_mode PARTY".to_string()]);
    }

    #[test]
    fn status_lists_entities() {
        let hub = hub();
        let out = status(&hub).unwrap();
        assert!(out.starts_with("snapshot v1"));
        assert!(out.contains("climate.multimatic_zone_1: auto (AUTO) target 22.0 current 25.0"));
        assert!(out.contains("binary_sensor.multimatic_quick_mode: off"));
    }
}
