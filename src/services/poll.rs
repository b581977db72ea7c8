use log::{info, warn};
use std::thread;
use std::time::{Duration, Instant};

use crate::client::RemoteSession;
use crate::hub::ApiHub;
use crate::models::multimatic::System;

/// Refreshes the snapshot and notifies every entity at a steady cadence.
/// Runs until the process is stopped.
pub fn run_loop<S: RemoteSession>(hub: &mut ApiHub<S>, interval: Duration) {
    loop {
        let tick_start = Instant::now();
        tick(hub);

        // Maintain steady cadence
        let elapsed = tick_start.elapsed();
        if elapsed < interval {
            thread::sleep(interval - elapsed);
        }
    }
}

/// One poll iteration. Returns the summary line when a new snapshot was
/// loaded.
pub fn tick<S: RemoteSession>(hub: &mut ApiHub<S>) -> Option<String> {
    if !hub.update_system() {
        if hub.last_refresh_failed() {
            warn!("Refresh failed, entities keep rendering the previous snapshot");
        }
        return None;
    }
    hub.notify_all();
    let line = hub.snapshot().ok().map(summary)?;
    info!("{}", line);
    Some(line)
}

pub fn summary(system: &System) -> String {
    let temp = |t: Option<f64>| t.map_or_else(|| "-".to_string(), |v| format!("{:.1}", v));
    let boiler = system
        .boiler_status
        .as_ref()
        .map_or_else(|| "-".to_string(), |b| b.status_code.clone());
    let pressure = system
        .boiler_info
        .as_ref()
        .and_then(|i| i.water_pressure)
        .map_or_else(|| "-".to_string(), |p| format!("{:.1}", p));
    format!(
        "zones={} rooms={} outdoor={} boiler={} pressure={} quick_mode={} holiday={} errors={}",
        system.zones.len(),
        system.rooms.len(),
        temp(system.outdoor_temperature),
        boiler,
        pressure,
        system.quick_mode.map_or("-", |qm| qm.name()),
        system.holiday_mode.as_ref().is_some_and(|h| h.active),
        system.errors.len()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{self, MockSession, RecordingUpdater};
    use crate::hub::HubConfig;

    #[test]
    fn tick_refreshes_and_notifies_everyone() {
        let updater = RecordingUpdater::default();
        let mut hub = ApiHub::new(
            MockSession::new(fixtures::system()),
            HubConfig::default(),
            Box::new(updater.clone()),
        );
        let line = tick(&mut hub).unwrap();
        assert_eq!(
            line,
            "zones=1 rooms=1 outdoor=18.0 boiler=S.31 pressure=1.9 quick_mode=- holiday=false errors=0"
        );
        let notified = updater.take();
        assert_eq!(notified.len(), hub.entities().count());

        // throttled
        assert!(tick(&mut hub).is_none());
        assert!(updater.take().is_empty());
    }

    #[test]
    fn failed_tick_notifies_nobody() {
        let session = MockSession::new(fixtures::system());
        session.fail_on("fetch_system");
        let updater = RecordingUpdater::default();
        let mut hub = ApiHub::new(session, HubConfig::default(), Box::new(updater.clone()));
        assert!(tick(&mut hub).is_none());
        assert!(hub.last_refresh_failed());
        assert!(updater.take().is_empty());
    }
}
