//! Blocking HTTP client for the multiMATIC mobile API.
//!
//! - `RemoteSession` is the boundary the hub talks to; `MultimaticClient` is
//!   the production implementation.
//! - Blocking client using `ureq` (no async), cookie-based session.
//! - Authentication is a two-step token exchange. A 401 on any call logs in
//!   again and retries that call once; nothing else is retried.

use chrono::NaiveDate;
use http::{Method, StatusCode};
use log::debug;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::cell::RefCell;
use std::time::Duration;

use crate::models::multimatic::{HotWaterId, OperatingMode, QuickMode, QuickVeto, RoomId, System, ZoneId};
use crate::models::wire::{
    Envelope, FacilitiesBody, HvacStateDto, LiveReportBody, NewTokenBody, RoomsBody, SystemControlBody, SystemPayloads,
    assemble_system,
};

const BASE_URL: &str = "https://smart.vaillant.com/mobile/api/v4";
const NEW_TOKEN_PATH: &str = "/account/authentication/v1/token/new";
const AUTHENTICATE_PATH: &str = "/account/authentication/v1/authenticate";
const LOGOUT_PATH: &str = "/account/authentication/v1/logout";
const FACILITIES_PATH: &str = "/facilities";

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("http {status}: {message}")]
    Http { status: u16, message: String },
    #[error("json error at {path}: {message}")]
    Json { path: String, message: String },
    #[error("unexpected payload: {0}")]
    Payload(String),
    #[error("auth error: {0}")]
    Auth(String),
}

/// Remote calls the hub depends on. Every call blocks until the API answered.
pub trait RemoteSession {
    fn fetch_system(&self) -> Result<System, ApiError>;
    fn request_hvac_update(&self) -> Result<(), ApiError>;

    fn set_hot_water_mode(&self, id: &HotWaterId, mode: OperatingMode) -> Result<(), ApiError>;
    fn set_hot_water_setpoint(&self, id: &HotWaterId, temperature: f64) -> Result<(), ApiError>;

    fn set_room_mode(&self, id: &RoomId, mode: OperatingMode) -> Result<(), ApiError>;
    fn set_room_setpoint(&self, id: &RoomId, temperature: f64) -> Result<(), ApiError>;
    fn set_room_quick_veto(&self, id: &RoomId, veto: &QuickVeto) -> Result<(), ApiError>;
    fn remove_room_quick_veto(&self, id: &RoomId) -> Result<(), ApiError>;

    fn set_zone_mode(&self, id: &ZoneId, mode: OperatingMode) -> Result<(), ApiError>;
    fn set_zone_quick_veto(&self, id: &ZoneId, veto: &QuickVeto) -> Result<(), ApiError>;
    fn remove_zone_quick_veto(&self, id: &ZoneId) -> Result<(), ApiError>;

    fn set_quick_mode(&self, mode: QuickMode) -> Result<(), ApiError>;
    fn remove_quick_mode(&self) -> Result<(), ApiError>;
    fn set_holiday_mode(&self, start: NaiveDate, end: NaiveDate, temperature: f64) -> Result<(), ApiError>;
    fn remove_holiday_mode(&self) -> Result<(), ApiError>;

    fn logout(&self) -> Result<(), ApiError>;
}

#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    pub smartphone_id: String,
}

#[derive(Debug, Default)]
struct SessionState {
    logged_in: bool,
    serial_number: Option<String>,
}

pub struct MultimaticClient {
    agent: ureq::Agent,
    credentials: Credentials,
    session: RefCell<SessionState>,
}

impl MultimaticClient {
    /// Builds the client and logs in. `serial_number` selects the facility;
    /// when `None` the first facility of the account is used.
    pub fn new(credentials: Credentials, serial_number: Option<String>, timeout: Duration) -> Result<Self, ApiError> {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .build();
        let client = MultimaticClient {
            agent: ureq::Agent::new_with_config(config),
            credentials,
            session: RefCell::new(SessionState {
                logged_in: false,
                serial_number,
            }),
        };
        client.login()?;
        Ok(client)
    }

    fn url(path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", BASE_URL, path)
        } else {
            format!("{}/{}", BASE_URL, path)
        }
    }

    fn send(&self, method: &Method, path: &str, body: Option<&Value>) -> Result<(StatusCode, String), ApiError> {
        let url = Self::url(path);
        let accept = ("Accept", "application/json");
        let result = if *method == Method::GET {
            self.agent.get(&url).header(accept.0, accept.1).call()
        } else if *method == Method::DELETE {
            self.agent.delete(&url).header(accept.0, accept.1).call()
        } else if *method == Method::PUT || *method == Method::POST {
            let req = if *method == Method::PUT {
                self.agent.put(&url)
            } else {
                self.agent.post(&url)
            };
            let req = req.header(accept.0, accept.1);
            match body {
                Some(b) => req.send_json(b),
                None => req.send_empty(),
            }
        } else {
            return Err(ApiError::Transport(format!("unsupported method {}", method)));
        };
        let mut resp = result.map_err(|e| ApiError::Transport(e.to_string()))?;
        let status = resp.status();
        let text = resp
            .body_mut()
            .read_to_string()
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        Ok((status, text))
    }

    fn check(status: StatusCode, text: String) -> Result<String, ApiError> {
        if status.is_success() {
            Ok(text)
        } else {
            let message = if text.is_empty() { String::from("<no body>") } else { text };
            Err(ApiError::Http {
                status: status.as_u16(),
                message,
            })
        }
    }

    fn decode<T: DeserializeOwned>(text: &str) -> Result<T, ApiError> {
        let de = &mut serde_json::Deserializer::from_str(text);
        serde_path_to_error::deserialize(de).map_err(|e| ApiError::Json {
            path: e.path().to_string(),
            message: e.inner().to_string(),
        })
    }

    fn login(&self) -> Result<(), ApiError> {
        let Credentials {
            username,
            password,
            smartphone_id,
        } = &self.credentials;

        let new_token = json!({
            "smartphoneId": smartphone_id,
            "username": username,
            "password": password,
        });
        let (status, text) = self.send(&Method::POST, NEW_TOKEN_PATH, Some(&new_token))?;
        if !status.is_success() {
            return Err(ApiError::Auth(format!("http {}: {}", status.as_u16(), text)));
        }
        let token: Envelope<NewTokenBody> = Self::decode(&text)?;

        let authenticate = json!({
            "smartphoneId": smartphone_id,
            "username": username,
            "authToken": token.body.auth_token,
        });
        let (status, text) = self.send(&Method::POST, AUTHENTICATE_PATH, Some(&authenticate))?;
        if !status.is_success() {
            return Err(ApiError::Auth(format!("http {}: {}", status.as_u16(), text)));
        }

        self.session.borrow_mut().logged_in = true;
        debug!("Logged in to multiMATIC API as {}", username);
        Ok(())
    }

    /// Serial number of the facility, resolved from the account on first use.
    fn serial_number(&self) -> Result<String, ApiError> {
        if let Some(serial) = self.session.borrow().serial_number.clone() {
            return Ok(serial);
        }
        let text = self.call(&Method::GET, FACILITIES_PATH, None)?;
        let facilities: Envelope<FacilitiesBody> = Self::decode(&text)?;
        let facility = facilities
            .body
            .facilities_list
            .into_iter()
            .next()
            .ok_or_else(|| ApiError::Payload("account has no facility".to_string()))?;
        debug!(
            "Using facility {} ({})",
            facility.serial_number,
            facility.name.as_deref().unwrap_or("-")
        );
        self.session.borrow_mut().serial_number = Some(facility.serial_number.clone());
        Ok(facility.serial_number)
    }

    fn facility_path(&self, suffix: &str) -> Result<String, ApiError> {
        Ok(format!("/facilities/{}{}", self.serial_number()?, suffix))
    }

    fn call(&self, method: &Method, path: &str, body: Option<&Value>) -> Result<String, ApiError> {
        if !self.session.borrow().logged_in {
            self.login()?;
        }
        let (status, text) = self.send(method, path, body)?;
        if status == StatusCode::UNAUTHORIZED {
            debug!("Session expired on {} {}, logging in again", method, path);
            self.session.borrow_mut().logged_in = false;
            self.login()?;
            let (status, text) = self.send(method, path, body)?;
            return Self::check(status, text);
        }
        Self::check(status, text)
    }

    fn get_json<T: DeserializeOwned>(&self, suffix: &str) -> Result<T, ApiError> {
        let path = self.facility_path(suffix)?;
        let text = self.call(&Method::GET, &path, None)?;
        let envelope: Envelope<T> = Self::decode(&text)?;
        Ok(envelope.body)
    }

    fn put(&self, suffix: &str, body: Option<Value>) -> Result<(), ApiError> {
        let path = self.facility_path(suffix)?;
        self.call(&Method::PUT, &path, body.as_ref()).map(|_| ())
    }

    fn delete(&self, suffix: &str) -> Result<(), ApiError> {
        let path = self.facility_path(suffix)?;
        self.call(&Method::DELETE, &path, None).map(|_| ())
    }
}

fn hot_water_path(id: &HotWaterId) -> String {
    format!("/systemcontrol/v1/dhw/{}/hotwater/configuration", id.0)
}

fn zone_path(id: &ZoneId) -> String {
    format!("/systemcontrol/v1/zones/{}", id.0)
}

fn room_path(id: &RoomId) -> String {
    format!("/rbr/v1/rooms/{}/configuration", id.0)
}

impl RemoteSession for MultimaticClient {
    fn fetch_system(&self) -> Result<System, ApiError> {
        let payloads = SystemPayloads {
            control: self.get_json::<SystemControlBody>("/systemcontrol/v1")?,
            rooms: self.get_json::<RoomsBody>("/rbr/v1/rooms")?,
            live_report: self.get_json::<LiveReportBody>("/livereport/v1")?,
            hvac_state: self.get_json::<Vec<HvacStateDto>>("/hvacstate/v1/overview")?,
        };
        assemble_system(payloads).map_err(ApiError::Payload)
    }

    fn request_hvac_update(&self) -> Result<(), ApiError> {
        self.put("/hvacstate/v1/hvacMessages/update", None)
    }

    fn set_hot_water_mode(&self, id: &HotWaterId, mode: OperatingMode) -> Result<(), ApiError> {
        let body = json!({ "operation_mode": mode.name() });
        self.put(&format!("{}/operation_mode", hot_water_path(id)), Some(body))
    }

    fn set_hot_water_setpoint(&self, id: &HotWaterId, temperature: f64) -> Result<(), ApiError> {
        let body = json!({ "temperature_setpoint": temperature });
        self.put(&format!("{}/temperature_setpoint", hot_water_path(id)), Some(body))
    }

    fn set_room_mode(&self, id: &RoomId, mode: OperatingMode) -> Result<(), ApiError> {
        let body = json!({ "operationMode": mode.name() });
        self.put(&format!("{}/operationMode", room_path(id)), Some(body))
    }

    fn set_room_setpoint(&self, id: &RoomId, temperature: f64) -> Result<(), ApiError> {
        let body = json!({ "temperatureSetpoint": temperature });
        self.put(&format!("{}/temperatureSetpoint", room_path(id)), Some(body))
    }

    fn set_room_quick_veto(&self, id: &RoomId, veto: &QuickVeto) -> Result<(), ApiError> {
        let mut body = json!({ "temperatureSetpoint": veto.target_temperature });
        if let Some(duration) = veto.remaining_duration {
            body["duration"] = json!(duration);
        }
        self.put(&format!("{}/quickVeto", room_path(id)), Some(body))
    }

    fn remove_room_quick_veto(&self, id: &RoomId) -> Result<(), ApiError> {
        self.delete(&format!("{}/quickVeto", room_path(id)))
    }

    fn set_zone_mode(&self, id: &ZoneId, mode: OperatingMode) -> Result<(), ApiError> {
        let body = json!({ "mode": mode.name() });
        self.put(&format!("{}/heating/configuration/mode", zone_path(id)), Some(body))
    }

    fn set_zone_quick_veto(&self, id: &ZoneId, veto: &QuickVeto) -> Result<(), ApiError> {
        let mut body = json!({ "setpoint_temperature": veto.target_temperature });
        if let Some(duration) = veto.remaining_duration {
            body["duration"] = json!(duration);
        }
        self.put(&format!("{}/configuration/quick_veto", zone_path(id)), Some(body))
    }

    fn remove_zone_quick_veto(&self, id: &ZoneId) -> Result<(), ApiError> {
        self.delete(&format!("{}/configuration/quick_veto", zone_path(id)))
    }

    fn set_quick_mode(&self, mode: QuickMode) -> Result<(), ApiError> {
        let body = json!({ "quickmode": { "quickmode": mode.wire_name(), "duration": 0 } });
        self.put("/systemcontrol/v1/configuration/quickmode", Some(body))
    }

    fn remove_quick_mode(&self) -> Result<(), ApiError> {
        self.delete("/systemcontrol/v1/configuration/quickmode")
    }

    fn set_holiday_mode(&self, start: NaiveDate, end: NaiveDate, temperature: f64) -> Result<(), ApiError> {
        let body = json!({
            "active": true,
            "start_date": start.format("%Y-%m-%d").to_string(),
            "end_date": end.format("%Y-%m-%d").to_string(),
            "temperature_setpoint": temperature,
        });
        self.put("/systemcontrol/v1/configuration/holidaymode", Some(body))
    }

    fn remove_holiday_mode(&self) -> Result<(), ApiError> {
        self.delete("/systemcontrol/v1/configuration/holidaymode")
    }

    fn logout(&self) -> Result<(), ApiError> {
        let (status, text) = self.send(&Method::POST, LOGOUT_PATH, None)?;
        self.session.borrow_mut().logged_in = false;
        Self::check(status, text).map(|_| ())
    }
}
