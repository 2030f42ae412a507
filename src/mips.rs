//! Client for the MIPS device management API.
//!
//! The API is session based: `signin` sets cookies that the underlying
//! client keeps and replays. An expired session does not produce a 401;
//! the server answers 200 with its JavaScript-required landing page, which
//! is detected here and reported as [`GatewayError::InvalidAuth`].

use crate::config::MipsConfig;
use crate::gate::RateGate;
use crate::http::{GatedClient, GatewayError};
use log::{debug, info};
use reqwest::Method;
use serde::{Deserialize, Deserializer, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;

const AUTH_PATH: &str = "signin";
const GET_DEVICES_PATH: &str = "devices-mips";
const CLIENT_LANG: &str = "en";
const JS_NEEDED_SUBSTRING: &str = "doesn't work properly without JavaScript enabled";
const DEVICE_SORT: &str = "-device_name";

#[derive(Serialize)]
struct AuthForm<'a> {
    login_id: &'a str,
    password: &'a str,
    lang: &'a str,
}

fn id_from_number_or_string<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(i64),
        Str(String),
    }
    match Raw::deserialize(d)? {
        Raw::Num(n) => Ok(n),
        Raw::Str(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// A device as listed by `devices-mips`. Fields the job does not look at
/// are kept verbatim in `extra`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Device {
    #[serde(deserialize_with = "id_from_number_or_string")]
    pub id: i64,
    #[serde(default)]
    pub device_name: Option<String>,
    #[serde(default)]
    pub is_online: Option<serde_json::Value>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Device {
    /// The API reports online state as 0/1, "0"/"1" or a boolean.
    pub fn online(&self) -> bool {
        match &self.is_online {
            Some(serde_json::Value::Bool(b)) => *b,
            Some(serde_json::Value::Number(n)) => n.as_i64() == Some(1),
            Some(serde_json::Value::String(s)) => s == "1" || s.eq_ignore_ascii_case("true"),
            _ => false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Pagination {
    page: u32,
    max: u32,
}

#[derive(Debug, Deserialize)]
struct DevicesPage {
    data: Vec<Device>,
    pagination: Pagination,
}

fn bool_flag_to_int_param(flag: bool) -> &'static str {
    if flag {
        "1"
    } else {
        "0"
    }
}

fn check_auth_marker(body: &str) -> Result<(), GatewayError> {
    if body.contains(JS_NEEDED_SUBSTRING) {
        let preview: String = body.chars().take(200).collect();
        return Err(GatewayError::InvalidAuth(format!("response text: {preview}")));
    }
    Ok(())
}

pub struct MipsClient {
    http: GatedClient,
    user: String,
    password: String,
    authed: Mutex<bool>,
}

impl MipsClient {
    /// Methods this client sends; a method-mode rate config must cover them.
    pub const REQUIRED_METHODS: &'static [&'static str] = &["get", "post"];

    pub fn new(cfg: &MipsConfig, gate: Arc<RateGate>) -> Result<Self, GatewayError> {
        Ok(Self {
            http: GatedClient::new(cfg.target.clone(), gate, true)?,
            user: cfg.user.clone(),
            password: cfg.password.clone(),
            authed: Mutex::new(false),
        })
    }

    async fn signin(&self) -> Result<(), GatewayError> {
        let form = AuthForm {
            login_id: &self.user,
            password: &self.password,
            lang: CLIENT_LANG,
        };
        let res = self
            .http
            .send(Method::POST, AUTH_PATH, |req| req.form(&form))
            .await?;
        let body = res.text().await?;
        check_auth_marker(&body)?;
        debug!("mips auth ok for {}", self.user);
        Ok(())
    }

    /// Signs in unconditionally and marks the session as valid.
    pub async fn auth(&self) -> Result<(), GatewayError> {
        let mut authed = self.authed.lock().await;
        self.signin().await?;
        *authed = true;
        Ok(())
    }

    /// Signs in unless a session is already established. Concurrent callers
    /// share a single sign-in.
    async fn ensure_auth(&self) -> Result<(), GatewayError> {
        let mut authed = self.authed.lock().await;
        if !*authed {
            info!("mips session missing, signing in");
            self.signin().await?;
            *authed = true;
        }
        Ok(())
    }

    async fn invalidate(&self) {
        *self.authed.lock().await = false;
    }

    /// Sends an authenticated request and returns the response body.
    ///
    /// An expired session is reported as `InvalidAuth` and forces a fresh
    /// sign-in on the next call.
    async fn authed_text(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<String, GatewayError> {
        self.ensure_auth().await?;
        let res = self.http.send(method, path, |req| req.query(query)).await?;
        let body = res.text().await?;
        if let Err(e) = check_auth_marker(&body) {
            self.invalidate().await;
            return Err(e);
        }
        Ok(body)
    }

    /// Passthrough for endpoints without a dedicated wrapper.
    pub async fn request_json(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<serde_json::Value, GatewayError> {
        let body = self.authed_text(method, path, query).await?;
        serde_json::from_str(&body).map_err(|e| GatewayError::Decode(e.to_string()))
    }

    /// Fetches every page of `devices-mips`, optionally filtered by online state.
    pub async fn get_devices(&self, is_online: Option<bool>) -> Result<Vec<Device>, GatewayError> {
        let mut devices = Vec::new();
        let mut page: u32 = 1;
        loop {
            let mut query = vec![("sort", DEVICE_SORT.to_string()), ("page", page.to_string())];
            if let Some(flag) = is_online {
                query.push(("is_online", bool_flag_to_int_param(flag).to_string()));
            }
            let body = self.authed_text(Method::GET, GET_DEVICES_PATH, &query).await?;
            let parsed: DevicesPage =
                serde_json::from_str(&body).map_err(|e| GatewayError::Decode(e.to_string()))?;
            debug!(
                "fetched devices page {}/{} ({} items)",
                parsed.pagination.page,
                parsed.pagination.max,
                parsed.data.len()
            );
            devices.extend(parsed.data);
            if parsed.pagination.page >= parsed.pagination.max {
                return Ok(devices);
            }
            page = parsed.pagination.page + 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_ids_accept_strings_and_numbers() {
        let d: Device = serde_json::from_value(serde_json::json!({
            "id": "112", "device_name": "lobby", "is_online": 1, "model": "X1"
        }))
        .unwrap();
        assert_eq!(d.id, 112);
        assert!(d.online());
        assert_eq!(d.extra["model"], "X1");

        let d: Device = serde_json::from_value(serde_json::json!({"id": 7})).unwrap();
        assert_eq!(d.id, 7);
        assert!(!d.online());
        assert!(serde_json::from_value::<Device>(serde_json::json!({"id": "abc"})).is_err());
    }

    #[test]
    fn online_flag_variants() {
        let mk = |v: serde_json::Value| Device {
            id: 1,
            device_name: None,
            is_online: Some(v),
            extra: Default::default(),
        };
        assert!(mk(serde_json::json!(true)).online());
        assert!(mk(serde_json::json!("1")).online());
        assert!(!mk(serde_json::json!("0")).online());
        assert!(!mk(serde_json::json!(0)).online());
    }

    #[test]
    fn auth_marker_detection() {
        assert!(check_auth_marker("{\"data\": []}").is_ok());
        let page = "<noscript>trunk_1.0.0 doesn't work properly without JavaScript enabled</noscript>";
        assert!(matches!(check_auth_marker(page), Err(GatewayError::InvalidAuth(_))));
    }
}
