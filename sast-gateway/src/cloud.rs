//! Outbound cloud uplinks: Discord webhook, Ambient-style time series, and
//! a Google Apps Script (GAS) endpoint for config pull + log uplink + ACK.
//!
//! Grounded on `original_source/SAST_observer.py`'s `POST_discord`,
//! `sent_Ambient`, `sent_GAS`, `_getSetting4GApps`, `_sendACK2GAS` — same
//! retry counts and backoffs, reimplemented with `reqwest::blocking`
//! instead of the Python `requests` module.

use anyhow::{bail, Context, Result};
use sast_core::model::{Conf, NodeRef, WarnThresholds};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{error, info, warn};

pub struct CloudClient {
    http: reqwest::blocking::Client,
    gas_url: String,
}

impl CloudClient {
    pub fn new(gas_url: String) -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .context("building reqwest client")?;
        Ok(CloudClient { http, gas_url })
    }

    /// POSTs a Discord webhook message, optionally appending a dashboard
    /// link. No retry — matches `POST_discord`'s single-attempt behaviour.
    pub fn post_discord(&self, message: &str, token: &str, link_url: &str) -> Option<u16> {
        let body = if link_url.is_empty() {
            message.to_string()
        } else {
            format!("{message}\n📊 {link_url}")
        };
        let url = format!("https://discord.com/api/webhooks/{token}");
        match self.http.post(&url).json(&json!({ "content": body })).send() {
            Ok(resp) => {
                let status = resp.status().as_u16();
                info!(status, "discord webhook posted");
                Some(status)
            }
            Err(e) => {
                error!(error = %e, "discord webhook failed");
                None
            }
        }
    }

    /// POSTs an Ambient-shaped time series payload; 3 retries, 2s backoff,
    /// HTTP 403 treated as "wait 3s and retry" per `sent_Ambient`. The
    /// channel is keyed by `channelID` (in `write_url`) and `writeKey`
    /// (in the body) — `ambient.Ambient(channel, writeKey)` sends the key
    /// alongside the data array, not just the channel id.
    pub fn post_ambient(&self, write_url: &str, write_key: &str, slots: &BTreeMap<String, f32>) -> bool {
        let mut payload = serde_json::Map::new();
        payload.insert("writeKey".to_string(), json!(write_key));
        for (k, v) in slots {
            payload.insert(k.clone(), json!(v));
        }
        payload.insert("created".to_string(), json!(sast_core::timefmt::now_str()));

        for attempt in 0..3 {
            match self.http.post(write_url).json(&payload).send() {
                Ok(resp) if resp.status().as_u16() == 200 => return true,
                Ok(resp) if resp.status().as_u16() == 403 => {
                    warn!(attempt, "ambient 403, waiting 3s");
                    std::thread::sleep(Duration::from_secs(3));
                    continue;
                }
                Ok(resp) => {
                    warn!(status = resp.status().as_u16(), "ambient post rejected");
                    return false;
                }
                Err(e) => error!(error = %e, attempt, "ambient post failed"),
            }
            std::thread::sleep(Duration::from_secs(2));
        }
        false
    }

    /// POSTs the drained log rows to GAS; 3 retries, 3s backoff.
    pub fn post_gas_log(&self, rows: &[Value]) -> bool {
        for attempt in 0..3 {
            match self.http.post(&self.gas_url).json(rows).send() {
                Ok(resp) if resp.status().as_u16() == 200 => return true,
                Ok(resp) => {
                    warn!(status = resp.status().as_u16(), attempt, "gas log post rejected");
                    return false;
                }
                Err(e) => error!(error = %e, attempt, "gas log post failed"),
            }
            std::thread::sleep(Duration::from_secs(3));
        }
        false
    }

    /// Pulls `?sens=sensor` config, distinguishing the three failure
    /// branches `_getSetting4GApps` treats differently: a transport
    /// exception (skip, no ACK at all), an HTTP non-200 (ACK with a
    /// safe-default empty message — the original references an
    /// uninitialized `mess` on this branch), and an invalid/missing
    /// leading `date` element (ACK with an error message, then abort
    /// without calling `apply_config`).
    pub fn fetch_config(&self) -> ConfigFetchOutcome {
        let url = format!("{}?sens=sensor", self.gas_url);
        let resp = match self.http.get(&url).send() {
            Ok(r) => r,
            Err(e) => {
                error!(error = %e, "gas config fetch failed");
                return ConfigFetchOutcome::TransportError;
            }
        };
        let status = resp.status().as_u16();
        if status != 200 {
            warn!(status, "gas config fetch non-200");
            return ConfigFetchOutcome::NonOk(status);
        }
        let Ok(body) = resp.json::<Vec<Value>>() else {
            return ConfigFetchOutcome::InvalidDate("Update Date is Invalid ... (unparseable response)".into());
        };
        let Some((first, rest)) = body.split_first() else {
            return ConfigFetchOutcome::InvalidDate("Update Date is Invalid ... (empty response)".into());
        };
        let date_str = first.get("date").and_then(|v| v.as_str()).unwrap_or("");
        let Ok(date) = chrono::NaiveDateTime::parse_from_str(date_str, "%Y/%m/%d %H:%M:%S") else {
            return ConfigFetchOutcome::InvalidDate(format!("Update Date is Invalid ... {date_str}"));
        };
        let mut rows = Vec::new();
        for entry in rest {
            if let Some(conf) = parse_conf_row(entry) {
                rows.push(conf);
            }
        }
        ConfigFetchOutcome::Ok(GasConfigResponse { date, rows })
    }

    /// ACKs the config pull outcome; 5 retries at 10s on non-200.
    pub fn ack_config(&self, message: &str) -> Result<()> {
        let url = format!("{}?sens=ack&mess={}", self.gas_url, urlencode(message));
        for attempt in 0..=5 {
            match self.http.get(&url).send() {
                Ok(resp) if resp.status().as_u16() == 200 => return Ok(()),
                Ok(resp) => {
                    if attempt == 5 {
                        bail!("gas ack rejected after retries: status {}", resp.status());
                    }
                    warn!(status = resp.status().as_u16(), attempt, "gas ack rejected, retrying in 10s");
                    std::thread::sleep(Duration::from_secs(10));
                }
                Err(e) => {
                    error!(error = %e, "gas ack transport error");
                    bail!("gas ack transport error: {e}");
                }
            }
        }
        Ok(())
    }
}

fn urlencode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(b as char),
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

pub struct GasConfigResponse {
    pub date: chrono::NaiveDateTime,
    pub rows: Vec<Conf>,
}

/// Outcome of a config pull attempt.
pub enum ConfigFetchOutcome {
    /// Network-level failure; caller skips the cycle entirely, no ACK.
    TransportError,
    /// Non-200 HTTP response; caller ACKs with a safe-default message.
    NonOk(u16),
    /// The leading `date` element was missing or unparseable; caller ACKs
    /// with this message and aborts before calling `apply_config`.
    InvalidDate(String),
    Ok(GasConfigResponse),
}

#[derive(Deserialize)]
struct RawConfRow {
    mac: String,
    name: String,
    node: String,
    #[serde(rename = "use")]
    use_: bool,
    warn: String,
    ambient_conf: Option<String>,
    discord_token: Option<String>,
    memo: Option<String>,
}

fn parse_conf_row(v: &Value) -> Option<Conf> {
    let raw: RawConfRow = serde_json::from_value(v.clone()).ok()?;
    let warn = WarnThresholds::parse(&raw.warn).unwrap_or_default();
    let node = NodeRef::parse(&raw.node)?;
    Some(Conf {
        mac: raw.mac.to_lowercase().parse().ok()?,
        name: raw.name,
        node,
        use_: raw.use_,
        warn,
        ambient_conf: raw.ambient_conf.unwrap_or_default(),
        discord_token: raw.discord_token,
        memo: raw.memo.unwrap_or_default(),
    })
}

/// One `Latest` row, reshaped for the GAS log uplink: `date` as Unix
/// seconds, `node`/`ambient_conf` dropped per `_send_cloud`'s `del` calls.
#[derive(Serialize)]
pub struct GasLogRow {
    pub mac: String,
    pub date: i64,
    pub templ: f32,
    pub humid: f32,
    pub batt: f32,
    pub rssi: i32,
    pub ext: Option<i32>,
    pub light: Option<f32>,
    pub status: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urlencode_escapes_reserved_characters() {
        assert_eq!(urlencode("a b&c"), "a%20b%26c");
    }

    #[test]
    fn parse_conf_row_lowercases_mac_and_parses_node_ref() {
        let v = json!({
            "mac": "AA:BB:CC:DD:EE:01",
            "name": "sensor-a",
            "node": "1",
            "use": true,
            "warn": "NONE,NONE,35.0,40.0",
            "ambient_conf": "d1",
            "discord_token": "tok",
            "memo": ""
        });
        let conf = parse_conf_row(&v).unwrap();
        assert_eq!(conf.mac.to_string(), "aa:bb:cc:dd:ee:01");
        assert_eq!(conf.node.node_no(), 1);
    }

    #[test]
    fn parse_conf_row_rejects_missing_required_fields() {
        let v = json!({ "mac": "aa:bb:cc:dd:ee:01" });
        assert!(parse_conf_row(&v).is_none());
    }

    #[test]
    fn fetch_config_non_200_is_nonok() {
        let mut server = mockito::Server::new();
        let _m = server.mock("GET", "/?sens=sensor").with_status(500).create();
        let client = CloudClient::new(server.url()).unwrap();
        match client.fetch_config() {
            ConfigFetchOutcome::NonOk(status) => assert_eq!(status, 500),
            _ => panic!("expected NonOk"),
        }
    }

    #[test]
    fn fetch_config_bad_date_is_invalid_date() {
        let mut server = mockito::Server::new();
        let body = json!([{ "date": "not-a-date" }]);
        let _m = server
            .mock("GET", "/?sens=sensor")
            .with_status(200)
            .with_body(body.to_string())
            .create();
        let client = CloudClient::new(server.url()).unwrap();
        match client.fetch_config() {
            ConfigFetchOutcome::InvalidDate(mess) => assert!(mess.contains("not-a-date")),
            _ => panic!("expected InvalidDate"),
        }
    }

    #[test]
    fn fetch_config_valid_response_parses_rows() {
        let mut server = mockito::Server::new();
        let body = json!([
            { "date": "2026/07/28 08:00:00" },
            {
                "mac": "AA:BB:CC:DD:EE:01",
                "name": "sensor-a",
                "node": "1",
                "use": true,
                "warn": "NONE,NONE,35.0,40.0",
                "ambient_conf": "d1",
                "discord_token": "tok",
                "memo": ""
            }
        ]);
        let _m = server
            .mock("GET", "/?sens=sensor")
            .with_status(200)
            .with_body(body.to_string())
            .create();
        let client = CloudClient::new(server.url()).unwrap();
        match client.fetch_config() {
            ConfigFetchOutcome::Ok(response) => {
                assert_eq!(response.rows.len(), 1);
                assert_eq!(response.rows[0].mac.to_string(), "aa:bb:cc:dd:ee:01");
            }
            _ => panic!("expected Ok"),
        }
    }
}
