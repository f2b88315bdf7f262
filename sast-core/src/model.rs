//! Fixed record types for the on-disk schema.
//!
//! The original Python passes rows around as untyped dicts; this port gives
//! every table a concrete struct instead.

use chrono::NaiveDateTime;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Sensor / node MAC address, canonical lowercase colon-hex.
///
/// `00:00:00:00:00:NN` is the synthetic node-body identifier for Node `NN`
/// (carries node telemetry, not a sensor reading) — see [`Mac::is_node_body`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Mac([u8; 6]);

impl Mac {
    pub fn new(bytes: [u8; 6]) -> Self {
        Mac(bytes)
    }

    /// Synthetic mac carrying Node `node_no`'s own body telemetry.
    pub fn node_body(node_no: u8) -> Self {
        Mac([0, 0, 0, 0, 0, node_no])
    }

    pub fn bytes(&self) -> [u8; 6] {
        self.0
    }

    pub fn is_node_body(&self) -> bool {
        self.0[0] == 0 && self.0[1] == 0 && self.0[2] == 0
    }

    /// Node number encoded in a node-body mac's last byte, if this is one.
    pub fn node_body_no(&self) -> Option<u8> {
        self.is_node_body().then_some(self.0[5])
    }
}

impl fmt::Display for Mac {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

#[derive(Debug, Error)]
pub enum MacParseError {
    #[error("mac address must have 6 colon-separated octets, got {0}")]
    WrongLength(usize),
    #[error("invalid hex octet: {0}")]
    InvalidOctet(String),
}

impl FromStr for Mac {
    type Err = MacParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 6 {
            return Err(MacParseError::WrongLength(parts.len()));
        }
        let mut out = [0u8; 6];
        for (i, p) in parts.iter().enumerate() {
            out[i] = u8::from_str_radix(p, 16).map_err(|_| MacParseError::InvalidOctet(p.to_string()))?;
        }
        Ok(Mac(out))
    }
}

/// Per-sensor alert state machine.
///
/// `LowWarn`/`LowCaution` exist for schema parity with the original's
/// `SENS_ST` enum but the classifier in `observer` never emits them — this
/// system only classifies the high-temperature side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum SensorStatus {
    None = -1,
    Lost = 0,
    Normal = 1,
    LowWarn = 2,
    LowCaution = 3,
    HighWarn = 4,
    HighCaution = 5,
}

impl SensorStatus {
    pub fn from_i32(v: i32) -> Self {
        match v {
            0 => SensorStatus::Lost,
            1 => SensorStatus::Normal,
            2 => SensorStatus::LowWarn,
            3 => SensorStatus::LowCaution,
            4 => SensorStatus::HighWarn,
            5 => SensorStatus::HighCaution,
            _ => SensorStatus::None,
        }
    }

    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

/// Node system status, surfaced via `Store::change_node_status` (Node only).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum NodeSystemStatus {
    None = 0,
    Start = 1,
    WaitBeacon = 2,
    WaitSend = 3,
    Good = 4,
    Caution = 5,
    Warn = 6,
    Lost = 7,
}

impl NodeSystemStatus {
    pub fn from_i32(v: i32) -> Self {
        match v {
            1 => NodeSystemStatus::Start,
            2 => NodeSystemStatus::WaitBeacon,
            3 => NodeSystemStatus::WaitSend,
            4 => NodeSystemStatus::Good,
            5 => NodeSystemStatus::Caution,
            6 => NodeSystemStatus::Warn,
            7 => NodeSystemStatus::Lost,
            _ => NodeSystemStatus::None,
        }
    }
}

/// Low-caution / low-warn / high-warn / high-caution thresholds.
///
/// Parsed from the cloud config's CSV `"lC,lW,hW,hC"` field, where any token
/// may be the literal string `NONE`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WarnThresholds {
    pub low_caution: Option<f32>,
    pub low_warn: Option<f32>,
    pub high_warn: Option<f32>,
    pub high_caution: Option<f32>,
}

impl WarnThresholds {
    pub fn parse(csv: &str) -> Option<Self> {
        let parts: Vec<&str> = csv.split(',').collect();
        if parts.len() != 4 {
            return None;
        }
        let tok = |s: &str| -> Option<f32> {
            if s.trim().eq_ignore_ascii_case("none") {
                None
            } else {
                s.trim().parse::<f32>().ok()
            }
        };
        Some(WarnThresholds {
            low_caution: tok(parts[0]),
            low_warn: tok(parts[1]),
            high_warn: tok(parts[2]),
            high_caution: tok(parts[3]),
        })
    }

    pub fn to_csv(&self) -> String {
        let f = |v: Option<f32>| v.map(|x| x.to_string()).unwrap_or_else(|| "NONE".to_string());
        format!(
            "{},{},{},{}",
            f(self.low_caution),
            f(self.low_warn),
            f(self.high_warn),
            f(self.high_caution)
        )
    }
}

/// Owning node reference in `conf.node`: either a Node integer (for a
/// sensor's owning node) or the `LORA00..NN` sentinel row naming the Node
/// itself.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeRef {
    Sensor(i64),
    NodeSelf(i64),
}

impl NodeRef {
    pub fn node_no(&self) -> i64 {
        match self {
            NodeRef::Sensor(n) => *n,
            NodeRef::NodeSelf(n) => *n,
        }
    }

    pub fn to_db_string(&self) -> String {
        match self {
            NodeRef::Sensor(n) => n.to_string(),
            NodeRef::NodeSelf(n) => format!("LORA{n:02}"),
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        if let Some(rest) = s.strip_prefix("LORA") {
            rest.parse::<i64>().ok().map(NodeRef::NodeSelf)
        } else {
            s.parse::<i64>().ok().map(NodeRef::Sensor)
        }
    }
}

/// `conf` row: sensor/node configuration, replaced atomically on cloud apply.
#[derive(Debug, Clone)]
pub struct Conf {
    pub mac: Mac,
    pub name: String,
    pub node: NodeRef,
    pub use_: bool,
    pub warn: WarnThresholds,
    pub ambient_conf: String,
    pub discord_token: Option<String>,
    pub memo: String,
}

/// `history` row: insert-only append log.
#[derive(Debug, Clone)]
pub struct HistoryRow {
    pub id: Option<i64>,
    pub mac: Mac,
    pub date: NaiveDateTime,
    pub node: i64,
    pub templ: f32,
    pub humid: f32,
    pub batt: f32,
    pub rssi: i32,
    pub ext: Option<i32>,
    pub light: Option<f32>,
    pub status: i32,
}

/// `latest` row: per-mac last-known reading, drained by sender/observer.
pub type LatestRow = HistoryRow;

/// `notify` row: per-sensor alert state with debouncing counters.
#[derive(Debug, Clone)]
pub struct NotifyRow {
    pub mac: Mac,
    pub date: Option<NaiveDateTime>,
    pub lost_date: Option<NaiveDateTime>,
    pub status: SensorStatus,
    pub notify: bool,
    pub count: i32,
    pub node: i64,
}

/// Outcome of `Store::apply_config`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Updated,
    Unchanged,
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mac_round_trips_through_display_and_fromstr() {
        let mac: Mac = "aa:bb:cc:dd:ee:01".parse().unwrap();
        assert_eq!(mac.to_string(), "aa:bb:cc:dd:ee:01");
        assert!(!mac.is_node_body());
    }

    #[test]
    fn node_body_mac_is_detected() {
        let mac = Mac::node_body(3);
        assert!(mac.is_node_body());
        assert_eq!(mac.node_body_no(), Some(3));
        assert_eq!(mac.to_string(), "00:00:00:00:00:03");
    }

    #[test]
    fn mac_parse_rejects_wrong_arity() {
        assert!("aa:bb:cc".parse::<Mac>().is_err());
    }

    #[test]
    fn warn_thresholds_parse_none_tokens() {
        let w = WarnThresholds::parse("NONE,NONE,35.0,40.0").unwrap();
        assert_eq!(w.low_caution, None);
        assert_eq!(w.low_warn, None);
        assert_eq!(w.high_warn, Some(35.0));
        assert_eq!(w.high_caution, Some(40.0));
        assert_eq!(w.to_csv(), "NONE,NONE,35,40");
    }

    #[test]
    fn node_ref_round_trips() {
        assert_eq!(NodeRef::parse("LORA02"), Some(NodeRef::NodeSelf(2)));
        assert_eq!(NodeRef::parse("2"), Some(NodeRef::Sensor(2)));
        assert_eq!(NodeRef::NodeSelf(2).to_db_string(), "LORA02");
    }
}
