//! Host identity and battery level (canonical
//! machine-info module so Gateway and Node agree on one `node_no()`).
//!
//! Grounded on `original_source/libMachineInfo.py`: `getHostname()` /
//! `getNodeNo()` (trailing two hostname digits). spec.md §1 lists the
//! PiSugar I2C battery read itself as an out-of-scope external
//! collaborator (alongside the BLE sensor scan and OLED UI) — this crate
//! only defines the interface NodeLink's sender consumes
//! ([`BatterySource`]), not a real I2C register read. A production
//! deployment supplies its own `BatterySource` impl talking to the
//! PiSugar3 over `rppal::i2c`; this workspace ships a stub that always
//! reports "unknown" so the Node can run end to end without that
//! hardware present.

use std::fs;

/// Battery level source, injectable so NodeLink never needs to know
/// whether a real PiSugar3 is present. The PiSugar3 I2C read itself is
/// out of scope for this crate (spec.md §1) — this trait is the
/// boundary an external battery-reporting collaborator would implement.
pub trait BatterySource {
    /// Percent 0-100, or `None` if no battery device responds.
    fn read_percent(&self) -> Option<u8>;
}

/// Placeholder `BatterySource` that never claims a real reading. Stands
/// in for a PiSugar3 I2C driver, which this crate does not implement.
#[derive(Default)]
pub struct PiSugar3;

impl BatterySource for PiSugar3 {
    fn read_percent(&self) -> Option<u8> {
        None
    }
}

pub fn hostname() -> std::io::Result<String> {
    let raw = fs::read_to_string("/etc/hostname")?;
    Ok(raw.trim().to_string())
}

/// NodeNo from the hostname's trailing two digits; 0 means Gateway.
pub fn node_no_from_hostname(host: &str) -> Option<u8> {
    if host.len() < 2 {
        return None;
    }
    host[host.len() - 2..].parse::<u8>().ok()
}

pub fn node_no() -> std::io::Result<u8> {
    let host = hostname()?;
    node_no_from_hostname(&host)
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidData, format!("hostname {host} has no NodeNo suffix")))
}

/// CPU temperature in Celsius via `vcgencmd measure_temp`, the same tool
/// the original shells out to.
pub fn cpu_temp_celsius() -> Option<f32> {
    let out = std::process::Command::new("vcgencmd").arg("measure_temp").output().ok()?;
    let text = String::from_utf8_lossy(&out.stdout);
    parse_vcgencmd_temp(text.trim())
}

fn parse_vcgencmd_temp(text: &str) -> Option<f32> {
    let value = text.strip_prefix("temp=")?.strip_suffix("'C")?;
    value.parse().ok()
}

pub fn is_root_user() -> bool {
    // /proc/self/status's Uid line is the canonical check; USER=root covers
    // rc.local startup contexts where the environment predates a full
    // login, per the original's fallback.
    euid_from_proc_status().map(|uid| uid == 0).unwrap_or(false)
        || std::env::var("USER").map(|u| u == "root").unwrap_or(false)
}

fn euid_from_proc_status() -> Option<u32> {
    let status = fs::read_to_string("/proc/self/status").ok()?;
    let line = status.lines().find(|l| l.starts_with("Uid:"))?;
    // "Uid:\treal\teffective\tsaved\tfilesystem"
    line.split_whitespace().nth(2)?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedBattery(Option<u8>);
    impl BatterySource for FixedBattery {
        fn read_percent(&self) -> Option<u8> {
            self.0
        }
    }

    #[test]
    fn node_no_parses_trailing_digits() {
        assert_eq!(node_no_from_hostname("sast-node03"), Some(3));
        assert_eq!(node_no_from_hostname("sast-gateway00"), Some(0));
    }

    #[test]
    fn node_no_rejects_non_numeric_suffix() {
        assert_eq!(node_no_from_hostname("sastgw"), None);
    }

    #[test]
    fn vcgencmd_temp_output_parses() {
        assert_eq!(parse_vcgencmd_temp("temp=42.8'C"), Some(42.8));
        assert_eq!(parse_vcgencmd_temp("garbage"), None);
    }

    #[test]
    fn pisugar3_stub_never_claims_a_reading() {
        assert_eq!(PiSugar3.read_percent(), None);
    }

    #[test]
    fn battery_source_trait_is_object_safe_and_injectable() {
        let b: Box<dyn BatterySource> = Box::new(FixedBattery(Some(77)));
        assert_eq!(b.read_percent(), Some(77));
        let empty: Box<dyn BatterySource> = Box::new(FixedBattery(None));
        assert_eq!(empty.read_percent(), None);
    }
}
