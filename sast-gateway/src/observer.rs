//! Threshold classification, Discord notification fan-out, and cloud
//! uplink.
//!
//! Grounded on `original_source/SAST_observer.py::_send_cloud` — the
//! branch structure (caution / warn-with-debounce / normal / lost /
//! re-lost) is reproduced verbatim; only the language changes.

use crate::cloud::{CloudClient, GasLogRow};
use chrono::{Duration as ChronoDuration, Local};
use sast_core::model::{HistoryRow, Mac, NotifyRow, SensorStatus};
use sast_core::store::Store;
use serde_json::json;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

const LOST_DEBOUNCE: ChronoDuration = ChronoDuration::minutes(15);
const WARN_DEBOUNCE: ChronoDuration = ChronoDuration::minutes(5);
const NOTIFY_COUNT_CAP: i32 = 10;

fn count_from_status(target: SensorStatus, existing: Option<&NotifyRow>) -> i32 {
    match existing {
        None => 1,
        Some(row) if row.status == target => row.count + 1,
        Some(_) => 1,
    }
}

/// One classify+notify+uplink cycle; runs every `SPAN_SEND_CLOUD` on the
/// Gateway.
pub fn run_cycle(store: &mut Store, cloud: &CloudClient) -> sast_core::SastResult<()> {
    info!("send_cloud cycle starting");
    let notify_all = store.notify_list(None, false)?;
    let latest_all = store.drain_latest_all()?;

    if latest_all.is_empty() {
        warn!("no sensor data this cycle, skipping");
        return Ok(());
    }

    classify(store, &notify_all, &latest_all)?;
    notify_discord(store, cloud, &latest_all)?;
    uplink_ambient(store, cloud, &latest_all)?;
    uplink_gas_log(cloud, &latest_all);

    info!("send_cloud cycle done");
    Ok(())
}

fn find_latest<'a>(latest: &'a [(HistoryRow, String)], mac: &Mac) -> Option<&'a HistoryRow> {
    latest.iter().find(|(row, _)| &row.mac == mac).map(|(row, _)| row)
}

fn classify(store: &Store, notify_all: &[NotifyRow], latest_all: &[(HistoryRow, String)]) -> sast_core::SastResult<()> {
    for n in notify_all {
        let present = find_latest(latest_all, &n.mac);
        match present {
            Some(reading) => {
                if n.mac.is_node_body() {
                    continue;
                }
                let Some((_, _, _, thresholds)) = store.sensor_info(&n.mac)? else {
                    continue;
                };
                let high_caution = thresholds.high_caution;
                let high_warn = thresholds.high_warn;

                if high_caution.is_some_and(|hc| reading.templ >= hc) {
                    info!(mac = %n.mac, "high caution");
                    let count = count_from_status(SensorStatus::HighCaution, Some(n));
                    store.update_notify(&n.mac, SensorStatus::HighCaution, count)?;
                } else if high_warn.is_some_and(|hw| reading.templ >= hw) {
                    debug!(mac = %n.mac, templ = reading.templ, "checking warn debounce");
                    if n.count == 0 {
                        info!(mac = %n.mac, "high warn, first notify");
                        store.update_notify(&n.mac, SensorStatus::HighWarn, 1)?;
                    } else if Local::now().naive_local() - reading.date >= WARN_DEBOUNCE {
                        // gates on the sensor's own reading freshness (Latest.date), not on
                        // when notify last fired — matches _send_cloud's PassedMinute(s['date'])
                        let count = count_from_status(SensorStatus::HighWarn, Some(n));
                        store.update_notify(&n.mac, SensorStatus::HighWarn, count)?;
                    }
                    // else: debounce window not yet elapsed, leave as-is
                } else {
                    store.update_notify(&n.mac, SensorStatus::Normal, 0)?;
                }
            }
            None => {
                if n.status == SensorStatus::None {
                    debug!(mac = %n.mac, "not yet connected, skip");
                    continue;
                }
                let elapsed = n.date.map(|d| Local::now().naive_local() - d >= LOST_DEBOUNCE).unwrap_or(false);
                if elapsed && n.status == SensorStatus::Normal {
                    info!(mac = %n.mac, "lost, first notify");
                    store.update_notify(&n.mac, SensorStatus::Lost, 1)?;
                } else if elapsed && n.status == SensorStatus::Lost {
                    let count = count_from_status(SensorStatus::Lost, Some(n));
                    store.update_notify(&n.mac, SensorStatus::Lost, count)?;
                }
            }
        }
    }
    Ok(())
}

fn notify_message(sens: &str, node: &str, status: SensorStatus, templ: f32, high_caution: Option<f32>, high_warn: Option<f32>) -> String {
    match status {
        SensorStatus::HighCaution => format!(
            "WARNING! [{node} {sens}] exceeded {}C (now {templ}C)\n",
            high_caution.map(|v| v.to_string()).unwrap_or_default()
        ),
        SensorStatus::HighWarn => format!(
            "CAUTION! [{node} {sens}] exceeded {}C (now {templ}C)\n",
            high_warn.map(|v| v.to_string()).unwrap_or_default()
        ),
        SensorStatus::Lost => format!("[{node} {sens}] is unreachable\nCheck battery and placement\n"),
        _ => String::new(),
    }
}

fn notify_discord(store: &mut Store, cloud: &CloudClient, latest_all: &[(HistoryRow, String)]) -> sast_core::SastResult<()> {
    let num_nodes = store.num_nodes()?;
    for node in 1..=num_nodes {
        let rows = store.notify_list(Some(node), true)?;
        if rows.is_empty() {
            continue;
        }
        let Some(token) = store.discord_token(node)? else {
            continue;
        };
        let amb_url = store.ambient_info(node)?.unwrap_or_default();

        let mut message = String::new();
        for n in &rows {
            if n.mac.is_node_body() || n.status == SensorStatus::Normal || n.status == SensorStatus::None {
                continue;
            }
            if n.count >= NOTIFY_COUNT_CAP {
                continue;
            }
            let Some((sens_name, node_name, _, thresholds)) = store.sensor_info(&n.mac)? else {
                continue;
            };
            let templ = find_latest(latest_all, &n.mac).map(|r| r.templ).unwrap_or(0.0);
            message.push_str(&notify_message(
                &sens_name,
                node_name.as_deref().unwrap_or(""),
                n.status,
                templ,
                thresholds.high_caution,
                thresholds.high_warn,
            ));
        }
        if !message.is_empty() {
            cloud.post_discord(&message, &token, &amb_url);
        }
    }
    Ok(())
}

fn uplink_ambient(store: &Store, cloud: &CloudClient, latest_all: &[(HistoryRow, String)]) -> sast_core::SastResult<()> {
    let num_nodes = store.num_nodes()?;
    for node in 1..=num_nodes {
        let Some(amb_conf_json) = store.ambient_info(node)? else {
            continue;
        };
        if amb_conf_json.is_empty() {
            continue;
        }
        let Ok(amb_conf) = serde_json::from_str::<serde_json::Value>(&amb_conf_json) else {
            continue;
        };
        let Some(write_key) = amb_conf.get("writeKey").and_then(|v| v.as_str()) else {
            continue;
        };
        let channel = amb_conf.get("channelID").and_then(|v| v.as_str()).unwrap_or("");
        let use_flag = amb_conf.get("use").and_then(|v| v.as_bool()).unwrap_or(false);
        if !use_flag {
            continue;
        }

        let mut slots = BTreeMap::new();
        let rows_for_node: Vec<&(HistoryRow, String)> = latest_all.iter().filter(|(r, _)| r.node == node).collect();
        if rows_for_node.is_empty() && !sast_core::runtime::AMB_SEND_NODATA {
            continue;
        }
        if sast_core::runtime::AMB_SEND_NODATA {
            for i in 1..=8 {
                slots.insert(format!("d{i}"), 0.0);
            }
        }
        for (row, ambient_slot) in rows_for_node {
            if row.mac.is_node_body() || ambient_slot.is_empty() {
                continue;
            }
            slots.insert(ambient_slot.clone(), row.templ);
        }

        let url = format!("https://ambidata.io/api/v2/channels/{channel}/dataarray");
        cloud.post_ambient(&url, write_key, &slots);
    }
    Ok(())
}

fn uplink_gas_log(cloud: &CloudClient, latest_all: &[(HistoryRow, String)]) {
    let rows: Vec<serde_json::Value> = latest_all
        .iter()
        .map(|(r, _)| {
            json!(GasLogRow {
                mac: r.mac.to_string(),
                date: sast_core::timefmt::to_unix_local(r.date),
                templ: r.templ,
                humid: r.humid,
                batt: r.batt,
                rssi: r.rssi,
                ext: r.ext,
                light: r.light,
                status: r.status,
            })
        })
        .collect();
    if !rows.is_empty() {
        cloud.post_gas_log(&rows);
    }
}

/// Daily 08:00 battery-check task (`SAST_observer.py::_checkBattery`),
/// added back as a self-contained Observer task over the same Store
/// surface.
pub fn check_battery(store: &Store, cloud: &CloudClient) -> sast_core::SastResult<()> {
    let num_nodes = store.num_nodes()?;
    for node in 1..=num_nodes {
        let sensors = store.sensors_for_node(node)?;
        let mut message = String::new();
        for (mac, name) in &sensors {
            let Some((batt, _, _, _)) = store.battery_of(mac)? else {
                continue;
            };
            if batt <= 15.0 {
                message.push_str(&format!("{name}: {batt}% REPLACE!!\n"));
            } else {
                message.push_str(&format!("{name}: {batt}%\n"));
            }
        }
        if message.is_empty() {
            continue;
        }
        let Some((_, node_name)) = store.node_info(node)? else {
            continue;
        };
        message = format!("{node_name} battery status\n{message}");
        if let Some(token) = store.discord_token(node)? {
            cloud.post_discord(&message, &token, "");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sast_core::model::{Conf, NodeRef, WarnThresholds};
    use sast_core::store::{SetupMode, Store};

    fn seeded_store(dir: &tempfile::TempDir) -> Store {
        let path = dir.path().join("test.db");
        let mut store = Store::new(&path).unwrap();
        store.create_tables(SetupMode::Create).unwrap();
        let mac: Mac = "aa:bb:cc:dd:ee:01".parse().unwrap();
        let conf = Conf {
            mac,
            name: "sensor-a".into(),
            node: NodeRef::Sensor(1),
            use_: true,
            warn: WarnThresholds::parse("NONE,NONE,35.0,40.0").unwrap(),
            ambient_conf: "d1".into(),
            discord_token: Some("tok".into()),
            memo: String::new(),
        };
        store.apply_config(&[conf], Local::now().naive_local()).unwrap();
        store
    }

    fn reading_at(mac: Mac, templ: f32, date: chrono::NaiveDateTime) -> (HistoryRow, String) {
        (
            HistoryRow {
                id: None,
                mac,
                date,
                node: 1,
                templ,
                humid: 50.0,
                batt: 90.0,
                rssi: -40,
                ext: None,
                light: None,
                status: 1,
            },
            "d1".into(),
        )
    }

    // Threshold up-transition.
    #[test]
    fn s1_threshold_up_transition() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(&dir);
        let mac: Mac = "aa:bb:cc:dd:ee:01".parse().unwrap();
        let prior = NotifyRow {
            mac,
            date: Some(Local::now().naive_local()),
            lost_date: None,
            status: SensorStatus::Normal,
            notify: false,
            count: 0,
            node: 1,
        };
        let latest = vec![reading_at(mac, 38.0, Local::now().naive_local())];
        classify(&store, &[prior], &latest).unwrap();
        let row = store.notify_row(&mac).unwrap().unwrap();
        assert_eq!(row.status, SensorStatus::HighWarn);
        assert_eq!(row.count, 1);
        assert!(row.notify);
    }

    // Warn debounce: 2 min elapsed on a fresh Latest row is not enough,
    // so no update is written.
    #[test]
    fn s2_warn_debounce_holds() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(&dir);
        let mac: Mac = "aa:bb:cc:dd:ee:01".parse().unwrap();
        let prior = NotifyRow {
            mac,
            date: Some(Local::now().naive_local() - ChronoDuration::seconds(120)),
            lost_date: None,
            status: SensorStatus::HighWarn,
            notify: true,
            count: 1,
            node: 1,
        };
        let latest = vec![reading_at(mac, 38.5, Local::now().naive_local())];
        classify(&store, &[prior], &latest).unwrap();
        // untouched: rebuild_notify seeded this mac at NORMAL/count 0 and
        // classify must not have called update_notify for it.
        let row = store.notify_row(&mac).unwrap().unwrap();
        assert_eq!(row.status, SensorStatus::Normal);
        assert_eq!(row.count, 0);
    }

    // Warn re-fires once the *reading* (not the notify record) is stale
    // by 5 minutes or more.
    #[test]
    fn s3_warn_refires_after_five_minutes() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(&dir);
        let mac: Mac = "aa:bb:cc:dd:ee:01".parse().unwrap();
        let prior = NotifyRow {
            mac,
            date: Some(Local::now().naive_local()),
            lost_date: None,
            status: SensorStatus::HighWarn,
            notify: true,
            count: 1,
            node: 1,
        };
        let stale = Local::now().naive_local() - ChronoDuration::minutes(6);
        let latest = vec![reading_at(mac, 38.5, stale)];
        classify(&store, &[prior], &latest).unwrap();
        let row = store.notify_row(&mac).unwrap().unwrap();
        assert_eq!(row.status, SensorStatus::HighWarn);
        assert_eq!(row.count, 2);
        assert!(row.notify);
    }

    // Caution overrides the warn debounce window entirely.
    #[test]
    fn s4_caution_overrides_warn_window() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(&dir);
        let mac: Mac = "aa:bb:cc:dd:ee:01".parse().unwrap();
        let prior = NotifyRow {
            mac,
            date: Some(Local::now().naive_local()),
            lost_date: None,
            status: SensorStatus::HighWarn,
            notify: true,
            count: 1,
            node: 1,
        };
        let latest = vec![reading_at(mac, 41.0, Local::now().naive_local())];
        classify(&store, &[prior], &latest).unwrap();
        let row = store.notify_row(&mac).unwrap().unwrap();
        assert_eq!(row.status, SensorStatus::HighCaution);
        assert_eq!(row.count, 1);
        assert!(row.notify);
    }

    #[test]
    fn count_from_status_restarts_on_state_change() {
        let row = NotifyRow {
            mac: Mac::new([0; 6]),
            date: None,
            lost_date: None,
            status: SensorStatus::HighWarn,
            notify: true,
            count: 4,
            node: 1,
        };
        assert_eq!(count_from_status(SensorStatus::HighWarn, Some(&row)), 5);
        assert_eq!(count_from_status(SensorStatus::HighCaution, Some(&row)), 1);
        assert_eq!(count_from_status(SensorStatus::HighWarn, None), 1);
    }

    #[test]
    fn notify_message_is_empty_for_normal_status() {
        assert_eq!(notify_message("s", "n", SensorStatus::Normal, 20.0, None, None), "");
    }

    #[test]
    fn notify_message_renders_high_caution() {
        let m = notify_message("Sensor A", "Node 1", SensorStatus::HighCaution, 42.0, Some(40.0), Some(35.0));
        assert!(m.contains("Sensor A"));
        assert!(m.contains("42"));
    }
}
