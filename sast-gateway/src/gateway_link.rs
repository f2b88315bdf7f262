//! Gateway-side radio link: beacon broadcaster + data receiver/ACK.
//!
//! Grounded on `original_source/libLORA.py`'s `Lora_GATE._beacon_sender` /
//! `_send_beacon` / `_reciver` / `_recv_Data` / `_send_ack`.

use chrono::Local;
use sast_core::frame::{decode_data_record, make_lora_addr, BeaconRecord, BeaconType, BCAST_ADDR, GATE_ADDR, NODE_CHANNEL};
use sast_core::model::HistoryRow;
use sast_core::radio::{LedColor, Radio};
use sast_core::runtime::ShutdownHandle;
use sast_core::store::Store;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info, warn};

/// `BEACON_COUNT` beacons per transmit cycle, matching the original's
/// default of 1.
const BEACON_COUNT: u8 = 1;

/// Sends `BEACON_COUNT` beacons on the broadcast address every minute
/// boundary. Blocks; run on its own thread.
pub fn run_beacon_loop(radio: &Mutex<Radio>, shutdown: ShutdownHandle) {
    info!("beacon sender starting");
    while !shutdown.is_triggered() {
        let now = Local::now();
        let secs_to_boundary = 60 - now.timestamp() % 60;
        shutdown.sleep_interruptible(Duration::from_secs(secs_to_boundary as u64));
        if shutdown.is_triggered() {
            break;
        }
        send_beacons(radio);
    }
}

fn send_beacons(radio: &Mutex<Radio>) {
    let mut radio = radio.lock().unwrap();
    radio.flash(LedColor::Red, 3);
    for seq in 1..=BEACON_COUNT {
        let record = BeaconRecord {
            kind: BeaconType::Beacon,
            seq,
            time: Local::now().timestamp() as u32,
        };
        let mut payload = make_lora_addr(BCAST_ADDR, NODE_CHANNEL).to_vec();
        payload.extend_from_slice(&record.encode());
        debug!(seq, "sending beacon");
        if let Err(e) = radio.send(&payload) {
            warn!(error = %e, "beacon send failed");
        }
    }
}

/// Blocking receiver loop: waits for a data burst, persists enabled rows,
/// sends exactly one ACK carrying the burst's terminal sequence.
pub fn run_receiver_loop(radio: &Mutex<Radio>, store: &mut Store, shutdown: ShutdownHandle) {
    info!("receiver loop starting");
    while !shutdown.is_triggered() {
        match recv_burst(radio) {
            Ok(Some((records, rssi))) => {
                let terminal = records.last().map(|r| (r.node, r.ch, r.seq));
                let mut rows = Vec::new();
                for decoded in records {
                    radio.lock().unwrap().flash(LedColor::Green, 1);
                    let today = Local::now().naive_local();
                    let mac = decoded.mac;
                    let row_rssi = if mac.is_node_body() { rssi } else { decoded.rssi as i32 };
                    let row = HistoryRow {
                        id: None,
                        mac,
                        date: today,
                        node: decoded.node as i64,
                        templ: decoded.templ_f32(),
                        humid: decoded.humid_f32(),
                        batt: decoded.batt_f32(),
                        rssi: row_rssi,
                        ext: None,
                        light: None,
                        status: decoded.status as i32,
                    };
                    match store.use_sensor(decoded.node as i64, &mac) {
                        Ok(true) => rows.push(row),
                        Ok(false) => debug!(%mac, "sensor not enabled, dropping"),
                        Err(e) => warn!(error = %e, "use_sensor lookup failed"),
                    }
                }
                if !rows.is_empty() {
                    if let Err(e) = store.append_burst(&rows) {
                        warn!(error = %e, "burst persist failed");
                    }
                }
                if let Some((node, ch, seq)) = terminal {
                    send_ack(radio, node, ch, seq);
                }
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "receive burst failed"),
        }
    }
}

type DecodedBurst = (Vec<sast_core::frame::DataRecord>, i32);

fn recv_burst(radio: &Mutex<Radio>) -> sast_core::SastResult<Option<DecodedBurst>> {
    let mut radio = radio.lock().unwrap();
    let raw = radio.recv_available()?;
    if raw.len() < 2 {
        return Ok(None);
    }
    let len = sast_core::frame::decode_len_prefix(&raw[0..2])? as usize;
    if raw.len() < 2 + len + 1 {
        return Ok(None);
    }
    let payload = &raw[2..2 + len];
    let rssi_byte = raw[2 + len];
    let rssi = sast_core::frame::rssi_from_trailing_byte(rssi_byte);

    let today = Local::now().naive_local();
    let mut records = Vec::new();
    for chunk in sast_core::frame::split_data_records(payload) {
        match decode_data_record(chunk, today) {
            Ok(rec) => records.push(rec),
            Err(e) => warn!(error = %e, "decode error, dropping record"),
        }
    }
    Ok(Some((records, rssi)))
}

fn send_ack(radio: &Mutex<Radio>, node: u8, channel: u8, seq: u16) {
    let mut radio = radio.lock().unwrap();
    let mut payload = make_lora_addr(GATE_ADDR + node as u16, channel).to_vec();
    let ack = BeaconRecord {
        kind: BeaconType::Ack,
        seq: seq as u8,
        time: Local::now().timestamp() as u32,
    };
    payload.extend_from_slice(&ack.encode());
    if let Err(e) = radio.send(&payload) {
        warn!(error = %e, "ack send failed");
    }
}
