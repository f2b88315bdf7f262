//! Beacon/ACK + data record pack/unpack, address
//! headers, and the length-prefixed burst framing shared by Gateway and Node.
//!
//! Grounded on `original_source/libLORA.py`'s `struct.pack`/`unpack` calls
//! (`L_BEACON = "@BBL"`, `L_DATA = "@BBH6sLhhhhh"`, `L_LEN = "@H"`) — this
//! module reproduces the same byte layout using explicit little/native-endian
//! reads so the two deployables (and any real E220 module on the other end)
//! agree on wire shape.

use crate::error::{SastError, SastResult};
use crate::model::Mac;
use chrono::{Local, NaiveDateTime, TimeZone};

pub const GATE_ADDR: u16 = 0x2310;
pub const GATE_CHANNEL: u8 = 0;
pub const BCAST_ADDR: u16 = 0xFFFF;
pub const NODE_CHANNEL: u8 = 10;

pub const BEACON_RECORD_LEN: usize = 6; // type(1) + seq(1) + time(4)
pub const DATA_RECORD_LEN: usize = 24; // node,ch,seq(2),mac(6),time(4),templ,humid,batt,rssi,status (5*2)

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeaconType {
    Beacon,
    Ack,
}

impl BeaconType {
    fn to_byte(self) -> u8 {
        match self {
            BeaconType::Beacon => b'B',
            BeaconType::Ack => b'A',
        }
    }

    fn from_byte(b: u8) -> Option<Self> {
        match b {
            b'B' => Some(BeaconType::Beacon),
            b'A' => Some(BeaconType::Ack),
            _ => None,
        }
    }
}

/// 6-byte beacon/ACK record: `type:u8, seq:u8, time:u32` (native-endian).
/// `L_BEACON = "@BBL"` in
/// `original_source/libLORA.py` is unambiguously 1+1+4 = 6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BeaconRecord {
    pub kind: BeaconType,
    pub seq: u8,
    pub time: u32,
}

impl BeaconRecord {
    pub fn encode(&self) -> [u8; BEACON_RECORD_LEN] {
        let mut out = [0u8; BEACON_RECORD_LEN];
        out[0] = self.kind.to_byte();
        out[1] = self.seq;
        out[2..6].copy_from_slice(&self.time.to_ne_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> SastResult<Self> {
        if bytes.len() != BEACON_RECORD_LEN {
            return Err(SastError::Decode(format!(
                "beacon record length mismatch: expected {BEACON_RECORD_LEN}, got {}",
                bytes.len()
            )));
        }
        let kind = BeaconType::from_byte(bytes[0])
            .ok_or_else(|| SastError::Decode(format!("unknown beacon type byte {}", bytes[0])))?;
        let seq = bytes[1];
        let time = u32::from_ne_bytes(bytes[2..6].try_into().unwrap());
        Ok(BeaconRecord { kind, seq, time })
    }
}

/// 24-byte sensor/node-body data record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DataRecord {
    pub node: u8,
    pub ch: u8,
    pub seq: u16,
    pub mac: Mac,
    pub time: u32,
    /// Fixed-point ×10 encodings; use the `*_f32` accessors for real units.
    pub templ_x10: i16,
    pub humid_x10: i16,
    pub batt_x10: i16,
    pub rssi: i16,
    pub status: i16,
}

impl DataRecord {
    pub fn new(node: u8, seq: u16, mac: Mac, time: u32, templ: f32, humid: f32, batt: f32, rssi: i16, status: i16) -> Self {
        DataRecord {
            node,
            ch: NODE_CHANNEL,
            seq,
            mac,
            time,
            templ_x10: (templ * 10.0).round() as i16,
            humid_x10: (humid * 10.0).round() as i16,
            batt_x10: (batt * 10.0).round() as i16,
            rssi,
            status,
        }
    }

    pub fn templ_f32(&self) -> f32 {
        self.templ_x10 as f32 / 10.0
    }

    pub fn humid_f32(&self) -> f32 {
        self.humid_x10 as f32 / 10.0
    }

    pub fn batt_f32(&self) -> f32 {
        self.batt_x10 as f32 / 10.0
    }

    pub fn encode(&self) -> [u8; DATA_RECORD_LEN] {
        let mut out = [0u8; DATA_RECORD_LEN];
        out[0] = self.node;
        out[1] = self.ch;
        out[2..4].copy_from_slice(&self.seq.to_ne_bytes());
        out[4..10].copy_from_slice(&self.mac.bytes());
        out[10..14].copy_from_slice(&self.time.to_ne_bytes());
        out[14..16].copy_from_slice(&self.templ_x10.to_ne_bytes());
        out[16..18].copy_from_slice(&self.humid_x10.to_ne_bytes());
        out[18..20].copy_from_slice(&self.batt_x10.to_ne_bytes());
        out[20..22].copy_from_slice(&self.rssi.to_ne_bytes());
        out[22..24].copy_from_slice(&self.status.to_ne_bytes());
        out
    }
}

/// Decoder sanity checks: reject malformed/out-of-range
/// records without invalidating sibling records in the same burst.
pub fn decode_data_record(bytes: &[u8], today: NaiveDateTime) -> SastResult<DataRecord> {
    if bytes.len() != DATA_RECORD_LEN {
        return Err(SastError::Decode(format!(
            "data record length mismatch: expected {DATA_RECORD_LEN}, got {}",
            bytes.len()
        )));
    }
    let node = bytes[0];
    let ch = bytes[1];
    let seq = u16::from_ne_bytes(bytes[2..4].try_into().unwrap());
    let mac = Mac::new(bytes[4..10].try_into().unwrap());
    let time = u32::from_ne_bytes(bytes[10..14].try_into().unwrap());
    let templ_x10 = i16::from_ne_bytes(bytes[14..16].try_into().unwrap());
    let humid_x10 = i16::from_ne_bytes(bytes[16..18].try_into().unwrap());
    let batt_x10 = i16::from_ne_bytes(bytes[18..20].try_into().unwrap());
    let rssi = i16::from_ne_bytes(bytes[20..22].try_into().unwrap());
    let status = i16::from_ne_bytes(bytes[22..24].try_into().unwrap());

    if !(1..=99).contains(&node) {
        return Err(SastError::Decode(format!("NODE error {node}")));
    }
    let record_time = Local
        .timestamp_opt(time as i64, 0)
        .single()
        .ok_or_else(|| SastError::Decode(format!("invalid timestamp {time}")))?
        .naive_local();
    if record_time.date() != today.date() {
        return Err(SastError::Decode(format!("DATE error {record_time}")));
    }
    if !(-1..=10).contains(&status) {
        return Err(SastError::Decode(format!("STATUS error {status}")));
    }

    Ok(DataRecord {
        node,
        ch,
        seq,
        mac,
        time,
        templ_x10,
        humid_x10,
        batt_x10,
        rssi,
        status,
    })
}

/// 3-byte fixed address header: `addr_hi, addr_lo, channel`.
pub fn make_lora_addr(addr: u16, channel: u8) -> [u8; 3] {
    [(addr >> 8) as u8, (addr & 0xFF) as u8, channel]
}

/// 2-byte host-endian payload length prefix.
pub fn encode_len_prefix(len: u16) -> [u8; 2] {
    len.to_ne_bytes()
}

pub fn decode_len_prefix(bytes: &[u8]) -> SastResult<u16> {
    if bytes.len() != 2 {
        return Err(SastError::Decode("length prefix must be 2 bytes".into()));
    }
    Ok(u16::from_ne_bytes([bytes[0], bytes[1]]))
}

/// Builds a Node's uplink stream: address header + length prefix + the
/// concatenated encoded data records.
pub fn make_send_data_stream(addr: u16, channel: u8, records: &[DataRecord]) -> Vec<u8> {
    let mut stream = Vec::with_capacity(5 + records.len() * DATA_RECORD_LEN);
    stream.extend_from_slice(&make_lora_addr(addr, channel));
    let payload_len = (records.len() * DATA_RECORD_LEN) as u16;
    stream.extend_from_slice(&encode_len_prefix(payload_len));
    for r in records {
        stream.extend_from_slice(&r.encode());
    }
    stream
}

/// Splits a received payload into fixed-size 24-byte data records.
pub fn split_data_records(payload: &[u8]) -> Vec<&[u8]> {
    payload.chunks(DATA_RECORD_LEN).collect()
}

/// Hardware appends one trailing RSSI byte to every received frame.
pub fn rssi_from_trailing_byte(b: u8) -> i32 {
    b as i32 - 256
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today_naive() -> NaiveDateTime {
        Local::now().naive_local()
    }

    #[test]
    fn beacon_round_trip() {
        let b = BeaconRecord {
            kind: BeaconType::Beacon,
            seq: 1,
            time: 1_700_000_000,
        };
        let enc = b.encode();
        let dec = BeaconRecord::decode(&enc).unwrap();
        assert_eq!(b, dec);
    }

    #[test]
    fn ack_type_byte_round_trips() {
        let a = BeaconRecord {
            kind: BeaconType::Ack,
            seq: 42,
            time: 1_700_000_100,
        };
        let enc = a.encode();
        assert_eq!(enc[0], b'A');
        let dec = BeaconRecord::decode(&enc).unwrap();
        assert_eq!(dec.kind, BeaconType::Ack);
        assert_eq!(dec.seq, 42);
    }

    #[test]
    fn data_record_round_trip_modulo_quantization() {
        let mac: Mac = "aa:bb:cc:dd:ee:01".parse().unwrap();
        let now = Local::now();
        let rec = DataRecord::new(3, 7, mac, now.timestamp() as u32, 38.05, 55.5, 90.0, -42, 1);
        let enc = rec.encode();
        let today = Local::now().naive_local();
        let dec = decode_data_record(&enc, today).unwrap();
        assert_eq!(dec.node, 3);
        assert_eq!(dec.seq, 7);
        assert_eq!(dec.mac, mac);
        // ×10 fixed-point quantisation: 38.05 rounds to 380 -> 38.0
        assert_eq!(dec.templ_f32(), 38.0);
        assert_eq!(dec.humid_f32(), 55.5);
        assert_eq!(dec.batt_f32(), 90.0);
        assert_eq!(dec.rssi, -42);
        assert_eq!(dec.status, 1);
    }

    #[test]
    fn decode_rejects_node_out_of_range() {
        let mac: Mac = "aa:bb:cc:dd:ee:01".parse().unwrap();
        let rec = DataRecord::new(0, 1, mac, Local::now().timestamp() as u32, 20.0, 50.0, 90.0, -40, 1);
        let enc = rec.encode();
        assert!(decode_data_record(&enc, today_naive()).is_err());
    }

    #[test]
    fn decode_rejects_stale_date() {
        let mac: Mac = "aa:bb:cc:dd:ee:01".parse().unwrap();
        let yesterday = Local::now() - chrono::Duration::days(1);
        let rec = DataRecord::new(1, 1, mac, yesterday.timestamp() as u32, 20.0, 50.0, 90.0, -40, 1);
        let enc = rec.encode();
        assert!(decode_data_record(&enc, today_naive()).is_err());
    }

    #[test]
    fn decode_rejects_out_of_range_status() {
        let mac: Mac = "aa:bb:cc:dd:ee:01".parse().unwrap();
        let rec = DataRecord::new(1, 1, mac, Local::now().timestamp() as u32, 20.0, 50.0, 90.0, -40, 99);
        let enc = rec.encode();
        assert!(decode_data_record(&enc, today_naive()).is_err());
    }

    #[test]
    fn length_prefix_round_trips() {
        let enc = encode_len_prefix(1234);
        assert_eq!(decode_len_prefix(&enc).unwrap(), 1234);
    }

    #[test]
    fn send_stream_layout_matches_header_plus_length_plus_records() {
        let mac: Mac = "aa:bb:cc:dd:ee:01".parse().unwrap();
        let rec = DataRecord::new(1, 1, mac, Local::now().timestamp() as u32, 20.0, 50.0, 90.0, -40, 1);
        let stream = make_send_data_stream(GATE_ADDR, GATE_CHANNEL, &[rec]);
        assert_eq!(stream.len(), 3 + 2 + DATA_RECORD_LEN);
        assert_eq!(&stream[0..3], &make_lora_addr(GATE_ADDR, GATE_CHANNEL));
        let len = decode_len_prefix(&stream[3..5]).unwrap();
        assert_eq!(len as usize, DATA_RECORD_LEN);
    }

    #[test]
    fn rssi_byte_converts_to_negative_dbm() {
        assert_eq!(rssi_from_trailing_byte(200), -56);
    }
}
