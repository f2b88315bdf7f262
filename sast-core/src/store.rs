//! SQLite-backed persistence.
//!
//! Grounded on `original_source/libSQLite.py`'s `SQL` class: same six
//! tables (`history`, `notify`, `latest`, `status`, `conf`, `conf_date`),
//! same `createTables(mode)` dispatch, same `updateSystemConf` compare-then-
//! replace transaction. Queries are parameterized throughout — the original
//! builds its SQL with f-string interpolation, which this port does not
//! carry over (rusqlite's bound parameters cost nothing extra and remove an
//! injection surface that has no reason to exist).

use crate::error::{SastError, SastResult};
use crate::model::{ApplyOutcome, Conf, HistoryRow, Mac, NodeRef, NodeSystemStatus, NotifyRow, SensorStatus, WarnThresholds};
use crate::timefmt::{now_str, parse_sql_str, to_sql_str};
use chrono::{Duration as ChronoDuration, Local, NaiveDateTime};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

/// `createTables` dispatch modes (libSQLite.py `mode` arg).
pub enum SetupMode {
    /// Drop every table.
    Clear,
    /// Node startup: clear `latest` only.
    StartupNode,
    /// Gateway startup: clear `latest`, rebuild `notify`.
    StartupGate,
    /// Default: create tables if missing, seed `status`.
    Create,
}

pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn new<P: AsRef<Path>>(path: P) -> SastResult<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Ok(Store { conn })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> SastResult<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Store { conn })
    }

    pub fn create_tables(&self, mode: SetupMode) -> SastResult<()> {
        match mode {
            SetupMode::Clear => {
                for table in ["history", "notify", "latest", "status", "conf", "conf_date"] {
                    self.conn.execute(&format!("DROP TABLE IF EXISTS {table}"), [])?;
                }
                Ok(())
            }
            SetupMode::StartupNode => self.init_latest(),
            SetupMode::StartupGate => {
                self.init_latest()?;
                self.rebuild_notify()?;
                Ok(())
            }
            SetupMode::Create => {
                self.conn.execute_batch(
                    "CREATE TABLE IF NOT EXISTS history (
                        id INTEGER PRIMARY KEY AUTOINCREMENT,
                        mac TEXT NOT NULL, date TEXT NOT NULL, node INTEGER,
                        templ REAL, humid REAL, batt REAL, rssi INTEGER,
                        ext INTEGER, light REAL, status INTEGER);
                     CREATE TABLE IF NOT EXISTS notify (
                        mac TEXT NOT NULL PRIMARY KEY, date TEXT, lost_date TEXT,
                        status INTEGER NOT NULL, notify INTEGER, count INTEGER, node TEXT);
                     CREATE TABLE IF NOT EXISTS latest (
                        mac TEXT NOT NULL PRIMARY KEY, date TEXT NOT NULL, node INTEGER,
                        templ REAL, humid REAL, batt REAL, rssi INTEGER,
                        ext INTEGER, light REAL, status INTEGER);
                     CREATE TABLE IF NOT EXISTS status (
                        id INTEGER PRIMARY KEY AUTOINCREMENT, stat INTEGER);
                     CREATE TABLE IF NOT EXISTS conf (
                        mac TEXT NOT NULL PRIMARY KEY, name TEXT, node TEXT, use BOOLEAN,
                        warn TEXT, ambient_conf TEXT, discord_token TEXT, memo TEXT);
                     CREATE TABLE IF NOT EXISTS conf_date (
                        id INTEGER NOT NULL PRIMARY KEY, date TEXT NOT NULL);",
                )?;
                self.change_node_status(NodeSystemStatus::None)?;
                Ok(())
            }
        }
    }

    fn init_latest(&self) -> SastResult<()> {
        self.conn.execute("DELETE FROM latest", [])?;
        Ok(())
    }

    fn init_notify(&self) -> SastResult<()> {
        self.rebuild_notify()?;
        let date = now_str();
        self.conn.execute(
            "UPDATE notify SET status=-1, date=?1, count=0, notify=0",
            params![date],
        )?;
        Ok(())
    }

    /// Inserts a `Notify` row for every valid (`use=1`) sensor mac missing
    /// one, and drops `latest` rows for macs no longer valid.
    pub fn rebuild_notify(&self) -> SastResult<i64> {
        let tx = self.conn.unchecked_transaction()?;
        let valid_macs = Self::valid_sensor_macs(&tx)?;
        for mac in &valid_macs {
            let exists: Option<String> = tx
                .query_row("SELECT mac FROM notify WHERE mac=?1", params![mac], |r| r.get(0))
                .optional()?;
            if exists.is_none() {
                let node_no = Self::node_no_of(&tx, mac)?.unwrap_or(-1);
                tx.execute(
                    "REPLACE INTO notify(mac, status, node) VALUES (?1, ?2, ?3)",
                    params![mac, SensorStatus::Normal.as_i32(), node_no],
                )?;
            }
        }
        let num: i64 = tx.query_row("SELECT COUNT(mac) FROM notify", [], |r| r.get(0))?;
        tx.commit()?;
        Ok(num)
    }

    fn valid_sensor_macs(conn: &Connection) -> SastResult<Vec<String>> {
        let mut stmt = conn.prepare("SELECT mac FROM conf WHERE use=1")?;
        let rows = stmt.query_map([], |r| r.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn node_no_of(conn: &Connection, mac: &str) -> SastResult<Option<i64>> {
        let node: Option<String> = conn
            .query_row("SELECT node FROM conf WHERE mac=?1", params![mac], |r| r.get(0))
            .optional()?;
        Ok(node.and_then(|n| n.parse().ok()))
    }

    pub fn node_no(&self, mac: &Mac) -> SastResult<Option<i64>> {
        Self::node_no_of(&self.conn, &mac.to_string())
    }

    pub fn change_node_status(&self, stat: NodeSystemStatus) -> SastResult<()> {
        let count: i64 = self.conn.query_row("SELECT count(id) FROM status", [], |r| r.get(0))?;
        if count == 0 {
            self.conn
                .execute("INSERT INTO status (stat) VALUES (?1)", params![stat as i32])?;
        } else {
            self.conn
                .execute("UPDATE status SET stat=?1 WHERE id=1", params![stat as i32])?;
        }
        Ok(())
    }

    pub fn node_status(&self) -> SastResult<NodeSystemStatus> {
        let stat: Option<i32> = self
            .conn
            .query_row("SELECT stat FROM status WHERE id=1", [], |r| r.get(0))
            .optional()?;
        Ok(stat.map(NodeSystemStatus::from_i32).unwrap_or(NodeSystemStatus::None))
    }

    /// Inserts into `history` and replaces the `latest` row for this mac.
    pub fn append_reading(&self, row: &HistoryRow) -> SastResult<()> {
        let mac = row.mac.to_string();
        let date = to_sql_str(row.date);
        self.conn.execute(
            "INSERT INTO history (mac, date, node, templ, humid, batt, rssi, ext, light, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![mac, date, row.node, row.templ, row.humid, row.batt, row.rssi, row.ext, row.light, row.status],
        )?;
        self.conn.execute(
            "INSERT OR REPLACE INTO latest (mac, date, node, templ, humid, batt, rssi, ext, light, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![mac, date, row.node, row.templ, row.humid, row.batt, row.rssi, row.ext, row.light, row.status],
        )?;
        Ok(())
    }

    /// Appends a whole burst's rows in one transaction: a burst persists
    /// atomically, record-order preserved.
    pub fn append_burst(&mut self, rows: &[HistoryRow]) -> SastResult<()> {
        let tx = self.conn.transaction()?;
        for row in rows {
            let mac = row.mac.to_string();
            let date = to_sql_str(row.date);
            tx.execute(
                "INSERT INTO history (mac, date, node, templ, humid, batt, rssi, ext, light, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![mac, date, row.node, row.templ, row.humid, row.batt, row.rssi, row.ext, row.light, row.status],
            )?;
            tx.execute(
                "INSERT OR REPLACE INTO latest (mac, date, node, templ, humid, batt, rssi, ext, light, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![mac, date, row.node, row.templ, row.humid, row.batt, row.rssi, row.ext, row.light, row.status],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Whether `mac` is enabled for `node` — node-body macs are always
    /// usable, sensor macs must have `use=1` under that specific node.
    pub fn use_sensor(&self, node: i64, mac: &Mac) -> SastResult<bool> {
        if mac.is_node_body() {
            let count: i64 =
                self.conn
                    .query_row("SELECT count(mac) FROM conf WHERE mac=?1", params![mac.to_string()], |r| r.get(0))?;
            return Ok(count > 0);
        }
        let used: Option<bool> = self
            .conn
            .query_row(
                "SELECT use FROM conf WHERE mac=?1 AND node=?2",
                params![mac.to_string(), node],
                |r| r.get(0),
            )
            .optional()?;
        Ok(used.unwrap_or(false))
    }

    pub fn sensor_name(&self, mac: &Mac) -> SastResult<String> {
        let name: Option<String> = self
            .conn
            .query_row("SELECT name FROM conf WHERE mac=?1", params![mac.to_string()], |r| r.get(0))
            .optional()?;
        Ok(name.unwrap_or_default())
    }

    /// `(sensor_name, node_name, node_no, thresholds)`.
    pub fn sensor_info(&self, mac: &Mac) -> SastResult<Option<(String, Option<String>, i64, WarnThresholds)>> {
        let row: Option<(String, i64, String)> = self
            .conn
            .query_row(
                "SELECT name, node, warn FROM conf WHERE mac=?1",
                params![mac.to_string()],
                |r| Ok((r.get(0)?, r.get::<_, String>(1)?.parse().unwrap_or(0), r.get(2)?)),
            )
            .optional()?;
        let Some((name, node_no, warn_csv)) = row else {
            return Ok(None);
        };
        let warn = WarnThresholds::parse(&warn_csv).unwrap_or_default();
        let node_ref = NodeRef::NodeSelf(node_no).to_db_string();
        let node_name: Option<String> = self
            .conn
            .query_row("SELECT name FROM conf WHERE node=?1", params![node_ref], |r| r.get(0))
            .optional()?;
        Ok(Some((name, node_name, node_no, warn)))
    }

    pub fn discord_token(&self, node: i64) -> SastResult<Option<String>> {
        let node_ref = NodeRef::NodeSelf(node).to_db_string();
        self.conn
            .query_row("SELECT discord_token FROM conf WHERE node=?1", params![node_ref], |r| r.get(0))
            .optional()
            .map_err(SastError::from)
    }

    pub fn ambient_info(&self, node: i64) -> SastResult<Option<String>> {
        let node_ref = NodeRef::NodeSelf(node).to_db_string();
        self.conn
            .query_row("SELECT ambient_conf FROM conf WHERE node=?1", params![node_ref], |r| r.get(0))
            .optional()
            .map_err(SastError::from)
    }

    pub fn ambient_index(&self, mac: &Mac) -> SastResult<String> {
        let idx: Option<String> = self
            .conn
            .query_row("SELECT ambient_conf FROM conf WHERE mac=?1", params![mac.to_string()], |r| r.get(0))
            .optional()?;
        Ok(idx.unwrap_or_default())
    }

    pub fn num_nodes(&self) -> SastResult<i64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM conf WHERE node LIKE 'LORA__'", [], |r| r.get(0))?;
        Ok((count - 1).max(0))
    }

    pub fn node_info(&self, node: i64) -> SastResult<Option<(i64, String)>> {
        let node_ref = NodeRef::NodeSelf(node).to_db_string();
        self.conn
            .query_row("SELECT node, name FROM conf WHERE node=?1", params![node_ref], |r| {
                Ok((r.get::<_, String>(0)?.parse().unwrap_or(node), r.get(1)?))
            })
            .optional()
            .map_err(SastError::from)
    }

    /// Rows enabled for `node` ordered as returned by `conf` (the Observer
    /// cycle iterates Notify, not Conf, but this mirrors the original's helper).
    pub fn sensors_for_node(&self, node: i64) -> SastResult<Vec<(Mac, String)>> {
        let mut stmt = self.conn.prepare("SELECT mac, name FROM conf WHERE node=?1")?;
        let rows = stmt.query_map(params![node], |r| {
            let mac_str: String = r.get(0)?;
            let name: String = r.get(1)?;
            Ok((mac_str, name))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (mac_str, name) = row?;
            if let Ok(mac) = mac_str.parse() {
                out.push((mac, name));
            }
        }
        Ok(out)
    }

    /// `(batt, date, rssi, ext)` of the most recent history row for `mac`.
    pub fn battery_of(&self, mac: &Mac) -> SastResult<Option<(f32, NaiveDateTime, i32, Option<i32>)>> {
        let row: Option<(f32, String, i32, Option<i32>)> = self
            .conn
            .query_row(
                "SELECT batt, date, rssi, ext FROM history WHERE mac=?1 ORDER BY date DESC LIMIT 1",
                params![mac.to_string()],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
            )
            .optional()?;
        Ok(row.and_then(|(batt, date, rssi, ext)| parse_sql_str(&date).map(|d| (batt, d, rssi, ext))))
    }

    /// RSSI of each node's most recent beacon-slot transmission, `0` if
    /// stale (>1h) or never seen. Indexed `[0]` = Node 1.
    pub fn node_rssi_snapshot(&self) -> SastResult<Vec<i32>> {
        let num = self.num_nodes()?;
        let mut out = vec![0i32; num.max(0) as usize];
        for node in 1..=num {
            let mac = Mac::node_body(node as u8).to_string();
            let row: Option<(i32, String)> = self
                .conn
                .query_row(
                    "SELECT rssi, date FROM history WHERE mac=?1 ORDER BY date DESC LIMIT 1",
                    params![mac],
                    |r| Ok((r.get(0)?, r.get(1)?)),
                )
                .optional()?;
            if let Some((rssi, date)) = row {
                if let Some(dt) = parse_sql_str(&date) {
                    if Local::now().naive_local() - dt < ChronoDuration::hours(1) {
                        out[(node - 1) as usize] = rssi;
                    }
                }
            }
        }
        Ok(out)
    }

    pub fn status_of(&self, mac: &Mac) -> SastResult<SensorStatus> {
        let status: Option<i32> = self
            .conn
            .query_row("SELECT status FROM notify WHERE mac=?1", params![mac.to_string()], |r| r.get(0))
            .optional()?;
        Ok(status.map(SensorStatus::from_i32).unwrap_or(SensorStatus::None))
    }

    pub fn notify_row(&self, mac: &Mac) -> SastResult<Option<NotifyRow>> {
        self.conn
            .query_row(
                "SELECT mac, date, lost_date, status, notify, count, node FROM notify WHERE mac=?1",
                params![mac.to_string()],
                Self::row_to_notify,
            )
            .optional()
            .map_err(SastError::from)
    }

    pub fn update_notify(&self, mac: &Mac, state: SensorStatus, count: i32) -> SastResult<()> {
        let date = now_str();
        let notify_flag = if matches!(state, SensorStatus::Normal) { 0 } else { 1 };
        self.conn.execute(
            "UPDATE notify SET date=?1, status=?2, notify=?3, count=?4 WHERE mac=?5",
            params![date, state.as_i32(), notify_flag, count, mac.to_string()],
        )?;
        Ok(())
    }

    /// Rows scoped to one node (or all), optionally restricted to
    /// `notify=1`; when `clear` is set, `notify` is zeroed for the returned
    /// rows in the same transaction.
    ///
    /// `clear` also gates the `notify=1` predicate itself: `libSQLite.py`'s
    /// `getNotifyList(node, ClearfNotify)` only filters on `notify=1` when
    /// it's about to clear that flag (the Discord fan-out read). The
    /// Observer's classification read (`ClearfNotify=False`) scans every
    /// registered sensor regardless of its current `notify` flag — after
    /// `init_notify` every row starts at `notify=0`, so filtering there
    /// would make classification never see any row.
    pub fn notify_list(&mut self, node: Option<i64>, clear: bool) -> SastResult<Vec<NotifyRow>> {
        let tx = self.conn.transaction()?;
        let rows: Vec<NotifyRow> = {
            let (query, params_vec): (&str, Vec<Box<dyn rusqlite::ToSql>>) = match (node, clear) {
                (Some(n), true) => (
                    "SELECT mac, date, lost_date, status, notify, count, node FROM notify WHERE node=?1 AND notify=1",
                    vec![Box::new(n)],
                ),
                (Some(n), false) => (
                    "SELECT mac, date, lost_date, status, notify, count, node FROM notify WHERE node=?1",
                    vec![Box::new(n)],
                ),
                (None, true) => (
                    "SELECT mac, date, lost_date, status, notify, count, node FROM notify WHERE notify=1",
                    vec![],
                ),
                (None, false) => (
                    "SELECT mac, date, lost_date, status, notify, count, node FROM notify",
                    vec![],
                ),
            };
            let mut stmt = tx.prepare(query)?;
            let param_refs: Vec<&dyn rusqlite::ToSql> = params_vec.iter().map(|b| b.as_ref()).collect();
            let mapped = stmt.query_map(param_refs.as_slice(), Self::row_to_notify)?;
            let mut out = Vec::new();
            for row in mapped {
                out.push(row?);
            }
            out
        };
        if clear {
            match node {
                Some(n) => tx.execute("UPDATE notify SET notify=0 WHERE node=?1", params![n])?,
                None => tx.execute("UPDATE notify SET notify=0", [])?,
            };
        }
        tx.commit()?;
        Ok(rows)
    }

    fn row_to_notify(r: &rusqlite::Row) -> rusqlite::Result<NotifyRow> {
        let mac_str: String = r.get(0)?;
        let date: Option<String> = r.get(1)?;
        let lost_date: Option<String> = r.get(2)?;
        let status: i32 = r.get(3)?;
        let notify: i32 = r.get(4)?;
        let count: i32 = r.get(5)?;
        let node: String = r.get(6)?;
        Ok(NotifyRow {
            mac: mac_str.parse().unwrap_or(Mac::new([0; 6])),
            date: date.and_then(|d| parse_sql_str(&d)),
            lost_date: lost_date.and_then(|d| parse_sql_str(&d)),
            status: SensorStatus::from_i32(status),
            notify: notify != 0,
            count,
            node: node.parse().unwrap_or(0),
        })
    }

    /// Drains (reads then deletes) every `latest` row for `node`.
    pub fn drain_latest_for_node(&mut self, node: i64) -> SastResult<Vec<HistoryRow>> {
        let tx = self.conn.transaction()?;
        let rows: Vec<HistoryRow> = {
            let mut stmt = tx.prepare("SELECT mac, date, node, templ, humid, batt, rssi, ext, light, status FROM latest WHERE node=?1")?;
            let mapped = stmt.query_map(params![node], Self::row_to_history)?;
            let mut out = Vec::new();
            for row in mapped {
                out.push(row?);
            }
            out
        };
        if !rows.is_empty() {
            tx.execute("DELETE FROM latest WHERE node=?1", params![node])?;
        }
        tx.commit()?;
        Ok(rows)
    }

    /// Drains every `latest` row across all nodes, joined with each row's
    /// `ambient_conf` slot assignment (Gateway-side Observer uplink).
    pub fn drain_latest_all(&mut self) -> SastResult<Vec<(HistoryRow, String)>> {
        let tx = self.conn.transaction()?;
        let rows: Vec<(HistoryRow, String)> = {
            let mut stmt = tx.prepare(
                "SELECT L.mac, L.date, L.node, L.templ, L.humid, L.batt, L.rssi, L.ext, L.light, L.status, C.ambient_conf
                 FROM latest AS L INNER JOIN conf AS C ON (L.mac = C.mac)",
            )?;
            let mapped = stmt.query_map([], |r| {
                let history = Self::row_to_history(r)?;
                let ambient: String = r.get(10)?;
                Ok((history, ambient))
            })?;
            let mut out = Vec::new();
            for row in mapped {
                out.push(row?);
            }
            out
        };
        if !rows.is_empty() {
            tx.execute("DELETE FROM latest", [])?;
        }
        tx.commit()?;
        Ok(rows)
    }

    fn row_to_history(r: &rusqlite::Row) -> rusqlite::Result<HistoryRow> {
        let mac_str: String = r.get(0)?;
        let date: String = r.get(1)?;
        Ok(HistoryRow {
            id: None,
            mac: mac_str.parse().unwrap_or(Mac::new([0; 6])),
            date: parse_sql_str(&date).unwrap_or_default(),
            node: r.get(2)?,
            templ: r.get(3)?,
            humid: r.get(4)?,
            batt: r.get(5)?,
            rssi: r.get(6)?,
            ext: r.get(7)?,
            light: r.get(8)?,
            status: r.get(9)?,
        })
    }

    /// Compares `cloud_date` against the stored `conf_date`; if unchanged,
    /// returns `Unchanged` without touching `conf`. Otherwise replaces
    /// `conf` wholesale inside one transaction and rebuilds `notify` —
    /// `notify` is rebuilt only on this `Updated` branch, never on
    /// `Unchanged` or `Error`.
    pub fn apply_config(&mut self, rows: &[Conf], cloud_date: NaiveDateTime) -> SastResult<ApplyOutcome> {
        let existing: Option<String> = self
            .conn
            .query_row("SELECT date FROM conf_date", [], |r| r.get(0))
            .optional()?;
        if let Some(existing) = existing {
            if let Some(existing_date) = parse_sql_str(&existing) {
                if existing_date == cloud_date {
                    return Ok(ApplyOutcome::Unchanged);
                }
            }
        }

        let tx = self.conn.transaction()?;
        let apply_result: SastResult<()> = (|| {
            tx.execute("DELETE FROM conf", [])?;
            for row in rows {
                let mac_lower = row.mac.to_string();
                tx.execute(
                    "INSERT INTO conf (mac, name, node, use, warn, ambient_conf, discord_token, memo)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![
                        mac_lower,
                        row.name,
                        row.node.to_db_string(),
                        row.use_,
                        row.warn.to_csv(),
                        row.ambient_conf,
                        row.discord_token,
                        row.memo,
                    ],
                )?;
            }
            let date_str = to_sql_str(cloud_date);
            tx.execute("REPLACE INTO conf_date (id, date) VALUES (1, ?1)", params![date_str])?;
            Ok(())
        })();

        match apply_result {
            Ok(()) => {
                tx.commit()?;
                self.init_notify()?;
                Ok(ApplyOutcome::Updated)
            }
            Err(e) => {
                tx.rollback()?;
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NodeRef;

    fn sample_conf(mac: &str, node: i64) -> Conf {
        Conf {
            mac: mac.parse().unwrap(),
            name: "sensor-a".into(),
            node: NodeRef::Sensor(node),
            use_: true,
            warn: WarnThresholds::parse("NONE,NONE,35.0,40.0").unwrap(),
            ambient_conf: "d1".into(),
            discord_token: Some("tok".into()),
            memo: String::new(),
        }
    }

    #[test]
    fn create_tables_then_status_round_trips() {
        let store = Store::open_in_memory().unwrap();
        store.create_tables(SetupMode::Create).unwrap();
        assert_eq!(store.node_status().unwrap(), NodeSystemStatus::None);
        store.change_node_status(NodeSystemStatus::Good).unwrap();
        assert_eq!(store.node_status().unwrap(), NodeSystemStatus::Good);
    }

    #[test]
    fn append_reading_populates_history_and_latest() {
        let store = Store::open_in_memory().unwrap();
        store.create_tables(SetupMode::Create).unwrap();
        let mac: Mac = "49:22:01:00:00:01".parse().unwrap();
        let row = HistoryRow {
            id: None,
            mac,
            date: Local::now().naive_local(),
            node: 1,
            templ: 25.0,
            humid: 55.0,
            batt: 90.0,
            rssi: -40,
            ext: None,
            light: None,
            status: 1,
        };
        store.append_reading(&row).unwrap();
        let batt = store.battery_of(&mac).unwrap();
        assert!(batt.is_some());
        assert_eq!(batt.unwrap().0, 90.0);
    }

    #[test]
    fn apply_config_rebuilds_notify_only_when_updated() {
        let mut store = Store::open_in_memory().unwrap();
        store.create_tables(SetupMode::Create).unwrap();
        let conf = vec![sample_conf("49:22:01:00:00:01", 1)];
        let cloud_date = Local::now().naive_local();

        let outcome = store.apply_config(&conf, cloud_date).unwrap();
        assert_eq!(outcome, ApplyOutcome::Updated);
        let notified = store.notify_row(&"49:22:01:00:00:01".parse().unwrap()).unwrap();
        assert!(notified.is_some());

        // second apply with the same cloud_date is a no-op
        let outcome2 = store.apply_config(&conf, cloud_date).unwrap();
        assert_eq!(outcome2, ApplyOutcome::Unchanged);
    }

    #[test]
    fn use_sensor_respects_node_scoping() {
        let mut store = Store::open_in_memory().unwrap();
        store.create_tables(SetupMode::Create).unwrap();
        let conf = vec![sample_conf("49:22:01:00:00:01", 1)];
        store.apply_config(&conf, Local::now().naive_local()).unwrap();
        let mac: Mac = "49:22:01:00:00:01".parse().unwrap();
        assert!(store.use_sensor(1, &mac).unwrap());
        assert!(!store.use_sensor(2, &mac).unwrap());
    }

    #[test]
    fn node_body_mac_is_always_usable_when_node_registered() {
        let mut store = Store::open_in_memory().unwrap();
        store.create_tables(SetupMode::Create).unwrap();
        let conf = vec![Conf {
            mac: Mac::node_body(1),
            name: "node1".into(),
            node: NodeRef::NodeSelf(1),
            use_: true,
            warn: WarnThresholds::default(),
            ambient_conf: String::new(),
            discord_token: None,
            memo: String::new(),
        }];
        store.apply_config(&conf, Local::now().naive_local()).unwrap();
        assert!(store.use_sensor(1, &Mac::node_body(1)).unwrap());
    }

    #[test]
    fn notify_list_clears_flag_in_same_transaction() {
        let mut store = Store::open_in_memory().unwrap();
        store.create_tables(SetupMode::Create).unwrap();
        let conf = vec![sample_conf("49:22:01:00:00:01", 1)];
        store.apply_config(&conf, Local::now().naive_local()).unwrap();
        let mac: Mac = "49:22:01:00:00:01".parse().unwrap();
        store.update_notify(&mac, SensorStatus::HighWarn, 1).unwrap();

        let rows = store.notify_list(None, true).unwrap();
        assert_eq!(rows.len(), 1);
        let rows_again = store.notify_list(None, false).unwrap();
        assert!(rows_again.iter().all(|r| !r.notify));
    }

    #[test]
    fn drain_latest_for_node_empties_after_read() {
        let mut store = Store::open_in_memory().unwrap();
        store.create_tables(SetupMode::Create).unwrap();
        let mac: Mac = "49:22:01:00:00:01".parse().unwrap();
        let row = HistoryRow {
            id: None,
            mac,
            date: Local::now().naive_local(),
            node: 1,
            templ: 25.0,
            humid: 55.0,
            batt: 90.0,
            rssi: -40,
            ext: None,
            light: None,
            status: 1,
        };
        store.append_reading(&row).unwrap();
        let drained = store.drain_latest_for_node(1).unwrap();
        assert_eq!(drained.len(), 1);
        let drained_again = store.drain_latest_for_node(1).unwrap();
        assert!(drained_again.is_empty());
    }
}
