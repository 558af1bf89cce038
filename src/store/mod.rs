//! Persistent storage behind the [`Store`] trait
//!
//! The scheduler and dispatcher talk to storage through short independent
//! operations; no transaction spans a whole scan tick. The SQLite
//! implementation keeps a single connection behind a `Mutex`, which is
//! sufficient because only one scan tick runs at a time and every call is
//! O(rows touched).

use std::net::IpAddr;
use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::Result;
use crate::models::{DeviceProfile, DnsCursor, DnsEvent, HostRecord, HostStatus, ProbeResult, ScanRun};

/// Storage contract used by the scanning core.
///
/// Implementations must be `Send + Sync`; calls are short and may be issued
/// from blocking contexts inside async tasks. Storage failures propagate out
/// of individual calls and are absorbed at the tick-loop boundary.
pub trait Store: Send + Sync {
    /// Fetch the record for one address, if it has ever been observed
    fn get_host(&self, ip: IpAddr) -> Result<Option<HostRecord>>;

    /// Fetch every known host record
    fn get_all_hosts(&self) -> Result<Vec<HostRecord>>;

    /// Insert or update a host record with coalesce-on-null semantics for
    /// `mac`/`hostname`/`vendor`; presence fields always take the new value
    fn upsert_host(&self, record: &HostRecord) -> Result<()>;

    /// Record a completed scan tick, returning its row id
    fn create_scan_run(&self, run: &ScanRun) -> Result<i64>;

    /// Record one per-target observation belonging to a scan run
    fn insert_observation(&self, run_id: i64, result: &ProbeResult) -> Result<()>;

    /// Finish timestamp of the most recent scan run
    fn last_scan_finished(&self) -> Result<Option<i64>>;

    /// Number of hosts whose latest status matches
    fn count_hosts_with_status(&self, status: HostStatus) -> Result<usize>;

    /// Total number of known hosts
    fn count_hosts(&self) -> Result<usize>;

    /// Hosts last seen up but not observed since the cutoff
    fn count_missing_since(&self, cutoff_ts: i64) -> Result<usize>;

    /// Read a runtime setting
    fn get_setting(&self, key: &str) -> Result<Option<String>>;

    /// Write a runtime setting
    fn set_setting(&self, key: &str, value: &str) -> Result<()>;

    /// DNS ingestion cursor state
    fn get_dns_cursor(&self) -> Result<DnsCursor>;

    /// Persist the DNS ingestion cursor
    fn set_dns_cursor(&self, cursor: DnsCursor) -> Result<()>;

    /// Append one ingested DNS event
    fn insert_dns_event(&self, event: &DnsEvent) -> Result<()>;

    /// Query count for one client since the cutoff (burst detection)
    fn count_dns_events_since(&self, client_ip: &str, cutoff_ts: i64) -> Result<usize>;

    /// Distinct clients with at least one query since the cutoff
    fn dns_clients_since(&self, cutoff_ts: i64) -> Result<Vec<String>>;

    /// Operator-assigned profile for a device, by MAC first then IP
    fn get_device_profile(&self, mac: Option<&str>, ip: IpAddr) -> Result<Option<DeviceProfile>>;
}

/// SQLite implementation of [`Store`]
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (and migrate) a database at the given path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        // WAL for concurrent readers while a tick is writing
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.create_schema()?;

        tracing::info!(path = %path.display(), "SQLite store initialized");
        Ok(store)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.create_schema()?;
        Ok(store)
    }

    fn create_schema(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            r#"
                CREATE TABLE IF NOT EXISTS hosts (
                    ip TEXT PRIMARY KEY,
                    mac TEXT,
                    hostname TEXT,
                    vendor TEXT,
                    first_seen_ts INTEGER NOT NULL,
                    last_seen_ts INTEGER NOT NULL,
                    last_status TEXT NOT NULL,
                    last_rtt_ms INTEGER
                );

                CREATE INDEX IF NOT EXISTS idx_hosts_last_status
                    ON hosts(last_status);

                CREATE TABLE IF NOT EXISTS scan_runs (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    started_ts INTEGER NOT NULL,
                    finished_ts INTEGER NOT NULL,
                    targets_count INTEGER NOT NULL,
                    up_count INTEGER NOT NULL,
                    down_count INTEGER NOT NULL
                );

                CREATE TABLE IF NOT EXISTS observations (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    run_id INTEGER NOT NULL REFERENCES scan_runs(id),
                    ip TEXT NOT NULL,
                    status TEXT NOT NULL,
                    rtt_ms INTEGER,
                    mac TEXT,
                    hostname TEXT
                );

                CREATE INDEX IF NOT EXISTS idx_observations_run
                    ON observations(run_id);

                CREATE TABLE IF NOT EXISTS settings (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS dns_events (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    ts INTEGER NOT NULL,
                    client_ip TEXT NOT NULL,
                    domain TEXT NOT NULL,
                    qtype TEXT,
                    status TEXT,
                    upstream TEXT
                );

                CREATE INDEX IF NOT EXISTS idx_dns_events_client_ts
                    ON dns_events(client_ip, ts);

                CREATE TABLE IF NOT EXISTS dns_ingest_state (
                    id INTEGER PRIMARY KEY CHECK (id = 1),
                    last_seen_ts INTEGER NOT NULL DEFAULT 0,
                    last_offset INTEGER NOT NULL DEFAULT 0
                );

                CREATE TABLE IF NOT EXISTS device_profiles (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    mac TEXT UNIQUE,
                    ip_key TEXT UNIQUE,
                    label TEXT,
                    is_safe INTEGER NOT NULL DEFAULT 0,
                    tags TEXT
                );
                "#,
        )?;

        Ok(())
    }
}

fn row_to_host(row: &rusqlite::Row<'_>) -> rusqlite::Result<(String, HostRecord)> {
    let ip_str: String = row.get(0)?;
    let status: String = row.get(6)?;
    let record = HostRecord {
        // Placeholder, fixed up by the caller after parsing ip_str
        ip: IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED),
        mac: row.get(1)?,
        hostname: row.get(2)?,
        vendor: row.get(3)?,
        first_seen_ts: row.get(4)?,
        last_seen_ts: row.get(5)?,
        last_status: status.parse().unwrap_or(HostStatus::Down),
        last_rtt_ms: row.get(7)?,
    };
    Ok((ip_str, record))
}

const HOST_COLUMNS: &str =
    "ip, mac, hostname, vendor, first_seen_ts, last_seen_ts, last_status, last_rtt_ms";

impl Store for SqliteStore {
    fn get_host(&self, ip: IpAddr) -> Result<Option<HostRecord>> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                &format!("SELECT {HOST_COLUMNS} FROM hosts WHERE ip = ?1"),
                params![ip.to_string()],
                row_to_host,
            )
            .optional()?;

        Ok(row.and_then(|(ip_str, mut record)| {
            let parsed = ip_str.parse().ok()?;
            record.ip = parsed;
            Some(record)
        }))
    }

    fn get_all_hosts(&self) -> Result<Vec<HostRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!("SELECT {HOST_COLUMNS} FROM hosts"))?;
        let rows = stmt.query_map([], row_to_host)?;

        let mut hosts = Vec::new();
        for row in rows {
            let (ip_str, mut record) = row?;
            if let Ok(ip) = ip_str.parse() {
                record.ip = ip;
                hosts.push(record);
            }
        }
        Ok(hosts)
    }

    fn upsert_host(&self, record: &HostRecord) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO hosts (ip, mac, hostname, vendor, first_seen_ts, last_seen_ts, last_status, last_rtt_ms)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(ip) DO UPDATE SET
                mac = COALESCE(excluded.mac, mac),
                hostname = COALESCE(excluded.hostname, hostname),
                vendor = COALESCE(excluded.vendor, vendor),
                last_seen_ts = excluded.last_seen_ts,
                last_status = excluded.last_status,
                last_rtt_ms = excluded.last_rtt_ms
            "#,
            params![
                record.ip.to_string(),
                record.mac,
                record.hostname,
                record.vendor,
                record.first_seen_ts,
                record.last_seen_ts,
                record.last_status.as_str(),
                record.last_rtt_ms,
            ],
        )?;
        Ok(())
    }

    fn create_scan_run(&self, run: &ScanRun) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO scan_runs (started_ts, finished_ts, targets_count, up_count, down_count)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                run.started_ts,
                run.finished_ts,
                run.targets_count,
                run.up_count,
                run.down_count,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn insert_observation(&self, run_id: i64, result: &ProbeResult) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO observations (run_id, ip, status, rtt_ms, mac, hostname)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                run_id,
                result.ip.to_string(),
                result.status.as_str(),
                result.rtt_ms,
                result.mac,
                result.hostname,
            ],
        )?;
        Ok(())
    }

    fn last_scan_finished(&self) -> Result<Option<i64>> {
        let conn = self.conn.lock().unwrap();
        let ts = conn
            .query_row(
                "SELECT finished_ts FROM scan_runs ORDER BY finished_ts DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        Ok(ts)
    }

    fn count_hosts_with_status(&self, status: HostStatus) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM hosts WHERE last_status = ?1",
            params![status.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn count_hosts(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM hosts", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn count_missing_since(&self, cutoff_ts: i64) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM hosts WHERE last_status = 'up' AND last_seen_ts < ?1",
            params![cutoff_ts],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        let value = conn
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO settings (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    fn get_dns_cursor(&self) -> Result<DnsCursor> {
        let conn = self.conn.lock().unwrap();
        let cursor = conn
            .query_row(
                "SELECT last_seen_ts, last_offset FROM dns_ingest_state WHERE id = 1",
                [],
                |row| {
                    Ok(DnsCursor {
                        last_seen_ts: row.get(0)?,
                        last_offset: row.get::<_, i64>(1)? as u64,
                    })
                },
            )
            .optional()?;
        Ok(cursor.unwrap_or_default())
    }

    fn set_dns_cursor(&self, cursor: DnsCursor) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO dns_ingest_state (id, last_seen_ts, last_offset)
            VALUES (1, ?1, ?2)
            ON CONFLICT(id) DO UPDATE SET
                last_seen_ts = excluded.last_seen_ts,
                last_offset = excluded.last_offset
            "#,
            params![cursor.last_seen_ts, cursor.last_offset as i64],
        )?;
        Ok(())
    }

    fn insert_dns_event(&self, event: &DnsEvent) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO dns_events (ts, client_ip, domain, qtype, status, upstream)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                event.ts,
                event.client_ip,
                event.domain,
                event.qtype,
                event.status,
                event.upstream,
            ],
        )?;
        Ok(())
    }

    fn count_dns_events_since(&self, client_ip: &str, cutoff_ts: i64) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM dns_events WHERE client_ip = ?1 AND ts >= ?2",
            params![client_ip, cutoff_ts],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn dns_clients_since(&self, cutoff_ts: i64) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT DISTINCT client_ip FROM dns_events WHERE ts >= ?1")?;
        let clients = stmt
            .query_map(params![cutoff_ts], |row| row.get::<_, String>(0))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(clients)
    }

    fn get_device_profile(&self, mac: Option<&str>, ip: IpAddr) -> Result<Option<DeviceProfile>> {
        let conn = self.conn.lock().unwrap();

        let map = |row: &rusqlite::Row<'_>| -> rusqlite::Result<DeviceProfile> {
            Ok(DeviceProfile {
                label: row.get(0)?,
                is_safe: row.get::<_, i64>(1)? != 0,
                tags: row.get(2)?,
            })
        };

        if let Some(mac) = mac {
            let profile = conn
                .query_row(
                    "SELECT label, is_safe, tags FROM device_profiles WHERE mac = ?1",
                    params![mac],
                    map,
                )
                .optional()?;
            if profile.is_some() {
                return Ok(profile);
            }
        }

        let profile = conn
            .query_row(
                "SELECT label, is_safe, tags FROM device_profiles WHERE ip_key = ?1",
                params![format!("ip:{ip}")],
                map,
            )
            .optional()?;
        Ok(profile)
    }
}

impl SqliteStore {
    /// Insert or update a device profile (operator metadata)
    pub fn upsert_device_profile(
        &self,
        mac: Option<&str>,
        ip: Option<IpAddr>,
        profile: &DeviceProfile,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        if let Some(mac) = mac {
            conn.execute(
                r#"
                INSERT INTO device_profiles (mac, label, is_safe, tags)
                VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT(mac) DO UPDATE SET
                    label = COALESCE(excluded.label, label),
                    is_safe = excluded.is_safe,
                    tags = COALESCE(excluded.tags, tags)
                "#,
                params![mac, profile.label, profile.is_safe as i64, profile.tags],
            )?;
        } else if let Some(ip) = ip {
            conn.execute(
                r#"
                INSERT INTO device_profiles (ip_key, label, is_safe, tags)
                VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT(ip_key) DO UPDATE SET
                    label = COALESCE(excluded.label, label),
                    is_safe = excluded.is_safe,
                    tags = COALESCE(excluded.tags, tags)
                "#,
                params![
                    format!("ip:{ip}"),
                    profile.label,
                    profile.is_safe as i64,
                    profile.tags
                ],
            )?;
        }
        Ok(())
    }
}
