//! Row ↔ domain mapping
//!
//! Column lists and mapping functions live here so every repository query
//! agrees on ordering. The monitor mapper is the dynamic one: it reads
//! whichever type-specific columns exist for the row's `type`.

use std::str::FromStr;

use rusqlite::Row;

use crate::core::{Monitor, MonitorStatus, Setting, Site, StatusRecord};

pub const SITE_COLUMNS: &str = "identifier, name, monitoring";

pub const MONITOR_COLUMNS: &str = "id, site_identifier, type, status, check_interval_ms, \
     timeout_ms, retry_attempts, monitoring, url, host, port, record_type, expected_value, \
     status_codes, header_name, keyword, json_path, latency_threshold_ms, expiry_warning_days";

pub const HISTORY_COLUMNS: &str = "monitor_id, timestamp, status, response_time_ms, details";

/// Sites come out of their own table without monitors; the caller composes
/// the aggregate from the monitor repository.
pub fn map_site_row(row: &Row<'_>) -> rusqlite::Result<Site> {
    Ok(Site {
        identifier: row.get(0)?,
        name: row.get(1)?,
        monitoring: row.get::<_, i64>(2)? != 0,
        monitors: Vec::new(),
    })
}

pub fn map_monitor_row(row: &Row<'_>) -> rusqlite::Result<Monitor> {
    let status: String = row.get(3)?;
    Ok(Monitor {
        id: row.get(0)?,
        site_identifier: row.get(1)?,
        monitor_type: row.get(2)?,
        status: MonitorStatus::from_str(&status).unwrap_or(MonitorStatus::Unknown),
        check_interval_ms: row.get::<_, i64>(4)?.max(0) as u64,
        timeout_ms: row.get::<_, i64>(5)?.max(0) as u64,
        retry_attempts: row.get::<_, i64>(6)?.max(0) as u32,
        monitoring: row.get::<_, i64>(7)? != 0,
        url: row.get(8)?,
        host: row.get(9)?,
        port: row
            .get::<_, Option<i64>>(10)?
            .and_then(|p| u16::try_from(p).ok()),
        record_type: row.get(11)?,
        expected_value: row.get(12)?,
        status_codes: row.get(13)?,
        header_name: row.get(14)?,
        keyword: row.get(15)?,
        json_path: row.get(16)?,
        latency_threshold_ms: row.get::<_, Option<i64>>(17)?.map(|v| v.max(0) as u64),
        expiry_warning_days: row
            .get::<_, Option<i64>>(18)?
            .and_then(|v| u32::try_from(v).ok()),
    })
}

pub fn map_history_row(row: &Row<'_>) -> rusqlite::Result<StatusRecord> {
    let status: String = row.get(2)?;
    Ok(StatusRecord {
        monitor_id: row.get(0)?,
        timestamp_ms: row.get(1)?,
        status: MonitorStatus::from_str(&status).unwrap_or(MonitorStatus::Unknown),
        response_time_ms: row.get::<_, i64>(3)?.max(0) as u64,
        details: row.get(4)?,
    })
}

pub fn map_setting_row(row: &Row<'_>) -> rusqlite::Result<Setting> {
    Ok(Setting {
        key: row.get(0)?,
        value: row.get(1)?,
    })
}
