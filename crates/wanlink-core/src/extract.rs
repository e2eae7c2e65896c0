// ── Circuit extract import ──
//
// Reads the partner's delimited export into `CircuitRecord`s. Unknown
// columns are ignored; blank or malformed optional cells become `None`
// instead of failing the whole file. Cells that are not UTF-8 are read
// as Latin-1, and a row that still cannot be read is skipped.

use std::io::Read;
use std::net::IpAddr;
use std::path::Path;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::CoreError;
use crate::model::{CircuitRecord, CircuitRole, CircuitStatus, RecordSource, normalize_speed};
use crate::text::{collapse_whitespace, is_placeholder};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawRow {
    record_number: Option<String>,
    site_name: Option<String>,
    circuit_purpose: Option<String>,
    status: Option<String>,
    provider_name: Option<String>,
    details_ordered_service_speed: Option<String>,
    billing_monthly_cost: Option<String>,
    ip_address_start: Option<String>,
    date_record_updated: Option<String>,
}

#[derive(Debug, Default)]
pub struct ExtractReport {
    pub records: Vec<CircuitRecord>,
    /// Rows dropped for lacking a site name.
    pub skipped: usize,
    /// Rows that could not be read at all.
    pub unreadable: usize,
}

pub fn load_extract(path: &Path) -> Result<ExtractReport, CoreError> {
    let file = std::fs::File::open(path).map_err(|e| CoreError::Extract {
        message: format!("{}: {e}", path.display()),
    })?;
    read_extract(file)
}

pub fn read_extract<R: Read>(reader: R) -> Result<ExtractReport, CoreError> {
    let mut csv = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = csv.headers()?.clone();
    for required in ["site_name", "provider_name"] {
        if !headers.iter().any(|h| h == required) {
            return Err(CoreError::Extract {
                message: format!("missing required column {required:?}"),
            });
        }
    }

    let mut report = ExtractReport::default();
    for (index, row) in csv.byte_records().enumerate() {
        let fallback_line = index as u64 + 2;
        let bytes = match row {
            Ok(bytes) => bytes,
            Err(e) if matches!(e.kind(), csv::ErrorKind::Io(_)) => return Err(e.into()),
            Err(e) => {
                let line = e.position().map_or(fallback_line, csv::Position::line);
                warn!(line, error = %e, "unreadable extract row skipped");
                report.unreadable += 1;
                continue;
            }
        };
        let line = bytes.position().map_or(fallback_line, csv::Position::line);

        let row: RawRow = match decode_record(&bytes).deserialize(Some(&headers)) {
            Ok(row) => row,
            Err(e) => {
                warn!(line, error = %e, "unreadable extract row skipped");
                report.unreadable += 1;
                continue;
            }
        };
        match convert(row) {
            Some(record) => report.records.push(record),
            None => {
                debug!(line, "extract row without site name skipped");
                report.skipped += 1;
            }
        }
    }
    if report.skipped > 0 || report.unreadable > 0 {
        warn!(
            skipped = report.skipped,
            unreadable = report.unreadable,
            "extract rows skipped"
        );
    }
    Ok(report)
}

fn decode_record(bytes: &csv::ByteRecord) -> csv::StringRecord {
    bytes.iter().map(decode_cell).collect()
}

fn decode_cell(raw: &[u8]) -> String {
    match std::str::from_utf8(raw) {
        Ok(text) => text.to_owned(),
        Err(_) => raw.iter().copied().map(char::from).collect(),
    }
}

fn cell(value: Option<String>) -> Option<String> {
    value
        .map(|v| collapse_whitespace(&v))
        .filter(|v| !is_placeholder(v))
}

fn convert(row: RawRow) -> Option<CircuitRecord> {
    let site = cell(row.site_name)?;
    Some(CircuitRecord {
        record_number: cell(row.record_number),
        site,
        role: CircuitRole::from(cell(row.circuit_purpose).unwrap_or_default()),
        provider: cell(row.provider_name).unwrap_or_default(),
        speed: cell(row.details_ordered_service_speed)
            .map(|s| normalize_speed(&s))
            .unwrap_or_default(),
        monthly_cost: cell(row.billing_monthly_cost).and_then(|c| parse_cost(&c)),
        status: CircuitStatus::from(cell(row.status).unwrap_or_default()),
        ip: cell(row.ip_address_start).and_then(|ip| ip.parse::<IpAddr>().ok()),
        last_seen: cell(row.date_record_updated).and_then(|d| parse_timestamp(&d)),
        source: RecordSource::Extract,
    })
}

/// `"$1,234.50"` -> `1234.5`.
fn parse_cost(raw: &str) -> Option<f64> {
    let cleaned: String = raw.chars().filter(|c| !matches!(c, '$' | ',' | ' ')).collect();
    cleaned.parse::<f64>().ok().filter(|c| c.is_finite())
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M:%S%.f", "%m/%d/%Y %H:%M"] {
        if let Ok(ts) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(ts.and_utc());
        }
    }
    for format in ["%Y-%m-%d", "%m/%d/%Y"] {
        if let Ok(day) = NaiveDate::parse_from_str(raw, format) {
            return day.and_hms_opt(0, 0, 0).map(|ts| ts.and_utc());
        }
    }
    None
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    use super::*;

    const EXTRACT: &str = "\
record_number,site_name,circuit_purpose,status,provider_name,details_ordered_service_speed,billing_monthly_cost,ip_address_start,date_record_updated,notes
DSR-1,ALB 01,Primary,Enabled,Comcast Workplace,300M x 35M,\"$1,204.50\",73.1.1.1,2024-05-01 10:00:00,ok
,ALB 01,Secondary,Enabled,AT&T Broadband II,1G x 1G,89,,05/03/2024,
DSR-3,,Primary,Enabled,Cox,,,,,
DSR-4,BOS 02,Backup,Cancelled,Verizon,Cell,nan,not-an-ip,garbage,
";

    #[test]
    fn reads_rows_and_normalizes_cells() {
        let report = read_extract(EXTRACT.as_bytes()).unwrap();
        assert_eq!(report.records.len(), 3);
        assert_eq!(report.skipped, 1);

        let first = &report.records[0];
        assert_eq!(first.record_number.as_deref(), Some("DSR-1"));
        assert_eq!(first.role, CircuitRole::Primary);
        assert_eq!(first.speed, "300.0M x 35.0M");
        assert_eq!(first.monthly_cost, Some(1204.5));
        assert_eq!(first.ip, Some("73.1.1.1".parse().unwrap()));
        assert_eq!(
            first.last_seen,
            Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).single()
        );

        let second = &report.records[1];
        assert_eq!(second.record_number, None);
        assert_eq!(second.speed, "1000.0M x 1000.0M");
        assert_eq!(
            second.last_seen,
            Utc.with_ymd_and_hms(2024, 5, 3, 0, 0, 0).single()
        );

        let third = &report.records[2];
        assert_eq!(third.role, CircuitRole::Other("Backup".into()));
        assert_eq!(third.status, CircuitStatus::Disabled);
        assert_eq!(third.speed, "Cell");
        assert_eq!(third.monthly_cost, None);
        assert_eq!(third.ip, None);
        assert_eq!(third.last_seen, None);
    }

    #[test]
    fn latin1_cell_does_not_sink_the_file() {
        let raw = b"site_name,provider_name\nALB 01,Comcast\nBOS 02,Caf\xE9 Net\nCHI 03,AT&T\n";
        let report = read_extract(&raw[..]).unwrap();

        let providers: Vec<&str> = report.records.iter().map(|r| r.provider.as_str()).collect();
        assert_eq!(providers, ["Comcast", "Caf\u{e9} Net", "AT&T"]);
        assert_eq!(report.records[1].site, "BOS 02");
        assert_eq!(report.unreadable, 0);
    }

    #[test]
    fn missing_required_column_is_an_extract_error() {
        let err = read_extract("site,provider\nALB 01,Comcast\n".as_bytes()).unwrap_err();
        assert!(matches!(err, CoreError::Extract { .. }));
    }

    #[test]
    fn missing_file_is_an_extract_error() {
        let err = load_extract(Path::new("/definitely/not/here.csv")).unwrap_err();
        assert!(matches!(err, CoreError::Extract { .. }));
    }
}
