use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::models::{RosterRecord, SurveyResponseRecord, TimeRange};

/// Hands the core every survey submission inside a time range.
#[allow(async_fn_in_trait)]
pub trait SurveyRecordSource {
    async fn survey_records(&self, range: &TimeRange) -> anyhow::Result<Vec<SurveyResponseRecord>>;
}

/// Hands the core the latest roster snapshot.
#[allow(async_fn_in_trait)]
pub trait RosterSource {
    async fn roster_records(&self) -> anyhow::Result<Vec<RosterRecord>>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SurveyColumns {
    pub id: String,
    pub name: String,
    pub submitted_at: String,
}

impl Default for SurveyColumns {
    fn default() -> Self {
        Self {
            id: "nik".to_string(),
            name: "name".to_string(),
            submitted_at: "created_at".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RosterColumns {
    pub id: String,
    pub name: String,
    pub unit: String,
    pub subunit: String,
    pub division: String,
    pub department: String,
    pub position: String,
    pub admin_tag: String,
}

impl Default for RosterColumns {
    fn default() -> Self {
        Self {
            id: "nik_short".to_string(),
            name: "name".to_string(),
            unit: "unit_long".to_string(),
            subunit: "subunit".to_string(),
            division: "division".to_string(),
            department: "department".to_string(),
            position: "position".to_string(),
            admin_tag: "admin_goman".to_string(),
        }
    }
}

pub struct CsvSurveySource {
    pub path: PathBuf,
    pub columns: SurveyColumns,
}

pub struct CsvRosterSource {
    pub path: PathBuf,
    pub columns: RosterColumns,
}

impl SurveyRecordSource for CsvSurveySource {
    async fn survey_records(&self, range: &TimeRange) -> anyhow::Result<Vec<SurveyResponseRecord>> {
        read_survey_csv(&self.path, &self.columns, range)
    }
}

impl RosterSource for CsvRosterSource {
    async fn roster_records(&self) -> anyhow::Result<Vec<RosterRecord>> {
        read_roster_csv(&self.path, &self.columns)
    }
}

/// Accepts `YYYY-MM-DD HH:MM[:SS]`, the ISO `T` separator, or a bare date
/// (midnight).
pub fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    const FORMATS: [&str; 4] = [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M",
    ];
    FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
}

struct Header {
    index: BTreeMap<String, usize>,
}

impl Header {
    fn new(headers: &csv::StringRecord) -> Self {
        let index = headers
            .iter()
            .enumerate()
            .map(|(i, name)| (name.trim().to_string(), i))
            .collect();
        Self { index }
    }

    fn cell(&self, row: &csv::StringRecord, column: &str) -> Option<String> {
        self.index
            .get(column)
            .and_then(|i| row.get(*i))
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    }
}

pub fn read_roster_csv(path: &Path, columns: &RosterColumns) -> anyhow::Result<Vec<RosterRecord>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("failed to open roster file {}", path.display()))?;
    let records = roster_from_reader(file, columns)
        .with_context(|| format!("failed to read roster file {}", path.display()))?;
    info!(path = %path.display(), rows = records.len(), "roster rows loaded");
    Ok(records)
}

pub fn roster_from_reader<R: Read>(
    reader: R,
    columns: &RosterColumns,
) -> anyhow::Result<Vec<RosterRecord>> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
    let header = Header::new(reader.headers()?);
    if !header.index.contains_key(&columns.id) {
        anyhow::bail!("roster is missing the identifier column {:?}", columns.id);
    }

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row?;
        records.push(RosterRecord {
            raw_id: header.cell(&row, &columns.id),
            full_name: header.cell(&row, &columns.name),
            unit: header.cell(&row, &columns.unit),
            subunit: header.cell(&row, &columns.subunit),
            division: header.cell(&row, &columns.division),
            department: header.cell(&row, &columns.department),
            position: header.cell(&row, &columns.position),
            admin_tag: header.cell(&row, &columns.admin_tag),
        });
    }
    Ok(records)
}

pub fn read_survey_csv(
    path: &Path,
    columns: &SurveyColumns,
    range: &TimeRange,
) -> anyhow::Result<Vec<SurveyResponseRecord>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("failed to open survey file {}", path.display()))?;
    let records = survey_from_reader(file, columns, range)
        .with_context(|| format!("failed to read survey file {}", path.display()))?;
    info!(path = %path.display(), rows = records.len(), %range, "survey rows loaded");
    Ok(records)
}

/// Every column except id and timestamp lands in the record's free-form
/// fields, the name column included, so `survey.<column>` resolves whatever
/// the name column is called. Rows outside `range` are dropped; with a bounded range, rows
/// whose timestamp cannot be read are dropped too.
pub fn survey_from_reader<R: Read>(
    reader: R,
    columns: &SurveyColumns,
    range: &TimeRange,
) -> anyhow::Result<Vec<SurveyResponseRecord>> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
    let headers = reader.headers()?.clone();
    let header = Header::new(&headers);
    if !header.index.contains_key(&columns.id) {
        anyhow::bail!("survey export is missing the identifier column {:?}", columns.id);
    }

    let reserved = [&columns.id, &columns.submitted_at];
    let mut records = Vec::new();

    for (line, row) in reader.records().enumerate() {
        let row = row?;
        let stamp = header.cell(&row, &columns.submitted_at);
        let submitted_at = stamp.as_deref().and_then(parse_timestamp);

        match submitted_at {
            Some(at) if !range.contains(at) => continue,
            None if !range.is_unbounded() => {
                warn!(line = line + 2, value = ?stamp, "survey row skipped: unreadable timestamp");
                continue;
            }
            _ => {}
        }

        let fields = headers
            .iter()
            .map(str::trim)
            .filter(|name| !reserved.iter().any(|column| column.as_str() == *name))
            .filter_map(|name| header.cell(&row, name).map(|value| (name.to_string(), value)))
            .collect();

        records.push(SurveyResponseRecord {
            raw_id: header.cell(&row, &columns.id),
            respondent_name: header.cell(&row, &columns.name),
            submitted_at,
            fields,
        });
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const ROSTER: &str = "\
nik_short,name,unit_long,subunit,division,department,position,admin_goman
2,Budi Santoso,GROUP OF MEDIA,TV NETWORK,NEWS,DESK,Editor,
3.0,Citra,GROUP OF MANUFACTURE,PLANT A,PRODUCTION,LINE 1,Operator,ADMIN A
,Nobody,GROUP OF RETAIL,,,,,
";

    const SURVEY: &str = "\
nik,name,created_at,unit_name,div_name,dept_name,q1
1,Ana,2014-07-07 08:15,GROUP OF RETAIL,STORES,NORTH,4
2,Budi,2014-07-08 10:00:00,,,,5
9,Late,2014-07-09 00:00,,,,3
7,Broken,yesterday,,,,1
";

    #[test]
    fn roster_rows_map_configured_columns() {
        let records =
            roster_from_reader(ROSTER.as_bytes(), &RosterColumns::default()).expect("roster parses");
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].raw_id.as_deref(), Some("2"));
        assert_eq!(records[0].subunit.as_deref(), Some("TV NETWORK"));
        assert_eq!(records[0].admin_tag, None);
        assert_eq!(records[1].admin_tag.as_deref(), Some("ADMIN A"));
        assert_eq!(records[2].raw_id, None);
    }

    #[test]
    fn roster_without_id_column_is_rejected() {
        let result = roster_from_reader("name,unit_long\nA,B\n".as_bytes(), &RosterColumns::default());
        assert!(result.is_err());
    }

    #[test]
    fn survey_rows_keep_extra_columns_and_honor_range() {
        let range = TimeRange {
            start: parse_timestamp("2014-07-07"),
            end: parse_timestamp("2014-07-09"),
        };
        let records = survey_from_reader(SURVEY.as_bytes(), &SurveyColumns::default(), &range)
            .expect("survey parses");
        let ids: Vec<Option<&str>> = records.iter().map(|r| r.raw_id.as_deref()).collect();
        assert_eq!(ids, vec![Some("1"), Some("2")]);
        assert_eq!(records[0].respondent_name.as_deref(), Some("Ana"));
        assert_eq!(
            records[0].fields.get("unit_name").map(String::as_str),
            Some("GROUP OF RETAIL")
        );
        assert_eq!(records[0].fields.get("q1").map(String::as_str), Some("4"));
        assert!(!records[0].fields.contains_key("created_at"));
        assert!(!records[1].fields.contains_key("unit_name"));
    }

    #[test]
    fn remapped_name_column_stays_addressable() {
        let columns = SurveyColumns {
            name: "full_name".to_string(),
            ..SurveyColumns::default()
        };
        let export = "nik,full_name,created_at\n1,Ana Wijaya,2014-07-07\n";
        let records = survey_from_reader(export.as_bytes(), &columns, &TimeRange::unbounded())
            .expect("survey parses");
        assert_eq!(records[0].respondent_name.as_deref(), Some("Ana Wijaya"));
        assert_eq!(
            records[0].fields.get("full_name").map(String::as_str),
            Some("Ana Wijaya")
        );
        assert!(!records[0].fields.contains_key("nik"));
    }

    #[test]
    fn unbounded_range_keeps_unreadable_timestamps() {
        let records =
            survey_from_reader(SURVEY.as_bytes(), &SurveyColumns::default(), &TimeRange::unbounded())
                .expect("survey parses");
        assert_eq!(records.len(), 4);
        assert_eq!(records[3].submitted_at, None);
    }

    #[test]
    fn timestamps_accept_common_layouts() {
        let expected = NaiveDate::from_ymd_opt(2014, 7, 7)
            .and_then(|d| d.and_hms_opt(8, 15, 0));
        assert_eq!(parse_timestamp("2014-07-07 08:15"), expected);
        assert_eq!(parse_timestamp("2014-07-07T08:15:00"), expected);
        assert_eq!(
            parse_timestamp("2014-07-07"),
            NaiveDate::from_ymd_opt(2014, 7, 7).and_then(|d| d.and_hms_opt(0, 0, 0))
        );
        assert_eq!(parse_timestamp("07/07/2014"), None);
    }

    #[tokio::test]
    async fn csv_sources_read_from_disk() {
        let mut roster = tempfile::NamedTempFile::new().expect("temp file");
        roster.write_all(ROSTER.as_bytes()).expect("write roster");
        let source = CsvRosterSource {
            path: roster.path().to_path_buf(),
            columns: RosterColumns::default(),
        };
        let records = source.roster_records().await.expect("roster loads");
        assert_eq!(records.len(), 3);
    }
}
