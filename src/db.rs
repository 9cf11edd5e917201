use std::collections::BTreeMap;

use anyhow::Context;
use chrono::NaiveDateTime;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::info;
use uuid::Uuid;

use crate::models::{RosterRecord, SurveyResponseRecord, TimeRange};
use crate::sources::{self, RosterColumns, RosterSource, SurveyColumns, SurveyRecordSource};

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let submitted = NaiveDateTime::parse_from_str("2014-07-07 09:30", "%Y-%m-%d %H:%M")
        .context("invalid seed timestamp")?;

    let survey = vec![
        SurveyResponseRecord {
            raw_id: Some("1".to_string()),
            respondent_name: Some("Ana Wijaya".to_string()),
            submitted_at: Some(submitted),
            fields: BTreeMap::from([("unit_name".to_string(), "GROUP OF RETAIL".to_string())]),
        },
        SurveyResponseRecord {
            raw_id: Some("2".to_string()),
            respondent_name: Some("Budi".to_string()),
            submitted_at: Some(submitted + chrono::Duration::hours(3)),
            fields: BTreeMap::new(),
        },
    ];

    let roster = vec![
        RosterRecord {
            raw_id: Some("2".to_string()),
            full_name: Some("Budi Santoso".to_string()),
            unit: Some("GROUP OF MEDIA".to_string()),
            subunit: Some("TV NETWORK".to_string()),
            division: Some("NEWS".to_string()),
            department: Some("DESK".to_string()),
            position: Some("Editor".to_string()),
            admin_tag: None,
        },
        RosterRecord {
            raw_id: Some("3".to_string()),
            full_name: Some("Citra Lestari".to_string()),
            unit: Some("GROUP OF MANUFACTURE".to_string()),
            subunit: Some("PLANT A".to_string()),
            division: Some("PRODUCTION".to_string()),
            department: Some("LINE 1".to_string()),
            position: Some("Operator".to_string()),
            admin_tag: Some("ADMIN A".to_string()),
        },
    ];

    replace_roster(pool, &roster).await?;
    insert_survey_responses(pool, &survey).await?;
    Ok(())
}

/// Replaces the whole roster snapshot in one transaction.
pub async fn replace_roster(pool: &PgPool, roster: &[RosterRecord]) -> anyhow::Result<usize> {
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM survey_participation.roster_employees")
        .execute(&mut *tx)
        .await?;

    for (row_number, record) in roster.iter().enumerate() {
        let row_number = i32::try_from(row_number).context("roster export has too many rows")?;
        sqlx::query(
            r#"
            INSERT INTO survey_participation.roster_employees
            (id, raw_id, full_name, unit, subunit, division, department, position, admin_tag, row_number)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&record.raw_id)
        .bind(&record.full_name)
        .bind(&record.unit)
        .bind(&record.subunit)
        .bind(&record.division)
        .bind(&record.department)
        .bind(&record.position)
        .bind(&record.admin_tag)
        .bind(row_number)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    info!(rows = roster.len(), "roster snapshot replaced");
    Ok(roster.len())
}

/// Stable key a stored submission is deduplicated on: raw id plus submission
/// time when both are known, otherwise a name-based UUID over the whole row.
pub fn survey_source_key(record: &SurveyResponseRecord) -> String {
    if let (Some(raw_id), Some(at)) = (&record.raw_id, record.submitted_at) {
        return format!("{}@{}", raw_id.trim(), at);
    }
    let content = serde_json::json!({
        "raw_id": record.raw_id.as_deref().map(str::trim),
        "name": record.respondent_name.as_deref().map(str::trim),
        "submitted_at": record.submitted_at.map(|at| at.to_string()),
        "fields": &record.fields,
    });
    format!(
        "content-{}",
        Uuid::new_v5(&Uuid::NAMESPACE_OID, content.to_string().as_bytes())
    )
}

/// Inserts survey submissions, skipping ones already stored under the same
/// source key.
pub async fn insert_survey_responses(
    pool: &PgPool,
    survey: &[SurveyResponseRecord],
) -> anyhow::Result<usize> {
    let mut inserted = 0usize;

    for record in survey {
        let source_key = survey_source_key(record);

        let result = sqlx::query(
            r#"
            INSERT INTO survey_participation.survey_responses
            (id, raw_id, respondent_name, submitted_at, fields, source_key)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (source_key) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&record.raw_id)
        .bind(&record.respondent_name)
        .bind(record.submitted_at)
        .bind(Json(&record.fields))
        .bind(source_key)
        .execute(pool)
        .await?;

        if result.rows_affected() > 0 {
            inserted += 1;
        }
    }

    Ok(inserted)
}

pub async fn import_roster_csv(
    pool: &PgPool,
    csv_path: &std::path::Path,
    columns: &RosterColumns,
) -> anyhow::Result<usize> {
    let roster = sources::read_roster_csv(csv_path, columns)?;
    replace_roster(pool, &roster).await
}

pub async fn import_survey_csv(
    pool: &PgPool,
    csv_path: &std::path::Path,
    columns: &SurveyColumns,
) -> anyhow::Result<usize> {
    let survey = sources::read_survey_csv(csv_path, columns, &TimeRange::unbounded())?;
    insert_survey_responses(pool, &survey).await
}

const ROSTER_QUERY: &str = "SELECT raw_id, full_name, unit, subunit, division, department, position, admin_tag \
     FROM survey_participation.roster_employees \
     ORDER BY row_number, id";

/// Rows come back in export order.
pub async fn fetch_roster(pool: &PgPool) -> anyhow::Result<Vec<RosterRecord>> {
    let rows = sqlx::query(ROSTER_QUERY).fetch_all(pool).await?;

    let mut roster = Vec::with_capacity(rows.len());
    for row in rows {
        roster.push(RosterRecord {
            raw_id: row.get("raw_id"),
            full_name: row.get("full_name"),
            unit: row.get("unit"),
            subunit: row.get("subunit"),
            division: row.get("division"),
            department: row.get("department"),
            position: row.get("position"),
            admin_tag: row.get("admin_tag"),
        });
    }

    Ok(roster)
}

/// Ordered by submission time; `source_key` is unique, so ties resolve the
/// same way on every run.
fn survey_query(range: &TimeRange) -> String {
    let mut query = String::from(
        "SELECT raw_id, respondent_name, submitted_at, fields \
         FROM survey_participation.survey_responses \
         WHERE TRUE",
    );

    let mut next_param = 1;
    if range.start.is_some() {
        query.push_str(&format!(" AND submitted_at >= ${next_param}"));
        next_param += 1;
    }
    if range.end.is_some() {
        query.push_str(&format!(" AND submitted_at < ${next_param}"));
    }
    query.push_str(" ORDER BY submitted_at, created_at, source_key");
    query
}

pub async fn fetch_survey_responses(
    pool: &PgPool,
    range: &TimeRange,
) -> anyhow::Result<Vec<SurveyResponseRecord>> {
    let query = survey_query(range);
    let mut rows = sqlx::query(&query);
    if let Some(start) = range.start {
        rows = rows.bind(start);
    }
    if let Some(end) = range.end {
        rows = rows.bind(end);
    }

    let records = rows.fetch_all(pool).await?;
    let mut survey = Vec::with_capacity(records.len());

    for row in records {
        let fields: Json<BTreeMap<String, String>> = row.get("fields");
        survey.push(SurveyResponseRecord {
            raw_id: row.get("raw_id"),
            respondent_name: row.get("respondent_name"),
            submitted_at: row.get("submitted_at"),
            fields: fields.0,
        });
    }

    Ok(survey)
}

pub struct PgSurveySource {
    pub pool: PgPool,
}

pub struct PgRosterSource {
    pub pool: PgPool,
}

impl SurveyRecordSource for PgSurveySource {
    async fn survey_records(&self, range: &TimeRange) -> anyhow::Result<Vec<SurveyResponseRecord>> {
        fetch_survey_responses(&self.pool, range).await
    }
}

impl RosterSource for PgRosterSource {
    async fn roster_records(&self) -> anyhow::Result<Vec<RosterRecord>> {
        fetch_roster(&self.pool).await
    }
}
