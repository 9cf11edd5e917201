use std::fmt::Write;
use std::path::Path;

use anyhow::Context;

use crate::engine::RunOutput;
use crate::models::{AggregationResult, Dimension, ParticipationRecord, TimeRange};

pub fn build_report(
    scope: Option<&str>,
    range: &TimeRange,
    output: &RunOutput,
) -> String {
    let result = &output.aggregation;
    let diagnostics = &output.diagnostics;
    let dimension = result.breakdown_dimension;

    let mut out = String::new();
    let scope_label = scope.unwrap_or("all units");

    let _ = writeln!(out, "# Survey Participation Report");
    let _ = writeln!(out, "Generated for {} ({})", scope_label, range);
    let _ = writeln!(out, "Run `{}`", diagnostics.run_id);
    let _ = writeln!(out);
    let _ = writeln!(out, "## Overall Participation");
    let _ = writeln!(out, "- Done: {}", result.overall.done);
    let _ = writeln!(out, "- Total employees: {}", result.overall.total);
    let _ = writeln!(out, "- Overall participation: {:.2}%", result.overall.pct);
    let _ = writeln!(out);
    let _ = writeln!(out, "## Participation by {}", dimension.title());

    if result.rows.is_empty() {
        let _ = writeln!(out, "No employees match the selected filters.");
    } else {
        let _ = writeln!(
            out,
            "| {} | Done | Not Done | Done (%) | Not Done (%) |",
            dimension.title()
        );
        let _ = writeln!(out, "|---|---:|---:|---:|---:|");
        for row in &result.rows {
            let _ = writeln!(
                out,
                "| {} | {} | {} | {:.1} | {:.1} |",
                row.label, row.done_count, row.not_done_count, row.done_pct, row.not_done_pct
            );
        }
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "## Data Quality");
    let _ = writeln!(
        out,
        "- Survey rows read: {} ({} skipped, {} duplicates)",
        diagnostics.survey_rows,
        diagnostics.skipped_survey.total(),
        diagnostics.duplicate_survey_rows
    );
    let _ = writeln!(
        out,
        "- Roster rows read: {} ({} skipped, {} duplicates)",
        diagnostics.roster_rows,
        diagnostics.skipped_roster.total(),
        diagnostics.duplicate_roster_rows
    );
    let _ = writeln!(
        out,
        "- Employees reconciled: {} (matched: {}, survey only: {}, roster only: {})",
        diagnostics.reconciled(),
        diagnostics.matched,
        diagnostics.survey_only,
        diagnostics.roster_only
    );
    if !diagnostics.filters_applied.is_empty() {
        let _ = writeln!(
            out,
            "- Filters applied: {}",
            join_dimensions(&diagnostics.filters_applied)
        );
    }
    if !diagnostics.selections_ignored.is_empty() {
        let _ = writeln!(
            out,
            "- Selections ignored: {}",
            join_dimensions(&diagnostics.selections_ignored)
        );
    }

    out
}

/// Plain-text table for terminal output.
pub fn format_summary(result: &AggregationResult) -> String {
    let mut out = String::new();
    let title = result.breakdown_dimension.title();
    let width = result
        .rows
        .iter()
        .map(|row| row.label.chars().count())
        .chain(std::iter::once(title.len()))
        .max()
        .unwrap_or(0);

    let _ = writeln!(
        out,
        "{:<width$}  {:>6}  {:>8}  {:>7}",
        title, "Done", "Not Done", "Done %"
    );
    for row in &result.rows {
        let _ = writeln!(
            out,
            "{:<width$}  {:>6}  {:>8}  {:>6.1}%",
            row.label, row.done_count, row.not_done_count, row.done_pct
        );
    }
    let _ = writeln!(
        out,
        "Overall: {} of {} done ({:.2}%)",
        result.overall.done, result.overall.total, result.overall.pct
    );
    out
}

pub fn write_json(path: &Path, result: &AggregationResult) -> anyhow::Result<()> {
    let body = serde_json::to_string_pretty(result)?;
    std::fs::write(path, body).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

pub fn write_table_csv(path: &Path, table: &[ParticipationRecord]) -> anyhow::Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    write_table(&mut writer, table)?;
    writer.flush()?;
    Ok(())
}

fn write_table<W: std::io::Write>(
    writer: &mut csv::Writer<W>,
    table: &[ParticipationRecord],
) -> anyhow::Result<()> {
    writer.write_record([
        "id",
        "name",
        "status",
        "unit",
        "group",
        "subunit",
        "division",
        "department",
        "position",
        "admin_tag",
    ])?;
    for record in table {
        writer.write_record([
            record.id.as_str(),
            record.fields.name.as_str(),
            record.status.label(),
            record.value(Dimension::Unit),
            record.value(Dimension::Group),
            record.value(Dimension::Subunit),
            record.value(Dimension::Division),
            record.value(Dimension::Department),
            record.value(Dimension::Position),
            record.value(Dimension::AdminTag),
        ])?;
    }
    Ok(())
}

fn join_dimensions(dimensions: &[Dimension]) -> String {
    dimensions
        .iter()
        .map(Dimension::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReportConfig;
    use crate::engine::{reconcile_and_aggregate, ReportRequest};
    use crate::models::{RosterRecord, SurveyResponseRecord};

    fn output() -> RunOutput {
        let survey = vec![SurveyResponseRecord {
            raw_id: Some("1".into()),
            respondent_name: Some("Ana".into()),
            ..SurveyResponseRecord::default()
        }];
        let roster = vec![
            RosterRecord {
                raw_id: Some("1".into()),
                full_name: Some("Ana".into()),
                unit: Some("GROUP OF MANUFACTURE".into()),
                ..RosterRecord::default()
            },
            RosterRecord {
                raw_id: Some("2".into()),
                full_name: Some("Budi, Jr.".into()),
                unit: Some("GROUP OF MANUFACTURE".into()),
                ..RosterRecord::default()
            },
        ];
        reconcile_and_aggregate(survey, roster, &ReportConfig::default(), &ReportRequest::default())
            .expect("default config is valid")
    }

    #[test]
    fn report_lists_groups_and_overall() {
        let report = build_report(None, &TimeRange::unbounded(), &output());
        assert!(report.contains("# Survey Participation Report"));
        assert!(report.contains("Generated for all units (all submissions)"));
        assert!(report.contains("- Overall participation: 50.00%"));
        assert!(report.contains("| G. MANUFACTURE | 1 | 1 | 50.0 | 50.0 |"));
        assert!(report.contains("- Employees reconciled: 2 (matched: 1, survey only: 0, roster only: 1)"));
    }

    #[test]
    fn empty_result_is_reported_plainly() {
        let mut empty = output();
        empty.aggregation.rows.clear();
        let report = build_report(Some("C. FINANCE"), &TimeRange::unbounded(), &empty);
        assert!(report.contains("Generated for C. FINANCE"));
        assert!(report.contains("No employees match the selected filters."));
    }

    #[test]
    fn summary_ends_with_overall_line() {
        let summary = format_summary(&output().aggregation);
        assert!(summary.starts_with("Unit"));
        assert!(summary.trim_end().ends_with("Overall: 1 of 2 done (50.00%)"));
    }

    #[test]
    fn table_export_quotes_and_labels_status() {
        let mut writer = csv::Writer::from_writer(Vec::new());
        write_table(&mut writer, &output().table).expect("table writes");
        let bytes = writer.into_inner().ok().expect("flush");
        let text = String::from_utf8(bytes).expect("utf8");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("id,name,status,unit"));
        assert!(lines[1].starts_with("000001,Ana,done,G. MANUFACTURE"));
        assert!(lines[2].starts_with("000002,\"Budi, Jr.\",not done,G. MANUFACTURE"));
    }

    #[test]
    fn json_export_uses_snake_case_dimension() {
        let dir = tempfile::tempdir().expect("tmp");
        let path = dir.path().join("result.json");
        write_json(&path, &output().aggregation).expect("json writes");
        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).expect("read back"))
                .expect("valid json");
        assert_eq!(value["breakdown_dimension"], "unit");
        assert_eq!(value["overall"]["total"], 2);
        assert_eq!(value["rows"][0]["not_done_count"], 1);
    }
}
