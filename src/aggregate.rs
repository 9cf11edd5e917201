use std::collections::{BTreeMap, BTreeSet};

use crate::models::{
    AggregationResult, AggregationRow, Dimension, OverallMetrics, ParticipationRecord, Status,
};

/// `part / total * 100`, defined as 0 for an empty total.
pub fn percentage(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64 * 100.0
    }
}

#[derive(Default)]
struct GroupTally<'a> {
    done: BTreeSet<&'a str>,
    not_done: BTreeSet<&'a str>,
}

/// Groups records by `dimension` and counts distinct identifiers per status.
/// Every group carries both counts; rows come back ordered by label.
pub fn aggregate(records: &[ParticipationRecord], dimension: Dimension) -> AggregationResult {
    let mut groups: BTreeMap<&str, GroupTally> = BTreeMap::new();

    for record in records {
        let tally = groups.entry(record.value(dimension)).or_default();
        match record.status {
            Status::Done => tally.done.insert(record.id.as_str()),
            Status::NotDone => tally.not_done.insert(record.id.as_str()),
        };
    }

    let rows: Vec<AggregationRow> = groups
        .into_iter()
        .map(|(label, tally)| {
            let done_count = tally.done.len();
            let not_done_count = tally.not_done.len();
            let total = done_count + not_done_count;
            AggregationRow {
                label: label.to_string(),
                done_count,
                not_done_count,
                done_pct: percentage(done_count, total),
                not_done_pct: percentage(not_done_count, total),
            }
        })
        .collect();

    let overall = overall_metrics(&rows);
    AggregationResult {
        breakdown_dimension: dimension,
        rows,
        overall,
    }
}

/// Totals are summed from the rows rather than recounted from records.
pub fn overall_metrics(rows: &[AggregationRow]) -> OverallMetrics {
    let done: usize = rows.iter().map(|row| row.done_count).sum();
    let not_done: usize = rows.iter().map(|row| row.not_done_count).sum();
    let total = done + not_done;
    OverallMetrics {
        done,
        total,
        pct: percentage(done, total),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Membership, OrgFields};

    fn record(id: &str, unit: &str, division: &str, status: Status) -> ParticipationRecord {
        let membership = match status {
            Status::Done => Membership::Both,
            Status::NotDone => Membership::RosterOnly,
        };
        ParticipationRecord {
            id: id.into(),
            status,
            membership,
            reporting_unit: unit.into(),
            fields: OrgFields {
                unit: unit.into(),
                division: division.into(),
                ..OrgFields::default()
            },
        }
    }

    fn sample() -> Vec<ParticipationRecord> {
        vec![
            record("000001", "G. MANUFACTURE", "PRODUCTION", Status::Done),
            record("000002", "G. MANUFACTURE", "PRODUCTION", Status::Done),
            record("000003", "G. MANUFACTURE", "QUALITY", Status::Done),
            record("000004", "G. MANUFACTURE", "QUALITY", Status::NotDone),
            record("000005", "G. MEDIA", "NEWS", Status::NotDone),
            record("000006", "G. MEDIA", "NEWS", Status::NotDone),
        ]
    }

    #[test]
    fn groups_by_unit_with_overall() {
        let result = aggregate(&sample(), Dimension::Unit);
        assert_eq!(result.breakdown_dimension, Dimension::Unit);
        assert_eq!(result.rows.len(), 2);

        let manufacture = &result.rows[0];
        assert_eq!(manufacture.label, "G. MANUFACTURE");
        assert_eq!((manufacture.done_count, manufacture.not_done_count), (3, 1));
        assert!((manufacture.done_pct - 75.0).abs() < 1e-9);
        assert!((manufacture.not_done_pct - 25.0).abs() < 1e-9);

        let media = &result.rows[1];
        assert_eq!(media.label, "G. MEDIA");
        assert_eq!((media.done_count, media.not_done_count), (0, 2));
        assert_eq!(media.done_pct, 0.0);
        assert_eq!(media.not_done_pct, 100.0);

        assert_eq!(result.overall.done, 3);
        assert_eq!(result.overall.total, 6);
        assert!((result.overall.pct - 50.0).abs() < 1e-9);
    }

    #[test]
    fn duplicate_rows_do_not_inflate_counts() {
        let mut records = sample();
        records.push(record("000001", "G. MANUFACTURE", "PRODUCTION", Status::Done));
        records.push(record("000005", "G. MEDIA", "NEWS", Status::NotDone));

        let result = aggregate(&records, Dimension::Unit);
        assert_eq!(result.rows[0].done_count, 3);
        assert_eq!(result.rows[1].not_done_count, 2);
        assert_eq!(result.overall.total, 6);
    }

    #[test]
    fn group_totals_cover_every_record() {
        let records = sample();
        for dimension in [Dimension::Unit, Dimension::Division, Dimension::Department] {
            let result = aggregate(&records, dimension);
            let covered: usize = result
                .rows
                .iter()
                .map(|row| row.done_count + row.not_done_count)
                .sum();
            assert_eq!(covered, records.len(), "{dimension}");
            assert_eq!(result.overall.total, records.len());
        }
    }

    #[test]
    fn empty_input_gives_empty_result() {
        let result = aggregate(&[], Dimension::Division);
        assert!(result.rows.is_empty());
        assert_eq!(result.overall.done, 0);
        assert_eq!(result.overall.total, 0);
        assert_eq!(result.overall.pct, 0.0);
    }

    #[test]
    fn percentage_is_zero_guarded() {
        assert_eq!(percentage(0, 0), 0.0);
        assert_eq!(percentage(1, 4), 25.0);
    }
}
