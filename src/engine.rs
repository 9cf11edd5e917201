use std::collections::BTreeSet;

use serde::Serialize;
use tracing::{debug, info, info_span, warn};
use uuid::Uuid;

use crate::aggregate;
use crate::config::{canonical_selection, ReportConfig};
use crate::error::{Error, Result};
use crate::filters::{FilterPipeline, OfferedStep, Scope, Selections};
use crate::identifier;
use crate::labels::LabelResolver;
use crate::models::{
    AggregationResult, Dimension, Membership, ParticipationRecord, RosterRecord,
    SurveyResponseRecord,
};
use crate::reconcile::{self, FallbackPolicy};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportRequest {
    pub selections: Selections,
    pub scope: Option<Scope>,
    pub breakdown: Dimension,
}

impl Default for ReportRequest {
    fn default() -> Self {
        Self {
            selections: Selections::new(),
            scope: None,
            breakdown: Dimension::Unit,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RowFaults {
    pub invalid_identifier: usize,
    pub missing_required_field: usize,
}

impl RowFaults {
    pub fn total(&self) -> usize {
        self.invalid_identifier + self.missing_required_field
    }

    fn record(&mut self, error: &Error) {
        match error {
            Error::InvalidIdentifier { .. } => self.invalid_identifier += 1,
            Error::MissingRequiredField { .. } => self.missing_required_field += 1,
            _ => {}
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunDiagnostics {
    pub run_id: Uuid,
    pub survey_rows: usize,
    pub roster_rows: usize,
    pub skipped_survey: RowFaults,
    pub skipped_roster: RowFaults,
    pub duplicate_survey_rows: usize,
    pub duplicate_roster_rows: usize,
    pub survey_only: usize,
    pub roster_only: usize,
    pub matched: usize,
    pub filters_applied: Vec<Dimension>,
    pub selections_ignored: Vec<Dimension>,
}

impl RunDiagnostics {
    fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            survey_rows: 0,
            roster_rows: 0,
            skipped_survey: RowFaults::default(),
            skipped_roster: RowFaults::default(),
            duplicate_survey_rows: 0,
            duplicate_roster_rows: 0,
            survey_only: 0,
            roster_only: 0,
            matched: 0,
            filters_applied: Vec::new(),
            selections_ignored: Vec::new(),
        }
    }

    pub fn skipped_rows(&self) -> usize {
        self.skipped_survey.total() + self.skipped_roster.total()
    }

    pub fn reconciled(&self) -> usize {
        self.survey_only + self.roster_only + self.matched
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunOutput {
    pub table: Vec<ParticipationRecord>,
    pub aggregation: AggregationResult,
    pub diagnostics: RunDiagnostics,
}

/// Normalizer, reconciler, label resolver, filter cascade and aggregation
/// wired from one configuration. Holds no state between runs.
#[derive(Debug, Clone)]
pub struct Engine {
    policy: FallbackPolicy,
    resolver: LabelResolver,
    pipeline: FilterPipeline,
}

impl Engine {
    pub fn from_config(config: &ReportConfig) -> Result<Self> {
        Ok(Self {
            policy: config.fallback_policy()?,
            resolver: config.label_resolver(),
            pipeline: config.filter_pipeline()?,
        })
    }

    pub fn pipeline(&self) -> &FilterPipeline {
        &self.pipeline
    }

    /// Reconciled, label-resolved records before any filtering.
    pub fn participation(
        &self,
        survey: Vec<SurveyResponseRecord>,
        roster: Vec<RosterRecord>,
        diagnostics: &mut RunDiagnostics,
    ) -> Vec<ParticipationRecord> {
        diagnostics.survey_rows = survey.len();
        diagnostics.roster_rows = roster.len();

        let survey = key_rows(survey, "survey", &mut diagnostics.skipped_survey, |row| {
            row.raw_id.as_deref()
        });
        let roster = key_rows(roster, "roster", &mut diagnostics.skipped_roster, |row| {
            row.raw_id.as_deref()
        });

        let joined = reconcile::reconcile(&survey, &roster, &self.policy);
        diagnostics.duplicate_survey_rows = joined.duplicate_survey_rows;
        diagnostics.duplicate_roster_rows = joined.duplicate_roster_rows;
        diagnostics.survey_only = joined.count(Membership::SurveyOnly);
        diagnostics.roster_only = joined.count(Membership::RosterOnly);
        diagnostics.matched = joined.count(Membership::Both);

        info!(
            survey_only = diagnostics.survey_only,
            roster_only = diagnostics.roster_only,
            matched = diagnostics.matched,
            skipped = diagnostics.skipped_rows(),
            "reconciliation complete"
        );

        self.resolver.resolve_all(joined.records)
    }

    /// Brings user-typed values into the canonical label form.
    pub fn canonical_selections(&self, selections: &Selections) -> Selections {
        selections
            .iter()
            .map(|(dimension, values)| {
                let values: BTreeSet<String> = values
                    .iter()
                    .map(|value| canonical_selection(&self.resolver, *dimension, value))
                    .collect();
                (*dimension, values)
            })
            .collect()
    }

    pub fn canonical_scope(&self, scope: &Scope) -> Scope {
        Scope {
            dimension: scope.dimension,
            values: scope
                .values
                .iter()
                .map(|value| canonical_selection(&self.resolver, scope.dimension, value))
                .collect(),
        }
    }

    pub fn run(
        &self,
        survey: Vec<SurveyResponseRecord>,
        roster: Vec<RosterRecord>,
        request: &ReportRequest,
    ) -> RunOutput {
        let run_id = Uuid::new_v4();
        let span = info_span!("participation_run", %run_id, breakdown = %request.breakdown);
        let _guard = span.enter();

        let mut diagnostics = RunDiagnostics::new(run_id);
        let records = self.participation(survey, roster, &mut diagnostics);

        let selections = self.canonical_selections(&request.selections);
        let scope = request.scope.as_ref().map(|scope| self.canonical_scope(scope));
        let filtered = self.pipeline.apply(records, &selections, scope.as_ref());
        diagnostics.filters_applied = filtered.applied;
        diagnostics.selections_ignored = filtered.ignored;

        if filtered.records.is_empty() {
            info!("filter combination matched no records");
        }

        let aggregation = aggregate::aggregate(&filtered.records, request.breakdown);
        debug!(
            groups = aggregation.rows.len(),
            done = aggregation.overall.done,
            total = aggregation.overall.total,
            "aggregation complete"
        );

        RunOutput {
            table: filtered.records,
            aggregation,
            diagnostics,
        }
    }

    pub fn offered(
        &self,
        survey: Vec<SurveyResponseRecord>,
        roster: Vec<RosterRecord>,
        request: &ReportRequest,
    ) -> Vec<OfferedStep> {
        let mut diagnostics = RunDiagnostics::new(Uuid::new_v4());
        let records = self.participation(survey, roster, &mut diagnostics);
        let selections = self.canonical_selections(&request.selections);
        let scope = request.scope.as_ref().map(|scope| self.canonical_scope(scope));
        self.pipeline.offered(&records, &selections, scope.as_ref())
    }
}

/// Pairs each row with its normalized key. Rows without a usable key are
/// logged, counted and left out; they never abort the batch.
fn key_rows<T>(
    rows: Vec<T>,
    source: &str,
    faults: &mut RowFaults,
    raw_id: impl Fn(&T) -> Option<&str>,
) -> Vec<(String, T)> {
    let mut keyed = Vec::with_capacity(rows.len());
    for (index, row) in rows.into_iter().enumerate() {
        let key = match raw_id(&row) {
            Some(raw) => identifier::normalize(raw),
            None => Err(Error::MissingRequiredField {
                field: "identifier".to_string(),
            }),
        };
        match key {
            Ok(key) => keyed.push((key, row)),
            Err(error) => {
                warn!(source, row = index, %error, "row skipped");
                faults.record(&error);
            }
        }
    }
    keyed
}

/// Single-call entry point: reconcile both sources, filter, and aggregate.
pub fn reconcile_and_aggregate(
    survey: Vec<SurveyResponseRecord>,
    roster: Vec<RosterRecord>,
    config: &ReportConfig,
    request: &ReportRequest,
) -> Result<RunOutput> {
    Ok(Engine::from_config(config)?.run(survey, roster, request))
}
