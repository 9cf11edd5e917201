use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::{Field, Membership, OrgFields, ReconciledRecord, RosterRecord, SurveyResponseRecord};

pub const DEFAULT_PLACEHOLDER: &str = "-";

/// Where a candidate value for a semantic field is read from, written in
/// configuration as `roster.<field>` or `survey.<column>`. `survey.name`
/// always reads the respondent name, whatever column it came from; any other
/// survey column, a remapped name column included, reads the record's
/// free-form fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SourceRef {
    Roster(Field),
    Survey(String),
}

impl SourceRef {
    fn lookup<'a>(
        &self,
        survey: Option<&'a SurveyResponseRecord>,
        roster: Option<&'a RosterRecord>,
    ) -> Option<&'a str> {
        match self {
            SourceRef::Roster(field) => roster.and_then(|record| record.value(*field)),
            SourceRef::Survey(column) => survey.and_then(|record| {
                if column == "name" {
                    record.respondent_name.as_deref()
                } else {
                    record.fields.get(column).map(String::as_str)
                }
            }),
        }
    }
}

impl TryFrom<String> for SourceRef {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        let (source, column) = value
            .split_once('.')
            .ok_or_else(|| Error::InvalidSourceField(value.clone()))?;
        let column = column.trim();
        if column.is_empty() {
            return Err(Error::InvalidSourceField(value.clone()));
        }
        match source.trim() {
            "roster" => column
                .parse::<Field>()
                .map(SourceRef::Roster)
                .map_err(|_| Error::InvalidSourceField(value.clone())),
            "survey" => Ok(SourceRef::Survey(column.to_string())),
            _ => Err(Error::InvalidSourceField(value.clone())),
        }
    }
}

impl From<SourceRef> for String {
    fn from(value: SourceRef) -> Self {
        value.to_string()
    }
}

impl fmt::Display for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceRef::Roster(field) => write!(f, "roster.{field}"),
            SourceRef::Survey(column) => write!(f, "survey.{column}"),
        }
    }
}

/// Ordered per-field source precedence. Fields without a declared order
/// read the roster column of the same name only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackPolicy {
    placeholder: String,
    orders: BTreeMap<Field, Vec<SourceRef>>,
}

impl FallbackPolicy {
    pub fn new(placeholder: impl Into<String>, orders: BTreeMap<Field, Vec<SourceRef>>) -> Result<Self> {
        if let Some((field, _)) = orders.iter().find(|(_, order)| order.is_empty()) {
            return Err(Error::Config(format!(
                "fallback order for {field} must name at least one source"
            )));
        }
        Ok(Self {
            placeholder: placeholder.into(),
            orders,
        })
    }

    /// First non-blank candidate in declared order, else the placeholder.
    pub fn resolve(
        &self,
        field: Field,
        survey: Option<&SurveyResponseRecord>,
        roster: Option<&RosterRecord>,
    ) -> String {
        let candidate = match self.orders.get(&field) {
            Some(order) => order
                .iter()
                .filter_map(|source| source.lookup(survey, roster))
                .map(str::trim)
                .find(|value| !value.is_empty()),
            None => roster
                .and_then(|record| record.value(field))
                .map(str::trim)
                .filter(|value| !value.is_empty()),
        };
        candidate.unwrap_or(self.placeholder.as_str()).to_string()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    pub records: Vec<ReconciledRecord>,
    pub duplicate_survey_rows: usize,
    pub duplicate_roster_rows: usize,
}

impl Reconciliation {
    pub fn count(&self, membership: Membership) -> usize {
        self.records
            .iter()
            .filter(|record| record.membership == membership)
            .count()
    }
}

/// Full outer join of keyed survey and roster rows. Emits one record per
/// distinct key, ordered by key. When a key repeats within one source the
/// first row wins and the rest are tallied as duplicates.
pub fn reconcile(
    survey: &[(String, SurveyResponseRecord)],
    roster: &[(String, RosterRecord)],
    policy: &FallbackPolicy,
) -> Reconciliation {
    let mut joined: BTreeMap<&str, (Option<&SurveyResponseRecord>, Option<&RosterRecord>)> =
        BTreeMap::new();
    let mut duplicate_survey_rows = 0usize;
    let mut duplicate_roster_rows = 0usize;

    for (key, record) in survey {
        let slot = joined.entry(key.as_str()).or_insert((None, None));
        if slot.0.is_some() {
            duplicate_survey_rows += 1;
        } else {
            slot.0 = Some(record);
        }
    }

    for (key, record) in roster {
        let slot = joined.entry(key.as_str()).or_insert((None, None));
        if slot.1.is_some() {
            duplicate_roster_rows += 1;
        } else {
            slot.1 = Some(record);
        }
    }

    let records = joined
        .into_iter()
        .filter_map(|(key, (survey_row, roster_row))| {
            let membership = Membership::from_presence(survey_row.is_some(), roster_row.is_some())?;
            let mut fields = OrgFields::default();
            for field in Field::ALL {
                fields.set(field, policy.resolve(field, survey_row, roster_row));
            }
            Some(ReconciledRecord {
                id: key.to_string(),
                membership,
                fields,
            })
        })
        .collect();

    Reconciliation {
        records,
        duplicate_survey_rows,
        duplicate_roster_rows,
    }
}
