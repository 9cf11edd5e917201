use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// One row handed over by the survey collaborator.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SurveyResponseRecord {
    pub raw_id: Option<String>,
    pub respondent_name: Option<String>,
    pub submitted_at: Option<NaiveDateTime>,
    pub fields: BTreeMap<String, String>,
}

/// One row of the employee roster snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RosterRecord {
    pub raw_id: Option<String>,
    pub full_name: Option<String>,
    pub unit: Option<String>,
    pub subunit: Option<String>,
    pub division: Option<String>,
    pub department: Option<String>,
    pub position: Option<String>,
    pub admin_tag: Option<String>,
}

impl RosterRecord {
    pub fn value(&self, field: Field) -> Option<&str> {
        let value = match field {
            Field::Name => &self.full_name,
            Field::Unit => &self.unit,
            Field::Subunit => &self.subunit,
            Field::Division => &self.division,
            Field::Department => &self.department,
            Field::Position => &self.position,
            Field::AdminTag => &self.admin_tag,
        };
        value.as_deref()
    }
}

/// Shared semantic fields resolved across both sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Name,
    Unit,
    Subunit,
    Division,
    Department,
    Position,
    AdminTag,
}

impl Field {
    pub const ALL: [Field; 7] = [
        Field::Name,
        Field::Unit,
        Field::Subunit,
        Field::Division,
        Field::Department,
        Field::Position,
        Field::AdminTag,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Field::Name => "name",
            Field::Unit => "unit",
            Field::Subunit => "subunit",
            Field::Division => "division",
            Field::Department => "department",
            Field::Position => "position",
            Field::AdminTag => "admin_tag",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Field {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Field::ALL
            .into_iter()
            .find(|field| field.as_str() == s.trim())
            .ok_or_else(|| Error::Config(format!("unknown field: {s}")))
    }
}

/// Coalesced values for every semantic field; missing values hold the placeholder.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OrgFields {
    pub name: String,
    pub unit: String,
    pub subunit: String,
    pub division: String,
    pub department: String,
    pub position: String,
    pub admin_tag: String,
}

impl OrgFields {
    pub fn get(&self, field: Field) -> &str {
        match field {
            Field::Name => &self.name,
            Field::Unit => &self.unit,
            Field::Subunit => &self.subunit,
            Field::Division => &self.division,
            Field::Department => &self.department,
            Field::Position => &self.position,
            Field::AdminTag => &self.admin_tag,
        }
    }

    pub fn set(&mut self, field: Field, value: String) {
        let slot = match field {
            Field::Name => &mut self.name,
            Field::Unit => &mut self.unit,
            Field::Subunit => &mut self.subunit,
            Field::Division => &mut self.division,
            Field::Department => &mut self.department,
            Field::Position => &mut self.position,
            Field::AdminTag => &mut self.admin_tag,
        };
        *slot = value;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Membership {
    SurveyOnly,
    RosterOnly,
    Both,
}

impl Membership {
    pub fn from_presence(in_survey: bool, in_roster: bool) -> Option<Self> {
        match (in_survey, in_roster) {
            (true, true) => Some(Membership::Both),
            (true, false) => Some(Membership::SurveyOnly),
            (false, true) => Some(Membership::RosterOnly),
            (false, false) => None,
        }
    }

    pub fn status(&self) -> Status {
        match self {
            Membership::SurveyOnly | Membership::Both => Status::Done,
            Membership::RosterOnly => Status::NotDone,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Done,
    NotDone,
}

impl Status {
    pub fn label(&self) -> &'static str {
        match self {
            Status::Done => "done",
            Status::NotDone => "not done",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconciledRecord {
    pub id: String,
    pub membership: Membership,
    pub fields: OrgFields,
}

impl ReconciledRecord {
    pub fn status(&self) -> Status {
        self.membership.status()
    }
}

/// Attributes a participation table can be filtered or broken down by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    /// Reporting unit, after override rules.
    Unit,
    /// Canonical unit before override rules.
    Group,
    Subunit,
    Division,
    Department,
    Position,
    AdminTag,
}

impl Dimension {
    pub const ALL: [Dimension; 7] = [
        Dimension::Unit,
        Dimension::Group,
        Dimension::Subunit,
        Dimension::Division,
        Dimension::Department,
        Dimension::Position,
        Dimension::AdminTag,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Dimension::Unit => "unit",
            Dimension::Group => "group",
            Dimension::Subunit => "subunit",
            Dimension::Division => "division",
            Dimension::Department => "department",
            Dimension::Position => "position",
            Dimension::AdminTag => "admin_tag",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Dimension::Unit => "Unit",
            Dimension::Group => "Group",
            Dimension::Subunit => "Subunit",
            Dimension::Division => "Division",
            Dimension::Department => "Department",
            Dimension::Position => "Position",
            Dimension::AdminTag => "Admin Tag",
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dimension {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('-', "_");
        Dimension::ALL
            .into_iter()
            .find(|dimension| dimension.as_str() == wanted)
            .ok_or_else(|| Error::UnknownDimension(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParticipationRecord {
    pub id: String,
    pub status: Status,
    pub membership: Membership,
    /// Unit used for reporting once override rules are applied.
    pub reporting_unit: String,
    pub fields: OrgFields,
}

impl ParticipationRecord {
    pub fn value(&self, dimension: Dimension) -> &str {
        match dimension {
            Dimension::Unit => &self.reporting_unit,
            Dimension::Group => &self.fields.unit,
            Dimension::Subunit => &self.fields.subunit,
            Dimension::Division => &self.fields.division,
            Dimension::Department => &self.fields.department,
            Dimension::Position => &self.fields.position,
            Dimension::AdminTag => &self.fields.admin_tag,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregationRow {
    pub label: String,
    pub done_count: usize,
    pub not_done_count: usize,
    pub done_pct: f64,
    pub not_done_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverallMetrics {
    pub done: usize,
    pub total: usize,
    pub pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregationResult {
    pub breakdown_dimension: Dimension,
    pub rows: Vec<AggregationRow>,
    pub overall: OverallMetrics,
}

/// Half-open submission window `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: Option<NaiveDateTime>,
    pub end: Option<NaiveDateTime>,
}

impl TimeRange {
    pub fn unbounded() -> Self {
        Self {
            start: None,
            end: None,
        }
    }

    pub fn is_unbounded(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }

    pub fn contains(&self, at: NaiveDateTime) -> bool {
        self.start.map_or(true, |start| at >= start) && self.end.map_or(true, |end| at < end)
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.start, self.end) {
            (None, None) => write!(f, "all submissions"),
            (Some(start), None) => write!(f, "submissions since {start}"),
            (None, Some(end)) => write!(f, "submissions before {end}"),
            (Some(start), Some(end)) => write!(f, "submissions from {start} to {end}"),
        }
    }
}
