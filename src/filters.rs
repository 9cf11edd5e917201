use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::models::{Dimension, ParticipationRecord};

/// Caller-chosen values per dimension. An absent or empty set selects everything.
pub type Selections = BTreeMap<Dimension, BTreeSet<String>>;

/// A step is only offered once an earlier step's selection contains `value`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Activation {
    pub dimension: Dimension,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterStep {
    pub dimension: Dimension,
    #[serde(default)]
    pub when: Option<Activation>,
}

impl FilterStep {
    pub fn always(dimension: Dimension) -> Self {
        Self {
            dimension,
            when: None,
        }
    }

    pub fn when(dimension: Dimension, trigger: Dimension, value: impl Into<String>) -> Self {
        Self {
            dimension,
            when: Some(Activation {
                dimension: trigger,
                value: value.into(),
            }),
        }
    }
}

/// Restriction seeded from the caller's organizational scope. Always active
/// and applied ahead of the declared steps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    pub dimension: Dimension,
    pub values: BTreeSet<String>,
}

impl Scope {
    /// A `unit` scope also admits records whose group matches, so scoping to
    /// an overridden group keeps the employees reported under its subunits.
    pub fn admits(&self, record: &ParticipationRecord) -> bool {
        self.values.is_empty()
            || self.values.contains(record.value(self.dimension))
            || (self.dimension == Dimension::Unit
                && self.values.contains(record.value(Dimension::Group)))
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterOutcome {
    pub records: Vec<ParticipationRecord>,
    /// Steps whose selection narrowed the set.
    pub applied: Vec<Dimension>,
    /// Selections that were supplied but not used.
    pub ignored: Vec<Dimension>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OfferedStep {
    pub dimension: Dimension,
    pub options: Vec<String>,
    pub selected: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterPipeline {
    steps: Vec<FilterStep>,
}

impl FilterPipeline {
    /// Steps run in declared order, so a predicate may only look at a
    /// dimension filtered by an earlier step.
    pub fn new(steps: Vec<FilterStep>) -> Result<Self> {
        let mut seen = BTreeSet::new();
        for step in &steps {
            if let Some(activation) = &step.when {
                if !seen.contains(&activation.dimension) {
                    return Err(Error::InvalidFilterPlan(format!(
                        "step {} depends on {} which is not an earlier step",
                        step.dimension, activation.dimension
                    )));
                }
            }
            if !seen.insert(step.dimension) {
                return Err(Error::InvalidFilterPlan(format!(
                    "dimension {} appears in more than one step",
                    step.dimension
                )));
            }
        }
        Ok(Self { steps })
    }

    pub fn steps(&self) -> &[FilterStep] {
        &self.steps
    }

    /// Steps whose activation predicate holds, evaluated against the
    /// selections of earlier active steps.
    pub fn active_steps<'a>(&'a self, selections: &'a Selections) -> Vec<&'a FilterStep> {
        let mut effective: BTreeMap<Dimension, &BTreeSet<String>> = BTreeMap::new();
        let mut active = Vec::new();
        for step in &self.steps {
            let enabled = match &step.when {
                None => true,
                Some(activation) => effective
                    .get(&activation.dimension)
                    .is_some_and(|chosen| chosen.contains(&activation.value)),
            };
            if !enabled {
                continue;
            }
            if let Some(chosen) = selections.get(&step.dimension) {
                effective.insert(step.dimension, chosen);
            }
            active.push(step);
        }
        active
    }

    pub fn apply(
        &self,
        mut records: Vec<ParticipationRecord>,
        selections: &Selections,
        scope: Option<&Scope>,
    ) -> FilterOutcome {
        let mut applied = Vec::new();

        if let Some(scope) = scope {
            if !scope.values.is_empty() {
                records.retain(|record| scope.admits(record));
                debug!(dimension = %scope.dimension, remaining = records.len(), "scope restriction applied");
            }
        }

        let active = self.active_steps(selections);
        for step in &active {
            let Some(chosen) = selections.get(&step.dimension) else {
                continue;
            };
            if chosen.is_empty() {
                continue;
            }
            records.retain(|record| chosen.contains(record.value(step.dimension)));
            applied.push(step.dimension);
            debug!(dimension = %step.dimension, remaining = records.len(), "filter step applied");
        }

        let ignored: Vec<Dimension> = selections
            .iter()
            .filter(|(dimension, chosen)| {
                !chosen.is_empty() && !active.iter().any(|step| step.dimension == **dimension)
            })
            .map(|(dimension, _)| *dimension)
            .collect();
        for dimension in &ignored {
            warn!(%dimension, "selection ignored: no active filter step for this dimension");
        }

        FilterOutcome {
            records,
            applied,
            ignored,
        }
    }

    /// Active steps with the distinct values available at that point of the
    /// cascade, for whatever presents the choices to a user.
    pub fn offered(
        &self,
        records: &[ParticipationRecord],
        selections: &Selections,
        scope: Option<&Scope>,
    ) -> Vec<OfferedStep> {
        let mut working: Vec<&ParticipationRecord> = records
            .iter()
            .filter(|record| scope.map_or(true, |scope| scope.admits(record)))
            .collect();

        let mut offered = Vec::new();
        for step in self.active_steps(selections) {
            let options: BTreeSet<&str> = working
                .iter()
                .map(|record| record.value(step.dimension))
                .collect();
            let chosen = selections.get(&step.dimension);
            offered.push(OfferedStep {
                dimension: step.dimension,
                options: options.into_iter().map(str::to_string).collect(),
                selected: chosen
                    .map(|values| values.iter().cloned().collect())
                    .unwrap_or_default(),
            });
            if let Some(chosen) = chosen.filter(|values| !values.is_empty()) {
                working.retain(|record| chosen.contains(record.value(step.dimension)));
            }
        }
        offered
    }
}

#[cfg(test)]
pub fn select(dimension: Dimension, values: &[&str]) -> Selections {
    let mut selections = Selections::new();
    selections.insert(
        dimension,
        values.iter().map(|value| value.to_string()).collect(),
    );
    selections
}
