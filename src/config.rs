//! Declarative report configuration: fallback precedence, label
//! abbreviations, override rules, the filter cascade and the column layout
//! of the file sources.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Error, Result};
use crate::filters::{Activation, FilterPipeline, FilterStep};
use crate::labels::{Abbreviation, LabelResolver, OverrideRule};
use crate::models::{Dimension, Field};
use crate::reconcile::{FallbackPolicy, SourceRef, DEFAULT_PLACEHOLDER};
use crate::sources::{RosterColumns, SurveyColumns};

pub const CONFIG_ENV_VAR: &str = "PARTICIPATION_CONFIG";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReportConfig {
    pub placeholder: String,
    pub fallback: BTreeMap<Field, Vec<SourceRef>>,
    pub abbreviations: Vec<Abbreviation>,
    pub overrides: Vec<OverrideRule>,
    pub filters: Vec<FilterStep>,
    pub survey_columns: SurveyColumns,
    pub roster_columns: RosterColumns,
}

impl Default for ReportConfig {
    fn default() -> Self {
        let roster = SourceRef::Roster;
        let survey = |column: &str| SourceRef::Survey(column.to_string());

        let mut fallback = BTreeMap::new();
        fallback.insert(Field::Name, vec![roster(Field::Name), survey("name")]);
        fallback.insert(Field::Unit, vec![roster(Field::Unit), survey("unit_name")]);
        fallback.insert(
            Field::Division,
            vec![roster(Field::Division), survey("div_name")],
        );
        fallback.insert(
            Field::Department,
            vec![roster(Field::Department), survey("dept_name")],
        );

        Self {
            placeholder: DEFAULT_PLACEHOLDER.to_string(),
            fallback,
            abbreviations: vec![
                Abbreviation {
                    from: "GROUP OF ".to_string(),
                    to: "G. ".to_string(),
                },
                Abbreviation {
                    from: "CORPORATE".to_string(),
                    to: "C.".to_string(),
                },
            ],
            overrides: vec![OverrideRule {
                trigger_unit: "G. MEDIA".to_string(),
                source_field: Field::Subunit,
            }],
            filters: vec![
                FilterStep::always(Dimension::Unit),
                FilterStep::when(Dimension::AdminTag, Dimension::Unit, "G. MANUFACTURE"),
                FilterStep::always(Dimension::Division),
                FilterStep::always(Dimension::Department),
            ],
            survey_columns: SurveyColumns::default(),
            roster_columns: RosterColumns::default(),
        }
    }
}

impl ReportConfig {
    /// Resolution order: explicit path, then `PARTICIPATION_CONFIG`, then
    /// the compiled default.
    pub fn resolve(cli_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = cli_path {
            return Self::from_path(path);
        }
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            if !path.trim().is_empty() {
                return Self::from_path(&PathBuf::from(path));
            }
        }
        info!("using built-in report configuration");
        let config = Self::default();
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        let config = Self::from_toml(&content)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        info!(path = %path.display(), "loaded report configuration");
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.fallback_policy()?;
        self.filter_pipeline()?;
        if self.placeholder.trim().is_empty() {
            return Err(Error::Config("placeholder must not be blank".to_string()));
        }
        Ok(())
    }

    pub fn fallback_policy(&self) -> Result<FallbackPolicy> {
        FallbackPolicy::new(self.placeholder.clone(), self.fallback.clone())
    }

    pub fn label_resolver(&self) -> LabelResolver {
        LabelResolver::new(
            self.abbreviations.clone(),
            self.overrides.clone(),
            self.placeholder.clone(),
        )
    }

    /// Activation values on organizational dimensions are canonicalized so
    /// they compare equal to resolved labels.
    pub fn filter_pipeline(&self) -> Result<FilterPipeline> {
        let resolver = self.label_resolver();
        let steps = self
            .filters
            .iter()
            .map(|step| FilterStep {
                dimension: step.dimension,
                when: step.when.as_ref().map(|activation| Activation {
                    dimension: activation.dimension,
                    value: canonical_selection(&resolver, activation.dimension, &activation.value),
                }),
            })
            .collect();
        FilterPipeline::new(steps)
    }
}

/// Canonicalizes a user-supplied value for comparison on `dimension`.
pub fn canonical_selection(resolver: &LabelResolver, dimension: Dimension, value: &str) -> String {
    match dimension {
        Dimension::Unit
        | Dimension::Group
        | Dimension::Subunit
        | Dimension::Division
        | Dimension::Department => resolver.canonicalize(value),
        Dimension::Position | Dimension::AdminTag => value.trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = ReportConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.filter_pipeline().map(|p| p.steps().len()).ok(), Some(4));
    }

    #[test]
    fn parses_declarative_tables() {
        let config = ReportConfig::from_toml(
            r#"
            placeholder = "n/a"

            [fallback]
            name = ["survey.name", "roster.name"]
            unit = ["roster.unit"]

            [[abbreviations]]
            from = "Group of "
            to = "G. "

            [[overrides]]
            trigger_unit = "GROUP OF MEDIA"
            source_field = "subunit"

            [[overrides]]
            trigger_unit = "GROUP OF RETAIL"
            source_field = "division"

            [[filters]]
            dimension = "group"

            [[filters]]
            dimension = "subunit"
            when = { dimension = "group", value = "group of media" }
            "#,
        )
        .expect("valid config");

        assert_eq!(config.placeholder, "n/a");
        assert_eq!(
            config.fallback.get(&Field::Name),
            Some(&vec![
                SourceRef::Survey("name".to_string()),
                SourceRef::Roster(Field::Name)
            ])
        );
        assert_eq!(config.overrides.len(), 2);
        assert_eq!(config.survey_columns, SurveyColumns::default());

        let pipeline = config.filter_pipeline().expect("valid pipeline");
        let activation = pipeline.steps()[1].when.as_ref().expect("conditional step");
        assert_eq!(activation.value, "G. MEDIA");

        let resolver = config.label_resolver();
        let fields = crate::models::OrgFields {
            unit: resolver.canonicalize("Group of Media"),
            subunit: "RADIO".to_string(),
            ..Default::default()
        };
        assert_eq!(resolver.reporting_unit(&fields), "RADIO");
    }

    #[test]
    fn rejects_bad_source_refs_and_unknown_keys() {
        let bad_source = ReportConfig::from_toml("[fallback]\nname = [\"hr.name\"]\n");
        assert!(matches!(bad_source, Err(Error::Config(_))));

        let unknown = ReportConfig::from_toml("colour = \"blue\"\n");
        assert!(matches!(unknown, Err(Error::Config(_))));
    }

    #[test]
    fn rejects_forward_referencing_filters() {
        let result = ReportConfig::from_toml(
            r#"
            [[filters]]
            dimension = "admin_tag"
            when = { dimension = "unit", value = "G. MANUFACTURE" }

            [[filters]]
            dimension = "unit"
            "#,
        );
        assert!(matches!(result, Err(Error::InvalidFilterPlan(_))));
    }

    #[test]
    fn explicit_path_wins() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "placeholder = \"?\"").expect("write config");
        let config = ReportConfig::resolve(Some(file.path())).expect("config loads");
        assert_eq!(config.placeholder, "?");
        assert_eq!(config.filters, ReportConfig::default().filters);
    }

    #[test]
    fn selections_are_canonicalized_per_dimension() {
        let resolver = ReportConfig::default().label_resolver();
        assert_eq!(
            canonical_selection(&resolver, Dimension::Unit, "group of manufacture"),
            "G. MANUFACTURE"
        );
        assert_eq!(
            canonical_selection(&resolver, Dimension::AdminTag, " Admin A "),
            "Admin A"
        );
    }
}
