use serde::{Deserialize, Serialize};

use crate::models::{Field, OrgFields, ParticipationRecord, ReconciledRecord};

/// Literal substring replacement applied to uppercased labels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Abbreviation {
    pub from: String,
    pub to: String,
}

/// Takes the reporting unit from `source_field` whenever the canonical unit
/// equals `trigger_unit`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideRule {
    pub trigger_unit: String,
    pub source_field: Field,
}

const ORG_FIELDS: [Field; 4] = [Field::Unit, Field::Subunit, Field::Division, Field::Department];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelResolver {
    abbreviations: Vec<Abbreviation>,
    overrides: Vec<OverrideRule>,
    placeholder: String,
}

impl LabelResolver {
    pub fn new(
        abbreviations: Vec<Abbreviation>,
        overrides: Vec<OverrideRule>,
        placeholder: impl Into<String>,
    ) -> Self {
        let abbreviations: Vec<Abbreviation> = abbreviations
            .into_iter()
            .map(|rule| Abbreviation {
                from: rule.from.to_uppercase(),
                to: rule.to.to_uppercase(),
            })
            .filter(|rule| !rule.from.is_empty())
            .collect();
        let mut resolver = Self {
            abbreviations,
            overrides: Vec::new(),
            placeholder: placeholder.into(),
        };
        // Triggers go through the same canonicalization so either spelling matches.
        resolver.overrides = overrides
            .into_iter()
            .map(|rule| OverrideRule {
                trigger_unit: resolver.canonicalize(&rule.trigger_unit),
                source_field: rule.source_field,
            })
            .collect();
        resolver
    }

    /// Uppercase, trim, substitute abbreviations in order, trim again.
    /// Labels no rule covers pass through in their uppercased form.
    pub fn canonicalize(&self, label: &str) -> String {
        let mut value = label.trim().to_uppercase();
        for rule in &self.abbreviations {
            if value.contains(&rule.from) {
                value = value.replace(&rule.from, &rule.to);
            }
        }
        value.trim().to_string()
    }

    fn canonical_fields(&self, fields: &OrgFields) -> OrgFields {
        let mut canonical = fields.clone();
        for field in ORG_FIELDS {
            let value = fields.get(field);
            if value != self.placeholder {
                canonical.set(field, self.canonicalize(value));
            }
        }
        canonical
    }

    /// First matching override wins; a rule whose source field is missing
    /// leaves the unit untouched.
    pub fn reporting_unit(&self, fields: &OrgFields) -> String {
        self.overrides
            .iter()
            .filter(|rule| rule.trigger_unit == fields.unit)
            .map(|rule| fields.get(rule.source_field))
            .find(|value| *value != self.placeholder)
            .unwrap_or(fields.unit.as_str())
            .to_string()
    }

    pub fn resolve(&self, record: ReconciledRecord) -> ParticipationRecord {
        let fields = self.canonical_fields(&record.fields);
        let reporting_unit = self.reporting_unit(&fields);
        ParticipationRecord {
            status: record.status(),
            membership: record.membership,
            id: record.id,
            reporting_unit,
            fields,
        }
    }

    pub fn resolve_all(&self, records: Vec<ReconciledRecord>) -> Vec<ParticipationRecord> {
        records.into_iter().map(|record| self.resolve(record)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Membership, Status};

    fn resolver() -> LabelResolver {
        LabelResolver::new(
            vec![
                Abbreviation {
                    from: "GROUP OF ".into(),
                    to: "G. ".into(),
                },
                Abbreviation {
                    from: "CORPORATE".into(),
                    to: "C.".into(),
                },
            ],
            vec![OverrideRule {
                trigger_unit: "GROUP OF MEDIA".into(),
                source_field: Field::Subunit,
            }],
            "-",
        )
    }

    fn record(unit: &str, subunit: &str) -> ReconciledRecord {
        ReconciledRecord {
            id: "000003".into(),
            membership: Membership::RosterOnly,
            fields: OrgFields {
                name: "Citra".into(),
                unit: unit.into(),
                subunit: subunit.into(),
                division: "  production ".into(),
                department: "-".into(),
                position: "Operator".into(),
                admin_tag: "-".into(),
            },
        }
    }

    #[test]
    fn abbreviates_group_and_corporate_prefixes() {
        let resolver = resolver();
        assert_eq!(resolver.canonicalize("GROUP OF MANUFACTURE"), "G. MANUFACTURE");
        assert_eq!(resolver.canonicalize(" group of media "), "G. MEDIA");
        assert_eq!(resolver.canonicalize("CORPORATE FINANCE"), "C. FINANCE");
        assert_eq!(resolver.canonicalize("CORPORATE"), "C.");
    }

    #[test]
    fn unmapped_labels_pass_through() {
        assert_eq!(resolver().canonicalize("Logistics Hub"), "LOGISTICS HUB");
        assert_eq!(resolver().canonicalize(""), "");
    }

    #[test]
    fn resolves_org_fields_and_status() {
        let resolved = resolver().resolve(record("GROUP OF MANUFACTURE", "plant a"));
        assert_eq!(resolved.status, Status::NotDone);
        assert_eq!(resolved.reporting_unit, "G. MANUFACTURE");
        assert_eq!(resolved.fields.unit, "G. MANUFACTURE");
        assert_eq!(resolved.fields.subunit, "PLANT A");
        assert_eq!(resolved.fields.division, "PRODUCTION");
        assert_eq!(resolved.fields.department, "-");
        assert_eq!(resolved.fields.position, "Operator");
    }

    #[test]
    fn override_takes_reporting_unit_from_subunit() {
        let resolved = resolver().resolve(record("GROUP OF MEDIA", "tv network"));
        assert_eq!(resolved.reporting_unit, "TV NETWORK");
        assert_eq!(resolved.fields.unit, "G. MEDIA");
    }

    #[test]
    fn override_with_missing_source_keeps_unit() {
        let resolved = resolver().resolve(record("G. MEDIA", "-"));
        assert_eq!(resolved.reporting_unit, "G. MEDIA");
    }

    #[test]
    fn override_rules_accumulate() {
        let resolver = LabelResolver::new(
            Vec::new(),
            vec![
                OverrideRule {
                    trigger_unit: "HOLDING".into(),
                    source_field: Field::Division,
                },
                OverrideRule {
                    trigger_unit: "MEDIA".into(),
                    source_field: Field::Subunit,
                },
            ],
            "-",
        );
        assert_eq!(
            resolver.resolve(record("holding", "x")).reporting_unit,
            "PRODUCTION"
        );
        assert_eq!(resolver.resolve(record("media", "radio")).reporting_unit, "RADIO");
        assert_eq!(resolver.resolve(record("retail", "y")).reporting_unit, "RETAIL");
    }
}
