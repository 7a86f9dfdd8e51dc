use std::collections::BTreeSet;

use qti_core::{
    BaseType, DeclarationContext, LookupTable, Mapping, QtiValue, Scalar, VariableDeclaration,
};

use crate::geometry::point_in_shape;

/// mapResponse / mapOutcome: sum the mapped value of each distinct
/// response key, defaulting unmapped keys, then clamp to the declared
/// bounds. A Null response scores the mapping default.
pub(crate) fn eval_map_value(ctx: &DeclarationContext, identifier: &str) -> QtiValue {
    let Some(declaration) = ctx.get_declaration(identifier) else {
        return QtiValue::invalid(format!("no declaration for \"{}\"", identifier));
    };
    let Some(mapping) = &declaration.mapping else {
        return QtiValue::invalid(format!("no mapping declared for \"{}\"", identifier));
    };

    match &declaration.value {
        QtiValue::Invalid { reason } => QtiValue::invalid(reason.clone()),
        QtiValue::Null => QtiValue::float(mapping.clamp(mapping.default_value)),
        value => {
            let Some(scalars) = value.scalars() else {
                return QtiValue::invalid("mapResponse applied to a record response");
            };
            let mut seen = BTreeSet::new();
            let mut total = 0.0;
            for scalar in &scalars {
                let key = scalar.key();
                if !seen.insert(key.clone()) {
                    continue;
                }
                total += mapped_value_for_key(mapping, declaration.base_type, &key);
            }
            QtiValue::float(mapping.clamp(total))
        }
    }
}

/// Entry keys normalize through the declared base type so that a pair
/// mapKey "B A" matches a response value "A B".
fn mapped_value_for_key(mapping: &Mapping, base_type: Option<BaseType>, key: &str) -> f64 {
    for entry in &mapping.entries {
        let entry_key = normalize_map_key(&entry.map_key, base_type);
        let matched = if entry.case_sensitive {
            entry_key == key
        } else {
            entry_key.to_lowercase() == key.to_lowercase()
        };
        if matched {
            return entry.mapped_value;
        }
    }
    mapping.default_value
}

fn normalize_map_key(raw: &str, base_type: Option<BaseType>) -> String {
    base_type
        .and_then(|base_type| Scalar::parse(base_type, raw))
        .map(|scalar| scalar.key())
        .unwrap_or_else(|| raw.trim().to_string())
}

/// mapResponsePoint: each distinct response point scores its first
/// matching area entry, unmatched points score the default, the sum
/// clamps to the declared bounds. A point that does not parse as two
/// finite numbers makes the whole evaluation Null.
pub(crate) fn eval_map_response_point(ctx: &DeclarationContext, identifier: &str) -> QtiValue {
    let Some(declaration) = ctx.get_declaration(identifier) else {
        return QtiValue::invalid(format!("no declaration for \"{}\"", identifier));
    };
    let Some(area_mapping) = &declaration.area_mapping else {
        return QtiValue::invalid(format!("no areaMapping declared for \"{}\"", identifier));
    };

    match &declaration.value {
        QtiValue::Invalid { reason } => QtiValue::invalid(reason.clone()),
        QtiValue::Null => QtiValue::float(area_mapping.clamp(area_mapping.default_value)),
        value => {
            let Some(scalars) = value.scalars() else {
                return QtiValue::invalid("mapResponsePoint applied to a record response");
            };
            let mut seen = BTreeSet::new();
            let mut total = 0.0;
            for scalar in &scalars {
                let Some(point) = scalar.as_point() else {
                    return QtiValue::Null;
                };
                if !seen.insert(scalar.key()) {
                    continue;
                }
                let mapped = area_mapping
                    .entries
                    .iter()
                    .find(|entry| point_in_shape(entry.shape, &entry.coords, point))
                    .map(|entry| entry.mapped_value)
                    .unwrap_or(area_mapping.default_value);
                total += mapped;
            }
            QtiValue::float(area_mapping.clamp(total))
        }
    }
}

/// Table lookup shared by the `lookupTable` expression and the
/// `lookupOutcomeValue` statement.
pub(crate) fn lookup_in_table(table: &LookupTable, source: &QtiValue) -> QtiValue {
    match source {
        QtiValue::Invalid { reason } => return QtiValue::invalid(reason.clone()),
        QtiValue::Null => return QtiValue::Null,
        _ => {}
    }

    match table {
        LookupTable::Match(table) => {
            let QtiValue::Single { value, .. } = source else {
                return QtiValue::invalid("lookup table requires a single-cardinality source");
            };
            let numeric = value.as_f64();
            for entry in &table.entries {
                let hit = match (numeric, entry.source.as_f64()) {
                    (Some(a), Some(b)) => a == b,
                    _ => entry.source.key() == value.key(),
                };
                if hit {
                    return QtiValue::single(entry.target.clone());
                }
            }
            table
                .default_value
                .clone()
                .map(QtiValue::single)
                .unwrap_or(QtiValue::Null)
        }
        LookupTable::Interpolation(table) => {
            if table.method != "linear" {
                return QtiValue::invalid(format!(
                    "unsupported interpolation method \"{}\"",
                    table.method
                ));
            }
            let Some(source) = source.as_f64() else {
                return QtiValue::invalid("interpolation table requires a numeric source");
            };
            let entries = &table.entries;
            if entries.is_empty() {
                return table
                    .default_value
                    .clone()
                    .map(QtiValue::single)
                    .unwrap_or(QtiValue::Null);
            }
            // Clamp outside the breakpoint range.
            if source <= entries[0].source_value {
                return QtiValue::float(entries[0].target_value);
            }
            if source >= entries[entries.len() - 1].source_value {
                return QtiValue::float(entries[entries.len() - 1].target_value);
            }
            for window in entries.windows(2) {
                let (lo, hi) = (&window[0], &window[1]);
                if source >= lo.source_value && source <= hi.source_value {
                    let span = hi.source_value - lo.source_value;
                    if span == 0.0 {
                        return QtiValue::float(lo.target_value);
                    }
                    let t = (source - lo.source_value) / span;
                    return QtiValue::float(
                        lo.target_value + t * (hi.target_value - lo.target_value),
                    );
                }
            }
            QtiValue::Null
        }
    }
}

pub(crate) fn lookup_declared_table(
    declaration: Option<&VariableDeclaration>,
    source: &QtiValue,
    identifier: &str,
) -> QtiValue {
    match declaration.and_then(|declaration| declaration.lookup_table.as_ref()) {
        Some(table) => lookup_in_table(table, source),
        None => QtiValue::invalid(format!("no lookup table declared for \"{}\"", identifier)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qti_core::{
        Cardinality, DeclarationKind, InterpolationEntry, InterpolationTable, MapEntry,
        MatchTable, MatchTableEntry,
    };

    fn pair_mapping_declaration() -> VariableDeclaration {
        let mut declaration = VariableDeclaration::new(
            "RESPONSE",
            DeclarationKind::Response,
            Some(BaseType::Pair),
            Cardinality::Multiple,
        );
        declaration.mapping = Some(Mapping {
            default_value: 0.0,
            lower_bound: Some(0.0),
            upper_bound: Some(2.0),
            entries: vec![
                MapEntry {
                    map_key: "B A".to_string(),
                    mapped_value: 1.0,
                    case_sensitive: true,
                },
                MapEntry {
                    map_key: "C D".to_string(),
                    mapped_value: 1.5,
                    case_sensitive: true,
                },
            ],
        });
        declaration
    }

    #[test]
    fn map_response_normalizes_pair_keys_and_clamps() {
        let mut ctx = DeclarationContext::new();
        ctx.declare(pair_mapping_declaration());
        ctx.set_value(
            "RESPONSE",
            QtiValue::container(
                BaseType::Pair,
                Cardinality::Multiple,
                vec![
                    Scalar::Pair("A".to_string(), "B".to_string()),
                    Scalar::Pair("D".to_string(), "C".to_string()),
                ],
            ),
        );
        // 1.0 + 1.5 clamped to the 2.0 upper bound.
        assert_eq!(eval_map_value(&ctx, "RESPONSE"), QtiValue::float(2.0));
    }

    #[test]
    fn map_response_counts_duplicate_values_once() {
        let mut ctx = DeclarationContext::new();
        ctx.declare(pair_mapping_declaration());
        ctx.set_value(
            "RESPONSE",
            QtiValue::container(
                BaseType::Pair,
                Cardinality::Multiple,
                vec![
                    Scalar::Pair("A".to_string(), "B".to_string()),
                    Scalar::Pair("B".to_string(), "A".to_string()),
                ],
            ),
        );
        assert_eq!(eval_map_value(&ctx, "RESPONSE"), QtiValue::float(1.0));
    }

    #[test]
    fn map_response_null_scores_the_clamped_default() {
        let mut ctx = DeclarationContext::new();
        let mut declaration = pair_mapping_declaration();
        if let Some(mapping) = declaration.mapping.as_mut() {
            mapping.default_value = -1.0;
        }
        ctx.declare(declaration);
        assert_eq!(eval_map_value(&ctx, "RESPONSE"), QtiValue::float(0.0));
    }

    #[test]
    fn map_response_without_mapping_is_invalid() {
        let mut ctx = DeclarationContext::new();
        ctx.declare(VariableDeclaration::new(
            "RESPONSE",
            DeclarationKind::Response,
            Some(BaseType::String),
            Cardinality::Single,
        ));
        assert!(eval_map_value(&ctx, "RESPONSE").is_invalid());
    }

    #[test]
    fn interpolation_clamps_outside_range_and_interpolates_inside() {
        let table = LookupTable::Interpolation(InterpolationTable {
            method: "linear".to_string(),
            default_value: None,
            entries: vec![
                InterpolationEntry {
                    source_value: 0.0,
                    target_value: 0.0,
                },
                InterpolationEntry {
                    source_value: 100.0,
                    target_value: 10.0,
                },
            ],
        });
        assert_eq!(
            lookup_in_table(&table, &QtiValue::float(150.0)),
            QtiValue::float(10.0)
        );
        assert_eq!(
            lookup_in_table(&table, &QtiValue::float(-3.0)),
            QtiValue::float(0.0)
        );
        assert_eq!(
            lookup_in_table(&table, &QtiValue::float(50.0)),
            QtiValue::float(5.0)
        );
        assert!(lookup_in_table(&table, &QtiValue::Null).is_null());
        assert!(lookup_in_table(&table, &QtiValue::string("x")).is_invalid());
    }

    #[test]
    fn non_linear_interpolation_method_is_invalid() {
        let table = LookupTable::Interpolation(InterpolationTable {
            method: "spline".to_string(),
            default_value: None,
            entries: Vec::new(),
        });
        assert!(lookup_in_table(&table, &QtiValue::float(1.0)).is_invalid());
    }

    #[test]
    fn match_table_looks_up_numerically_then_falls_back_to_default() {
        let table = LookupTable::Match(MatchTable {
            default_value: Some(Scalar::Identifier("F".to_string())),
            entries: vec![MatchTableEntry {
                source: Scalar::Int(1),
                target: Scalar::Identifier("A".to_string()),
            }],
        });
        assert_eq!(
            lookup_in_table(&table, &QtiValue::float(1.0)),
            QtiValue::identifier("A")
        );
        assert_eq!(
            lookup_in_table(&table, &QtiValue::integer(2)),
            QtiValue::identifier("F")
        );
    }
}
