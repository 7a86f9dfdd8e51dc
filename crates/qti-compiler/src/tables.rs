use qti_core::{
    BaseType, InterpolationEntry, InterpolationTable, LookupTable, MatchTable, MatchTableEntry,
    QtiError, Scalar,
};
use qti_parser::XmlElementNode;

use crate::xml_utils::{
    attr_invalid, get_optional_attr, get_required_attr, parse_f64_attr_required,
};

/// Parses a `matchTable` or `interpolationTable` element. Any other tag is
/// an unsupported table shape and fails the build. `target_base_type`
/// types match-table targets when the table hangs off a declaration;
/// expression-form tables infer their target types.
pub fn parse_lookup_table_element(
    el: &XmlElementNode,
    target_base_type: Option<BaseType>,
) -> Result<LookupTable, QtiError> {
    match el.name.to_lowercase().as_str() {
        "matchtable" => Ok(LookupTable::Match(parse_match_table(el, target_base_type)?)),
        "interpolationtable" => Ok(LookupTable::Interpolation(parse_interpolation_table(el)?)),
        _ => Err(QtiError::with_span(
            "AST_TABLE_UNSUPPORTED",
            format!("Unsupported lookup table shape <{}>.", el.name),
            el.location.clone(),
        )),
    }
}

fn parse_match_table(
    el: &XmlElementNode,
    target_base_type: Option<BaseType>,
) -> Result<MatchTable, QtiError> {
    let default_value = match get_optional_attr(el, "defaultValue") {
        Some(raw) => Some(parse_target_scalar(el, "defaultValue", &raw, target_base_type)?),
        None => None,
    };

    let mut entries = Vec::new();
    for child in el.child_elements() {
        if child.name.to_lowercase() != "matchtableentry" {
            return Err(QtiError::with_span(
                "AST_TABLE_UNSUPPORTED",
                format!("Unsupported child <{}> under <matchTable>.", child.name),
                child.location.clone(),
            ));
        }
        let source_raw = get_required_attr(child, "sourceValue")?;
        let target_raw = get_required_attr(child, "targetValue")?;
        entries.push(MatchTableEntry {
            source: infer_scalar(&source_raw),
            target: parse_target_scalar(child, "targetValue", &target_raw, target_base_type)?,
        });
    }

    Ok(MatchTable {
        default_value,
        entries,
    })
}

fn parse_interpolation_table(el: &XmlElementNode) -> Result<InterpolationTable, QtiError> {
    // Non-linear methods build fine and resolve to Invalid at evaluation.
    let method =
        get_optional_attr(el, "interpolationMethod").unwrap_or_else(|| "linear".to_string());
    let default_value = get_optional_attr(el, "defaultValue").map(|raw| infer_scalar(&raw));

    let mut entries = Vec::new();
    for child in el.child_elements() {
        if child.name.to_lowercase() != "interpolationtableentry" {
            return Err(QtiError::with_span(
                "AST_TABLE_UNSUPPORTED",
                format!(
                    "Unsupported child <{}> under <interpolationTable>.",
                    child.name
                ),
                child.location.clone(),
            ));
        }
        entries.push(InterpolationEntry {
            source_value: parse_f64_attr_required(child, "sourceValue")?,
            target_value: parse_f64_attr_required(child, "targetValue")?,
        });
    }
    entries.sort_by(|a, b| {
        a.source_value
            .partial_cmp(&b.source_value)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    Ok(InterpolationTable {
        method,
        default_value,
        entries,
    })
}

fn parse_target_scalar(
    el: &XmlElementNode,
    attr: &str,
    raw: &str,
    base_type: Option<BaseType>,
) -> Result<Scalar, QtiError> {
    match base_type {
        Some(base_type) => {
            Scalar::parse(base_type, raw).ok_or_else(|| attr_invalid(el, attr, raw))
        }
        None => Ok(infer_scalar(raw)),
    }
}

/// Best-effort scalar typing for table values without a declared type:
/// boolean, then integer, then float, then plain string.
fn infer_scalar(raw: &str) -> Scalar {
    let trimmed = raw.trim();
    match trimmed {
        "true" => return Scalar::Bool(true),
        "false" => return Scalar::Bool(false),
        _ => {}
    }
    if let Ok(value) = trimmed.parse::<i64>() {
        return Scalar::Int(value);
    }
    if let Ok(value) = trimmed.parse::<f64>() {
        if value.is_finite() {
            return Scalar::Float(value);
        }
    }
    Scalar::Str(trimmed.to_string())
}
