use std::collections::BTreeMap;

use qti_core::{
    AreaMapEntry, AreaMapping, BaseType, Cardinality, DeclarationKind, MapEntry, Mapping,
    QtiError, QtiValue, Scalar, Shape, VariableDeclaration,
};
use qti_parser::XmlElementNode;

use crate::tables::parse_lookup_table_element;
use crate::xml_utils::{
    attr_invalid, get_identifier_attr, get_optional_attr, get_required_attr, parse_bool_attr,
    parse_coords_attr, parse_f64_attr, parse_f64_attr_required, shape_coords_valid,
};

/// Builds a variable declaration from a `responseDeclaration`,
/// `outcomeDeclaration`, or `templateDeclaration` element, including its
/// default value, correct response, mapping, area mapping, and lookup
/// table children.
pub fn build_variable_declaration(el: &XmlElementNode) -> Result<VariableDeclaration, QtiError> {
    let kind = match el.name.to_lowercase().as_str() {
        "responsedeclaration" => DeclarationKind::Response,
        "outcomedeclaration" => DeclarationKind::Outcome,
        "templatedeclaration" => DeclarationKind::Template,
        _ => {
            return Err(QtiError::with_span(
                "DECL_UNKNOWN_TAG",
                format!("Unknown declaration tag <{}>.", el.name),
                el.location.clone(),
            ));
        }
    };

    let identifier = get_identifier_attr(el, "identifier")?;
    let cardinality = match get_optional_attr(el, "cardinality") {
        Some(raw) => Cardinality::parse(&raw)
            .ok_or_else(|| attr_invalid(el, "cardinality", &raw))?,
        None => Cardinality::Single,
    };
    let base_type = match get_optional_attr(el, "baseType") {
        Some(raw) => {
            Some(BaseType::parse(&raw).ok_or_else(|| attr_invalid(el, "baseType", &raw))?)
        }
        None => None,
    };

    let mut declaration = VariableDeclaration::new(identifier, kind, base_type, cardinality);

    for child in el.child_elements() {
        match child.name.to_lowercase().as_str() {
            "defaultvalue" => {
                declaration.default_value = parse_declared_value(child, base_type, cardinality)?;
            }
            "correctresponse" => {
                declaration.correct_response =
                    parse_declared_value(child, base_type, cardinality)?;
            }
            "mapping" => declaration.mapping = Some(parse_mapping(child)?),
            "areamapping" => declaration.area_mapping = Some(parse_area_mapping(child)?),
            "lookuptable" => {
                let Some(table_el) = child.first_child_element() else {
                    return Err(QtiError::with_span(
                        "AST_TABLE_UNSUPPORTED",
                        "<lookupTable> requires a matchTable or interpolationTable child.",
                        child.location.clone(),
                    ));
                };
                declaration.lookup_table =
                    Some(parse_lookup_table_element(table_el, base_type)?);
            }
            "matchtable" | "interpolationtable" => {
                declaration.lookup_table = Some(parse_lookup_table_element(child, base_type)?);
            }
            _ => {
                return Err(QtiError::with_span(
                    "DECL_CHILD_INVALID",
                    format!("Unsupported child <{}> under <{}>.", child.name, el.name),
                    child.location.clone(),
                ));
            }
        }
    }

    declaration.value = declaration.default_value.clone();
    Ok(declaration)
}

fn parse_declared_value(
    el: &XmlElementNode,
    base_type: Option<BaseType>,
    cardinality: Cardinality,
) -> Result<QtiValue, QtiError> {
    let value_els = el
        .child_elements()
        .filter(|child| child.name.to_lowercase() == "value")
        .collect::<Vec<_>>();
    if value_els.is_empty() {
        return Ok(QtiValue::Null);
    }

    if cardinality == Cardinality::Record {
        let mut fields = BTreeMap::new();
        for value_el in value_els {
            let field = get_required_attr(value_el, "fieldIdentifier")?;
            let raw_type = get_required_attr(value_el, "baseType")?;
            let field_type = BaseType::parse(&raw_type)
                .ok_or_else(|| attr_invalid(value_el, "baseType", &raw_type))?;
            let scalar = parse_value_payload(value_el, field_type)?;
            fields.insert(field, QtiValue::single(scalar));
        }
        return Ok(QtiValue::Record { fields });
    }

    let Some(base_type) = base_type else {
        return Err(QtiError::with_span(
            "DECL_VALUE_INVALID",
            format!(
                "<{}> values require a declared baseType for non-record cardinality.",
                el.name
            ),
            el.location.clone(),
        ));
    };

    let mut scalars = Vec::new();
    for value_el in value_els {
        scalars.push(parse_value_payload(value_el, base_type)?);
    }

    match cardinality {
        Cardinality::Single => Ok(QtiValue::single(scalars.swap_remove(0))),
        Cardinality::Multiple | Cardinality::Ordered => {
            Ok(QtiValue::container(base_type, cardinality, scalars))
        }
        Cardinality::Record => unreachable!("record handled above"),
    }
}

fn parse_value_payload(el: &XmlElementNode, base_type: BaseType) -> Result<Scalar, QtiError> {
    let raw = el.text.trim();
    Scalar::parse(base_type, raw).ok_or_else(|| {
        QtiError::with_span(
            "DECL_VALUE_INVALID",
            format!(
                "<value> payload \"{}\" does not parse as {}.",
                raw,
                base_type.as_str()
            ),
            el.location.clone(),
        )
    })
}

fn parse_mapping(el: &XmlElementNode) -> Result<Mapping, QtiError> {
    let default_value = parse_f64_attr(el, "defaultValue")?.unwrap_or(0.0);
    let lower_bound = parse_f64_attr(el, "lowerBound")?;
    let upper_bound = parse_f64_attr(el, "upperBound")?;

    let mut entries = Vec::new();
    for child in el.child_elements() {
        if child.name.to_lowercase() != "mapentry" {
            return Err(QtiError::with_span(
                "DECL_CHILD_INVALID",
                format!("Unsupported child <{}> under <mapping>.", child.name),
                child.location.clone(),
            ));
        }
        entries.push(MapEntry {
            map_key: get_required_attr(child, "mapKey")?,
            mapped_value: parse_f64_attr_required(child, "mappedValue")?,
            case_sensitive: parse_bool_attr(child, "caseSensitive", true)?,
        });
    }

    Ok(Mapping {
        default_value,
        lower_bound,
        upper_bound,
        entries,
    })
}

fn parse_area_mapping(el: &XmlElementNode) -> Result<AreaMapping, QtiError> {
    let default_value = parse_f64_attr(el, "defaultValue")?.unwrap_or(0.0);
    let lower_bound = parse_f64_attr(el, "lowerBound")?;
    let upper_bound = parse_f64_attr(el, "upperBound")?;

    let mut entries = Vec::new();
    for child in el.child_elements() {
        if child.name.to_lowercase() != "areamapentry" {
            return Err(QtiError::with_span(
                "DECL_CHILD_INVALID",
                format!("Unsupported child <{}> under <areaMapping>.", child.name),
                child.location.clone(),
            ));
        }
        let raw_shape = get_required_attr(child, "shape")?;
        let shape =
            Shape::parse(&raw_shape).ok_or_else(|| attr_invalid(child, "shape", &raw_shape))?;
        let coords = parse_coords_attr(child, "coords")?;
        if !shape_coords_valid(shape, &coords) {
            return Err(QtiError::with_span(
                "DECL_VALUE_INVALID",
                format!(
                    "<areaMapEntry> coords do not fit shape \"{}\".",
                    raw_shape.trim()
                ),
                child.location.clone(),
            ));
        }
        entries.push(AreaMapEntry {
            shape,
            coords,
            mapped_value: parse_f64_attr_required(child, "mappedValue")?,
        });
    }

    Ok(AreaMapping {
        default_value,
        lower_bound,
        upper_bound,
        entries,
    })
}
