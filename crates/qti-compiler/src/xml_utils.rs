use qti_core::{NumericArg, QtiError, Shape};
use qti_parser::XmlElementNode;

pub(crate) fn get_optional_attr(node: &XmlElementNode, name: &str) -> Option<String> {
    node.attr(name).map(str::to_string)
}

pub(crate) fn get_required_attr(node: &XmlElementNode, name: &str) -> Result<String, QtiError> {
    let Some(raw) = node.attr(name) else {
        return Err(QtiError::with_span(
            "AST_MISSING_ATTR",
            format!("Missing required attribute \"{}\" on <{}>.", name, node.name),
            node.location.clone(),
        ));
    };
    if raw.trim().is_empty() {
        return Err(QtiError::with_span(
            "AST_MISSING_ATTR",
            format!("Attribute \"{}\" on <{}> cannot be empty.", name, node.name),
            node.location.clone(),
        ));
    }
    Ok(raw.to_string())
}

pub(crate) fn attr_invalid(node: &XmlElementNode, name: &str, raw: &str) -> QtiError {
    QtiError::with_span(
        "AST_ATTR_INVALID",
        format!(
            "Attribute \"{}\" on <{}> has invalid value \"{}\".",
            name, node.name, raw
        ),
        node.location.clone(),
    )
}

pub(crate) fn parse_bool_attr(
    node: &XmlElementNode,
    name: &str,
    default: bool,
) -> Result<bool, QtiError> {
    let Some(raw) = node.attr(name) else {
        return Ok(default);
    };
    match raw.trim() {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(attr_invalid(node, name, other)),
    }
}

pub(crate) fn parse_f64_attr(node: &XmlElementNode, name: &str) -> Result<Option<f64>, QtiError> {
    let Some(raw) = node.attr(name) else {
        return Ok(None);
    };
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
        .map(Some)
        .ok_or_else(|| attr_invalid(node, name, raw))
}

pub(crate) fn parse_f64_attr_required(node: &XmlElementNode, name: &str) -> Result<f64, QtiError> {
    let raw = get_required_attr(node, name)?;
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
        .ok_or_else(|| attr_invalid(node, name, &raw))
}

/// Literal-or-variable coercion: a finite numeric literal parses as a
/// literal, anything else is read as a variable identifier reference.
pub(crate) fn numeric_arg(raw: &str) -> NumericArg {
    match raw.trim().parse::<f64>() {
        Ok(value) if value.is_finite() => NumericArg::Literal(value),
        _ => NumericArg::Variable(raw.trim().to_string()),
    }
}

pub(crate) fn numeric_arg_attr(node: &XmlElementNode, name: &str) -> Option<NumericArg> {
    node.attr(name).map(numeric_arg)
}

pub(crate) fn numeric_arg_attr_required(
    node: &XmlElementNode,
    name: &str,
) -> Result<NumericArg, QtiError> {
    let raw = get_required_attr(node, name)?;
    Ok(numeric_arg(&raw))
}

pub(crate) fn split_list_attr(node: &XmlElementNode, name: &str) -> Vec<String> {
    node.attr(name)
        .map(|raw| {
            raw.split_whitespace()
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .unwrap_or_default()
}

pub(crate) fn parse_coords_attr(node: &XmlElementNode, name: &str) -> Result<Vec<f64>, QtiError> {
    let Some(raw) = node.attr(name) else {
        return Ok(Vec::new());
    };
    let mut coords = Vec::new();
    for token in raw.split(|ch: char| ch == ',' || ch.is_whitespace()) {
        if token.is_empty() {
            continue;
        }
        let value = token
            .parse::<f64>()
            .ok()
            .filter(|value| value.is_finite())
            .ok_or_else(|| attr_invalid(node, name, raw))?;
        coords.push(value);
    }
    Ok(coords)
}

pub(crate) fn shape_coords_valid(shape: Shape, coords: &[f64]) -> bool {
    match shape {
        Shape::Default => true,
        Shape::Rect => coords.len() == 4,
        Shape::Circle => coords.len() == 3 && coords[2] >= 0.0,
        Shape::Ellipse => coords.len() == 4 && coords[2] >= 0.0 && coords[3] >= 0.0,
        Shape::Poly => coords.len() >= 6 && coords.len() % 2 == 0,
    }
}

pub(crate) fn get_identifier_attr(node: &XmlElementNode, name: &str) -> Result<String, QtiError> {
    let raw = get_required_attr(node, name)?;
    let identifier_regex = regex::Regex::new(r"^[A-Za-z_][A-Za-z0-9_.-]*$")
        .expect("identifier regex must compile");
    if !identifier_regex.is_match(raw.trim()) {
        return Err(attr_invalid(node, name, &raw));
    }
    Ok(raw.trim().to_string())
}
