use qti_core::{
    BaseType, CompareOp, EqualParams, ExprKind, ExpressionNode, MathConst, MathOp, NumericArg,
    ProcessingScope, QtiError, RoundingMode, Scalar, SectionFilter, StatsOp, ToleranceMode,
};
use qti_parser::XmlElementNode;

use crate::tables;
use crate::xml_utils::{
    attr_invalid, get_identifier_attr, get_optional_attr, get_required_attr, numeric_arg_attr,
    numeric_arg_attr_required, parse_bool_attr, parse_coords_attr, shape_coords_valid,
    split_list_attr,
};
use crate::AstBuilder;

impl AstBuilder {
    pub(crate) fn build_expression(
        &mut self,
        el: &XmlElementNode,
    ) -> Result<ExpressionNode, QtiError> {
        let tag = el.name.to_lowercase();
        let kind = match tag.as_str() {
            "basevalue" => self.build_base_value(el)?,
            "variable" => ExprKind::Variable {
                identifier: get_identifier_attr(el, "identifier")?,
                weight_identifier: get_optional_attr(el, "weightIdentifier"),
            },
            "correct" => ExprKind::Correct {
                identifier: get_identifier_attr(el, "identifier")?,
            },
            "default" => ExprKind::Default {
                identifier: get_identifier_attr(el, "identifier")?,
            },
            "null" => ExprKind::Null,
            "randominteger" => self.build_random_integer(el)?,
            "randomfloat" => self.build_random_float(el)?,
            "mathconstant" => {
                let raw = get_required_attr(el, "name")?;
                let constant = match raw.trim() {
                    "pi" => MathConst::Pi,
                    "e" => MathConst::E,
                    other => return Err(attr_invalid(el, "name", other)),
                };
                ExprKind::MathConstant { constant }
            }
            "multiple" => ExprKind::Multiple(self.child_expressions(el, 0)?),
            "ordered" => ExprKind::Ordered(self.child_expressions(el, 0)?),
            "containersize" => ExprKind::ContainerSize(self.single_child(el)?),
            "isnull" => ExprKind::IsNull(self.single_child(el)?),
            "index" => ExprKind::Index {
                n: numeric_arg_attr_required(el, "n")?,
                expr: self.single_child(el)?,
            },
            "fieldvalue" => ExprKind::FieldValue {
                field_identifier: get_required_attr(el, "fieldIdentifier")?,
                expr: self.single_child(el)?,
            },
            "random" => ExprKind::Random(self.single_child(el)?),
            "member" => {
                let (value, container) = self.binary_children(el)?;
                ExprKind::Member { value, container }
            }
            "contains" => {
                let (container, sub) = self.binary_children(el)?;
                ExprKind::Contains { container, sub }
            }
            "delete" => {
                let (value, container) = self.binary_children(el)?;
                ExprKind::Delete { value, container }
            }
            "repeat" => ExprKind::Repeat {
                number_repeats: numeric_arg_attr_required(el, "numberRepeats")?,
                exprs: self.child_expressions(el, 1)?,
            },
            "and" => ExprKind::And(self.child_expressions(el, 1)?),
            "or" => ExprKind::Or(self.child_expressions(el, 1)?),
            "not" => ExprKind::Not(self.single_child(el)?),
            "anyn" => ExprKind::AnyN {
                min: numeric_arg_attr_required(el, "min")?,
                max: numeric_arg_attr_required(el, "max")?,
                exprs: self.child_expressions(el, 1)?,
            },
            "alln" => ExprKind::AllN {
                max: numeric_arg_attr_required(el, "max")?,
                exprs: self.child_expressions(el, 1)?,
            },
            "match" => {
                let (lhs, rhs) = self.binary_children(el)?;
                ExprKind::Match { lhs, rhs }
            }
            "equal" => {
                let params = build_equal_params(el)?;
                let (lhs, rhs) = self.binary_children(el)?;
                ExprKind::Equal { params, lhs, rhs }
            }
            "notequal" => {
                let params = build_equal_params(el)?;
                let (lhs, rhs) = self.binary_children(el)?;
                ExprKind::NotEqual { params, lhs, rhs }
            }
            "equalrounded" => {
                let rounding_mode = build_rounding_mode(el)?;
                let figures = numeric_arg_attr_required(el, "figures")?;
                let (lhs, rhs) = self.binary_children(el)?;
                ExprKind::EqualRounded {
                    rounding_mode,
                    figures,
                    lhs,
                    rhs,
                }
            }
            "stringmatch" => {
                let case_sensitive = parse_bool_attr(el, "caseSensitive", true)?;
                let substring = parse_bool_attr(el, "substring", false)?;
                let (lhs, rhs) = self.binary_children(el)?;
                ExprKind::StringMatch {
                    case_sensitive,
                    substring,
                    lhs,
                    rhs,
                }
            }
            "patternmatch" => {
                let pattern = get_required_attr(el, "pattern")?;
                regex::Regex::new(&format!("^(?:{})$", pattern))
                    .map_err(|_| attr_invalid(el, "pattern", &pattern))?;
                ExprKind::PatternMatch {
                    pattern,
                    expr: self.single_child(el)?,
                }
            }
            "inside" => {
                let raw_shape = get_required_attr(el, "shape")?;
                let shape = qti_core::Shape::parse(&raw_shape)
                    .ok_or_else(|| attr_invalid(el, "shape", &raw_shape))?;
                let coords = parse_coords_attr(el, "coords")?;
                if !shape_coords_valid(shape, &coords) {
                    return Err(attr_invalid(el, "coords", &coords_summary(&coords)));
                }
                ExprKind::Inside {
                    shape,
                    coords,
                    expr: self.single_child(el)?,
                }
            }
            "lt" | "gt" | "lte" | "gte" => {
                let op = match tag.as_str() {
                    "lt" => CompareOp::Lt,
                    "gt" => CompareOp::Gt,
                    "lte" => CompareOp::Lte,
                    _ => CompareOp::Gte,
                };
                let (lhs, rhs) = self.binary_children(el)?;
                ExprKind::Compare { op, lhs, rhs }
            }
            "durationlt" => {
                let (lhs, rhs) = self.binary_children(el)?;
                ExprKind::DurationLt { lhs, rhs }
            }
            "durationgte" => {
                let (lhs, rhs) = self.binary_children(el)?;
                ExprKind::DurationGte { lhs, rhs }
            }
            "sum" => ExprKind::Sum(self.child_expressions(el, 1)?),
            "product" => ExprKind::Product(self.child_expressions(el, 1)?),
            "subtract" => {
                let (lhs, rhs) = self.binary_children(el)?;
                ExprKind::Subtract { lhs, rhs }
            }
            "divide" => {
                let (lhs, rhs) = self.binary_children(el)?;
                ExprKind::Divide { lhs, rhs }
            }
            "power" => {
                let (lhs, rhs) = self.binary_children(el)?;
                ExprKind::Power { lhs, rhs }
            }
            "integerdivide" => {
                let (lhs, rhs) = self.binary_children(el)?;
                ExprKind::IntegerDivide { lhs, rhs }
            }
            "integermodulus" => {
                let (lhs, rhs) = self.binary_children(el)?;
                ExprKind::IntegerModulus { lhs, rhs }
            }
            "truncate" => ExprKind::Truncate(self.single_child(el)?),
            "round" => ExprKind::Round(self.single_child(el)?),
            "roundto" => ExprKind::RoundTo {
                rounding_mode: build_rounding_mode(el)?,
                figures: numeric_arg_attr_required(el, "figures")?,
                expr: self.single_child(el)?,
            },
            "integertofloat" => ExprKind::IntegerToFloat(self.single_child(el)?),
            "min" => ExprKind::Min(self.child_expressions(el, 1)?),
            "max" => ExprKind::Max(self.child_expressions(el, 1)?),
            "gcd" => ExprKind::Gcd(self.child_expressions(el, 1)?),
            "lcm" => ExprKind::Lcm(self.child_expressions(el, 1)?),
            "mathoperator" => {
                let raw = get_required_attr(el, "name")?;
                let name =
                    MathOp::parse(&raw).ok_or_else(|| attr_invalid(el, "name", &raw))?;
                ExprKind::MathOperator {
                    name,
                    exprs: self.child_expressions(el, 1)?,
                }
            }
            "statsoperator" => {
                let raw = get_required_attr(el, "name")?;
                let name =
                    StatsOp::parse(&raw).ok_or_else(|| attr_invalid(el, "name", &raw))?;
                ExprKind::StatsOperator {
                    name,
                    expr: self.single_child(el)?,
                }
            }
            "mean" | "samplevariance" | "samplesd" | "popvariance" | "popsd" => {
                let name = match tag.as_str() {
                    "mean" => StatsOp::Mean,
                    "samplevariance" => StatsOp::SampleVariance,
                    "samplesd" => StatsOp::SampleSd,
                    "popvariance" => StatsOp::PopVariance,
                    _ => StatsOp::PopSd,
                };
                ExprKind::StatsOperator {
                    name,
                    expr: self.single_child(el)?,
                }
            }
            "mapresponse" => ExprKind::MapResponse {
                identifier: get_identifier_attr(el, "identifier")?,
            },
            "mapoutcome" => ExprKind::MapOutcome {
                identifier: get_identifier_attr(el, "identifier")?,
            },
            "mapresponsepoint" => ExprKind::MapResponsePoint {
                identifier: get_identifier_attr(el, "identifier")?,
            },
            "lookuptable" => self.build_lookup_table(el)?,
            "customoperator" => ExprKind::CustomOperator {
                class: get_optional_attr(el, "class"),
                definition: get_optional_attr(el, "definition"),
                exprs: self.child_expressions(el, 0)?,
            },
            "testvariables" => {
                self.require_test_scope(el)?;
                let base_type = match get_optional_attr(el, "baseType") {
                    Some(raw) => Some(
                        BaseType::parse(&raw).ok_or_else(|| attr_invalid(el, "baseType", &raw))?,
                    ),
                    None => None,
                };
                ExprKind::TestVariables {
                    variable_identifier: get_identifier_attr(el, "variableIdentifier")?,
                    base_type,
                    weight_identifier: get_optional_attr(el, "weightIdentifier"),
                    section_identifier: get_optional_attr(el, "sectionIdentifier"),
                    include_categories: split_list_attr(el, "includeCategory"),
                    exclude_categories: split_list_attr(el, "excludeCategory"),
                }
            }
            "outcomeminimum" | "outcomemaximum" => {
                self.require_test_scope(el)?;
                let outcome_identifier = get_identifier_attr(el, "outcomeIdentifier")?;
                let weight_identifier = get_optional_attr(el, "weightIdentifier");
                let section_identifier = get_optional_attr(el, "sectionIdentifier");
                let include_categories = split_list_attr(el, "includeCategory");
                let exclude_categories = split_list_attr(el, "excludeCategory");
                if tag == "outcomeminimum" {
                    ExprKind::OutcomeMinimum {
                        outcome_identifier,
                        weight_identifier,
                        section_identifier,
                        include_categories,
                        exclude_categories,
                    }
                } else {
                    ExprKind::OutcomeMaximum {
                        outcome_identifier,
                        weight_identifier,
                        section_identifier,
                        include_categories,
                        exclude_categories,
                    }
                }
            }
            "numbercorrect" | "numberincorrect" | "numberpresented" | "numberresponded"
            | "numberselected" => {
                self.require_test_scope(el)?;
                let filter = SectionFilter {
                    section_identifier: get_optional_attr(el, "sectionIdentifier"),
                    include_categories: split_list_attr(el, "includeCategory"),
                    exclude_categories: split_list_attr(el, "excludeCategory"),
                };
                match tag.as_str() {
                    "numbercorrect" => ExprKind::NumberCorrect(filter),
                    "numberincorrect" => ExprKind::NumberIncorrect(filter),
                    "numberpresented" => ExprKind::NumberPresented(filter),
                    "numberresponded" => ExprKind::NumberResponded(filter),
                    _ => ExprKind::NumberSelected(filter),
                }
            }
            "include" => {
                return Err(QtiError::with_span(
                    "AST_XINCLUDE_UNSUPPORTED",
                    "xi:include is not supported; inline the processing rules instead.",
                    el.location.clone(),
                ));
            }
            _ => {
                return Err(QtiError::with_span(
                    "AST_UNKNOWN_EXPRESSION",
                    format!("Unknown processing expression tag <{}>.", el.name),
                    el.location.clone(),
                ));
            }
        };

        Ok(ExpressionNode {
            id: self.alloc_id(),
            kind,
        })
    }

    fn require_test_scope(&self, el: &XmlElementNode) -> Result<(), QtiError> {
        if self.scope != ProcessingScope::Test {
            return Err(QtiError::with_span(
                "AST_TEST_SCOPE_REQUIRED",
                format!(
                    "<{}> requires test-level aggregation and is not available in item scope.",
                    el.name
                ),
                el.location.clone(),
            ));
        }
        Ok(())
    }

    fn build_base_value(&mut self, el: &XmlElementNode) -> Result<ExprKind, QtiError> {
        let raw_type = get_required_attr(el, "baseType")?;
        let base_type =
            BaseType::parse(&raw_type).ok_or_else(|| attr_invalid(el, "baseType", &raw_type))?;
        let raw_value = el.text.trim();
        let value = Scalar::parse(base_type, raw_value).ok_or_else(|| {
            QtiError::with_span(
                "AST_VALUE_INVALID",
                format!(
                    "<baseValue> payload \"{}\" does not parse as {}.",
                    raw_value,
                    base_type.as_str()
                ),
                el.location.clone(),
            )
        })?;
        Ok(ExprKind::BaseValue { base_type, value })
    }

    /// Standard attribute form, or the legacy two-child-expression form
    /// where the children supply min and max.
    fn build_random_integer(&mut self, el: &XmlElementNode) -> Result<ExprKind, QtiError> {
        let has_attr_form =
            el.attr("min").is_some() || el.attr("max").is_some() || el.attr("step").is_some();
        if has_attr_form {
            return Ok(ExprKind::RandomInteger {
                min: numeric_arg_attr(el, "min").unwrap_or(NumericArg::Literal(0.0)),
                max: numeric_arg_attr_required(el, "max")?,
                step: numeric_arg_attr(el, "step").unwrap_or(NumericArg::Literal(1.0)),
            });
        }
        let (min, max) = self.binary_children(el)?;
        Ok(ExprKind::RandomInteger {
            min: NumericArg::Expr(min),
            max: NumericArg::Expr(max),
            step: NumericArg::Literal(1.0),
        })
    }

    fn build_random_float(&mut self, el: &XmlElementNode) -> Result<ExprKind, QtiError> {
        let has_attr_form = el.attr("min").is_some() || el.attr("max").is_some();
        if has_attr_form {
            return Ok(ExprKind::RandomFloat {
                min: numeric_arg_attr(el, "min").unwrap_or(NumericArg::Literal(0.0)),
                max: numeric_arg_attr_required(el, "max")?,
            });
        }
        let (min, max) = self.binary_children(el)?;
        Ok(ExprKind::RandomFloat {
            min: NumericArg::Expr(min),
            max: NumericArg::Expr(max),
        })
    }

    fn build_lookup_table(&mut self, el: &XmlElementNode) -> Result<ExprKind, QtiError> {
        let mut children = el.child_elements();
        let (Some(source_el), Some(table_el), None) =
            (children.next(), children.next(), children.next())
        else {
            return Err(QtiError::with_span(
                "AST_CHILD_ARITY",
                "<lookupTable> requires a source expression followed by a table.",
                el.location.clone(),
            ));
        };
        let source = Box::new(self.build_expression(source_el)?);
        let table = tables::parse_lookup_table_element(table_el, None)?;
        Ok(ExprKind::LookupTable { source, table })
    }

    fn single_child(&mut self, el: &XmlElementNode) -> Result<Box<ExpressionNode>, QtiError> {
        let mut children = el.child_elements();
        let (Some(first), None) = (children.next(), children.next()) else {
            return Err(QtiError::with_span(
                "AST_CHILD_ARITY",
                format!("<{}> requires exactly one child expression.", el.name),
                el.location.clone(),
            ));
        };
        Ok(Box::new(self.build_expression(first)?))
    }

    fn binary_children(
        &mut self,
        el: &XmlElementNode,
    ) -> Result<(Box<ExpressionNode>, Box<ExpressionNode>), QtiError> {
        let mut children = el.child_elements();
        let (Some(first), Some(second), None) =
            (children.next(), children.next(), children.next())
        else {
            return Err(QtiError::with_span(
                "AST_CHILD_ARITY",
                format!("<{}> requires exactly two child expressions.", el.name),
                el.location.clone(),
            ));
        };
        Ok((
            Box::new(self.build_expression(first)?),
            Box::new(self.build_expression(second)?),
        ))
    }

    fn child_expressions(
        &mut self,
        el: &XmlElementNode,
        min: usize,
    ) -> Result<Vec<ExpressionNode>, QtiError> {
        let mut exprs = Vec::new();
        for child in el.child_elements() {
            exprs.push(self.build_expression(child)?);
        }
        if exprs.len() < min {
            return Err(QtiError::with_span(
                "AST_CHILD_ARITY",
                format!(
                    "<{}> requires at least {} child expression(s).",
                    el.name, min
                ),
                el.location.clone(),
            ));
        }
        Ok(exprs)
    }
}

fn build_equal_params(el: &XmlElementNode) -> Result<EqualParams, QtiError> {
    let tolerance_mode = match get_optional_attr(el, "toleranceMode") {
        Some(raw) => ToleranceMode::parse(&raw)
            .ok_or_else(|| attr_invalid(el, "toleranceMode", &raw))?,
        None => ToleranceMode::Exact,
    };

    let tolerance = match get_optional_attr(el, "tolerance") {
        Some(raw) => raw
            .split_whitespace()
            .map(crate::xml_utils::numeric_arg)
            .collect::<Vec<_>>(),
        None => Vec::new(),
    };
    if tolerance.len() > 2 {
        return Err(attr_invalid(
            el,
            "tolerance",
            &get_optional_attr(el, "tolerance").unwrap_or_default(),
        ));
    }
    if tolerance_mode != ToleranceMode::Exact && tolerance.is_empty() {
        return Err(QtiError::with_span(
            "AST_MISSING_ATTR",
            format!(
                "<{}> with non-exact toleranceMode requires a tolerance attribute.",
                el.name
            ),
            el.location.clone(),
        ));
    }

    Ok(EqualParams {
        tolerance_mode,
        tolerance,
        include_lower_bound: parse_bool_attr(el, "includeLowerBound", true)?,
        include_upper_bound: parse_bool_attr(el, "includeUpperBound", true)?,
    })
}

fn build_rounding_mode(el: &XmlElementNode) -> Result<RoundingMode, QtiError> {
    match get_optional_attr(el, "roundingMode") {
        Some(raw) => {
            RoundingMode::parse(&raw).ok_or_else(|| attr_invalid(el, "roundingMode", &raw))
        }
        None => Ok(RoundingMode::SignificantFigures),
    }
}

fn coords_summary(coords: &[f64]) -> String {
    coords
        .iter()
        .map(|value| value.to_string())
        .collect::<Vec<_>>()
        .join(",")
}
