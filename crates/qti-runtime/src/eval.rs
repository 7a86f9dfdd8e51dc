use std::collections::BTreeMap;

use qti_core::{
    Cardinality, CompareOp, DeclarationContext, EqualParams, ExprKind, ExpressionNode, MathConst,
    NumericArg, QtiValue, Scalar, ToleranceMode,
};

use crate::aggregates::{
    eval_item_count, eval_outcome_extreme, eval_test_variables, ItemCount, OutcomeExtreme,
};
use crate::geometry::point_in_shape;
use crate::mapping::{eval_map_response_point, eval_map_value, lookup_in_table};
use crate::math::{
    eval_gcd, eval_lcm, eval_math_operator, eval_max, eval_min, eval_product, eval_stats_operator,
    eval_sum,
};
use crate::numeric::{numeric_result, qti_round, round_with_mode};
use crate::registry::{CustomOperatorCall, CustomOperatorRegistry};
use crate::test_ctx::TestEvalContext;

/// Everything expression evaluation can touch. The declaration context is
/// only ever read here; statement execution is what writes it.
pub struct EvalEnv<'a> {
    pub ctx: &'a mut DeclarationContext,
    pub ops: &'a dyn CustomOperatorRegistry,
    pub rng: &'a mut dyn FnMut() -> f64,
    pub test: Option<&'a TestEvalContext>,
}

pub fn eval_expr(env: &mut EvalEnv<'_>, expr: &ExpressionNode) -> QtiValue {
    match &expr.kind {
        ExprKind::BaseValue { base_type, value } => QtiValue::Single {
            base_type: *base_type,
            value: value.clone(),
        },
        ExprKind::Variable { identifier, .. } => env.ctx.get_value(identifier),
        ExprKind::Correct { identifier } => env.ctx.get_correct_response(identifier),
        ExprKind::Default { identifier } => env.ctx.get_default_value(identifier),
        ExprKind::Null => QtiValue::Null,
        ExprKind::RandomInteger { min, max, step } => eval_random_integer(env, min, max, step),
        ExprKind::RandomFloat { min, max } => eval_random_float(env, min, max),
        ExprKind::MathConstant { constant } => match constant {
            MathConst::Pi => QtiValue::float(std::f64::consts::PI),
            MathConst::E => QtiValue::float(std::f64::consts::E),
        },
        ExprKind::Multiple(exprs) => build_container(env, exprs, Cardinality::Multiple),
        ExprKind::Ordered(exprs) => build_container(env, exprs, Cardinality::Ordered),
        ExprKind::ContainerSize(expr) => match eval_expr(env, expr) {
            QtiValue::Invalid { reason } => QtiValue::invalid(reason),
            QtiValue::Null => QtiValue::Null,
            QtiValue::Record { .. } => {
                QtiValue::invalid("containerSize applied to a record value")
            }
            value => QtiValue::integer(value.scalars().map(|s| s.len()).unwrap_or(0) as i64),
        },
        ExprKind::IsNull(expr) => match eval_expr(env, expr) {
            QtiValue::Invalid { reason } => QtiValue::invalid(reason),
            value => QtiValue::boolean(value.is_null()),
        },
        ExprKind::Index { n, expr } => eval_index(env, n, expr),
        ExprKind::FieldValue {
            field_identifier,
            expr,
        } => match eval_expr(env, expr) {
            QtiValue::Invalid { reason } => QtiValue::invalid(reason),
            QtiValue::Null => QtiValue::Null,
            QtiValue::Record { fields } => {
                fields.get(field_identifier).cloned().unwrap_or(QtiValue::Null)
            }
            _ => QtiValue::Null,
        },
        ExprKind::Random(expr) => match eval_expr(env, expr) {
            QtiValue::Invalid { reason } => QtiValue::invalid(reason),
            QtiValue::Null => QtiValue::Null,
            QtiValue::Container {
                base_type, values, ..
            } => {
                let draw = (env.rng)();
                let index = ((draw * values.len() as f64) as usize).min(values.len() - 1);
                QtiValue::Single {
                    base_type,
                    value: values[index].clone(),
                }
            }
            single => single,
        },
        ExprKind::Member { value, container } => {
            let needle = eval_expr(env, value);
            let haystack = eval_expr(env, container);
            match propagate2(&needle, &haystack) {
                Some(short) => short,
                None => {
                    let QtiValue::Single { value: needle, .. } = &needle else {
                        return QtiValue::invalid("member requires a single first operand");
                    };
                    let Some(scalars) = haystack.scalars() else {
                        return QtiValue::invalid("member requires a container second operand");
                    };
                    let key = needle.key();
                    QtiValue::boolean(scalars.iter().any(|scalar| scalar.key() == key))
                }
            }
        }
        ExprKind::Contains { container, sub } => {
            let big = eval_expr(env, container);
            let small = eval_expr(env, sub);
            match propagate2(&big, &small) {
                Some(short) => short,
                None => eval_contains(&big, &small),
            }
        }
        ExprKind::Delete { value, container } => {
            let needle = eval_expr(env, value);
            let haystack = eval_expr(env, container);
            match propagate2(&needle, &haystack) {
                Some(short) => short,
                None => {
                    let QtiValue::Single { value: needle, .. } = &needle else {
                        return QtiValue::invalid("delete requires a single first operand");
                    };
                    let QtiValue::Container {
                        base_type,
                        cardinality,
                        values,
                    } = haystack
                    else {
                        return QtiValue::invalid("delete requires a container second operand");
                    };
                    let key = needle.key();
                    let remaining = values
                        .into_iter()
                        .filter(|scalar| scalar.key() != key)
                        .collect();
                    QtiValue::container(base_type, cardinality, remaining)
                }
            }
        }
        ExprKind::Repeat {
            number_repeats,
            exprs,
        } => eval_repeat(env, number_repeats, exprs),
        ExprKind::And(exprs) => eval_and(env, exprs),
        ExprKind::Or(exprs) => eval_or(env, exprs),
        ExprKind::Not(expr) => match eval_expr(env, expr) {
            QtiValue::Invalid { reason } => QtiValue::invalid(reason),
            QtiValue::Null => QtiValue::Null,
            value => match value.as_bool() {
                Some(flag) => QtiValue::boolean(!flag),
                None => QtiValue::invalid("not requires a boolean operand"),
            },
        },
        ExprKind::AnyN { min, max, exprs } => eval_any_n(env, min, max, exprs),
        ExprKind::AllN { max, exprs } => eval_all_n(env, max, exprs),
        ExprKind::Match { lhs, rhs } => {
            let l = eval_expr(env, lhs);
            let r = eval_expr(env, rhs);
            match propagate2(&l, &r) {
                Some(short) => short,
                None => QtiValue::boolean(values_match(&l, &r)),
            }
        }
        ExprKind::Equal { params, lhs, rhs } => {
            let l = eval_expr(env, lhs);
            let r = eval_expr(env, rhs);
            eval_equal(env, params, &l, &r)
        }
        ExprKind::NotEqual { params, lhs, rhs } => {
            let l = eval_expr(env, lhs);
            let r = eval_expr(env, rhs);
            // Negation applies only to a concrete boolean; Null and
            // Invalid pass through untouched.
            let equality = eval_equal(env, params, &l, &r);
            match equality.as_bool() {
                Some(flag) => QtiValue::boolean(!flag),
                None => equality,
            }
        }
        ExprKind::EqualRounded {
            rounding_mode,
            figures,
            lhs,
            rhs,
        } => {
            let l = eval_expr(env, lhs);
            let r = eval_expr(env, rhs);
            if let Some(short) = propagate2(&l, &r) {
                return short;
            }
            let (Some(x), Some(y)) = (l.as_f64(), r.as_f64()) else {
                return QtiValue::invalid("equalRounded requires single numeric operands");
            };
            let Some(figures) = resolve_numeric_arg(env, figures) else {
                return QtiValue::Null;
            };
            let (Some(a), Some(b)) = (
                round_with_mode(x, *rounding_mode, figures),
                round_with_mode(y, *rounding_mode, figures),
            ) else {
                return QtiValue::invalid("equalRounded figures out of range");
            };
            QtiValue::boolean(a == b)
        }
        ExprKind::StringMatch {
            case_sensitive,
            substring,
            lhs,
            rhs,
        } => {
            let l = eval_expr(env, lhs);
            let r = eval_expr(env, rhs);
            if let Some(short) = propagate2(&l, &r) {
                return short;
            }
            let (Some(a), Some(b)) = (l.as_str(), r.as_str()) else {
                return QtiValue::invalid("stringMatch requires string operands");
            };
            let (a, b) = if *case_sensitive {
                (a.to_string(), b.to_string())
            } else {
                (a.to_lowercase(), b.to_lowercase())
            };
            QtiValue::boolean(if *substring { a.contains(&b) } else { a == b })
        }
        ExprKind::PatternMatch { pattern, expr } => {
            let value = eval_expr(env, expr);
            match value {
                QtiValue::Invalid { reason } => QtiValue::invalid(reason),
                QtiValue::Null => QtiValue::Null,
                value => {
                    let Some(text) = value.as_str() else {
                        return QtiValue::invalid("patternMatch requires a string operand");
                    };
                    match regex::Regex::new(&format!("^(?:{})$", pattern)) {
                        Ok(compiled) => QtiValue::boolean(compiled.is_match(text)),
                        Err(_) => QtiValue::invalid("patternMatch pattern failed to compile"),
                    }
                }
            }
        }
        ExprKind::Inside {
            shape,
            coords,
            expr,
        } => {
            let value = eval_expr(env, expr);
            match value {
                QtiValue::Invalid { reason } => QtiValue::invalid(reason),
                QtiValue::Null => QtiValue::Null,
                QtiValue::Record { .. } => QtiValue::invalid("inside applied to a record value"),
                value => {
                    let Some(scalars) = value.scalars() else {
                        return QtiValue::Null;
                    };
                    let mut points = Vec::with_capacity(scalars.len());
                    for scalar in &scalars {
                        // An uninterpretable point voids the whole check.
                        let Some(point) = scalar.as_point() else {
                            return QtiValue::Null;
                        };
                        points.push(point);
                    }
                    QtiValue::boolean(
                        points
                            .iter()
                            .any(|point| point_in_shape(*shape, coords, *point)),
                    )
                }
            }
        }
        ExprKind::Compare { op, lhs, rhs } => {
            let l = eval_expr(env, lhs);
            let r = eval_expr(env, rhs);
            match numeric_pair(&l, &r, "comparison") {
                Err(short) => short,
                Ok((x, y, _)) => QtiValue::boolean(match op {
                    CompareOp::Lt => x < y,
                    CompareOp::Gt => x > y,
                    CompareOp::Lte => x <= y,
                    CompareOp::Gte => x >= y,
                }),
            }
        }
        ExprKind::DurationLt { lhs, rhs } => {
            let l = eval_expr(env, lhs);
            let r = eval_expr(env, rhs);
            match numeric_pair(&l, &r, "durationLT") {
                Err(short) => short,
                Ok((x, y, _)) => QtiValue::boolean(x < y),
            }
        }
        ExprKind::DurationGte { lhs, rhs } => {
            let l = eval_expr(env, lhs);
            let r = eval_expr(env, rhs);
            match numeric_pair(&l, &r, "durationGTE") {
                Err(short) => short,
                Ok((x, y, _)) => QtiValue::boolean(x >= y),
            }
        }
        ExprKind::Sum(exprs) => eval_sum(&eval_all(env, exprs)),
        ExprKind::Product(exprs) => eval_product(&eval_all(env, exprs)),
        ExprKind::Subtract { lhs, rhs } => {
            let l = eval_expr(env, lhs);
            let r = eval_expr(env, rhs);
            match numeric_pair(&l, &r, "subtract") {
                Err(short) => short,
                Ok((x, y, all_int)) => numeric_result(x - y, all_int),
            }
        }
        ExprKind::Divide { lhs, rhs } => {
            let l = eval_expr(env, lhs);
            let r = eval_expr(env, rhs);
            match numeric_pair(&l, &r, "divide") {
                Err(short) => short,
                Ok((_, y, _)) if y == 0.0 => QtiValue::Null,
                Ok((x, y, _)) => numeric_result(x / y, false),
            }
        }
        ExprKind::Power { lhs, rhs } => {
            let l = eval_expr(env, lhs);
            let r = eval_expr(env, rhs);
            match numeric_pair(&l, &r, "power") {
                Err(short) => short,
                Ok((x, y, all_int)) => numeric_result(x.powf(y), all_int),
            }
        }
        ExprKind::IntegerDivide { lhs, rhs } => {
            let l = eval_expr(env, lhs);
            let r = eval_expr(env, rhs);
            match integer_pair(&l, &r, "integerDivide") {
                Err(short) => short,
                Ok((_, 0)) => QtiValue::Null,
                Ok((a, b)) => QtiValue::integer(a / b),
            }
        }
        ExprKind::IntegerModulus { lhs, rhs } => {
            let l = eval_expr(env, lhs);
            let r = eval_expr(env, rhs);
            match integer_pair(&l, &r, "integerModulus") {
                Err(short) => short,
                Ok((_, 0)) => QtiValue::Null,
                Ok((a, b)) => QtiValue::integer(a % b),
            }
        }
        ExprKind::Truncate(expr) => match single_numeric(env, expr) {
            Err(short) => short,
            Ok(value) => {
                if value.is_finite() {
                    QtiValue::integer(value.trunc() as i64)
                } else {
                    QtiValue::Null
                }
            }
        },
        ExprKind::Round(expr) => match single_numeric(env, expr) {
            Err(short) => short,
            Ok(value) => qti_round(value).map(QtiValue::integer).unwrap_or(QtiValue::Null),
        },
        ExprKind::RoundTo {
            rounding_mode,
            figures,
            expr,
        } => match single_numeric(env, expr) {
            Err(short) => short,
            Ok(value) => {
                let Some(figures) = resolve_numeric_arg(env, figures) else {
                    return QtiValue::Null;
                };
                match round_with_mode(value, *rounding_mode, figures) {
                    Some(rounded) => QtiValue::float(rounded),
                    None => QtiValue::invalid("roundTo figures out of range"),
                }
            }
        },
        ExprKind::IntegerToFloat(expr) => match eval_expr(env, expr) {
            QtiValue::Invalid { reason } => QtiValue::invalid(reason),
            QtiValue::Null => QtiValue::Null,
            QtiValue::Single {
                value: Scalar::Int(value),
                ..
            } => QtiValue::float(value as f64),
            _ => QtiValue::invalid("integerToFloat requires an integer operand"),
        },
        ExprKind::Min(exprs) => eval_min(&eval_all(env, exprs)),
        ExprKind::Max(exprs) => eval_max(&eval_all(env, exprs)),
        ExprKind::Gcd(exprs) => eval_gcd(&eval_all(env, exprs)),
        ExprKind::Lcm(exprs) => eval_lcm(&eval_all(env, exprs)),
        ExprKind::MathOperator { name, exprs } => {
            eval_math_operator(*name, &eval_all(env, exprs))
        }
        ExprKind::StatsOperator { name, expr } => {
            let value = eval_expr(env, expr);
            eval_stats_operator(*name, &value)
        }
        ExprKind::MapResponse { identifier } | ExprKind::MapOutcome { identifier } => {
            eval_map_value(env.ctx, identifier)
        }
        ExprKind::MapResponsePoint { identifier } => {
            eval_map_response_point(env.ctx, identifier)
        }
        ExprKind::LookupTable { source, table } => {
            let value = eval_expr(env, source);
            lookup_in_table(table, &value)
        }
        ExprKind::CustomOperator {
            class,
            definition,
            exprs,
        } => {
            let mut args = Vec::with_capacity(exprs.len());
            for child in exprs {
                match eval_expr(env, child) {
                    QtiValue::Invalid { reason } => return QtiValue::invalid(reason),
                    // A Null child short-circuits the whole operator.
                    QtiValue::Null => return QtiValue::Null,
                    value => args.push(value),
                }
            }
            let call = CustomOperatorCall {
                class: class.as_deref(),
                definition: definition.as_deref(),
            };
            let Some(handler) = env.ops.resolve(&call) else {
                return QtiValue::Null;
            };
            handler(&args).unwrap_or(QtiValue::Null)
        }
        ExprKind::TestVariables {
            variable_identifier,
            base_type,
            weight_identifier,
            section_identifier,
            include_categories,
            exclude_categories,
        } => eval_test_variables(
            env.test,
            variable_identifier,
            *base_type,
            weight_identifier.as_deref(),
            section_identifier.as_deref(),
            include_categories,
            exclude_categories,
        ),
        ExprKind::OutcomeMinimum {
            outcome_identifier,
            weight_identifier,
            section_identifier,
            include_categories,
            exclude_categories,
        } => eval_outcome_extreme(
            env.test,
            OutcomeExtreme::Minimum,
            outcome_identifier,
            weight_identifier.as_deref(),
            section_identifier.as_deref(),
            include_categories,
            exclude_categories,
        ),
        ExprKind::OutcomeMaximum {
            outcome_identifier,
            weight_identifier,
            section_identifier,
            include_categories,
            exclude_categories,
        } => eval_outcome_extreme(
            env.test,
            OutcomeExtreme::Maximum,
            outcome_identifier,
            weight_identifier.as_deref(),
            section_identifier.as_deref(),
            include_categories,
            exclude_categories,
        ),
        ExprKind::NumberCorrect(filter) => eval_item_count(env.test, ItemCount::Correct, filter),
        ExprKind::NumberIncorrect(filter) => {
            eval_item_count(env.test, ItemCount::Incorrect, filter)
        }
        ExprKind::NumberPresented(filter) => {
            eval_item_count(env.test, ItemCount::Presented, filter)
        }
        ExprKind::NumberResponded(filter) => {
            eval_item_count(env.test, ItemCount::Responded, filter)
        }
        ExprKind::NumberSelected(filter) => {
            eval_item_count(env.test, ItemCount::Selected, filter)
        }
    }
}

fn eval_all(env: &mut EvalEnv<'_>, exprs: &[ExpressionNode]) -> Vec<QtiValue> {
    exprs.iter().map(|expr| eval_expr(env, expr)).collect()
}

fn resolve_numeric_arg(env: &mut EvalEnv<'_>, arg: &NumericArg) -> Option<f64> {
    match arg {
        NumericArg::Literal(value) => Some(*value),
        NumericArg::Variable(identifier) => env.ctx.get_value(identifier).as_f64(),
        NumericArg::Expr(expr) => eval_expr(env, expr).as_f64(),
    }
}

/// Invalid dominates, then Null.
fn propagate2(l: &QtiValue, r: &QtiValue) -> Option<QtiValue> {
    if let QtiValue::Invalid { reason } = l {
        return Some(QtiValue::invalid(reason.clone()));
    }
    if let QtiValue::Invalid { reason } = r {
        return Some(QtiValue::invalid(reason.clone()));
    }
    if l.is_null() || r.is_null() {
        return Some(QtiValue::Null);
    }
    None
}

fn numeric_pair(
    l: &QtiValue,
    r: &QtiValue,
    what: &str,
) -> Result<(f64, f64, bool), QtiValue> {
    if let Some(short) = propagate2(l, r) {
        return Err(short);
    }
    let (Some(x), Some(y)) = (l.as_f64(), r.as_f64()) else {
        return Err(QtiValue::invalid(format!(
            "{} requires single numeric operands",
            what
        )));
    };
    let all_int = matches!(
        l,
        QtiValue::Single {
            value: Scalar::Int(_),
            ..
        }
    ) && matches!(
        r,
        QtiValue::Single {
            value: Scalar::Int(_),
            ..
        }
    );
    Ok((x, y, all_int))
}

fn integer_pair(l: &QtiValue, r: &QtiValue, what: &str) -> Result<(i64, i64), QtiValue> {
    let (x, y, _) = numeric_pair(l, r, what)?;
    if x.fract() != 0.0 || y.fract() != 0.0 {
        return Err(QtiValue::invalid(format!(
            "{} requires integer operands",
            what
        )));
    }
    Ok((x as i64, y as i64))
}

fn single_numeric(env: &mut EvalEnv<'_>, expr: &ExpressionNode) -> Result<f64, QtiValue> {
    match eval_expr(env, expr) {
        QtiValue::Invalid { reason } => Err(QtiValue::invalid(reason)),
        QtiValue::Null => Err(QtiValue::Null),
        value => value
            .as_f64()
            .ok_or_else(|| QtiValue::invalid("numeric operator requires a single numeric operand")),
    }
}

fn build_container(
    env: &mut EvalEnv<'_>,
    exprs: &[ExpressionNode],
    cardinality: Cardinality,
) -> QtiValue {
    let mut scalars = Vec::new();
    let mut base_type = None;
    for expr in exprs {
        match eval_expr(env, expr) {
            QtiValue::Invalid { reason } => return QtiValue::invalid(reason),
            QtiValue::Null => {}
            QtiValue::Single {
                base_type: bt,
                value,
            } => {
                base_type.get_or_insert(bt);
                scalars.push(value);
            }
            QtiValue::Container {
                base_type: bt,
                values,
                ..
            } => {
                base_type.get_or_insert(bt);
                scalars.extend(values);
            }
            QtiValue::Record { .. } => {
                return QtiValue::invalid("record value inside a container constructor");
            }
        }
    }
    match base_type {
        Some(base_type) => QtiValue::container(base_type, cardinality, scalars),
        None => QtiValue::Null,
    }
}

fn eval_index(env: &mut EvalEnv<'_>, n: &NumericArg, expr: &ExpressionNode) -> QtiValue {
    let value = eval_expr(env, expr);
    match value {
        QtiValue::Invalid { reason } => QtiValue::invalid(reason),
        QtiValue::Null => QtiValue::Null,
        QtiValue::Container {
            base_type, values, ..
        } => {
            let Some(position) = resolve_numeric_arg(env, n) else {
                return QtiValue::Null;
            };
            if position.fract() != 0.0 {
                return QtiValue::invalid("index position must be an integer");
            }
            let position = position as i64;
            // 1-based; out-of-range reads are Null, not errors.
            if position < 1 || position as usize > values.len() {
                return QtiValue::Null;
            }
            QtiValue::Single {
                base_type,
                value: values[position as usize - 1].clone(),
            }
        }
        _ => QtiValue::invalid("index requires an ordered container operand"),
    }
}

fn eval_random_integer(
    env: &mut EvalEnv<'_>,
    min: &NumericArg,
    max: &NumericArg,
    step: &NumericArg,
) -> QtiValue {
    let (Some(min), Some(max), Some(step)) = (
        resolve_numeric_arg(env, min),
        resolve_numeric_arg(env, max),
        resolve_numeric_arg(env, step),
    ) else {
        return QtiValue::Null;
    };
    if step <= 0.0 || max < min {
        return QtiValue::Null;
    }
    let choices = ((max - min) / step).floor() + 1.0;
    let draw = (env.rng)();
    let pick = (draw * choices).floor().min(choices - 1.0);
    QtiValue::integer((min + pick * step).round() as i64)
}

fn eval_random_float(env: &mut EvalEnv<'_>, min: &NumericArg, max: &NumericArg) -> QtiValue {
    let (Some(min), Some(max)) = (resolve_numeric_arg(env, min), resolve_numeric_arg(env, max))
    else {
        return QtiValue::Null;
    };
    if max < min {
        return QtiValue::Null;
    }
    let draw = (env.rng)();
    QtiValue::float(min + draw * (max - min))
}

fn eval_repeat(
    env: &mut EvalEnv<'_>,
    number_repeats: &NumericArg,
    exprs: &[ExpressionNode],
) -> QtiValue {
    let Some(repeats) = resolve_numeric_arg(env, number_repeats) else {
        return QtiValue::Null;
    };
    if repeats < 1.0 || repeats.fract() != 0.0 {
        return QtiValue::Null;
    }
    // Runaway guard for authored-content mistakes.
    if repeats > 10_000.0 {
        return QtiValue::Null;
    }

    let mut scalars = Vec::new();
    let mut base_type = None;
    for _ in 0..repeats as usize {
        for expr in exprs {
            match eval_expr(env, expr) {
                QtiValue::Invalid { reason } => return QtiValue::invalid(reason),
                QtiValue::Null => {}
                QtiValue::Single {
                    base_type: bt,
                    value,
                } => {
                    base_type.get_or_insert(bt);
                    scalars.push(value);
                }
                QtiValue::Container {
                    base_type: bt,
                    values,
                    ..
                } => {
                    base_type.get_or_insert(bt);
                    scalars.extend(values);
                }
                QtiValue::Record { .. } => {
                    return QtiValue::invalid("record value inside repeat");
                }
            }
        }
    }
    match base_type {
        Some(base_type) => QtiValue::container(base_type, Cardinality::Ordered, scalars),
        None => QtiValue::Null,
    }
}

fn eval_and(env: &mut EvalEnv<'_>, exprs: &[ExpressionNode]) -> QtiValue {
    let mut saw_null = false;
    let mut saw_false = false;
    for value in eval_all(env, exprs) {
        match value {
            QtiValue::Invalid { reason } => return QtiValue::invalid(reason),
            QtiValue::Null => saw_null = true,
            value => match value.as_bool() {
                Some(true) => {}
                Some(false) => saw_false = true,
                None => return QtiValue::invalid("and requires boolean operands"),
            },
        }
    }
    if saw_false {
        QtiValue::boolean(false)
    } else if saw_null {
        QtiValue::Null
    } else {
        QtiValue::boolean(true)
    }
}

fn eval_or(env: &mut EvalEnv<'_>, exprs: &[ExpressionNode]) -> QtiValue {
    let mut saw_null = false;
    let mut saw_true = false;
    for value in eval_all(env, exprs) {
        match value {
            QtiValue::Invalid { reason } => return QtiValue::invalid(reason),
            QtiValue::Null => saw_null = true,
            value => match value.as_bool() {
                Some(true) => saw_true = true,
                Some(false) => {}
                None => return QtiValue::invalid("or requires boolean operands"),
            },
        }
    }
    if saw_true {
        QtiValue::boolean(true)
    } else if saw_null {
        QtiValue::Null
    } else {
        QtiValue::boolean(false)
    }
}

fn eval_any_n(
    env: &mut EvalEnv<'_>,
    min: &NumericArg,
    max: &NumericArg,
    exprs: &[ExpressionNode],
) -> QtiValue {
    let (Some(min), Some(max)) = (resolve_numeric_arg(env, min), resolve_numeric_arg(env, max))
    else {
        return QtiValue::Null;
    };
    let mut trues = 0.0;
    let mut nulls = 0.0;
    for value in eval_all(env, exprs) {
        match value {
            QtiValue::Invalid { reason } => return QtiValue::invalid(reason),
            QtiValue::Null => nulls += 1.0,
            value => match value.as_bool() {
                Some(true) => trues += 1.0,
                Some(false) => {}
                None => return QtiValue::invalid("anyN requires boolean operands"),
            },
        }
    }
    // The actual true-count lies in [trues, trues + nulls]; answer
    // concretely only when the whole interval lands on one side.
    if trues >= min && trues + nulls <= max {
        QtiValue::boolean(true)
    } else if trues > max || trues + nulls < min {
        QtiValue::boolean(false)
    } else {
        QtiValue::Null
    }
}

/// Historical semantics kept as-is: true iff the number of concretely
/// true children does not exceed max; Null children count as not-true.
fn eval_all_n(env: &mut EvalEnv<'_>, max: &NumericArg, exprs: &[ExpressionNode]) -> QtiValue {
    let Some(max) = resolve_numeric_arg(env, max) else {
        return QtiValue::Null;
    };
    let mut trues = 0.0;
    for value in eval_all(env, exprs) {
        match value {
            QtiValue::Invalid { reason } => return QtiValue::invalid(reason),
            QtiValue::Null => {}
            value => match value.as_bool() {
                Some(true) => trues += 1.0,
                Some(false) => {}
                None => return QtiValue::invalid("allN requires boolean operands"),
            },
        }
    }
    QtiValue::boolean(trues <= max)
}

fn eval_equal(
    env: &mut EvalEnv<'_>,
    params: &EqualParams,
    l: &QtiValue,
    r: &QtiValue,
) -> QtiValue {
    if let Some(short) = propagate2(l, r) {
        return short;
    }
    let (Some(x), Some(y)) = (l.as_f64(), r.as_f64()) else {
        return QtiValue::invalid("equal requires single numeric operands");
    };

    match params.tolerance_mode {
        ToleranceMode::Exact => QtiValue::boolean(x == y),
        ToleranceMode::Absolute | ToleranceMode::Relative => {
            let Some(t0) = params
                .tolerance
                .first()
                .and_then(|arg| resolve_numeric_arg(env, arg))
            else {
                return QtiValue::Null;
            };
            let t1 = match params.tolerance.get(1) {
                Some(arg) => match resolve_numeric_arg(env, arg) {
                    Some(value) => value,
                    None => return QtiValue::Null,
                },
                None => t0,
            };
            let (lower, upper) = if params.tolerance_mode == ToleranceMode::Absolute {
                (x - t0, x + t1)
            } else {
                // Relative tolerances are percentages of the left operand.
                ((x - (x * t0 / 100.0).abs()), (x + (x * t1 / 100.0).abs()))
            };
            let lower_ok = if params.include_lower_bound {
                y >= lower
            } else {
                y > lower
            };
            let upper_ok = if params.include_upper_bound {
                y <= upper
            } else {
                y < upper
            };
            QtiValue::boolean(lower_ok && upper_ok)
        }
    }
}

fn values_match(l: &QtiValue, r: &QtiValue) -> bool {
    match (l, r) {
        (
            QtiValue::Single { value: a, .. },
            QtiValue::Single { value: b, .. },
        ) => a.key() == b.key(),
        (
            QtiValue::Container {
                cardinality: ca,
                values: a,
                ..
            },
            QtiValue::Container {
                cardinality: cb,
                values: b,
                ..
            },
        ) => {
            // Declared cardinality governs the comparison discipline.
            if ca != cb {
                return false;
            }
            match ca {
                Cardinality::Ordered => {
                    a.len() == b.len()
                        && a.iter().zip(b.iter()).all(|(x, y)| x.key() == y.key())
                }
                _ => multiset_counts(a) == multiset_counts(b),
            }
        }
        (QtiValue::Record { fields: a }, QtiValue::Record { fields: b }) => {
            a.len() == b.len()
                && a.iter().all(|(key, va)| {
                    b.get(key).map_or(false, |vb| match (va, vb) {
                        (QtiValue::Null, QtiValue::Null) => true,
                        _ => values_match(va, vb),
                    })
                })
        }
        _ => false,
    }
}

fn multiset_counts(values: &[Scalar]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for value in values {
        *counts.entry(value.key()).or_insert(0) += 1;
    }
    counts
}

fn eval_contains(big: &QtiValue, small: &QtiValue) -> QtiValue {
    let (Some(big_values), Some(small_values)) = (big.scalars(), small.scalars()) else {
        return QtiValue::invalid("contains requires container operands");
    };
    let ordered = big.cardinality() == Some(Cardinality::Ordered);
    if ordered {
        // Contiguous subsequence for ordered containers.
        let big_keys = big_values.iter().map(Scalar::key).collect::<Vec<_>>();
        let small_keys = small_values.iter().map(Scalar::key).collect::<Vec<_>>();
        if small_keys.is_empty() || small_keys.len() > big_keys.len() {
            return QtiValue::boolean(false);
        }
        QtiValue::boolean(
            big_keys
                .windows(small_keys.len())
                .any(|window| window == small_keys.as_slice()),
        )
    } else {
        let big_counts = multiset_counts(&big_values);
        let small_counts = multiset_counts(&small_values);
        QtiValue::boolean(small_counts.iter().all(|(key, count)| {
            big_counts.get(key).map_or(false, |available| available >= count)
        }))
    }
}
