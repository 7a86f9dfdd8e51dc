use qti_core::{MathOp, QtiValue, StatsOp};

use crate::numeric::{
    collect_numeric, decimal_ceil, decimal_floor, numeric_result, NumOperands,
};

pub(crate) fn eval_sum(operands: &[QtiValue]) -> QtiValue {
    match collect_numeric(operands) {
        NumOperands::Invalid(reason) => QtiValue::invalid(reason),
        NumOperands::Null => QtiValue::Null,
        NumOperands::Values { values, all_int } => {
            numeric_result(values.iter().sum(), all_int)
        }
    }
}

pub(crate) fn eval_product(operands: &[QtiValue]) -> QtiValue {
    match collect_numeric(operands) {
        NumOperands::Invalid(reason) => QtiValue::invalid(reason),
        NumOperands::Null => QtiValue::Null,
        NumOperands::Values { values, all_int } => {
            numeric_result(values.iter().product(), all_int)
        }
    }
}

pub(crate) fn eval_min(operands: &[QtiValue]) -> QtiValue {
    match collect_numeric(operands) {
        NumOperands::Invalid(reason) => QtiValue::invalid(reason),
        NumOperands::Null => QtiValue::Null,
        NumOperands::Values { values, all_int } => values
            .iter()
            .copied()
            .fold(None::<f64>, |acc, value| {
                Some(acc.map_or(value, |best| best.min(value)))
            })
            .map(|value| numeric_result(value, all_int))
            .unwrap_or(QtiValue::Null),
    }
}

pub(crate) fn eval_max(operands: &[QtiValue]) -> QtiValue {
    match collect_numeric(operands) {
        NumOperands::Invalid(reason) => QtiValue::invalid(reason),
        NumOperands::Null => QtiValue::Null,
        NumOperands::Values { values, all_int } => values
            .iter()
            .copied()
            .fold(None::<f64>, |acc, value| {
                Some(acc.map_or(value, |best| best.max(value)))
            })
            .map(|value| numeric_result(value, all_int))
            .unwrap_or(QtiValue::Null),
    }
}

pub(crate) fn eval_gcd(operands: &[QtiValue]) -> QtiValue {
    match integer_operands(operands) {
        IntOperands::Invalid(reason) => QtiValue::invalid(reason),
        IntOperands::Null => QtiValue::Null,
        IntOperands::Values(values) => {
            let result = values
                .iter()
                .fold(0u64, |acc, value| gcd_u64(acc, value.unsigned_abs()));
            QtiValue::integer(result as i64)
        }
    }
}

pub(crate) fn eval_lcm(operands: &[QtiValue]) -> QtiValue {
    match integer_operands(operands) {
        IntOperands::Invalid(reason) => QtiValue::invalid(reason),
        IntOperands::Null => QtiValue::Null,
        IntOperands::Values(values) => {
            if values.iter().any(|value| *value == 0) {
                return QtiValue::integer(0);
            }
            let mut acc = 1u64;
            for value in values {
                let value = value.unsigned_abs();
                let divisor = gcd_u64(acc, value);
                let Some(next) = (acc / divisor).checked_mul(value) else {
                    return QtiValue::Null;
                };
                acc = next;
            }
            QtiValue::integer(acc as i64)
        }
    }
}

enum IntOperands {
    Invalid(String),
    Null,
    Values(Vec<i64>),
}

fn integer_operands(operands: &[QtiValue]) -> IntOperands {
    match collect_numeric(operands) {
        NumOperands::Invalid(reason) => IntOperands::Invalid(reason),
        NumOperands::Null => IntOperands::Null,
        NumOperands::Values { values, .. } => {
            let mut integers = Vec::with_capacity(values.len());
            for value in values {
                if value.fract() != 0.0 || value.abs() >= 9.2e18 {
                    return IntOperands::Invalid(
                        "integer operator applied to non-integer operand".to_string(),
                    );
                }
                integers.push(value as i64);
            }
            IntOperands::Values(integers)
        }
    }
}

fn gcd_u64(a: u64, b: u64) -> u64 {
    let (mut a, mut b) = (a, b);
    while b != 0 {
        let t = b;
        b = a % b;
        a = t;
    }
    a
}

/// mathOperator: floats throughout, out-of-domain inputs map to Null.
pub(crate) fn eval_math_operator(name: MathOp, args: &[QtiValue]) -> QtiValue {
    let mut values = Vec::with_capacity(args.len());
    for arg in args {
        match arg {
            QtiValue::Invalid { reason } => return QtiValue::invalid(reason.clone()),
            QtiValue::Null => return QtiValue::Null,
            _ => {}
        }
        let Some(value) = arg.as_f64() else {
            return QtiValue::invalid("mathOperator requires single numeric operands");
        };
        values.push(value);
    }

    let arity = if name == MathOp::Atan2 { 2 } else { 1 };
    if values.len() != arity {
        return QtiValue::invalid(format!("mathOperator arity mismatch: expected {}", arity));
    }

    let x = values[0];
    let result = match name {
        MathOp::Sin => Some(x.sin()),
        MathOp::Cos => Some(x.cos()),
        MathOp::Tan => Some(x.tan()),
        MathOp::Sec => Some(1.0 / x.cos()),
        MathOp::Csc => Some(1.0 / x.sin()),
        MathOp::Cot => Some(x.cos() / x.sin()),
        MathOp::Asin => ((-1.0..=1.0).contains(&x)).then(|| x.asin()),
        MathOp::Acos => ((-1.0..=1.0).contains(&x)).then(|| x.acos()),
        MathOp::Atan => Some(x.atan()),
        MathOp::Atan2 => Some(x.atan2(values[1])),
        MathOp::Sinh => Some(x.sinh()),
        MathOp::Cosh => Some(x.cosh()),
        MathOp::Tanh => Some(x.tanh()),
        MathOp::Sech => Some(1.0 / x.cosh()),
        MathOp::Csch => (x != 0.0).then(|| 1.0 / x.sinh()),
        MathOp::Coth => (x != 0.0).then(|| 1.0 / x.tanh()),
        MathOp::Log => (x > 0.0).then(|| x.log10()),
        MathOp::Ln => (x > 0.0).then(|| x.ln()),
        MathOp::Exp => Some(x.exp()),
        MathOp::Abs => Some(x.abs()),
        MathOp::Signum => Some(x.signum()),
        MathOp::Floor => decimal_floor(x),
        MathOp::Ceil => decimal_ceil(x),
        MathOp::ToDegrees => Some(x.to_degrees()),
        MathOp::ToRadians => Some(x.to_radians()),
    };

    match result {
        Some(value) if value.is_finite() => QtiValue::float(value),
        _ => QtiValue::Null,
    }
}

/// Population vs sample statistics over a flattened numeric container.
/// Degenerate denominators are Invalid, not Null: the data was present
/// but the statistic is undefined for it.
pub(crate) fn eval_stats_operator(name: StatsOp, operand: &QtiValue) -> QtiValue {
    let values = match collect_numeric(std::slice::from_ref(operand)) {
        NumOperands::Invalid(reason) => return QtiValue::invalid(reason),
        NumOperands::Null => return QtiValue::Null,
        NumOperands::Values { values, .. } => values,
    };

    let n = values.len();
    if n == 0 {
        return QtiValue::invalid("statistics over an empty container");
    }
    let mean = values.iter().sum::<f64>() / n as f64;

    let result = match name {
        StatsOp::Mean => Some(mean),
        StatsOp::PopVariance | StatsOp::PopSd => {
            let variance = values
                .iter()
                .map(|value| (value - mean) * (value - mean))
                .sum::<f64>()
                / n as f64;
            if name == StatsOp::PopVariance {
                Some(variance)
            } else {
                Some(variance.sqrt())
            }
        }
        StatsOp::SampleVariance | StatsOp::SampleSd => {
            if n <= 1 {
                None
            } else {
                let variance = values
                    .iter()
                    .map(|value| (value - mean) * (value - mean))
                    .sum::<f64>()
                    / (n - 1) as f64;
                if name == StatsOp::SampleVariance {
                    Some(variance)
                } else {
                    Some(variance.sqrt())
                }
            }
        }
    };

    match result {
        Some(value) if value.is_finite() => QtiValue::float(value),
        Some(_) => QtiValue::Null,
        None => QtiValue::invalid("sample statistics need at least two values"),
    }
}
