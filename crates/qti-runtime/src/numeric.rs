use std::str::FromStr;

use qti_core::{QtiValue, RoundingMode};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

/// Decimal view of a float via its shortest decimal spelling, so that a
/// value like 3.175 rounds as written rather than as its binary
/// expansion 3.17499...
fn to_decimal(value: f64) -> Option<Decimal> {
    if !value.is_finite() {
        return None;
    }
    Decimal::from_str(&value.to_string()).ok()
}

pub(crate) fn round_half_up_places(value: f64, places: i64) -> Option<f64> {
    if places < 0 {
        return None;
    }
    let decimal = to_decimal(value)?;
    if places > 28 {
        return Some(value);
    }
    decimal
        .round_dp_with_strategy(places as u32, RoundingStrategy::MidpointAwayFromZero)
        .to_f64()
}

pub(crate) fn round_half_up_significant(value: f64, figures: i64) -> Option<f64> {
    if figures < 1 {
        return None;
    }
    if value == 0.0 {
        return Some(0.0);
    }
    let magnitude = value.abs().log10().floor() as i64;
    let places = figures - 1 - magnitude;
    if places >= 0 {
        return round_half_up_places(value, places);
    }

    let shift = -places;
    if shift > 18 {
        // Outside Decimal's exact integer range; binary rounding is the
        // best remaining approximation for such magnitudes.
        let factor = 10f64.powi(shift as i32);
        return Some((value / factor).round() * factor);
    }
    let decimal = to_decimal(value)?;
    let factor = Decimal::from(10u64.pow(shift as u32));
    let scaled = decimal.checked_div(factor)?;
    let rounded = scaled.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
    rounded.checked_mul(factor)?.to_f64()
}

pub(crate) fn round_with_mode(value: f64, mode: RoundingMode, figures: f64) -> Option<f64> {
    if !figures.is_finite() || figures.fract() != 0.0 {
        return None;
    }
    match mode {
        RoundingMode::DecimalPlaces => round_half_up_places(value, figures as i64),
        RoundingMode::SignificantFigures => round_half_up_significant(value, figures as i64),
    }
}

/// `round`: nearest integer, ties toward positive infinity (so -6.5
/// rounds to -6), computed on the decimal spelling.
pub(crate) fn qti_round(value: f64) -> Option<i64> {
    let decimal = to_decimal(value)?;
    let shifted = decimal.checked_add(Decimal::new(5, 1))?;
    shifted.floor().to_i64()
}

pub(crate) fn decimal_floor(value: f64) -> Option<f64> {
    to_decimal(value)?.floor().to_f64()
}

pub(crate) fn decimal_ceil(value: f64) -> Option<f64> {
    to_decimal(value)?.ceil().to_f64()
}

/// Numeric operand collection with integer-ness tracking: the sum of
/// integers stays an integer, mixing in a float makes the result float.
pub(crate) enum NumOperands {
    Invalid(String),
    Null,
    Values { values: Vec<f64>, all_int: bool },
}

pub(crate) fn collect_numeric(operands: &[QtiValue]) -> NumOperands {
    let mut values = Vec::new();
    let mut all_int = true;
    for operand in operands {
        match operand {
            QtiValue::Invalid { reason } => return NumOperands::Invalid(reason.clone()),
            QtiValue::Null => return NumOperands::Null,
            _ => {}
        }
        let Some(scalars) = operand.scalars() else {
            return NumOperands::Invalid("numeric operator applied to a record".to_string());
        };
        for scalar in scalars {
            let Some(value) = scalar.as_f64() else {
                return NumOperands::Invalid(format!(
                    "non-numeric operand of base type {}",
                    scalar.base_type().as_str()
                ));
            };
            all_int &= scalar.is_integer();
            values.push(value);
        }
    }
    NumOperands::Values { values, all_int }
}

pub(crate) fn numeric_result(value: f64, as_int: bool) -> QtiValue {
    if !value.is_finite() {
        return QtiValue::Null;
    }
    if as_int && value.fract() == 0.0 && value.abs() < 9.2e18 {
        QtiValue::integer(value as i64)
    } else {
        QtiValue::float(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn half_up_rounding_is_decimal_accurate() {
        // Naive binary rounding of 3.175 yields 3.17.
        assert_eq!(round_half_up_places(3.175, 2), Some(3.18));
        assert_eq!(round_half_up_places(2.5, 0), Some(3.0));
        assert_eq!(round_half_up_places(-2.5, 0), Some(-3.0));
        assert_eq!(round_half_up_places(1.0, -1), None);
    }

    #[test]
    fn significant_figure_rounding_covers_both_shift_directions() {
        assert_eq!(round_half_up_significant(1234.5, 3), Some(1230.0));
        assert_eq!(round_half_up_significant(0.0012345, 2), Some(0.0012));
        assert_eq!(round_half_up_significant(9.99, 2), Some(10.0));
        assert_eq!(round_half_up_significant(0.0, 3), Some(0.0));
        assert_eq!(round_half_up_significant(1.5, 0), None);
    }

    #[test]
    fn qti_round_ties_go_toward_positive_infinity() {
        assert_eq!(qti_round(6.5), Some(7));
        assert_eq!(qti_round(-6.5), Some(-6));
        assert_eq!(qti_round(6.49), Some(6));
        assert_eq!(qti_round(f64::NAN), None);
    }

    #[test]
    fn collect_numeric_tracks_integerness_and_propagates_null() {
        let operands = vec![QtiValue::integer(1), QtiValue::integer(2)];
        let NumOperands::Values { values, all_int } = collect_numeric(&operands) else {
            panic!("expected values");
        };
        assert_eq!(values, vec![1.0, 2.0]);
        assert!(all_int);

        let operands = vec![QtiValue::integer(1), QtiValue::float(2.5)];
        let NumOperands::Values { all_int, .. } = collect_numeric(&operands) else {
            panic!("expected values");
        };
        assert!(!all_int);

        assert!(matches!(
            collect_numeric(&[QtiValue::integer(1), QtiValue::Null]),
            NumOperands::Null
        ));
        assert!(matches!(
            collect_numeric(&[QtiValue::string("x")]),
            NumOperands::Invalid(_)
        ));
    }
}
