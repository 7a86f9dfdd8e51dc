use qti_core::{BaseType, Cardinality, QtiValue, Scalar, SectionFilter};

use crate::test_ctx::TestEvalContext;

/// testVariables: collect the named variable across matching items into a
/// multiple container, optionally filtered by base type and weighted.
#[allow(clippy::too_many_arguments)]
pub(crate) fn eval_test_variables(
    test: Option<&TestEvalContext>,
    variable_identifier: &str,
    base_type: Option<BaseType>,
    weight_identifier: Option<&str>,
    section_identifier: Option<&str>,
    include_categories: &[String],
    exclude_categories: &[String],
) -> QtiValue {
    let Some(test) = test else {
        return QtiValue::Null;
    };

    let mut collected = Vec::new();
    for item in test.matching_items(section_identifier, include_categories, exclude_categories) {
        let Some(value) = item.variables.get(variable_identifier) else {
            continue;
        };
        let Some(scalars) = value.scalars() else {
            continue;
        };
        for scalar in scalars {
            if let Some(filter) = base_type {
                if scalar.base_type() != filter {
                    continue;
                }
            }
            if weight_identifier.is_some() {
                let Some(number) = scalar.as_f64() else {
                    continue;
                };
                collected.push(Scalar::Float(number * item.weight(weight_identifier)));
            } else {
                collected.push(scalar);
            }
        }
    }

    let container_type = if weight_identifier.is_some() {
        BaseType::Float
    } else {
        base_type
            .or_else(|| collected.first().map(Scalar::base_type))
            .unwrap_or(BaseType::Float)
    };
    QtiValue::container(container_type, Cardinality::Multiple, collected)
}

pub(crate) enum OutcomeExtreme {
    Minimum,
    Maximum,
}

pub(crate) fn eval_outcome_extreme(
    test: Option<&TestEvalContext>,
    extreme: OutcomeExtreme,
    outcome_identifier: &str,
    weight_identifier: Option<&str>,
    section_identifier: Option<&str>,
    include_categories: &[String],
    exclude_categories: &[String],
) -> QtiValue {
    let Some(test) = test else {
        return QtiValue::Null;
    };

    let mut best: Option<f64> = None;
    for item in test.matching_items(section_identifier, include_categories, exclude_categories) {
        let Some(number) = item
            .variables
            .get(outcome_identifier)
            .and_then(QtiValue::as_f64)
        else {
            continue;
        };
        let weighted = number * item.weight(weight_identifier);
        best = Some(match (best, &extreme) {
            (None, _) => weighted,
            (Some(current), OutcomeExtreme::Minimum) => current.min(weighted),
            (Some(current), OutcomeExtreme::Maximum) => current.max(weighted),
        });
    }

    best.map(QtiValue::float).unwrap_or(QtiValue::Null)
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum ItemCount {
    Correct,
    Incorrect,
    Presented,
    Responded,
    Selected,
}

pub(crate) fn eval_item_count(
    test: Option<&TestEvalContext>,
    count: ItemCount,
    filter: &SectionFilter,
) -> QtiValue {
    let Some(test) = test else {
        return QtiValue::Null;
    };

    let total = test
        .matching_items(
            filter.section_identifier.as_deref(),
            &filter.include_categories,
            &filter.exclude_categories,
        )
        .filter(|item| match count {
            ItemCount::Correct => item.correctness() == Some(true),
            ItemCount::Incorrect => item.correctness() == Some(false),
            ItemCount::Presented => item.presented,
            ItemCount::Responded => item.responded,
            ItemCount::Selected => item.selected,
        })
        .count();

    QtiValue::integer(total as i64)
}
