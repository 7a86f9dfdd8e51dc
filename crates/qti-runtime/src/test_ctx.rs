use std::collections::BTreeMap;

use qti_core::QtiValue;

/// One item's contribution to the test-level view: its variable values,
/// section membership path, categories, weights, and attempt flags.
#[derive(Debug, Clone, Default)]
pub struct TestItemView {
    pub identifier: String,
    pub section_path: Vec<String>,
    pub categories: Vec<String>,
    pub is_correct: Option<bool>,
    pub presented: bool,
    pub responded: bool,
    pub selected: bool,
    pub variables: BTreeMap<String, QtiValue>,
    pub weights: BTreeMap<String, f64>,
}

impl TestItemView {
    pub fn weight(&self, identifier: Option<&str>) -> f64 {
        identifier
            .and_then(|id| self.weights.get(id).copied())
            .unwrap_or(1.0)
    }

    /// Explicit flag first, `SCORE == MAXSCORE` heuristic when absent.
    pub fn correctness(&self) -> Option<bool> {
        if self.is_correct.is_some() {
            return self.is_correct;
        }
        let score = self.variables.get("SCORE")?.as_f64()?;
        let max_score = self.variables.get("MAXSCORE")?.as_f64()?;
        Some(score == max_score)
    }
}

/// Read-only cross-item view consumed by test-scope expressions only.
#[derive(Debug, Clone, Default)]
pub struct TestEvalContext {
    pub items: Vec<TestItemView>,
}

impl TestEvalContext {
    pub fn matching_items<'a>(
        &'a self,
        section_identifier: Option<&'a str>,
        include_categories: &'a [String],
        exclude_categories: &'a [String],
    ) -> impl Iterator<Item = &'a TestItemView> {
        self.items.iter().filter(move |item| {
            if let Some(section) = section_identifier {
                if !item.section_path.iter().any(|entry| entry == section) {
                    return false;
                }
            }
            if !include_categories.is_empty()
                && !item
                    .categories
                    .iter()
                    .any(|category| include_categories.contains(category))
            {
                return false;
            }
            if item
                .categories
                .iter()
                .any(|category| exclude_categories.contains(category))
            {
                return false;
            }
            true
        })
    }
}
