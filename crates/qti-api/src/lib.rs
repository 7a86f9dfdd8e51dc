use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use qti_compiler::{
    build_outcome_processing_ast, build_response_processing_ast, build_template_processing_ast,
    build_variable_declaration,
};
use qti_core::{
    BaseType, Cardinality, DeclarationContext, DeclarationKind, ProcessingProgram,
    ProcessingScope, QtiError, QtiValue, Scalar, VariableDeclaration, COMPLETION_STATUS,
    NUM_ATTEMPTS,
};
use qti_parser::parse_xml_document;
use qti_runtime::{
    eval_expr, exec_program, seeded_rng, CustomOperatorRegistry, EvalEnv, ExecFlow,
    TestEvalContext,
};

// Re-exported so CLI-level consumers need only this crate.
pub use qti_runtime::EmptyCustomOperatorRegistry;

const MAX_TEMPLATE_ATTEMPTS: usize = 100;

/// An item compiled once: declarations plus its processing programs.
/// Immutable after construction and safely shared across sessions.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledItem {
    pub identifier: String,
    pub declarations: Vec<VariableDeclaration>,
    pub template_processing: Option<ProcessingProgram>,
    pub response_processing: Option<ProcessingProgram>,
}

/// Compiles an `assessmentItem` document. Declaration and processing
/// children are built; presentation children (`itemBody`, stylesheets)
/// belong to the player and are ignored here.
pub fn compile_item_from_xml(xml: &str) -> Result<CompiledItem, QtiError> {
    let document = parse_xml_document(xml)?;
    let root = &document.root;

    let mut declarations = Vec::new();
    let mut template_processing = None;
    let mut response_processing = None;

    for child in root.child_elements() {
        match child.name.to_lowercase().as_str() {
            "responsedeclaration" | "outcomedeclaration" | "templatedeclaration" => {
                declarations.push(build_variable_declaration(child)?);
            }
            "templateprocessing" => {
                template_processing = Some(build_template_processing_ast(child)?);
            }
            "responseprocessing" => {
                response_processing = Some(build_response_processing_ast(child)?);
            }
            _ => {}
        }
    }

    Ok(CompiledItem {
        identifier: root
            .attr("identifier")
            .unwrap_or("item")
            .to_string(),
        declarations,
        template_processing,
        response_processing,
    })
}

/// Compiles a standalone `outcomeProcessing` document for test-level use.
pub fn compile_outcome_processing_from_xml(
    xml: &str,
    scope: ProcessingScope,
) -> Result<ProcessingProgram, QtiError> {
    let document = parse_xml_document(xml)?;
    build_outcome_processing_ast(&document.root, scope)
}

#[derive(Clone, Default)]
pub struct ItemSessionOptions {
    pub random_seed: Option<u32>,
}

/// Per-candidate state for one item: an exclusive declaration context, the
/// compiled programs, and a deterministic RNG stream.
pub struct ItemSession {
    identifier: String,
    ctx: DeclarationContext,
    template_processing: Option<ProcessingProgram>,
    response_processing: Option<ProcessingProgram>,
    rng: Box<dyn FnMut() -> f64 + Send>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringResult {
    pub item: String,
    pub score: Option<f64>,
    pub max_score: Option<f64>,
    pub completion_status: Option<String>,
    pub outcomes: BTreeMap<String, QtiValue>,
}

impl ItemSession {
    pub fn new(item: &CompiledItem, options: ItemSessionOptions) -> Self {
        let mut ctx = DeclarationContext::new();
        for declaration in &item.declarations {
            ctx.declare(declaration.clone());
        }
        Self {
            identifier: item.identifier.clone(),
            ctx,
            template_processing: item.template_processing.clone(),
            response_processing: item.response_processing.clone(),
            rng: Box::new(seeded_rng(options.random_seed.unwrap_or(1))),
        }
    }

    pub fn context(&self) -> &DeclarationContext {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut DeclarationContext {
        &mut self.ctx
    }

    /// Runs template processing, re-rolling template values while a
    /// templateConstraint reports failure, up to a bounded attempt count.
    pub fn begin(&mut self, ops: &dyn CustomOperatorRegistry) -> Result<(), QtiError> {
        let Some(program) = self.template_processing.clone() else {
            return Ok(());
        };
        for _ in 0..MAX_TEMPLATE_ATTEMPTS {
            self.ctx.reset_kind_to_defaults(DeclarationKind::Template);
            let flow = {
                let mut env = EvalEnv {
                    ctx: &mut self.ctx,
                    ops,
                    rng: &mut *self.rng,
                    test: None,
                };
                exec_program(&mut env, &program)
            };
            if flow != ExecFlow::ConstraintFailed {
                return Ok(());
            }
        }
        Err(QtiError::new(
            "API_TEMPLATE_CONSTRAINT",
            format!(
                "Template constraint for item \"{}\" still unsatisfied after {} attempts.",
                self.identifier, MAX_TEMPLATE_ATTEMPTS
            ),
        ))
    }

    pub fn set_response(&mut self, identifier: &str, value: QtiValue) {
        self.ctx.set_value(identifier, value);
    }

    /// One scoring attempt: bump numAttempts, reset outcomes to their
    /// defaults, run response processing, read the outcome declarations.
    pub fn score_attempt(&mut self, ops: &dyn CustomOperatorRegistry) -> ScoringResult {
        let attempts = self
            .ctx
            .get_value(NUM_ATTEMPTS)
            .as_f64()
            .unwrap_or(0.0) as i64;
        self.ctx
            .set_value(NUM_ATTEMPTS, QtiValue::integer(attempts + 1));
        self.ctx.reset_kind_to_defaults(DeclarationKind::Outcome);

        if let Some(program) = &self.response_processing {
            let mut env = EvalEnv {
                ctx: &mut self.ctx,
                ops,
                rng: &mut *self.rng,
                test: None,
            };
            exec_program(&mut env, program);
        }

        self.scoring_result()
    }

    fn scoring_result(&self) -> ScoringResult {
        let mut outcomes = BTreeMap::new();
        for declaration in self.ctx.declarations() {
            if declaration.kind == DeclarationKind::Outcome {
                outcomes.insert(declaration.identifier.clone(), declaration.value.clone());
            }
        }
        ScoringResult {
            item: self.identifier.clone(),
            score: self.ctx.get_value("SCORE").as_f64(),
            max_score: self.ctx.get_value("MAXSCORE").as_f64(),
            completion_status: self
                .ctx
                .get_value(COMPLETION_STATUS)
                .as_str()
                .map(str::to_string),
            outcomes,
        }
    }
}

/// Applies a test-scope outcome program against an outcome context.
pub fn run_outcome_processing(
    ctx: &mut DeclarationContext,
    program: &ProcessingProgram,
    test: Option<&TestEvalContext>,
    ops: &dyn CustomOperatorRegistry,
    rng: &mut dyn FnMut() -> f64,
) -> ExecFlow {
    let mut env = EvalEnv {
        ctx,
        ops,
        rng,
        test,
    };
    exec_program(&mut env, program)
}

/// Evaluates a single expression against a context; exposed for hosts
/// that embed expressions outside full processing programs.
pub fn eval_expression(
    ctx: &mut DeclarationContext,
    expr: &qti_core::ExpressionNode,
    ops: &dyn CustomOperatorRegistry,
    rng: &mut dyn FnMut() -> f64,
    test: Option<&TestEvalContext>,
) -> QtiValue {
    let mut env = EvalEnv {
        ctx,
        ops,
        rng,
        test,
    };
    eval_expr(&mut env, expr)
}

/// Coerces a JSON response payload by the declared base type and
/// cardinality. JSON null is a Null response; anything uninterpretable
/// is Invalid, never an error.
pub fn qti_value_from_json(declaration: &VariableDeclaration, json: &JsonValue) -> QtiValue {
    match json {
        JsonValue::Null => QtiValue::Null,
        JsonValue::Array(items) => match declaration.cardinality {
            Cardinality::Multiple | Cardinality::Ordered => {
                let mut scalars = Vec::with_capacity(items.len());
                for item in items {
                    match scalar_from_json(declaration.base_type, item) {
                        Some(scalar) => scalars.push(scalar),
                        None => {
                            return QtiValue::invalid(format!(
                                "response entry {} does not fit declared type",
                                item
                            ));
                        }
                    }
                }
                let base_type = declaration
                    .base_type
                    .or_else(|| scalars.first().map(Scalar::base_type))
                    .unwrap_or(BaseType::String);
                QtiValue::container(base_type, declaration.cardinality, scalars)
            }
            _ => QtiValue::invalid("array response for a non-container declaration"),
        },
        JsonValue::Object(fields) => {
            if declaration.cardinality != Cardinality::Record {
                return QtiValue::invalid("object response for a non-record declaration");
            }
            let mut record = BTreeMap::new();
            for (key, value) in fields {
                let field = match scalar_from_json(None, value) {
                    Some(scalar) => QtiValue::single(scalar),
                    None if value.is_null() => QtiValue::Null,
                    None => {
                        return QtiValue::invalid(format!(
                            "record field \"{}\" does not fit any scalar type",
                            key
                        ));
                    }
                };
                record.insert(key.clone(), field);
            }
            QtiValue::Record { fields: record }
        }
        single => match scalar_from_json(declaration.base_type, single) {
            Some(scalar) => QtiValue::single(scalar),
            None => QtiValue::invalid(format!(
                "response {} does not fit declared type",
                single
            )),
        },
    }
}

fn scalar_from_json(base_type: Option<BaseType>, json: &JsonValue) -> Option<Scalar> {
    match (base_type, json) {
        (Some(base_type), JsonValue::String(raw)) => Scalar::parse(base_type, raw),
        (Some(BaseType::Boolean), JsonValue::Bool(flag)) => Some(Scalar::Bool(*flag)),
        (Some(BaseType::Integer), JsonValue::Number(number)) => number.as_i64().map(Scalar::Int),
        (Some(BaseType::Float), JsonValue::Number(number)) => {
            number.as_f64().filter(|value| value.is_finite()).map(Scalar::Float)
        }
        (Some(BaseType::Duration), JsonValue::Number(number)) => number
            .as_f64()
            .filter(|value| value.is_finite())
            .map(Scalar::Duration),
        (None, JsonValue::Bool(flag)) => Some(Scalar::Bool(*flag)),
        (None, JsonValue::Number(number)) => match number.as_i64() {
            Some(value) => Some(Scalar::Int(value)),
            None => number.as_f64().filter(|value| value.is_finite()).map(Scalar::Float),
        },
        (None, JsonValue::String(raw)) => Some(Scalar::Str(raw.clone())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static EMPTY_OPS: EmptyCustomOperatorRegistry = EmptyCustomOperatorRegistry;

    const CHOICE_ITEM: &str = r#"
<assessmentItem identifier="choice-basic">
  <responseDeclaration identifier="RESPONSE" cardinality="single" baseType="identifier">
    <correctResponse><value>choiceA</value></correctResponse>
  </responseDeclaration>
  <outcomeDeclaration identifier="SCORE" cardinality="single" baseType="float">
    <defaultValue><value>0</value></defaultValue>
  </outcomeDeclaration>
  <outcomeDeclaration identifier="MAXSCORE" cardinality="single" baseType="float">
    <defaultValue><value>1</value></defaultValue>
  </outcomeDeclaration>
  <itemBody>ignored by the engine</itemBody>
  <responseProcessing>
    <responseCondition>
      <responseIf>
        <match>
          <variable identifier="RESPONSE"/>
          <correct identifier="RESPONSE"/>
        </match>
        <setOutcomeValue identifier="SCORE">
          <baseValue baseType="float">1.0</baseValue>
        </setOutcomeValue>
      </responseIf>
      <responseElse>
        <setOutcomeValue identifier="SCORE">
          <baseValue baseType="float">0.0</baseValue>
        </setOutcomeValue>
      </responseElse>
    </responseCondition>
    <setOutcomeValue identifier="completionStatus">
      <baseValue baseType="identifier">completed</baseValue>
    </setOutcomeValue>
  </responseProcessing>
</assessmentItem>"#;

    #[test]
    fn end_to_end_correct_response_scores_one() {
        let item = compile_item_from_xml(CHOICE_ITEM).expect("item should compile");
        let mut session = ItemSession::new(&item, ItemSessionOptions::default());
        session.begin(&EMPTY_OPS).expect("begin should pass");

        session.set_response("RESPONSE", QtiValue::identifier("choiceA"));
        let result = session.score_attempt(&EMPTY_OPS);
        assert_eq!(result.score, Some(1.0));
        assert_eq!(result.max_score, Some(1.0));
        assert_eq!(result.completion_status.as_deref(), Some("completed"));

        session.set_response("RESPONSE", QtiValue::identifier("choiceB"));
        let result = session.score_attempt(&EMPTY_OPS);
        assert_eq!(result.score, Some(0.0));
    }

    #[test]
    fn num_attempts_counts_scoring_attempts() {
        let item = compile_item_from_xml(CHOICE_ITEM).expect("item should compile");
        let mut session = ItemSession::new(&item, ItemSessionOptions::default());
        session.begin(&EMPTY_OPS).expect("begin should pass");
        session.score_attempt(&EMPTY_OPS);
        session.score_attempt(&EMPTY_OPS);
        assert_eq!(
            session.context().get_value(NUM_ATTEMPTS),
            QtiValue::integer(2)
        );
    }

    #[test]
    fn build_errors_surface_as_compile_failures() {
        let bad = r#"
<assessmentItem identifier="broken">
  <responseProcessing><scoreHarder/></responseProcessing>
</assessmentItem>"#;
        let error = compile_item_from_xml(bad).expect_err("unknown tag should fail");
        assert_eq!(error.code, "AST_UNKNOWN_STATEMENT");
    }

    const TEMPLATE_ITEM: &str = r#"
<assessmentItem identifier="dice">
  <templateDeclaration identifier="DIE" cardinality="single" baseType="integer"/>
  <responseDeclaration identifier="RESPONSE" cardinality="single" baseType="integer"/>
  <outcomeDeclaration identifier="SCORE" cardinality="single" baseType="float">
    <defaultValue><value>0</value></defaultValue>
  </outcomeDeclaration>
  <templateProcessing>
    <setTemplateValue identifier="DIE">
      <randomInteger min="1" max="6"/>
    </setTemplateValue>
    <templateConstraint>
      <gte><variable identifier="DIE"/><baseValue baseType="integer">3</baseValue></gte>
    </templateConstraint>
    <setCorrectResponse identifier="RESPONSE">
      <variable identifier="DIE"/>
    </setCorrectResponse>
  </templateProcessing>
</assessmentItem>"#;

    #[test]
    fn template_constraint_rerolls_until_satisfied() {
        let item = compile_item_from_xml(TEMPLATE_ITEM).expect("item should compile");
        let mut session = ItemSession::new(
            &item,
            ItemSessionOptions {
                random_seed: Some(99),
            },
        );
        session.begin(&EMPTY_OPS).expect("constraint is satisfiable");
        let die = session
            .context()
            .get_value("DIE")
            .as_f64()
            .expect("DIE should hold a number");
        assert!(die >= 3.0);
        assert_eq!(
            session.context().get_correct_response("RESPONSE"),
            session.context().get_value("DIE")
        );
    }

    #[test]
    fn unsatisfiable_template_constraint_errors_after_bounded_retries() {
        let impossible = r#"
<assessmentItem identifier="impossible">
  <templateDeclaration identifier="T" cardinality="single" baseType="integer"/>
  <templateProcessing>
    <templateConstraint>
      <baseValue baseType="boolean">false</baseValue>
    </templateConstraint>
  </templateProcessing>
</assessmentItem>"#;
        let item = compile_item_from_xml(impossible).expect("item should compile");
        let mut session = ItemSession::new(&item, ItemSessionOptions::default());
        let error = session.begin(&EMPTY_OPS).expect_err("should exhaust retries");
        assert_eq!(error.code, "API_TEMPLATE_CONSTRAINT");
    }

    #[test]
    fn same_seed_produces_identical_template_rolls() {
        let item = compile_item_from_xml(TEMPLATE_ITEM).expect("item should compile");
        let options = ItemSessionOptions {
            random_seed: Some(7),
        };
        let mut first = ItemSession::new(&item, options.clone());
        first.begin(&EMPTY_OPS).expect("begin");
        let mut second = ItemSession::new(&item, options);
        second.begin(&EMPTY_OPS).expect("begin");
        assert_eq!(
            first.context().get_value("DIE"),
            second.context().get_value("DIE")
        );
    }

    #[test]
    fn json_responses_coerce_by_declared_type() {
        let item = compile_item_from_xml(CHOICE_ITEM).expect("item should compile");
        let declaration = item
            .declarations
            .iter()
            .find(|declaration| declaration.identifier == "RESPONSE")
            .expect("RESPONSE declared");

        assert_eq!(
            qti_value_from_json(declaration, &serde_json::json!("choiceA")),
            QtiValue::identifier("choiceA")
        );
        assert_eq!(
            qti_value_from_json(declaration, &serde_json::json!(null)),
            QtiValue::Null
        );
        assert!(
            qti_value_from_json(declaration, &serde_json::json!(["a", "b"])).is_invalid()
        );

        let mut container = VariableDeclaration::new(
            "MANY",
            DeclarationKind::Response,
            Some(BaseType::Integer),
            Cardinality::Multiple,
        );
        container.value = QtiValue::Null;
        assert_eq!(
            qti_value_from_json(&container, &serde_json::json!([1, 2])),
            QtiValue::container(
                BaseType::Integer,
                Cardinality::Multiple,
                vec![Scalar::Int(1), Scalar::Int(2)],
            )
        );
    }

    #[test]
    fn outcome_processing_runs_against_a_test_context() {
        use qti_runtime::TestItemView;

        let program = compile_outcome_processing_from_xml(
            r#"
<outcomeProcessing>
  <setOutcomeValue identifier="TOTAL">
    <sum><testVariables variableIdentifier="SCORE"/></sum>
  </setOutcomeValue>
</outcomeProcessing>"#,
            ProcessingScope::Test,
        )
        .expect("program should build");

        let mut ctx = DeclarationContext::new();
        let mut total = VariableDeclaration::new(
            "TOTAL",
            DeclarationKind::Outcome,
            Some(BaseType::Float),
            Cardinality::Single,
        );
        total.default_value = QtiValue::float(0.0);
        ctx.declare(total);

        let mut item = TestItemView {
            identifier: "i1".to_string(),
            ..TestItemView::default()
        };
        item.variables
            .insert("SCORE".to_string(), QtiValue::float(0.75));
        let mut other = TestItemView {
            identifier: "i2".to_string(),
            ..TestItemView::default()
        };
        other
            .variables
            .insert("SCORE".to_string(), QtiValue::float(1.0));
        let test = TestEvalContext {
            items: vec![item, other],
        };

        let mut rng = seeded_rng(1);
        let flow = run_outcome_processing(&mut ctx, &program, Some(&test), &EMPTY_OPS, &mut rng);
        assert_eq!(flow, ExecFlow::Continue);
        assert_eq!(ctx.get_value("TOTAL"), QtiValue::float(1.75));
    }
}
