use qti_core::{ConditionBlock, ProcessingProgram, StatementNode, StmtKind};

use crate::eval::{eval_expr, EvalEnv};
use crate::mapping::lookup_declared_table;

/// Explicit control-flow result threaded through nested conditional
/// bodies; exits are values, never errors or unwinding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecFlow {
    Continue,
    ExitResponse,
    ExitTemplate,
    ExitTest,
    /// A templateConstraint evaluated to something other than true; the
    /// caller decides whether to re-roll template values.
    ConstraintFailed,
}

/// Runs the program's statements in order against the declaration
/// context. Statement execution never raises; data problems surface as
/// stored Null/Invalid values.
pub fn exec_program(env: &mut EvalEnv<'_>, program: &ProcessingProgram) -> ExecFlow {
    exec_statements(env, &program.statements)
}

fn exec_statements(env: &mut EvalEnv<'_>, statements: &[StatementNode]) -> ExecFlow {
    for statement in statements {
        match exec_statement(env, statement) {
            ExecFlow::Continue => {}
            flow => return flow,
        }
    }
    ExecFlow::Continue
}

fn exec_statement(env: &mut EvalEnv<'_>, statement: &StatementNode) -> ExecFlow {
    match &statement.kind {
        StmtKind::SetOutcomeValue { identifier, expr }
        | StmtKind::SetResponseValue { identifier, expr }
        | StmtKind::SetTemplateValue { identifier, expr } => {
            let value = eval_expr(env, expr);
            env.ctx.set_value(identifier, value);
            ExecFlow::Continue
        }
        StmtKind::SetCorrectResponse { identifier, expr } => {
            let value = eval_expr(env, expr);
            env.ctx.set_correct_response(identifier, value);
            ExecFlow::Continue
        }
        StmtKind::SetDefaultValue { identifier, expr } => {
            let value = eval_expr(env, expr);
            env.ctx.set_default_value(identifier, value);
            ExecFlow::Continue
        }
        StmtKind::LookupOutcomeValue { identifier, expr } => {
            let source = eval_expr(env, expr);
            let looked_up =
                lookup_declared_table(env.ctx.get_declaration(identifier), &source, identifier);
            env.ctx.set_value(identifier, looked_up);
            ExecFlow::Continue
        }
        StmtKind::ExitResponse => ExecFlow::ExitResponse,
        StmtKind::ExitTemplate => ExecFlow::ExitTemplate,
        StmtKind::ExitTest => ExecFlow::ExitTest,
        StmtKind::TemplateConstraint { expr } => {
            if eval_expr(env, expr).is_true() {
                ExecFlow::Continue
            } else {
                ExecFlow::ConstraintFailed
            }
        }
        StmtKind::ResponseCondition(block)
        | StmtKind::TemplateCondition(block)
        | StmtKind::OutcomeCondition(block) => exec_condition(env, block),
    }
}

/// Branch conditions run in order; only a concrete boolean true selects
/// a branch, Null/Invalid/false all fall through.
fn exec_condition(env: &mut EvalEnv<'_>, block: &ConditionBlock) -> ExecFlow {
    for branch in &block.branches {
        if eval_expr(env, &branch.condition).is_true() {
            return exec_statements(env, &branch.statements);
        }
    }
    if let Some(statements) = &block.else_branch {
        return exec_statements(env, statements);
    }
    ExecFlow::Continue
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::EmptyCustomOperatorRegistry;
    use crate::rng::seeded_rng;
    use qti_core::{
        BaseType, Cardinality, DeclarationContext, DeclarationKind, LookupTable, MatchTable,
        MatchTableEntry, ProcessingScope, QtiValue, Scalar, VariableDeclaration,
    };
    use qti_parser::parse_xml_document;

    static EMPTY_OPS: EmptyCustomOperatorRegistry = EmptyCustomOperatorRegistry;

    fn response_program(xml: &str) -> ProcessingProgram {
        let document = parse_xml_document(xml).expect("test xml should parse");
        qti_compiler::build_response_processing_ast(&document.root)
            .expect("program should build")
    }

    fn template_program(xml: &str) -> ProcessingProgram {
        let document = parse_xml_document(xml).expect("test xml should parse");
        qti_compiler::build_template_processing_ast(&document.root)
            .expect("program should build")
    }

    fn outcome_program(xml: &str) -> ProcessingProgram {
        let document = parse_xml_document(xml).expect("test xml should parse");
        qti_compiler::build_outcome_processing_ast(&document.root, ProcessingScope::Test)
            .expect("program should build")
    }

    fn scoring_context() -> DeclarationContext {
        let mut ctx = DeclarationContext::new();

        let mut response = VariableDeclaration::new(
            "RESPONSE",
            DeclarationKind::Response,
            Some(BaseType::Identifier),
            Cardinality::Single,
        );
        response.correct_response = QtiValue::identifier("choiceA");
        ctx.declare(response);

        let mut score = VariableDeclaration::new(
            "SCORE",
            DeclarationKind::Outcome,
            Some(BaseType::Float),
            Cardinality::Single,
        );
        score.default_value = QtiValue::float(0.0);
        score.value = QtiValue::float(0.0);
        ctx.declare(score);

        ctx
    }

    fn run(ctx: &mut DeclarationContext, program: &ProcessingProgram) -> ExecFlow {
        let mut rng = seeded_rng(1);
        let mut env = EvalEnv {
            ctx,
            ops: &EMPTY_OPS,
            rng: &mut rng,
            test: None,
        };
        exec_program(&mut env, program)
    }

    const MATCH_CORRECT: &str = r#"
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
</responseProcessing>"#;

    #[test]
    fn match_correct_scores_one_and_anything_else_scores_zero() {
        let program = response_program(MATCH_CORRECT);

        let mut ctx = scoring_context();
        ctx.set_value("RESPONSE", QtiValue::identifier("choiceA"));
        assert_eq!(run(&mut ctx, &program), ExecFlow::Continue);
        assert_eq!(ctx.get_value("SCORE"), QtiValue::float(1.0));

        let mut ctx = scoring_context();
        ctx.set_value("RESPONSE", QtiValue::identifier("choiceB"));
        run(&mut ctx, &program);
        assert_eq!(ctx.get_value("SCORE"), QtiValue::float(0.0));
    }

    #[test]
    fn null_condition_falls_through_to_else() {
        let program = response_program(MATCH_CORRECT);
        // RESPONSE stays Null: match yields Null, which must not run the
        // if-branch.
        let mut ctx = scoring_context();
        run(&mut ctx, &program);
        assert_eq!(ctx.get_value("SCORE"), QtiValue::float(0.0));
    }

    #[test]
    fn exit_response_stops_later_statements_even_from_nested_bodies() {
        let program = response_program(
            r#"
<responseProcessing>
  <responseCondition>
    <responseIf>
      <baseValue baseType="boolean">true</baseValue>
      <exitResponse/>
    </responseIf>
  </responseCondition>
  <setOutcomeValue identifier="SCORE">
    <baseValue baseType="float">9.0</baseValue>
  </setOutcomeValue>
</responseProcessing>"#,
        );
        let mut ctx = scoring_context();
        assert_eq!(run(&mut ctx, &program), ExecFlow::ExitResponse);
        assert_eq!(ctx.get_value("SCORE"), QtiValue::float(0.0));
    }

    #[test]
    fn exit_test_flows_out_of_outcome_processing() {
        let program = outcome_program(
            r#"
<outcomeProcessing>
  <exitTest/>
</outcomeProcessing>"#,
        );
        let mut ctx = scoring_context();
        assert_eq!(run(&mut ctx, &program), ExecFlow::ExitTest);
    }

    #[test]
    fn template_constraint_signals_instead_of_raising() {
        let program = template_program(
            r#"
<templateProcessing>
  <templateConstraint>
    <baseValue baseType="boolean">false</baseValue>
  </templateConstraint>
</templateProcessing>"#,
        );
        let mut ctx = scoring_context();
        assert_eq!(run(&mut ctx, &program), ExecFlow::ConstraintFailed);
    }

    #[test]
    fn else_if_branches_run_in_order() {
        let program = response_program(
            r#"
<responseProcessing>
  <responseCondition>
    <responseIf>
      <baseValue baseType="boolean">false</baseValue>
      <setOutcomeValue identifier="SCORE"><baseValue baseType="float">1</baseValue></setOutcomeValue>
    </responseIf>
    <responseElseIf>
      <baseValue baseType="boolean">true</baseValue>
      <setOutcomeValue identifier="SCORE"><baseValue baseType="float">2</baseValue></setOutcomeValue>
    </responseElseIf>
    <responseElse>
      <setOutcomeValue identifier="SCORE"><baseValue baseType="float">3</baseValue></setOutcomeValue>
    </responseElse>
  </responseCondition>
</responseProcessing>"#,
        );
        let mut ctx = scoring_context();
        run(&mut ctx, &program);
        assert_eq!(ctx.get_value("SCORE"), QtiValue::float(2.0));
    }

    #[test]
    fn lookup_outcome_value_applies_the_declared_table() {
        let mut ctx = scoring_context();
        let mut grade = VariableDeclaration::new(
            "GRADE",
            DeclarationKind::Outcome,
            Some(BaseType::Identifier),
            Cardinality::Single,
        );
        grade.lookup_table = Some(LookupTable::Match(MatchTable {
            default_value: Some(Scalar::Identifier("F".to_string())),
            entries: vec![MatchTableEntry {
                source: Scalar::Int(1),
                target: Scalar::Identifier("A".to_string()),
            }],
        }));
        ctx.declare(grade);
        ctx.set_value("SCORE", QtiValue::float(1.0));

        let program = response_program(
            r#"
<responseProcessing>
  <lookupOutcomeValue identifier="GRADE">
    <variable identifier="SCORE"/>
  </lookupOutcomeValue>
</responseProcessing>"#,
        );
        run(&mut ctx, &program);
        assert_eq!(ctx.get_value("GRADE"), QtiValue::identifier("A"));
    }

    #[test]
    fn set_correct_response_and_default_value_write_their_slots() {
        let program = template_program(
            r#"
<templateProcessing>
  <setCorrectResponse identifier="RESPONSE">
    <baseValue baseType="identifier">choiceC</baseValue>
  </setCorrectResponse>
  <setDefaultValue identifier="SCORE">
    <baseValue baseType="float">0.5</baseValue>
  </setDefaultValue>
</templateProcessing>"#,
        );
        let mut ctx = scoring_context();
        run(&mut ctx, &program);
        assert_eq!(
            ctx.get_correct_response("RESPONSE"),
            QtiValue::identifier("choiceC")
        );
        assert_eq!(ctx.get_default_value("SCORE"), QtiValue::float(0.5));
    }

    #[test]
    fn re_execution_with_the_same_inputs_is_idempotent() {
        let program = response_program(MATCH_CORRECT);
        let mut ctx = scoring_context();
        ctx.set_value("RESPONSE", QtiValue::identifier("choiceA"));

        run(&mut ctx, &program);
        let first = ctx.get_value("SCORE");
        run(&mut ctx, &program);
        let second = ctx.get_value("SCORE");
        assert_eq!(first, second);
    }
}
