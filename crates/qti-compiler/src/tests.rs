use qti_core::{
    Cardinality, DeclarationKind, ExprKind, LookupTable, NumericArg, ProcessingScope, QtiValue,
    RoundingMode, Scalar, StmtKind, ToleranceMode,
};
use qti_parser::{parse_xml_document, XmlElementNode};

use crate::{
    build_expression, build_outcome_processing_ast, build_response_processing_ast,
    build_template_processing_ast, build_variable_declaration,
};

fn root(xml: &str) -> XmlElementNode {
    parse_xml_document(xml).expect("test xml should parse").root
}

#[test]
fn builds_response_condition_with_match_branches() {
    let el = root(
        r#"
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
</responseProcessing>
"#,
    );

    let program = build_response_processing_ast(&el).expect("program should build");
    assert_eq!(program.statements.len(), 1);

    let StmtKind::ResponseCondition(block) = &program.statements[0].kind else {
        panic!("expected responseCondition");
    };
    assert_eq!(block.branches.len(), 1);
    assert!(block.else_branch.is_some());
    assert!(matches!(
        block.branches[0].condition.kind,
        ExprKind::Match { .. }
    ));
    assert_eq!(block.branches[0].statements.len(), 1);
}

#[test]
fn unknown_statement_tag_is_a_hard_error() {
    let el = root(r#"<responseProcessing><scoreEverything/></responseProcessing>"#);
    let error = build_response_processing_ast(&el).expect_err("unknown tag should fail");
    assert_eq!(error.code, "AST_UNKNOWN_STATEMENT");
    assert!(error.message.contains("scoreEverything"));
}

#[test]
fn unknown_expression_tag_is_a_hard_error() {
    let el = root(
        r#"
<responseProcessing>
  <setOutcomeValue identifier="SCORE"><fancyOperator/></setOutcomeValue>
</responseProcessing>
"#,
    );
    let error = build_response_processing_ast(&el).expect_err("unknown tag should fail");
    assert_eq!(error.code, "AST_UNKNOWN_EXPRESSION");
    assert!(error.message.contains("fancyOperator"));
}

#[test]
fn wrong_mode_statement_is_skipped_silently() {
    let el = root(
        r#"
<responseProcessing>
  <exitTemplate/>
  <setTemplateValue identifier="X"><baseValue baseType="integer">1</baseValue></setTemplateValue>
</responseProcessing>
"#,
    );
    let program = build_response_processing_ast(&el).expect("known tags should not fail");
    assert!(program.statements.is_empty());
}

#[test]
fn xinclude_fails_with_inline_directive() {
    let el = root(
        r#"<responseProcessing xmlns:xi="http://www.w3.org/2001/XInclude"><xi:include href="rules.xml"/></responseProcessing>"#,
    );
    let error = build_response_processing_ast(&el).expect_err("xi:include should fail");
    assert_eq!(error.code, "AST_XINCLUDE_UNSUPPORTED");
    assert!(error.message.contains("inline"));
}

#[test]
fn fragments_are_inlined_in_place() {
    let el = root(
        r#"
<responseProcessing>
  <responseProcessingFragment>
    <setOutcomeValue identifier="SCORE"><baseValue baseType="float">1</baseValue></setOutcomeValue>
  </responseProcessingFragment>
  <exitResponse/>
</responseProcessing>
"#,
    );
    let program = build_response_processing_ast(&el).expect("fragment should inline");
    assert_eq!(program.statements.len(), 2);
    assert!(matches!(
        program.statements[0].kind,
        StmtKind::SetOutcomeValue { .. }
    ));
    assert!(matches!(program.statements[1].kind, StmtKind::ExitResponse));
}

#[test]
fn condition_without_if_branch_fails() {
    let el = root(
        r#"
<responseProcessing>
  <responseCondition>
    <responseElse><exitResponse/></responseElse>
  </responseCondition>
</responseProcessing>
"#,
    );
    let error = build_response_processing_ast(&el).expect_err("missing if should fail");
    assert_eq!(error.code, "AST_CHILD_ARITY");
}

#[test]
fn binary_operator_arity_is_enforced() {
    let el = root(r#"<match><variable identifier="A"/></match>"#);
    let error =
        build_expression(&el, ProcessingScope::Item).expect_err("one child should fail");
    assert_eq!(error.code, "AST_CHILD_ARITY");
    assert!(error.message.contains("match"));

    let el = root(r#"<sum/>"#);
    let error =
        build_expression(&el, ProcessingScope::Item).expect_err("empty n-ary should fail");
    assert_eq!(error.code, "AST_CHILD_ARITY");
}

#[test]
fn missing_required_attribute_names_the_tag() {
    let el = root(r#"<variable/>"#);
    let error = build_expression(&el, ProcessingScope::Item).expect_err("should fail");
    assert_eq!(error.code, "AST_MISSING_ATTR");
    assert!(error.message.contains("variable"));
}

#[test]
fn base_value_payload_must_parse_as_its_base_type() {
    let el = root(r#"<baseValue baseType="integer">three</baseValue>"#);
    let error = build_expression(&el, ProcessingScope::Item).expect_err("should fail");
    assert_eq!(error.code, "AST_VALUE_INVALID");

    let el = root(r#"<baseValue baseType="pair">A B</baseValue>"#);
    let expr = build_expression(&el, ProcessingScope::Item).expect("pair should parse");
    assert!(matches!(
        expr.kind,
        ExprKind::BaseValue {
            value: Scalar::Pair(_, _),
            ..
        }
    ));
}

#[test]
fn random_integer_attr_form_coerces_literal_or_variable() {
    let el = root(r#"<randomInteger min="2" max="MAX_VALUE" step="2"/>"#);
    let expr = build_expression(&el, ProcessingScope::Item).expect("should build");
    let ExprKind::RandomInteger { min, max, step } = expr.kind else {
        panic!("expected randomInteger");
    };
    assert_eq!(min, NumericArg::Literal(2.0));
    assert_eq!(max, NumericArg::Variable("MAX_VALUE".to_string()));
    assert_eq!(step, NumericArg::Literal(2.0));
}

#[test]
fn random_integer_legacy_two_child_form_builds_expressions() {
    let el = root(
        r#"
<randomInteger>
  <baseValue baseType="integer">1</baseValue>
  <variable identifier="MAX"/>
</randomInteger>
"#,
    );
    let expr = build_expression(&el, ProcessingScope::Item).expect("legacy form should build");
    let ExprKind::RandomInteger { min, max, step } = expr.kind else {
        panic!("expected randomInteger");
    };
    assert!(matches!(min, NumericArg::Expr(_)));
    assert!(matches!(max, NumericArg::Expr(_)));
    assert_eq!(step, NumericArg::Literal(1.0));
}

#[test]
fn equal_rounded_accepts_legacy_singular_spelling() {
    let el = root(
        r#"
<equalRounded roundingMode="decimalPlace" figures="2">
  <baseValue baseType="float">3.175</baseValue>
  <baseValue baseType="float">3.18</baseValue>
</equalRounded>
"#,
    );
    let expr = build_expression(&el, ProcessingScope::Item).expect("legacy spelling should build");
    let ExprKind::EqualRounded { rounding_mode, .. } = expr.kind else {
        panic!("expected equalRounded");
    };
    assert_eq!(rounding_mode, RoundingMode::DecimalPlaces);
}

#[test]
fn equal_requires_tolerance_for_non_exact_modes() {
    let el = root(
        r#"
<equal toleranceMode="absolute">
  <baseValue baseType="float">1</baseValue>
  <baseValue baseType="float">1</baseValue>
</equal>
"#,
    );
    let error = build_expression(&el, ProcessingScope::Item).expect_err("should fail");
    assert_eq!(error.code, "AST_MISSING_ATTR");

    let el = root(
        r#"
<equal toleranceMode="absolute" tolerance="0.5 T_UPPER" includeUpperBound="false">
  <baseValue baseType="float">1</baseValue>
  <baseValue baseType="float">1.4</baseValue>
</equal>
"#,
    );
    let expr = build_expression(&el, ProcessingScope::Item).expect("should build");
    let ExprKind::Equal { params, .. } = expr.kind else {
        panic!("expected equal");
    };
    assert_eq!(params.tolerance_mode, ToleranceMode::Absolute);
    assert_eq!(params.tolerance.len(), 2);
    assert_eq!(params.tolerance[0], NumericArg::Literal(0.5));
    assert_eq!(
        params.tolerance[1],
        NumericArg::Variable("T_UPPER".to_string())
    );
    assert!(params.include_lower_bound);
    assert!(!params.include_upper_bound);
}

#[test]
fn test_scope_expressions_fail_in_item_scope() {
    for xml in [
        r#"<testVariables variableIdentifier="SCORE"/>"#,
        r#"<outcomeMinimum outcomeIdentifier="SCORE"/>"#,
        r#"<outcomeMaximum outcomeIdentifier="SCORE"/>"#,
        r#"<numberCorrect/>"#,
        r#"<numberIncorrect/>"#,
        r#"<numberPresented/>"#,
        r#"<numberResponded/>"#,
        r#"<numberSelected/>"#,
    ] {
        let el = root(xml);
        let error =
            build_expression(&el, ProcessingScope::Item).expect_err("item scope should fail");
        assert_eq!(error.code, "AST_TEST_SCOPE_REQUIRED");
    }

    let el = root(r#"<numberCorrect sectionIdentifier="S1" includeCategory="math physics"/>"#);
    let expr = build_expression(&el, ProcessingScope::Test).expect("test scope should build");
    let ExprKind::NumberCorrect(filter) = expr.kind else {
        panic!("expected numberCorrect");
    };
    assert_eq!(filter.section_identifier.as_deref(), Some("S1"));
    assert_eq!(filter.include_categories, vec!["math", "physics"]);
}

#[test]
fn outcome_processing_accepts_test_aggregates_in_test_scope() {
    let el = root(
        r#"
<outcomeProcessing>
  <setOutcomeValue identifier="TOTAL">
    <sum><testVariables variableIdentifier="SCORE"/></sum>
  </setOutcomeValue>
</outcomeProcessing>
"#,
    );
    let program =
        build_outcome_processing_ast(&el, ProcessingScope::Test).expect("should build");
    assert_eq!(program.statements.len(), 1);

    let error = build_outcome_processing_ast(&el, ProcessingScope::Item)
        .expect_err("item scope should fail");
    assert_eq!(error.code, "AST_TEST_SCOPE_REQUIRED");
}

#[test]
fn lookup_table_expression_validates_table_child() {
    let el = root(
        r#"
<lookupTable>
  <variable identifier="RAW"/>
  <interpolationTable defaultValue="0">
    <interpolationTableEntry sourceValue="100" targetValue="10"/>
    <interpolationTableEntry sourceValue="0" targetValue="0"/>
  </interpolationTable>
</lookupTable>
"#,
    );
    let expr = build_expression(&el, ProcessingScope::Item).expect("should build");
    let ExprKind::LookupTable { table, .. } = expr.kind else {
        panic!("expected lookupTable");
    };
    let LookupTable::Interpolation(table) = table else {
        panic!("expected interpolation table");
    };
    // Entries sort by source at build time.
    assert_eq!(table.entries[0].source_value, 0.0);
    assert_eq!(table.entries[1].source_value, 100.0);

    let el = root(
        r#"
<lookupTable>
  <variable identifier="RAW"/>
  <randomTable/>
</lookupTable>
"#,
    );
    let error = build_expression(&el, ProcessingScope::Item).expect_err("should fail");
    assert_eq!(error.code, "AST_TABLE_UNSUPPORTED");
}

#[test]
fn pattern_match_rejects_invalid_patterns_at_build_time() {
    let el = root(r#"<patternMatch pattern="[0-9"><variable identifier="R"/></patternMatch>"#);
    let error = build_expression(&el, ProcessingScope::Item).expect_err("should fail");
    assert_eq!(error.code, "AST_ATTR_INVALID");
}

#[test]
fn inside_validates_shape_coordinates() {
    let el = root(r#"<inside shape="rect" coords="0,0,10"><variable identifier="P"/></inside>"#);
    let error = build_expression(&el, ProcessingScope::Item).expect_err("should fail");
    assert_eq!(error.code, "AST_ATTR_INVALID");

    let el = root(
        r#"<inside shape="poly" coords="0,0 10,0 10,10"><variable identifier="P"/></inside>"#,
    );
    let expr = build_expression(&el, ProcessingScope::Item).expect("poly should build");
    assert!(matches!(expr.kind, ExprKind::Inside { .. }));
}

#[test]
fn template_processing_builds_template_statements() {
    let el = root(
        r#"
<templateProcessing>
  <setTemplateValue identifier="A">
    <randomInteger min="1" max="6"/>
  </setTemplateValue>
  <templateConstraint>
    <gt><variable identifier="A"/><baseValue baseType="integer">1</baseValue></gt>
  </templateConstraint>
  <setCorrectResponse identifier="RESPONSE">
    <variable identifier="A"/>
  </setCorrectResponse>
  <exitTemplate/>
</templateProcessing>
"#,
    );
    let program = build_template_processing_ast(&el).expect("should build");
    assert_eq!(program.statements.len(), 4);
    assert!(matches!(
        program.statements[1].kind,
        StmtKind::TemplateConstraint { .. }
    ));
}

#[test]
fn response_declaration_parses_correct_response_and_mapping() {
    let el = root(
        r#"
<responseDeclaration identifier="RESPONSE" cardinality="multiple" baseType="pair">
  <correctResponse>
    <value>A B</value>
    <value>C D</value>
  </correctResponse>
  <mapping defaultValue="0" lowerBound="0" upperBound="2">
    <mapEntry mapKey="B A" mappedValue="1"/>
    <mapEntry mapKey="C D" mappedValue="1"/>
  </mapping>
</responseDeclaration>
"#,
    );
    let declaration = build_variable_declaration(&el).expect("should build");
    assert_eq!(declaration.kind, DeclarationKind::Response);
    assert_eq!(declaration.cardinality, Cardinality::Multiple);
    assert!(matches!(
        declaration.correct_response,
        QtiValue::Container { ref values, .. } if values.len() == 2
    ));
    let mapping = declaration.mapping.expect("mapping should exist");
    assert_eq!(mapping.entries.len(), 2);
    assert_eq!(mapping.upper_bound, Some(2.0));
}

#[test]
fn record_declaration_types_fields_individually() {
    let el = root(
        r#"
<templateDeclaration identifier="CONFIG" cardinality="record">
  <defaultValue>
    <value fieldIdentifier="count" baseType="integer">3</value>
    <value fieldIdentifier="label" baseType="string">dice</value>
  </defaultValue>
</templateDeclaration>
"#,
    );
    let declaration = build_variable_declaration(&el).expect("should build");
    let QtiValue::Record { fields } = &declaration.default_value else {
        panic!("expected record default");
    };
    assert_eq!(fields.get("count"), Some(&QtiValue::integer(3)));
    assert_eq!(fields.get("label"), Some(&QtiValue::string("dice")));
}

#[test]
fn outcome_declaration_accepts_wrapped_and_direct_lookup_tables() {
    let wrapped = root(
        r#"
<outcomeDeclaration identifier="GRADE" cardinality="single" baseType="identifier">
  <lookupTable>
    <matchTable defaultValue="F">
      <matchTableEntry sourceValue="1" targetValue="A"/>
    </matchTable>
  </lookupTable>
</outcomeDeclaration>
"#,
    );
    let declaration = build_variable_declaration(&wrapped).expect("should build");
    assert!(matches!(
        declaration.lookup_table,
        Some(LookupTable::Match(_))
    ));

    let direct = root(
        r#"
<outcomeDeclaration identifier="GRADE" cardinality="single" baseType="identifier">
  <matchTable defaultValue="F">
    <matchTableEntry sourceValue="1" targetValue="A"/>
  </matchTable>
</outcomeDeclaration>
"#,
    );
    let declaration = build_variable_declaration(&direct).expect("should build");
    assert!(matches!(
        declaration.lookup_table,
        Some(LookupTable::Match(_))
    ));
}

#[test]
fn area_mapping_validates_entry_shapes() {
    let el = root(
        r#"
<responseDeclaration identifier="POINT" cardinality="single" baseType="point">
  <areaMapping defaultValue="0">
    <areaMapEntry shape="circle" coords="50,50" mappedValue="1"/>
  </areaMapping>
</responseDeclaration>
"#,
    );
    let error = build_variable_declaration(&el).expect_err("bad circle should fail");
    assert_eq!(error.code, "DECL_VALUE_INVALID");
}

#[test]
fn declaration_rejects_unknown_children() {
    let el = root(
        r#"
<responseDeclaration identifier="R" cardinality="single" baseType="string">
  <renderingHints/>
</responseDeclaration>
"#,
    );
    let error = build_variable_declaration(&el).expect_err("unknown child should fail");
    assert_eq!(error.code, "DECL_CHILD_INVALID");
}

#[test]
fn node_ids_are_unique_within_a_program() {
    let el = root(
        r#"
<responseProcessing>
  <setOutcomeValue identifier="A"><baseValue baseType="integer">1</baseValue></setOutcomeValue>
  <setOutcomeValue identifier="B"><baseValue baseType="integer">2</baseValue></setOutcomeValue>
</responseProcessing>
"#,
    );
    let program = build_response_processing_ast(&el).expect("should build");
    assert_ne!(program.statements[0].id, program.statements[1].id);
}
