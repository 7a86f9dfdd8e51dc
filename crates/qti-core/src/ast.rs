use serde::{Deserialize, Serialize};

use crate::declaration::LookupTable;
use crate::types::{
    BaseType, CompareOp, MathConst, MathOp, ProcessingMode, RoundingMode, Shape, StatsOp,
    ToleranceMode,
};
use crate::value::Scalar;

/// Numeric attribute that the grammar allows as a literal, a variable
/// reference, or (legacy two-child form) a full sub-expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NumericArg {
    Literal(f64),
    Variable(String),
    Expr(Box<ExpressionNode>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpressionNode {
    /// Diagnostic only; never semantic.
    pub id: u32,
    pub kind: ExprKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EqualParams {
    pub tolerance_mode: ToleranceMode,
    pub tolerance: Vec<NumericArg>,
    pub include_lower_bound: bool,
    pub include_upper_bound: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExprKind {
    BaseValue {
        base_type: BaseType,
        value: Scalar,
    },
    Variable {
        identifier: String,
        weight_identifier: Option<String>,
    },
    Correct {
        identifier: String,
    },
    Default {
        identifier: String,
    },
    Null,
    RandomInteger {
        min: NumericArg,
        max: NumericArg,
        step: NumericArg,
    },
    RandomFloat {
        min: NumericArg,
        max: NumericArg,
    },
    MathConstant {
        constant: MathConst,
    },
    Multiple(Vec<ExpressionNode>),
    Ordered(Vec<ExpressionNode>),
    ContainerSize(Box<ExpressionNode>),
    IsNull(Box<ExpressionNode>),
    Index {
        n: NumericArg,
        expr: Box<ExpressionNode>,
    },
    FieldValue {
        field_identifier: String,
        expr: Box<ExpressionNode>,
    },
    Random(Box<ExpressionNode>),
    Member {
        value: Box<ExpressionNode>,
        container: Box<ExpressionNode>,
    },
    Contains {
        container: Box<ExpressionNode>,
        sub: Box<ExpressionNode>,
    },
    Delete {
        value: Box<ExpressionNode>,
        container: Box<ExpressionNode>,
    },
    Repeat {
        number_repeats: NumericArg,
        exprs: Vec<ExpressionNode>,
    },
    And(Vec<ExpressionNode>),
    Or(Vec<ExpressionNode>),
    Not(Box<ExpressionNode>),
    AnyN {
        min: NumericArg,
        max: NumericArg,
        exprs: Vec<ExpressionNode>,
    },
    AllN {
        max: NumericArg,
        exprs: Vec<ExpressionNode>,
    },
    Match {
        lhs: Box<ExpressionNode>,
        rhs: Box<ExpressionNode>,
    },
    Equal {
        params: EqualParams,
        lhs: Box<ExpressionNode>,
        rhs: Box<ExpressionNode>,
    },
    NotEqual {
        params: EqualParams,
        lhs: Box<ExpressionNode>,
        rhs: Box<ExpressionNode>,
    },
    EqualRounded {
        rounding_mode: RoundingMode,
        figures: NumericArg,
        lhs: Box<ExpressionNode>,
        rhs: Box<ExpressionNode>,
    },
    StringMatch {
        case_sensitive: bool,
        substring: bool,
        lhs: Box<ExpressionNode>,
        rhs: Box<ExpressionNode>,
    },
    PatternMatch {
        pattern: String,
        expr: Box<ExpressionNode>,
    },
    Inside {
        shape: Shape,
        coords: Vec<f64>,
        expr: Box<ExpressionNode>,
    },
    Compare {
        op: CompareOp,
        lhs: Box<ExpressionNode>,
        rhs: Box<ExpressionNode>,
    },
    DurationLt {
        lhs: Box<ExpressionNode>,
        rhs: Box<ExpressionNode>,
    },
    DurationGte {
        lhs: Box<ExpressionNode>,
        rhs: Box<ExpressionNode>,
    },
    Sum(Vec<ExpressionNode>),
    Product(Vec<ExpressionNode>),
    Subtract {
        lhs: Box<ExpressionNode>,
        rhs: Box<ExpressionNode>,
    },
    Divide {
        lhs: Box<ExpressionNode>,
        rhs: Box<ExpressionNode>,
    },
    Power {
        lhs: Box<ExpressionNode>,
        rhs: Box<ExpressionNode>,
    },
    IntegerDivide {
        lhs: Box<ExpressionNode>,
        rhs: Box<ExpressionNode>,
    },
    IntegerModulus {
        lhs: Box<ExpressionNode>,
        rhs: Box<ExpressionNode>,
    },
    Truncate(Box<ExpressionNode>),
    Round(Box<ExpressionNode>),
    RoundTo {
        rounding_mode: RoundingMode,
        figures: NumericArg,
        expr: Box<ExpressionNode>,
    },
    IntegerToFloat(Box<ExpressionNode>),
    Min(Vec<ExpressionNode>),
    Max(Vec<ExpressionNode>),
    Gcd(Vec<ExpressionNode>),
    Lcm(Vec<ExpressionNode>),
    MathOperator {
        name: MathOp,
        exprs: Vec<ExpressionNode>,
    },
    StatsOperator {
        name: StatsOp,
        expr: Box<ExpressionNode>,
    },
    MapResponse {
        identifier: String,
    },
    MapOutcome {
        identifier: String,
    },
    MapResponsePoint {
        identifier: String,
    },
    LookupTable {
        source: Box<ExpressionNode>,
        table: LookupTable,
    },
    CustomOperator {
        class: Option<String>,
        definition: Option<String>,
        exprs: Vec<ExpressionNode>,
    },
    TestVariables {
        variable_identifier: String,
        base_type: Option<BaseType>,
        weight_identifier: Option<String>,
        section_identifier: Option<String>,
        include_categories: Vec<String>,
        exclude_categories: Vec<String>,
    },
    OutcomeMinimum {
        outcome_identifier: String,
        weight_identifier: Option<String>,
        section_identifier: Option<String>,
        include_categories: Vec<String>,
        exclude_categories: Vec<String>,
    },
    OutcomeMaximum {
        outcome_identifier: String,
        weight_identifier: Option<String>,
        section_identifier: Option<String>,
        include_categories: Vec<String>,
        exclude_categories: Vec<String>,
    },
    NumberCorrect(SectionFilter),
    NumberIncorrect(SectionFilter),
    NumberPresented(SectionFilter),
    NumberResponded(SectionFilter),
    NumberSelected(SectionFilter),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionFilter {
    pub section_identifier: Option<String>,
    pub include_categories: Vec<String>,
    pub exclude_categories: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatementNode {
    /// Diagnostic only; never semantic.
    pub id: u32,
    pub kind: StmtKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CondBranch {
    pub condition: ExpressionNode,
    pub statements: Vec<StatementNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionBlock {
    pub branches: Vec<CondBranch>,
    pub else_branch: Option<Vec<StatementNode>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StmtKind {
    SetOutcomeValue {
        identifier: String,
        expr: ExpressionNode,
    },
    SetResponseValue {
        identifier: String,
        expr: ExpressionNode,
    },
    SetTemplateValue {
        identifier: String,
        expr: ExpressionNode,
    },
    SetCorrectResponse {
        identifier: String,
        expr: ExpressionNode,
    },
    SetDefaultValue {
        identifier: String,
        expr: ExpressionNode,
    },
    LookupOutcomeValue {
        identifier: String,
        expr: ExpressionNode,
    },
    ExitResponse,
    ExitTemplate,
    ExitTest,
    TemplateConstraint {
        expr: ExpressionNode,
    },
    ResponseCondition(ConditionBlock),
    TemplateCondition(ConditionBlock),
    OutcomeCondition(ConditionBlock),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingProgram {
    pub id: String,
    pub mode: ProcessingMode,
    pub statements: Vec<StatementNode>,
}
