use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    pub line: usize,
    pub column: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSpan {
    pub start: SourceLocation,
    pub end: SourceLocation,
}

impl SourceSpan {
    pub fn synthetic() -> Self {
        Self {
            start: SourceLocation { line: 1, column: 1 },
            end: SourceLocation { line: 1, column: 1 },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BaseType {
    Boolean,
    Integer,
    Float,
    String,
    Identifier,
    Pair,
    DirectedPair,
    Point,
    Duration,
    File,
}

impl BaseType {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "boolean" => Some(Self::Boolean),
            "integer" => Some(Self::Integer),
            "float" => Some(Self::Float),
            "string" => Some(Self::String),
            "identifier" => Some(Self::Identifier),
            "pair" => Some(Self::Pair),
            "directedPair" => Some(Self::DirectedPair),
            "point" => Some(Self::Point),
            "duration" => Some(Self::Duration),
            "file" => Some(Self::File),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Boolean => "boolean",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::String => "string",
            Self::Identifier => "identifier",
            Self::Pair => "pair",
            Self::DirectedPair => "directedPair",
            Self::Point => "point",
            Self::Duration => "duration",
            Self::File => "file",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Cardinality {
    Single,
    Multiple,
    Ordered,
    Record,
}

impl Cardinality {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "single" => Some(Self::Single),
            "multiple" => Some(Self::Multiple),
            "ordered" => Some(Self::Ordered),
            "record" => Some(Self::Record),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Single => "single",
            Self::Multiple => "multiple",
            Self::Ordered => "ordered",
            Self::Record => "record",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProcessingMode {
    Template,
    Response,
    Outcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProcessingScope {
    Item,
    Test,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeclarationKind {
    Response,
    Outcome,
    Template,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ToleranceMode {
    Exact,
    Absolute,
    Relative,
}

impl ToleranceMode {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "exact" => Some(Self::Exact),
            "absolute" => Some(Self::Absolute),
            "relative" => Some(Self::Relative),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RoundingMode {
    DecimalPlaces,
    SignificantFigures,
}

impl RoundingMode {
    /// Accepts the legacy singular spellings alongside the canonical ones.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "decimalPlaces" | "decimalPlace" => Some(Self::DecimalPlaces),
            "significantFigures" | "significantFigure" => Some(Self::SignificantFigures),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Shape {
    Default,
    Rect,
    Circle,
    Ellipse,
    Poly,
}

impl Shape {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "default" => Some(Self::Default),
            "rect" => Some(Self::Rect),
            "circle" => Some(Self::Circle),
            "ellipse" => Some(Self::Ellipse),
            "poly" => Some(Self::Poly),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MathConst {
    Pi,
    E,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MathOp {
    Sin,
    Cos,
    Tan,
    Sec,
    Csc,
    Cot,
    Asin,
    Acos,
    Atan,
    Atan2,
    Sinh,
    Cosh,
    Tanh,
    Sech,
    Csch,
    Coth,
    Log,
    Ln,
    Exp,
    Abs,
    Signum,
    Floor,
    Ceil,
    ToDegrees,
    ToRadians,
}

impl MathOp {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "sin" => Some(Self::Sin),
            "cos" => Some(Self::Cos),
            "tan" => Some(Self::Tan),
            "sec" => Some(Self::Sec),
            "csc" => Some(Self::Csc),
            "cot" => Some(Self::Cot),
            "asin" => Some(Self::Asin),
            "acos" => Some(Self::Acos),
            "atan" => Some(Self::Atan),
            "atan2" => Some(Self::Atan2),
            "sinh" => Some(Self::Sinh),
            "cosh" => Some(Self::Cosh),
            "tanh" => Some(Self::Tanh),
            "sech" => Some(Self::Sech),
            "csch" => Some(Self::Csch),
            "coth" => Some(Self::Coth),
            "log" => Some(Self::Log),
            "ln" => Some(Self::Ln),
            "exp" => Some(Self::Exp),
            "abs" => Some(Self::Abs),
            "signum" => Some(Self::Signum),
            "floor" => Some(Self::Floor),
            "ceil" => Some(Self::Ceil),
            "toDegrees" => Some(Self::ToDegrees),
            "toRadians" => Some(Self::ToRadians),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StatsOp {
    Mean,
    SampleVariance,
    SampleSd,
    PopVariance,
    PopSd,
}

impl StatsOp {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "mean" => Some(Self::Mean),
            "sampleVariance" => Some(Self::SampleVariance),
            "sampleSD" => Some(Self::SampleSd),
            "popVariance" => Some(Self::PopVariance),
            "popSD" => Some(Self::PopSd),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CompareOp {
    Lt,
    Gt,
    Lte,
    Gte,
}
