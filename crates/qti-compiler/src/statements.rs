use qti_core::{
    CondBranch, ConditionBlock, ProcessingMode, QtiError, StatementNode, StmtKind,
};
use qti_parser::XmlElementNode;

use crate::xml_utils::get_identifier_attr;
use crate::AstBuilder;

/// Which processing modes each known statement tag is legal in. A known
/// tag outside its modes is skipped structurally; an unknown tag fails
/// the build.
fn statement_modes(tag: &str) -> Option<&'static [ProcessingMode]> {
    use ProcessingMode::{Outcome, Response, Template};
    const RESPONSE: &[ProcessingMode] = &[Response];
    const TEMPLATE: &[ProcessingMode] = &[Template];
    const OUTCOME: &[ProcessingMode] = &[Outcome];
    const RESPONSE_OUTCOME: &[ProcessingMode] = &[Response, Outcome];

    match tag {
        "setoutcomevalue" | "lookupoutcomevalue" => Some(RESPONSE_OUTCOME),
        "setresponsevalue" | "exitresponse" | "responsecondition"
        | "responseprocessingfragment" => Some(RESPONSE),
        "settemplatevalue" | "setcorrectresponse" | "setdefaultvalue" | "exittemplate"
        | "templatecondition" | "templateconstraint" => Some(TEMPLATE),
        "exittest" | "outcomecondition" | "outcomeprocessingfragment" => Some(OUTCOME),
        _ => None,
    }
}

impl AstBuilder {
    pub(crate) fn build_statement_list<'a>(
        &mut self,
        children: impl Iterator<Item = &'a XmlElementNode>,
    ) -> Result<Vec<StatementNode>, QtiError> {
        let mut statements = Vec::new();
        for child in children {
            let tag = child.name.to_lowercase();

            if tag == "include" {
                return Err(QtiError::with_span(
                    "AST_XINCLUDE_UNSUPPORTED",
                    "xi:include is not supported; inline the processing rules instead.",
                    child.location.clone(),
                ));
            }

            // Fragments behave as if their children appeared in place.
            if tag == "responseprocessingfragment" || tag == "outcomeprocessingfragment" {
                if self.mode_allows(&tag) {
                    statements.extend(self.build_statement_list(child.child_elements())?);
                }
                continue;
            }

            if let Some(statement) = self.build_statement(child, &tag)? {
                statements.push(statement);
            }
        }
        Ok(statements)
    }

    fn mode_allows(&self, tag: &str) -> bool {
        statement_modes(tag)
            .map(|modes| modes.contains(&self.mode))
            .unwrap_or(false)
    }

    fn build_statement(
        &mut self,
        el: &XmlElementNode,
        tag: &str,
    ) -> Result<Option<StatementNode>, QtiError> {
        let Some(modes) = statement_modes(tag) else {
            return Err(QtiError::with_span(
                "AST_UNKNOWN_STATEMENT",
                format!("Unknown processing statement tag <{}>.", el.name),
                el.location.clone(),
            ));
        };
        if !modes.contains(&self.mode) {
            return Ok(None);
        }

        let kind = match tag {
            "setoutcomevalue" => StmtKind::SetOutcomeValue {
                identifier: get_identifier_attr(el, "identifier")?,
                expr: self.single_statement_expression(el)?,
            },
            "setresponsevalue" => StmtKind::SetResponseValue {
                identifier: get_identifier_attr(el, "identifier")?,
                expr: self.single_statement_expression(el)?,
            },
            "settemplatevalue" => StmtKind::SetTemplateValue {
                identifier: get_identifier_attr(el, "identifier")?,
                expr: self.single_statement_expression(el)?,
            },
            "setcorrectresponse" => StmtKind::SetCorrectResponse {
                identifier: get_identifier_attr(el, "identifier")?,
                expr: self.single_statement_expression(el)?,
            },
            "setdefaultvalue" => StmtKind::SetDefaultValue {
                identifier: get_identifier_attr(el, "identifier")?,
                expr: self.single_statement_expression(el)?,
            },
            "lookupoutcomevalue" => StmtKind::LookupOutcomeValue {
                identifier: get_identifier_attr(el, "identifier")?,
                expr: self.single_statement_expression(el)?,
            },
            "exitresponse" => StmtKind::ExitResponse,
            "exittemplate" => StmtKind::ExitTemplate,
            "exittest" => StmtKind::ExitTest,
            "templateconstraint" => StmtKind::TemplateConstraint {
                expr: self.single_statement_expression(el)?,
            },
            "responsecondition" => {
                StmtKind::ResponseCondition(self.build_condition(el, "response")?)
            }
            "templatecondition" => {
                StmtKind::TemplateCondition(self.build_condition(el, "template")?)
            }
            "outcomecondition" => StmtKind::OutcomeCondition(self.build_condition(el, "outcome")?),
            _ => unreachable!("statement_modes covers exactly the known statement tags"),
        };

        Ok(Some(StatementNode {
            id: self.alloc_id(),
            kind,
        }))
    }

    fn single_statement_expression(
        &mut self,
        el: &XmlElementNode,
    ) -> Result<qti_core::ExpressionNode, QtiError> {
        let mut children = el.child_elements();
        let Some(first) = children.next() else {
            return Err(QtiError::with_span(
                "AST_CHILD_ARITY",
                format!("<{}> requires exactly one child expression.", el.name),
                el.location.clone(),
            ));
        };
        if children.next().is_some() {
            return Err(QtiError::with_span(
                "AST_CHILD_ARITY",
                format!("<{}> requires exactly one child expression.", el.name),
                el.location.clone(),
            ));
        }
        self.build_expression(first)
    }

    fn build_condition(
        &mut self,
        el: &XmlElementNode,
        prefix: &str,
    ) -> Result<ConditionBlock, QtiError> {
        let if_tag = format!("{}if", prefix);
        let else_if_tag = format!("{}elseif", prefix);
        let else_tag = format!("{}else", prefix);

        let mut branches = Vec::new();
        let mut else_branch = None;
        let mut has_if = false;

        for child in el.child_elements() {
            let tag = child.name.to_lowercase();
            if tag == if_tag {
                has_if = true;
                branches.push(self.build_branch(child)?);
            } else if tag == else_if_tag {
                branches.push(self.build_branch(child)?);
            } else if tag == else_tag {
                else_branch = Some(self.build_statement_list(child.child_elements())?);
            } else {
                return Err(QtiError::with_span(
                    "AST_UNKNOWN_STATEMENT",
                    format!("Unknown child <{}> under <{}>.", child.name, el.name),
                    child.location.clone(),
                ));
            }
        }

        if !has_if {
            return Err(QtiError::with_span(
                "AST_CHILD_ARITY",
                format!("<{}> requires a <{}If> branch.", el.name, prefix),
                el.location.clone(),
            ));
        }

        Ok(ConditionBlock {
            branches,
            else_branch,
        })
    }

    /// A branch's first child element is its condition, the remaining
    /// children are its statement body.
    fn build_branch(&mut self, el: &XmlElementNode) -> Result<CondBranch, QtiError> {
        let mut children = el.child_elements();
        let Some(condition_el) = children.next() else {
            return Err(QtiError::with_span(
                "AST_CHILD_ARITY",
                format!("<{}> requires a condition expression.", el.name),
                el.location.clone(),
            ));
        };
        let condition = self.build_expression(condition_el)?;
        let statements = self.build_statement_list(children)?;
        Ok(CondBranch {
            condition,
            statements,
        })
    }
}
