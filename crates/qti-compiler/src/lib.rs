mod declarations;
mod expressions;
mod statements;
mod tables;
mod xml_utils;

#[cfg(test)]
mod tests;

use qti_core::{
    ExpressionNode, ProcessingMode, ProcessingProgram, ProcessingScope, QtiError,
};
use qti_parser::XmlElementNode;

pub use declarations::build_variable_declaration;
pub use tables::parse_lookup_table_element;

pub(crate) struct AstBuilder {
    mode: ProcessingMode,
    scope: ProcessingScope,
    next_id: u32,
}

impl AstBuilder {
    fn new(mode: ProcessingMode, scope: ProcessingScope) -> Self {
        Self {
            mode,
            scope,
            next_id: 0,
        }
    }

    pub(crate) fn alloc_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

pub fn build_template_processing_ast(
    root: &XmlElementNode,
) -> Result<ProcessingProgram, QtiError> {
    build_program(root, ProcessingMode::Template, ProcessingScope::Item)
}

pub fn build_response_processing_ast(
    root: &XmlElementNode,
) -> Result<ProcessingProgram, QtiError> {
    build_program(root, ProcessingMode::Response, ProcessingScope::Item)
}

pub fn build_outcome_processing_ast(
    root: &XmlElementNode,
    scope: ProcessingScope,
) -> Result<ProcessingProgram, QtiError> {
    build_program(root, ProcessingMode::Outcome, scope)
}

fn build_program(
    root: &XmlElementNode,
    mode: ProcessingMode,
    scope: ProcessingScope,
) -> Result<ProcessingProgram, QtiError> {
    let mut builder = AstBuilder::new(mode, scope);
    let statements = builder.build_statement_list(root.child_elements())?;
    Ok(ProcessingProgram {
        id: root.name.clone(),
        mode,
        statements,
    })
}

pub fn build_expression(
    el: &XmlElementNode,
    scope: ProcessingScope,
) -> Result<ExpressionNode, QtiError> {
    // Expression legality never depends on the statement mode, only on scope.
    let mut builder = AstBuilder::new(ProcessingMode::Response, scope);
    builder.build_expression(el)
}
