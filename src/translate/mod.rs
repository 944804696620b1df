//! # Translator Factory & Produce/Consume Pipeline
//!
//! The dual of the plan tree: one operator translator per plan node, built
//! children-first by a depth-first factory. Translators live in an arena;
//! parent back-pointers are non-owning arena indices, installed at
//! construction, so the ownership cycle of parent/child references cannot
//! arise. The [`pipeline::PipelineCompiler`] then drives the
//! produce/consume contract over the tree, fusing the whole plan into a
//! single loop nest emitted through the program-builder facade.
//!
//! ```text
//! Operator tree -> [TranslatorFactory] -> translator arena
//!               -> [PipelineCompiler::compile] -> ProgramBuilder backend
//! ```

pub mod expression;
pub mod pipeline;
pub mod schema_values;

pub use expression::eval_expr;
pub use pipeline::PipelineCompiler;
pub use schema_values::SchemaValues;

use thiserror::Error;

use crate::plan::{Operator, PlanError};

/// Translator errors are structural only; all semantic checking happened in
/// the plan builder.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TranslateError {
    #[error("unsupported operator: {0}")]
    UnsupportedOperator(String),

    #[error(transparent)]
    Plan(#[from] PlanError),
}

/// Non-owning handle to a translator in its arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranslatorId(pub(crate) usize);

/// One operator translator: the plan node it lowers, its owned children,
/// and the weak back-reference to its parent.
#[derive(Debug)]
pub struct Translator<'p> {
    pub op: &'p Operator,
    pub parent: Option<TranslatorId>,
    pub children: Vec<TranslatorId>,
}

/// The arena of translators mirroring a plan tree.
#[derive(Debug)]
pub struct TranslatorTree<'p> {
    nodes: Vec<Translator<'p>>,
    root: TranslatorId,
}

impl<'p> TranslatorTree<'p> {
    pub fn root(&self) -> TranslatorId {
        self.root
    }

    pub fn node(&self, id: TranslatorId) -> &Translator<'p> {
        &self.nodes[id.0]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Depth-first visitor that instantiates a translator per plan operator,
/// children first, and wires the parent back-pointers.
pub struct TranslatorFactory;

impl TranslatorFactory {
    /// Build the translator tree for a frozen plan. The root must be the
    /// plan's `Output` operator and `Output` may appear nowhere else.
    pub fn build(plan: &Operator) -> Result<TranslatorTree<'_>, TranslateError> {
        if !matches!(plan, Operator::Output { .. }) {
            return Err(TranslateError::UnsupportedOperator(
                "plan root must be OUTPUT".to_string(),
            ));
        }

        let mut nodes = Vec::new();
        let root = Self::visit(plan, true, &mut nodes)?;
        Ok(TranslatorTree { nodes, root })
    }

    fn visit<'p>(
        op: &'p Operator,
        is_root: bool,
        nodes: &mut Vec<Translator<'p>>,
    ) -> Result<TranslatorId, TranslateError> {
        if !is_root && matches!(op, Operator::Output { .. }) {
            return Err(TranslateError::UnsupportedOperator(
                "OUTPUT below the plan root".to_string(),
            ));
        }

        let children: Vec<TranslatorId> = op
            .children()
            .into_iter()
            .map(|child| Self::visit(child, false, nodes))
            .collect::<Result<_, _>>()?;

        let id = TranslatorId(nodes.len());
        nodes.push(Translator {
            op,
            parent: None,
            children: children.clone(),
        });
        for child in children {
            nodes[child.0].parent = Some(id);
        }
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::plan::{BinaryOp, Expr, PlanBuilder, ScalarType};

    fn catalog() -> Catalog {
        let mut catalog = Catalog::new();
        catalog.register_table(
            "test",
            vec![("col0".to_string(), ScalarType::I32, "test.skdbcol".into())],
        );
        catalog
    }

    fn simple_plan(catalog: &Catalog) -> Operator {
        let builder = PlanBuilder::new(catalog);
        let scan = builder.scan("test").unwrap();
        let select = builder
            .select(
                scan,
                Expr::binary(BinaryOp::Lt, Expr::column("col0"), Expr::IntLiteral(10)),
            )
            .unwrap();
        builder.output(select).unwrap()
    }

    #[test]
    fn test_factory_mirrors_plan_shape() {
        let catalog = catalog();
        let plan = simple_plan(&catalog);
        let tree = TranslatorFactory::build(&plan).unwrap();

        assert_eq!(tree.len(), 3);

        let root = tree.node(tree.root());
        assert!(matches!(root.op, Operator::Output { .. }));
        assert!(root.parent.is_none());
        assert_eq!(root.children.len(), 1);

        let select = tree.node(root.children[0]);
        assert!(matches!(select.op, Operator::Select { .. }));
        assert_eq!(select.parent, Some(tree.root()));

        let scan = tree.node(select.children[0]);
        assert!(matches!(scan.op, Operator::Scan { .. }));
        assert_eq!(scan.parent, Some(root.children[0]));
        assert!(scan.children.is_empty());
    }

    #[test]
    fn test_children_constructed_before_parent() {
        let catalog = catalog();
        let plan = simple_plan(&catalog);
        let tree = TranslatorFactory::build(&plan).unwrap();

        // Arena order is post-order: scan, select, output.
        assert!(matches!(tree.node(TranslatorId(0)).op, Operator::Scan { .. }));
        assert!(matches!(
            tree.node(TranslatorId(1)).op,
            Operator::Select { .. }
        ));
        assert!(matches!(
            tree.node(TranslatorId(2)).op,
            Operator::Output { .. }
        ));
    }

    #[test]
    fn test_non_output_root_rejected() {
        let catalog = catalog();
        let builder = PlanBuilder::new(&catalog);
        let scan = builder.scan("test").unwrap();

        assert!(matches!(
            TranslatorFactory::build(&scan),
            Err(TranslateError::UnsupportedOperator(_))
        ));
    }
}
