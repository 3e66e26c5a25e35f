//! Property-based tests for the structural operations
//!
//! These verify the algebraic laws resolution relies on: flattening is
//! idempotent and order-preserving, and pattern equivalence behaves like an
//! equality over concrete expressions.

use proptest::prelude::*;

use kyfoo_core::{match_equivalent, Ast, ExprId, ExprKind, Token, TokenKind};

/// A renderable expression shape, generated instead of parsed.
#[derive(Debug, Clone)]
enum Shape {
    Ident(u8),
    Int(u8),
    OpenTuple(Vec<Shape>),
    ClosedTuple(Vec<Shape>),
    Apply(Vec<Shape>),
}

fn shape_strategy() -> impl Strategy<Value = Shape> {
    let leaf = prop_oneof![
        (0u8..5).prop_map(Shape::Ident),
        (0u8..5).prop_map(Shape::Int),
    ];
    leaf.prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Shape::OpenTuple),
            prop::collection::vec(inner.clone(), 0..4).prop_map(Shape::ClosedTuple),
            prop::collection::vec(inner, 1..4).prop_map(Shape::Apply),
        ]
    })
}

fn build(ast: &mut Ast, shape: &Shape) -> ExprId {
    match shape {
        Shape::Ident(n) => ast.identifier(format!("x{}", n)),
        Shape::Int(n) => ast.integer(format!("{}", n)),
        Shape::OpenTuple(children) => {
            let ids = children.iter().map(|c| build(ast, c)).collect();
            ast.open_tuple(ids)
        }
        Shape::ClosedTuple(children) => {
            let ids = children.iter().map(|c| build(ast, c)).collect();
            ast.tuple(
                Token::synthetic(TokenKind::OpenBracket, "["),
                Token::synthetic(TokenKind::CloseBracket, "]"),
                ids,
            )
        }
        Shape::Apply(children) => {
            let ids = children.iter().map(|c| build(ast, c)).collect();
            ast.apply(ids)
        }
    }
}

/// Leaf lexemes in traversal order.
fn leaves(ast: &Ast, id: ExprId, out: &mut Vec<String>) {
    match &ast.expr(id).kind {
        ExprKind::Primary { token } => out.push(token.lexeme().to_string()),
        ExprKind::Tuple { exprs, .. }
        | ExprKind::Apply { exprs }
        | ExprKind::Symbol { exprs, .. } => {
            for &e in exprs {
                leaves(ast, e, out);
            }
        }
        ExprKind::Constraint {
            subject,
            constraint,
        } => {
            leaves(ast, *subject, out);
            leaves(ast, *constraint, out);
        }
    }
}

proptest! {
    #[test]
    fn flatten_open_tuples_is_idempotent(shape in shape_strategy()) {
        let mut ast = Ast::new();
        let id = build(&mut ast, &shape);

        ast.flatten_open_tuples(id);
        let once = format!("{}", ast.display_expr(id));
        ast.flatten_open_tuples(id);
        let twice = format!("{}", ast.display_expr(id));
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn flatten_apply_is_idempotent(shape in shape_strategy()) {
        let mut ast = Ast::new();
        let id = build(&mut ast, &shape);

        ast.flatten_apply(id);
        let once = format!("{}", ast.display_expr(id));
        ast.flatten_apply(id);
        let twice = format!("{}", ast.display_expr(id));
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn flattening_preserves_leaf_order(shape in shape_strategy()) {
        let mut ast = Ast::new();
        let id = build(&mut ast, &shape);

        let mut before = Vec::new();
        leaves(&ast, id, &mut before);

        ast.flatten_open_tuples(id);
        ast.flatten_apply(id);

        let mut after = Vec::new();
        leaves(&ast, id, &mut after);
        prop_assert_eq!(before, after);
    }

    #[test]
    fn equivalence_is_reflexive_for_concrete_shapes(shape in shape_strategy()) {
        let mut ast = Ast::new();
        let a = build(&mut ast, &shape);
        let b = build(&mut ast, &shape);
        prop_assert!(match_equivalent(&ast, a, b));
        prop_assert!(match_equivalent(&ast, b, a));
    }

    #[test]
    fn distinct_leaves_are_not_equivalent(n in 0u8..5, m in 0u8..5) {
        prop_assume!(n != m);
        let mut ast = Ast::new();
        let a = ast.identifier(format!("x{}", n));
        let b = ast.identifier(format!("x{}", m));
        prop_assert!(!match_equivalent(&ast, a, b));
    }
}
