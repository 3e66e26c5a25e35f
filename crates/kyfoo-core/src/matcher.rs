//! The three matching relations over expressions
//!
//! - [`match_equivalent`]: structural pattern equivalence. Used to detect
//!   duplicate prototypes and to compare instantiation binding sets. A
//!   symbol-variable-backed primary on the left matches anything.
//! - [`match_overload`]: compatibility of resolved shapes. Primaries agree
//!   when they name the same declaration, or when both sides are symbol
//!   variables; constraints compare by subject.
//! - [`ValueMatcher`]: equivalence plus binding extraction, the workhorse of
//!   use-site lookup. Left-side symbol variables capture the argument they
//!   were matched against; right-side symbol variables are recorded
//!   separately and inhibit instantiation.
//!
//! All relations are read-only over the store; a failed match leaves no
//! trace.

use crate::ast::{Ast, DeclId, ExprId, ExprKind};
use crate::scope::BindingSet;

/// Structural pattern equivalence of two expressions.
pub fn match_equivalent(ast: &Ast, lhs: ExprId, rhs: ExprId) -> bool {
    let l = ast.expr(lhs);
    let r = ast.expr(rhs);

    match &l.kind {
        ExprKind::Primary { token } => {
            if ast.symbol_variable_of(lhs).is_some() {
                return true;
            }
            match r.as_primary() {
                Some(other) => token.lexeme() == other.lexeme(),
                None => false,
            }
        }
        ExprKind::Tuple { kind, exprs, .. } => match r.as_tuple() {
            Some((rkind, rexprs)) => {
                *kind == rkind && match_equivalent_lists(ast, exprs, rexprs)
            }
            None => false,
        },
        ExprKind::Apply { exprs } => match r.as_apply() {
            Some(rexprs) => match_equivalent_lists(ast, exprs, rexprs),
            None => false,
        },
        ExprKind::Symbol {
            identifier, exprs, ..
        } => match r.as_symbol() {
            Some((rid, rexprs)) => {
                identifier.lexeme() == rid.lexeme() && match_equivalent_lists(ast, exprs, rexprs)
            }
            None => false,
        },
        ExprKind::Constraint {
            subject,
            constraint,
        } => match r.as_constraint() {
            Some((rsubject, rconstraint)) => {
                match_equivalent(ast, *subject, rsubject)
                    && match_equivalent(ast, *constraint, rconstraint)
            }
            None => false,
        },
    }
}

/// Pairwise equivalence of two expression lists.
pub fn match_equivalent_lists(ast: &Ast, lhs: &[ExprId], rhs: &[ExprId]) -> bool {
    lhs.len() == rhs.len()
        && lhs
            .iter()
            .zip(rhs)
            .all(|(&l, &r)| match_equivalent(ast, l, r))
}

/// Overload compatibility of two resolved expressions.
pub fn match_overload(ast: &Ast, lhs: ExprId, rhs: ExprId) -> bool {
    let l = ast.expr(lhs);
    let r = ast.expr(rhs);

    match &l.kind {
        ExprKind::Primary { .. } => {
            if let Some((rsubject, _)) = r.as_constraint() {
                return match_overload(ast, lhs, rsubject);
            }
            if r.as_primary().is_none() {
                return false;
            }
            if ast.symbol_variable_of(lhs).is_some() && ast.symbol_variable_of(rhs).is_some() {
                return true;
            }
            match (l.declaration, r.declaration) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            }
        }
        ExprKind::Tuple { exprs, .. } => match r.as_tuple() {
            Some((_, rexprs)) => {
                exprs.len() == rexprs.len()
                    && exprs
                        .iter()
                        .zip(rexprs)
                        .all(|(&a, &b)| match_overload(ast, a, b))
            }
            None => false,
        },
        ExprKind::Symbol { .. } => match (l.declaration, r.declaration) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        },
        ExprKind::Constraint { subject, .. } => match r.as_constraint() {
            Some((rsubject, _)) => match_overload(ast, *subject, rsubject),
            None => match_overload(ast, *subject, rhs),
        },
        ExprKind::Apply { .. } => false,
    }
}

/// Value matching with binding extraction.
///
/// A single matcher accumulates bindings across one prototype/argument list
/// comparison. A conflicting rebinding of the same variable fails the match;
/// it is not an error.
#[derive(Debug, Default)]
pub struct ValueMatcher {
    /// Bindings against the prototype's variables, in discovery order.
    pub left_bindings: BindingSet,
    /// Bindings against variables appearing on the argument side. A hit
    /// with right bindings stays polymorphic and is not instantiated.
    pub right_bindings: BindingSet,
}

impl ValueMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Match a prototype parameter list against a use-site argument list.
    pub fn match_value_lists(&mut self, ast: &Ast, lhs: &[ExprId], rhs: &[ExprId]) -> bool {
        lhs.len() == rhs.len()
            && lhs
                .iter()
                .zip(rhs)
                .all(|(&l, &r)| self.match_value(ast, l, r))
    }

    /// Match one prototype parameter against one argument.
    pub fn match_value(&mut self, ast: &Ast, lhs: ExprId, rhs: ExprId) -> bool {
        let l = ast.expr(lhs);
        let r = ast.expr(rhs);

        match &l.kind {
            ExprKind::Primary { .. } => {
                if let Some(var) = ast.symbol_variable_of(lhs) {
                    return self.bind_left(ast, var, rhs);
                }
                if let Some(var) = ast.symbol_variable_of(rhs) {
                    self.right_bindings.push((var, lhs));
                    return true;
                }
                match (l.declaration, r.declaration) {
                    (Some(a), Some(b)) => a == b,
                    _ => false,
                }
            }
            ExprKind::Tuple { kind, exprs, .. } => match r.as_tuple() {
                Some((rkind, rexprs)) => {
                    *kind == rkind
                        && exprs.len() == rexprs.len()
                        && exprs
                            .iter()
                            .zip(rexprs)
                            .all(|(&a, &b)| self.match_value(ast, a, b))
                }
                None => false,
            },
            ExprKind::Constraint {
                subject,
                constraint,
            } => {
                let target = match r.as_constraint() {
                    Some((rsubject, _)) => rsubject,
                    None => rhs,
                };
                if !self.match_value(ast, *subject, target) {
                    return false;
                }
                // The constraint is a predicate over the subject. Its
                // satisfaction is not evaluated here; it only contributes
                // variable bindings.
                self.collect_constraint_bindings(ast, *constraint, target);
                true
            }
            ExprKind::Symbol {
                identifier, exprs, ..
            } => {
                if let (Some(a), Some(b)) = (l.declaration, r.declaration) {
                    if a == b {
                        return true;
                    }
                }
                match r.as_symbol() {
                    Some((rid, rexprs)) => {
                        identifier.lexeme() == rid.lexeme()
                            && exprs.len() == rexprs.len()
                            && exprs
                                .iter()
                                .zip(rexprs)
                                .all(|(&a, &b)| self.match_value(ast, a, b))
                    }
                    None => false,
                }
            }
            ExprKind::Apply { exprs } => match r.as_apply() {
                Some(rexprs) => {
                    exprs.len() == rexprs.len()
                        && exprs
                            .iter()
                            .zip(rexprs)
                            .all(|(&a, &b)| self.match_value(ast, a, b))
                }
                None => false,
            },
        }
    }

    fn bind_left(&mut self, ast: &Ast, var: DeclId, value: ExprId) -> bool {
        if let Some(&(_, existing)) = self.left_bindings.iter().find(|(v, _)| *v == var) {
            // Rebinding is fine as long as the two captures agree.
            return match_equivalent(ast, existing, value);
        }
        self.left_bindings.push((var, value));
        true
    }

    /// Harvest variable bindings from a constraint pattern without letting
    /// the constraint reject the match.
    fn collect_constraint_bindings(&mut self, ast: &Ast, constraint: ExprId, value: ExprId) {
        if let Some(var) = ast.symbol_variable_of(constraint) {
            if !self.left_bindings.iter().any(|(v, _)| *v == var) {
                self.left_bindings.push((var, value));
            }
            return;
        }
        if let ExprKind::Constraint { subject, .. } = &ast.expr(constraint).kind {
            self.collect_constraint_bindings(ast, *subject, value);
        }
    }
}
