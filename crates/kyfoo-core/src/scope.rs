//! Hierarchical declaration containers and per-name overload buckets
//!
//! A scope owns its declarations in order and keeps two name-sorted lists of
//! [`SymbolSet`]s: one for value/type symbols and one for procedure
//! overloads. Procedure bodies additionally carry an ordered expression list.
//! Template instantiations are appended to the scope that owns their
//! prototype, so they share its lifetime.

use crate::ast::{DeclId, ExprId, ModuleId, ScopeId};

/// What a scope is the definition of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    /// A module's root scope, or any plain declaration scope.
    Declaration,
    DataSum,
    DataProduct,
    Procedure,
}

/// A lexical scope.
#[derive(Debug)]
pub struct Scope {
    pub kind: ScopeKind,
    pub module: ModuleId,
    pub parent: Option<ScopeId>,
    /// The declaration this scope defines, if any.
    pub declaration: Option<DeclId>,
    /// Owned declarations, in appearance order. Instantiations are appended
    /// behind the declarations they were cloned from.
    pub decls: Vec<DeclId>,
    /// Name-sorted buckets for non-procedure declarations.
    pub symbols: Vec<SymbolSet>,
    /// Name-sorted buckets for procedure overloads.
    pub procedure_overloads: Vec<SymbolSet>,
    /// Top-level body expressions of a procedure scope.
    pub exprs: Vec<ExprId>,
}

impl Scope {
    pub fn new(kind: ScopeKind, module: ModuleId, parent: Option<ScopeId>) -> Self {
        Self {
            kind,
            module,
            parent,
            declaration: None,
            decls: Vec::new(),
            symbols: Vec::new(),
            procedure_overloads: Vec::new(),
            exprs: Vec::new(),
        }
    }

    pub fn symbol_sets(&self, procedure: bool) -> &[SymbolSet] {
        if procedure {
            &self.procedure_overloads
        } else {
            &self.symbols
        }
    }

    pub fn symbol_sets_mut(&mut self, procedure: bool) -> &mut Vec<SymbolSet> {
        if procedure {
            &mut self.procedure_overloads
        } else {
            &mut self.symbols
        }
    }
}

/// An ordered binding of symbol variables to the expressions they stand for.
pub type BindingSet = Vec<(DeclId, ExprId)>;

/// One prototype in a bucket, together with its cached instantiations.
///
/// `instance_bindings[i]` is the binding set that produced
/// `instantiations[i]`; the two lists stay parallel and in insertion order.
#[derive(Debug)]
pub struct SymbolTemplate {
    pub params: Vec<ExprId>,
    pub declaration: DeclId,
    pub instance_bindings: Vec<BindingSet>,
    pub instantiations: Vec<DeclId>,
}

/// The per-name overload bucket of a scope.
#[derive(Debug)]
pub struct SymbolSet {
    pub name: String,
    pub templates: Vec<SymbolTemplate>,
}

impl SymbolSet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            templates: Vec::new(),
        }
    }

    /// Record a new prototype. Duplicates are the caller's responsibility;
    /// see `ResolveCtx::resolve_scope`.
    pub fn append(&mut self, params: Vec<ExprId>, declaration: DeclId) {
        self.templates.push(SymbolTemplate {
            params,
            declaration,
            instance_bindings: Vec::new(),
            instantiations: Vec::new(),
        });
    }

    pub fn prototypes(&self) -> impl Iterator<Item = DeclId> + '_ {
        self.templates.iter().map(|t| t.declaration)
    }
}

/// Stable address of a bucket: the scope it lives in, its index in the
/// sorted list, and which of the two lists. Buckets are never removed, so a
/// key stays valid for the lifetime of the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymSetKey {
    pub scope: ScopeId,
    pub index: usize,
    pub procedure: bool,
}

/// Result of a lookup: the declaration hit (if any), the instantiation
/// produced or reused for it (if the hit was a template), and the first
/// bucket traversed, kept for diagnostics that cite candidate prototypes.
#[derive(Debug, Default)]
pub struct LookupHit {
    pub decl: Option<DeclId>,
    pub instance: Option<DeclId>,
    pub sym_set: Option<SymSetKey>,
}

impl LookupHit {
    pub fn miss(sym_set: Option<SymSetKey>) -> Self {
        Self {
            decl: None,
            instance: None,
            sym_set,
        }
    }

    pub fn of_decl(decl: DeclId) -> Self {
        Self {
            decl: Some(decl),
            instance: None,
            sym_set: None,
        }
    }

    pub fn of_template(decl: DeclId, instance: Option<DeclId>, sym_set: SymSetKey) -> Self {
        Self {
            decl: Some(decl),
            instance,
            sym_set: Some(sym_set),
        }
    }

    pub fn is_hit(&self) -> bool {
        self.decl.is_some()
    }

    /// The declaration a use site should record: the instantiation when one
    /// was made, the prototype otherwise.
    pub fn best_decl(&self) -> Option<DeclId> {
        self.instance.or(self.decl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Ast, Decl, DeclKind, Symbol};

    #[test]
    fn symbol_sets_stay_sorted() {
        let mut ast = Ast::new();
        let scope = ast.alloc_scope(Scope::new(ScopeKind::Declaration, ModuleId(0), None));

        let b = ast.scope_create_symbol_set(scope, "beta", false);
        let a = ast.scope_create_symbol_set(scope, "alpha", false);
        let again = ast.scope_create_symbol_set(scope, "beta", false);

        assert_eq!(a, 0);
        assert_eq!(again, 1);
        assert_ne!(b, again); // "beta" shifted right when "alpha" was inserted
        let names: Vec<_> = ast
            .scope(scope)
            .symbols
            .iter()
            .map(|s| s.name.clone())
            .collect();
        assert_eq!(names, ["alpha", "beta"]);
        assert_eq!(ast.scope_find_symbol_set(scope, "alpha", false), Some(0));
        assert_eq!(ast.scope_find_symbol_set(scope, "gamma", false), None);
    }

    #[test]
    fn procedure_sets_are_separate() {
        let mut ast = Ast::new();
        let scope = ast.alloc_scope(Scope::new(ScopeKind::Declaration, ModuleId(0), None));

        ast.scope_create_symbol_set(scope, "f", true);
        assert_eq!(ast.scope_find_symbol_set(scope, "f", false), None);
        assert_eq!(ast.scope_find_symbol_set(scope, "f", true), Some(0));
    }

    #[test]
    fn append_stamps_back_edge() {
        let mut ast = Ast::new();
        let scope = ast.alloc_scope(Scope::new(ScopeKind::Declaration, ModuleId(0), None));
        let d = ast.alloc_decl(Decl::new(
            DeclKind::DataSum { definition: None },
            Symbol::named("Tree"),
        ));

        ast.scope_append_decl(scope, d);
        assert_eq!(ast.decl(d).scope, Some(scope));
        assert_eq!(ast.scope(scope).decls, vec![d]);
    }
}
