//! Deep cloning and template instantiation
//!
//! Instantiation clones a prototype declaration's entire owned sub-graph,
//! binds the clone's pattern variables to the matched arguments, and
//! re-resolves the clone in the scope that owns the prototype. Results are
//! memoised: at most one instantiation exists per equivalent binding set,
//! and a template's `instance_bindings` and `instantiations` lists stay
//! parallel.
//!
//! Cloning is two-phase. The first pass builds an isomorphic sub-graph,
//! recording an identity map from original node to clone. The second pass
//! walks the clone and rewrites every non-owning reference that appears in
//! the map; references outside the cloned sub-graph are kept as-is. Symbol
//! set buckets are not copied — a cloned scope rebuilds them when it is
//! re-resolved.

use rustc_hash::FxHashMap;
use tracing::debug;

use crate::ast::{Ast, Decl, DeclId, DeclKind, Expr, ExprId, ExprKind, ScopeId, Symbol};
use crate::matcher::match_equivalent;
use crate::resolve::{ResolveCtx, Resolver};
use crate::scope::{BindingSet, Scope, SymSetKey};

/// Identity map from original nodes to their clones.
#[derive(Debug, Default)]
pub struct CloneMap {
    pub exprs: FxHashMap<ExprId, ExprId>,
    pub decls: FxHashMap<DeclId, DeclId>,
    pub scopes: FxHashMap<ScopeId, ScopeId>,
}

/// Clone a declaration's owned sub-graph and remap its internal
/// back-references. The clone's containing scope is left pointing at the
/// original's; appending the clone somewhere is the caller's decision.
pub fn clone_decl(ast: &mut Ast, d: DeclId) -> (DeclId, CloneMap) {
    let mut map = CloneMap::default();
    let root = clone_decl_rec(ast, d, &mut map);
    remap(ast, &map);
    (root, map)
}

fn clone_expr_rec(ast: &mut Ast, e: ExprId, map: &mut CloneMap) -> ExprId {
    if let Some(&existing) = map.exprs.get(&e) {
        return existing;
    }

    let old = ast.expr(e).clone();
    let kind = match old.kind {
        ExprKind::Primary { token } => ExprKind::Primary { token },
        ExprKind::Tuple {
            kind,
            exprs,
            open,
            close,
        } => {
            let mut cloned = Vec::with_capacity(exprs.len());
            for c in exprs {
                cloned.push(clone_expr_rec(ast, c, map));
            }
            ExprKind::Tuple {
                kind,
                exprs: cloned,
                open,
                close,
            }
        }
        ExprKind::Apply { exprs } => {
            let mut cloned = Vec::with_capacity(exprs.len());
            for c in exprs {
                cloned.push(clone_expr_rec(ast, c, map));
            }
            ExprKind::Apply { exprs: cloned }
        }
        ExprKind::Symbol {
            identifier,
            exprs,
            open,
            close,
        } => {
            let mut cloned = Vec::with_capacity(exprs.len());
            for c in exprs {
                cloned.push(clone_expr_rec(ast, c, map));
            }
            ExprKind::Symbol {
                identifier,
                exprs: cloned,
                open,
                close,
            }
        }
        ExprKind::Constraint {
            subject,
            constraint,
        } => {
            let subject = clone_expr_rec(ast, subject, map);
            let constraint = clone_expr_rec(ast, constraint, map);
            ExprKind::Constraint {
                subject,
                constraint,
            }
        }
    };

    let mut constraints = Vec::with_capacity(old.constraints.len());
    for c in old.constraints {
        constraints.push(clone_expr_rec(ast, c, map));
    }

    let id = ast.alloc_expr(Expr {
        kind,
        constraints,
        // non-owning; rewritten by the remap pass when internal
        declaration: old.declaration,
    });
    map.exprs.insert(e, id);
    id
}

fn clone_decl_rec(ast: &mut Ast, d: DeclId, map: &mut CloneMap) -> DeclId {
    if let Some(&existing) = map.decls.get(&d) {
        return existing;
    }

    let identifier = ast.decl(d).symbol.identifier.clone();
    let old_params = ast.decl(d).symbol.parameters.clone();
    let old_vars = ast.decl(d).symbol.variables.clone();

    let mut parameters = Vec::with_capacity(old_params.len());
    for p in old_params {
        parameters.push(clone_expr_rec(ast, p, map));
    }
    let mut variables = Vec::with_capacity(old_vars.len());
    for v in old_vars {
        variables.push(clone_decl_rec(ast, v, map));
    }

    let kind = match ast.decl(d).kind.clone() {
        DeclKind::DataSum { definition } => DeclKind::DataSum {
            definition: definition.map(|s| clone_scope_rec(ast, s, map)),
        },
        DeclKind::DataProduct { definition } => DeclKind::DataProduct {
            definition: definition.map(|s| clone_scope_rec(ast, s, map)),
        },
        DeclKind::DataSumCtor { parent, fields } => {
            let mut cloned = Vec::with_capacity(fields.len());
            for f in fields {
                cloned.push(clone_decl_rec(ast, f, map));
            }
            DeclKind::DataSumCtor {
                parent,
                fields: cloned,
            }
        }
        DeclKind::Symbol { expr } => DeclKind::Symbol {
            expr: clone_expr_rec(ast, expr, map),
        },
        DeclKind::Procedure {
            params,
            return_type,
            result,
            definition,
        } => {
            let mut cloned_params = Vec::with_capacity(params.len());
            for p in params {
                cloned_params.push(clone_decl_rec(ast, p, map));
            }
            let return_type = return_type.map(|rt| clone_expr_rec(ast, rt, map));
            let result = result.map(|r| clone_decl_rec(ast, r, map));
            let definition = definition.map(|s| clone_scope_rec(ast, s, map));
            DeclKind::Procedure {
                params: cloned_params,
                return_type,
                result,
                definition,
            }
        }
        DeclKind::Variable { constraint, init } => DeclKind::Variable {
            constraint: constraint.map(|c| clone_expr_rec(ast, c, map)),
            init: init.map(|i| clone_expr_rec(ast, i, map)),
        },
        DeclKind::ProcedureParameter { parent, constraint } => DeclKind::ProcedureParameter {
            parent,
            constraint: constraint.map(|c| clone_expr_rec(ast, c, map)),
        },
        DeclKind::Import => DeclKind::Import,
        // the binding is non-owning and may point outside the clone
        DeclKind::SymbolVariable { parent, bound } => DeclKind::SymbolVariable { parent, bound },
    };

    let id = ast.alloc_decl(Decl::new(
        kind,
        Symbol {
            identifier,
            parameters,
            variables,
        },
    ));
    ast.decl_mut(id).scope = ast.decl(d).scope;
    map.decls.insert(d, id);
    id
}

fn clone_scope_rec(ast: &mut Ast, s: ScopeId, map: &mut CloneMap) -> ScopeId {
    if let Some(&existing) = map.scopes.get(&s) {
        return existing;
    }

    let (kind, module, parent, declaration, old_decls, old_exprs) = {
        let scope = ast.scope(s);
        (
            scope.kind,
            scope.module,
            scope.parent,
            scope.declaration,
            scope.decls.clone(),
            scope.exprs.clone(),
        )
    };

    let id = ast.alloc_scope(Scope::new(kind, module, parent));
    ast.scope_mut(id).declaration = declaration;
    map.scopes.insert(s, id);

    let mut decls = Vec::with_capacity(old_decls.len());
    for d in old_decls {
        decls.push(clone_decl_rec(ast, d, map));
    }
    let mut exprs = Vec::with_capacity(old_exprs.len());
    for e in old_exprs {
        exprs.push(clone_expr_rec(ast, e, map));
    }

    let scope = ast.scope_mut(id);
    scope.decls = decls;
    scope.exprs = exprs;
    id
}

/// Second pass: rewrite every non-owning reference of the clone that has a
/// counterpart in the map.
fn remap(ast: &mut Ast, map: &CloneMap) {
    for &new in map.exprs.values() {
        if let Some(d) = ast.expr(new).declaration {
            if let Some(&nd) = map.decls.get(&d) {
                ast.expr_mut(new).declaration = Some(nd);
            }
        }
    }

    for &new in map.decls.values() {
        if let Some(s) = ast.decl(new).scope {
            if let Some(&ns) = map.scopes.get(&s) {
                ast.decl_mut(new).scope = Some(ns);
            }
        }

        let mut kind = ast.decl(new).kind.clone();
        match &mut kind {
            DeclKind::DataSumCtor { parent, .. } => remap_decl_ref(parent, map),
            DeclKind::ProcedureParameter { parent, .. } => remap_decl_ref(parent, map),
            DeclKind::SymbolVariable { parent, bound } => {
                remap_decl_ref(parent, map);
                if let Some(b) = bound {
                    if let Some(&nb) = map.exprs.get(b) {
                        *b = nb;
                    }
                }
            }
            _ => {}
        }
        ast.decl_mut(new).kind = kind;
    }

    for &new in map.scopes.values() {
        let scope = ast.scope(new);
        let parent = scope.parent.and_then(|p| map.scopes.get(&p).copied());
        let declaration = scope
            .declaration
            .and_then(|d| map.decls.get(&d).copied());
        let scope = ast.scope_mut(new);
        if let Some(p) = parent {
            scope.parent = Some(p);
        }
        if let Some(d) = declaration {
            scope.declaration = Some(d);
        }
    }
}

fn remap_decl_ref(slot: &mut Option<DeclId>, map: &CloneMap) {
    if let Some(d) = slot {
        if let Some(&nd) = map.decls.get(d) {
            *d = nd;
        }
    }
}

impl ResolveCtx<'_> {
    /// Produce (or reuse) the instantiation of the `ti`-th prototype of a
    /// bucket under the given binding set. Binding sets are compared
    /// pairwise by variable and pattern equivalence of the bound
    /// expressions.
    pub(crate) fn instantiate(&mut self, key: SymSetKey, ti: usize, bindings: BindingSet) -> DeclId {
        {
            let t = &self.ms.ast.scope(key.scope).symbol_sets(key.procedure)[key.index].templates
                [ti];
            for (i, existing) in t.instance_bindings.iter().enumerate() {
                if existing.len() != bindings.len() {
                    continue;
                }
                let equivalent = existing
                    .iter()
                    .zip(&bindings)
                    .all(|(&(va, ea), &(vb, eb))| va == vb && match_equivalent(&self.ms.ast, ea, eb));
                if equivalent {
                    return t.instantiations[i];
                }
            }
        }

        let proto = self.ms.ast.scope(key.scope).symbol_sets(key.procedure)[key.index].templates
            [ti]
            .declaration;
        debug!(symbol = %self.ms.ast.decl(proto).name(), "instantiating template");

        let (instance, map) = clone_decl(&mut self.ms.ast, proto);

        // Record the instantiation before resolving its body so that a
        // self-referential definition finds the cache instead of recursing.
        {
            let t = &mut self.ms.ast.scope_mut(key.scope).symbol_sets_mut(key.procedure)
                [key.index]
                .templates[ti];
            t.instance_bindings.push(bindings.clone());
            t.instantiations.push(instance);
        }

        let clone_bindings: BindingSet = bindings
            .iter()
            .map(|&(var, value)| (map.decls[&var], value))
            .collect();

        self.with_resolver(Resolver::scoped(key.scope), |ctx| {
            ctx.bind_variables(instance, &clone_bindings);
            if matches!(ctx.ms.ast.decl(instance).kind, DeclKind::Procedure { .. }) {
                ctx.resolve_procedure(instance);
            } else {
                ctx.resolve_decl(instance);
            }
        });

        // The instance shares the prototype's scope and lifetime.
        self.ms.ast.scope_append_decl(key.scope, instance);
        self.ms.append_template_instance(key.scope, instance);
        instance
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::ModuleId;
    use crate::scope::ScopeKind;
    use crate::token::Token;

    fn sample_data_sum(ast: &mut Ast) -> (DeclId, ScopeId) {
        // Tree<\T> with a single ctor Leaf(value : T)
        let t_param = ast.free_variable("T");
        let tree = ast.alloc_decl(Decl::new(
            DeclKind::DataSum { definition: None },
            Symbol::with_parameters(Token::identifier("Tree"), vec![t_param]),
        ));
        let var = ast.symbol_create_variable(tree, "T");
        ast.expr_mut(t_param).declaration = Some(var);

        let definition = ast.alloc_scope(Scope::new(ScopeKind::DataSum, ModuleId(0), None));
        ast.scope_mut(definition).declaration = Some(tree);

        let t_use = ast.identifier("T");
        ast.expr_mut(t_use).declaration = Some(var);
        let field = ast.alloc_decl(Decl::new(
            DeclKind::Variable {
                constraint: Some(t_use),
                init: None,
            },
            Symbol::named("value"),
        ));
        let ctor = ast.alloc_decl(Decl::new(
            DeclKind::DataSumCtor {
                parent: Some(tree),
                fields: vec![field],
            },
            Symbol::named("Leaf"),
        ));
        ast.scope_append_decl(definition, ctor);

        if let DeclKind::DataSum { definition: def } = &mut ast.decl_mut(tree).kind {
            *def = Some(definition);
        }
        (tree, definition)
    }

    #[test]
    fn clone_allocates_fresh_nodes() {
        let mut ast = Ast::new();
        let (tree, _) = sample_data_sum(&mut ast);

        let exprs_before = ast.expr_count();
        let decls_before = ast.decl_count();
        let scopes_before = ast.scope_count();

        let (clone, map) = clone_decl(&mut ast, tree);

        assert_ne!(clone, tree);
        assert!(map.exprs.values().all(|e| e.0 as usize >= exprs_before));
        assert!(map.decls.values().all(|d| d.0 as usize >= decls_before));
        assert!(map.scopes.values().all(|s| s.0 as usize >= scopes_before));
    }

    #[test]
    fn clone_remaps_internal_references() {
        let mut ast = Ast::new();
        let (tree, definition) = sample_data_sum(&mut ast);

        let (clone, map) = clone_decl(&mut ast, tree);

        // the cloned pattern primary points at the cloned variable
        let cloned_param = ast.decl(clone).symbol.parameters[0];
        let cloned_var = ast.decl(clone).symbol.variables[0];
        assert_eq!(ast.expr(cloned_param).declaration, Some(cloned_var));
        assert_ne!(cloned_var, ast.decl(tree).symbol.variables[0]);

        // the cloned definition scope points back at the clone
        let cloned_def = map.scopes[&definition];
        assert_eq!(ast.scope(cloned_def).declaration, Some(clone));

        // the cloned ctor's parent is the clone, and its field constraint
        // refers to the cloned variable
        let cloned_ctor = ast.scope(cloned_def).decls[0];
        let DeclKind::DataSumCtor { parent, fields } = &ast.decl(cloned_ctor).kind else {
            panic!("expected ctor");
        };
        assert_eq!(*parent, Some(clone));
        let DeclKind::Variable {
            constraint: Some(c),
            ..
        } = &ast.decl(fields[0]).kind
        else {
            panic!("expected field constraint");
        };
        assert_eq!(ast.expr(*c).declaration, Some(cloned_var));
    }

    #[test]
    fn clone_is_disjoint_from_the_original() {
        let mut ast = Ast::new();
        let (tree, _) = sample_data_sum(&mut ast);

        let exprs_before = ast.expr_count() as u32;
        let decls_before = ast.decl_count() as u32;

        let (clone, map) = clone_decl(&mut ast, tree);

        // No owned reference inside the clone points into the original
        // sub-graph: everything maps to a fresh node or outside it.
        for &new_expr in map.exprs.values() {
            if let Some(d) = ast.expr(new_expr).declaration {
                assert!(
                    d.0 >= decls_before || !map.decls.contains_key(&d),
                    "clone refers into the original"
                );
            }
        }
        for &p in &ast.decl(clone).symbol.parameters {
            assert!(p.0 >= exprs_before);
        }
    }

    #[test]
    fn clone_does_not_copy_symbol_sets() {
        let mut ast = Ast::new();
        let (tree, definition) = sample_data_sum(&mut ast);
        ast.scope_create_symbol_set(definition, "Leaf", false);

        let (_, map) = clone_decl(&mut ast, tree);
        let cloned_def = map.scopes[&definition];
        assert!(ast.scope(cloned_def).symbols.is_empty());
    }
}
