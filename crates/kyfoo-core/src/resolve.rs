//! Symbol resolution
//!
//! This module performs semantic analysis on a module's scope tree:
//! - resolves identifier references and symbol expressions to declarations
//! - builds each scope's per-name overload buckets and rejects duplicates
//! - rewrites apply expressions into symbol expressions when a symbol set
//!   accepts the arguments, and collapses degenerate open tuples
//! - routes non-concrete hits through the template instantiator
//!
//! # Lookup policy
//!
//! An identifier is searched, in order, through:
//! - the current scope's buckets, the pattern variables of the declaration
//!   the scope defines, and (in procedure scopes) the procedure's parameters
//! - each ancestor scope the same way
//! - the root scopes of imported modules
//! - as a failover during symbol-pattern resolution only: a fresh pattern
//!   variable is created for the name, which is how new universally
//!   quantified parameters are discovered
//!
//! # The rewrite slot
//!
//! Expression resolution communicates replacements through a single-slot
//! outbox on the context: a child may reply with a replacement node, and
//! [`ResolveCtx::resolve_expr`] installs it over the child in place and
//! re-resolves until the slot stays empty. Every rewrite strictly reduces
//! the expression shape, so the loop terminates by construction.

use tracing::{debug, trace};

use crate::ast::{Decl, DeclId, DeclKind, Expr, ExprId, ExprKind, ModuleId, ScopeId, Symbol, TupleKind};
use crate::diagnostic::{DiagKind, Diagnostics};
use crate::matcher::{match_equivalent_lists, ValueMatcher};
use crate::module::ModuleSet;
use crate::scope::{BindingSet, LookupHit, SymSetKey};
use crate::token::{is_identifier, Token, TokenKind};

/// Lexical lookup policy: where the context currently stands, which extra
/// symbols are visible, and whether unresolved names may become pattern
/// variables.
#[derive(Debug, Clone)]
pub struct Resolver {
    pub scope: ScopeId,
    /// Declarations whose symbol variables are additionally in scope, used
    /// while resolving procedure prototypes.
    pub supplementary: Vec<DeclId>,
    /// When set, a lookup miss creates a fresh variable on this
    /// declaration's symbol instead of failing.
    pub failover: Option<DeclId>,
}

impl Resolver {
    pub fn scoped(scope: ScopeId) -> Self {
        Self {
            scope,
            supplementary: Vec::new(),
            failover: None,
        }
    }
}

/// Resolve a module: imports first, then every declaration of its root
/// scope.
pub fn resolve_module(ms: &mut ModuleSet, module: ModuleId, dgn: &mut Diagnostics) {
    debug!(module = %ms.module(module).name, "resolving module");

    let root = ms.module(module).scope;
    resolve_imports(ms, module, root);

    let mut ctx = ResolveCtx {
        ms,
        dgn,
        resolver: Resolver::scoped(root),
        rewrite: None,
    };
    ctx.resolve_scope(root);
}

/// Materialise the import edges of a scope. Imports must resolve before
/// symbols so that lookup can reach the imported root scopes.
fn resolve_imports(ms: &mut ModuleSet, module: ModuleId, scope: ScopeId) {
    let imports: Vec<String> = ms
        .ast
        .scope(scope)
        .decls
        .iter()
        .filter(|&&d| matches!(ms.ast.decl(d).kind, DeclKind::Import))
        .map(|&d| ms.ast.decl(d).name().to_string())
        .collect();
    for name in imports {
        ms.import(module, &name);
    }
}

/// Mutable state threaded through one resolution walk.
pub struct ResolveCtx<'a> {
    pub ms: &'a mut ModuleSet,
    pub dgn: &'a mut Diagnostics,
    pub(crate) resolver: Resolver,
    rewrite: Option<Expr>,
}

impl<'a> ResolveCtx<'a> {
    pub fn new(ms: &'a mut ModuleSet, dgn: &'a mut Diagnostics, resolver: Resolver) -> Self {
        Self {
            ms,
            dgn,
            resolver,
            rewrite: None,
        }
    }

    fn module_name(&self) -> String {
        let module = self.ms.ast.scope(self.resolver.scope).module;
        self.ms.module(module).name.clone()
    }

    fn error_token(&mut self, token: Token, kind: DiagKind) {
        let module = self.module_name();
        self.dgn.error(module, token, kind);
    }

    fn error_expr(&mut self, id: ExprId, kind: DiagKind) {
        let token = self.ms.ast.front(id);
        self.error_token(token, kind);
    }

    /// (module, name, identifier) triple of a declaration, for `.see`
    /// cross-references.
    fn see_info(&self, d: DeclId) -> (String, String, Token) {
        let decl = self.ms.ast.decl(d);
        let module = match decl.scope {
            Some(s) => {
                let m = self.ms.ast.scope(s).module;
                self.ms.module(m).name.clone()
            }
            None => self.module_name(),
        };
        (module, decl.name().to_string(), decl.identifier().clone())
    }

    pub(crate) fn with_resolver<R>(
        &mut self,
        resolver: Resolver,
        f: impl FnOnce(&mut Self) -> R,
    ) -> R {
        let saved = std::mem::replace(&mut self.resolver, resolver);
        let out = f(self);
        self.resolver = saved;
        out
    }

    /// Child-to-parent replacement channel; see the module docs.
    fn rewrite_to(&mut self, node: Expr) {
        debug_assert!(self.rewrite.is_none(), "rewrite slot already occupied");
        self.rewrite = Some(node);
    }

    // ------------------------------------------------------------------
    // Scopes and declarations

    /// Resolve every declaration of a scope: symbol patterns and buckets
    /// first, then bodies, with procedure bodies deferred until all
    /// prototypes of the scope are visible.
    pub fn resolve_scope(&mut self, scope: ScopeId) {
        let decls = self.ms.ast.scope(scope).decls.clone();
        let module = self.ms.ast.scope(scope).module;
        self.with_resolver(Resolver::scoped(scope), |ctx| {
            let mut procedures = Vec::new();

            for d in decls {
                // Template instances share their prototype's scope but are
                // resolved by the instantiator, not the scope walk.
                if ctx.ms.module(module).template_instances.contains(&d) {
                    continue;
                }

                ctx.resolve_symbol(d);

                let is_procedure = matches!(ctx.ms.ast.decl(d).kind, DeclKind::Procedure { .. });
                let name = ctx.ms.ast.decl(d).name().to_string();
                let params = ctx.ms.ast.decl(d).symbol.parameters.clone();

                let index = ctx.ms.ast.scope_create_symbol_set(scope, &name, is_procedure);
                match ctx.find_equivalent_in_set(scope, index, is_procedure, &params) {
                    Some(other) if other != d => {
                        let token = ctx.ms.ast.decl(d).identifier().clone();
                        let see = ctx.see_info(other);
                        let module = ctx.module_name();
                        ctx.dgn
                            .error(module, token, DiagKind::DuplicateDeclaration)
                            .see(see.0, see.1, see.2);
                        continue;
                    }
                    // the declaration is already registered; this is a
                    // re-resolution pass
                    Some(_) => {}
                    None => {
                        ctx.ms.ast.scope_mut(scope).symbol_sets_mut(is_procedure)[index]
                            .append(params, d);
                    }
                }

                if is_procedure {
                    procedures.push(d);
                } else {
                    ctx.resolve_decl(d);
                }
            }

            for p in procedures {
                ctx.resolve_procedure(p);
            }
        });
    }

    fn find_equivalent_in_set(
        &self,
        scope: ScopeId,
        index: usize,
        procedure: bool,
        params: &[ExprId],
    ) -> Option<DeclId> {
        let set = &self.ms.ast.scope(scope).symbol_sets(procedure)[index];
        set.templates
            .iter()
            .find(|t| match_equivalent_lists(&self.ms.ast, &t.params, params))
            .map(|t| t.declaration)
    }

    /// Resolve a declaration's symbol pattern: free-variable primaries
    /// become pattern variables, then the parameters are resolved under a
    /// failover resolver so that any dangling identifier in the pattern
    /// becomes a pattern variable as well.
    pub fn resolve_symbol(&mut self, owner: DeclId) {
        let params = self.ms.ast.decl(owner).symbol.parameters.clone();
        for &p in &params {
            self.bind_free_variables(p, owner);
        }

        let mut resolver = self.resolver.clone();
        resolver.failover = Some(owner);
        self.with_resolver(resolver, |ctx| ctx.resolve_exprs(&params));
    }

    /// Stamp every free-variable primary under `expr` with a variable of
    /// `owner`'s symbol, creating variables on first sight of a name.
    fn bind_free_variables(&mut self, expr: ExprId, owner: DeclId) {
        for fv in self.ms.ast.gather_free_variables(expr) {
            if self.ms.ast.expr(fv).declaration.is_some() {
                continue;
            }
            let name = self
                .ms
                .ast
                .expr(fv)
                .as_primary()
                .expect("free variables are primaries")
                .lexeme()
                .to_string();
            let var = self.ms.ast.symbol_create_variable(owner, &name);
            self.ms.ast.expr_mut(fv).declaration = Some(var);
        }
    }

    /// Resolve a declaration's body. The symbol pattern and bucket
    /// membership are handled by [`ResolveCtx::resolve_scope`]; procedures
    /// go through [`ResolveCtx::resolve_procedure`] instead.
    pub fn resolve_decl(&mut self, d: DeclId) {
        match self.ms.ast.decl(d).kind.clone() {
            DeclKind::DataSum { definition } | DeclKind::DataProduct { definition } => {
                if let Some(s) = definition {
                    self.resolve_scope(s);
                }
            }
            DeclKind::DataSumCtor { fields, .. } => {
                for f in fields {
                    self.resolve_variable(f);
                }
            }
            DeclKind::Symbol { expr } => self.resolve_expr(expr),
            DeclKind::Variable { .. } | DeclKind::ProcedureParameter { .. } => {
                self.resolve_variable(d);
            }
            DeclKind::Procedure { .. } => self.resolve_procedure(d),
            DeclKind::Import | DeclKind::SymbolVariable { .. } => {}
        }
    }

    fn resolve_variable(&mut self, d: DeclId) {
        let (constraint, init) = match &self.ms.ast.decl(d).kind {
            DeclKind::Variable { constraint, init } => (*constraint, *init),
            DeclKind::ProcedureParameter { constraint, .. } => (*constraint, None),
            other => panic!("not a variable declaration: {}", other.name()),
        };
        if let Some(c) = constraint {
            self.resolve_expr(c);
            self.check_type_position(c);
        }
        if let Some(i) = init {
            self.resolve_expr(i);
        }
    }

    /// Two-phase procedure resolution: the prototype first, so that
    /// overload lookup can compare shapes, then the body scope.
    pub fn resolve_procedure(&mut self, d: DeclId) {
        self.resolve_prototype(d);

        let definition = match &self.ms.ast.decl(d).kind {
            DeclKind::Procedure { definition, .. } => *definition,
            other => panic!("not a procedure: {}", other.name()),
        };
        if let Some(def) = definition {
            self.resolve_scope(def);
            let exprs = self.ms.ast.scope(def).exprs.clone();
            self.with_resolver(Resolver::scoped(def), |ctx| ctx.resolve_exprs(&exprs));
        }
    }

    /// Resolve parameter constraints and the return type of a procedure.
    /// Free variables in either bind to the procedure symbol's variables,
    /// which stay visible as supplementary symbols for the duration.
    pub fn resolve_prototype(&mut self, d: DeclId) {
        let (params, return_type, result) = match &self.ms.ast.decl(d).kind {
            DeclKind::Procedure {
                params,
                return_type,
                result,
                ..
            } => (params.clone(), *return_type, *result),
            other => panic!("not a procedure: {}", other.name()),
        };

        for &p in &params {
            if let DeclKind::ProcedureParameter {
                constraint: Some(c),
                ..
            } = self.ms.ast.decl(p).kind
            {
                self.bind_free_variables(c, d);
            }
        }
        if let Some(rt) = return_type {
            self.bind_free_variables(rt, d);
        }

        let scope = self.ms.ast.decl(d).scope.unwrap_or(self.resolver.scope);
        let mut resolver = Resolver::scoped(scope);
        resolver.supplementary.push(d);
        self.with_resolver(resolver, |ctx| {
            for &p in &params {
                ctx.resolve_variable(p);
            }
            if let Some(rt) = return_type {
                ctx.resolve_expr(rt);
                ctx.check_type_position(rt);
            }
        });

        // The return type materialises as the result parameter.
        if result.is_none() {
            if let Some(rt) = return_type {
                let result_decl = self.ms.ast.alloc_decl(Decl::new(
                    DeclKind::ProcedureParameter {
                        parent: Some(d),
                        constraint: Some(rt),
                    },
                    Symbol::named("result"),
                ));
                let owner_scope = self.ms.ast.decl(d).scope;
                self.ms.ast.decl_mut(result_decl).scope = owner_scope;
                if let DeclKind::Procedure { result, .. } = &mut self.ms.ast.decl_mut(d).kind {
                    *result = Some(result_decl);
                }
            }
        }
    }

    /// An expression in type position must name a type-like declaration.
    fn check_type_position(&mut self, e: ExprId) {
        let target = self.ms.ast.resolve_indirections(e);
        let Some(d) = self.ms.ast.expr(target).declaration else {
            return; // unresolved; already reported
        };
        let ok = matches!(
            self.ms.ast.decl(d).kind,
            DeclKind::DataSum { .. }
                | DeclKind::DataProduct { .. }
                | DeclKind::SymbolVariable { .. }
        );
        if !ok {
            let token = self.ms.ast.front(e);
            let see = self.see_info(d);
            let module = self.module_name();
            self.dgn
                .error(module, token, DiagKind::NotAType)
                .see(see.0, see.1, see.2);
        }
    }

    /// Bind a symbol's variables to concrete expressions and re-resolve its
    /// parameters. The binding set must cover the variables exactly; a
    /// mismatch is a programming error.
    pub fn bind_variables(&mut self, owner: DeclId, bindings: &BindingSet) {
        let vars = self.ms.ast.decl(owner).symbol.variables.clone();
        assert_eq!(
            bindings.len(),
            vars.len(),
            "template parameter binding mismatch"
        );
        for &(var, value) in bindings {
            assert!(vars.contains(&var), "template parameter binding mismatch");
            self.ms.ast.bind_symbol_variable(var, value);
        }

        let params = self.ms.ast.decl(owner).symbol.parameters.clone();
        self.resolve_exprs(&params);
    }

    // ------------------------------------------------------------------
    // Expressions

    pub fn resolve_exprs(&mut self, ids: &[ExprId]) {
        for &e in ids {
            self.resolve_expr(e);
        }
    }

    /// Resolve one expression to fixpoint, installing any replacement the
    /// shape-specific resolution replied with.
    pub fn resolve_expr(&mut self, id: ExprId) {
        loop {
            self.resolve_expr_once(id);
            match self.rewrite.take() {
                Some(node) => *self.ms.ast.expr_mut(id) = node,
                None => break,
            }
        }

        let constraints = self.ms.ast.expr(id).constraints.clone();
        self.resolve_exprs(&constraints);
    }

    fn resolve_expr_once(&mut self, id: ExprId) {
        match self.ms.ast.expr(id).kind.clone() {
            ExprKind::Primary { token } => self.resolve_primary(id, token),
            ExprKind::Tuple {
                kind, exprs, open, ..
            } => self.resolve_tuple(kind, exprs, open),
            ExprKind::Apply { exprs } => self.resolve_apply(id, exprs),
            ExprKind::Symbol {
                identifier, exprs, ..
            } => self.resolve_symbol_expr(id, identifier, exprs),
            ExprKind::Constraint {
                subject,
                constraint,
            } => {
                self.resolve_expr(subject);
                self.resolve_expr(constraint);
            }
        }
    }

    fn resolve_primary(&mut self, id: ExprId, token: Token) {
        match token.kind() {
            TokenKind::FreeVariable => {
                if self.ms.ast.expr(id).declaration.is_none() {
                    self.error_token(token, DiagKind::UnexpectedFreeVariable);
                }
            }
            TokenKind::Integer => {
                self.ms.ast.expr_mut(id).declaration = Some(self.ms.axioms().integer_type);
            }
            TokenKind::Decimal => {
                self.ms.ast.expr_mut(id).declaration = Some(self.ms.axioms().decimal_type);
            }
            TokenKind::Text => {
                self.ms.ast.expr_mut(id).declaration = Some(self.ms.axioms().text_type);
            }
            TokenKind::Identifier => {
                // A pattern variable stays bound; everything else re-resolves
                // so that cloned bodies pick up their instantiated context.
                if let Some(d) = self.ms.ast.expr(id).declaration {
                    if self.ms.ast.decl(d).is_symbol_variable() {
                        return;
                    }
                }
                let hit = self.match_value(token.lexeme(), &[]);
                if let Some(d) = hit.best_decl() {
                    self.ms.ast.expr_mut(id).declaration = Some(d);
                } else if hit.sym_set.is_none() {
                    self.error_token(token, DiagKind::UndeclaredIdentifier);
                }
                // A known name without a value hit yet defers silently.
            }
            _ => {}
        }
    }

    fn resolve_tuple(&mut self, kind: TupleKind, exprs: Vec<ExprId>, open: Token) {
        self.resolve_exprs(&exprs);

        if kind != TupleKind::Open {
            return;
        }
        if exprs.is_empty() {
            let mut node = Expr::new(ExprKind::Primary { token: open });
            node.declaration = Some(self.ms.axioms().empty_type);
            self.rewrite_to(node);
        } else if exprs.len() == 1 {
            let node = self.ms.ast.expr(exprs[0]).clone();
            self.rewrite_to(node);
        }
    }

    fn resolve_apply(&mut self, id: ExprId, exprs: Vec<ExprId>) {
        self.resolve_exprs(&exprs);

        let Some(&first) = exprs.first() else {
            return;
        };
        if matches!(self.ms.ast.expr(first).kind, ExprKind::Symbol { .. }) {
            // explicit procedure lookup
            return;
        }

        let Some(token) = self.ms.ast.expr(first).as_primary().cloned() else {
            self.error_expr(id, DiagKind::ImplicitApplyNonIdentifier);
            return;
        };
        if !is_identifier(token.kind()) {
            self.error_expr(id, DiagKind::ImplicitApplyNonIdentifier);
            return;
        }
        if exprs.len() == 1 {
            let node = self.ms.ast.expr(first).clone();
            self.rewrite_to(node);
            return;
        }
        if token.kind() == TokenKind::FreeVariable {
            // defer until a concrete expression is instantiated
            return;
        }

        let args = &exprs[1..];
        let hit = self.match_value(token.lexeme(), args);
        if hit.is_hit() {
            // Transmute the apply expression into a symbol expression; the
            // replacement re-resolves and records the declaration.
            self.rewrite_to(Expr::new(ExprKind::Symbol {
                identifier: token,
                exprs: args.to_vec(),
                open: Token::synthetic(TokenKind::OpenAngle, "<"),
                close: Token::synthetic(TokenKind::CloseAngle, ">"),
            }));
            return;
        }

        let proc_hit = self.match_procedure(token.lexeme(), args);
        if let Some(d) = proc_hit.best_decl() {
            self.ms.ast.expr_mut(id).declaration = Some(d);
            return;
        }

        let mut candidates = Vec::new();
        if let Some(key) = proc_hit.sym_set.or(hit.sym_set) {
            let protos: Vec<DeclId> = self.ms.ast.scope(key.scope).symbol_sets(key.procedure)
                [key.index]
                .prototypes()
                .collect();
            for p in protos {
                candidates.push(self.see_info(p));
            }
        }

        let front = self.ms.ast.front(id);
        let module = self.module_name();
        let err = self.dgn.error(module, front, DiagKind::NoMatchingOverload);
        for (m, n, t) in candidates {
            err.see(m, n, t);
        }
    }

    fn resolve_symbol_expr(&mut self, id: ExprId, identifier: Token, exprs: Vec<ExprId>) {
        let (identifier, exprs) = if identifier.kind() == TokenKind::Undefined {
            if exprs.is_empty() {
                return;
            }
            let first = exprs[0];
            let subject = self.ms.ast.expr(first).as_primary().cloned();
            let Some(subject) = subject.filter(|t| is_identifier(t.kind())) else {
                self.error_expr(id, DiagKind::SymbolTupleMissingIdentifier);
                return;
            };
            let rest = exprs[1..].to_vec();
            if let ExprKind::Symbol {
                identifier, exprs, ..
            } = &mut self.ms.ast.expr_mut(id).kind
            {
                *identifier = subject.clone();
                *exprs = rest.clone();
            }
            (subject, rest)
        } else {
            (identifier, exprs)
        };

        self.resolve_exprs(&exprs);

        let before = self.dgn.error_count();
        for &e in &exprs {
            self.enforce_resolution(e);
        }
        if self.dgn.error_count() != before {
            return;
        }

        let hit = self.match_value(identifier.lexeme(), &exprs);
        if let Some(d) = hit.best_decl() {
            self.ms.ast.expr_mut(id).declaration = Some(d);
        } else {
            self.error_expr(id, DiagKind::UndeclaredSymbol);
        }
    }

    /// Report every identifier primary under `id` that resolution left
    /// without a declaration.
    fn enforce_resolution(&mut self, id: ExprId) {
        match self.ms.ast.expr(id).kind.clone() {
            ExprKind::Primary { token } => {
                if token.kind() == TokenKind::Identifier
                    && self.ms.ast.expr(id).declaration.is_none()
                {
                    self.error_token(token, DiagKind::UnresolvedIdentifier);
                }
            }
            ExprKind::Tuple { exprs, .. }
            | ExprKind::Apply { exprs }
            | ExprKind::Symbol { exprs, .. } => {
                for e in exprs {
                    self.enforce_resolution(e);
                }
            }
            ExprKind::Constraint {
                subject,
                constraint,
            } => {
                self.enforce_resolution(subject);
                self.enforce_resolution(constraint);
            }
        }
    }

    // ------------------------------------------------------------------
    // Lookup

    /// Value lookup: pattern-match `name` applied to `args` against the
    /// visible symbol sets, walking outward and then through imports.
    pub fn match_value(&mut self, name: &str, args: &[ExprId]) -> LookupHit {
        trace!(name, args = args.len(), "value lookup");
        let start = self.resolver.scope;
        let mut first_set: Option<SymSetKey> = None;

        let mut cursor = Some(start);
        while let Some(s) = cursor {
            if let Some(index) = self.ms.ast.scope_find_symbol_set(s, name, false) {
                let key = SymSetKey {
                    scope: s,
                    index,
                    procedure: false,
                };
                let hit = self.find_value_in_set(key, args);
                if hit.is_hit() {
                    return hit;
                }
                first_set.get_or_insert(key);
            }
            if first_set.is_none() {
                // A procedure bucket still counts as "the name exists", so
                // that a bare reference to an overloaded name defers
                // silently instead of reporting it undeclared.
                if let Some(index) = self.ms.ast.scope_find_symbol_set(s, name, true) {
                    first_set = Some(SymSetKey {
                        scope: s,
                        index,
                        procedure: true,
                    });
                }
            }

            if args.is_empty() {
                if let Some(owner) = self.ms.ast.scope(s).declaration {
                    if let Some(var) = self.ms.ast.symbol_find_variable(owner, name) {
                        return LookupHit::of_decl(var);
                    }
                    if let DeclKind::Procedure { params, .. } = &self.ms.ast.decl(owner).kind {
                        if let Some(&p) =
                            params.iter().find(|&&p| self.ms.ast.decl(p).name() == name)
                        {
                            return LookupHit::of_decl(p);
                        }
                    }
                }
                if s == start {
                    for &owner in &self.resolver.supplementary.clone() {
                        if let Some(var) = self.ms.ast.symbol_find_variable(owner, name) {
                            return LookupHit::of_decl(var);
                        }
                    }
                }
            }

            cursor = self.ms.ast.scope(s).parent;
        }

        // imports of the current module
        let module = self.ms.ast.scope(start).module;
        for m in self.ms.module(module).imports.clone() {
            let root = self.ms.module(m).scope;
            if let Some(index) = self.ms.ast.scope_find_symbol_set(root, name, false) {
                let key = SymSetKey {
                    scope: root,
                    index,
                    procedure: false,
                };
                let hit = self.find_value_in_set(key, args);
                if hit.is_hit() {
                    return hit;
                }
                first_set.get_or_insert(key);
            }
            if first_set.is_none() {
                if let Some(index) = self.ms.ast.scope_find_symbol_set(root, name, true) {
                    first_set = Some(SymSetKey {
                        scope: root,
                        index,
                        procedure: true,
                    });
                }
            }
        }

        // failover: the name becomes a pattern variable of the symbol under
        // resolution
        if args.is_empty() {
            if let Some(owner) = self.resolver.failover {
                let var = self.ms.ast.symbol_create_variable(owner, name);
                return LookupHit::of_decl(var);
            }
        }

        LookupHit::miss(first_set)
    }

    /// Procedure overload lookup: the same walk restricted to the
    /// procedure buckets.
    pub fn match_procedure(&mut self, name: &str, args: &[ExprId]) -> LookupHit {
        let start = self.resolver.scope;
        let mut first_set: Option<SymSetKey> = None;

        let mut cursor = Some(start);
        while let Some(s) = cursor {
            if let Some(index) = self.ms.ast.scope_find_symbol_set(s, name, true) {
                let key = SymSetKey {
                    scope: s,
                    index,
                    procedure: true,
                };
                let hit = self.find_value_in_set(key, args);
                if hit.is_hit() {
                    return hit;
                }
                first_set.get_or_insert(key);
            }
            cursor = self.ms.ast.scope(s).parent;
        }

        let module = self.ms.ast.scope(start).module;
        for m in self.ms.module(module).imports.clone() {
            let root = self.ms.module(m).scope;
            if let Some(index) = self.ms.ast.scope_find_symbol_set(root, name, true) {
                let key = SymSetKey {
                    scope: root,
                    index,
                    procedure: true,
                };
                let hit = self.find_value_in_set(key, args);
                if hit.is_hit() {
                    return hit;
                }
                first_set.get_or_insert(key);
            }
        }

        LookupHit::miss(first_set)
    }

    /// Scan the prototypes of one bucket for a value match. The first
    /// prototype in insertion order wins. Concrete hits and hits that left
    /// the arguments polymorphic return the prototype; everything else is
    /// routed through the instantiator.
    fn find_value_in_set(&mut self, key: SymSetKey, args: &[ExprId]) -> LookupHit {
        let len = self.ms.ast.scope(key.scope).symbol_sets(key.procedure)[key.index]
            .templates
            .len();

        for ti in 0..len {
            let (params, proto) = {
                let t =
                    &self.ms.ast.scope(key.scope).symbol_sets(key.procedure)[key.index].templates[ti];
                (t.params.clone(), t.declaration)
            };

            let mut m = ValueMatcher::new();
            if !m.match_value_lists(&self.ms.ast, &params, args) {
                continue;
            }

            if self.ms.ast.symbol_is_concrete(proto) {
                return LookupHit::of_template(proto, None, key);
            }
            if !m.right_bindings.is_empty() {
                // The caller's argument is itself still polymorphic; pass
                // the prototype through without instantiating.
                return LookupHit::of_template(proto, None, key);
            }

            // Order the captured bindings by the prototype's variable list.
            let vars = self.ms.ast.decl(proto).symbol.variables.clone();
            let mut bindings = BindingSet::new();
            for v in vars {
                match m.left_bindings.iter().find(|&&(var, _)| var == v) {
                    Some(&entry) => bindings.push(entry),
                    None => return LookupHit::of_template(proto, None, key),
                }
            }

            let instance = self.instantiate(key, ti, bindings);
            return LookupHit::of_template(proto, Some(instance), key);
        }

        LookupHit::miss(Some(key))
    }
}
