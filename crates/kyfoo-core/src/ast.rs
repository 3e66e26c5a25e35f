//! The semantic graph: expressions, declarations, and symbols
//!
//! Every node lives in a single [`Ast`] store and is addressed by a typed id.
//! Owning edges (a declaration owns its symbol and definition scope, a symbol
//! owns its parameter expressions and variables, an expression owns its
//! sub-expressions) are the id fields of the owning node; back-edges
//! (expression → declaration, declaration → containing scope, scope → parent)
//! are ids too, and are valid for the lifetime of the store. Cloning a
//! declaration sub-graph allocates fresh ids and remaps the back-edges; see
//! the `instantiate` module.

use std::any::Any;
use std::fmt;

use crate::scope::{Scope, SymbolSet};
use crate::token::{Token, TokenKind};

/// Id of an expression node in the [`Ast`] store.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExprId(pub u32);

/// Id of a declaration node in the [`Ast`] store.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeclId(pub u32);

/// Id of a scope node in the [`Ast`] store.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(pub u32);

/// Id of a module in the owning [`crate::module::ModuleSet`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(pub u32);

impl fmt::Debug for ExprId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ExprId({})", self.0)
    }
}

impl fmt::Debug for DeclId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeclId({})", self.0)
    }
}

impl fmt::Debug for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ScopeId({})", self.0)
    }
}

impl fmt::Debug for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ModuleId({})", self.0)
    }
}

/// Bracket shape of a tuple expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TupleKind {
    /// `( ... )`
    Open,
    /// `( ... ]`
    OpenLeft,
    /// `[ ... )`
    OpenRight,
    /// `[ ... ]`
    Closed,
}

impl TupleKind {
    pub fn open_delimiter(self) -> &'static str {
        match self {
            TupleKind::Open | TupleKind::OpenLeft => "(",
            TupleKind::OpenRight | TupleKind::Closed => "[",
        }
    }

    pub fn close_delimiter(self) -> &'static str {
        match self {
            TupleKind::Open | TupleKind::OpenRight => ")",
            TupleKind::OpenLeft | TupleKind::Closed => "]",
        }
    }
}

/// Derive the tuple kind from its delimiter tokens.
///
/// Panics on a bracket pair the grammar cannot produce; this cannot arise
/// from valid parser output.
pub fn tuple_kind(open: TokenKind, close: TokenKind) -> TupleKind {
    match (open, close) {
        (TokenKind::OpenParen, TokenKind::CloseParen) => TupleKind::Open,
        (TokenKind::OpenParen, TokenKind::CloseBracket) => TupleKind::OpenLeft,
        (TokenKind::OpenBracket, TokenKind::CloseParen) => TupleKind::OpenRight,
        (TokenKind::OpenBracket, TokenKind::CloseBracket) => TupleKind::Closed,
        (open, close) => panic!("invalid tuple delimiters: {:?} {:?}", open, close),
    }
}

/// One of the five expression shapes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExprKind {
    /// A single token: identifier, literal, or free variable.
    Primary { token: Token },
    /// An ordered grouping with a bracket shape.
    Tuple {
        kind: TupleKind,
        exprs: Vec<ExprId>,
        open: Token,
        close: Token,
    },
    /// Juxtaposition; the first element is the callee.
    Apply { exprs: Vec<ExprId> },
    /// A symbol reference `name<args...>`. An `Undefined` identifier means
    /// the head has not been rotated out of the argument list yet.
    Symbol {
        identifier: Token,
        exprs: Vec<ExprId>,
        open: Token,
        close: Token,
    },
    /// `subject : constraint`. Both sides are always present.
    Constraint { subject: ExprId, constraint: ExprId },
}

/// An expression node: a shape, attached constraints, and the declaration it
/// resolved to (if resolution has succeeded).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expr {
    pub kind: ExprKind,
    pub constraints: Vec<ExprId>,
    pub declaration: Option<DeclId>,
}

impl Expr {
    pub fn new(kind: ExprKind) -> Self {
        Self {
            kind,
            constraints: Vec::new(),
            declaration: None,
        }
    }

    pub fn as_primary(&self) -> Option<&Token> {
        match &self.kind {
            ExprKind::Primary { token } => Some(token),
            _ => None,
        }
    }

    pub fn as_tuple(&self) -> Option<(TupleKind, &[ExprId])> {
        match &self.kind {
            ExprKind::Tuple { kind, exprs, .. } => Some((*kind, exprs)),
            _ => None,
        }
    }

    pub fn as_apply(&self) -> Option<&[ExprId]> {
        match &self.kind {
            ExprKind::Apply { exprs } => Some(exprs),
            _ => None,
        }
    }

    pub fn as_symbol(&self) -> Option<(&Token, &[ExprId])> {
        match &self.kind {
            ExprKind::Symbol {
                identifier, exprs, ..
            } => Some((identifier, exprs)),
            _ => None,
        }
    }

    pub fn as_constraint(&self) -> Option<(ExprId, ExprId)> {
        match &self.kind {
            ExprKind::Constraint {
                subject,
                constraint,
            } => Some((*subject, *constraint)),
            _ => None,
        }
    }
}

/// The declaration kinds, with their kind-specific payloads.
#[derive(Debug, Clone)]
pub enum DeclKind {
    DataSum {
        definition: Option<ScopeId>,
    },
    DataSumCtor {
        parent: Option<DeclId>,
        fields: Vec<DeclId>,
    },
    DataProduct {
        definition: Option<ScopeId>,
    },
    /// A symbol alias `name = expression`.
    Symbol {
        expr: ExprId,
    },
    Procedure {
        params: Vec<DeclId>,
        return_type: Option<ExprId>,
        /// Materialised from `return_type` during prototype resolution.
        result: Option<DeclId>,
        definition: Option<ScopeId>,
    },
    Variable {
        constraint: Option<ExprId>,
        init: Option<ExprId>,
    },
    ProcedureParameter {
        parent: Option<DeclId>,
        constraint: Option<ExprId>,
    },
    Import,
    /// A pattern variable of its parent declaration's symbol. `bound` is the
    /// expression it currently stands for; `None` while still free.
    SymbolVariable {
        parent: Option<DeclId>,
        bound: Option<ExprId>,
    },
}

impl DeclKind {
    pub fn name(&self) -> &'static str {
        match self {
            DeclKind::DataSum { .. } => "data sum",
            DeclKind::DataSumCtor { .. } => "data sum ctor",
            DeclKind::DataProduct { .. } => "data product",
            DeclKind::Symbol { .. } => "symbol",
            DeclKind::Procedure { .. } => "procedure",
            DeclKind::Variable { .. } => "variable",
            DeclKind::ProcedureParameter { .. } => "procedure parameter",
            DeclKind::Import => "import",
            DeclKind::SymbolVariable { .. } => "symbol variable",
        }
    }

    /// Kinds whose definitions are scopes of their own.
    pub fn definition(&self) -> Option<ScopeId> {
        match self {
            DeclKind::DataSum { definition }
            | DeclKind::DataProduct { definition }
            | DeclKind::Procedure { definition, .. } => *definition,
            _ => None,
        }
    }
}

/// A declaration: a symbol naming it, its containing scope, and an opaque
/// slot for a code generator to attach lowered artifacts.
pub struct Decl {
    pub kind: DeclKind,
    pub symbol: Symbol,
    pub scope: Option<ScopeId>,
    codegen: Option<Box<dyn Any>>,
}

impl fmt::Debug for Decl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Decl")
            .field("kind", &self.kind)
            .field("symbol", &self.symbol)
            .field("scope", &self.scope)
            .field("codegen", &self.codegen.is_some())
            .finish()
    }
}

impl Decl {
    pub fn new(kind: DeclKind, symbol: Symbol) -> Self {
        Self {
            kind,
            symbol,
            scope: None,
            codegen: None,
        }
    }

    pub fn name(&self) -> &str {
        self.symbol.name()
    }

    pub fn identifier(&self) -> &Token {
        &self.symbol.identifier
    }

    pub fn is_symbol_variable(&self) -> bool {
        matches!(self.kind, DeclKind::SymbolVariable { .. })
    }

    pub fn codegen_data(&self) -> Option<&dyn Any> {
        self.codegen.as_deref()
    }

    pub fn set_codegen_data(&mut self, data: Box<dyn Any>) {
        self.codegen = Some(data);
    }
}

/// An identifier together with its parameter pattern and the pattern
/// variables the pattern quantifies over.
#[derive(Debug)]
pub struct Symbol {
    pub identifier: Token,
    pub parameters: Vec<ExprId>,
    /// `SymbolVariable` declarations, created lazily while resolving the
    /// parameter pattern.
    pub variables: Vec<DeclId>,
}

impl Symbol {
    pub fn new(identifier: Token) -> Self {
        Self {
            identifier,
            parameters: Vec::new(),
            variables: Vec::new(),
        }
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self::new(Token::identifier(name))
    }

    pub fn with_parameters(identifier: Token, parameters: Vec<ExprId>) -> Self {
        Self {
            identifier,
            parameters,
            variables: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        self.identifier.lexeme()
    }
}

/// The node store. All expressions, declarations, and scopes of a module set
/// live here so that cross-module references are plain ids.
#[derive(Debug, Default)]
pub struct Ast {
    exprs: Vec<Expr>,
    decls: Vec<Decl>,
    scopes: Vec<Scope>,
}

impl Ast {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn expr(&self, id: ExprId) -> &Expr {
        &self.exprs[id.0 as usize]
    }

    pub fn expr_mut(&mut self, id: ExprId) -> &mut Expr {
        &mut self.exprs[id.0 as usize]
    }

    pub fn decl(&self, id: DeclId) -> &Decl {
        &self.decls[id.0 as usize]
    }

    pub fn decl_mut(&mut self, id: DeclId) -> &mut Decl {
        &mut self.decls[id.0 as usize]
    }

    pub fn scope(&self, id: ScopeId) -> &Scope {
        &self.scopes[id.0 as usize]
    }

    pub fn scope_mut(&mut self, id: ScopeId) -> &mut Scope {
        &mut self.scopes[id.0 as usize]
    }

    pub fn expr_count(&self) -> usize {
        self.exprs.len()
    }

    pub fn decl_count(&self) -> usize {
        self.decls.len()
    }

    pub fn scope_count(&self) -> usize {
        self.scopes.len()
    }

    pub fn alloc_expr(&mut self, expr: Expr) -> ExprId {
        let id = ExprId(self.exprs.len() as u32);
        self.exprs.push(expr);
        id
    }

    pub fn alloc_decl(&mut self, decl: Decl) -> DeclId {
        let id = DeclId(self.decls.len() as u32);
        self.decls.push(decl);
        id
    }

    pub fn alloc_scope(&mut self, scope: Scope) -> ScopeId {
        let id = ScopeId(self.scopes.len() as u32);
        self.scopes.push(scope);
        id
    }

    // Expression constructors, in the shapes the parser produces.

    pub fn primary(&mut self, token: Token) -> ExprId {
        self.alloc_expr(Expr::new(ExprKind::Primary { token }))
    }

    pub fn identifier(&mut self, name: impl Into<String>) -> ExprId {
        self.primary(Token::identifier(name))
    }

    pub fn free_variable(&mut self, name: impl Into<String>) -> ExprId {
        self.primary(Token::synthetic(TokenKind::FreeVariable, name))
    }

    pub fn integer(&mut self, lexeme: impl Into<String>) -> ExprId {
        self.primary(Token::synthetic(TokenKind::Integer, lexeme))
    }

    pub fn tuple(&mut self, open: Token, close: Token, exprs: Vec<ExprId>) -> ExprId {
        let kind = tuple_kind(open.kind(), close.kind());
        self.alloc_expr(Expr::new(ExprKind::Tuple {
            kind,
            exprs,
            open,
            close,
        }))
    }

    pub fn open_tuple(&mut self, exprs: Vec<ExprId>) -> ExprId {
        self.tuple(
            Token::synthetic(TokenKind::OpenParen, "("),
            Token::synthetic(TokenKind::CloseParen, ")"),
            exprs,
        )
    }

    pub fn apply(&mut self, exprs: Vec<ExprId>) -> ExprId {
        self.alloc_expr(Expr::new(ExprKind::Apply { exprs }))
    }

    pub fn symbol_expr(&mut self, identifier: Token, exprs: Vec<ExprId>) -> ExprId {
        self.alloc_expr(Expr::new(ExprKind::Symbol {
            identifier,
            exprs,
            open: Token::synthetic(TokenKind::OpenAngle, "<"),
            close: Token::synthetic(TokenKind::CloseAngle, ">"),
        }))
    }

    /// A symbol expression whose head is still among its arguments; the head
    /// is rotated out during resolution.
    pub fn symbol_tuple(&mut self, exprs: Vec<ExprId>) -> ExprId {
        self.symbol_expr(Token::undefined(), exprs)
    }

    pub fn constraint(&mut self, subject: ExprId, constraint: ExprId) -> ExprId {
        self.alloc_expr(Expr::new(ExprKind::Constraint {
            subject,
            constraint,
        }))
    }

    /// The leading token of an expression, used to position diagnostics.
    pub fn front(&self, id: ExprId) -> Token {
        match &self.expr(id).kind {
            ExprKind::Primary { token } => token.clone(),
            ExprKind::Tuple { exprs, open, .. } => match exprs.first() {
                Some(&e) => self.front(e),
                None => open.clone(),
            },
            ExprKind::Apply { exprs } => match exprs.first() {
                Some(&e) => self.front(e),
                None => Token::undefined(),
            },
            ExprKind::Symbol {
                identifier,
                exprs,
                open,
                ..
            } => {
                if identifier.kind() != TokenKind::Undefined {
                    identifier.clone()
                } else if let Some(&e) = exprs.first() {
                    self.front(e)
                } else {
                    open.clone()
                }
            }
            ExprKind::Constraint { subject, .. } => self.front(*subject),
        }
    }

    /// Merge the elements of open-tuple children into `id` in place,
    /// repeating until no open-tuple child remains. Idempotent.
    pub fn flatten_open_tuples(&mut self, id: ExprId) {
        loop {
            let children = match &self.expr(id).kind {
                ExprKind::Tuple { exprs, .. } => exprs.clone(),
                _ => return,
            };

            let mut merged = Vec::with_capacity(children.len());
            let mut changed = false;
            for child in children {
                match &self.expr(child).kind {
                    ExprKind::Tuple {
                        kind: TupleKind::Open,
                        exprs,
                        ..
                    } => {
                        merged.extend(exprs.iter().copied());
                        changed = true;
                    }
                    _ => merged.push(child),
                }
            }

            if let ExprKind::Tuple { exprs, .. } = &mut self.expr_mut(id).kind {
                *exprs = merged;
            }
            if !changed {
                return;
            }
        }
    }

    /// Merge apply children that do not begin with a procedure identifier
    /// into `id` in place, repeating until no such child remains.
    /// Idempotent.
    pub fn flatten_apply(&mut self, id: ExprId) {
        loop {
            let children = match &self.expr(id).kind {
                ExprKind::Apply { exprs } => exprs.clone(),
                _ => return,
            };

            let mut merged = Vec::with_capacity(children.len());
            let mut changed = false;
            for child in children {
                let inner = match &self.expr(child).kind {
                    ExprKind::Apply { exprs } => exprs.clone(),
                    _ => {
                        merged.push(child);
                        continue;
                    }
                };

                if let Some(&head) = inner.first() {
                    let head_expr = self.expr(head);
                    let is_procedure_head = head_expr.as_primary().is_some()
                        && head_expr
                            .declaration
                            .map(|d| matches!(self.decl(d).kind, DeclKind::Procedure { .. }))
                            .unwrap_or(false);
                    if is_procedure_head {
                        merged.push(child);
                        continue;
                    }
                }

                merged.extend(inner);
                changed = true;
            }

            if let ExprKind::Apply { exprs } = &mut self.expr_mut(id).kind {
                *exprs = merged;
            }
            if !changed {
                return;
            }
        }
    }

    /// Every free-variable primary reachable from `id`, in traversal order.
    pub fn gather_free_variables(&self, id: ExprId) -> Vec<ExprId> {
        let mut out = Vec::new();
        self.gather_free_variables_into(id, &mut out);
        out
    }

    fn gather_free_variables_into(&self, id: ExprId, out: &mut Vec<ExprId>) {
        let expr = self.expr(id);
        match &expr.kind {
            ExprKind::Primary { token } => {
                if token.kind() == TokenKind::FreeVariable {
                    out.push(id);
                }
            }
            ExprKind::Tuple { exprs, .. }
            | ExprKind::Apply { exprs }
            | ExprKind::Symbol { exprs, .. } => {
                for &e in exprs {
                    self.gather_free_variables_into(e, out);
                }
            }
            ExprKind::Constraint {
                subject,
                constraint,
            } => {
                self.gather_free_variables_into(*subject, out);
                self.gather_free_variables_into(*constraint, out);
            }
        }
        for &c in &expr.constraints {
            self.gather_free_variables_into(c, out);
        }
    }

    /// Follow symbol-variable bindings and symbol aliases until a fixed
    /// expression is reached.
    pub fn resolve_indirections(&self, id: ExprId) -> ExprId {
        let mut current = id;
        let mut visited: Vec<ExprId> = Vec::new();
        loop {
            let Some(decl) = self.expr(current).declaration else {
                return current;
            };
            let next = match &self.decl(decl).kind {
                DeclKind::SymbolVariable {
                    bound: Some(bound), ..
                } => *bound,
                DeclKind::Symbol { expr } => *expr,
                _ => return current,
            };
            if visited.contains(&next) {
                return current;
            }
            visited.push(current);
            current = next;
        }
    }

    /// The declaration a symbol-variable-backed primary refers to, if any.
    pub fn symbol_variable_of(&self, id: ExprId) -> Option<DeclId> {
        let decl = self.expr(id).declaration?;
        self.decl(decl).is_symbol_variable().then_some(decl)
    }

    // Symbol operations. These take the owning declaration because a
    // symbol's variables are declarations allocated in the store.

    pub fn symbol_find_variable(&self, owner: DeclId, name: &str) -> Option<DeclId> {
        self.decl(owner)
            .symbol
            .variables
            .iter()
            .copied()
            .find(|&v| self.decl(v).name() == name)
    }

    /// Return the named variable of `owner`'s symbol, creating it on first
    /// use.
    pub fn symbol_create_variable(&mut self, owner: DeclId, name: &str) -> DeclId {
        if let Some(existing) = self.symbol_find_variable(owner, name) {
            return existing;
        }

        let var = self.alloc_decl(Decl::new(
            DeclKind::SymbolVariable {
                parent: Some(owner),
                bound: None,
            },
            Symbol::named(name),
        ));
        self.decl_mut(owner).symbol.variables.push(var);
        var
    }

    /// A symbol is concrete when every one of its variables is bound to an
    /// expression that resolves, through indirections, to something other
    /// than a still-free symbol variable.
    pub fn symbol_is_concrete(&self, owner: DeclId) -> bool {
        for &var in &self.decl(owner).symbol.variables {
            let DeclKind::SymbolVariable {
                bound: Some(bound), ..
            } = self.decl(var).kind
            else {
                return false;
            };

            let target = self.resolve_indirections(bound);
            let Some(decl) = self.expr(target).declaration else {
                return false;
            };
            if let DeclKind::SymbolVariable { bound: None, .. } = self.decl(decl).kind {
                return false;
            }
        }
        true
    }

    pub fn symbol_has_free_variables(&self, owner: DeclId) -> bool {
        self.decl(owner)
            .symbol
            .variables
            .iter()
            .any(|&v| matches!(self.decl(v).kind, DeclKind::SymbolVariable { bound: None, .. }))
    }

    /// Attach `expr` as the binding of a symbol variable. Binding twice is a
    /// programming error.
    pub fn bind_symbol_variable(&mut self, var: DeclId, expr: ExprId) {
        match &mut self.decl_mut(var).kind {
            DeclKind::SymbolVariable { bound, .. } => {
                assert!(bound.is_none(), "symbol variable bound twice");
                *bound = Some(expr);
            }
            other => panic!("cannot bind a {}", other.name()),
        }
    }

    pub fn symbol_variable_binding(&self, var: DeclId) -> Option<ExprId> {
        match self.decl(var).kind {
            DeclKind::SymbolVariable { bound, .. } => bound,
            _ => None,
        }
    }

    /// Renders an expression the way it was written.
    pub fn display_expr(&self, id: ExprId) -> DisplayExpr<'_> {
        DisplayExpr { ast: self, id }
    }

    fn fmt_expr(&self, id: ExprId, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.expr(id).kind {
            ExprKind::Primary { token } => write!(f, "{}", token),
            ExprKind::Tuple { kind, exprs, .. } => {
                write!(f, "{}", kind.open_delimiter())?;
                for (i, &e) in exprs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    self.fmt_expr(e, f)?;
                }
                write!(f, "{}", kind.close_delimiter())
            }
            ExprKind::Apply { exprs } => {
                for (i, &e) in exprs.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    let grouped = matches!(self.expr(e).kind, ExprKind::Apply { .. });
                    if grouped {
                        write!(f, "(")?;
                    }
                    self.fmt_expr(e, f)?;
                    if grouped {
                        write!(f, ")")?;
                    }
                }
                Ok(())
            }
            ExprKind::Symbol {
                identifier, exprs, ..
            } => {
                if identifier.kind() != TokenKind::Undefined {
                    write!(f, "{}", identifier)?;
                }
                if !exprs.is_empty() || identifier.kind() == TokenKind::Undefined {
                    write!(f, "<")?;
                    for (i, &e) in exprs.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        self.fmt_expr(e, f)?;
                    }
                    write!(f, ">")?;
                }
                Ok(())
            }
            ExprKind::Constraint {
                subject,
                constraint,
            } => {
                self.fmt_expr(*subject, f)?;
                write!(f, " : ")?;
                self.fmt_expr(*constraint, f)
            }
        }
    }
}

/// Display adaptor returned by [`Ast::display_expr`].
pub struct DisplayExpr<'a> {
    ast: &'a Ast,
    id: ExprId,
}

impl fmt::Display for DisplayExpr<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.ast.fmt_expr(self.id, f)
    }
}

// Scope storage helpers. The sorted-set maintenance lives here because the
// sets are addressed through the store.
impl Ast {
    /// Append a declaration to a scope and stamp its back-edge.
    pub fn scope_append_decl(&mut self, scope: ScopeId, decl: DeclId) {
        self.decl_mut(decl).scope = Some(scope);
        self.scope_mut(scope).decls.push(decl);
    }

    /// Index of the named bucket in the scope's sorted set list, if present.
    pub fn scope_find_symbol_set(
        &self,
        scope: ScopeId,
        name: &str,
        procedure: bool,
    ) -> Option<usize> {
        let sets = self.scope(scope).symbol_sets(procedure);
        sets.binary_search_by(|s| s.name.as_str().cmp(name)).ok()
    }

    /// Index of the named bucket, inserting an empty one at the sort point
    /// when absent.
    pub fn scope_create_symbol_set(
        &mut self,
        scope: ScopeId,
        name: &str,
        procedure: bool,
    ) -> usize {
        let sets = self.scope_mut(scope).symbol_sets_mut(procedure);
        match sets.binary_search_by(|s| s.name.as_str().cmp(name)) {
            Ok(i) => i,
            Err(i) => {
                sets.insert(i, SymbolSet::new(name));
                i
            }
        }
    }

    /// Attach a definition scope to a declaration and point the scope back
    /// at it. Panics for kinds that do not own a definition.
    pub fn define(&mut self, d: DeclId, s: ScopeId) {
        self.scope_mut(s).declaration = Some(d);
        match &mut self.decl_mut(d).kind {
            DeclKind::DataSum { definition }
            | DeclKind::DataProduct { definition }
            | DeclKind::Procedure { definition, .. } => *definition = Some(s),
            other => panic!("a {} cannot own a definition", other.name()),
        }
    }

    /// The field declarations of a data product definition, in order.
    pub fn data_product_fields(&self, d: DeclId) -> Vec<DeclId> {
        match &self.decl(d).kind {
            DeclKind::DataProduct {
                definition: Some(s),
            } => self
                .scope(*s)
                .decls
                .iter()
                .copied()
                .filter(|&v| matches!(self.decl(v).kind, DeclKind::Variable { .. }))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// First declaration of the scope with the given plain name. Procedure
    /// scopes see their declaration's parameters first.
    pub fn scope_find_decl_by_name(&self, scope: ScopeId, name: &str) -> Option<DeclId> {
        let s = self.scope(scope);
        if let Some(owner) = s.declaration {
            if let DeclKind::Procedure { params, .. } = &self.decl(owner).kind {
                if let Some(&p) = params.iter().find(|&&p| self.decl(p).name() == name) {
                    return Some(p);
                }
            }
        }
        s.decls
            .iter()
            .copied()
            .find(|&d| self.decl(d).name() == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shape(ast: &Ast, id: ExprId) -> String {
        format!("{}", ast.display_expr(id))
    }

    #[test]
    fn tuple_kind_from_delimiters() {
        assert_eq!(
            tuple_kind(TokenKind::OpenParen, TokenKind::CloseParen),
            TupleKind::Open
        );
        assert_eq!(
            tuple_kind(TokenKind::OpenBracket, TokenKind::CloseBracket),
            TupleKind::Closed
        );
        assert_eq!(
            tuple_kind(TokenKind::OpenParen, TokenKind::CloseBracket),
            TupleKind::OpenLeft
        );
        assert_eq!(
            tuple_kind(TokenKind::OpenBracket, TokenKind::CloseParen),
            TupleKind::OpenRight
        );
    }

    #[test]
    #[should_panic(expected = "invalid tuple delimiters")]
    fn tuple_kind_rejects_illegal_pair() {
        tuple_kind(TokenKind::OpenParen, TokenKind::CloseAngle);
    }

    #[test]
    fn flatten_merges_nested_open_tuples() {
        let mut ast = Ast::new();
        let a = ast.identifier("a");
        let b = ast.identifier("b");
        let inner = ast.open_tuple(vec![a, b]);
        let c = ast.identifier("c");
        let outer = ast.open_tuple(vec![inner, c]);

        ast.flatten_open_tuples(outer);
        assert_eq!(shape(&ast, outer), "(a, b, c)");
    }

    #[test]
    fn flatten_preserves_closed_tuples() {
        let mut ast = Ast::new();
        let a = ast.identifier("a");
        let closed = ast.tuple(
            Token::synthetic(TokenKind::OpenBracket, "["),
            Token::synthetic(TokenKind::CloseBracket, "]"),
            vec![a],
        );
        let b = ast.identifier("b");
        let outer = ast.open_tuple(vec![closed, b]);

        ast.flatten_open_tuples(outer);
        assert_eq!(shape(&ast, outer), "([a], b)");
    }

    #[test]
    fn flatten_open_tuples_is_idempotent() {
        let mut ast = Ast::new();
        let a = ast.identifier("a");
        let b = ast.identifier("b");
        let inner = ast.open_tuple(vec![a, b]);
        let outer = ast.open_tuple(vec![inner]);

        ast.flatten_open_tuples(outer);
        let once = shape(&ast, outer);
        ast.flatten_open_tuples(outer);
        assert_eq!(shape(&ast, outer), once);
    }

    #[test]
    fn flatten_apply_merges_non_procedure_heads() {
        let mut ast = Ast::new();
        let f = ast.identifier("f");
        let x = ast.identifier("x");
        let inner = ast.apply(vec![f, x]);
        let y = ast.identifier("y");
        let outer = ast.apply(vec![inner, y]);

        ast.flatten_apply(outer);
        assert_eq!(shape(&ast, outer), "f x y");
    }

    #[test]
    fn flatten_apply_keeps_procedure_heads() {
        let mut ast = Ast::new();
        let proc = ast.alloc_decl(Decl::new(
            DeclKind::Procedure {
                params: Vec::new(),
                return_type: None,
                result: None,
                definition: None,
            },
            Symbol::named("f"),
        ));
        let f = ast.identifier("f");
        ast.expr_mut(f).declaration = Some(proc);
        let x = ast.identifier("x");
        let inner = ast.apply(vec![f, x]);
        let y = ast.identifier("y");
        let outer = ast.apply(vec![inner, y]);

        ast.flatten_apply(outer);
        assert_eq!(shape(&ast, outer), "(f x) y");
    }

    #[test]
    fn gather_free_variables_finds_nested() {
        let mut ast = Ast::new();
        let t = ast.free_variable("T");
        let u = ast.free_variable("U");
        let x = ast.identifier("x");
        let tup = ast.open_tuple(vec![t, x]);
        let c = ast.constraint(tup, u);

        let found = ast.gather_free_variables(c);
        assert_eq!(found, vec![t, u]);
    }

    #[test]
    fn symbol_create_variable_reuses_by_name() {
        let mut ast = Ast::new();
        let owner = ast.alloc_decl(Decl::new(
            DeclKind::DataSum { definition: None },
            Symbol::named("Tree"),
        ));
        let a = ast.symbol_create_variable(owner, "T");
        let b = ast.symbol_create_variable(owner, "T");
        assert_eq!(a, b);
        assert_eq!(ast.decl(owner).symbol.variables.len(), 1);
    }

    #[test]
    #[should_panic(expected = "symbol variable bound twice")]
    fn double_binding_aborts() {
        let mut ast = Ast::new();
        let owner = ast.alloc_decl(Decl::new(
            DeclKind::DataSum { definition: None },
            Symbol::named("Tree"),
        ));
        let var = ast.symbol_create_variable(owner, "T");
        let e = ast.identifier("i32");
        ast.bind_symbol_variable(var, e);
        ast.bind_symbol_variable(var, e);
    }

    #[test]
    fn display_symbol_expression() {
        let mut ast = Ast::new();
        let a = ast.identifier("i32");
        let s = ast.symbol_expr(Token::identifier("Tree"), vec![a]);
        assert_eq!(shape(&ast, s), "Tree<i32>");
    }
}
