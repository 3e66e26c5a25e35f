//! Semantic core of the kyfoo front-end
//!
//! kyfoo is an experimental statically-typed language whose central
//! syntactic construct is the tuple and whose central semantic construct is
//! the parameterised symbol with pattern-matched overloads. This crate turns
//! the parser's raw declarations into a fully resolved semantic graph: every
//! identifier, symbol reference, and procedure application points at a
//! declaration, and every polymorphic declaration is monomorphised on demand
//! into cached instances.
//!
//! The pipeline position:
//!
//! ```text
//! Lexer → Parser → declarations with unresolved expressions
//!       → resolve_module → resolved graph + cached instantiations
//!       → code generation (elsewhere, via the per-declaration data slot)
//! ```
//!
//! Lexing, parsing, diagnostics presentation, and code generation live
//! outside this crate. The core consumes [`token::Token`] values as opaque
//! carriers of a lexeme and a kind tag, and reports problems into a
//! [`diagnostic::Diagnostics`] sink.

pub mod ast;
pub mod diagnostic;
pub mod instantiate;
pub mod matcher;
pub mod module;
pub mod resolve;
pub mod scope;
pub mod token;

pub use ast::{
    Ast, Decl, DeclId, DeclKind, Expr, ExprId, ExprKind, ModuleId, ScopeId, Symbol, TupleKind,
};
pub use diagnostic::{DiagKind, Diagnostic, Diagnostics, SourceCache};
pub use instantiate::{clone_decl, CloneMap};
pub use matcher::{match_equivalent, match_overload, ValueMatcher};
pub use module::{Axioms, Module, ModuleSet};
pub use resolve::{resolve_module, ResolveCtx, Resolver};
pub use scope::{LookupHit, Scope, ScopeKind, SymbolSet, SymbolTemplate};
pub use token::{Token, TokenKind};
