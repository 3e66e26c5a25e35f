//! Structured diagnostics and their rendering
//!
//! Resolution reports problems into a [`Diagnostics`] sink and continues;
//! nothing in the core returns errors across component boundaries. Entries
//! are renderer-independent records ordered by traversal; [`SourceCache`]
//! plus [`Diagnostic::render`] turn them into ariadne reports when a caller
//! has source text to show.

use std::io::Write;
use std::ops::Range;

use ariadne::{sources, Color, Label, Report, ReportKind};
use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::token::Token;

/// The kinds of problem resolution can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DiagKind {
    #[error("undeclared identifier")]
    UndeclaredIdentifier,
    #[error("undeclared symbol identifier")]
    UndeclaredSymbol,
    #[error("does not identify a declaration")]
    UnresolvedIdentifier,
    #[error("does not match any symbol declarations or procedure overloads")]
    NoMatchingOverload,
    #[error("symbol is already defined")]
    DuplicateDeclaration,
    #[error("free variable not expected in this context")]
    UnexpectedFreeVariable,
    #[error("is not a type")]
    NotAType,
    #[error("symbol tuples must start with an identifier")]
    SymbolTupleMissingIdentifier,
    #[error("implicit procedure application must begin with an identifier")]
    ImplicitApplyNonIdentifier,
}

/// A cross-reference attached to a diagnostic, pointing at another
/// declaration involved in the problem.
#[derive(Debug, Clone)]
pub struct SeeAlso {
    pub module: String,
    pub name: String,
    pub token: Token,
}

/// One reported problem: what went wrong, in which module, at which token.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub kind: DiagKind,
    pub module: String,
    pub token: Token,
    pub sees: Vec<SeeAlso>,
}

impl Diagnostic {
    /// Cross-reference another declaration. Chainable.
    pub fn see(&mut self, module: impl Into<String>, name: impl Into<String>, token: Token) -> &mut Self {
        self.sees.push(SeeAlso {
            module: module.into(),
            name: name.into(),
            token,
        });
        self
    }

    fn span(&self, cache: &SourceCache) -> (String, Range<usize>) {
        let start = cache.offset(&self.module, &self.token);
        let len = self.token.lexeme().len().max(1);
        (self.module.clone(), start..start + len)
    }

    /// Render through ariadne against the given sources.
    pub fn render(&self, cache: &SourceCache, writer: &mut impl Write) -> std::io::Result<()> {
        let (id, range) = self.span(cache);
        let mut builder = Report::build(ReportKind::Error, id.clone(), range.start)
            .with_message(self.kind.to_string())
            .with_label(
                Label::new((id, range))
                    .with_message(self.kind.to_string())
                    .with_color(Color::Red)
                    .with_order(0),
            );

        for (i, see) in self.sees.iter().enumerate() {
            let start = cache.offset(&see.module, &see.token);
            let len = see.token.lexeme().len().max(1);
            builder = builder.with_label(
                Label::new((see.module.clone(), start..start + len))
                    .with_message(format!("see `{}`", see.name))
                    .with_color(Color::Cyan)
                    .with_order((i + 1) as i32),
            );
        }

        let report = builder.finish();
        let pool: Vec<(String, String)> = cache
            .files
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        report.write(sources(pool), writer)
    }

    /// Render to stderr, ignoring IO failures.
    pub fn eprint(&self, cache: &SourceCache) {
        let mut buf = Vec::new();
        let _ = self.render(cache, &mut buf);
        let _ = std::io::stderr().write_all(&buf);
    }
}

/// Append-only diagnostics sink. Order reflects traversal order.
#[derive(Debug, Default)]
pub struct Diagnostics {
    diags: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report an error positioned at a token. The returned reference allows
    /// attaching cross-references.
    pub fn error(
        &mut self,
        module: impl Into<String>,
        token: Token,
        kind: DiagKind,
    ) -> &mut Diagnostic {
        self.diags.push(Diagnostic {
            kind,
            module: module.into(),
            token,
            sees: Vec::new(),
        });
        self.diags.last_mut().expect("just pushed")
    }

    pub fn error_count(&self) -> usize {
        self.diags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.diags.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diags.iter()
    }

    /// Render everything to stderr.
    pub fn eprint_all(&self, cache: &SourceCache) {
        for d in &self.diags {
            d.eprint(cache);
        }
    }
}

/// Module-name → source-text map used only for rendering.
#[derive(Debug, Default)]
pub struct SourceCache {
    files: FxHashMap<String, String>,
}

impl SourceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, module: impl Into<String>, source: impl Into<String>) {
        self.files.insert(module.into(), source.into());
    }

    pub fn get(&self, module: &str) -> Option<&str> {
        self.files.get(module).map(String::as_str)
    }

    /// Byte offset of a token's line/column position within a module's
    /// source. Missing sources or out-of-range positions clamp to 0.
    fn offset(&self, module: &str, token: &Token) -> usize {
        let Some(src) = self.files.get(module) else {
            return 0;
        };
        let line = token.line().max(1) as usize - 1;
        let column = token.column().max(1) as usize - 1;
        let mut offset = 0usize;
        for (i, l) in src.split_inclusive('\n').enumerate() {
            if i == line {
                return (offset + column).min(src.len());
            }
            offset += l.len();
        }
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::TokenKind;

    #[test]
    fn errors_accumulate_in_order() {
        let mut dgn = Diagnostics::new();
        dgn.error("m", Token::identifier("x"), DiagKind::UndeclaredIdentifier);
        dgn.error("m", Token::identifier("y"), DiagKind::DuplicateDeclaration);

        assert_eq!(dgn.error_count(), 2);
        let kinds: Vec<_> = dgn.iter().map(|d| d.kind).collect();
        assert_eq!(
            kinds,
            [DiagKind::UndeclaredIdentifier, DiagKind::DuplicateDeclaration]
        );
    }

    #[test]
    fn see_attaches_cross_reference() {
        let mut dgn = Diagnostics::new();
        dgn.error("m", Token::identifier("g"), DiagKind::DuplicateDeclaration)
            .see("m", "g", Token::identifier("g"));

        let diag = dgn.iter().next().unwrap();
        assert_eq!(diag.sees.len(), 1);
        assert_eq!(diag.sees[0].name, "g");
    }

    #[test]
    fn offsets_follow_lines_and_columns() {
        let mut cache = SourceCache::new();
        cache.add("m", "abc\ndef\n");
        let tok = Token::new(TokenKind::Identifier, "e", 2, 2);
        assert_eq!(cache.offset("m", &tok), 5);
    }

    #[test]
    fn render_does_not_fail_without_source() {
        let mut dgn = Diagnostics::new();
        dgn.error("m", Token::identifier("x"), DiagKind::UndeclaredIdentifier);
        let cache = SourceCache::new();
        let mut buf = Vec::new();
        // Rendering against an empty cache degrades; it must not panic.
        let _ = dgn.iter().next().unwrap().render(&cache, &mut buf);
    }
}
