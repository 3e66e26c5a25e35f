//! Modules, the module set, and the implicit axioms module
//!
//! A module owns one root scope and its import edges. The [`ModuleSet`] owns
//! the node store shared by all modules, so expressions can bind directly to
//! declarations of other modules. The axioms module supplies the primitive
//! types literal resolution binds to; every other module imports it
//! implicitly.

use crate::ast::{Ast, Decl, DeclId, DeclKind, ModuleId, ScopeId, Symbol};
use crate::diagnostic::Diagnostics;
use crate::scope::{Scope, ScopeKind};

/// A compilation unit: a named root scope plus its import graph.
#[derive(Debug)]
pub struct Module {
    pub name: String,
    pub scope: ScopeId,
    pub imports: Vec<ModuleId>,
    /// Instantiations produced while resolving this module, recorded for a
    /// later code-generation pass.
    pub template_instances: Vec<DeclId>,
}

/// The primitive declarations of the axioms module.
#[derive(Debug, Clone, Copy)]
pub struct Axioms {
    pub module: ModuleId,
    pub integer_type: DeclId,
    pub decimal_type: DeclId,
    pub text_type: DeclId,
    pub empty_type: DeclId,
}

/// Owner of all modules and of the node store they share.
#[derive(Debug)]
pub struct ModuleSet {
    pub ast: Ast,
    modules: Vec<Module>,
    axioms: Axioms,
}

impl ModuleSet {
    /// Create a module set with its axioms module resolved and ready.
    pub fn new() -> Self {
        let mut ast = Ast::new();
        let mut modules = Vec::new();

        let axioms_id = ModuleId(0);
        let scope = ast.alloc_scope(Scope::new(ScopeKind::Declaration, axioms_id, None));
        modules.push(Module {
            name: "axioms".to_string(),
            scope,
            imports: Vec::new(),
            template_instances: Vec::new(),
        });

        // `integer` is width-parameterised; aliases such as `i32 = integer 32`
        // instantiate it. The other primitives are plain.
        let width = ast.free_variable("n");
        let integer_type = ast.alloc_decl(Decl::new(
            DeclKind::DataSum { definition: None },
            Symbol::with_parameters(crate::token::Token::identifier("integer"), vec![width]),
        ));
        let decimal_type = ast.alloc_decl(Decl::new(
            DeclKind::DataSum { definition: None },
            Symbol::named("decimal"),
        ));
        let text_type = ast.alloc_decl(Decl::new(
            DeclKind::DataSum { definition: None },
            Symbol::named("text"),
        ));
        let empty_type = ast.alloc_decl(Decl::new(
            DeclKind::DataSum { definition: None },
            Symbol::named("empty"),
        ));
        for d in [integer_type, decimal_type, text_type, empty_type] {
            ast.scope_append_decl(scope, d);
        }

        let mut ms = Self {
            ast,
            modules,
            axioms: Axioms {
                module: axioms_id,
                integer_type,
                decimal_type,
                text_type,
                empty_type,
            },
        };

        // The axioms module resolves against itself only; by construction
        // this cannot produce diagnostics.
        let mut dgn = Diagnostics::new();
        crate::resolve::resolve_module(&mut ms, axioms_id, &mut dgn);
        debug_assert!(dgn.is_empty(), "axioms module failed to resolve");

        ms
    }

    pub fn axioms(&self) -> Axioms {
        self.axioms
    }

    pub fn module(&self, id: ModuleId) -> &Module {
        &self.modules[id.0 as usize]
    }

    pub fn module_mut(&mut self, id: ModuleId) -> &mut Module {
        &mut self.modules[id.0 as usize]
    }

    pub fn modules(&self) -> impl Iterator<Item = (ModuleId, &Module)> {
        self.modules
            .iter()
            .enumerate()
            .map(|(i, m)| (ModuleId(i as u32), m))
    }

    /// Create an empty module. It implicitly imports axioms.
    pub fn create_module(&mut self, name: impl Into<String>) -> ModuleId {
        let id = ModuleId(self.modules.len() as u32);
        let scope = self
            .ast
            .alloc_scope(Scope::new(ScopeKind::Declaration, id, None));
        self.modules.push(Module {
            name: name.into(),
            scope,
            imports: vec![self.axioms.module],
            template_instances: Vec::new(),
        });
        id
    }

    pub fn find_module(&self, name: &str) -> Option<ModuleId> {
        self.modules
            .iter()
            .position(|m| m.name == name)
            .map(|i| ModuleId(i as u32))
    }

    /// Import a module by name into `from`. Idempotent: a second request for
    /// an already-imported module returns the existing id. Locating modules
    /// on disk is a front-end concern; an unknown name materialises as an
    /// empty module.
    pub fn import(&mut self, from: ModuleId, name: &str) -> ModuleId {
        let target = match self.find_module(name) {
            Some(id) => id,
            None => self.create_module(name),
        };
        let imports = &mut self.module_mut(from).imports;
        if target != from && !imports.contains(&target) {
            imports.push(target);
        }
        target
    }

    /// Allocate a scope belonging to `module` under `parent`.
    pub fn create_scope(
        &mut self,
        kind: ScopeKind,
        module: ModuleId,
        parent: Option<ScopeId>,
    ) -> ScopeId {
        self.ast.alloc_scope(Scope::new(kind, module, parent))
    }

    /// Record an instantiation for later code generation on the module that
    /// owns `scope`.
    pub fn append_template_instance(&mut self, scope: ScopeId, instance: DeclId) {
        let module = self.ast.scope(scope).module;
        self.module_mut(module).template_instances.push(instance);
    }
}

impl Default for ModuleSet {
    fn default() -> Self {
        Self::new()
    }
}
