use std::collections::BTreeMap;

use log::warn;
use scm_formats::{Arity, OpcodeTable};
use serde::Serialize;

use crate::arguments::ScriptArguments;
use crate::error::ScriptResult;

pub type ActionFn = fn(&mut ScriptArguments<'_>) -> ScriptResult<()>;
pub type TestFn = fn(&mut ScriptArguments<'_>) -> ScriptResult<bool>;

/// Native body behind an opcode.
#[derive(Clone, Copy)]
pub enum ScriptFunction {
    Action(ActionFn),
    /// Returns the raw test result; the machine applies the negate flag.
    Test(TestFn),
    /// Decodes normally but does nothing when executed.
    Unimplemented,
}

impl std::fmt::Debug for ScriptFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScriptFunction::Action(_) => f.write_str("Action"),
            ScriptFunction::Test(_) => f.write_str("Test"),
            ScriptFunction::Unimplemented => f.write_str("Unimplemented"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OpcodeBinding {
    pub id: u16,
    pub function: ScriptFunction,
    pub conditional: bool,
    pub arity: Arity,
    pub name: String,
    pub description: String,
}

impl OpcodeBinding {
    pub fn is_implemented(&self) -> bool {
        !matches!(self.function, ScriptFunction::Unimplemented)
    }
}

/// Serializable view of a binding for listings.
#[derive(Debug, Clone, Serialize)]
pub struct BindingSummary {
    pub id: u16,
    pub module: String,
    pub name: String,
    pub arity: i32,
    pub conditional: bool,
    pub implemented: bool,
}

/// A named group of bindings, built independently of any machine.
#[derive(Debug, Clone)]
pub struct ScriptModule {
    name: String,
    bindings: BTreeMap<u16, OpcodeBinding>,
}

impl ScriptModule {
    pub fn new(name: impl Into<String>) -> Self {
        ScriptModule {
            name: name.into(),
            bindings: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Adds one entry. A negative `arity` marks a variadic opcode.
    pub fn bind(
        &mut self,
        id: u16,
        function: ScriptFunction,
        conditional: bool,
        arity: i32,
        name: &str,
        description: &str,
    ) -> &mut Self {
        let binding = OpcodeBinding {
            id,
            function,
            conditional,
            arity: Arity::from_declared(arity),
            name: name.to_string(),
            description: description.to_string(),
        };
        if let Some(previous) = self.bindings.insert(id, binding) {
            warn!(
                "module {}: opcode {id:04x} rebound ({} replaced by {name})",
                self.name, previous.name
            );
        }
        self
    }

    pub fn bind_action(
        &mut self,
        id: u16,
        arity: i32,
        name: &str,
        description: &str,
        function: ActionFn,
    ) -> &mut Self {
        self.bind(id, ScriptFunction::Action(function), false, arity, name, description)
    }

    pub fn bind_test(
        &mut self,
        id: u16,
        arity: i32,
        name: &str,
        description: &str,
        function: TestFn,
    ) -> &mut Self {
        self.bind(id, ScriptFunction::Test(function), true, arity, name, description)
    }

    pub fn bind_unimplemented(
        &mut self,
        id: u16,
        arity: i32,
        conditional: bool,
        name: &str,
    ) -> &mut Self {
        self.bind(id, ScriptFunction::Unimplemented, conditional, arity, name, "")
    }

    pub fn find(&self, id: u16) -> Option<&OpcodeBinding> {
        self.bindings.get(&id)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn bindings(&self) -> impl Iterator<Item = &OpcodeBinding> {
        self.bindings.values()
    }
}

/// Modules in priority order; the first module binding an id wins.
#[derive(Debug, Clone, Default)]
pub struct OpcodeRegistry {
    modules: Vec<ScriptModule>,
}

impl OpcodeRegistry {
    pub fn new(modules: Vec<ScriptModule>) -> Self {
        OpcodeRegistry { modules }
    }

    /// Registry holding only the core `vm` module.
    pub fn core() -> Self {
        Self::new(vec![crate::modules::vm::module()])
    }

    /// Appends a module with lower priority than those already present.
    pub fn push_module(&mut self, module: ScriptModule) {
        self.modules.push(module);
    }

    pub fn modules(&self) -> &[ScriptModule] {
        &self.modules
    }

    pub fn find_opcode(&self, id: u16) -> Option<&OpcodeBinding> {
        self.modules.iter().find_map(|module| module.find(id))
    }

    pub fn name_of(&self, id: u16) -> Option<&str> {
        self.find_opcode(id).map(|binding| binding.name.as_str())
    }

    /// Every reachable binding, ordered by id. Shadowed entries are skipped.
    pub fn summaries(&self) -> Vec<BindingSummary> {
        let mut seen = BTreeMap::new();
        for module in &self.modules {
            for binding in module.bindings() {
                seen.entry(binding.id).or_insert_with(|| BindingSummary {
                    id: binding.id,
                    module: module.name.clone(),
                    name: binding.name.clone(),
                    arity: binding.arity.declared(),
                    conditional: binding.conditional,
                    implemented: binding.is_implemented(),
                });
            }
        }
        seen.into_values().collect()
    }
}

impl OpcodeTable for OpcodeRegistry {
    fn arity(&self, opcode: u16) -> Option<Arity> {
        self.find_opcode(opcode).map(|binding| binding.arity)
    }
}
