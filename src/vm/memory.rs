use rustc_hash::FxHashMap as HashMap;

use crate::value::Value;

/// Named global variables of a running program.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Memory {
    vars: HashMap<String, Value>,
}

impl Memory {
    /// Sets `name`, replacing any previous value.
    pub fn store(&mut self, name: String, value: Value) {
        self.vars.insert(name, value);
    }

    pub fn load(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}
