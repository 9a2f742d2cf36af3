//! Named boundary ports, collision-resolved per direction.
//!
//! A port reserves a name for one internal stream of the template so callers
//! can bind external modules to it per context without knowing the template's
//! node indices. Input and output ports live in separate namespaces; a taken
//! name gets a numeric suffix (`freq`, `freq-2`, `freq-3`, ...).

use std::collections::HashMap;

use crate::error::NetError;
use crate::network::TemplateNodeId;

/// The internal stream a port stands for.
#[derive(Clone, Copy, Debug)]
pub(crate) struct PortAnchor {
    pub(crate) node: TemplateNodeId,
    /// Input-slot index for input ports, output-slot index for output ports.
    pub(crate) slot: usize,
}

#[derive(Default)]
pub(crate) struct PortRegistry {
    inputs: HashMap<String, PortAnchor>,
    outputs: HashMap<String, PortAnchor>,
}

impl PortRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register_input(&mut self, name: &str, anchor: PortAnchor) -> String {
        let unique = unique_name(&self.inputs, name);
        self.inputs.insert(unique.clone(), anchor);
        unique
    }

    pub(crate) fn register_output(&mut self, name: &str, anchor: PortAnchor) -> String {
        let unique = unique_name(&self.outputs, name);
        self.outputs.insert(unique.clone(), anchor);
        unique
    }

    pub(crate) fn input(&self, name: &str) -> Result<PortAnchor, NetError> {
        self.inputs
            .get(name)
            .copied()
            .ok_or_else(|| NetError::UnknownPort {
                direction: "input",
                name: name.to_owned(),
            })
    }

    pub(crate) fn output(&self, name: &str) -> Result<PortAnchor, NetError> {
        self.outputs
            .get(name)
            .copied()
            .ok_or_else(|| NetError::UnknownPort {
                direction: "output",
                name: name.to_owned(),
            })
    }
}

fn unique_name(taken: &HashMap<String, PortAnchor>, wanted: &str) -> String {
    if !taken.contains_key(wanted) {
        return wanted.to_owned();
    }
    let mut n = 2;
    loop {
        let candidate = format!("{wanted}-{n}");
        if !taken.contains_key(&candidate) {
            return candidate;
        }
        n += 1;
    }
}
