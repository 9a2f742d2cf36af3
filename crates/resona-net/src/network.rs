//! Topology templates and their polyphonic context instantiations.
//!
//! A [`Network`] describes a synthesis topology once: a set of template
//! nodes, each marked per-voice or shared, and the edges between them. The
//! shared portion is integrated a single time; every playing voice then gets
//! a [`ContextId`] whose per-voice nodes are cloned from the template and
//! wired identically, usually merging into a shared joint (one mixer or
//! effect tail serving all voices).
//!
//! All instantiation work is expressed as jobs on a caller-supplied
//! [`Transaction`], so a whole voice appears or disappears between two blocks
//! and never in a half-wired state.

use core::fmt;
use std::collections::HashMap;

use resona_engine::{ModuleId, ModuleSpec, OutputRef, Transaction};

use crate::error::NetError;
use crate::port::{PortAnchor, PortRegistry};

/// Index of a node in a network's template.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TemplateNodeId(pub(crate) usize);

impl fmt::Display for TemplateNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Handle of one live context (voice) of a network.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(pub(crate) u32);

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{}", self.0)
    }
}

/// Whether a template node is cloned per voice or instantiated once.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Placement {
    /// Cloned for every context (oscillators, envelopes).
    PerVoice,
    /// One instance serving all contexts (mixers, effect tails).
    Shared,
}

/// MIDI-style routing descriptor attached to a context.
///
/// Deliberately carries no reference to the event source: event delivery is
/// owned by whoever drives the router (the host's MIDI source and handler),
/// so channel plus voice discriminator is the whole address. Hosts with more
/// than one event source keep one router per source.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Routing {
    /// MIDI channel the voice answers to.
    pub channel: u8,
    /// Voice discriminator within the channel, unique per live context.
    pub voice: u32,
}

type SpecFactory = Box<dyn Fn() -> ModuleSpec + Send>;

struct TemplateNode {
    factory: SpecFactory,
    placement: Placement,
}

#[derive(Clone, Copy)]
struct TemplateEdge {
    src: TemplateNodeId,
    ostream: usize,
    dst: TemplateNodeId,
    dslot: usize,
    joint: bool,
}

/// State of one live context.
struct ContextState {
    routing: Routing,
    /// Per-voice module instances, in template-node order of creation.
    modules: Vec<(TemplateNodeId, ModuleId)>,
    /// Parent context when this one was produced by `clone_branch`.
    branch_of: Option<ContextId>,
    /// Current source bound to each input port name.
    input_bindings: HashMap<String, OutputRef>,
    /// Current destination bound to each output port name.
    output_bindings: HashMap<String, (ModuleId, usize)>,
}

/// A synthesis topology template plus its live contexts.
pub struct Network {
    nodes: Vec<TemplateNode>,
    edges: Vec<TemplateEdge>,
    /// Shared module instances, present once activated.
    shared: Option<HashMap<TemplateNodeId, ModuleId>>,
    contexts: HashMap<ContextId, ContextState>,
    next_context: u32,
    ports: PortRegistry,
}

impl Default for Network {
    fn default() -> Self {
        Self::new()
    }
}

impl Network {
    /// Creates an empty template.
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            edges: Vec::new(),
            shared: None,
            contexts: HashMap::new(),
            next_context: 0,
            ports: PortRegistry::new(),
        }
    }

    /// Adds a template node whose module instances are built by `factory`.
    ///
    /// The factory runs once per instantiation (once total for shared nodes,
    /// once per context for per-voice nodes) and must produce specs with
    /// identical stream arity each time.
    pub fn add_node(
        &mut self,
        placement: Placement,
        factory: impl Fn() -> ModuleSpec + Send + 'static,
    ) -> TemplateNodeId {
        self.nodes.push(TemplateNode {
            factory: Box::new(factory),
            placement,
        });
        TemplateNodeId(self.nodes.len() - 1)
    }

    /// Adds a template edge into a regular input slot.
    pub fn add_edge(
        &mut self,
        src: TemplateNodeId,
        ostream: usize,
        dst: TemplateNodeId,
        istream: usize,
    ) -> Result<(), NetError> {
        self.check_node(src)?;
        self.check_node(dst)?;
        self.edges.push(TemplateEdge {
            src,
            ostream,
            dst,
            dslot: istream,
            joint: false,
        });
        Ok(())
    }

    /// Adds a template edge into a joint (summing) slot.
    ///
    /// The canonical use is every voice's output merging into one shared
    /// mixer joint.
    pub fn add_joint_edge(
        &mut self,
        src: TemplateNodeId,
        ostream: usize,
        dst: TemplateNodeId,
        jstream: usize,
    ) -> Result<(), NetError> {
        self.check_node(src)?;
        self.check_node(dst)?;
        self.edges.push(TemplateEdge {
            src,
            ostream,
            dst,
            dslot: jstream,
            joint: true,
        });
        Ok(())
    }

    /// Integrates the shared subgraph and wires its internal edges.
    ///
    /// Must run (and its transaction commit) before any context is created.
    pub fn activate_shared(&mut self, trans: &mut Transaction) -> Result<(), NetError> {
        if self.shared.is_some() {
            return Err(NetError::AlreadyActivated);
        }
        let mut shared = HashMap::new();
        for (idx, node) in self.nodes.iter().enumerate() {
            if node.placement == Placement::Shared {
                let id = trans.integrate((node.factory)());
                shared.insert(TemplateNodeId(idx), id);
            }
        }
        for edge in &self.edges {
            let (Some(&src), Some(&dst)) = (shared.get(&edge.src), shared.get(&edge.dst)) else {
                continue;
            };
            wire(trans, src, dst, *edge);
        }
        self.shared = Some(shared);
        Ok(())
    }

    /// True once [`Network::activate_shared`] has run.
    pub fn is_activated(&self) -> bool {
        self.shared.is_some()
    }

    /// Clones every per-voice node, wires the clone like the template, and
    /// returns the new context's handle.
    pub fn create_context(
        &mut self,
        routing: Routing,
        trans: &mut Transaction,
    ) -> Result<ContextId, NetError> {
        let shared = self.shared.as_ref().ok_or(NetError::NotActivated)?;

        let mut modules = Vec::new();
        for (idx, node) in self.nodes.iter().enumerate() {
            if node.placement == Placement::PerVoice {
                let id = trans.integrate((node.factory)());
                modules.push((TemplateNodeId(idx), id));
            }
        }
        let lookup = |node: TemplateNodeId| -> Option<ModuleId> {
            modules
                .iter()
                .find(|(n, _)| *n == node)
                .map(|(_, id)| *id)
                .or_else(|| shared.get(&node).copied())
        };
        for edge in &self.edges {
            // Shared-internal edges were wired at activation.
            if self.placement(edge.src) == Placement::Shared
                && self.placement(edge.dst) == Placement::Shared
            {
                continue;
            }
            let (Some(src), Some(dst)) = (lookup(edge.src), lookup(edge.dst)) else {
                continue;
            };
            wire(trans, src, dst, *edge);
        }

        let id = ContextId(self.next_context);
        self.next_context += 1;
        self.contexts.insert(
            id,
            ContextState {
                routing,
                modules,
                branch_of: None,
                input_bindings: HashMap::new(),
                output_bindings: HashMap::new(),
            },
        );
        Ok(id)
    }

    /// Clones only the per-voice branch upstream of `merge`, sharing the
    /// merge node and everything downstream with `parent`.
    ///
    /// This keeps polyphony affordable when the expensive part of a voice
    /// (a filter or effect stage at or below the merge) can serve several
    /// notes: each note clones just its oscillator/envelope branch and sums
    /// into the shared merge joint.
    pub fn clone_branch(
        &mut self,
        parent: ContextId,
        merge: TemplateNodeId,
        routing: Routing,
        trans: &mut Transaction,
    ) -> Result<ContextId, NetError> {
        self.check_node(merge)?;
        if !self.contexts.contains_key(&parent) {
            return Err(NetError::UnknownContext(parent));
        }

        // The branch is every per-voice node that can reach the merge node.
        let upstream = self.upstream_of(merge);
        let branch: Vec<TemplateNodeId> = upstream
            .into_iter()
            .filter(|&n| self.placement(n) == Placement::PerVoice)
            .collect();
        if branch.is_empty() {
            return Err(NetError::EmptyBranch(merge));
        }

        let mut modules = Vec::new();
        for &node in &branch {
            let id = trans.integrate((self.nodes[node.0].factory)());
            modules.push((node, id));
        }
        let cloned = |node: TemplateNodeId| -> Option<ModuleId> {
            modules.iter().find(|(n, _)| *n == node).map(|(_, id)| *id)
        };
        for edge in &self.edges {
            let Some(src) = cloned(edge.src) else {
                // Edges from outside the branch into it (a shared LFO feeding
                // every voice) resolve against the parent's instances.
                if let Some(dst) = cloned(edge.dst) {
                    if let Ok(src) = self.resolve(parent, edge.src) {
                        wire(trans, src, dst, *edge);
                    }
                }
                continue;
            };
            // Edges leaving the branch land on the parent's instances; the
            // merge-joint edge is the usual case.
            let dst = match cloned(edge.dst) {
                Some(dst) => dst,
                None => self.resolve(parent, edge.dst)?,
            };
            wire(trans, src, dst, *edge);
        }

        let id = ContextId(self.next_context);
        self.next_context += 1;
        self.contexts.insert(
            id,
            ContextState {
                routing,
                modules,
                branch_of: Some(parent),
                input_bindings: HashMap::new(),
                output_bindings: HashMap::new(),
            },
        );
        Ok(id)
    }

    /// Whether `context` was produced by [`Network::clone_branch`].
    pub fn is_branch(&self, context: ContextId) -> Result<bool, NetError> {
        self.contexts
            .get(&context)
            .map(|c| c.branch_of.is_some())
            .ok_or(NetError::UnknownContext(context))
    }

    /// Discards every module the context owns, consumers before producers,
    /// in one transaction.
    ///
    /// Fails while branch contexts cloned from this one are still live; they
    /// share this context's merge instances and must go first.
    pub fn discard_context(
        &mut self,
        context: ContextId,
        trans: &mut Transaction,
    ) -> Result<(), NetError> {
        if !self.contexts.contains_key(&context) {
            return Err(NetError::UnknownContext(context));
        }
        if self
            .contexts
            .values()
            .any(|c| c.branch_of == Some(context))
        {
            return Err(NetError::HasBranches(context));
        }
        let state = self
            .contexts
            .remove(&context)
            .ok_or(NetError::UnknownContext(context))?;
        for (_, id) in state.modules.iter().rev() {
            trans.discard(*id);
        }
        Ok(())
    }

    /// Number of live contexts.
    pub fn context_count(&self) -> usize {
        self.contexts.len()
    }

    /// Live context handles, unordered.
    pub fn contexts(&self) -> impl Iterator<Item = ContextId> + '_ {
        self.contexts.keys().copied()
    }

    /// The routing descriptor a context was created with.
    pub fn routing(&self, context: ContextId) -> Result<Routing, NetError> {
        self.contexts
            .get(&context)
            .map(|c| c.routing)
            .ok_or(NetError::UnknownContext(context))
    }

    /// Finds the context handling a channel/voice pair.
    pub fn midi_context(&self, channel: u8, voice: u32) -> Option<ContextId> {
        self.contexts
            .iter()
            .find(|(_, c)| c.routing.channel == channel && c.routing.voice == voice)
            .map(|(id, _)| *id)
    }

    /// The module instantiated for `node` in `context`.
    ///
    /// Branch contexts resolve nodes they did not clone against their parent;
    /// shared nodes resolve for every context.
    pub fn resolve(&self, context: ContextId, node: TemplateNodeId) -> Result<ModuleId, NetError> {
        self.check_node(node)?;
        let mut at = context;
        loop {
            let state = self
                .contexts
                .get(&at)
                .ok_or(NetError::UnknownContext(at))?;
            if let Some((_, id)) = state.modules.iter().find(|(n, _)| *n == node) {
                return Ok(*id);
            }
            match state.branch_of {
                Some(parent) => at = parent,
                None => break,
            }
        }
        if let Some(shared) = &self.shared {
            if let Some(&id) = shared.get(&node) {
                return Ok(id);
            }
        }
        Err(NetError::NotInstantiated { node, context })
    }

    /// The module instantiated for a shared template node.
    ///
    /// Unlike [`Network::resolve`] this needs no context, so it works before
    /// the first voice exists (to tap the master output, say).
    pub fn shared_module(&self, node: TemplateNodeId) -> Result<ModuleId, NetError> {
        self.check_node(node)?;
        self.shared
            .as_ref()
            .ok_or(NetError::NotActivated)?
            .get(&node)
            .copied()
            .ok_or(NetError::NotShared(node))
    }

    /// Registers an input port anchored at `node`/`istream`; returns the
    /// unique name actually reserved (suffixed on collision).
    pub fn register_input_port(
        &mut self,
        name: &str,
        node: TemplateNodeId,
        istream: usize,
    ) -> Result<String, NetError> {
        self.check_node(node)?;
        Ok(self
            .ports
            .register_input(name, PortAnchor { node, slot: istream }))
    }

    /// Registers an output port anchored at `node`/`ostream`; returns the
    /// unique name actually reserved.
    pub fn register_output_port(
        &mut self,
        name: &str,
        node: TemplateNodeId,
        ostream: usize,
    ) -> Result<String, NetError> {
        self.check_node(node)?;
        Ok(self
            .ports
            .register_output(name, PortAnchor { node, slot: ostream }))
    }

    /// Binds, for one context, the external stream feeding an input port.
    ///
    /// A previous binding for the same port and context is severed in the
    /// same transaction. The old edge may already be gone when the bound
    /// source was discarded behind the network's back, so the severing is
    /// tolerant rather than a strict disconnect.
    pub fn set_port_source(
        &mut self,
        context: ContextId,
        port: &str,
        source: OutputRef,
        trans: &mut Transaction,
    ) -> Result<(), NetError> {
        let anchor = self.ports.input(port)?;
        let dst = self.resolve(context, anchor.node)?;
        let state = self
            .contexts
            .get_mut(&context)
            .ok_or(NetError::UnknownContext(context))?;
        state.input_bindings.remove(port);
        trans.clear_input(dst, anchor.slot);
        trans.connect(source.module, source.ostream, dst, anchor.slot);
        state.input_bindings.insert(port.to_owned(), source);
        Ok(())
    }

    /// Binds, for one context, the external input slot consuming an output
    /// port.
    ///
    /// As with [`Network::set_port_source`], a stale previous binding (its
    /// consumer discarded meanwhile) is cleared without failing the batch.
    pub fn set_port_dest(
        &mut self,
        context: ContextId,
        port: &str,
        dest: ModuleId,
        istream: usize,
        trans: &mut Transaction,
    ) -> Result<(), NetError> {
        let anchor = self.ports.output(port)?;
        let src = self.resolve(context, anchor.node)?;
        let state = self
            .contexts
            .get_mut(&context)
            .ok_or(NetError::UnknownContext(context))?;
        if let Some((old_dst, old_slot)) = state.output_bindings.remove(port) {
            trans.clear_input(old_dst, old_slot);
        }
        trans.connect(src, anchor.slot, dest, istream);
        state.output_bindings.insert(port.to_owned(), (dest, istream));
        Ok(())
    }

    fn placement(&self, node: TemplateNodeId) -> Placement {
        self.nodes[node.0].placement
    }

    fn check_node(&self, node: TemplateNodeId) -> Result<(), NetError> {
        if node.0 < self.nodes.len() {
            Ok(())
        } else {
            Err(NetError::UnknownNode(node))
        }
    }

    /// Template nodes with a path to `target`, excluding `target` itself.
    fn upstream_of(&self, target: TemplateNodeId) -> Vec<TemplateNodeId> {
        let mut reached = vec![false; self.nodes.len()];
        let mut stack = vec![target];
        while let Some(node) = stack.pop() {
            for edge in &self.edges {
                if edge.dst == node && !reached[edge.src.0] {
                    reached[edge.src.0] = true;
                    stack.push(edge.src);
                }
            }
        }
        (0..self.nodes.len())
            .filter(|&i| reached[i])
            .map(TemplateNodeId)
            .collect()
    }
}

fn wire(trans: &mut Transaction, src: ModuleId, dst: ModuleId, edge: TemplateEdge) {
    if edge.joint {
        trans.jconnect(src, edge.ostream, dst, edge.dslot);
    } else {
        trans.connect(src, edge.ostream, dst, edge.dslot);
    }
}
