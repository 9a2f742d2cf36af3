//! Errors raised while manipulating networks and contexts.

use thiserror::Error;

use crate::network::{ContextId, TemplateNodeId};

/// Network-level errors.
///
/// These cover template and context bookkeeping; structural errors inside a
/// committed transaction are reported by the engine, not here.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum NetError {
    /// The context handle does not name a live context of this network.
    #[error("context {0} not found")]
    UnknownContext(ContextId),

    /// The template node index is out of range.
    #[error("template node {0} not found")]
    UnknownNode(TemplateNodeId),

    /// A context operation ran before the shared subgraph was activated.
    #[error("network not activated")]
    NotActivated,

    /// `activate_shared` ran twice.
    #[error("network already activated")]
    AlreadyActivated,

    /// The context still has branch contexts cloned from it.
    ///
    /// Branches share their parent's merge point; they must be discarded
    /// before the parent is.
    #[error("context {0} still has live branches")]
    HasBranches(ContextId),

    /// The named port is not registered in the addressed direction.
    #[error("no {direction} port named {name:?}")]
    UnknownPort {
        /// Port direction that was searched.
        direction: &'static str,
        /// The name that failed to resolve.
        name: String,
    },

    /// `clone_branch` was given a merge node with no per-voice nodes
    /// upstream of it, so there is nothing to clone.
    #[error("no per-voice branch upstream of node {0}")]
    EmptyBranch(TemplateNodeId),

    /// A shared-node lookup addressed a per-voice node.
    #[error("node {0} is not shared")]
    NotShared(TemplateNodeId),

    /// The template node is not instantiated in the addressed context.
    #[error("node {node} has no instance in context {context}")]
    NotInstantiated {
        /// The template node.
        node: TemplateNodeId,
        /// The context searched.
        context: ContextId,
    },
}
