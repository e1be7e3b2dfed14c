// Copyright (c) The remora Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The dependency graph: nodes, edges, and the two passes that fill them in.
//!
//! [`GraphBuilder`](crate::graph::GraphBuilder) expands a root recipe into a
//! [`DepsGraph`]; [`BinaryAnalyzer`](crate::graph::BinaryAnalyzer) then decides
//! for every node whether its binary is built, reused from the cache,
//! downloaded, or skipped.

use crate::errors::Warning;
use crate::recipe::Recipe;
use crate::reference::{PackageReference, Reference};
use indexmap::IndexMap;
use petgraph::graph::IndexType;
use petgraph::prelude::*;
use petgraph::visit::{EdgeRef, Walker};
use std::collections::{HashMap, HashSet};
use std::fmt;

mod binaries;
mod build;

pub use binaries::*;
pub use build::*;

/// Index for DepsGraph. Used for newtype wrapping.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct NodeIx(u32);

impl fmt::Display for NodeIx {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// From the docs for `IndexType`:
//
// > Marked `unsafe` because: the trait must faithfully preserve and convert index values.
unsafe impl IndexType for NodeIx {
    #[inline(always)]
    fn new(x: usize) -> Self {
        NodeIx(x as u32)
    }
    #[inline(always)]
    fn index(&self) -> usize {
        self.0 as usize
    }
    #[inline(always)]
    fn max() -> Self {
        NodeIx(u32::MAX)
    }
}

/// Where a node's recipe came from.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RecipeStatus {
    /// The root recipe the user is building.
    Consumer,
    /// A synthetic root with no recipe of its own.
    Virtual,
    /// A recipe linked into the cache from a local working copy.
    Editable,
    /// A recipe provided by a workspace definition.
    Workspace,
    /// Fetched from a remote during this traversal.
    Downloaded,
    /// Found in the local cache.
    InCache,
    /// Found in the local cache, with no remote knowing about it.
    NoRemote,
    /// Refreshed from a remote because the upstream copy was newer.
    Updated,
}

/// A node's binary disposition, decided by the analyzer.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BinaryStatus {
    /// Build from sources.
    Build,
    /// Reuse the binary already present in the local cache.
    Cache,
    /// Download the binary from a remote.
    Download,
    /// Replace the local binary with a newer upstream one.
    Update,
    /// No binary available and building is not allowed.
    Missing,
    /// Not needed: only reachable privately from reused binaries.
    Skip,
    /// The package is editable; no binary is looked up.
    Editable,
}

impl BinaryStatus {
    /// The stable lower-case tag observed by generators and UIs.
    pub fn as_str(self) -> &'static str {
        match self {
            BinaryStatus::Build => "build",
            BinaryStatus::Cache => "cache",
            BinaryStatus::Download => "download",
            BinaryStatus::Update => "update",
            BinaryStatus::Missing => "missing",
            BinaryStatus::Skip => "skip",
            BinaryStatus::Editable => "editable",
        }
    }
}

impl fmt::Display for BinaryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A lockfile entry pinning a node to a concrete package reference.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LockEntry {
    /// The pinned package reference, possibly carrying a package revision.
    pub pref: PackageReference,
    /// Whether the locked node has already been rebuilt in this lockfile.
    pub modified: bool,
}

/// Identifies a shared name->node namespace within the graph.
///
/// Namespaces are owned by the graph in an arena; nodes address them by id so
/// that a public region of the graph shares one live view, the way the
/// traversal requires.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct NsId(usize);

impl NsId {
    const UNSET: NsId = NsId(usize::MAX);
}

/// One vertex of the dependency graph.
#[derive(Debug)]
pub struct Node {
    /// The resolved reference of this node.
    pub reference: Reference,
    /// The loaded recipe instance.
    pub recipe: Recipe,
    /// Where the recipe came from.
    pub status: RecipeStatus,
    /// The remote the recipe was found on, if any.
    pub remote: Option<String>,
    /// References transitively downstream of this node on its creation path.
    pub ancestors: HashSet<Reference>,
    /// Whether the requirement that created this node carried a pinned revision.
    pub revision_pinned: bool,
    /// Whether this node sits beneath a private requirement.
    pub private_origin: bool,
    /// Content-derived package id. Filled by the analyzer.
    pub package_id: Option<String>,
    /// Package revision of the located binary. Filled by the analyzer.
    pub prev: Option<String>,
    /// The binary disposition. Filled by the analyzer.
    pub binary: Option<BinaryStatus>,
    /// The disposition this node had before being overridden to skip.
    pub binary_non_skip: Option<BinaryStatus>,
    /// The remote selected for the binary, if any.
    pub binary_remote: Option<String>,
    /// Lockfile pin for this node, if the graph is locked.
    pub lock_entry: Option<LockEntry>,
    pub(crate) public_deps: NsId,
    pub(crate) public_closure: NsId,
}

impl Node {
    /// Creates a fresh node. Namespace wiring happens when the node is added
    /// to a graph.
    pub fn new(reference: Reference, recipe: Recipe, status: RecipeStatus) -> Self {
        Self {
            reference,
            recipe,
            status,
            remote: None,
            ancestors: HashSet::new(),
            revision_pinned: false,
            private_origin: false,
            package_id: None,
            prev: None,
            binary: None,
            binary_non_skip: None,
            binary_remote: None,
            lock_entry: None,
            public_deps: NsId::UNSET,
            public_closure: NsId::UNSET,
        }
    }

    /// The package reference of this node, once the package id is known.
    pub fn pref(&self) -> Option<PackageReference> {
        self.package_id.as_ref().map(|id| PackageReference {
            reference: self.reference.clone(),
            package_id: id.clone(),
            revision: self.prev.clone(),
        })
    }

    /// Display name for messages.
    pub fn display(&self) -> &str {
        self.recipe.display_name()
    }
}

/// The edge payload: whether the requirement was private.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DepEdge {
    /// Private edges do not leak the destination into the source's public
    /// namespace.
    pub private: bool,
}

/// The dependency graph of one install or build, produced by the builder and
/// annotated by the analyzer.
#[derive(Debug)]
pub struct DepsGraph {
    pub(crate) graph: Graph<Node, DepEdge, Directed, NodeIx>,
    root: NodeIndex<NodeIx>,
    pub(crate) aliased: HashMap<Reference, Reference>,
    namespaces: Vec<IndexMap<String, NodeIndex<NodeIx>>>,
    warnings: Vec<Warning>,
}

impl DepsGraph {
    /// Creates a graph containing just the root node.
    pub fn new(mut root: Node) -> Self {
        let mut namespaces = vec![IndexMap::new(), IndexMap::new()];
        root.public_deps = NsId(0);
        root.public_closure = NsId(1);
        let root_name = root.reference.name.clone();
        let mut graph = Graph::with_capacity(16, 16);
        let root_ix = graph.add_node(root);
        // A closure contains its own node; the re-expansion and skip checks
        // rely on it.
        namespaces[1].insert(root_name, root_ix);
        Self {
            graph,
            root: root_ix,
            aliased: HashMap::new(),
            namespaces,
            warnings: Vec::new(),
        }
    }

    /// The root node index.
    pub fn root(&self) -> NodeIndex<NodeIx> {
        self.root
    }

    /// Shared access to a node.
    pub fn node(&self, ix: NodeIndex<NodeIx>) -> &Node {
        &self.graph[ix]
    }

    /// Mutable access to a node.
    pub fn node_mut(&mut self, ix: NodeIndex<NodeIx>) -> &mut Node {
        &mut self.graph[ix]
    }

    /// Iterates over all nodes with their indices.
    pub fn nodes(&self) -> impl Iterator<Item = (NodeIndex<NodeIx>, &Node)> {
        self.graph
            .node_indices()
            .map(move |ix| (ix, &self.graph[ix]))
    }

    /// Number of nodes in the graph.
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Finds the first node with the given package name. Test helper; package
    /// names are not unique when private requirements duplicate a subtree.
    pub fn node_by_name(&self, name: &str) -> Option<NodeIndex<NodeIx>> {
        self.graph
            .node_indices()
            .find(|&ix| self.graph[ix].reference.name == name)
    }

    /// All nodes with the given package name.
    pub fn nodes_by_name(&self, name: &str) -> Vec<NodeIndex<NodeIx>> {
        self.graph
            .node_indices()
            .filter(|&ix| self.graph[ix].reference.name == name)
            .collect()
    }

    pub(crate) fn add_node(&mut self, node: Node) -> NodeIndex<NodeIx> {
        debug_assert!(node.public_deps != NsId::UNSET && node.public_closure != NsId::UNSET);
        self.graph.add_node(node)
    }

    pub(crate) fn add_edge(
        &mut self,
        src: NodeIndex<NodeIx>,
        dst: NodeIndex<NodeIx>,
        private: bool,
    ) {
        // update_edge keeps re-expanded diamonds from adding parallel edges.
        self.graph.update_edge(src, dst, DepEdge { private });
    }

    pub(crate) fn new_namespace(&mut self) -> NsId {
        self.namespaces.push(IndexMap::new());
        NsId(self.namespaces.len() - 1)
    }

    pub(crate) fn ns(&self, id: NsId) -> &IndexMap<String, NodeIndex<NodeIx>> {
        &self.namespaces[id.0]
    }

    pub(crate) fn ns_mut(&mut self, id: NsId) -> &mut IndexMap<String, NodeIndex<NodeIx>> {
        &mut self.namespaces[id.0]
    }

    /// The public namespace visible from a node: name to node, shared across
    /// the public region the node belongs to.
    pub fn public_deps(&self, ix: NodeIndex<NodeIx>) -> &IndexMap<String, NodeIndex<NodeIx>> {
        self.ns(self.graph[ix].public_deps)
    }

    /// The set of nodes a node reaches through non-private edges.
    pub fn public_closure(&self, ix: NodeIndex<NodeIx>) -> &IndexMap<String, NodeIndex<NodeIx>> {
        self.ns(self.graph[ix].public_closure)
    }

    /// Direct dependencies of a node, in declaration order.
    pub fn neighbors(&self, ix: NodeIndex<NodeIx>) -> Vec<NodeIndex<NodeIx>> {
        let mut out: Vec<_> = self.graph.neighbors_directed(ix, Outgoing).collect();
        // petgraph iterates adjacency lists newest-first.
        out.reverse();
        out
    }

    /// Direct dependencies reached through private edges.
    pub fn private_neighbors(&self, ix: NodeIndex<NodeIx>) -> Vec<NodeIndex<NodeIx>> {
        let mut out: Vec<_> = self
            .graph
            .edges_directed(ix, Outgoing)
            .filter(|edge| edge.weight().private)
            .map(|edge| edge.target())
            .collect();
        out.reverse();
        out
    }

    /// Nodes in dependency order: every node appears after all of its
    /// dependencies. This is the iteration order of the binary analyzer.
    pub fn dependency_order(&self) -> Vec<NodeIndex<NodeIx>> {
        DfsPostOrder::new(&self.graph, self.root)
            .iter(&self.graph)
            .collect()
    }

    /// Warnings accumulated while building and analyzing the graph.
    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    pub(crate) fn push_warning(&mut self, warning: Warning) {
        self.warnings.push(warning);
    }
}
