// Copyright (c) The remora Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::errors::Error;
use crate::graph::{DepsGraph, Node, NodeIx, NsId};
use crate::providers::RecipeProvider;
use crate::recipe::{DepsOptionValues, HookKind, Requirement, Requirements};
use crate::reference::{parse_loose_version, Reference};
use petgraph::prelude::*;
use semver::Version;
use std::collections::HashSet;

enum Conflict {
    Reference,
    Revision,
}

/// Expands a root recipe into a full dependency graph.
///
/// Expansion is depth-first. Each recursive step carries the requirement
/// decisions and option values imposed from downstream, configures the current
/// node with them, resolves version ranges, and then walks the node's
/// requirements, either creating new nodes or folding edges onto nodes already
/// bound in the public namespace.
pub struct GraphBuilder<'a> {
    provider: &'a dyn RecipeProvider,
}

impl<'a> GraphBuilder<'a> {
    /// Creates a builder over a recipe provider.
    pub fn new(provider: &'a dyn RecipeProvider) -> Self {
        Self { provider }
    }

    /// Builds the graph hanging off `root`.
    ///
    /// `root` is the consumer (or virtual) node; its recipe is configured as
    /// part of the traversal. `remote` restricts recipe lookup to one remote.
    pub fn build(
        &self,
        root: Node,
        check_updates: bool,
        update: bool,
        remote: Option<&str>,
    ) -> Result<DepsGraph, Error> {
        let check_updates = check_updates || update;
        let mut graph = DepsGraph::new(root);
        let root_ix = graph.root();
        self.load_deps(
            &mut graph,
            root_ix,
            &Requirements::default(),
            &DepsOptionValues::new(),
            check_updates,
            update,
            remote,
        )?;
        Ok(graph)
    }

    fn load_deps(
        &self,
        graph: &mut DepsGraph,
        node_ix: NodeIndex<NodeIx>,
        down_reqs: &Requirements,
        down_options: &DepsOptionValues,
        check_updates: bool,
        update: bool,
        remote: Option<&str>,
    ) -> Result<(), Error> {
        let (mut new_reqs, new_options) =
            self.config_node(graph, node_ix, down_reqs, down_options)?;
        self.resolve_deps(graph, node_ix, &mut new_reqs)?;

        let requires: Vec<Requirement> = graph
            .node(node_ix)
            .recipe
            .state
            .requires
            .values()
            .cloned()
            .collect();
        for require in requires {
            if require.override_ {
                continue;
            }
            if graph.node(node_ix).ancestors.contains(&require.reference) {
                return Err(Error::DependencyLoop {
                    node: graph.node(node_ix).reference.to_string(),
                    requirement: require.reference.to_string(),
                });
            }

            let name = require.reference.name.clone();
            let previous = graph.public_deps(node_ix).get(&name).copied();
            match previous {
                Some(previous_ix) if !require.private => {
                    self.bind_existing(graph, node_ix, previous_ix, &require)?;
                    if self.should_recurse(graph, previous_ix, &new_reqs, &new_options) {
                        self.load_deps(
                            graph,
                            previous_ix,
                            &new_reqs,
                            &new_options,
                            check_updates,
                            update,
                            remote,
                        )?;
                    }
                }
                _ => {
                    let new_ix = self.create_new_node(
                        graph,
                        node_ix,
                        require,
                        None,
                        check_updates,
                        update,
                        remote,
                    )?;
                    self.load_deps(
                        graph,
                        new_ix,
                        &new_reqs,
                        &new_options,
                        check_updates,
                        update,
                        remote,
                    )?;
                }
            }
        }
        Ok(())
    }

    /// Configures a node with the values imposed from downstream and
    /// recomputes its requirement set. Returns the requirements and option
    /// values to impose on this node's own dependencies.
    fn config_node(
        &self,
        graph: &mut DepsGraph,
        node_ix: NodeIndex<NodeIx>,
        down_reqs: &Requirements,
        down_options: &DepsOptionValues,
    ) -> Result<(Requirements, DepsOptionValues), Error> {
        let own_name = graph.node(node_ix).reference.name.clone();
        let display = graph.node(node_ix).recipe.display_name().to_string();

        {
            let recipe = &mut graph.node_mut(node_ix).recipe;
            recipe.run_hook(HookKind::ConfigOptions)?;
            recipe.state.options.propagate_upstream(down_options, &own_name);
            recipe.run_hook(HookKind::Configure)?;
            recipe
                .state
                .settings
                .validate()
                .map_err(|message| Error::InvalidConfiguration {
                    recipe: display.clone(),
                    message,
                })?;
            recipe
                .state
                .options
                .validate()
                .map_err(|message| Error::InvalidConfiguration {
                    recipe: display.clone(),
                    message,
                })?;

            // When re-evaluating the recipe along another path of a diamond,
            // restore the requirement set first; two consecutive runs of
            // requirements() must not accumulate.
            match &recipe.state.original_requires {
                None => recipe.state.original_requires = Some(recipe.state.requires.clone()),
                Some(original) => recipe.state.requires = original.clone(),
            }
            recipe.run_hook(HookKind::Requirements)?;
        }

        // Requirements produced by the hook may point at aliases resolved
        // earlier in the traversal.
        self.apply_aliases(graph, node_ix, None);

        let mut warnings = Vec::new();
        let (new_reqs, new_options) = {
            let recipe = &mut graph.node_mut(node_ix).recipe;
            let new_reqs = recipe.state.requires.update(down_reqs, &display, &mut warnings);
            (new_reqs, recipe.state.options.deps_package_values())
        };
        for warning in warnings {
            graph.push_warning(warning);
        }
        Ok((new_reqs, new_options))
    }

    /// Resolves version ranges, follows aliases registered for the resolved
    /// references, and checks that `requirements()` was deterministic across
    /// re-evaluations.
    fn resolve_deps(
        &self,
        graph: &mut DepsGraph,
        node_ix: NodeIndex<NodeIx>,
        new_reqs: &mut Requirements,
    ) -> Result<(), Error> {
        let display = graph.node(node_ix).recipe.display_name().to_string();

        let mut rewrites: Vec<(String, Reference)> = Vec::new();
        for require in graph.node(node_ix).recipe.state.requires.values() {
            if require.reference.is_version_range() {
                let resolved = self.resolve_range(&require.reference)?;
                rewrites.push((require.reference.name.clone(), resolved));
            }
        }
        for (req_name, resolved) in rewrites {
            let recipe = &mut graph.node_mut(node_ix).recipe;
            if let Some(require) = recipe.state.requires.get_mut(&req_name) {
                require.reference = resolved.clone();
            }
            // The propagated copy tracks the resolution as long as downstream
            // didn't already pin the name.
            if let Some(require) = new_reqs.get_mut(&req_name) {
                if require.reference.is_version_range() {
                    require.reference = resolved;
                }
            }
        }

        self.apply_aliases(graph, node_ix, Some(new_reqs));

        let node = graph.node_mut(node_ix);
        match &node.recipe.state.evaluated_requires {
            None => {
                node.recipe.state.evaluated_requires = Some(node.recipe.state.requires.clone());
            }
            Some(previous) if *previous != node.recipe.state.requires => {
                return Err(Error::UserRecipeError {
                    recipe: display,
                    hook: "requirements",
                    message: format!(
                        "incompatible requirements obtained in different evaluations\n    \
                         Previous requirements: [{}]\n    New requirements: [{}]",
                        previous.display_list().join(", "),
                        node.recipe.state.requires.display_list().join(", ")
                    ),
                });
            }
            Some(_) => {}
        }
        Ok(())
    }

    /// Rewrites requirements that point at references registered in the
    /// graph's alias map.
    fn apply_aliases(
        &self,
        graph: &mut DepsGraph,
        node_ix: NodeIndex<NodeIx>,
        new_reqs: Option<&mut Requirements>,
    ) {
        if graph.aliased.is_empty() {
            return;
        }
        let rewrites: Vec<(String, Reference)> = graph
            .node(node_ix)
            .recipe
            .state
            .requires
            .values()
            .filter_map(|require| {
                graph
                    .aliased
                    .get(&require.reference)
                    .map(|target| (require.reference.name.clone(), target.clone()))
            })
            .collect();
        if rewrites.is_empty() {
            return;
        }
        let recipe = &mut graph.node_mut(node_ix).recipe;
        for (req_name, target) in &rewrites {
            if let Some(require) = recipe.state.requires.get_mut(req_name) {
                require.reference = target.clone();
            }
        }
        if let Some(new_reqs) = new_reqs {
            for (req_name, target) in rewrites {
                if let Some(require) = new_reqs.get_mut(&req_name) {
                    require.reference = target;
                }
            }
        }
    }

    fn resolve_range(&self, reference: &Reference) -> Result<Reference, Error> {
        let range = reference
            .version_range()
            .ok_or_else(|| Error::RangeNotResolved {
                requirement: reference.to_string(),
                candidates: Vec::new(),
            })?;
        let candidates = self.provider.search_versions(
            &reference.name,
            reference.user.as_deref(),
            reference.channel.as_deref(),
        );
        let mut best: Option<(Version, String)> = None;
        for candidate in &candidates {
            let parsed = match parse_loose_version(candidate) {
                Some(parsed) => parsed,
                None => continue,
            };
            if !range.matches(&parsed) {
                continue;
            }
            if best.as_ref().map_or(true, |(b, _)| parsed > *b) {
                best = Some((parsed, candidate.clone()));
            }
        }
        match best {
            Some((_, version)) => Ok(Reference {
                version,
                ..reference.clone()
            }),
            None => Err(Error::RangeNotResolved {
                requirement: reference.to_string(),
                candidates,
            }),
        }
    }

    /// Adds an edge onto a node already bound in the public namespace,
    /// erroring when the requirement does not agree with the binding.
    fn bind_existing(
        &self,
        graph: &mut DepsGraph,
        node_ix: NodeIndex<NodeIx>,
        previous_ix: NodeIndex<NodeIx>,
        require: &Requirement,
    ) -> Result<(), Error> {
        let current_ref = graph.node(node_ix).reference.clone();
        graph
            .node_mut(previous_ix)
            .ancestors
            .insert(current_ref.clone());

        // The stored binding may have gone through an alias.
        let mut required_ref = require.reference.clone();
        if let Some(target) = graph.aliased.get(&required_ref) {
            required_ref = target.clone();
            let name = required_ref.name.clone();
            if let Some(stored) = graph.node_mut(node_ix).recipe.state.requires.get_mut(&name) {
                stored.reference = required_ref.clone();
            }
        }

        let previous_ref = graph.node(previous_ix).reference.clone();
        match conflicting(&previous_ref, &required_ref) {
            Some(Conflict::Revision) => {
                return Err(Error::RevisionConflict {
                    node: current_ref.to_string(),
                    requirement: required_ref.to_string(),
                })
            }
            Some(Conflict::Reference) => {
                return Err(Error::ReferenceConflict {
                    node: current_ref.to_string(),
                    requirement: required_ref.to_string(),
                    previous: previous_ref.to_string(),
                })
            }
            None => {}
        }

        graph.add_edge(node_ix, previous_ix, false);
        let closure = graph.node(node_ix).public_closure;
        graph
            .ns_mut(closure)
            .insert(previous_ref.name.clone(), previous_ix);
        Ok(())
    }

    /// Whether a re-visited node's subgraph must be re-traversed: true when
    /// the downstream requirements or options would change anything currently
    /// bound in its closure.
    fn should_recurse(
        &self,
        graph: &DepsGraph,
        previous_ix: NodeIndex<NodeIx>,
        new_reqs: &Requirements,
        new_options: &DepsOptionValues,
    ) -> bool {
        let closure = graph.public_closure(previous_ix);
        for require in new_reqs.values() {
            if let Some(&bound_ix) = closure.get(&require.reference.name) {
                if conflicting(&graph.node(bound_ix).reference, &require.reference).is_some() {
                    return true;
                }
            }
        }
        for (pkg_name, values) in new_options {
            if let Some(&bound_ix) = closure.get(pkg_name) {
                let options = &graph.node(bound_ix).recipe.state.options;
                for (opt_name, value) in values {
                    if options.get(opt_name) != Some(value.as_str()) {
                        return true;
                    }
                }
            }
        }
        false
    }

    /// Creates and wires a new node for a requirement, chasing aliases.
    fn create_new_node(
        &self,
        graph: &mut DepsGraph,
        current_ix: NodeIndex<NodeIx>,
        require: Requirement,
        alias_key: Option<Reference>,
        check_updates: bool,
        update: bool,
        remote: Option<&str>,
    ) -> Result<NodeIndex<NodeIx>, Error> {
        let result =
            self.provider
                .get_recipe(&require.reference, check_updates, update, remote)?;

        if let Some(target) = result.recipe.state.alias.clone() {
            // The recipe is a pure alias: record the redirection under the
            // original key and load the target instead.
            let key = alias_key.unwrap_or_else(|| result.reference.clear_revision());
            graph.aliased.insert(key.clone(), target.clone());
            if let Some(stored) = graph
                .node_mut(current_ix)
                .recipe
                .state
                .requires
                .get_mut(&require.reference.name)
            {
                stored.reference = target.clone();
            }
            let redirected = Requirement {
                reference: target,
                ..require
            };
            return self.create_new_node(
                graph,
                current_ix,
                redirected,
                Some(key),
                check_updates,
                update,
                remote,
            );
        }

        let mut node = Node::new(result.reference, result.recipe, result.status);
        node.remote = result.remote;
        node.revision_pinned = require.reference.revision.is_some();
        {
            let current = graph.node(current_ix);
            node.ancestors = current.ancestors.clone();
            node.ancestors.insert(current.reference.clone());
            node.private_origin = require.private || current.private_origin;
            node.public_deps = if require.private {
                // Isolation: the private subtree resolves names against what
                // the current node publicly reaches, not its shared namespace.
                current.public_closure
            } else {
                current.public_deps
            };
        }
        node.public_closure = graph.new_namespace();

        let name = node.reference.name.clone();
        let own_closure = node.public_closure;
        let new_ix = graph.add_node(node);
        graph.add_edge(current_ix, new_ix, require.private);
        // A closure contains its own node.
        graph.ns_mut(own_closure).insert(name.clone(), new_ix);

        if require.private {
            let closure = graph.node(current_ix).public_closure;
            graph.ns_mut(closure).insert(name, new_ix);
        } else {
            let namespace = graph.node(current_ix).public_deps;
            graph.ns_mut(namespace).insert(name.clone(), new_ix);
            let closure = graph.node(current_ix).public_closure;
            graph.ns_mut(closure).insert(name.clone(), new_ix);
            self.update_dependent_closures(graph, namespace, new_ix, &name);
        }
        Ok(new_ix)
    }

    /// Every node registered in the shared namespace that sits on the new
    /// node's creation path also reaches it publicly; pick those dependents up
    /// and extend their closures.
    fn update_dependent_closures(
        &self,
        graph: &mut DepsGraph,
        namespace: NsId,
        new_ix: NodeIndex<NodeIx>,
        name: &str,
    ) {
        let ancestor_names: HashSet<String> = graph
            .node(new_ix)
            .ancestors
            .iter()
            .map(|r| r.name.clone())
            .collect();
        let dependents: Vec<NodeIndex<NodeIx>> = graph
            .ns(namespace)
            .iter()
            .filter(|(dep_name, _)| ancestor_names.contains(dep_name.as_str()))
            .map(|(_, &ix)| ix)
            .collect();
        for dependent_ix in dependents {
            let closure = graph.node(dependent_ix).public_closure;
            graph.ns_mut(closure).insert(name.to_string(), new_ix);
        }
    }
}

fn conflicting(previous: &Reference, candidate: &Reference) -> Option<Conflict> {
    if !previous.base_eq(candidate) {
        return Some(Conflict::Reference);
    }
    match (&previous.revision, &candidate.revision) {
        (Some(a), Some(b)) if a != b => Some(Conflict::Revision),
        _ => None,
    }
}
