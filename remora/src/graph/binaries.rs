// Copyright (c) The remora Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::build_mode::BuildMode;
use crate::config::Config;
use crate::errors::{Error, Warning};
use crate::graph::{BinaryStatus, DepsGraph, NodeIx, RecipeStatus};
use crate::info::{PackageInfo, PACKAGE_ID_UNKNOWN};
use crate::providers::{PackageCache, Remote, RemoteError, RemoteManager, RemoteSet};
use crate::recipe::HookKind;
use crate::reference::PackageReference;
use petgraph::prelude::*;
use std::collections::{HashMap, HashSet};

/// Decides the binary disposition of every node of a built graph.
///
/// Nodes are visited in dependency order; each visit first derives the node's
/// package id from its configuration and its dependencies' identities, then
/// probes the local cache and the remotes to classify the binary as built,
/// reused, downloaded, updated, missing or skipped.
pub struct BinaryAnalyzer<'a> {
    cache: &'a dyn PackageCache,
    remote_manager: &'a dyn RemoteManager,
    config: &'a Config,
}

impl<'a> BinaryAnalyzer<'a> {
    /// Creates an analyzer over a local cache and a remote manager.
    pub fn new(
        cache: &'a dyn PackageCache,
        remote_manager: &'a dyn RemoteManager,
        config: &'a Config,
    ) -> Self {
        Self {
            cache,
            remote_manager,
            config,
        }
    }

    /// Fills `package_id`, `binary`, `prev` and `binary_remote` on every
    /// non-consumer, non-virtual node of the graph.
    pub fn analyze(
        &self,
        graph: &mut DepsGraph,
        build_mode: &BuildMode,
        update: bool,
        remotes: &RemoteSet,
    ) -> Result<(), Error> {
        let mut evaluated: HashMap<PackageReference, Vec<NodeIndex<NodeIx>>> = HashMap::new();
        for node_ix in graph.dependency_order() {
            self.compute_package_id(graph, node_ix)?;
            let status = graph.node(node_ix).status;
            if matches!(status, RecipeStatus::Consumer | RecipeStatus::Virtual) {
                continue;
            }
            if graph.node(node_ix).package_id.as_deref() == Some(PACKAGE_ID_UNKNOWN) {
                graph.node_mut(node_ix).binary = Some(BinaryStatus::Missing);
                continue;
            }
            self.evaluate_node(graph, node_ix, build_mode, update, &mut evaluated, remotes)?;
            self.handle_private(graph, node_ix);
        }
        Ok(())
    }

    /// Derives a node's package id. All direct dependencies must already carry
    /// their own ids, which the iteration order guarantees.
    fn compute_package_id(
        &self,
        graph: &mut DepsGraph,
        node_ix: NodeIndex<NodeIx>,
    ) -> Result<(), Error> {
        let neighbors = graph.neighbors(node_ix);

        let mut direct: Vec<PackageReference> = Vec::with_capacity(neighbors.len());
        let mut indirect: Vec<PackageReference> = Vec::new();
        for &child_ix in &neighbors {
            let child = graph.node(child_ix);
            let pref = child.pref().ok_or_else(|| {
                Error::GraphInternalError(format!(
                    "dependency '{}' visited before its package id was computed",
                    child.reference
                ))
            })?;
            if let Some(info) = &child.recipe.state.info {
                indirect.extend(info.full_requires.iter().cloned());
            }
            direct.push(pref);
        }
        let direct_set: HashSet<&PackageReference> = direct.iter().collect();
        let mut seen: HashSet<PackageReference> = HashSet::new();
        indirect.retain(|pref| !direct_set.contains(pref) && seen.insert(pref.clone()));

        // Reverse visibility: record each dependency's final option values,
        // and point the requirement at the resolved reference.
        for &child_ix in &neighbors {
            let (child_name, child_ref, child_options) = {
                let child = graph.node(child_ix);
                (
                    child.reference.name.clone(),
                    child.reference.clone(),
                    child.recipe.state.options.values().clone(),
                )
            };
            let node = graph.node_mut(node_ix);
            node.recipe
                .state
                .options
                .record_downstream(&child_name, &child_options);
            if let Some(require) = node.recipe.state.requires.get_mut(&child_name) {
                require.reference = child_ref;
            }
        }

        let used_names: HashSet<String> = direct
            .iter()
            .chain(indirect.iter())
            .map(|pref| pref.reference.name.clone())
            .collect();
        let default_mode = self.config.default_package_id_mode;
        let node = graph.node_mut(node_ix);
        let used: HashSet<&str> = used_names.iter().map(|s| s.as_str()).collect();
        node.recipe.state.options.clear_unused(&used);
        node.recipe.state.options.freeze();

        node.recipe.state.info = Some(PackageInfo::create(
            &node.recipe.state.settings,
            &node.recipe.state.options,
            direct,
            indirect,
            default_mode,
        ));
        // Let the recipe narrow its identity before it is hashed.
        node.recipe.run_hook(HookKind::PackageId)?;

        let node = graph.node_mut(node_ix);
        let package_id = node
            .recipe
            .state
            .info
            .as_ref()
            .map(|info| info.package_id())
            .ok_or_else(|| {
                Error::GraphInternalError(format!(
                    "package_id() removed the descriptor of '{}'",
                    node.reference
                ))
            })?;
        node.package_id = Some(package_id);
        Ok(())
    }

    fn evaluate_node(
        &self,
        graph: &mut DepsGraph,
        node_ix: NodeIndex<NodeIx>,
        build_mode: &BuildMode,
        update: bool,
        evaluated: &mut HashMap<PackageReference, Vec<NodeIndex<NodeIx>>>,
        remotes: &RemoteSet,
    ) -> Result<(), Error> {
        let reference = graph.node(node_ix).reference.clone();
        let package_id = match &graph.node(node_ix).package_id {
            Some(id) => id.clone(),
            None => {
                return Err(Error::GraphInternalError(format!(
                    "binary evaluation of '{}' before package id computation",
                    reference
                )))
            }
        };

        // Honor a lockfile pin, keeping its package revision.
        let pref = match &graph.node(node_ix).lock_entry {
            Some(lock) if lock.pref.package_id == package_id => lock.pref.clone(),
            _ => PackageReference::new(reference.clone(), package_id.clone()),
        };

        // Every additional node with the same pref reuses the first decision.
        if let Some(previous_nodes) = evaluated.get_mut(&pref) {
            let first_ix = previous_nodes[0];
            previous_nodes.push(node_ix);
            let (binary, binary_remote, prev) = {
                let first = graph.node(first_ix);
                let binary = if first.binary == Some(BinaryStatus::Skip) {
                    // The first node may sit in a private subtree this one does
                    // not; inherit what it was before being skipped.
                    first.binary_non_skip
                } else {
                    first.binary
                };
                (binary, first.binary_remote.clone(), first.prev.clone())
            };
            let node = graph.node_mut(node_ix);
            node.binary = binary;
            node.binary_remote = binary_remote;
            node.prev = prev;
            return Ok(());
        }
        evaluated.insert(pref.clone(), vec![node_ix]);

        if graph.node(node_ix).status == RecipeStatus::Editable {
            graph.node_mut(node_ix).binary = Some(BinaryStatus::Editable);
            return Ok(());
        }

        // Cascade: a node rebuilds when one of its direct dependencies does,
        // unless the lockfile already marks this node as rebuilt.
        let mut with_deps_to_build = false;
        let locked_modified = graph
            .node(node_ix)
            .lock_entry
            .as_ref()
            .map_or(false, |lock| lock.modified);
        if build_mode.cascade() && !locked_modified {
            for dep_ix in graph.neighbors(node_ix) {
                let dep = graph.node(dep_ix);
                let dep_modified = dep.lock_entry.as_ref().map_or(false, |lock| lock.modified);
                if dep.binary == Some(BinaryStatus::Build) || dep_modified {
                    with_deps_to_build = true;
                    break;
                }
            }
        }
        if build_mode.forced(&graph.node(node_ix).recipe, &reference, with_deps_to_build) {
            let node = graph.node_mut(node_ix);
            node.binary = Some(BinaryStatus::Build);
            node.prev = None;
            return Ok(());
        }

        // Local cache probe, under the per-package lock.
        {
            let mutex = self.cache.package_mutex(&pref);
            let _guard = mutex.lock();
            if self.cache.is_dirty(&pref) {
                graph.push_warning(Warning::PackageCorrupted {
                    pref: pref.to_string(),
                });
                self.cache.remove_package(&pref);
            }
            if self.config.revisions_enabled {
                let metadata = self.cache.load_metadata(&reference)?;
                if let Some(entry) = metadata.packages.get(&package_id) {
                    if let Some(recipe_revision) = &entry.recipe_revision {
                        if reference.revision.as_ref() != Some(recipe_revision) {
                            graph.push_warning(Warning::RecipeRevisionMismatch {
                                pref: pref.to_string(),
                            });
                            self.cache.remove_package(&pref);
                        }
                    }
                }
            }
        }

        // Remote selection: the user's choice wins; otherwise follow the
        // remotes recorded in cache metadata, then the recipe's remote.
        let mut remote: Option<Remote> = remotes.selected().cloned();
        let user_selected = remote.is_some();
        if remote.is_none() {
            if let Ok(metadata) = self.cache.load_metadata(&reference) {
                let recorded = metadata
                    .packages
                    .get(&package_id)
                    .and_then(|entry| entry.remote.clone())
                    .or(metadata.recipe.remote);
                remote = recorded.and_then(|name| remotes.get(&name)).cloned();
            }
        }

        let mut package_hash: Option<String> = None;
        if self.cache.package_exists(&pref) {
            if update {
                if let Some(selected) = &remote {
                    match self.remote_manager.get_package_manifest(&pref, selected) {
                        Err(RemoteError::NotFound(_)) => {
                            graph.push_warning(Warning::UpdateNotFound {
                                pref: pref.to_string(),
                            });
                        }
                        Err(RemoteError::NoRemoteAvailable) => {
                            graph.push_warning(Warning::UpdateNoRemote {
                                pref: pref.to_string(),
                            });
                        }
                        Err(RemoteError::Other(msg)) => {
                            return Err(Error::RemoteError(format!(
                                "error checking upstream manifest for '{}': {}",
                                pref, msg
                            )))
                        }
                        Ok((upstream_manifest, upstream_pref)) => {
                            if let Some(local) = self.cache.package_manifest(&pref) {
                                if upstream_manifest != local {
                                    if upstream_manifest.newer_than(&local) {
                                        graph.push_warning(Warning::LocalOlderThanUpstream {
                                            pref: pref.to_string(),
                                        });
                                        let node = graph.node_mut(node_ix);
                                        node.binary = Some(BinaryStatus::Update);
                                        node.prev = upstream_pref.revision.clone();
                                        if build_mode.outdated() {
                                            package_hash = self
                                                .remote_manager
                                                .get_package_info(&pref, selected)
                                                .ok()
                                                .and_then(|(info, _)| info.recipe_hash);
                                        }
                                    } else {
                                        graph.push_warning(Warning::LocalNewerThanUpstream {
                                            pref: pref.to_string(),
                                        });
                                    }
                                }
                            }
                        }
                    }
                } else if remotes.is_empty() {
                    graph.push_warning(Warning::UpdateNoRemote {
                        pref: pref.to_string(),
                    });
                }
            }
            if graph.node(node_ix).binary.is_none() {
                let metadata = self.cache.load_metadata(&reference)?;
                let prev = metadata
                    .packages
                    .get(&package_id)
                    .and_then(|entry| entry.revision.clone())
                    .ok_or_else(|| {
                        Error::GraphInternalError(format!(
                            "cached package '{}' has no recorded package revision",
                            pref
                        ))
                    })?;
                let node = graph.node_mut(node_ix);
                node.binary = Some(BinaryStatus::Cache);
                node.prev = Some(prev);
                package_hash = self
                    .cache
                    .package_info(&pref)
                    .and_then(|info| info.recipe_hash);
            }
        } else {
            // No local binary: ask the selected remote, then the others.
            let mut remote_info: Option<(PackageInfo, PackageReference)> = None;
            if let Some(selected) = &remote {
                match self.remote_manager.get_package_info(&pref, selected) {
                    Ok(found) => remote_info = Some(found),
                    Err(RemoteError::NotFound(_)) | Err(RemoteError::NoRemoteAvailable) => {}
                    Err(RemoteError::Other(msg)) => {
                        return Err(Error::RemoteError(format!(
                            "error downloading binary package '{}': {}",
                            pref, msg
                        )))
                    }
                }
            }
            if remote_info.is_none() && (!user_selected || self.config.revisions_enabled) {
                for candidate in remotes.iter() {
                    if Some(candidate) == remote.as_ref() {
                        continue;
                    }
                    match self.remote_manager.get_package_info(&pref, candidate) {
                        Ok(found) => {
                            remote_info = Some(found);
                            remote = Some(candidate.clone());
                            break;
                        }
                        Err(RemoteError::NotFound(_)) | Err(RemoteError::NoRemoteAvailable) => {}
                        Err(RemoteError::Other(msg)) => {
                            return Err(Error::RemoteError(format!(
                                "error downloading binary package '{}': {}",
                                pref, msg
                            )))
                        }
                    }
                }
            }

            if let Some((info, found_pref)) = remote_info {
                let node = graph.node_mut(node_ix);
                node.binary = Some(BinaryStatus::Download);
                node.prev = found_pref.revision;
                package_hash = info.recipe_hash;
            } else {
                let node_binary = if build_mode.allowed(&graph.node(node_ix).recipe) {
                    BinaryStatus::Build
                } else {
                    BinaryStatus::Missing
                };
                let node = graph.node_mut(node_ix);
                node.binary = Some(node_binary);
                node.prev = None;
            }
        }

        // Outdated: a reusable binary built from a different recipe revision
        // of the same reference rebuilds instead.
        if build_mode.outdated()
            && matches!(
                graph.node(node_ix).binary,
                Some(BinaryStatus::Cache) | Some(BinaryStatus::Download) | Some(BinaryStatus::Update)
            )
        {
            let local_recipe_hash = self
                .cache
                .recipe_manifest(&reference)
                .map(|manifest| manifest.summary_hash());
            if local_recipe_hash != package_hash {
                let node = graph.node_mut(node_ix);
                node.binary = Some(BinaryStatus::Build);
                node.prev = None;
            }
        }

        graph.node_mut(node_ix).binary_remote = remote.map(|r| r.name);
        Ok(())
    }

    /// Once a node's binary is reused, nothing in its private subtrees is
    /// needed at install time. Skip propagation follows private edges, plus
    /// the private-origin members of a private node's own closure.
    fn handle_private(&self, graph: &mut DepsGraph, node_ix: NodeIndex<NodeIx>) {
        if !matches!(
            graph.node(node_ix).binary,
            Some(BinaryStatus::Cache)
                | Some(BinaryStatus::Download)
                | Some(BinaryStatus::Update)
                | Some(BinaryStatus::Skip)
        ) {
            return;
        }
        let mut targets: Vec<NodeIndex<NodeIx>> = graph.private_neighbors(node_ix);
        if graph.node(node_ix).private_origin {
            for (_, &member_ix) in graph.public_closure(node_ix) {
                // The closure contains the node itself; a reused private node
                // is still needed by its dependent, only its subtree is not.
                if member_ix != node_ix && graph.node(member_ix).private_origin {
                    targets.push(member_ix);
                }
            }
        }
        for target_ix in targets {
            if graph.node(target_ix).binary == Some(BinaryStatus::Skip) {
                continue;
            }
            {
                let target = graph.node_mut(target_ix);
                target.binary_non_skip = target.binary;
                target.binary = Some(BinaryStatus::Skip);
            }
            self.handle_private(graph, target_ix);
        }
    }
}
