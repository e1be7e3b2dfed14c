// Copyright (c) The remora Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory doubles for the provider, cache and remote seams, plus graph
//! construction helpers shared by the test modules.

use crate::build_mode::BuildMode;
use crate::config::Config;
use crate::errors::Error;
use crate::graph::{
    BinaryAnalyzer, DepsGraph, GraphBuilder, Node, RecipeStatus,
};
use crate::info::PackageInfo;
use crate::manifest::FileTreeManifest;
use crate::providers::{
    CacheMetadata, PackageCache, PackageEntry, RecipeProvider, RecipeResult, Remote, RemoteError,
    RemoteManager, RemoteSet,
};
use crate::recipe::{
    BuildPolicy, Recipe, RecipeHooks, RecipeState,
};
use crate::reference::{PackageReference, Reference};
use camino::Utf8PathBuf;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

pub(crate) fn ref_(text: &str) -> Reference {
    Reference::parse(text).expect("fixture reference should parse")
}

type HookImpl = Box<dyn Fn(&mut RecipeState) -> Result<(), String> + Send + Sync>;

/// Declarative construction of recipe prototypes for the test provider.
pub(crate) struct RecipeBuilder {
    reference: Reference,
    state: RecipeState,
    hooks: RecipeHooks,
    status: RecipeStatus,
    remote: Option<String>,
}

impl RecipeBuilder {
    pub(crate) fn new(text: &str) -> Self {
        let reference = ref_(text);
        Self {
            state: RecipeState::new(text),
            reference,
            hooks: RecipeHooks::default(),
            status: RecipeStatus::InCache,
            remote: None,
        }
    }

    pub(crate) fn consumer(text: &str) -> Self {
        Self::new(text).status(RecipeStatus::Consumer)
    }

    pub(crate) fn status(mut self, status: RecipeStatus) -> Self {
        self.status = status;
        self
    }

    pub(crate) fn requires(mut self, refs: &[&str]) -> Self {
        for text in refs {
            self.state.requires.add(ref_(text), false);
        }
        self
    }

    pub(crate) fn requires_private(mut self, text: &str) -> Self {
        self.state.requires.add(ref_(text), true);
        self
    }

    pub(crate) fn requires_override(mut self, text: &str) -> Self {
        self.state.requires.add_override(ref_(text));
        self
    }

    pub(crate) fn option(mut self, name: &str, value: &str) -> Self {
        self.state.options.set(name, value);
        self
    }

    pub(crate) fn dep_option(mut self, package: &str, name: &str, value: &str) -> Self {
        self.state.options.set_for(package, name, value);
        self
    }

    pub(crate) fn alias_to(mut self, target: &str) -> Self {
        self.state.alias = Some(ref_(target));
        self
    }

    pub(crate) fn build_policy(mut self, policy: BuildPolicy) -> Self {
        self.state.build_policy = Some(policy);
        self
    }

    pub(crate) fn on_configure(
        mut self,
        hook: impl Fn(&mut RecipeState) -> Result<(), String> + Send + Sync + 'static,
    ) -> Self {
        self.hooks.configure = Some(Box::new(hook) as HookImpl);
        self
    }

    pub(crate) fn on_requirements(
        mut self,
        hook: impl Fn(&mut RecipeState) -> Result<(), String> + Send + Sync + 'static,
    ) -> Self {
        self.hooks.requirements = Some(Box::new(hook) as HookImpl);
        self
    }

    pub(crate) fn on_package_id(
        mut self,
        hook: impl Fn(&mut RecipeState) -> Result<(), String> + Send + Sync + 'static,
    ) -> Self {
        self.hooks.package_id = Some(Box::new(hook) as HookImpl);
        self
    }

    pub(crate) fn into_root_node(self) -> Node {
        Node::new(
            self.reference,
            Recipe::new(self.state, self.hooks),
            self.status,
        )
    }
}

struct ProviderEntry {
    recipe: Recipe,
    status: RecipeStatus,
    remote: Option<String>,
    revision: Option<String>,
}

/// An in-memory recipe provider.
#[derive(Default)]
pub(crate) struct TestProvider {
    entries: HashMap<Reference, ProviderEntry>,
}

impl TestProvider {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add(&mut self, builder: RecipeBuilder) {
        let key = builder.reference.clear_revision();
        let revision = builder.reference.revision.clone();
        self.entries.insert(
            key,
            ProviderEntry {
                recipe: Recipe::new(builder.state, builder.hooks),
                status: builder.status,
                remote: builder.remote,
                revision,
            },
        );
    }
}

impl RecipeProvider for TestProvider {
    fn get_recipe(
        &self,
        reference: &Reference,
        _check_updates: bool,
        _update: bool,
        _remote: Option<&str>,
    ) -> Result<RecipeResult, Error> {
        let entry = self
            .entries
            .get(&reference.clear_revision())
            .ok_or_else(|| Error::RecipeNotFound(reference.to_string()))?;
        let mut resolved = reference.clone();
        if resolved.revision.is_none() {
            resolved.revision = entry.revision.clone();
        }
        Ok(RecipeResult {
            recipe: entry.recipe.clone(),
            status: entry.status,
            remote: entry.remote.clone(),
            reference: resolved,
        })
    }

    fn search_versions(
        &self,
        name: &str,
        user: Option<&str>,
        channel: Option<&str>,
    ) -> Vec<String> {
        self.entries
            .keys()
            .filter(|r| {
                r.name == name && r.user.as_deref() == user && r.channel.as_deref() == channel
            })
            .map(|r| r.version.clone())
            .collect()
    }
}

type PackageKey = (String, String);

fn pkey(pref: &PackageReference) -> PackageKey {
    (
        pref.reference.clear_revision().to_string(),
        pref.package_id.clone(),
    )
}

fn rkey(reference: &Reference) -> String {
    reference.clear_revision().to_string()
}

fn key_of(ref_text: &str, package_id: &str) -> PackageKey {
    (
        ref_(ref_text).clear_revision().to_string(),
        package_id.to_string(),
    )
}

/// An in-memory package cache.
#[derive(Default)]
pub(crate) struct TestCache {
    packages: Mutex<HashSet<PackageKey>>,
    dirty: Mutex<HashSet<PackageKey>>,
    metadata: Mutex<HashMap<String, CacheMetadata>>,
    recipe_manifests: Mutex<HashMap<String, FileTreeManifest>>,
    package_manifests: Mutex<HashMap<PackageKey, FileTreeManifest>>,
    package_infos: Mutex<HashMap<PackageKey, PackageInfo>>,
    mutexes: Mutex<HashMap<PackageKey, Arc<Mutex<()>>>>,
}

impl TestCache {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Registers a cached binary with its recorded package revision.
    pub(crate) fn add_package(&self, ref_text: &str, package_id: &str, prev: &str) {
        let reference = ref_(ref_text);
        self.packages.lock().insert(key_of(ref_text, package_id));
        let mut metadata = self.metadata.lock();
        let entry = metadata.entry(rkey(&reference)).or_default();
        entry.packages.insert(
            package_id.to_string(),
            PackageEntry {
                revision: Some(prev.to_string()),
                remote: None,
                recipe_revision: None,
            },
        );
    }

    pub(crate) fn set_package_recipe_revision(
        &self,
        ref_text: &str,
        package_id: &str,
        recipe_revision: &str,
    ) {
        let mut metadata = self.metadata.lock();
        let entry = metadata.entry(rkey(&ref_(ref_text))).or_default();
        entry
            .packages
            .entry(package_id.to_string())
            .or_default()
            .recipe_revision = Some(recipe_revision.to_string());
    }

    pub(crate) fn set_recipe_remote(&self, ref_text: &str, remote: &str) {
        let mut metadata = self.metadata.lock();
        metadata.entry(rkey(&ref_(ref_text))).or_default().recipe.remote =
            Some(remote.to_string());
    }

    pub(crate) fn mark_dirty(&self, ref_text: &str, package_id: &str) {
        self.dirty.lock().insert(key_of(ref_text, package_id));
    }

    pub(crate) fn set_recipe_manifest(&self, ref_text: &str, manifest: FileTreeManifest) {
        self.recipe_manifests
            .lock()
            .insert(rkey(&ref_(ref_text)), manifest);
    }

    pub(crate) fn set_package_manifest(
        &self,
        ref_text: &str,
        package_id: &str,
        manifest: FileTreeManifest,
    ) {
        self.package_manifests
            .lock()
            .insert(key_of(ref_text, package_id), manifest);
    }

    pub(crate) fn set_package_info(&self, ref_text: &str, package_id: &str, info: PackageInfo) {
        self.package_infos
            .lock()
            .insert(key_of(ref_text, package_id), info);
    }

    pub(crate) fn has_package(&self, ref_text: &str, package_id: &str) -> bool {
        self.packages.lock().contains(&key_of(ref_text, package_id))
    }
}

impl PackageCache for TestCache {
    fn package_folder(&self, pref: &PackageReference) -> Utf8PathBuf {
        Utf8PathBuf::from("/fake/cache")
            .join(&pref.reference.name)
            .join(&pref.package_id)
    }

    fn package_exists(&self, pref: &PackageReference) -> bool {
        self.packages.lock().contains(&pkey(pref))
    }

    fn is_dirty(&self, pref: &PackageReference) -> bool {
        self.dirty.lock().contains(&pkey(pref))
    }

    fn remove_package(&self, pref: &PackageReference) {
        self.packages.lock().remove(&pkey(pref));
        self.dirty.lock().remove(&pkey(pref));
    }

    fn load_metadata(&self, reference: &Reference) -> Result<CacheMetadata, Error> {
        Ok(self
            .metadata
            .lock()
            .get(&rkey(reference))
            .cloned()
            .unwrap_or_default())
    }

    fn recipe_manifest(&self, reference: &Reference) -> Option<FileTreeManifest> {
        self.recipe_manifests.lock().get(&rkey(reference)).cloned()
    }

    fn package_manifest(&self, pref: &PackageReference) -> Option<FileTreeManifest> {
        self.package_manifests.lock().get(&pkey(pref)).cloned()
    }

    fn package_info(&self, pref: &PackageReference) -> Option<PackageInfo> {
        self.package_infos.lock().get(&pkey(pref)).cloned()
    }

    fn package_mutex(&self, pref: &PackageReference) -> Arc<Mutex<()>> {
        self.mutexes
            .lock()
            .entry(pkey(pref))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

/// An in-memory remote manager.
#[derive(Default)]
pub(crate) struct TestRemotes {
    manifests: Mutex<HashMap<(String, PackageKey), (FileTreeManifest, Option<String>)>>,
    infos: Mutex<HashMap<(String, PackageKey), (PackageInfo, Option<String>)>>,
    failing: Mutex<HashSet<String>>,
}

impl TestRemotes {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Registers a binary on a remote, with its package revision and the
    /// recipe hash recorded in its descriptor.
    pub(crate) fn add_binary(
        &self,
        remote: &str,
        ref_text: &str,
        package_id: &str,
        prev: &str,
        recipe_hash: Option<&str>,
    ) {
        let info = PackageInfo {
            recipe_hash: recipe_hash.map(|h| h.to_string()),
            ..PackageInfo::default()
        };
        self.infos.lock().insert(
            (remote.to_string(), key_of(ref_text, package_id)),
            (info, Some(prev.to_string())),
        );
    }

    pub(crate) fn add_manifest(
        &self,
        remote: &str,
        ref_text: &str,
        package_id: &str,
        manifest: FileTreeManifest,
        prev: &str,
    ) {
        self.manifests.lock().insert(
            (remote.to_string(), key_of(ref_text, package_id)),
            (manifest, Some(prev.to_string())),
        );
    }

    pub(crate) fn fail_remote(&self, remote: &str) {
        self.failing.lock().insert(remote.to_string());
    }

    fn check_failing(&self, remote: &Remote) -> Result<(), RemoteError> {
        if self.failing.lock().contains(&remote.name) {
            return Err(RemoteError::Other(format!(
                "remote '{}' unreachable",
                remote.name
            )));
        }
        Ok(())
    }
}

impl RemoteManager for TestRemotes {
    fn get_package_manifest(
        &self,
        pref: &PackageReference,
        remote: &Remote,
    ) -> Result<(FileTreeManifest, PackageReference), RemoteError> {
        self.check_failing(remote)?;
        match self
            .manifests
            .lock()
            .get(&(remote.name.clone(), pkey(pref)))
        {
            Some((manifest, prev)) => Ok((
                manifest.clone(),
                PackageReference {
                    reference: pref.reference.clone(),
                    package_id: pref.package_id.clone(),
                    revision: prev.clone(),
                },
            )),
            None => Err(RemoteError::NotFound(pref.to_string())),
        }
    }

    fn get_package_info(
        &self,
        pref: &PackageReference,
        remote: &Remote,
    ) -> Result<(PackageInfo, PackageReference), RemoteError> {
        self.check_failing(remote)?;
        match self.infos.lock().get(&(remote.name.clone(), pkey(pref))) {
            Some((info, prev)) => Ok((
                info.clone(),
                PackageReference {
                    reference: pref.reference.clone(),
                    package_id: pref.package_id.clone(),
                    revision: prev.clone(),
                },
            )),
            None => Err(RemoteError::NotFound(pref.to_string())),
        }
    }
}

/// Builds a graph from a consumer root over the provider.
pub(crate) fn build_graph(
    provider: &TestProvider,
    root: RecipeBuilder,
) -> Result<DepsGraph, Error> {
    GraphBuilder::new(provider).build(root.into_root_node(), false, false, None)
}

/// Runs the analyzer with the given collaborators.
pub(crate) fn analyze_with(
    graph: &mut DepsGraph,
    cache: &TestCache,
    remote_manager: &TestRemotes,
    config: &Config,
    build_args: Option<&[&str]>,
    update: bool,
    remotes: &RemoteSet,
) -> Result<(), Error> {
    let build_mode = BuildMode::new(build_args)?;
    BinaryAnalyzer::new(cache, remote_manager, config).analyze(graph, &build_mode, update, remotes)
}

/// Computes package ids by running a throwaway analysis against empty
/// collaborators. Tests use this to seed caches and remotes before the real
/// run.
pub(crate) fn package_ids(
    provider: &TestProvider,
    root: RecipeBuilder,
) -> HashMap<String, String> {
    let mut graph = build_graph(provider, root).expect("fixture graph should build");
    analyze_with(
        &mut graph,
        &TestCache::new(),
        &TestRemotes::new(),
        &Config::default(),
        None,
        false,
        &RemoteSet::default(),
    )
    .expect("fixture analysis should pass");
    graph
        .nodes()
        .filter_map(|(_, node)| {
            node.package_id
                .as_ref()
                .map(|id| (node.reference.name.clone(), id.clone()))
        })
        .collect()
}

/// Structural invariants every built graph must satisfy.
pub(crate) fn assert_graph_invariants(graph: &DepsGraph) {
    use petgraph::visit::EdgeRef;
    for (ix, node) in graph.nodes() {
        assert!(
            !node.ancestors.contains(&node.reference),
            "node {} is its own ancestor",
            node.reference
        );
        for edge in graph.graph.edges(ix) {
            let target = edge.target();
            let target_name = graph.node(target).reference.name.clone();
            if !edge.weight().private {
                assert_eq!(
                    graph.public_deps(ix).get(&target_name).copied(),
                    Some(target),
                    "public dep {} of {} not bound in namespace",
                    target_name,
                    node.reference
                );
                assert_eq!(
                    graph.public_closure(ix).get(&target_name).copied(),
                    Some(target),
                    "public dep {} of {} not in closure",
                    target_name,
                    node.reference
                );
            }
        }
    }
}
