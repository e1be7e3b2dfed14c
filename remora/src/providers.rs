// Copyright (c) The remora Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The seams to the outside world: recipe lookup, remotes, and the local
//! package cache.
//!
//! The graph passes only ever talk to these traits. Production implementations
//! wrap the on-disk cache layout and the remote transport; tests plug in
//! in-memory doubles.

use crate::errors::Error;
use crate::graph::RecipeStatus;
use crate::info::PackageInfo;
use crate::manifest::FileTreeManifest;
use crate::recipe::Recipe;
use crate::reference::{PackageReference, Reference};
use camino::Utf8PathBuf;
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::error;
use std::fmt;
use std::sync::Arc;

/// One configured remote.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Remote {
    /// The remote's configured name.
    pub name: String,
    /// The remote's endpoint.
    pub url: String,
}

impl Remote {
    /// Creates a remote.
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
        }
    }
}

/// The ordered set of configured remotes, with an optional user selection.
///
/// When the user selects a remote it is used exclusively; otherwise lookups
/// fall back to the remotes recorded in cache metadata and finally iterate the
/// set in declared order.
#[derive(Clone, Debug, Default)]
pub struct RemoteSet {
    remotes: Vec<Remote>,
    selected: Option<String>,
}

impl RemoteSet {
    /// Creates a remote set in declared order.
    pub fn new(remotes: Vec<Remote>) -> Self {
        Self {
            remotes,
            selected: None,
        }
    }

    /// Selects one remote to be used exclusively.
    pub fn select(mut self, name: impl Into<String>) -> Self {
        self.selected = Some(name.into());
        self
    }

    /// The explicitly selected remote, if any.
    pub fn selected(&self) -> Option<&Remote> {
        self.selected.as_deref().and_then(|name| self.get(name))
    }

    /// Looks up a remote by name.
    pub fn get(&self, name: &str) -> Option<&Remote> {
        self.remotes.iter().find(|r| r.name == name)
    }

    /// The remotes in declared order.
    pub fn iter(&self) -> impl Iterator<Item = &Remote> {
        self.remotes.iter()
    }

    /// Returns true if no remotes are configured.
    pub fn is_empty(&self) -> bool {
        self.remotes.is_empty()
    }
}

/// Errors from remote operations. Only `Other` is fatal to an analysis; the
/// rest drive disposition choices.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RemoteError {
    /// The requested recipe or package does not exist on the remote.
    NotFound(String),
    /// No remote is configured or reachable for this operation.
    NoRemoteAvailable,
    /// Transport failure after retries; propagated to the caller.
    Other(String),
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteError::NotFound(what) => write!(f, "not found in remote: {}", what),
            RemoteError::NoRemoteAvailable => write!(f, "no remote available"),
            RemoteError::Other(msg) => write!(f, "remote failure: {}", msg),
        }
    }
}

impl error::Error for RemoteError {}

/// The outcome of locating and loading a recipe.
#[derive(Debug)]
pub struct RecipeResult {
    /// The loaded recipe instance.
    pub recipe: Recipe,
    /// Where the recipe came from.
    pub status: RecipeStatus,
    /// The remote it was found on, if any.
    pub remote: Option<String>,
    /// The reference as resolved by the provider (revision filled in, etc.).
    pub reference: Reference,
}

/// Locates recipes by reference, consulting workspace definitions, the local
/// cache and remotes. Consumed by the graph builder.
pub trait RecipeProvider {
    /// Returns the loaded recipe for a reference.
    fn get_recipe(
        &self,
        reference: &Reference,
        check_updates: bool,
        update: bool,
        remote: Option<&str>,
    ) -> Result<RecipeResult, Error>;

    /// All known versions of a package, across the cache and remotes. Used by
    /// the range resolver; version strings that are not dotted-numeric never
    /// match a range.
    fn search_versions(&self, name: &str, user: Option<&str>, channel: Option<&str>)
        -> Vec<String>;
}

/// Cache metadata recorded for one recipe reference.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct RecipeMetadata {
    /// The remote this recipe was fetched from.
    pub remote: Option<String>,
    /// The cached recipe revision.
    pub revision: Option<String>,
}

/// Cache metadata recorded for one package id under a recipe reference.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct PackageEntry {
    /// The package revision of the cached binary.
    pub revision: Option<String>,
    /// The remote this binary was fetched from.
    pub remote: Option<String>,
    /// The recipe revision the cached binary was built from.
    pub recipe_revision: Option<String>,
}

/// The metadata file stored per recipe reference in the local cache.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct CacheMetadata {
    /// Recipe-level metadata.
    pub recipe: RecipeMetadata,
    /// Per-package-id metadata.
    pub packages: IndexMap<String, PackageEntry>,
}

impl CacheMetadata {
    /// Serializes the metadata to its persisted JSON form.
    pub fn dumps(&self) -> String {
        // A struct of maps and strings always serializes.
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    /// Parses metadata serialized by [`dumps`](Self::dumps).
    pub fn loads(text: &str) -> Result<Self, Error> {
        serde_json::from_str(text)
            .map_err(|err| Error::InfoParseError(format!("invalid cache metadata: {}", err)))
    }
}

/// The local binary cache, keyed by package reference. Consumed by the binary
/// analyzer.
pub trait PackageCache {
    /// The folder the binary for `pref` lives in (or would live in).
    fn package_folder(&self, pref: &PackageReference) -> Utf8PathBuf;

    /// Whether a binary folder exists for `pref`.
    fn package_exists(&self, pref: &PackageReference) -> bool;

    /// Whether the binary folder is marked dirty (a previous write was
    /// interrupted).
    fn is_dirty(&self, pref: &PackageReference) -> bool;

    /// Removes the binary folder for `pref`.
    fn remove_package(&self, pref: &PackageReference);

    /// Loads the metadata recorded for a recipe reference.
    fn load_metadata(&self, reference: &Reference) -> Result<CacheMetadata, Error>;

    /// The manifest of the exported recipe, for outdated checks.
    fn recipe_manifest(&self, reference: &Reference) -> Option<FileTreeManifest>;

    /// The manifest of the cached binary, for update comparison.
    fn package_manifest(&self, pref: &PackageReference) -> Option<FileTreeManifest>;

    /// The descriptor persisted in the cached binary.
    fn package_info(&self, pref: &PackageReference) -> Option<PackageInfo>;

    /// The mutual-exclusion lock for `pref`, keyed by `(recipe ref, package
    /// id)`. Held around local mutation only, never across remote calls.
    fn package_mutex(&self, pref: &PackageReference) -> Arc<Mutex<()>>;
}

/// Remote operations needed by the binary analyzer.
pub trait RemoteManager {
    /// Fetches the manifest of the binary for `pref` on `remote`, along with
    /// the fully resolved package reference.
    fn get_package_manifest(
        &self,
        pref: &PackageReference,
        remote: &Remote,
    ) -> Result<(FileTreeManifest, PackageReference), RemoteError>;

    /// Fetches the descriptor of the binary for `pref` on `remote`, along with
    /// the fully resolved package reference.
    fn get_package_info(
        &self,
        pref: &PackageReference,
        remote: &Remote,
    ) -> Result<(PackageInfo, PackageReference), RemoteError>;
}
