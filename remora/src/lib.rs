// Copyright (c) The remora Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Build and analyze C/C++ package dependency graphs.
//!
//! `remora` is the dependency core of a C/C++ package manager. It expands a
//! root recipe into a graph of packages, resolving version ranges and
//! downstream overrides on the way, then decides for every node whether its
//! binary should be rebuilt, reused from the local cache, downloaded from a
//! remote, or skipped entirely, and finally aggregates each package's declared
//! build metadata into the lists a build-system generator consumes.
//!
//! The crate deliberately stops at a set of seams: recipe loading, the on-disk
//! cache layout and the remote transport are consumed through the traits in
//! [`providers`].
//!
//! # Examples
//!
//! Expanding and analyzing a graph takes a provider, a cache and a remote
//! manager:
//!
//! ```ignore
//! use remora::graph::{BinaryAnalyzer, GraphBuilder};
//!
//! let builder = GraphBuilder::new(&provider);
//! let mut graph = builder.build(root_node, false, false, None)?;
//!
//! let analyzer = BinaryAnalyzer::new(&cache, &remotes_client, &config);
//! analyzer.analyze(&mut graph, &build_mode, false, &remotes)?;
//!
//! for (_, node) in graph.nodes() {
//!     println!("{} -> {:?}", node.reference, node.binary);
//! }
//! ```

#![warn(missing_docs)]

pub mod build_info;
mod build_mode;
mod config;
pub mod errors;
mod generator;
pub mod graph;
mod hash;
mod info;
mod manifest;
pub mod providers;
mod recipe;
mod reference;
#[cfg(test)]
mod unit_tests;

pub use build_mode::BuildMode;
pub use config::Config;
pub use errors::{Error, Warning};
pub use generator::{Generator, JsonGenerator};
pub use info::{PackageInfo, RequirementMode, RequirementsInfo, PACKAGE_ID_UNKNOWN};
pub use manifest::FileTreeManifest;
pub use recipe::{
    BuildPolicy, DepsOptionValues, HookFn, HookKind, OptionValues, Options, Recipe, RecipeHooks,
    RecipeState, Requirement, Requirements, Settings,
};
pub use reference::{PackageReference, Reference};

// Public re-exports for upstream crates used in APIs.
#[doc(no_inline)]
pub use semver::{Version, VersionReq};
