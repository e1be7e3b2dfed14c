// Copyright (c) The remora Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Contains types that describe errors and warnings that `remora` methods can return.

use std::error;
use std::fmt;
use std::io;

use Error::*;

/// Error type describing the sorts of errors `remora` can return.
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// An error occurred while reading a config file.
    ConfigIoError(io::Error),
    /// An error occurred while parsing a config file.
    ConfigParseError(toml::de::Error),
    /// A reference string could not be parsed.
    ReferenceParseError {
        /// The input that failed to parse.
        input: String,
        /// Why parsing failed.
        reason: String,
    },
    /// A recipe callback failed, or behaved inconsistently across evaluations.
    UserRecipeError {
        /// The recipe's display name.
        recipe: String,
        /// The hook that failed.
        hook: &'static str,
        /// The underlying message.
        message: String,
    },
    /// A requirement closes a cycle back onto one of its ancestors.
    DependencyLoop {
        /// The node whose requirement closes the loop.
        node: String,
        /// The offending requirement.
        requirement: String,
    },
    /// Two references for the same package name do not agree.
    ReferenceConflict {
        /// The node that declared the conflicting requirement.
        node: String,
        /// The requirement that conflicts.
        requirement: String,
        /// The reference already present in the graph, which is kept.
        previous: String,
    },
    /// Two references agree except for their revisions.
    RevisionConflict {
        /// The node that declared the conflicting requirement.
        node: String,
        /// The requirement whose revision conflicts.
        requirement: String,
    },
    /// A recipe could not be located in the local cache or any remote.
    RecipeNotFound(String),
    /// A version range did not match any known version.
    RangeNotResolved {
        /// The requirement carrying the range.
        requirement: String,
        /// The candidate versions that were considered.
        candidates: Vec<String>,
    },
    /// A remote operation failed in a way that cannot be recovered from.
    RemoteError(String),
    /// Settings or options failed validation for a recipe.
    InvalidConfiguration {
        /// The recipe's display name.
        recipe: String,
        /// Why the configuration is invalid.
        message: String,
    },
    /// Package build metadata is self-contradictory.
    BuildInfoError(String),
    /// The component requirement graph within a package has a cycle.
    ComponentsCycle {
        /// The components participating in the cycle.
        components: Vec<String>,
    },
    /// A component requires another component that is not defined.
    ComponentMissingDep {
        /// The component declaring the requirement.
        component: String,
        /// The missing component name.
        requires: String,
    },
    /// A serialized package descriptor could not be parsed.
    InfoParseError(String),
    /// A serialized manifest could not be parsed.
    ManifestParseError(String),
    /// An internal invariant of the dependency graph was violated.
    GraphInternalError(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigIoError(err) => write!(f, "Error while reading config file: {}", err),
            ConfigParseError(err) => write!(f, "Error while parsing config file: {}", err),
            ReferenceParseError { input, reason } => {
                write!(f, "Invalid reference '{}': {}", input, reason)
            }
            UserRecipeError {
                recipe,
                hook,
                message,
            } => write!(f, "{}: Error in {}() method: {}", recipe, hook, message),
            DependencyLoop { node, requirement } => write!(
                f,
                "Loop detected: '{}' requires '{}' which is an ancestor too",
                node, requirement
            ),
            ReferenceConflict {
                node,
                requirement,
                previous,
            } => write!(
                f,
                "Conflict in {}:\n    Requirement {} conflicts with already defined {}\n    \
                 Keeping {}\n    To change it, override it in your base requirements",
                node, requirement, previous, previous
            ),
            RevisionConflict { node, requirement } => write!(
                f,
                "Conflict in {}:\n    Different revisions of {} have been requested",
                node, requirement
            ),
            RecipeNotFound(reference) => write!(f, "Recipe not found: {}", reference),
            RangeNotResolved {
                requirement,
                candidates,
            } => write!(
                f,
                "Version range of '{}' not satisfied by any known version (candidates: [{}])",
                requirement,
                candidates.join(", ")
            ),
            RemoteError(msg) => write!(f, "Remote error: {}", msg),
            InvalidConfiguration { recipe, message } => {
                write!(f, "{}: Invalid configuration: {}", recipe, message)
            }
            BuildInfoError(msg) => write!(f, "Invalid package build info: {}", msg),
            ComponentsCycle { components } => write!(
                f,
                "There is a dependency loop in the components declared in 'cpp_info' \
                 (involving: {})",
                components.join(", ")
            ),
            ComponentMissingDep {
                component,
                requires,
            } => write!(
                f,
                "Component '{}' declares a requirement on '{}', which is not declared",
                component, requires
            ),
            InfoParseError(msg) => write!(f, "Error while parsing package info: {}", msg),
            ManifestParseError(msg) => write!(f, "Error while parsing manifest: {}", msg),
            GraphInternalError(msg) => write!(f, "Internal error in dependency graph: {}", msg),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            ConfigIoError(err) => Some(err),
            ConfigParseError(err) => Some(err),
            _ => None,
        }
    }
}

/// Describes warnings emitted while building or analyzing a dependency graph.
///
/// Recovered conditions are reported here rather than failing the traversal.
#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[non_exhaustive]
pub enum Warning {
    /// A requirement was overridden by a downstream consumer.
    RequirementOverridden {
        /// The node whose requirement was overridden.
        node: String,
        /// The requirement as originally declared.
        declared: String,
        /// The reference imposed from downstream.
        overridden_to: String,
    },
    /// A cached package folder was found dirty and removed.
    PackageCorrupted {
        /// The package that was removed.
        pref: String,
    },
    /// A cached package belongs to a different recipe revision and was removed.
    RecipeRevisionMismatch {
        /// The package that was removed.
        pref: String,
    },
    /// An update was requested but no remote is configured for the package.
    UpdateNoRemote {
        /// The package that could not be checked.
        pref: String,
    },
    /// An update was requested but the remote has no such package.
    UpdateNotFound {
        /// The package that could not be checked.
        pref: String,
    },
    /// The local package is older than the remote upstream one.
    LocalOlderThanUpstream {
        /// The package being updated.
        pref: String,
    },
    /// The local package is newer than the remote upstream one.
    LocalNewerThanUpstream {
        /// The package that was kept.
        pref: String,
    },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Warning::*;
        match self {
            RequirementOverridden {
                node,
                declared,
                overridden_to,
            } => write!(
                f,
                "{}: requirement {} overridden by downstream to {}",
                node, declared, overridden_to
            ),
            PackageCorrupted { pref } => {
                write!(f, "{}: package is corrupted, removing folder", pref)
            }
            RecipeRevisionMismatch { pref } => write!(
                f,
                "{}: package doesn't belong to the installed recipe revision, removing folder",
                pref
            ),
            UpdateNoRemote { pref } => write!(f, "{}: can't update, no remote defined", pref),
            UpdateNotFound { pref } => write!(f, "{}: can't update, no package in remote", pref),
            LocalOlderThanUpstream { pref } => {
                write!(f, "{}: current package is older than remote upstream one", pref)
            }
            LocalNewerThanUpstream { pref } => {
                write!(f, "{}: current package is newer than remote upstream one", pref)
            }
        }
    }
}
