// Copyright (c) The remora Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Canonical identities for recipes and package binaries.
//!
//! A [`Reference`] names a recipe instance (`name/version@user/channel#revision`).
//! A [`PackageReference`] extends it with the content-derived package id of one
//! concrete binary, and optionally that binary's own revision.

use crate::errors::Error;
use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The canonical identity of a recipe instance.
///
/// The version is kept as declared. During graph construction it may still be a
/// version range (`[>=1.0 <2.0]`); the range resolver rewrites it to a concrete
/// version before the reference is used for identity decisions.
#[derive(Clone, Debug, Eq, Hash, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct Reference {
    /// The package name.
    pub name: String,
    /// The declared version, or a version range before resolution.
    pub version: String,
    /// The owning user namespace, if any.
    pub user: Option<String>,
    /// The channel within the user namespace, if any.
    pub channel: Option<String>,
    /// The recipe revision, if pinned or resolved.
    pub revision: Option<String>,
}

impl Reference {
    /// Creates a reference without user, channel or revision.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            user: None,
            channel: None,
            revision: None,
        }
    }

    /// Parses a reference from its textual form.
    ///
    /// Accepted shapes: `name/version`, `name/version@user/channel`, each
    /// optionally followed by `#revision`.
    pub fn parse(input: &str) -> Result<Self, Error> {
        let malformed = |reason: &str| Error::ReferenceParseError {
            input: input.to_string(),
            reason: reason.to_string(),
        };

        let (body, revision) = match input.split_once('#') {
            Some((body, rev)) if !rev.is_empty() => (body, Some(rev.to_string())),
            Some(_) => return Err(malformed("empty revision")),
            None => (input, None),
        };
        let (pkg, userchannel) = match body.split_once('@') {
            Some((pkg, uc)) => (pkg, Some(uc)),
            None => (body, None),
        };
        let (name, version) = pkg
            .split_once('/')
            .ok_or_else(|| malformed("expected 'name/version'"))?;
        if name.is_empty() || version.is_empty() {
            return Err(malformed("empty name or version"));
        }
        let (user, channel) = match userchannel {
            Some(uc) => {
                let (user, channel) = uc
                    .split_once('/')
                    .ok_or_else(|| malformed("expected 'user/channel' after '@'"))?;
                if user.is_empty() || channel.is_empty() {
                    return Err(malformed("empty user or channel"));
                }
                (Some(user.to_string()), Some(channel.to_string()))
            }
            None => (None, None),
        };

        Ok(Self {
            name: name.to_string(),
            version: version.to_string(),
            user,
            channel,
            revision,
        })
    }

    /// Returns a copy of this reference with the revision cleared.
    pub fn clear_revision(&self) -> Self {
        Self {
            revision: None,
            ..self.clone()
        }
    }

    /// Returns true if the two references are equal after clearing revisions.
    pub fn base_eq(&self, other: &Reference) -> bool {
        self.name == other.name
            && self.version == other.version
            && self.user == other.user
            && self.channel == other.channel
    }

    /// Returns true if both references carry a revision and the revisions match.
    pub fn revision_eq(&self, other: &Reference) -> bool {
        match (&self.revision, &other.revision) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    /// Returns true if the version field holds a version range rather than a
    /// concrete version.
    pub fn is_version_range(&self) -> bool {
        self.version.starts_with('[') && self.version.ends_with(']')
    }

    /// Parses the version range carried by this reference.
    ///
    /// Range expressions use space-separated comparators (`[>=1.0 <2.0]`).
    pub fn version_range(&self) -> Option<VersionReq> {
        if !self.is_version_range() {
            return None;
        }
        let inner = &self.version[1..self.version.len() - 1];
        let normalized = inner.split_whitespace().collect::<Vec<_>>().join(", ");
        VersionReq::parse(&normalized).ok()
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.version)?;
        if let (Some(user), Some(channel)) = (&self.user, &self.channel) {
            write!(f, "@{}/{}", user, channel)?;
        }
        if let Some(revision) = &self.revision {
            write!(f, "#{}", revision)?;
        }
        Ok(())
    }
}

/// A reference to one concrete binary package: a [`Reference`] plus the
/// content-derived package id, and optionally the package revision.
#[derive(Clone, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub struct PackageReference {
    /// The recipe reference this binary was built from.
    pub reference: Reference,
    /// The content-derived package id.
    pub package_id: String,
    /// The package revision, when a concrete binary has been located.
    pub revision: Option<String>,
}

impl PackageReference {
    /// Creates a package reference without a package revision.
    pub fn new(reference: Reference, package_id: impl Into<String>) -> Self {
        Self {
            reference,
            package_id: package_id.into(),
            revision: None,
        }
    }
}

impl fmt::Display for PackageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.reference, self.package_id)?;
        if let Some(revision) = &self.revision {
            write!(f, "#{}", revision)?;
        }
        Ok(())
    }
}

/// Parses a version the way package recipes write them: missing components are
/// padded, so `1.2` is treated as `1.2.0`. Returns `None` for versions that are
/// not dotted-numeric (`9e`, `cci.20210101` and friends never match a range).
pub(crate) fn parse_loose_version(version: &str) -> Option<Version> {
    let mut parts = Vec::with_capacity(3);
    for part in version.split('.') {
        parts.push(part.parse::<u64>().ok()?);
    }
    if parts.is_empty() || parts.len() > 3 {
        return None;
    }
    while parts.len() < 3 {
        parts.push(0);
    }
    Some(Version::new(parts[0], parts[1], parts[2]))
}
