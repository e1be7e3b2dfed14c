// Copyright (c) The remora Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The package descriptor persisted inside every built binary.
//!
//! A [`PackageInfo`] captures the settings, options and requirement identities
//! a binary was built against. Its normalized text form is hashed into the
//! package id; the full form is persisted in the package folder and must
//! round-trip through [`dumps`](PackageInfo::dumps) / [`loads`](PackageInfo::loads)
//! without loss.

use crate::errors::Error;
use crate::hash::sha256_hex;
use crate::recipe::{Options, Settings};
use crate::reference::{parse_loose_version, PackageReference, Reference};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Sentinel package id for nodes whose identity cannot be computed yet, e.g.
/// because a requirement in package-revision mode has no known revision.
pub const PACKAGE_ID_UNKNOWN: &str = "Package_ID_unknown";

/// How much of a requirement's identity participates in the dependent's
/// package id.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum RequirementMode {
    /// The requirement does not affect the package id at all.
    #[serde(rename = "unrelated_mode")]
    Unrelated,
    /// Stable versions (>= 1.0) participate with their major version only;
    /// pre-1.0 versions participate fully.
    #[serde(rename = "semver_direct_mode")]
    SemverDirect,
    /// Major version only.
    #[serde(rename = "major_mode")]
    Major,
    /// Major and minor versions.
    #[serde(rename = "minor_mode")]
    Minor,
    /// Major, minor and patch versions.
    #[serde(rename = "patch_mode")]
    Patch,
    /// The full version as declared.
    #[serde(rename = "full_version_mode")]
    FullVersion,
    /// The full reference including user and channel.
    #[serde(rename = "full_recipe_mode")]
    FullRecipe,
    /// The full reference plus the requirement's package id.
    #[serde(rename = "full_package_mode")]
    FullPackage,
    /// The full package reference including the package revision. Requires a
    /// resolved binary; until then the dependent's id is unknown.
    #[serde(rename = "package_revision_mode")]
    PackageRevision,
}

impl Default for RequirementMode {
    fn default() -> Self {
        RequirementMode::SemverDirect
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
enum RequirementEntry {
    Computed {
        pref: PackageReference,
        mode: RequirementMode,
    },
    /// A line read back from a serialized descriptor. Kept verbatim so that
    /// loading and dumping are lossless.
    Raw(String),
}

/// One direct requirement as recorded in a package descriptor.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RequirementInfo(RequirementEntry);

impl RequirementInfo {
    /// Records a requirement with the given identity mode.
    pub fn new(pref: PackageReference, mode: RequirementMode) -> Self {
        Self(RequirementEntry::Computed { pref, mode })
    }

    /// Changes the identity mode. No-op for raw entries.
    pub fn set_mode(&mut self, mode: RequirementMode) {
        if let RequirementEntry::Computed { mode: m, .. } = &mut self.0 {
            *m = mode;
        }
    }

    /// True when the identity cannot be rendered because the mode needs a
    /// package revision that is not known yet.
    fn is_unknown(&self) -> bool {
        match &self.0 {
            RequirementEntry::Computed { pref, mode } => {
                *mode == RequirementMode::PackageRevision && pref.revision.is_none()
            }
            RequirementEntry::Raw(_) => false,
        }
    }

    /// Renders the identity line, or `None` if the mode excludes this
    /// requirement from the package id.
    fn dumps(&self) -> Option<String> {
        let (pref, mode) = match &self.0 {
            RequirementEntry::Computed { pref, mode } => (pref, *mode),
            RequirementEntry::Raw(line) => return Some(line.clone()),
        };
        let reference = &pref.reference;
        let version = |rendered: String| format!("{}/{}", reference.name, rendered);
        match mode {
            RequirementMode::Unrelated => None,
            RequirementMode::SemverDirect => {
                let rendered = match parse_loose_version(&reference.version) {
                    Some(v) if v.major >= 1 => format!("{}.Y.Z", v.major),
                    _ => reference.version.clone(),
                };
                Some(version(rendered))
            }
            RequirementMode::Major => {
                let rendered = match parse_loose_version(&reference.version) {
                    Some(v) => format!("{}.Y.Z", v.major),
                    None => reference.version.clone(),
                };
                Some(version(rendered))
            }
            RequirementMode::Minor => {
                let rendered = match parse_loose_version(&reference.version) {
                    Some(v) => format!("{}.{}.Z", v.major, v.minor),
                    None => reference.version.clone(),
                };
                Some(version(rendered))
            }
            RequirementMode::Patch => {
                let rendered = match parse_loose_version(&reference.version) {
                    Some(v) => format!("{}.{}.{}", v.major, v.minor, v.patch),
                    None => reference.version.clone(),
                };
                Some(version(rendered))
            }
            RequirementMode::FullVersion => Some(version(reference.version.clone())),
            RequirementMode::FullRecipe => Some(reference.clear_revision().to_string()),
            RequirementMode::FullPackage => Some(format!(
                "{}:{}",
                reference.clear_revision(),
                pref.package_id
            )),
            RequirementMode::PackageRevision => Some(format!(
                "{}:{}#{}",
                reference.clear_revision(),
                pref.package_id,
                pref.revision.as_deref().unwrap_or(PACKAGE_ID_UNKNOWN)
            )),
        }
    }
}

/// The direct requirements of a package descriptor, keyed by package name.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RequirementsInfo {
    map: IndexMap<String, RequirementInfo>,
}

impl RequirementsInfo {
    /// True when any requirement's identity is unknown.
    pub fn is_unknown(&self) -> bool {
        self.map.values().any(|r| r.is_unknown())
    }

    /// Clears all requirements, excluding them from the package id.
    pub fn clear(&mut self) {
        self.map.clear();
    }

    /// Sets the identity mode of every requirement.
    pub fn set_mode_all(&mut self, mode: RequirementMode) {
        for info in self.map.values_mut() {
            info.set_mode(mode);
        }
    }

    /// Sets the identity mode of the named requirement.
    pub fn set_mode(&mut self, name: &str, mode: RequirementMode) {
        if let Some(info) = self.map.get_mut(name) {
            info.set_mode(mode);
        }
    }

    /// Number of recorded requirements.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns true if no requirements are recorded.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    fn dumps(&self) -> Vec<String> {
        let mut lines: Vec<String> = self.map.values().filter_map(|r| r.dumps()).collect();
        lines.sort();
        lines
    }
}

/// The package descriptor: everything a binary's identity is derived from.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PackageInfo {
    /// The id-relevant settings. Narrowed by the `package_id` hook.
    pub settings: IndexMap<String, String>,
    /// The settings as configured, before narrowing.
    pub full_settings: IndexMap<String, String>,
    /// The id-relevant own options. Narrowed by the `package_id` hook.
    pub options: IndexMap<String, String>,
    /// Own and per-dependency option values, as configured.
    pub full_options: Vec<(String, String)>,
    /// Direct requirements with their identity modes.
    pub requires: RequirementsInfo,
    /// Direct and indirect requirement package references.
    pub full_requires: Vec<PackageReference>,
    /// Summary hash of the recipe manifest this binary was built from.
    pub recipe_hash: Option<String>,
}

impl PackageInfo {
    /// Builds a descriptor from a configured recipe and its resolved direct and
    /// indirect requirements.
    pub fn create(
        settings: &Settings,
        options: &Options,
        direct: Vec<PackageReference>,
        indirect: Vec<PackageReference>,
        default_mode: RequirementMode,
    ) -> Self {
        let settings_values = settings.values().clone();
        let mut requires = RequirementsInfo::default();
        let mut full_requires = Vec::with_capacity(direct.len() + indirect.len());
        for pref in direct {
            requires.map.insert(
                pref.reference.name.clone(),
                RequirementInfo::new(pref.clone(), default_mode),
            );
            full_requires.push(pref);
        }
        full_requires.extend(indirect);
        Self {
            settings: settings_values.clone(),
            full_settings: settings_values,
            options: options.values().clone(),
            full_options: options.full_values(),
            requires,
            full_requires,
            recipe_hash: None,
        }
    }

    /// Clears settings, options and requirements: the binary is the same
    /// whatever the configuration. Typical for header-only packages.
    pub fn header_only(&mut self) {
        self.settings.clear();
        self.options.clear();
        self.requires.clear();
    }

    /// Derives the package id, or [`PACKAGE_ID_UNKNOWN`] when a requirement's
    /// identity is not computable yet.
    pub fn package_id(&self) -> String {
        if self.requires.is_unknown() {
            return PACKAGE_ID_UNKNOWN.to_string();
        }
        let mut text = String::new();
        text.push_str("[settings]\n");
        for (name, value) in sorted(&self.settings) {
            text.push_str(&format!("{}={}\n", name, value));
        }
        text.push_str("[options]\n");
        for (name, value) in sorted(&self.options) {
            text.push_str(&format!("{}={}\n", name, value));
        }
        text.push_str("[requires]\n");
        for line in self.requires.dumps() {
            text.push_str(&line);
            text.push('\n');
        }
        sha256_hex(text.as_bytes())
    }

    /// Serializes the descriptor to its persisted text form.
    pub fn dumps(&self) -> String {
        let mut out = String::new();
        push_section(&mut out, "settings", render_map(&self.settings));
        push_section(&mut out, "requires", self.requires.dumps());
        push_section(&mut out, "options", render_map(&self.options));
        push_section(&mut out, "full_settings", render_map(&self.full_settings));
        push_section(
            &mut out,
            "full_requires",
            self.full_requires.iter().map(|p| p.to_string()).collect(),
        );
        push_section(
            &mut out,
            "full_options",
            self.full_options
                .iter()
                .map(|(name, value)| format!("{}={}", name, value))
                .collect(),
        );
        push_section(&mut out, "recipe_hash", self.recipe_hash.iter().cloned().collect());
        out
    }

    /// Parses a descriptor serialized by [`dumps`](Self::dumps). The operation
    /// is lossless: dumping the result reproduces the input.
    pub fn loads(text: &str) -> Result<Self, Error> {
        let mut info = PackageInfo::default();
        let mut current: Option<String> = None;
        for raw_line in text.lines() {
            let line = raw_line.trim();
            if line.is_empty() {
                continue;
            }
            if line.starts_with('[') && line.ends_with(']') {
                current = Some(line[1..line.len() - 1].to_string());
                continue;
            }
            let section = current.as_deref().ok_or_else(|| {
                Error::InfoParseError(format!("line '{}' outside any section", line))
            })?;
            match section {
                "settings" => insert_pair(&mut info.settings, line)?,
                "full_settings" => insert_pair(&mut info.full_settings, line)?,
                "options" => insert_pair(&mut info.options, line)?,
                "full_options" => {
                    let (name, value) = split_pair(line)?;
                    info.full_options.push((name, value));
                }
                "requires" => {
                    info.requires.map.insert(
                        line.to_string(),
                        RequirementInfo(RequirementEntry::Raw(line.to_string())),
                    );
                }
                "full_requires" => info.full_requires.push(parse_pref(line)?),
                "recipe_hash" => info.recipe_hash = Some(line.to_string()),
                other => {
                    return Err(Error::InfoParseError(format!(
                        "unknown section '{}'",
                        other
                    )))
                }
            }
        }
        Ok(info)
    }
}

fn push_section(out: &mut String, name: &str, lines: Vec<String>) {
    out.push_str(&format!("[{}]\n", name));
    for line in lines {
        out.push_str("    ");
        out.push_str(&line);
        out.push('\n');
    }
    out.push('\n');
}

fn sorted(map: &IndexMap<String, String>) -> Vec<(&String, &String)> {
    let mut pairs: Vec<_> = map.iter().collect();
    pairs.sort();
    pairs
}

fn render_map(map: &IndexMap<String, String>) -> Vec<String> {
    sorted(map)
        .into_iter()
        .map(|(name, value)| format!("{}={}", name, value))
        .collect()
}

fn split_pair(line: &str) -> Result<(String, String), Error> {
    let (name, value) = line
        .split_once('=')
        .ok_or_else(|| Error::InfoParseError(format!("expected 'name=value', got '{}'", line)))?;
    Ok((name.to_string(), value.to_string()))
}

fn insert_pair(map: &mut IndexMap<String, String>, line: &str) -> Result<(), Error> {
    let (name, value) = split_pair(line)?;
    map.insert(name, value);
    Ok(())
}

fn parse_pref(line: &str) -> Result<PackageReference, Error> {
    let (ref_part, pkg_part) = line
        .rsplit_once(':')
        .ok_or_else(|| Error::InfoParseError(format!("invalid package reference '{}'", line)))?;
    let (package_id, revision) = match pkg_part.split_once('#') {
        Some((id, prev)) => (id.to_string(), Some(prev.to_string())),
        None => (pkg_part.to_string(), None),
    };
    let reference = Reference::parse(ref_part)?;
    Ok(PackageReference {
        reference,
        package_id,
        revision,
    })
}
