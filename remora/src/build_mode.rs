// Copyright (c) The remora Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The user's build policy: which packages may or must be built from sources.

use crate::errors::Error;
use crate::recipe::{BuildPolicy, Recipe};
use crate::reference::Reference;
use globset::{Glob, GlobSet, GlobSetBuilder};

/// Parsed form of the `--build` arguments.
///
/// `never`, `missing`, `cascade` and `outdated` are policy words; anything else
/// is a glob pattern matched against package names and full references to
/// force those packages to build.
#[derive(Debug)]
pub struct BuildMode {
    never: bool,
    missing: bool,
    cascade: bool,
    outdated: bool,
    all: bool,
    patterns: Vec<String>,
    matcher: GlobSet,
}

impl BuildMode {
    /// Parses build arguments. `None` means "build nothing"; an empty argument
    /// list means "build everything".
    pub fn new(params: Option<&[&str]>) -> Result<Self, Error> {
        let mut mode = Self {
            never: false,
            missing: false,
            cascade: false,
            outdated: false,
            all: false,
            patterns: Vec::new(),
            matcher: GlobSet::empty(),
        };
        let params = match params {
            None => return Ok(mode),
            Some(params) => params,
        };
        if params.is_empty() {
            mode.all = true;
            return Ok(mode);
        }
        let mut builder = GlobSetBuilder::new();
        for param in params {
            match *param {
                "never" => mode.never = true,
                "missing" => mode.missing = true,
                "cascade" => mode.cascade = true,
                "outdated" => mode.outdated = true,
                pattern => {
                    let glob = Glob::new(pattern).map_err(|err| {
                        Error::GraphInternalError(format!(
                            "invalid build pattern '{}': {}",
                            pattern, err
                        ))
                    })?;
                    builder.add(glob);
                    mode.patterns.push(pattern.to_string());
                }
            }
        }
        if mode.never && (mode.missing || mode.cascade || mode.outdated || !mode.patterns.is_empty())
        {
            return Err(Error::GraphInternalError(
                "--build=never not compatible with other build options".to_string(),
            ));
        }
        mode.matcher = builder.build().map_err(|err| {
            Error::GraphInternalError(format!("invalid build patterns: {}", err))
        })?;
        Ok(mode)
    }

    /// Whether this node must be built from sources regardless of available
    /// binaries.
    pub fn forced(&self, recipe: &Recipe, reference: &Reference, with_deps_to_build: bool) -> bool {
        if self.never {
            return false;
        }
        if recipe.state.build_policy == Some(BuildPolicy::Always) {
            return true;
        }
        if self.all {
            return true;
        }
        if self.cascade && with_deps_to_build {
            return true;
        }
        self.matcher.is_match(&reference.name) || self.matcher.is_match(reference.to_string())
    }

    /// Whether building is an acceptable fallback when no binary exists.
    pub fn allowed(&self, recipe: &Recipe) -> bool {
        if self.never {
            return false;
        }
        self.missing || self.all || recipe.state.build_policy == Some(BuildPolicy::Missing)
    }

    /// Whether packages whose recorded recipe hash no longer matches the
    /// installed recipe should rebuild.
    pub fn outdated(&self) -> bool {
        self.outdated
    }

    /// Whether dependents of rebuilt packages should rebuild too.
    pub fn cascade(&self) -> bool {
        self.cascade
    }
}
