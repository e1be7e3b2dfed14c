// Copyright (c) The remora Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::errors::Error;
use crate::info::RequirementMode;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Client configuration affecting graph analysis.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Whether recipe and package revisions participate in addressing.
    pub revisions_enabled: bool,
    /// How requirement identities participate in package ids by default.
    pub default_package_id_mode: RequirementMode,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            revisions_enabled: false,
            default_package_id_mode: RequirementMode::SemverDirect,
        }
    }
}

impl Config {
    /// Parses and constructs a config from a file.
    pub fn from_file(f: impl AsRef<Path>) -> Result<Self, Error> {
        let contents = fs::read(f).map_err(Error::ConfigIoError)?;
        Self::from_toml(&contents)
    }

    /// Parses a config from TOML bytes.
    pub fn from_toml(bytes: &[u8]) -> Result<Self, Error> {
        toml::from_slice(bytes).map_err(Error::ConfigParseError)
    }
}
