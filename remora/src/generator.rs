// Copyright (c) The remora Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The seam to downstream build tooling.
//!
//! Concrete generators render [`DepsCppInfo`] into build-system files. The
//! templating of specific formats lives outside this crate; the JSON generator
//! here is the reference consumer of the aggregated metadata.

use crate::build_info::DepsCppInfo;
use crate::errors::Error;
use serde_json::json;

/// Renders aggregated dependency metadata for one build tool.
pub trait Generator {
    /// The file name the output should be written to.
    fn filename(&self) -> &'static str;

    /// Renders the aggregated metadata.
    fn content(&self, deps: &DepsCppInfo) -> Result<String, Error>;
}

/// Emits the aggregate and each dependency's metadata as JSON.
pub struct JsonGenerator;

impl Generator for JsonGenerator {
    fn filename(&self) -> &'static str {
        "build_info.json"
    }

    fn content(&self, deps: &DepsCppInfo) -> Result<String, Error> {
        let paths = |list: &[camino::Utf8PathBuf]| {
            list.iter().map(|p| p.as_str().to_string()).collect::<Vec<_>>()
        };
        let mut dependencies = Vec::new();
        for (pkg_name, dep) in deps.dependencies() {
            dependencies.push(json!({
                "name": pkg_name,
                "rootpath": dep.rootpath().as_str(),
                "version": dep.cpp_info().version,
                "description": dep.cpp_info().description,
                "include_paths": paths(dep.include_paths()),
                "lib_paths": paths(dep.lib_paths()),
                "bin_paths": paths(dep.bin_paths()),
                "build_paths": paths(dep.build_paths()),
                "libs": dep.libs()?,
                "system_libs": dep.system_libs(),
                "frameworks": dep.frameworks(),
                "defines": dep.defines(),
                "cflags": dep.cflags(),
                "cxxflags": dep.cxxflags(),
                "sharedlinkflags": dep.sharedlinkflags(),
                "exelinkflags": dep.exelinkflags(),
            }));
        }
        let value = json!({
            "deps": {
                "include_paths": paths(&deps.includedirs),
                "lib_paths": paths(&deps.libdirs),
                "bin_paths": paths(&deps.bindirs),
                "build_paths": paths(&deps.builddirs),
                "libs": deps.libs,
                "system_libs": deps.system_libs,
                "frameworks": deps.frameworks,
                "defines": deps.defines,
                "cflags": deps.cflags,
                "cxxflags": deps.cxxflags,
                "sharedlinkflags": deps.sharedlinkflags,
                "exelinkflags": deps.exelinkflags,
                "sysroot": deps.sysroot,
            },
            "dependencies": dependencies,
        });
        serde_json::to_string_pretty(&value)
            .map_err(|err| Error::BuildInfoError(format!("cannot render build info: {}", err)))
    }
}
