// Copyright (c) The remora Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-package build metadata declared for consumers, and its aggregation.
//!
//! A recipe declares a [`CppInfo`]: include paths, libraries, flags, optional
//! named [`Component`]s and per-build-type config overlays. [`DepCppInfo`]
//! presents one package's metadata aggregated across its components, with the
//! component libraries in link order. [`DepsCppInfo`] folds the metadata of a
//! whole dependency set into the lists a generator consumes.

use crate::errors::Error;
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use once_cell::sync::OnceCell;

const DEFAULT_INCLUDE: &str = "include";
const DEFAULT_LIB: &str = "lib";
const DEFAULT_BIN: &str = "bin";
const DEFAULT_RES: &str = "res";
const DEFAULT_BUILD: &str = "";
const DEFAULT_FRAMEWORK: &str = "Frameworks";

/// A named sub-target within a package: its own dirs, libs and flags, plus
/// `requires` edges to other components of the same package.
///
/// Components deliberately have no nested configs or components; the type
/// rules those combinations out.
#[derive(Clone, Debug)]
pub struct Component {
    /// Generator-facing name override.
    pub name: Option<String>,
    /// Per-generator name overrides, taking precedence over `name`.
    pub names: IndexMap<String, String>,
    /// Ordered list of include paths.
    pub includedirs: Vec<Utf8PathBuf>,
    /// Ordered list of source paths.
    pub srcdirs: Vec<Utf8PathBuf>,
    /// Directories to find libraries.
    pub libdirs: Vec<Utf8PathBuf>,
    /// Directories to find resources, data, etc.
    pub resdirs: Vec<Utf8PathBuf>,
    /// Directories to find executables and shared libs.
    pub bindirs: Vec<Utf8PathBuf>,
    /// Directories with build helper files.
    pub builddirs: Vec<Utf8PathBuf>,
    /// Directories to find frameworks.
    pub frameworkdirs: Vec<Utf8PathBuf>,
    /// The libs this component links.
    pub libs: Vec<String>,
    /// System libraries, linked as-is.
    pub system_libs: Vec<String>,
    /// macOS frameworks.
    pub frameworks: Vec<String>,
    /// Preprocessor definitions.
    pub defines: Vec<String>,
    /// Pure C flags.
    pub cflags: Vec<String>,
    /// C++ compilation flags.
    pub cxxflags: Vec<String>,
    /// Shared-link flags.
    pub sharedlinkflags: Vec<String>,
    /// Exe-link flags.
    pub exelinkflags: Vec<String>,
    /// Build modules exported to consumers.
    pub build_modules: Vec<Utf8PathBuf>,
    /// Names of components of the same package this component links against.
    pub requires: Vec<String>,
}

impl Default for Component {
    fn default() -> Self {
        Self {
            name: None,
            names: IndexMap::new(),
            includedirs: vec![DEFAULT_INCLUDE.into()],
            srcdirs: Vec::new(),
            libdirs: vec![DEFAULT_LIB.into()],
            resdirs: vec![DEFAULT_RES.into()],
            bindirs: vec![DEFAULT_BIN.into()],
            builddirs: vec![DEFAULT_BUILD.into()],
            frameworkdirs: vec![DEFAULT_FRAMEWORK.into()],
            libs: Vec::new(),
            system_libs: Vec::new(),
            frameworks: Vec::new(),
            defines: Vec::new(),
            cflags: Vec::new(),
            cxxflags: Vec::new(),
            sharedlinkflags: Vec::new(),
            exelinkflags: Vec::new(),
            build_modules: Vec::new(),
            requires: Vec::new(),
        }
    }
}

impl Component {
    /// The name a generator should use for this component.
    pub fn get_name(&self, generator: &str) -> Option<&str> {
        self.names
            .get(generator)
            .or(self.name.as_ref())
            .map(|s| s.as_str())
    }
}

/// Build metadata one package declares for its consumers.
///
/// Directories are relative to `rootpath` at declaration time and exposed as
/// absolute paths by the aggregating views.
#[derive(Clone, Debug)]
pub struct CppInfo {
    /// Generator-facing package name override.
    pub name: Option<String>,
    /// Per-generator name overrides, taking precedence over `name`.
    pub names: IndexMap<String, String>,
    /// Version of the package.
    pub version: Option<String>,
    /// Description of the package.
    pub description: Option<String>,
    /// Absolute root of the installed package.
    pub rootpath: Utf8PathBuf,
    /// Sysroot to use when consuming this package.
    pub sysroot: Option<String>,
    /// Ordered list of include paths.
    pub includedirs: Vec<Utf8PathBuf>,
    /// Ordered list of source paths.
    pub srcdirs: Vec<Utf8PathBuf>,
    /// Directories to find libraries.
    pub libdirs: Vec<Utf8PathBuf>,
    /// Directories to find resources, data, etc.
    pub resdirs: Vec<Utf8PathBuf>,
    /// Directories to find executables and shared libs.
    pub bindirs: Vec<Utf8PathBuf>,
    /// Directories with build helper files.
    pub builddirs: Vec<Utf8PathBuf>,
    /// Directories to find frameworks.
    pub frameworkdirs: Vec<Utf8PathBuf>,
    /// The libs to link against.
    pub libs: Vec<String>,
    /// System libraries, linked as-is.
    pub system_libs: Vec<String>,
    /// macOS frameworks.
    pub frameworks: Vec<String>,
    /// Preprocessor definitions.
    pub defines: Vec<String>,
    /// Pure C flags.
    pub cflags: Vec<String>,
    /// C++ compilation flags.
    pub cxxflags: Vec<String>,
    /// Shared-link flags.
    pub sharedlinkflags: Vec<String>,
    /// Exe-link flags.
    pub exelinkflags: Vec<String>,
    /// Build modules exported to consumers.
    pub build_modules: Vec<Utf8PathBuf>,
    /// When true (the default), path lists only expose directories that exist.
    /// Editable packages keep empty dirs visible.
    pub filter_empty: bool,
    /// Named components. Mutually exclusive with top-level `libs`.
    pub components: IndexMap<String, Component>,
    /// Additive per-build-type overlays (`release`, `debug`, ...).
    pub configs: IndexMap<String, CppInfo>,
}

impl CppInfo {
    /// Creates metadata rooted at the installed package folder.
    pub fn new(rootpath: impl Into<Utf8PathBuf>) -> Self {
        Self {
            name: None,
            names: IndexMap::new(),
            version: None,
            description: None,
            rootpath: rootpath.into(),
            sysroot: None,
            includedirs: vec![DEFAULT_INCLUDE.into()],
            srcdirs: Vec::new(),
            libdirs: vec![DEFAULT_LIB.into()],
            resdirs: vec![DEFAULT_RES.into()],
            bindirs: vec![DEFAULT_BIN.into()],
            builddirs: vec![DEFAULT_BUILD.into()],
            frameworkdirs: vec![DEFAULT_FRAMEWORK.into()],
            libs: Vec::new(),
            system_libs: Vec::new(),
            frameworks: Vec::new(),
            defines: Vec::new(),
            cflags: Vec::new(),
            cxxflags: Vec::new(),
            sharedlinkflags: Vec::new(),
            exelinkflags: Vec::new(),
            build_modules: Vec::new(),
            filter_empty: true,
            components: IndexMap::new(),
            configs: IndexMap::new(),
        }
    }

    /// The name a generator should use for this package.
    pub fn get_name(&self, generator: &str) -> Option<&str> {
        self.names
            .get(generator)
            .or(self.name.as_ref())
            .map(|s| s.as_str())
    }

    /// The component with the given name, created on first use.
    pub fn component_mut(&mut self, name: &str) -> &mut Component {
        self.components.entry(name.to_string()).or_default()
    }

    /// The config overlay with the given name, created on first use with the
    /// same rootpath and defaults.
    pub fn config_mut(&mut self, name: &str) -> &mut CppInfo {
        let rootpath = self.rootpath.clone();
        self.configs
            .entry(name.to_string())
            .or_insert_with(|| CppInfo::new(rootpath))
    }

    /// The config overlay with the given name, if declared.
    pub fn config(&self, name: &str) -> Option<&CppInfo> {
        self.configs.get(name)
    }

    /// Checks the declared metadata for contradictions: top-level libs
    /// together with components, or component requirements that are missing or
    /// cyclic.
    pub fn validate(&self) -> Result<(), Error> {
        if !self.components.is_empty() {
            if !self.libs.is_empty() {
                return Err(Error::BuildInfoError(
                    "self.libs cannot be used with components".to_string(),
                ));
            }
            self.sorted_components()?;
        }
        for config in self.configs.values() {
            config.validate()?;
        }
        Ok(())
    }

    /// Component names ordered for linking: every component appears before the
    /// components it requires. Stable for independent components (declaration
    /// order), and the basis of [`DepCppInfo::libs`].
    pub(crate) fn sorted_components(&self) -> Result<Vec<&str>, Error> {
        for (comp_name, component) in &self.components {
            for required in &component.requires {
                if !self.components.contains_key(required) {
                    return Err(Error::ComponentMissingDep {
                        component: comp_name.clone(),
                        requires: required.clone(),
                    });
                }
            }
        }

        // Kahn's algorithm over the requirement edges. A component is ready
        // once every component requiring it has been emitted, which yields
        // dependents-before-dependencies, i.e. link order. petgraph's stock
        // toposort does not keep declaration order for unrelated components,
        // so the loop scans the insertion-ordered map instead.
        let mut incoming: IndexMap<&str, usize> =
            self.components.keys().map(|name| (name.as_str(), 0)).collect();
        for component in self.components.values() {
            for required in &component.requires {
                if let Some(count) = incoming.get_mut(required.as_str()) {
                    *count += 1;
                }
            }
        }
        let mut ordered = Vec::with_capacity(incoming.len());
        while !incoming.is_empty() {
            let ready = incoming
                .iter()
                .find(|(_, &count)| count == 0)
                .map(|(&name, _)| name);
            match ready {
                Some(name) => {
                    incoming.shift_remove(name);
                    for required in &self.components[name].requires {
                        if let Some(count) = incoming.get_mut(required.as_str()) {
                            *count -= 1;
                        }
                    }
                    ordered.push(name);
                }
                None => {
                    return Err(Error::ComponentsCycle {
                        components: incoming.keys().map(|name| name.to_string()).collect(),
                    })
                }
            }
        }
        Ok(ordered)
    }
}

fn filter_paths(
    rootpath: &Utf8Path,
    dirs: &[Utf8PathBuf],
    filter_empty: bool,
) -> Vec<Utf8PathBuf> {
    let absolute = dirs.iter().map(|dir| {
        if dir.is_absolute() {
            dir.clone()
        } else {
            rootpath.join(dir)
        }
    });
    if filter_empty {
        absolute
            .filter(|path| path.as_std_path().is_dir())
            .collect()
    } else {
        absolute.collect()
    }
}

macro_rules! aggregated_values {
    ($method:ident) => {
        /// Top-level values followed by every component's, in declaration
        /// order.
        pub fn $method(&self) -> &[String] {
            self.$method
                .get_or_init(|| {
                    let mut values = self.cpp_info.$method.clone();
                    for component in self.cpp_info.components.values() {
                        values.extend(component.$method.iter().cloned());
                    }
                    values
                })
                .as_slice()
        }
    };
}

macro_rules! aggregated_paths {
    ($method:ident, $field:ident) => {
        /// Absolute, existence-filtered paths of the top level followed by
        /// every component's, in declaration order.
        pub fn $method(&self) -> &[Utf8PathBuf] {
            self.$method
                .get_or_init(|| {
                    let cpp_info = self.cpp_info;
                    let mut paths = filter_paths(
                        &cpp_info.rootpath,
                        &cpp_info.$field,
                        cpp_info.filter_empty,
                    );
                    for component in cpp_info.components.values() {
                        paths.extend(filter_paths(
                            &cpp_info.rootpath,
                            &component.$field,
                            cpp_info.filter_empty,
                        ));
                    }
                    paths
                })
                .as_slice()
        }
    };
}

/// One package's metadata aggregated across its components.
///
/// Aggregates are memoized on first access; the underlying metadata is frozen
/// once the package is installed.
pub struct DepCppInfo<'a> {
    cpp_info: &'a CppInfo,
    libs: OnceCell<Vec<String>>,
    system_libs: OnceCell<Vec<String>>,
    frameworks: OnceCell<Vec<String>>,
    defines: OnceCell<Vec<String>>,
    cflags: OnceCell<Vec<String>>,
    cxxflags: OnceCell<Vec<String>>,
    sharedlinkflags: OnceCell<Vec<String>>,
    exelinkflags: OnceCell<Vec<String>>,
    include_paths: OnceCell<Vec<Utf8PathBuf>>,
    src_paths: OnceCell<Vec<Utf8PathBuf>>,
    lib_paths: OnceCell<Vec<Utf8PathBuf>>,
    res_paths: OnceCell<Vec<Utf8PathBuf>>,
    bin_paths: OnceCell<Vec<Utf8PathBuf>>,
    build_paths: OnceCell<Vec<Utf8PathBuf>>,
    framework_paths: OnceCell<Vec<Utf8PathBuf>>,
    build_modules_paths: OnceCell<Vec<Utf8PathBuf>>,
}

impl<'a> DepCppInfo<'a> {
    /// Wraps a package's declared metadata.
    pub fn new(cpp_info: &'a CppInfo) -> Self {
        Self {
            cpp_info,
            libs: OnceCell::new(),
            system_libs: OnceCell::new(),
            frameworks: OnceCell::new(),
            defines: OnceCell::new(),
            cflags: OnceCell::new(),
            cxxflags: OnceCell::new(),
            sharedlinkflags: OnceCell::new(),
            exelinkflags: OnceCell::new(),
            include_paths: OnceCell::new(),
            src_paths: OnceCell::new(),
            lib_paths: OnceCell::new(),
            res_paths: OnceCell::new(),
            bin_paths: OnceCell::new(),
            build_paths: OnceCell::new(),
            framework_paths: OnceCell::new(),
            build_modules_paths: OnceCell::new(),
        }
    }

    /// The underlying metadata.
    pub fn cpp_info(&self) -> &'a CppInfo {
        self.cpp_info
    }

    /// The package root.
    pub fn rootpath(&self) -> &Utf8Path {
        &self.cpp_info.rootpath
    }

    /// The name a generator should use for this package.
    pub fn get_name(&self, generator: &str) -> Option<&str> {
        self.cpp_info.get_name(generator)
    }

    /// The libs to link, with component libs in link order: a component's
    /// libs always precede the libs of the components it requires.
    pub fn libs(&self) -> Result<&[String], Error> {
        self.libs
            .get_or_try_init(|| {
                let mut values = self.cpp_info.libs.clone();
                if !self.cpp_info.components.is_empty() {
                    for comp_name in self.cpp_info.sorted_components()? {
                        values.extend(self.cpp_info.components[comp_name].libs.iter().cloned());
                    }
                }
                Ok(values)
            })
            .map(|values| values.as_slice())
    }

    aggregated_values!(system_libs);
    aggregated_values!(frameworks);
    aggregated_values!(defines);
    aggregated_values!(cflags);
    aggregated_values!(cxxflags);
    aggregated_values!(sharedlinkflags);
    aggregated_values!(exelinkflags);

    aggregated_paths!(include_paths, includedirs);
    aggregated_paths!(src_paths, srcdirs);
    aggregated_paths!(lib_paths, libdirs);
    aggregated_paths!(res_paths, resdirs);
    aggregated_paths!(bin_paths, bindirs);
    aggregated_paths!(build_paths, builddirs);
    aggregated_paths!(framework_paths, frameworkdirs);

    /// Absolute paths of the exported build modules, unfiltered.
    pub fn build_modules_paths(&self) -> &[Utf8PathBuf] {
        self.build_modules_paths
            .get_or_init(|| {
                self.cpp_info
                    .build_modules
                    .iter()
                    .map(|path| {
                        if path.is_absolute() {
                            path.clone()
                        } else {
                            self.cpp_info.rootpath.join(path)
                        }
                    })
                    .collect()
            })
            .as_slice()
    }

    /// The declared config overlays.
    pub fn configs(&self) -> &IndexMap<String, CppInfo> {
        &self.cpp_info.configs
    }
}

/// `merge_lists` keeps the right-hand side authoritative: elements of `first`
/// already present in `second` are dropped, then `second` is appended whole.
fn merge_lists<T: Clone + PartialEq>(first: &[T], second: &[T]) -> Vec<T> {
    let mut merged: Vec<T> = first
        .iter()
        .filter(|item| !second.contains(*item))
        .cloned()
        .collect();
    merged.extend(second.iter().cloned());
    merged
}

/// The build metadata of a whole dependency set, aggregated in declaration
/// order for a consumer.
///
/// Directory lists grow in dependency order; defines and flags aggregate in
/// reverse so the consumer's own values stay last-defined.
#[derive(Debug, Default)]
pub struct DepsCppInfo {
    /// First sysroot declared by any dependency.
    pub sysroot: Option<String>,
    /// Aggregated absolute include paths.
    pub includedirs: Vec<Utf8PathBuf>,
    /// Aggregated absolute source paths.
    pub srcdirs: Vec<Utf8PathBuf>,
    /// Aggregated absolute library paths.
    pub libdirs: Vec<Utf8PathBuf>,
    /// Aggregated absolute resource paths.
    pub resdirs: Vec<Utf8PathBuf>,
    /// Aggregated absolute binary paths.
    pub bindirs: Vec<Utf8PathBuf>,
    /// Aggregated absolute build-helper paths.
    pub builddirs: Vec<Utf8PathBuf>,
    /// Aggregated absolute framework paths.
    pub frameworkdirs: Vec<Utf8PathBuf>,
    /// Aggregated libs, dependency-ordered.
    pub libs: Vec<String>,
    /// Aggregated system libs.
    pub system_libs: Vec<String>,
    /// Aggregated frameworks.
    pub frameworks: Vec<String>,
    /// Aggregated defines, reverse-ordered.
    pub defines: Vec<String>,
    /// Aggregated C flags, reverse-ordered.
    pub cflags: Vec<String>,
    /// Aggregated C++ flags, reverse-ordered.
    pub cxxflags: Vec<String>,
    /// Aggregated shared-link flags, reverse-ordered.
    pub sharedlinkflags: Vec<String>,
    /// Aggregated exe-link flags, reverse-ordered.
    pub exelinkflags: Vec<String>,
    /// Aggregated build module paths.
    pub build_modules: Vec<Utf8PathBuf>,
    /// Package roots, in aggregation order.
    pub rootpaths: Vec<Utf8PathBuf>,
    dependencies: IndexMap<String, CppInfo>,
    configs: IndexMap<String, DepsCppInfo>,
}

impl DepsCppInfo {
    /// Folds one dependency's metadata into the aggregate.
    pub fn update(&mut self, cpp_info: &CppInfo, pkg_name: &str) -> Result<(), Error> {
        let dep = DepCppInfo::new(cpp_info);

        self.system_libs = merge_lists(&self.system_libs, dep.system_libs());
        self.includedirs = merge_lists(&self.includedirs, dep.include_paths());
        self.srcdirs = merge_lists(&self.srcdirs, dep.src_paths());
        self.libdirs = merge_lists(&self.libdirs, dep.lib_paths());
        self.bindirs = merge_lists(&self.bindirs, dep.bin_paths());
        self.resdirs = merge_lists(&self.resdirs, dep.res_paths());
        self.builddirs = merge_lists(&self.builddirs, dep.build_paths());
        self.frameworkdirs = merge_lists(&self.frameworkdirs, dep.framework_paths());
        self.libs = merge_lists(&self.libs, dep.libs()?);
        self.frameworks = merge_lists(&self.frameworks, dep.frameworks());
        self.rootpaths.push(cpp_info.rootpath.clone());

        // Reverse order: the consumer's own values must win.
        self.defines = merge_lists(dep.defines(), &self.defines);
        self.cflags = merge_lists(dep.cflags(), &self.cflags);
        self.cxxflags = merge_lists(dep.cxxflags(), &self.cxxflags);
        self.sharedlinkflags = merge_lists(dep.sharedlinkflags(), &self.sharedlinkflags);
        self.exelinkflags = merge_lists(dep.exelinkflags(), &self.exelinkflags);
        self.build_modules = merge_lists(&self.build_modules, dep.build_modules_paths());

        if self.sysroot.is_none() {
            self.sysroot = cpp_info.sysroot.clone();
        }

        for (config_name, config_info) in &cpp_info.configs {
            self.configs
                .entry(config_name.clone())
                .or_default()
                .update(config_info, pkg_name)?;
        }

        self.dependencies.insert(pkg_name.to_string(), cpp_info.clone());
        Ok(())
    }

    /// The aggregated packages in declaration order.
    pub fn dependencies(&self) -> impl Iterator<Item = (&str, DepCppInfo<'_>)> {
        self.dependencies
            .iter()
            .map(|(pkg_name, cpp_info)| (pkg_name.as_str(), DepCppInfo::new(cpp_info)))
    }

    /// One aggregated package by name.
    pub fn get(&self, pkg_name: &str) -> Option<DepCppInfo<'_>> {
        self.dependencies.get(pkg_name).map(DepCppInfo::new)
    }

    /// The aggregate for one config overlay, if any dependency declared it.
    pub fn config(&self, config_name: &str) -> Option<&DepsCppInfo> {
        self.configs.get(config_name)
    }

    /// The first aggregated package root.
    pub fn rootpath(&self) -> Option<&Utf8Path> {
        self.rootpaths.first().map(|p| p.as_path())
    }
}
