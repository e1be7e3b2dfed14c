// Copyright (c) The remora Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The recipe model: settings, options, requirements, and the hook table.
//!
//! Recipe loading and sandboxing live outside this crate. What the graph works
//! with is a [`Recipe`]: plain mutable state plus a fixed table of optional
//! callbacks ([`RecipeHooks`]) that the builder and analyzer invoke by name at
//! well-defined points of the traversal.

use crate::build_info::CppInfo;
use crate::errors::{Error, Warning};
use crate::info::PackageInfo;
use crate::reference::Reference;
use indexmap::IndexMap;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Option values of a single package, name to value.
pub type OptionValues = IndexMap<String, String>;

/// Option values grouped by package name, as they travel along graph edges.
pub type DepsOptionValues = IndexMap<String, OptionValues>;

/// Configuration axes shared by every package of a build (os, compiler, ...).
///
/// A definition table constrains the accepted values; an empty table accepts
/// anything, which is what most tests use.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Settings {
    definitions: IndexMap<String, Vec<String>>,
    values: IndexMap<String, String>,
}

impl Settings {
    /// Creates settings constrained by the given definition table. Map a name
    /// to an empty list to accept any value for it.
    pub fn new(definitions: IndexMap<String, Vec<String>>) -> Self {
        Self {
            definitions,
            values: IndexMap::new(),
        }
    }

    /// Adds a definition. An empty `allowed` list accepts any value.
    pub fn define(&mut self, name: impl Into<String>, allowed: Vec<String>) {
        self.definitions.insert(name.into(), allowed);
    }

    /// Sets a value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }

    /// Returns the value for a setting, if set.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(|v| v.as_str())
    }

    /// Removes a setting. Recipes narrow their settings this way in
    /// `package_id` (a header-only package typically clears all of them).
    pub fn remove(&mut self, name: &str) {
        self.values.shift_remove(name);
    }

    /// Checks every value against the definition table.
    pub fn validate(&self) -> Result<(), String> {
        if self.definitions.is_empty() {
            return Ok(());
        }
        for (name, value) in &self.values {
            match self.definitions.get(name) {
                None => return Err(format!("setting '{}' is not defined", name)),
                Some(allowed) if !allowed.is_empty() && !allowed.contains(value) => {
                    return Err(format!(
                        "invalid setting '{}={}', possible values are [{}]",
                        name,
                        value,
                        allowed.join(", ")
                    ));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    /// All values, in insertion order.
    pub fn values(&self) -> &IndexMap<String, String> {
        &self.values
    }
}

/// Per-recipe option values, plus the option values this package wants for its
/// dependencies.
///
/// During graph construction options flow in both directions: a downstream
/// consumer overrides the options of everything upstream of it
/// ([`propagate_upstream`](Self::propagate_upstream)), and at package-id time
/// each node records the final option values of its direct dependencies
/// ([`record_downstream`](Self::record_downstream)).
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Options {
    definitions: IndexMap<String, Vec<String>>,
    values: OptionValues,
    deps_values: DepsOptionValues,
    frozen: bool,
}

impl Options {
    /// Creates options constrained by the given definition table.
    pub fn new(definitions: IndexMap<String, Vec<String>>) -> Self {
        Self {
            definitions,
            values: IndexMap::new(),
            deps_values: IndexMap::new(),
            frozen: false,
        }
    }

    /// Adds a definition. An empty `allowed` list accepts any value.
    pub fn define(&mut self, name: impl Into<String>, allowed: Vec<String>) {
        self.definitions.insert(name.into(), allowed);
    }

    /// Sets one of this package's own option values.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        debug_assert!(!self.frozen, "options changed after freeze");
        self.values.insert(name.into(), value.into());
    }

    /// Returns one of this package's own option values.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(|v| v.as_str())
    }

    /// Removes an option, for `package_id` narrowing.
    pub fn remove(&mut self, name: &str) {
        self.values.shift_remove(name);
    }

    /// Declares a value this package wants for one of its dependencies.
    pub fn set_for(
        &mut self,
        package: impl Into<String>,
        name: impl Into<String>,
        value: impl Into<String>,
    ) {
        debug_assert!(!self.frozen, "options changed after freeze");
        self.deps_values
            .entry(package.into())
            .or_default()
            .insert(name.into(), value.into());
    }

    /// Applies option values arriving from downstream. Values addressed to
    /// `own_name` override this package's own options; everything else merges
    /// into the per-dependency values with downstream priority, to be carried
    /// further upstream.
    pub fn propagate_upstream(&mut self, down: &DepsOptionValues, own_name: &str) {
        for (package, values) in down {
            if package == own_name {
                for (name, value) in values {
                    self.values.insert(name.clone(), value.clone());
                }
            } else {
                let entry = self.deps_values.entry(package.clone()).or_default();
                for (name, value) in values {
                    entry.insert(name.clone(), value.clone());
                }
            }
        }
    }

    /// Records the final option values of a direct dependency, for reverse
    /// visibility in the package descriptor.
    pub fn record_downstream(&mut self, package: &str, values: &OptionValues) {
        let entry = self.deps_values.entry(package.to_string()).or_default();
        for (name, value) in values {
            entry.insert(name.clone(), value.clone());
        }
    }

    /// The option values this package imposes on its dependencies, as they
    /// propagate upstream.
    pub fn deps_package_values(&self) -> DepsOptionValues {
        self.deps_values.clone()
    }

    /// Drops per-dependency values for packages that are not among the node's
    /// resolved requirements.
    pub fn clear_unused(&mut self, used: &HashSet<&str>) {
        self.deps_values.retain(|package, _| used.contains(package.as_str()));
    }

    /// Freezes the options. Mutation after this point is a programming error.
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    /// Checks every own value against the definition table.
    pub fn validate(&self) -> Result<(), String> {
        if self.definitions.is_empty() {
            return Ok(());
        }
        for (name, value) in &self.values {
            match self.definitions.get(name) {
                None => return Err(format!("option '{}' is not defined", name)),
                Some(allowed) if !allowed.is_empty() && !allowed.contains(value) => {
                    return Err(format!(
                        "invalid option '{}={}', possible values are [{}]",
                        name,
                        value,
                        allowed.join(", ")
                    ));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    /// This package's own option values, in insertion order.
    pub fn values(&self) -> &OptionValues {
        &self.values
    }

    /// Own values plus per-dependency values, rendered as `name=value` and
    /// `package:name=value` pairs.
    pub fn full_values(&self) -> Vec<(String, String)> {
        let mut out: Vec<(String, String)> = self
            .values
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        for (package, values) in &self.deps_values {
            for (name, value) in values {
                out.push((format!("{}:{}", package, name), value.clone()));
            }
        }
        out
    }
}

/// One declared requirement of a recipe.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Requirement {
    /// The required reference. May carry a version range until resolved.
    pub reference: Reference,
    /// Private requirements do not leak their subgraph into the dependent's
    /// public namespace.
    pub private: bool,
    /// Override requirements contribute version decisions downstream but do
    /// not instantiate a node.
    pub override_: bool,
}

/// The ordered requirement set of a recipe, keyed by package name.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Requirements {
    map: IndexMap<String, Requirement>,
}

impl Requirements {
    /// Adds a plain or private requirement.
    pub fn add(&mut self, reference: Reference, private: bool) {
        self.map.insert(
            reference.name.clone(),
            Requirement {
                reference,
                private,
                override_: false,
            },
        );
    }

    /// Adds an override requirement.
    pub fn add_override(&mut self, reference: Reference) {
        self.map.insert(
            reference.name.clone(),
            Requirement {
                reference,
                private: false,
                override_: true,
            },
        );
    }

    /// Returns the requirement on the given package, if declared.
    pub fn get(&self, name: &str) -> Option<&Requirement> {
        self.map.get(name)
    }

    /// Mutable access to the requirement on the given package.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut Requirement> {
        self.map.get_mut(name)
    }

    /// The requirements in declaration order.
    pub fn values(&self) -> impl Iterator<Item = &Requirement> {
        self.map.values()
    }

    /// Mutable iteration in declaration order.
    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut Requirement> {
        self.map.values_mut()
    }

    /// Number of declared requirements.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns true if no requirements are declared.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Applies downstream requirement decisions to this set and returns the
    /// union to be carried further upstream.
    ///
    /// A downstream entry with the same package name but a different reference
    /// overrides the declared one (downstream wins); the override is reported
    /// as a warning, not an error.
    pub fn update(
        &mut self,
        down: &Requirements,
        own_display: &str,
        warnings: &mut Vec<Warning>,
    ) -> Requirements {
        for (name, own) in self.map.iter_mut() {
            if let Some(imposed) = down.map.get(name) {
                if imposed.reference != own.reference {
                    warnings.push(Warning::RequirementOverridden {
                        node: own_display.to_string(),
                        declared: own.reference.to_string(),
                        overridden_to: imposed.reference.to_string(),
                    });
                    own.reference = imposed.reference.clone();
                }
            }
        }
        let mut union = self.clone();
        for (name, imposed) in &down.map {
            if !union.map.contains_key(name) {
                union.map.insert(name.clone(), imposed.clone());
            }
        }
        union
    }

    /// Renders the requirement references, for error messages.
    pub fn display_list(&self) -> Vec<String> {
        self.map
            .values()
            .map(|r| r.reference.to_string())
            .collect()
    }
}

/// The recipe build policy, honored by the build mode.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BuildPolicy {
    /// Always build from sources, never reuse a binary.
    Always,
    /// Build from sources whenever no binary is available.
    Missing,
}

/// The mutable state of a loaded recipe instance.
#[derive(Clone, Debug)]
pub struct RecipeState {
    /// Display name for messages, usually `name/version`.
    pub display_name: String,
    /// The recipe's settings.
    pub settings: Settings,
    /// The recipe's options.
    pub options: Options,
    /// The declared requirements. Rewritten during graph construction.
    pub requires: Requirements,
    /// Build metadata declared for consumers.
    pub cpp_info: CppInfo,
    /// The computed package descriptor. Filled by the binary analyzer.
    pub info: Option<PackageInfo>,
    /// The recipe build policy, if declared.
    pub build_policy: Option<BuildPolicy>,
    /// Set when the recipe is an alias forwarding to another reference.
    pub alias: Option<Reference>,
    pub(crate) original_requires: Option<Requirements>,
    pub(crate) evaluated_requires: Option<Requirements>,
}

impl RecipeState {
    /// Creates an empty state with the given display name.
    pub fn new(display_name: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            settings: Settings::default(),
            options: Options::default(),
            requires: Requirements::default(),
            cpp_info: CppInfo::new(""),
            info: None,
            build_policy: None,
            alias: None,
            original_requires: None,
            evaluated_requires: None,
        }
    }
}

/// Identifies one of the recipe hooks.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HookKind {
    /// Adjust the option definition table before values are applied.
    ConfigOptions,
    /// Adjust settings and options after downstream values are applied.
    Configure,
    /// Compute the requirement set.
    Requirements,
    /// Narrow the package descriptor before the id is derived.
    PackageId,
}

impl HookKind {
    /// The hook name as it appears in error messages.
    pub fn name(self) -> &'static str {
        match self {
            HookKind::ConfigOptions => "config_options",
            HookKind::Configure => "configure",
            HookKind::Requirements => "requirements",
            HookKind::PackageId => "package_id",
        }
    }
}

/// A recipe callback. Failures surface as [`Error::UserRecipeError`] carrying
/// the recipe's display name.
pub type HookFn = dyn Fn(&mut RecipeState) -> Result<(), String> + Send + Sync;

/// The fixed table of optional recipe callbacks.
#[derive(Default)]
pub struct RecipeHooks {
    /// See [`HookKind::ConfigOptions`].
    pub config_options: Option<Box<HookFn>>,
    /// See [`HookKind::Configure`].
    pub configure: Option<Box<HookFn>>,
    /// See [`HookKind::Requirements`].
    pub requirements: Option<Box<HookFn>>,
    /// See [`HookKind::PackageId`].
    pub package_id: Option<Box<HookFn>>,
}

impl RecipeHooks {
    fn get(&self, kind: HookKind) -> Option<&HookFn> {
        match kind {
            HookKind::ConfigOptions => self.config_options.as_deref(),
            HookKind::Configure => self.configure.as_deref(),
            HookKind::Requirements => self.requirements.as_deref(),
            HookKind::PackageId => self.package_id.as_deref(),
        }
    }
}

/// A loaded recipe instance: state plus hooks.
pub struct Recipe {
    /// The mutable recipe state.
    pub state: RecipeState,
    hooks: Arc<RecipeHooks>,
}

impl Recipe {
    /// Creates a recipe from state and a hook table.
    pub fn new(state: RecipeState, hooks: RecipeHooks) -> Self {
        Self {
            state,
            hooks: Arc::new(hooks),
        }
    }

    /// The recipe's display name.
    pub fn display_name(&self) -> &str {
        &self.state.display_name
    }

    /// Invokes the given hook if the recipe defines it.
    pub fn run_hook(&mut self, kind: HookKind) -> Result<(), Error> {
        let hooks = Arc::clone(&self.hooks);
        match hooks.get(kind) {
            Some(hook) => hook(&mut self.state).map_err(|message| Error::UserRecipeError {
                recipe: self.state.display_name.clone(),
                hook: kind.name(),
                message,
            }),
            None => Ok(()),
        }
    }
}

impl Clone for Recipe {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            hooks: Arc::clone(&self.hooks),
        }
    }
}

impl fmt::Debug for Recipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Recipe")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
