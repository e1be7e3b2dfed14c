// Copyright (c) The remora Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::build_info::{CppInfo, DepCppInfo, DepsCppInfo};
use crate::errors::Error;
use crate::generator::{Generator, JsonGenerator};
use camino::Utf8PathBuf;
use pretty_assertions::assert_eq;

fn unfiltered(rootpath: &str) -> CppInfo {
    let mut cpp_info = CppInfo::new(rootpath);
    cpp_info.filter_empty = false;
    cpp_info
}

#[test]
fn components_are_created_on_access() {
    let mut cpp_info = CppInfo::new("root_folder");
    cpp_info.component_mut("liba").name = Some("LIBA".to_string());
    cpp_info
        .component_mut("libb")
        .includedirs
        .push("includewhat".into());
    cpp_info.component_mut("libc").libs.push("thelibc".to_string());

    assert_eq!(
        cpp_info.components.keys().map(|k| k.as_str()).collect::<Vec<_>>(),
        vec!["liba", "libb", "libc"]
    );
    assert_eq!(cpp_info.components["liba"].name.as_deref(), Some("LIBA"));
    assert_eq!(
        cpp_info.components["libb"].includedirs,
        vec![Utf8PathBuf::from("include"), Utf8PathBuf::from("includewhat")]
    );
    assert_eq!(cpp_info.components["libc"].libs, vec!["thelibc".to_string()]);
}

#[test]
fn libs_and_components_are_mutually_exclusive() {
    let mut cpp_info = CppInfo::new("root_folder");
    cpp_info.libs.push("toplevel".to_string());
    cpp_info.component_mut("liba").libs.push("liba".to_string());

    let err = cpp_info.validate().expect_err("must be rejected");
    assert!(
        matches!(err, Error::BuildInfoError(_)),
        "expected BuildInfoError, got {}",
        err
    );
}

#[test]
fn aggregated_libs_keep_declaration_order() {
    let mut deps = DepsCppInfo::default();

    let mut dep1 = unfiltered("root");
    dep1.component_mut("liba").libs.push("liba".to_string());
    dep1.component_mut("libb").libs.push("libb".to_string());
    deps.update(&dep1, "dep1").unwrap();

    let mut dep2 = unfiltered("root");
    dep2.component_mut("libc").libs.push("libc".to_string());
    dep2.component_mut("libd").libs.push("libd".to_string());
    deps.update(&dep2, "dep2").unwrap();

    let mut dep3 = unfiltered("root");
    dep3.libs.push("libdep3".to_string());
    deps.update(&dep3, "dep3").unwrap();

    assert_eq!(deps.get("dep1").unwrap().libs().unwrap(), ["liba", "libb"]);
    assert_eq!(deps.get("dep2").unwrap().libs().unwrap(), ["libc", "libd"]);
    assert_eq!(deps.get("dep3").unwrap().libs().unwrap(), ["libdep3"]);
    assert_eq!(deps.libs, vec!["liba", "libb", "libc", "libd", "libdep3"]);
}

/// Every lib must appear before the libs of the components it requires.
fn assert_link_order(cpp_info: &CppInfo, sorted_libs: &[String]) {
    assert!(!sorted_libs.is_empty(), "sorted libs must not be empty");
    let owner = |lib: &str| {
        cpp_info
            .components
            .iter()
            .find(|(_, c)| c.libs.iter().any(|l| l == lib))
            .map(|(name, _)| name.as_str())
            .expect("every lib has an owning component")
    };
    for (position, lib) in sorted_libs.iter().enumerate() {
        for required in &cpp_info.components[owner(lib)].requires {
            for required_lib in &cpp_info.components[required.as_str()].libs {
                let required_position = sorted_libs
                    .iter()
                    .position(|l| l == required_lib)
                    .expect("required lib present");
                assert!(
                    required_position > position,
                    "{} must link before {}",
                    lib,
                    required_lib
                );
            }
        }
    }
}

#[test]
fn component_link_order_simple() {
    let mut cpp_info = unfiltered("root");
    for (component, requires) in [
        ("F", vec!["D", "E"]),
        ("E", vec!["B"]),
        ("D", vec!["A"]),
        ("C", vec!["A"]),
        ("A", vec!["B"]),
        ("B", vec![]),
    ] {
        let entry = cpp_info.component_mut(component);
        entry.libs.push(format!("lib{}", component.to_lowercase()));
        entry.requires = requires.into_iter().map(String::from).collect();
    }
    let dep = DepCppInfo::new(&cpp_info);
    let libs = dep.libs().unwrap().to_vec();
    assert_eq!(libs.len(), 6);
    assert_link_order(&cpp_info, &libs);
}

#[test]
fn component_link_order_deep() {
    let mut cpp_info = unfiltered("root");
    for (component, requires) in [
        ("K", vec!["G", "H"]),
        ("J", vec!["F"]),
        ("G", vec!["F"]),
        ("H", vec!["F", "E"]),
        ("L", vec!["I"]),
        ("F", vec!["C", "D"]),
        ("I", vec!["E"]),
        ("C", vec!["A"]),
        ("D", vec!["A"]),
        ("E", vec!["A", "B"]),
        ("A", vec![]),
        ("B", vec![]),
    ] {
        let entry = cpp_info.component_mut(component);
        entry.libs.push(format!("lib{}", component.to_lowercase()));
        entry.requires = requires.into_iter().map(String::from).collect();
    }
    let dep = DepCppInfo::new(&cpp_info);
    let libs = dep.libs().unwrap().to_vec();
    assert_eq!(libs.len(), 12);
    assert_link_order(&cpp_info, &libs);
}

#[test]
fn component_requires_must_exist() {
    let mut cpp_info = unfiltered("root");
    let lib1 = cpp_info.component_mut("LIB1");
    lib1.libs.push("lib1".to_string());
    lib1.requires = vec!["LIB2".to_string()];

    let err = DepCppInfo::new(&cpp_info)
        .libs()
        .expect_err("missing component must be rejected");
    match err {
        Error::ComponentMissingDep {
            component,
            requires,
        } => {
            assert_eq!(component, "LIB1");
            assert_eq!(requires, "LIB2");
        }
        other => panic!("expected ComponentMissingDep, got {}", other),
    }
}

#[test]
fn component_cycles_are_rejected() {
    // Direct self-requirement.
    let mut cpp_info = unfiltered("root");
    cpp_info.component_mut("LIB1").requires = vec!["LIB1".to_string()];
    assert!(matches!(
        DepCppInfo::new(&cpp_info).libs(),
        Err(Error::ComponentsCycle { .. })
    ));

    // Three-component loop.
    let mut cpp_info = unfiltered("root");
    cpp_info.component_mut("LIB1").requires = vec!["LIB2".to_string()];
    cpp_info.component_mut("LIB2").requires = vec!["LIB3".to_string()];
    cpp_info.component_mut("LIB3").requires = vec!["LIB1".to_string()];
    match DepCppInfo::new(&cpp_info).libs() {
        Err(Error::ComponentsCycle { components }) => {
            assert_eq!(components.len(), 3);
        }
        Err(other) => panic!("expected ComponentsCycle, got {}", other),
        Ok(_) => panic!("cycle must be rejected"),
    }
}

#[test]
fn paths_are_rooted_and_aggregated() {
    let mut cpp_info = unfiltered("/pkg");
    cpp_info.includedirs = vec!["include".into()];
    let liba = cpp_info.component_mut("liba");
    liba.includedirs = vec!["includea".into()];
    let libb = cpp_info.component_mut("libb");
    libb.includedirs = vec!["includeb".into()];

    let dep = DepCppInfo::new(&cpp_info);
    assert_eq!(
        dep.include_paths(),
        [
            Utf8PathBuf::from("/pkg/include"),
            Utf8PathBuf::from("/pkg/includea"),
            Utf8PathBuf::from("/pkg/includeb"),
        ]
    );
}

#[test]
fn empty_directories_are_filtered_when_enabled() {
    let base = std::env::temp_dir().join(format!("remora-paths-{}", std::process::id()));
    std::fs::create_dir_all(base.join("include")).expect("temp dir should be writable");
    let root = Utf8PathBuf::from_path_buf(base).expect("temp dir should be utf-8");

    let mut cpp_info = CppInfo::new(root.clone());
    cpp_info.includedirs = vec!["include".into(), "does-not-exist".into()];

    let dep = DepCppInfo::new(&cpp_info);
    assert_eq!(dep.include_paths(), [root.join("include")]);

    let mut unfiltered_info = CppInfo::new(root.clone());
    unfiltered_info.filter_empty = false;
    unfiltered_info.includedirs = vec!["include".into(), "does-not-exist".into()];
    let dep = DepCppInfo::new(&unfiltered_info);
    assert_eq!(
        dep.include_paths(),
        [root.join("include"), root.join("does-not-exist")]
    );
}

#[test]
fn defines_and_flags_aggregate_in_reverse() {
    let mut deps = DepsCppInfo::default();

    let mut dep1 = unfiltered("root1");
    dep1.defines.push("DEFINE_A".to_string());
    dep1.cxxflags.push("-fa".to_string());
    dep1.libs.push("liba".to_string());
    deps.update(&dep1, "dep1").unwrap();

    let mut dep2 = unfiltered("root2");
    dep2.defines.push("DEFINE_B".to_string());
    dep2.cxxflags.push("-fb".to_string());
    dep2.libs.push("libb".to_string());
    deps.update(&dep2, "dep2").unwrap();

    // Libraries keep dependency order; defines and flags are reversed so the
    // closest dependency wins.
    assert_eq!(deps.libs, vec!["liba", "libb"]);
    assert_eq!(deps.defines, vec!["DEFINE_B", "DEFINE_A"]);
    assert_eq!(deps.cxxflags, vec!["-fb", "-fa"]);
}

#[test]
fn config_overlays_aggregate_independently() {
    let mut deps = DepsCppInfo::default();

    let mut zlib = unfiltered("/zlib");
    zlib.libs.push("z".to_string());
    let debug = zlib.config_mut("debug");
    debug.filter_empty = false;
    debug.libs.push("zd".to_string());
    deps.update(&zlib, "zlib").unwrap();

    assert_eq!(deps.libs, vec!["z"]);
    let debug = deps.config("debug").expect("debug overlay should aggregate");
    assert_eq!(debug.libs, vec!["zd"]);
    assert!(deps.config("release").is_none());
}

#[test]
fn json_generator_renders_the_aggregate() {
    let mut deps = DepsCppInfo::default();
    let mut zlib = unfiltered("/zlib");
    zlib.version = Some("1.2.11".to_string());
    zlib.libs.push("z".to_string());
    zlib.defines.push("ZLIB_STATIC".to_string());
    deps.update(&zlib, "zlib").unwrap();

    let output = JsonGenerator.content(&deps).expect("generator should render");
    let value: serde_json::Value = serde_json::from_str(&output).expect("output should be JSON");
    assert_eq!(value["deps"]["libs"][0], "z");
    assert_eq!(value["dependencies"][0]["name"], "zlib");
    assert_eq!(value["dependencies"][0]["version"], "1.2.11");
    assert_eq!(value["dependencies"][0]["defines"][0], "ZLIB_STATIC");
    assert_eq!(
        value["dependencies"][0]["include_paths"][0],
        "/zlib/include"
    );
}
