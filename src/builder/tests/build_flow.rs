//! End-to-end flow over a working root: snapshot across instructions,
//! resolve stage names, analyze cross-stage dependencies, and persist the
//! intermediate stage tar.

use std::collections::HashMap;
use std::fs;

use lamina_builder::{
    resolve_stages, stage_dependencies, write_stage_tar, BuildArgs, BuildScript, ImageView,
    Instruction, LayeredMap, NoExternalImages, Snapshotter,
};
use lamina_core::BuildConfig;
use tempfile::TempDir;

fn entry_names(bytes: &[u8]) -> Vec<String> {
    let mut archive = tar::Archive::new(bytes);
    archive
        .entries()
        .unwrap()
        .map(|e| {
            e.unwrap()
                .path()
                .unwrap()
                .to_string_lossy()
                .trim_end_matches('/')
                .to_string()
        })
        .collect()
}

#[test]
fn snapshot_lifecycle_over_mutating_instructions() {
    let root = TempDir::new().unwrap();
    fs::create_dir_all(root.path().join("out/bin")).unwrap();
    fs::write(root.path().join("out/bin/app"), "binary").unwrap();

    let mut snapshotter = Snapshotter::new(root.path(), LayeredMap::with_default_hashers());

    // Initial layer captures the whole tree.
    let mut layer0 = Vec::new();
    let report = snapshotter.take_full_snapshot(&mut layer0).unwrap();
    assert_eq!(report.files_added, 3);
    assert_eq!(
        entry_names(&layer0),
        vec!["out", "out/bin", "out/bin/app"]
    );

    // An instruction drops a scratch file; the next snapshot captures it.
    fs::write(root.path().join("scratchpad"), "tmp").unwrap();
    let mut layer1 = Vec::new();
    let report = snapshotter.take_full_snapshot(&mut layer1).unwrap();
    assert_eq!(report.files_added, 1);

    // The file is removed again; only a whiteout is emitted.
    fs::remove_file(root.path().join("scratchpad")).unwrap();
    let mut layer2 = Vec::new();
    let report = snapshotter.take_full_snapshot(&mut layer2).unwrap();
    assert_eq!(report.files_added, 0);
    assert_eq!(report.whiteouts, 1);
    assert_eq!(entry_names(&layer2), vec![".wh.scratchpad"]);

    // Nothing changed since: the next layer is empty.
    let mut layer3 = Vec::new();
    let report = snapshotter.take_full_snapshot(&mut layer3).unwrap();
    assert!(report.is_empty());
    assert!(entry_names(&layer3).is_empty());
}

#[test]
fn stage_handoff_resolves_and_persists_dependencies() {
    let root = TempDir::new().unwrap();
    fs::create_dir_all(root.path().join("out/bin")).unwrap();
    fs::write(root.path().join("out/bin/a"), "a").unwrap();
    fs::write(root.path().join("out/bin/b"), "b").unwrap();

    let mut script = BuildScript::parse(
        "FROM golang:1.21 AS builder\n\
         RUN make\n\
         FROM builder\n\
         ENV OUT=/out\n\
         COPY --from=builder $OUT/bin/* /usr/local/bin/\n",
    )
    .unwrap();

    // Symbolic references become indices before execution begins.
    resolve_stages(&mut script.stages);
    let copy = script.stages[1]
        .instructions
        .iter()
        .find_map(|i| match i {
            Instruction::Copy { from: Some(f), .. } => Some(f.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(copy, "0");

    // The analyzer expands the wildcard against the builder's rootfs.
    let mut build_args = BuildArgs::new(HashMap::new());
    let deps = stage_dependencies(
        0,
        &script.stages,
        &ImageView::empty(),
        &mut build_args,
        &NoExternalImages,
        root.path(),
    )
    .unwrap();
    assert_eq!(
        deps,
        vec![root.path().join("out/bin/a"), root.path().join("out/bin/b")]
    );

    // The dependency paths are persisted under the intermediate layout.
    let intermediate = TempDir::new().unwrap();
    let mut config = BuildConfig::new(root.path());
    config.intermediate_dir = intermediate.path().to_path_buf();
    let tar_path = config.stage_tar_path("builder");
    let entries = write_stage_tar(root.path(), &deps, &tar_path).unwrap();
    assert_eq!(entries, 4);

    let bytes = fs::read(&tar_path).unwrap();
    assert_eq!(
        entry_names(&bytes),
        vec!["out", "out/bin", "out/bin/a", "out/bin/b"]
    );
}
