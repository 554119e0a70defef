//! Filesystem snapshotting against the layer history.
//!
//! A snapshot walks (or is told about) paths under the working root, asks
//! the [`LayeredMap`] which of them changed, records the changes as a new
//! layer, and streams the corresponding tar entries. Paths that disappeared
//! from disk since the previous flattened image become whiteouts.

use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use lamina_core::error::Result;

use super::layered_map::LayeredMap;
use super::tar_writer::TarWriter;
use crate::hash::FileHash;

/// Counts of what one snapshot emitted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SnapshotReport {
    /// File entries written to the layer tar
    pub files_added: usize,
    /// Whiteout entries written to the layer tar
    pub whiteouts: usize,
}

impl SnapshotReport {
    /// True when the snapshot produced an empty layer.
    pub fn is_empty(&self) -> bool {
        self.files_added == 0 && self.whiteouts == 0
    }
}

/// Realizes layers as tar streams over a working root.
pub struct Snapshotter {
    root: PathBuf,
    layered_map: LayeredMap,
}

impl Snapshotter {
    pub fn new(root: impl AsRef<Path>, layered_map: LayeredMap) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            layered_map,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn layered_map(&self) -> &LayeredMap {
        &self.layered_map
    }

    pub fn layered_map_mut(&mut self) -> &mut LayeredMap {
        &mut self.layered_map
    }

    /// Content-addressable identifier of the whole build so far.
    pub fn key(&self) -> Result<FileHash> {
        self.layered_map.key()
    }

    /// Walk the entire working root, capture every changed path, and emit
    /// whiteouts for paths that existed in the previous flattened image but
    /// are gone from disk.
    ///
    /// Entries are written parents-first in lexicographic component order;
    /// whiteouts follow the content entries, sorted the same way.
    pub fn take_full_snapshot<W: Write>(&mut self, out: W) -> Result<SnapshotReport> {
        let previous = self.layered_map.current_paths();
        self.layered_map.open_layer();

        let mut writer = TarWriter::new(out);
        let mut report = SnapshotReport::default();

        let mut walked = BTreeSet::new();
        for path in walk_sorted(&self.root)? {
            walked.insert(path.clone());
            if self.layered_map.check_file_change(&path)? {
                self.layered_map.add(&path)?;
                writer.append_path(&self.root, &path)?;
                report.files_added += 1;
            }
        }

        for gone in previous.iter().filter(|p| !walked.contains(*p)) {
            self.layered_map.add_whiteout(gone)?;
            writer.append_whiteout(&self.root, gone)?;
            report.whiteouts += 1;
        }

        writer.finish()?;
        tracing::debug!(
            files = report.files_added,
            whiteouts = report.whiteouts,
            "Captured full snapshot"
        );
        Ok(report)
    }

    /// Capture exactly the named paths (plus their parent chains) into a
    /// new layer. Whiteouts are emitted only for the explicit `deleted`
    /// paths; no full-tree sweep happens.
    pub fn take_snapshot<W: Write>(
        &mut self,
        files: &[PathBuf],
        deleted: &[PathBuf],
        out: W,
    ) -> Result<SnapshotReport> {
        self.layered_map.open_layer();

        let mut writer = TarWriter::new(out);
        let mut report = SnapshotReport::default();

        for path in expand_paths(&self.root, files) {
            if std::fs::symlink_metadata(&path).is_err() {
                tracing::debug!(path = %path.display(), "Skipping vanished path");
                continue;
            }
            if self.layered_map.check_file_change(&path)? {
                self.layered_map.add(&path)?;
                writer.append_path(&self.root, &path)?;
                report.files_added += 1;
            }
        }

        let gone: BTreeSet<&PathBuf> = deleted.iter().collect();
        for path in gone {
            self.layered_map.add_whiteout(path)?;
            writer.append_whiteout(&self.root, path)?;
            report.whiteouts += 1;
        }

        writer.finish()?;
        tracing::debug!(
            files = report.files_added,
            whiteouts = report.whiteouts,
            "Captured targeted snapshot"
        );
        Ok(report)
    }
}

/// Write the dependency paths of a finished stage to `tar_path`, with
/// metadata and directory entries for their parent chains. Consumers read
/// this tar to reconstruct cross-stage file transfers.
pub fn write_stage_tar(root: &Path, paths: &[PathBuf], tar_path: &Path) -> Result<usize> {
    if let Some(parent) = tar_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::File::create(tar_path)?;
    let mut writer = TarWriter::new(file);

    let mut count = 0;
    for path in expand_paths(root, paths) {
        writer.append_path(root, &path)?;
        count += 1;
    }
    writer.finish()?;

    tracing::debug!(
        entries = count,
        tar = %tar_path.display(),
        "Wrote intermediate stage tar"
    );
    Ok(count)
}

/// Depth-first walk of `root`, parents before children, siblings in
/// lexicographic order. Symlinks are reported but never followed.
fn walk_sorted(root: &Path) -> Result<Vec<PathBuf>> {
    fn visit(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
        let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<std::io::Result<_>>()?;
        entries.sort();

        for path in entries {
            let meta = std::fs::symlink_metadata(&path)?;
            out.push(path.clone());
            if meta.is_dir() {
                visit(&path, out)?;
            }
        }
        Ok(())
    }

    let mut out = Vec::new();
    visit(root, &mut out)?;
    Ok(out)
}

/// Expand a set of snapshot targets: dedupe, pull in symlink targets so a
/// link and its file are never captured twice, and include the parent
/// directory chain so parents precede children in tar order.
fn expand_paths(root: &Path, files: &[PathBuf]) -> BTreeSet<PathBuf> {
    let mut expanded = BTreeSet::new();

    for path in files {
        expanded.insert(path.clone());

        let Ok(meta) = std::fs::symlink_metadata(path) else {
            continue;
        };
        if !meta.file_type().is_symlink() {
            continue;
        }
        let Ok(target) = std::fs::read_link(path) else {
            continue;
        };
        let resolved = if target.is_absolute() {
            // Link targets are image-absolute; rebase under the root.
            root.join(target.strip_prefix("/").unwrap_or(&target))
        } else {
            match path.parent() {
                Some(parent) => parent.join(&target),
                None => target,
            }
        };
        let resolved = normalize(&resolved);
        if resolved.starts_with(root) && std::fs::symlink_metadata(&resolved).is_ok() {
            expanded.insert(resolved);
        }
    }

    for path in expanded.clone() {
        let mut current = path.as_path();
        while let Some(parent) = current.parent() {
            if parent == root || !parent.starts_with(root) {
                break;
            }
            expanded.insert(parent.to_path_buf());
            current = parent;
        }
    }

    expanded
}

/// Lexical normalization: resolves `.` and `..` components without
/// touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn new_snapshotter(root: &Path) -> Snapshotter {
        Snapshotter::new(root, LayeredMap::with_default_hashers())
    }

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
    fn test_initial_full_snapshot_captures_everything() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("x"), "x").unwrap();
        fs::create_dir(tmp.path().join("y")).unwrap();
        fs::write(tmp.path().join("y/z"), "z").unwrap();

        let mut snapshotter = new_snapshotter(tmp.path());
        let mut tar = Vec::new();
        let report = snapshotter.take_full_snapshot(&mut tar).unwrap();

        assert_eq!(report.files_added, 3);
        assert_eq!(report.whiteouts, 0);
        assert_eq!(entry_names(&tar), vec!["x", "y", "y/z"]);
    }

    #[test]
    fn test_snapshot_minimality() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("f"), "content").unwrap();

        let mut snapshotter = new_snapshotter(tmp.path());
        snapshotter.take_full_snapshot(Vec::new()).unwrap();

        let mut tar = Vec::new();
        let report = snapshotter.take_full_snapshot(&mut tar).unwrap();
        assert!(report.is_empty());
        assert!(entry_names(&tar).is_empty());
    }

    #[test]
    fn test_deletion_produces_single_whiteout() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("x"), "x").unwrap();
        fs::write(tmp.path().join("keep"), "k").unwrap();

        let mut snapshotter = new_snapshotter(tmp.path());
        snapshotter.take_full_snapshot(Vec::new()).unwrap();

        fs::remove_file(tmp.path().join("x")).unwrap();
        let mut tar = Vec::new();
        let report = snapshotter.take_full_snapshot(&mut tar).unwrap();

        assert_eq!(report.files_added, 0);
        assert_eq!(report.whiteouts, 1);
        assert_eq!(entry_names(&tar), vec![".wh.x"]);

        let top = snapshotter.layered_map().layers().last().unwrap();
        assert!(top.deleted().contains(&tmp.path().join("x")));
        assert!(!snapshotter
            .layered_map_mut()
            .current_paths()
            .contains(&tmp.path().join("x")));
    }

    #[test]
    fn test_modified_file_recaptured() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("f"), "one").unwrap();

        let mut snapshotter = new_snapshotter(tmp.path());
        snapshotter.take_full_snapshot(Vec::new()).unwrap();

        fs::write(tmp.path().join("f"), "two").unwrap();
        let mut tar = Vec::new();
        let report = snapshotter.take_full_snapshot(&mut tar).unwrap();
        assert_eq!(report.files_added, 1);
        assert_eq!(entry_names(&tar), vec!["f"]);
    }

    #[test]
    fn test_targeted_snapshot_includes_parent_chain() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("a/b")).unwrap();
        fs::write(tmp.path().join("a/b/c"), "c").unwrap();

        let mut snapshotter = new_snapshotter(tmp.path());
        let mut tar = Vec::new();
        let report = snapshotter
            .take_snapshot(&[tmp.path().join("a/b/c")], &[], &mut tar)
            .unwrap();

        assert_eq!(report.files_added, 3);
        assert_eq!(entry_names(&tar), vec!["a", "a/b", "a/b/c"]);
    }

    #[test]
    fn test_targeted_snapshot_explicit_deletions_only() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("stays"), "s").unwrap();
        fs::write(tmp.path().join("goes"), "g").unwrap();

        let mut snapshotter = new_snapshotter(tmp.path());
        snapshotter.take_full_snapshot(Vec::new()).unwrap();

        // `stays` also vanishes from disk, but targeted snapshots only
        // whiteout what the caller names.
        fs::remove_file(tmp.path().join("stays")).unwrap();
        fs::remove_file(tmp.path().join("goes")).unwrap();

        let mut tar = Vec::new();
        let report = snapshotter
            .take_snapshot(&[], &[tmp.path().join("goes")], &mut tar)
            .unwrap();

        assert_eq!(report.whiteouts, 1);
        assert_eq!(entry_names(&tar), vec![".wh.goes"]);
    }

    #[test]
    fn test_targeted_snapshot_skips_unchanged() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("f"), "content").unwrap();

        let mut snapshotter = new_snapshotter(tmp.path());
        snapshotter.take_full_snapshot(Vec::new()).unwrap();

        let mut tar = Vec::new();
        let report = snapshotter
            .take_snapshot(&[tmp.path().join("f")], &[], &mut tar)
            .unwrap();
        assert!(report.is_empty());
    }

    #[test]
    fn test_targeted_snapshot_captures_symlink_and_target_once() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("file"), "content").unwrap();
        std::os::unix::fs::symlink("file", tmp.path().join("link")).unwrap();

        let mut snapshotter = new_snapshotter(tmp.path());
        let mut tar = Vec::new();
        let report = snapshotter
            .take_snapshot(
                &[tmp.path().join("link"), tmp.path().join("file")],
                &[],
                &mut tar,
            )
            .unwrap();

        assert_eq!(report.files_added, 2);
        assert_eq!(entry_names(&tar), vec!["file", "link"]);
    }

    #[test]
    fn test_write_stage_tar_with_parent_chain() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("out/bin")).unwrap();
        fs::write(tmp.path().join("out/bin/app"), "binary").unwrap();

        let stage_dir = TempDir::new().unwrap();
        let tar_path = stage_dir.path().join("builder").join("stage.tar");
        let count =
            write_stage_tar(tmp.path(), &[tmp.path().join("out/bin/app")], &tar_path).unwrap();

        assert_eq!(count, 3);
        let bytes = fs::read(&tar_path).unwrap();
        assert_eq!(entry_names(&bytes), vec!["out", "out/bin", "out/bin/app"]);
    }

    #[test]
    fn test_write_stage_tar_missing_path_fails() {
        let tmp = TempDir::new().unwrap();
        let stage_dir = TempDir::new().unwrap();
        let tar_path = stage_dir.path().join("0/stage.tar");
        let result = write_stage_tar(tmp.path(), &[tmp.path().join("absent")], &tar_path);
        assert!(result.is_err());
    }

    #[test]
    fn test_mtime_only_change_is_captured() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("f"), "same").unwrap();

        let mut snapshotter = new_snapshotter(tmp.path());
        snapshotter.take_full_snapshot(Vec::new()).unwrap();

        std::thread::sleep(std::time::Duration::from_millis(20));
        fs::write(tmp.path().join("f"), "same").unwrap();

        let mut tar = Vec::new();
        let report = snapshotter.take_full_snapshot(&mut tar).unwrap();
        assert_eq!(report.files_added, 1);
    }
}
