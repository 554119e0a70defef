//! Layered filesystem snapshots.
//!
//! The [`LayeredMap`] remembers every path the build has touched, one
//! [`Layer`] per snapshot; the [`Snapshotter`] diffs the working root
//! against it and emits minimal tar layers with whiteouts for deletions.

mod layered_map;
mod snapshotter;
mod tar_writer;

pub use layered_map::{HasherFn, Layer, LayeredMap};
pub use snapshotter::{write_stage_tar, SnapshotReport, Snapshotter};
pub use tar_writer::{TarWriter, WHITEOUT_PREFIX};
