//! Lamina build engine.
//!
//! Executes container-image builds without a runtime or privileged daemon:
//! instructions mutate a working root in place, and after each mutating
//! instruction the engine captures a minimal tar layer of exactly what was
//! added, changed, or deleted since the prior snapshot. Between stages, the
//! dependency analyzer determines which files later stages will pull in via
//! cross-stage copies so they can be persisted before the rootfs is reused.
//!
//! The engine is deliberately sequential; it assumes exclusive control of
//! the working root for the duration of a build.

pub mod buildfile;
pub mod hash;
pub mod image;
pub mod proc;
pub mod snapshot;
pub mod timing;

pub use buildfile::{
    parse_commands, resolve_stages, stage_dependencies, substitute, BuildArgs, BuildScript,
    Instruction, Stage, NO_BASE_IMAGE,
};
pub use hash::{cache_hash, layer_hash, FileHash};
pub use image::{ImageSource, ImageView, NoExternalImages};
pub use proc::{container_runtime, container_runtime_for, ContainerRuntime};
pub use snapshot::{
    write_stage_tar, LayeredMap, SnapshotReport, Snapshotter, WHITEOUT_PREFIX,
};
pub use timing::TimingRecorder;

/// Engine version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
