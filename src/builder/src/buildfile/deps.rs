//! Cross-stage dependency analysis.
//!
//! Before a finished stage's rootfs is torn down, the analyzer determines
//! which of its files later stages will pull in via `COPY --from`, so they
//! can be persisted to an intermediate tar first.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use lamina_core::error::{LaminaError, Result};

use super::args::{substitute, BuildArgs};
use super::{Instruction, Stage, NO_BASE_IMAGE};
use crate::image::{ImageSource, ImageView};

/// Compute the paths under the working root that stages after `index`
/// reference via cross-stage copies from stage `index`.
///
/// For each later stage, the environment that will be active when it runs
/// is reconstructed: its base image's configured environment (the no-base
/// sentinel yields an empty one, a reference to stage `index` yields
/// `current_image`, anything else goes through `resolver`), mutated by
/// replaying the stage's ENV and ARG instructions in order. Copy sources
/// are then substituted against that environment, wildcard-expanded against
/// the rootfs, and made absolute under `root`.
///
/// Any resolution, substitution, or expansion failure aborts the analysis;
/// partial lists are never returned.
pub fn stage_dependencies(
    index: usize,
    stages: &[Stage],
    current_image: &ImageView,
    build_args: &mut BuildArgs,
    resolver: &dyn ImageSource,
    root: &Path,
) -> Result<Vec<PathBuf>> {
    let index_string = index.to_string();
    let mut dependencies = BTreeSet::new();

    for stage in stages.iter().filter(|s| s.index > index) {
        let base_view = resolve_base_view(stage, &stages[index], current_image, resolver)?;
        let mut env = base_view.env;

        for instruction in &stage.instructions {
            match instruction {
                Instruction::Env { pairs } => {
                    let replacement = build_args.replacement_envs(&env);
                    for (key, value) in pairs {
                        let resolved = substitute(value, &replacement)?;
                        set_env(&mut env, key, resolved);
                    }
                }
                Instruction::Arg { key, default } => {
                    build_args.declare(key, default.as_deref());
                }
                Instruction::Copy {
                    from: Some(from),
                    sources,
                    ..
                } if *from == index_string => {
                    let replacement = build_args.replacement_envs(&env);
                    let mut resolved = Vec::with_capacity(sources.len());
                    for source in sources {
                        resolved.push(substitute(source, &replacement)?);
                    }
                    dependencies.extend(resolve_sources(&resolved, root)?);
                }
                _ => {}
            }
        }
    }

    Ok(dependencies.into_iter().collect())
}

/// The environment supplier for a stage's base reference.
fn resolve_base_view(
    stage: &Stage,
    analyzed: &Stage,
    current_image: &ImageView,
    resolver: &dyn ImageSource,
) -> Result<ImageView> {
    if stage.base_ref == NO_BASE_IMAGE {
        return Ok(ImageView::empty());
    }
    if analyzed.name.as_deref() == Some(stage.base_ref.as_str())
        || stage.base_ref == analyzed.index.to_string()
    {
        return Ok(current_image.clone());
    }
    resolver.resolve_image(&stage.base_ref)
}

fn set_env(env: &mut Vec<(String, String)>, key: &str, value: String) {
    match env.iter_mut().find(|(k, _)| k == key) {
        Some(entry) => entry.1 = value,
        None => env.push((key.to_string(), value)),
    }
}

/// Expand copy sources against the rootfs: wildcard patterns go through
/// glob matching, plain paths are kept, and every result is made absolute
/// under `root`.
fn resolve_sources(sources: &[String], root: &Path) -> Result<Vec<PathBuf>> {
    let mut resolved = Vec::new();

    for source in sources {
        let rooted = root.join(source.trim_start_matches('/'));

        if source.contains(['*', '?', '[']) {
            let pattern = rooted.to_str().ok_or_else(|| {
                LaminaError::AnalysisError(format!("non-UTF-8 wildcard source '{}'", rooted.display()))
            })?;
            let matches = glob::glob(pattern).map_err(|e| {
                LaminaError::AnalysisError(format!("invalid wildcard pattern '{}': {}", source, e))
            })?;
            for entry in matches {
                let path = entry.map_err(|e| {
                    LaminaError::AnalysisError(format!(
                        "wildcard expansion of '{}' failed: {}",
                        source, e
                    ))
                })?;
                resolved.push(path);
            }
        } else {
            resolved.push(rooted);
        }
    }

    Ok(resolved)
}
