//! Stage-name resolution.
//!
//! Rewrites symbolic stage references in cross-stage copies to index
//! strings, e.g. `--from=builder` becomes `--from=0`, so the analyzer and
//! executor reason in indices only.

use std::collections::HashMap;

use super::{Instruction, Stage};

/// Rewrite every known symbolic `--from` reference to its stage index, in
/// place. Unknown names are left untouched; they may refer to external
/// image references rather than stages, which the dependency analyzer
/// distinguishes downstream. Running this twice is a no-op.
pub fn resolve_stages(stages: &mut [Stage]) {
    let mut name_to_index: HashMap<String, String> = HashMap::new();

    for i in 0..stages.len() {
        let index_string = i.to_string();
        if let Some(name) = &stages[i].name {
            if name != &index_string {
                name_to_index.insert(name.clone(), index_string);
            }
        }

        for instruction in &mut stages[i].instructions {
            if let Instruction::Copy {
                from: Some(from), ..
            } = instruction
            {
                if let Some(index) = name_to_index.get(from) {
                    *from = index.clone();
                }
            }
        }
    }
}
