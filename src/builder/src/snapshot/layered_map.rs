//! In-memory history of every path the build has touched.
//!
//! Each snapshot opens one [`Layer`] recording added paths (with their layer
//! hash) and deleted paths (whiteouts). Flattening the layers in order gives
//! the current-image view: the newest mention of a path wins, an `added`
//! mention makes it present, a `deleted` mention removes it.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use lamina_core::error::{LaminaError, Result};

use crate::hash::{self, FileHash};
use crate::timing::TimingRecorder;

/// Category charged on the timing recorder for hashing work.
const TIMING_HASHING: &str = "hashing";

/// Hash function over a path, injectable for testing.
pub type HasherFn = Box<dyn Fn(&Path) -> Result<FileHash> + Send>;

/// One snapshot's worth of filesystem changes.
///
/// A path may appear in `added` or `deleted` but not both; callers uphold
/// this, the map does not de-duplicate.
#[derive(Debug, Default, Clone)]
pub struct Layer {
    added: BTreeMap<PathBuf, FileHash>,
    deleted: BTreeSet<PathBuf>,
}

impl Layer {
    /// Paths this layer captured, with their layer hashes.
    pub fn added(&self) -> &BTreeMap<PathBuf, FileHash> {
        &self.added
    }

    /// Paths this layer removes from the flattened image.
    pub fn deleted(&self) -> &BTreeSet<PathBuf> {
        &self.deleted
    }
}

/// Layer history plus the derived flattened-image view.
pub struct LayeredMap {
    layers: Vec<Layer>,

    /// Flattened view of all layers; only meaningful while valid.
    current_image: HashMap<PathBuf, FileHash>,
    is_current_image_valid: bool,

    /// Hashes already computed by `check_file_change` for the open layer,
    /// so the matching `add` does not re-read the file.
    layer_hash_cache: HashMap<PathBuf, FileHash>,

    hasher: HasherFn,
    /// Excludes mtime so filesystem cache keys are stable across runs.
    cache_hasher: HasherFn,

    timing: Option<TimingRecorder>,
}

impl LayeredMap {
    /// Create an empty map with explicit hash functions.
    pub fn new(hasher: HasherFn, cache_hasher: HasherFn) -> Self {
        Self {
            layers: Vec::new(),
            current_image: HashMap::new(),
            is_current_image_valid: true,
            layer_hash_cache: HashMap::new(),
            hasher,
            cache_hasher,
            timing: None,
        }
    }

    /// Create an empty map using the standard layer and cache hashers.
    pub fn with_default_hashers() -> Self {
        Self::new(
            Box::new(|p| hash::layer_hash(p)),
            Box::new(|p| hash::cache_hash(p)),
        )
    }

    /// Attach a timing recorder; hashing time is charged to it.
    pub fn with_timing(mut self, timing: TimingRecorder) -> Self {
        self.timing = Some(timing);
        self
    }

    /// Number of layers recorded so far.
    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    /// The recorded layers, oldest first.
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// Push a new empty layer onto the stack.
    ///
    /// The hash cache only ever describes the open layer, so it is cleared
    /// here.
    pub fn open_layer(&mut self) {
        self.update_current_image();
        self.layers.push(Layer::default());
        self.layer_hash_cache.clear();
    }

    /// Record `path` in the open layer's added set with its layer hash.
    ///
    /// Uses the hash computed by a preceding [`check_file_change`] call when
    /// available. Fails if no layer is open or hashing fails.
    ///
    /// [`check_file_change`]: LayeredMap::check_file_change
    pub fn add(&mut self, path: &Path) -> Result<()> {
        self.is_current_image_valid = false;

        let hash = match self.layer_hash_cache.get(path) {
            Some(cached) => cached.clone(),
            None => (self.hasher)(path)?,
        };

        let layer = self.top_layer_mut("add")?;
        layer.added.insert(path.to_path_buf(), hash);
        Ok(())
    }

    /// Record `path` in the open layer's deleted set.
    pub fn add_whiteout(&mut self, path: &Path) -> Result<()> {
        self.is_current_image_valid = false;

        let layer = self.top_layer_mut("add_whiteout")?;
        layer.deleted.insert(path.to_path_buf());
        Ok(())
    }

    /// Scan layers top-down and return the first added hash for `path`.
    ///
    /// Deletions are deliberately not honored here: this answers "was this
    /// path ever added in a still-visible layer", which is what diff
    /// presence checks need. Use [`current_paths`] for the
    /// deletion-honoring view.
    ///
    /// [`current_paths`]: LayeredMap::current_paths
    pub fn get(&self, path: &Path) -> Option<&FileHash> {
        self.layers
            .iter()
            .rev()
            .find_map(|layer| layer.added.get(path))
    }

    /// All paths present in the flattened image.
    pub fn current_paths(&mut self) -> BTreeSet<PathBuf> {
        self.update_current_image();
        self.current_image.keys().cloned().collect()
    }

    /// Hash `path` with the layer hasher and report whether it differs from
    /// the flattened image's entry. A path absent from the flattened image
    /// counts as changed. The computed hash is retained so a following
    /// [`add`] of the same path does not hash again.
    ///
    /// [`add`]: LayeredMap::add
    pub fn check_file_change(&mut self, path: &Path) -> Result<bool> {
        let _span = self.timing.as_ref().map(|t| t.start(TIMING_HASHING));

        let new_hash = (self.hasher)(path)?;
        self.layer_hash_cache
            .insert(path.to_path_buf(), new_hash.clone());

        self.update_current_image();
        Ok(self.current_image.get(path) != Some(&new_hash))
    }

    /// Hash `path` with the cache hasher (mtime excluded), for build-cache
    /// keys.
    pub fn cache_key(&self, path: &Path) -> Result<FileHash> {
        let _span = self.timing.as_ref().map(|t| t.start(TIMING_HASHING));
        (self.cache_hasher)(path)
    }

    /// Stable digest of the added history across all layers, whiteouts
    /// excluded. Identifies the whole build so far.
    pub fn key(&self) -> Result<FileHash> {
        let added: Vec<&BTreeMap<PathBuf, FileHash>> =
            self.layers.iter().map(|l| &l.added).collect();
        let encoded = serde_json::to_vec(&added)?;
        Ok(hash::sha256_bytes(&encoded))
    }

    fn top_layer_mut(&mut self, operation: &str) -> Result<&mut Layer> {
        self.layers.last_mut().ok_or_else(|| {
            LaminaError::StateError(format!("{operation} called before any open_layer"))
        })
    }

    /// Recompute the flattened image from the layer stack if it is stale.
    fn update_current_image(&mut self) {
        if self.is_current_image_valid {
            return;
        }

        self.current_image.clear();
        for layer in &self.layers {
            for (path, hash) in &layer.added {
                self.current_image.insert(path.clone(), hash.clone());
            }
            for path in &layer.deleted {
                self.current_image.remove(path);
            }
        }
        self.is_current_image_valid = true;
    }
}
