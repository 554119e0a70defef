//! Tar entry emission for image layers.
//!
//! Entry names are relative to the working root. Deletions are encoded as
//! overlay-style whiteouts: a zero-byte file whose basename carries the
//! `.wh.` prefix, placed in the deleted path's parent directory.

use std::collections::HashMap;
use std::io::Write;
use std::os::unix::fs::{FileTypeExt, MetadataExt};
use std::path::{Path, PathBuf};

use lamina_core::error::{LaminaError, Result};
use tar::{Builder, EntryType, Header};

/// Basename prefix that marks a whiteout entry.
pub const WHITEOUT_PREFIX: &str = ".wh.";

/// Streams filesystem entries into a tar archive.
pub struct TarWriter<W: Write> {
    builder: Builder<W>,
    /// First archived name per (device, inode), for hardlink entries.
    hardlinks: HashMap<(u64, u64), PathBuf>,
}

impl<W: Write> TarWriter<W> {
    pub fn new(out: W) -> Self {
        let mut builder = Builder::new(out);
        builder.follow_symlinks(false);
        Self {
            builder,
            hardlinks: HashMap::new(),
        }
    }

    /// Append the filesystem entry at `path` (absolute, under `root`) with
    /// its archive name relative to `root`.
    ///
    /// Hardlinked regular files are emitted once with content; later paths
    /// sharing the inode become tar hardlink entries. FIFOs and device
    /// nodes are emitted metadata-only. Sockets cannot be represented in
    /// tar and are skipped.
    pub fn append_path(&mut self, root: &Path, path: &Path) -> Result<()> {
        let name = archive_name(root, path)?;
        if name.as_os_str().is_empty() {
            return Ok(());
        }

        let meta = std::fs::symlink_metadata(path)?;
        let file_type = meta.file_type();

        if file_type.is_dir() {
            self.builder.append_dir(&name, path)?;
        } else if file_type.is_symlink() {
            self.builder.append_path_with_name(path, &name)?;
        } else if file_type.is_file() {
            let inode = (meta.dev(), meta.ino());
            if meta.nlink() > 1 {
                if let Some(original) = self.hardlinks.get(&inode) {
                    let mut header = Header::new_gnu();
                    header.set_metadata(&meta);
                    header.set_entry_type(EntryType::Link);
                    header.set_size(0);
                    header.set_link_name(original)?;
                    header.set_cksum();
                    self.builder.append_data(&mut header, &name, std::io::empty())?;
                    return Ok(());
                }
                self.hardlinks.insert(inode, name.clone());
            }
            self.builder.append_path_with_name(path, &name)?;
        } else if file_type.is_fifo() || file_type.is_char_device() || file_type.is_block_device() {
            let mut header = Header::new_gnu();
            header.set_metadata(&meta);
            header.set_size(0);
            if file_type.is_char_device() || file_type.is_block_device() {
                let rdev = meta.rdev();
                header.set_device_major(device_major(rdev))?;
                header.set_device_minor(device_minor(rdev))?;
            }
            header.set_cksum();
            self.builder.append_data(&mut header, &name, std::io::empty())?;
        } else {
            // Unix sockets have no tar representation.
            tracing::debug!(path = %path.display(), "Skipping socket during snapshot");
        }

        Ok(())
    }

    /// Append a whiteout entry hiding `path` (absolute, under `root`).
    pub fn append_whiteout(&mut self, root: &Path, path: &Path) -> Result<()> {
        let name = archive_name(root, path)?;
        let basename = name.file_name().ok_or_else(|| {
            LaminaError::StateError(format!(
                "cannot whiteout the working root itself: {}",
                path.display()
            ))
        })?;

        let mut whiteout = PathBuf::from(WHITEOUT_PREFIX);
        whiteout.as_mut_os_string().push(basename);
        let whiteout_name = match name.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.join(whiteout),
            _ => whiteout,
        };

        let mut header = Header::new_gnu();
        header.set_entry_type(EntryType::Regular);
        header.set_size(0);
        header.set_mode(0o644);
        header.set_mtime(0);
        header.set_cksum();
        self.builder
            .append_data(&mut header, &whiteout_name, std::io::empty())?;
        Ok(())
    }

    /// Flush the archive trailer.
    pub fn finish(mut self) -> Result<()> {
        self.builder.finish()?;
        Ok(())
    }
}

fn archive_name(root: &Path, path: &Path) -> Result<PathBuf> {
    path.strip_prefix(root)
        .map(Path::to_path_buf)
        .map_err(|_| {
            LaminaError::StateError(format!(
                "path {} is outside the working root {}",
                path.display(),
                root.display()
            ))
        })
}

// glibc encoding of dev_t major/minor numbers.
fn device_major(rdev: u64) -> u32 {
    (((rdev >> 32) & 0xffff_f000) | ((rdev >> 8) & 0x0fff)) as u32
}

fn device_minor(rdev: u64) -> u32 {
    (((rdev >> 12) & 0xffff_ff00) | (rdev & 0x00ff)) as u32
}
