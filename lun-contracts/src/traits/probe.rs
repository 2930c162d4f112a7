// SPDX-License-Identifier: GPL-3.0-only

use std::io;
use std::path::{Path, PathBuf};

/// Port over the `/dev` and `/sys` trees.
///
/// Paths are always given in their absolute host form (`/sys/block/dm-2/slaves`);
/// implementations may relocate them, which is how tests run against a fixture tree.
pub trait DeviceProbe: Send + Sync {
    fn read_link(&self, path: &Path) -> io::Result<PathBuf>;

    /// Entry names of a directory, sorted.
    fn read_dir(&self, path: &Path) -> io::Result<Vec<String>>;

    fn read_to_string(&self, path: &Path) -> io::Result<String>;

    fn write(&self, path: &Path, contents: &str) -> io::Result<()>;

    fn exists(&self, path: &Path) -> bool;

    fn remove_file(&self, path: &Path) -> io::Result<()>;

    /// Read a sysfs attribute, trimmed.
    fn read_attr(&self, path: &Path) -> io::Result<String> {
        self.read_to_string(path).map(|value| value.trim().to_string())
    }
}
