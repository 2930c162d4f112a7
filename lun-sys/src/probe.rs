// SPDX-License-Identifier: GPL-3.0-only

//! `DeviceProbe` over the real filesystem

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use lun_contracts::DeviceProbe;
use tracing::trace;

/// Reads and writes `/dev` and `/sys` below a configurable root.
///
/// The root is `/` on a real host. Pointing it at a directory lets the whole
/// engine run against a fixture tree.
#[derive(Debug, Clone)]
pub struct SysfsProbe {
    root: PathBuf,
}

impl SysfsProbe {
    pub fn host() -> Self {
        Self {
            root: PathBuf::from("/"),
        }
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn locate(&self, path: &Path) -> PathBuf {
        match path.strip_prefix("/") {
            Ok(relative) => self.root.join(relative),
            Err(_) => self.root.join(path),
        }
    }
}

impl Default for SysfsProbe {
    fn default() -> Self {
        Self::host()
    }
}

impl DeviceProbe for SysfsProbe {
    fn read_link(&self, path: &Path) -> io::Result<PathBuf> {
        fs::read_link(self.locate(path))
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<String>> {
        let mut names: Vec<String> = fs::read_dir(self.locate(path))?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        Ok(names)
    }

    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        fs::read_to_string(self.locate(path))
    }

    fn write(&self, path: &Path, contents: &str) -> io::Result<()> {
        trace!(path = %path.display(), contents, "writing sysfs attribute");
        fs::write(self.locate(path), contents)
    }

    fn exists(&self, path: &Path) -> bool {
        self.locate(path).exists()
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(self.locate(path))
    }
}
