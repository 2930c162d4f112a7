// SPDX-License-Identifier: GPL-3.0-only

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use lun_contracts::DeviceProbe;
use lun_types::Hctl;

#[derive(Default)]
struct State {
    nodes: BTreeSet<String>,
    links: BTreeMap<PathBuf, PathBuf>,
    files: BTreeMap<PathBuf, String>,
    dirs: BTreeMap<PathBuf, Vec<(Duration, Vec<String>)>>,
    scsi_paths: HashMap<Hctl, String>,
    writes: Vec<(PathBuf, String)>,
}

/// In-memory `/dev` + `/sys` tree that reacts to deletes the way the kernel does.
///
/// Writing to `/sys/block/<dev>/device/delete` or to the delete attribute of a
/// registered SCSI path removes the device node. Deleting a device that is
/// not present fails with `NotFound`, matching a vanished sysfs directory.
pub struct FakeProbe {
    started: Instant,
    state: Mutex<State>,
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn not_found(path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotFound,
        format!("{}: No such file or directory", path.display()),
    )
}

impl FakeProbe {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            state: Mutex::new(State::default()),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register `/dev/<name>` and `/sys/block/<name>`.
    pub fn add_node(&self, name: &str) -> &Self {
        self.state().nodes.insert(name.to_string());
        self
    }

    /// Register `/dev/disk/by-id/<link>` pointing at `../../<target>`.
    pub fn add_by_id(&self, link: &str, target: &str) -> &Self {
        self.state().links.insert(
            PathBuf::from("/dev/disk/by-id").join(link),
            PathBuf::from(format!("../../{target}")),
        );
        self
    }

    pub fn set_file(&self, path: &str, contents: &str) -> &Self {
        self.state()
            .files
            .insert(PathBuf::from(path), contents.to_string());
        self
    }

    pub fn set_dir(&self, path: &str, entries: &[&str]) -> &Self {
        self.set_dir_after(path, Duration::ZERO, entries)
    }

    /// Directory listing that becomes visible once `after` has elapsed.
    pub fn set_dir_after(&self, path: &str, after: Duration, entries: &[&str]) -> &Self {
        let mut state = self.state();
        let timeline = state.dirs.entry(PathBuf::from(path)).or_default();
        timeline.push((after, entries.iter().map(|entry| entry.to_string()).collect()));
        timeline.sort_by_key(|(after, _)| *after);
        self
    }

    /// Register a SCSI path so its HCTL delete attribute removes `device`.
    pub fn add_scsi_path(&self, hctl: Hctl, device: &str) -> &Self {
        let mut state = self.state();
        state.nodes.insert(device.to_string());
        state.scsi_paths.insert(hctl, device.to_string());
        self
    }

    pub fn has_node(&self, name: &str) -> bool {
        self.state().nodes.contains(name)
    }

    pub fn has_link(&self, link: &str) -> bool {
        self.state()
            .links
            .contains_key(&PathBuf::from("/dev/disk/by-id").join(link))
    }

    pub fn writes(&self) -> Vec<(PathBuf, String)> {
        self.state().writes.clone()
    }

    fn node_of(path: &Path) -> Option<String> {
        let rest = path.strip_prefix("/dev").ok()?;
        let mut components = rest.components();
        let name = components.next()?.as_os_str().to_string_lossy().to_string();
        components.next().is_none().then_some(name)
    }

    fn block_device_of(path: &Path) -> Option<String> {
        let rest = path.strip_prefix("/sys/block").ok()?;
        rest.components()
            .next()
            .map(|component| component.as_os_str().to_string_lossy().to_string())
    }

    fn scsi_path_of(path: &Path) -> Option<Hctl> {
        let rest = path.strip_prefix("/sys/class/scsi_device").ok()?;
        rest.components()
            .next()?
            .as_os_str()
            .to_string_lossy()
            .parse()
            .ok()
    }

    fn active_dir(&self, state: &State, path: &Path) -> Option<Vec<String>> {
        let elapsed = self.started.elapsed();
        state.dirs.get(path).and_then(|timeline| {
            timeline
                .iter()
                .rev()
                .find(|(after, _)| *after <= elapsed)
                .map(|(_, entries)| entries.clone())
        })
    }
}

impl Default for FakeProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceProbe for FakeProbe {
    fn read_link(&self, path: &Path) -> io::Result<PathBuf> {
        self.state()
            .links
            .get(path)
            .cloned()
            .ok_or_else(|| not_found(path))
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<String>> {
        let state = self.state();
        if let Some(entries) = self.active_dir(&state, path) {
            let mut entries = entries;
            entries.sort();
            return Ok(entries);
        }

        let mut names = BTreeSet::new();
        for key in state.links.keys().chain(state.files.keys()) {
            if let Ok(rest) = key.strip_prefix(path)
                && let Some(first) = rest.components().next()
            {
                names.insert(first.as_os_str().to_string_lossy().to_string());
            }
        }

        if names.is_empty() && !state.dirs.contains_key(path) {
            return Err(not_found(path));
        }
        Ok(names.into_iter().collect())
    }

    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        self.state()
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| not_found(path))
    }

    fn write(&self, path: &Path, contents: &str) -> io::Result<()> {
        let mut state = self.state();
        let is_delete = path.ends_with("device/delete");

        if let Some(hctl) = Self::scsi_path_of(path) {
            let device = state.scsi_paths.get(&hctl).cloned().ok_or_else(|| not_found(path))?;
            state.writes.push((path.to_path_buf(), contents.to_string()));
            if is_delete {
                state.scsi_paths.remove(&hctl);
                state.nodes.remove(&device);
            }
            return Ok(());
        }

        if let Some(device) = Self::block_device_of(path)
            && !state.files.contains_key(path)
        {
            if !state.nodes.contains(&device) {
                return Err(not_found(path));
            }
            state.writes.push((path.to_path_buf(), contents.to_string()));
            if is_delete {
                state.nodes.remove(&device);
            }
            return Ok(());
        }

        if !state.files.contains_key(path) {
            return Err(not_found(path));
        }
        state.writes.push((path.to_path_buf(), contents.to_string()));
        state.files.insert(path.to_path_buf(), contents.to_string());
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        let state = self.state();
        if let Some(target) = state.links.get(path) {
            let parent = path.parent().unwrap_or(Path::new("/"));
            let resolved = normalize(&parent.join(target));
            return Self::node_of(&resolved).is_some_and(|name| state.nodes.contains(&name));
        }
        if let Some(name) = Self::node_of(path) {
            return state.nodes.contains(&name);
        }
        state.files.contains_key(path) || state.dirs.contains_key(path)
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        let mut state = self.state();
        if state.links.remove(path).is_some() || state.files.remove(path).is_some() {
            return Ok(());
        }
        Err(not_found(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn by_id_links_follow_node_lifetime() {
        let probe = FakeProbe::new();
        probe.add_node("sdb").add_by_id("wwn-0x6a0b", "sdb");

        let link = Path::new("/dev/disk/by-id/wwn-0x6a0b");
        assert!(probe.exists(link));
        assert_eq!(
            probe.read_dir(Path::new("/dev/disk/by-id")).expect("by-id"),
            vec!["wwn-0x6a0b".to_string()]
        );

        probe
            .write(Path::new("/sys/block/sdb/device/delete"), "1")
            .expect("delete sdb");
        assert!(!probe.exists(link));
        assert!(!probe.has_node("sdb"));
    }

    #[test]
    fn deleting_a_missing_device_is_not_found() {
        let probe = FakeProbe::new();
        let error = probe
            .write(Path::new("/sys/block/sdq/device/delete"), "1")
            .expect_err("sdq is absent");
        assert_eq!(error.kind(), io::ErrorKind::NotFound);
    }
}
