// SPDX-License-Identifier: GPL-3.0-only

//! Multipath map convergence and WWN verification

use std::io;
use std::time::Duration;

use lun_contracts::{ConnectorError, Result};
use lun_sys::paths;
use lun_sys::tools::{multipathd, scsi_id, upadmin};
use lun_types::{DmAggregate, LunId, VendorVariant};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::Host;
use crate::engine::pause;
use crate::resolver::list_or_empty;

/// Progress of [`MultipathReconciler::watch_dm_device`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    /// No map for the LUN yet
    Polling,
    /// A map exists but has fewer members than expected
    Incomplete,
    Found,
    TimedOut,
}

impl WatchState {
    /// State after one poll that saw a map with `members` paths, or no map.
    pub fn observe(members: Option<usize>, expected: usize) -> Self {
        match members {
            None => Self::Polling,
            Some(found) if found >= expected => Self::Found,
            Some(_) => Self::Incomplete,
        }
    }
}

/// sysfs states of a path that can carry I/O (SCSI and NVMe controllers).
const HEALTHY_STATES: [&str; 2] = ["running", "live"];

#[derive(Clone)]
pub struct MultipathReconciler {
    host: Host,
    poll_interval: Duration,
}

impl MultipathReconciler {
    pub fn new(host: Host, poll_interval: Duration) -> Self {
        Self {
            host,
            poll_interval,
        }
    }

    /// Current multipath map of `lun` with its member paths, if assembled.
    pub async fn find_dm_aggregate(&self, lun: &LunId) -> Result<Option<DmAggregate>> {
        let maps = multipathd::show_maps(self.host.runner()).await?;
        let mut matching = maps.into_iter().filter(|map| lun.is_suffix_of(&map.uuid));

        let Some(map) = matching.next() else {
            return Ok(None);
        };
        if let Some(other) = matching.next() {
            return Err(ConnectorError::VirtualDeviceNotUnique {
                lun: lun.to_string(),
                devices: vec![map.sysfs, other.sysfs],
            });
        }

        let members = list_or_empty(&self.host, &paths::slaves_dir(&map.sysfs))?;
        Ok(Some(DmAggregate {
            name: map.name,
            sysfs_id: map.sysfs,
            wwid: map.uuid,
            members,
        }))
    }

    /// Wait until the map of `lun` has at least `expected_paths` members.
    ///
    /// On timeout, a map that never appeared yields `VolumeNotFound` and a map
    /// that stayed short yields `PathIncomplete`; the caller owns cleanup of
    /// the partial map.
    pub async fn watch_dm_device(
        &self,
        lun: &LunId,
        expected_paths: usize,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<DmAggregate> {
        let deadline = Instant::now() + timeout;
        let mut state = WatchState::Polling;
        let mut last_seen: Option<DmAggregate> = None;

        loop {
            if cancel.is_cancelled() {
                return Err(ConnectorError::Cancelled);
            }

            let aggregate = self.find_dm_aggregate(lun).await?;
            let next = WatchState::observe(
                aggregate.as_ref().map(|aggregate| aggregate.members.len()),
                expected_paths,
            );
            if next != state {
                debug!(
                    %lun,
                    from = ?state,
                    to = ?next,
                    found = aggregate.as_ref().map_or(0, |aggregate| aggregate.members.len()),
                    expected = expected_paths,
                    "multipath watch state changed"
                );
            }
            state = next;

            if let Some(aggregate) = aggregate {
                if state == WatchState::Found {
                    info!(
                        %lun,
                        device = aggregate.sysfs_id,
                        paths = aggregate.members.len(),
                        "multipath device complete"
                    );
                    return Ok(aggregate);
                }
                last_seen = Some(aggregate);
            }

            if Instant::now() >= deadline {
                break;
            }
            pause(self.poll_interval, cancel).await?;
        }

        let previous = std::mem::replace(&mut state, WatchState::TimedOut);
        warn!(%lun, last = ?previous, ?state, expected = expected_paths, "gave up waiting for multipath device");
        match last_seen {
            Some(aggregate) => Err(ConnectorError::PathIncomplete {
                lun: lun.to_string(),
                device: aggregate.sysfs_id,
                found: aggregate.members.len(),
                expected: expected_paths,
            }),
            None => Err(ConnectorError::VolumeNotFound(lun.to_string())),
        }
    }

    /// Check that `aggregate` is usable for `lun`.
    ///
    /// Members that are not running or whose WWID cannot be read are ignored.
    /// `Ok(false)` means no member survived and the volume must be reconnected.
    pub async fn verify_multipath_available(
        &self,
        aggregate: &DmAggregate,
        lun: &LunId,
        members: &[String],
    ) -> Result<bool> {
        if !lun.is_suffix_of(&aggregate.wwid) {
            return Err(ConnectorError::InconsistentWwn {
                device: aggregate.sysfs_id.clone(),
                expected: lun.to_string(),
                actual: aggregate.wwid.clone(),
            });
        }

        let mut surviving = Vec::new();
        for member in members {
            match self.host.probe().read_attr(&paths::device_state(member)) {
                Ok(state) if !HEALTHY_STATES.contains(&state.as_str()) => {
                    warn!(device = aggregate.sysfs_id, member, state, "skipping path");
                    continue;
                }
                Ok(_) => {}
                Err(error) => debug!(member, %error, "path state unreadable"),
            }

            match self.device_wwid(member).await {
                Ok(wwid) => surviving.push((member, wwid)),
                Err(error) => warn!(member, %error, "skipping path without readable wwid"),
            }
        }

        if surviving.is_empty() {
            warn!(device = aggregate.sysfs_id, "no usable paths left");
            return Ok(false);
        }

        if let Some((_, wwid)) = surviving.iter().find(|(_, wwid)| lun.is_contained_in(wwid)) {
            debug!(device = aggregate.sysfs_id, wwid, "multipath device verified");
            return Ok(true);
        }

        let (member, wwid) = &surviving[0];
        Err(ConnectorError::InconsistentWwn {
            device: member.to_string(),
            expected: lun.to_string(),
            actual: wwid.clone(),
        })
    }

    /// WWID of a physical path: `scsi_id` for SCSI disks, sysfs for NVMe namespaces.
    pub async fn device_wwid(&self, device: &str) -> Result<String> {
        if device.starts_with("nvme") {
            let wwid = self.host.probe().read_attr(&paths::wwid(device))?;
            if wwid.is_empty() {
                return Err(ConnectorError::parse("sysfs", format!("empty wwid for {device}")));
            }
            return Ok(wwid);
        }
        scsi_id::device_wwid(self.host.runner(), device).await
    }

    /// Delete SCSI paths left behind by UltraPath LUNs whose disk was removed.
    ///
    /// Returns the number of paths deleted. Hosts without UltraPath have
    /// nothing to clean.
    pub async fn clean_residual_vendor_paths(&self, variant: VendorVariant) -> Result<usize> {
        let runner = self.host.runner();
        let vluns = match upadmin::show_vluns(runner, variant).await {
            Ok(vluns) => vluns,
            Err(ConnectorError::ToolMissing(tool)) => {
                debug!(tool, "vendor multipath not installed, nothing to clean");
                return Ok(0);
            }
            Err(error) => return Err(error),
        };

        let mut removed = 0;
        for vlun in vluns.iter().filter(|vlun| vlun.is_residual()) {
            for hctl in upadmin::show_vlun_paths(runner, variant, vlun.id).await? {
                match self.host.probe().write(&paths::scsi_device_delete(&hctl), "1") {
                    Ok(()) => {
                        info!(vlun = vlun.id, %hctl, "deleted residual path");
                        removed += 1;
                    }
                    Err(error) if error.kind() == io::ErrorKind::NotFound => {
                        debug!(vlun = vlun.id, %hctl, "residual path already gone");
                    }
                    Err(error) => return Err(error.into()),
                }
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use lun_contracts::CommandOutput;
    use lun_testing::{FakeProbe, ScriptedRunner};

    use super::*;

    const LUN: &str = "6a0b1c2d00000003";
    const MAPS: &str = "name sysfs uuid\nmpatha dm-2 36a0b1c2d00000003\n";

    fn lun() -> LunId {
        LunId::new(LUN).expect("lun")
    }

    fn reconciler(runner: Arc<ScriptedRunner>, probe: Arc<FakeProbe>) -> MultipathReconciler {
        MultipathReconciler::new(Host::new(runner, probe), Duration::from_millis(100))
    }

    fn aggregate(members: &[&str]) -> DmAggregate {
        DmAggregate {
            name: "mpatha".to_string(),
            sysfs_id: "dm-2".to_string(),
            wwid: format!("3{LUN}"),
            members: members.iter().map(|m| m.to_string()).collect(),
        }
    }

    #[test]
    fn watch_state_follows_map_membership() {
        assert_eq!(WatchState::observe(None, 3), WatchState::Polling);
        assert_eq!(WatchState::observe(Some(2), 3), WatchState::Incomplete);
        assert_eq!(WatchState::observe(Some(3), 3), WatchState::Found);
        assert_eq!(WatchState::observe(Some(4), 3), WatchState::Found);
    }

    #[tokio::test]
    async fn watch_waits_for_late_map_to_fill_up() {
        let runner = Arc::new(ScriptedRunner::new());
        runner
            .on_after("multipathd show maps", Duration::ZERO, CommandOutput::ok("name sysfs uuid\n"))
            .on_after("multipathd show maps", Duration::from_millis(150), CommandOutput::ok(MAPS));
        let probe = Arc::new(FakeProbe::new());
        probe
            .set_dir("/sys/block/dm-2/slaves", &["sdb", "sdc"])
            .set_dir_after("/sys/block/dm-2/slaves", Duration::from_millis(200), &["sdb", "sdc", "sdd"]);

        let started = Instant::now();
        let aggregate = reconciler(runner.clone(), probe)
            .watch_dm_device(&lun(), 3, Duration::from_secs(10), &CancellationToken::new())
            .await
            .expect("converges");

        assert_eq!(aggregate.name, "mpatha");
        assert_eq!(aggregate.sysfs_id, "dm-2");
        assert_eq!(aggregate.members, vec!["sdb", "sdc", "sdd"]);
        assert!(started.elapsed() >= Duration::from_millis(150));
        assert!(runner.count("multipathd show maps") >= 3);
    }

    #[tokio::test]
    async fn watch_reports_incomplete_map_on_timeout() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.on("multipathd show maps", CommandOutput::ok(MAPS));
        let probe = Arc::new(FakeProbe::new());
        probe.set_dir("/sys/block/dm-2/slaves", &["sdb", "sdc"]);

        let error = reconciler(runner, probe)
            .watch_dm_device(&lun(), 3, Duration::from_millis(200), &CancellationToken::new())
            .await
            .expect_err("incomplete");

        assert!(matches!(
            error,
            ConnectorError::PathIncomplete { found: 2, expected: 3, ref device, .. } if device == "dm-2"
        ));
    }

    #[tokio::test]
    async fn watch_without_map_is_not_found() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.on("multipathd show maps", CommandOutput::ok("name sysfs uuid\n"));

        let error = reconciler(runner, Arc::new(FakeProbe::new()))
            .watch_dm_device(&lun(), 2, Duration::from_millis(200), &CancellationToken::new())
            .await
            .expect_err("not found");
        assert!(matches!(error, ConnectorError::VolumeNotFound(_)));
    }

    #[tokio::test]
    async fn watch_stops_when_cancelled() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.on("multipathd show maps", CommandOutput::ok("name sysfs uuid\n"));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let error = reconciler(runner, Arc::new(FakeProbe::new()))
            .watch_dm_device(&lun(), 2, Duration::from_secs(5), &cancel)
            .await
            .expect_err("cancelled");
        assert!(matches!(error, ConnectorError::Cancelled));
    }

    #[tokio::test]
    async fn verify_prunes_dead_paths_and_checks_wwid() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.on(
            "/lib/udev/scsi_id -g -u -d /dev/sdc",
            CommandOutput::ok(format!("3{LUN}\n")),
        );
        let probe = Arc::new(FakeProbe::new());
        probe
            .set_file("/sys/block/sdb/device/state", "offline\n")
            .set_file("/sys/block/sdc/device/state", "running\n");

        let members = vec!["sdb".to_string(), "sdc".to_string()];
        let available = reconciler(runner.clone(), probe)
            .verify_multipath_available(&aggregate(&["sdb", "sdc"]), &lun(), &members)
            .await
            .expect("verify");

        assert!(available);
        assert_eq!(runner.count("/lib/udev/scsi_id -g -u -d /dev/sdb"), 0);
    }

    #[tokio::test]
    async fn verify_without_usable_paths_is_unavailable() {
        let probe = Arc::new(FakeProbe::new());
        probe.set_file("/sys/block/sdb/device/state", "blocked");

        let available = reconciler(Arc::new(ScriptedRunner::new()), probe)
            .verify_multipath_available(&aggregate(&["sdb"]), &lun(), &["sdb".to_string()])
            .await
            .expect("verify");
        assert!(!available);
    }

    #[tokio::test]
    async fn verify_rejects_foreign_map_and_foreign_paths() {
        let reconciler = {
            let runner = Arc::new(ScriptedRunner::new());
            runner.on(
                "/lib/udev/scsi_id -g -u -d /dev/sdb",
                CommandOutput::ok("36a0b1c2d00000099"),
            );
            reconciler(runner, Arc::new(FakeProbe::new()))
        };

        let mut foreign = aggregate(&["sdb"]);
        foreign.wwid = "36a0b1c2d00000099".to_string();
        let error = reconciler
            .verify_multipath_available(&foreign, &lun(), &[])
            .await
            .expect_err("foreign map");
        assert!(matches!(error, ConnectorError::InconsistentWwn { ref device, .. } if device == "dm-2"));

        let error = reconciler
            .verify_multipath_available(&aggregate(&["sdb"]), &lun(), &["sdb".to_string()])
            .await
            .expect_err("foreign path");
        assert!(matches!(error, ConnectorError::InconsistentWwn { ref device, .. } if device == "sdb"));
    }

    #[tokio::test]
    async fn cleans_paths_of_deleted_vluns() {
        let runner = Arc::new(ScriptedRunner::new());
        runner
            .on(
                "upadmin show vlun",
                CommandOutput::ok(format!(
                    " 0 sdb lun01 {LUN} Normal\n 1 deleted lun02 6a0b1c2d00000004 Fault\n"
                )),
            )
            .on(
                "upadmin show vlun id=1",
                CommandOutput::ok(" Path 0 [7:0:0:2] (up-0) : Fault\n Path 1 [8:0:0:2] (up-1) : Fault\n"),
            );
        let probe = Arc::new(FakeProbe::new());
        probe.add_scsi_path("7:0:0:2".parse().expect("hctl"), "sdx");

        let removed = reconciler(runner.clone(), probe.clone())
            .clean_residual_vendor_paths(VendorVariant::Scsi)
            .await
            .expect("clean");

        assert_eq!(removed, 1);
        assert!(!probe.has_node("sdx"));
        assert_eq!(runner.count("upadmin show vlun id=0"), 0);
    }

    #[tokio::test]
    async fn cleaning_without_vendor_cli_is_a_no_op() {
        let removed = reconciler(Arc::new(ScriptedRunner::new()), Arc::new(FakeProbe::new()))
            .clean_residual_vendor_paths(VendorVariant::Scsi)
            .await
            .expect("clean");
        assert_eq!(removed, 0);
    }
}
