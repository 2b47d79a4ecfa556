// sysinfo-backed host reads: processes, owners, disks, temperature sensors, memory

use crate::models::{DiskInfo, MemoryStats};
use std::collections::HashSet;
use std::ffi::OsString;
use sysinfo::{
    Components, Disks, Pid, ProcessRefreshKind, ProcessesToUpdate, System, UpdateKind, Users,
};

/// Minimum filesystem size reported by disk enumeration.
pub const MIN_DISK_BYTES: u64 = 50 * 1024 * 1024;

/// Maximum command line length kept for a process.
const MAX_CMDLINE_LEN: usize = 256;

/// Filesystem types never reported as disks.
pub const PSEUDO_FILESYSTEMS: &[&str] = &[
    "tmpfs",
    "devtmpfs",
    "sysfs",
    "proc",
    "cgroup",
    "cgroup2",
    "overlay",
    "nsfs",
    "fuse.lxcfs",
    "squashfs",
    "devpts",
    "securityfs",
    "pstore",
    "efivarfs",
    "bpf",
    "tracefs",
    "debugfs",
    "hugetlbfs",
    "mqueue",
    "configfs",
    "fusectl",
    "autofs",
    "ramfs",
    "rpc_pipefs",
    "nfsd",
    "fuse.gvfsd-fuse",
];

/// Process fields needed for ranking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawProcess {
    pub pid: i32,
    pub name: String,
    /// Accumulated user + system CPU time in milliseconds.
    pub cpu_time_ms: u64,
    pub memory_bytes: u64,
}

/// Argv joined by spaces, capped in length.
pub fn join_cmdline(args: &[OsString]) -> String {
    let joined = args
        .iter()
        .map(|a| a.to_string_lossy())
        .collect::<Vec<_>>()
        .join(" ");
    let trimmed = joined.trim();
    match trimmed.char_indices().nth(MAX_CMDLINE_LEN) {
        Some((idx, _)) => trimmed[..idx].to_string(),
        None => trimmed.to_string(),
    }
}

/// Drops pseudo and device-less filesystems, keeps the first mount of each device,
/// drops filesystems below [`MIN_DISK_BYTES`], and sorts by mount point.
pub fn select_disks(candidates: impl IntoIterator<Item = DiskInfo>) -> Vec<DiskInfo> {
    let mut seen_devices = HashSet::new();
    let mut disks: Vec<DiskInfo> = candidates
        .into_iter()
        .filter(|d| !PSEUDO_FILESYSTEMS.contains(&d.fs_type.as_str()) && d.device.starts_with('/'))
        .filter(|d| seen_devices.insert(d.device.clone()))
        .filter(|d| d.total_bytes >= MIN_DISK_BYTES)
        .collect();
    disks.sort_by(|a, b| a.mount_point.cmp(&b.mount_point));
    disks
}

/// Maximum sensor reading in °C (one decimal) and whether any sensor reported at all.
pub fn max_temperature(readings: impl IntoIterator<Item = Option<f32>>) -> (f64, bool) {
    let max = readings
        .into_iter()
        .flatten()
        .filter(|t| t.is_finite())
        .fold(None, |acc: Option<f32>, t| Some(acc.map_or(t, |m| m.max(t))));
    match max {
        Some(t) => ((f64::from(t) * 10.0).round() / 10.0, true),
        None => (0.0, false),
    }
}

/// Long-lived sysinfo handles, refreshed in place on every read.
pub struct HostInfo {
    sys: System,
    disks: Disks,
    components: Components,
    users: Users,
}

impl Default for HostInfo {
    fn default() -> Self {
        Self::new()
    }
}

impl HostInfo {
    pub fn new() -> Self {
        let mut sys = System::new();
        sys.refresh_memory();
        Self {
            sys,
            disks: Disks::new_with_refreshed_list(),
            components: Components::new_with_refreshed_list(),
            users: Users::new_with_refreshed_list(),
        }
    }

    pub fn memory(&mut self) -> MemoryStats {
        self.sys.refresh_memory();
        let total = self.sys.total_memory();
        MemoryStats {
            used_bytes: total.saturating_sub(self.sys.available_memory()),
            total_bytes: total,
        }
    }

    /// Rescans the process table. Exited processes are dropped from sysinfo's table too.
    pub fn processes(&mut self) -> Vec<RawProcess> {
        self.sys.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing()
                .with_cpu()
                .with_memory()
                .with_cmd(UpdateKind::OnlyIfNotSet)
                .with_user(UpdateKind::OnlyIfNotSet),
        );
        self.sys
            .processes()
            .values()
            // Threads show up as tasks of their process on Linux.
            .filter(|p| p.thread_kind().is_none())
            .filter_map(|p| {
                Some(RawProcess {
                    pid: i32::try_from(p.pid().as_u32()).ok()?,
                    name: p.name().to_string_lossy().into_owned(),
                    cpu_time_ms: p.accumulated_cpu_time(),
                    memory_bytes: p.memory(),
                })
            })
            .collect()
    }

    /// Command line and owner of a process from the last scan. The owner falls back to
    /// the numeric UID when it has no passwd entry.
    pub fn describe(&self, pid: i32) -> (String, String) {
        let Ok(raw) = u32::try_from(pid) else {
            return (String::new(), String::new());
        };
        let Some(process) = self.sys.process(Pid::from_u32(raw)) else {
            return (String::new(), String::new());
        };
        let user = match process.user_id() {
            Some(uid) => self
                .users
                .get_user_by_id(uid)
                .map(|u| u.name().to_string())
                .unwrap_or_else(|| (**uid).to_string()),
            None => String::new(),
        };
        (join_cmdline(process.cmd()), user)
    }

    pub fn disks(&mut self) -> Vec<DiskInfo> {
        self.disks.refresh(true);
        select_disks(self.disks.list().iter().map(|d| {
            let total = d.total_space();
            DiskInfo {
                mount_point: d.mount_point().to_string_lossy().into_owned(),
                device: d.name().to_string_lossy().into_owned(),
                fs_type: d.file_system().to_string_lossy().into_owned(),
                used_bytes: total.saturating_sub(d.available_space()),
                total_bytes: total,
            }
        }))
    }

    pub fn temperature(&mut self) -> (f64, bool) {
        self.components.refresh(false);
        max_temperature(self.components.list().iter().map(|c| c.temperature()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn disk(mount_point: &str, device: &str, fs_type: &str, total_bytes: u64) -> DiskInfo {
        DiskInfo {
            mount_point: mount_point.into(),
            device: device.into(),
            fs_type: fs_type.into(),
            used_bytes: 0,
            total_bytes,
        }
    }

    #[test]
    fn cmdline_is_joined_and_capped() {
        let args: Vec<OsString> = vec!["/usr/bin/foo".into(), "--bar".into(), "baz".into()];
        assert_eq!(join_cmdline(&args), "/usr/bin/foo --bar baz");
        let long = vec![OsString::from("a".repeat(400))];
        assert_eq!(join_cmdline(&long).len(), 256);
        assert_eq!(join_cmdline(&[]), "");
    }

    #[test]
    fn disks_skip_pseudo_and_non_device_sources() {
        let disks = select_disks([
            disk("/", "/dev/sda1", "ext4", 1 << 40),
            disk("/proc", "proc", "proc", 1 << 40),
            disk("/run", "tmpfs", "tmpfs", 1 << 40),
            disk("/var/lib/docker/overlay2/x/merged", "overlay", "overlay", 1 << 40),
            disk("/mnt/my disk", "/dev/sdb1", "xfs", 1 << 40),
            disk("/boot/efi", "systemd-1", "autofs", 1 << 40),
        ]);
        let mount_points: Vec<_> = disks.iter().map(|d| d.mount_point.as_str()).collect();
        assert_eq!(mount_points, vec!["/", "/mnt/my disk"]);
    }

    #[test]
    fn disks_deduplicate_by_device_and_drop_small_filesystems() {
        let disks = select_disks([
            disk("/srv", "/dev/sdb1", "ext4", MIN_DISK_BYTES),
            disk("/", "/dev/sda1", "ext4", 100 << 30),
            disk("/var/lib/bind", "/dev/sda1", "ext4", 100 << 30),
            disk("/boot", "/dev/sdc1", "vfat", MIN_DISK_BYTES - 1),
        ]);
        let mount_points: Vec<_> = disks.iter().map(|d| d.mount_point.as_str()).collect();
        assert_eq!(mount_points, vec!["/", "/srv"]);
        assert_eq!(disks.iter().filter(|d| d.device == "/dev/sda1").count(), 1);
    }

    #[test]
    fn temperature_reports_max_and_presence() {
        assert_eq!(max_temperature([Some(41.0), None, Some(55.25)]), (55.3, true));
        assert_eq!(max_temperature([Some(0.0)]), (0.0, true));
        assert_eq!(max_temperature([None, None]), (0.0, false));
        assert_eq!(max_temperature(std::iter::empty()), (0.0, false));
        assert_eq!(max_temperature([Some(f32::NAN)]), (0.0, false));
    }

    #[test]
    fn own_process_is_listed_and_described() {
        let mut host = HostInfo::new();
        let me = std::process::id() as i32;
        let procs = host.processes();
        let own = procs.iter().find(|p| p.pid == me).expect("own pid listed");
        assert!(own.memory_bytes > 0);
        assert!(!own.name.is_empty());

        let (command, user) = host.describe(me);
        assert!(!command.is_empty());
        assert!(!user.is_empty());
        assert_eq!(host.describe(-1), (String::new(), String::new()));
    }
}
