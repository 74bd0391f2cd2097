//! OS process-table queries.

use std::path::Path;

use sysinfo::{ProcessRefreshKind, RefreshKind, System, UpdateKind};

/// Whether a process with `pid` currently exists.
///
/// A pid that exists but belongs to another user still counts as alive.
#[cfg(unix)]
#[must_use]
pub fn process_alive(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    if raw <= 0 {
        return false;
    }
    match kill(Pid::from_raw(raw), None) {
        Ok(()) | Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
#[must_use]
pub fn process_alive(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }
    let system = System::new_with_specifics(
        RefreshKind::new().with_processes(ProcessRefreshKind::new()),
    );
    system.process(sysinfo::Pid::from_u32(pid)).is_some()
}

/// Pids of running processes whose executable is `exe`, minus `exclude_pid`.
#[must_use]
pub fn find_by_executable(exe: &Path, exclude_pid: u32) -> Vec<u32> {
    let system = System::new_with_specifics(
        RefreshKind::new()
            .with_processes(ProcessRefreshKind::new().with_exe(UpdateKind::Always)),
    );
    let wanted = exe.canonicalize().unwrap_or_else(|_| exe.to_path_buf());

    let mut pids: Vec<u32> = system
        .processes()
        .iter()
        .filter(|(pid, _)| pid.as_u32() != exclude_pid)
        .filter(|(_, process)| {
            process.exe().is_some_and(|candidate| {
                candidate == wanted.as_path() || candidate == exe
            })
        })
        .map(|(pid, _)| pid.as_u32())
        .collect();
    pids.sort_unstable();
    pids
}
