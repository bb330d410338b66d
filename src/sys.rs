//! Thin, safe wrappers over the unix process primitives lifeline needs.
//!
//! Every `unsafe` libc call of the crate lives here.

use std::io;
use std::os::fd::{FromRawFd, OwnedFd};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Observed state of a process id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    /// The process exists.
    Running,
    /// Our child exited and was reaped; its status is known.
    Exited {
        code: Option<i32>,
        signal: Option<i32>,
    },
    /// The process does not exist (or is not ours to reap); status unknown.
    Gone,
}

fn to_pid_t(pid: u32) -> Option<libc::pid_t> {
    libc::pid_t::try_from(pid).ok().filter(|p| *p > 0)
}

/// Checks `pid` without blocking, reaping it when it is an exited child of ours.
pub fn liveness(pid: u32) -> Liveness {
    let Some(raw) = to_pid_t(pid) else {
        return Liveness::Gone;
    };

    let mut status: libc::c_int = 0;
    loop {
        // SAFETY: waitpid with WNOHANG and a valid out-pointer never blocks and
        // only touches `status`.
        let rc = unsafe { libc::waitpid(raw, &mut status, libc::WNOHANG) };
        if rc == raw {
            return decode_status(status);
        }
        if rc == 0 {
            return Liveness::Running;
        }
        if io::Error::last_os_error().kind() == io::ErrorKind::Interrupted {
            continue;
        }
        // ECHILD: not our child, fall through to a signal-0 probe.
        break;
    }

    // SAFETY: signal 0 performs only the existence/permission check.
    let rc = unsafe { libc::kill(raw, 0) };
    if rc == 0 {
        return Liveness::Running;
    }
    match io::Error::last_os_error().raw_os_error() {
        Some(libc::EPERM) => Liveness::Running,
        _ => Liveness::Gone,
    }
}

fn decode_status(status: libc::c_int) -> Liveness {
    if libc::WIFEXITED(status) {
        Liveness::Exited {
            code: Some(libc::WEXITSTATUS(status)),
            signal: None,
        }
    } else if libc::WIFSIGNALED(status) {
        Liveness::Exited {
            code: None,
            signal: Some(libc::WTERMSIG(status)),
        }
    } else {
        Liveness::Exited {
            code: None,
            signal: None,
        }
    }
}

/// Sends `signal` to `pid`. A vanished process is not an error.
pub fn send_signal(pid: u32, signal: libc::c_int) -> io::Result<()> {
    let Some(raw) = to_pid_t(pid) else {
        return Ok(());
    };
    // SAFETY: kill has no memory-safety preconditions.
    let rc = unsafe { libc::kill(raw, signal) };
    if rc == 0 {
        return Ok(());
    }
    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        return Ok(());
    }
    Err(err)
}

/// Returns the pid of the current process.
pub fn current_pid() -> u32 {
    std::process::id()
}

/// Whether `path` is a regular file with at least one execute bit set.
pub fn is_executable(path: &Path) -> io::Result<bool> {
    let meta = std::fs::metadata(path)?;
    Ok(meta.is_file() && meta.permissions().mode() & 0o111 != 0)
}

/// Opens a pidfd for `pid` (Linux 5.3+).
#[cfg(target_os = "linux")]
pub fn pidfd_open(pid: u32) -> io::Result<OwnedFd> {
    let Some(raw) = to_pid_t(pid) else {
        return Err(io::Error::from_raw_os_error(libc::ESRCH));
    };
    // SAFETY: pidfd_open takes a pid and flags, returns a new fd or -1.
    let fd = unsafe { libc::syscall(libc::SYS_pidfd_open, raw, 0) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: the kernel just handed us ownership of this descriptor.
    Ok(unsafe { OwnedFd::from_raw_fd(fd as libc::c_int) })
}

/// Creates a new kqueue descriptor.
#[cfg(any(
    target_os = "macos",
    target_os = "freebsd",
    target_os = "openbsd",
    target_os = "netbsd",
    target_os = "dragonfly"
))]
pub fn kqueue() -> io::Result<OwnedFd> {
    // SAFETY: kqueue takes no arguments and returns a new fd or -1.
    let fd = unsafe { libc::kqueue() };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: fresh descriptor owned by us.
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

/// Registers a one-shot `NOTE_EXIT` filter for `pid` on `kq`.
#[cfg(any(
    target_os = "macos",
    target_os = "freebsd",
    target_os = "openbsd",
    target_os = "netbsd",
    target_os = "dragonfly"
))]
pub fn kqueue_watch_exit(kq: &OwnedFd, pid: u32) -> io::Result<()> {
    use std::os::fd::AsRawFd;

    // SAFETY: kevent is plain-old-data; all-zero is a valid starting value.
    let mut change: libc::kevent = unsafe { std::mem::zeroed() };
    change.ident = pid as _;
    change.filter = libc::EVFILT_PROC as _;
    change.flags = (libc::EV_ADD | libc::EV_ONESHOT) as _;
    change.fflags = libc::NOTE_EXIT as _;

    // SAFETY: one valid change record, no output buffer, null timeout.
    let rc = unsafe {
        libc::kevent(
            kq.as_raw_fd(),
            &change,
            1,
            std::ptr::null_mut(),
            0,
            std::ptr::null(),
        )
    };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Waits up to `timeout` for exit notifications on `kq`; returns exited pids.
#[cfg(any(
    target_os = "macos",
    target_os = "freebsd",
    target_os = "openbsd",
    target_os = "netbsd",
    target_os = "dragonfly"
))]
pub fn kqueue_drain(kq: &OwnedFd, timeout: std::time::Duration) -> io::Result<Vec<u32>> {
    use std::os::fd::AsRawFd;

    const BATCH: usize = 16;
    // SAFETY: zeroed kevent records are valid output slots.
    let mut events: [libc::kevent; BATCH] = unsafe { std::mem::zeroed() };
    let ts = libc::timespec {
        tv_sec: timeout.as_secs() as _,
        tv_nsec: timeout.subsec_nanos() as _,
    };
    // SAFETY: output buffer of BATCH records, valid timeout pointer.
    let n = unsafe {
        libc::kevent(
            kq.as_raw_fd(),
            std::ptr::null(),
            0,
            events.as_mut_ptr(),
            BATCH as _,
            &ts,
        )
    };
    if n < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            return Ok(Vec::new());
        }
        return Err(err);
    }
    Ok(events[..n as usize]
        .iter()
        .filter(|ev| ev.filter == libc::EVFILT_PROC as _)
        .map(|ev| ev.ident as u32)
        .collect())
}

/// Lists pids of all processes visible to us.
#[cfg(target_os = "linux")]
pub fn list_pids() -> io::Result<Vec<u32>> {
    let mut pids = Vec::new();
    for entry in std::fs::read_dir("/proc")? {
        let entry = entry?;
        if let Some(pid) = entry.file_name().to_str().and_then(|s| s.parse::<u32>().ok()) {
            pids.push(pid);
        }
    }
    Ok(pids)
}

/// Resolves the executable image of `pid`.
#[cfg(target_os = "linux")]
pub fn executable_of(pid: u32) -> Option<PathBuf> {
    let link = std::fs::read_link(format!("/proc/{pid}/exe")).ok()?;
    // Replaced binaries show up as "<path> (deleted)".
    let text = link.to_string_lossy();
    match text.strip_suffix(" (deleted)") {
        Some(stripped) => Some(PathBuf::from(stripped)),
        None => Some(link),
    }
}

#[cfg(target_os = "macos")]
pub fn list_pids() -> io::Result<Vec<u32>> {
    // SAFETY: a null buffer asks for the number of pids.
    let count = unsafe { libc::proc_listallpids(std::ptr::null_mut(), 0) };
    if count <= 0 {
        return Err(io::Error::last_os_error());
    }
    let mut buf: Vec<libc::c_int> = vec![0; count as usize + 64];
    let bytes = (buf.len() * std::mem::size_of::<libc::c_int>()) as libc::c_int;
    // SAFETY: buffer is valid for `bytes` bytes.
    let n = unsafe { libc::proc_listallpids(buf.as_mut_ptr().cast(), bytes) };
    if n <= 0 {
        return Err(io::Error::last_os_error());
    }
    buf.truncate(n as usize);
    Ok(buf.into_iter().filter(|p| *p > 0).map(|p| p as u32).collect())
}

#[cfg(target_os = "macos")]
pub fn executable_of(pid: u32) -> Option<PathBuf> {
    use std::os::unix::ffi::OsStrExt;

    let raw = to_pid_t(pid)?;
    let mut buf = vec![0u8; libc::PROC_PIDPATHINFO_MAXSIZE as usize];
    // SAFETY: buffer is valid for its full length.
    let n = unsafe { libc::proc_pidpath(raw, buf.as_mut_ptr().cast(), buf.len() as u32) };
    if n <= 0 {
        return None;
    }
    buf.truncate(n as usize);
    Some(PathBuf::from(std::ffi::OsStr::from_bytes(&buf)))
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
pub fn list_pids() -> io::Result<Vec<u32>> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "process enumeration not supported on this platform",
    ))
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
pub fn executable_of(_pid: u32) -> Option<PathBuf> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_self_is_running() {
        assert_eq!(liveness(current_pid()), Liveness::Running);
    }

    #[test]
    fn test_probe_invalid_pid_is_gone() {
        assert_eq!(liveness(0), Liveness::Gone);
        assert_eq!(liveness(u32::MAX), Liveness::Gone);
    }

    #[test]
    fn test_probe_reaps_exited_child_with_code() {
        let child = std::process::Command::new("/bin/sh")
            .args(["-c", "exit 3"])
            .spawn()
            .unwrap();
        let pid = child.id();
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        loop {
            match liveness(pid) {
                Liveness::Running if std::time::Instant::now() < deadline => {
                    std::thread::sleep(std::time::Duration::from_millis(10));
                }
                other => {
                    assert_eq!(
                        other,
                        Liveness::Exited {
                            code: Some(3),
                            signal: None
                        }
                    );
                    break;
                }
            }
        }
        // Already reaped: no longer ours, no longer there.
        assert_eq!(liveness(pid), Liveness::Gone);
    }

    #[test]
    fn test_is_executable() {
        assert!(is_executable(Path::new("/bin/sh")).unwrap());
        let dir = tempfile::tempdir().unwrap();
        let plain = dir.path().join("plain");
        std::fs::write(&plain, b"data").unwrap();
        assert!(!is_executable(&plain).unwrap());
        assert!(!is_executable(dir.path()).unwrap());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_executable_of_self() {
        let exe = executable_of(current_pid()).unwrap();
        assert_eq!(exe, std::env::current_exe().unwrap());
    }
}
