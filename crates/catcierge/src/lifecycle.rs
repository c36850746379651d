//! Process lifecycle: signals, PID file, privilege dropping.
//!
//! Signal handlers only flip atomics; everything else happens from the
//! main loop when it next looks at the flags.

use anyhow::{bail, Context, Result};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use tracing::{error, info};

static SIGINT_COUNT: AtomicU32 = AtomicU32::new(0);
static SIGUSR1_PENDING: AtomicBool = AtomicBool::new(false);
static SIGUSR2_PENDING: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_signal(signo: libc::c_int) {
    match signo {
        libc::SIGINT => {
            SIGINT_COUNT.fetch_add(1, Ordering::SeqCst);
        }
        libc::SIGUSR1 => SIGUSR1_PENDING.store(true, Ordering::SeqCst),
        libc::SIGUSR2 => SIGUSR2_PENDING.store(true, Ordering::SeqCst),
        _ => {}
    }
}

/// Install the SIGINT/SIGUSR1/SIGUSR2 handlers.
pub fn install_signal_handlers() -> Result<()> {
    let handler = handle_signal as extern "C" fn(libc::c_int) as libc::sighandler_t;
    unsafe {
        for signo in [libc::SIGINT, libc::SIGUSR1, libc::SIGUSR2] {
            if libc::signal(signo, handler) == libc::SIG_ERR {
                bail!("failed to install handler for signal {signo}");
            }
        }
    }
    Ok(())
}

/// Number of SIGINTs received so far.
pub fn sigint_count() -> u32 {
    SIGINT_COUNT.load(Ordering::SeqCst)
}

/// Consume a pending SIGUSR1.
pub fn take_sigusr1() -> bool {
    SIGUSR1_PENDING.swap(false, Ordering::SeqCst)
}

/// Consume a pending SIGUSR2.
pub fn take_sigusr2() -> bool {
    SIGUSR2_PENDING.swap(false, Ordering::SeqCst)
}

#[cfg(test)]
pub fn reset_signals_for_test() {
    SIGINT_COUNT.store(0, Ordering::SeqCst);
    SIGUSR1_PENDING.store(false, Ordering::SeqCst);
    SIGUSR2_PENDING.store(false, Ordering::SeqCst);
}

/// An exclusively locked PID file. The lock and the file go away when
/// this is dropped.
pub struct PidFile {
    _file: File,
    path: PathBuf,
}

impl PidFile {
    /// Create and lock the PID file, refusing to start when another
    /// instance holds the lock.
    pub fn create(path: &Path) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .with_context(|| format!("failed to open PID file {}", path.display()))?;

        let fd = file.as_raw_fd();

        unsafe {
            // FD_CLOEXEC so spawned event commands don't inherit the lock.
            let flags = libc::fcntl(fd, libc::F_GETFD);
            if flags != -1 {
                libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC);
            }

            let mut fl: libc::flock = std::mem::zeroed();
            fl.l_type = libc::F_WRLCK as libc::c_short;
            fl.l_whence = libc::SEEK_SET as libc::c_short;

            if libc::fcntl(fd, libc::F_SETLK, &fl) == -1 {
                let errno = std::io::Error::last_os_error();
                if matches!(errno.raw_os_error(), Some(libc::EAGAIN) | Some(libc::EACCES)) {
                    bail!(
                        "PID file {} is locked; catcierge is probably already running",
                        path.display()
                    );
                }
                bail!("unable to lock PID file {}: {errno}", path.display());
            }

            if libc::ftruncate(fd, 0) == -1 {
                bail!("failed to truncate PID file {}", path.display());
            }
        }

        writeln!(file, "{}", std::process::id())
            .with_context(|| format!("failed to write PID file {}", path.display()))?;

        info!(path = %path.display(), pid = std::process::id(), "created PID file");

        Ok(Self {
            _file: file,
            path: path.to_path_buf(),
        })
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        std::fs::remove_file(&self.path).ok();
    }
}

/// Drop root privileges to the given user. A no-op when not running as
/// root.
pub fn drop_privileges(user: &str) -> Result<()> {
    unsafe {
        if libc::getuid() != 0 {
            info!("not running as root (no privileges to drop)");
            return Ok(());
        }

        let c_user = std::ffi::CString::new(user).context("bad user name")?;
        let pw = libc::getpwnam(c_user.as_ptr());
        if pw.is_null() {
            bail!("no such user \"{user}\"");
        }

        let uid = (*pw).pw_uid;
        let gid = (*pw).pw_gid;

        if libc::initgroups(c_user.as_ptr(), gid as _) != 0
            || libc::setgid(gid) != 0
            || libc::setuid(uid) != 0
        {
            let errno = std::io::Error::last_os_error();
            error!("failed to drop root privileges to '{user}' uid={uid} gid={gid}: {errno}");
            bail!("failed to drop root privileges to \"{user}\"");
        }

        info!(user, uid, gid, "root privileges dropped");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pid_file_is_written_and_removed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catcierge.pid");

        {
            let _pid = PidFile::create(&path).unwrap();
            let contents = std::fs::read_to_string(&path).unwrap();
            let pid: u32 = contents.trim().parse().unwrap();
            assert_eq!(pid, std::process::id());
        }

        // Dropped: file is gone.
        assert!(!path.exists());
    }

    #[test]
    fn test_signal_flags_roundtrip() {
        reset_signals_for_test();
        assert_eq!(sigint_count(), 0);
        assert!(!take_sigusr1());

        handle_signal(libc::SIGINT);
        handle_signal(libc::SIGINT);
        assert_eq!(sigint_count(), 2);

        handle_signal(libc::SIGUSR1);
        assert!(take_sigusr1());
        assert!(!take_sigusr1());

        handle_signal(libc::SIGUSR2);
        assert!(take_sigusr2());
        reset_signals_for_test();
    }
}
