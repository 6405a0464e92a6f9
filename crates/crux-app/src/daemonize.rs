//! POSIX daemonization (spec §4.F "Daemonization"; spec §6.6 "Daemon PID
//! file"): double-fork, become session leader, set umask/working directory,
//! optionally close inherited descriptors, write the PID file. Grounded on
//! `original_source/src/application.cpp`'s raw `fork`/`setsid` sequence; we
//! drive it through `nix` rather than hand-rolled libc FFI.

use std::path::Path;

use thiserror::Error;

use crate::config::DaemonConfig;

#[cfg(unix)]
#[derive(Debug, Error)]
pub enum DaemonizeError {
    #[error("first fork failed: {0}")]
    FirstFork(#[source] nix::Error),
    #[error("failed to become session leader: {0}")]
    Setsid(#[source] nix::Error),
    #[error("second fork failed: {0}")]
    SecondFork(#[source] nix::Error),
    #[error("chdir to '{path}' failed: {source}")]
    Chdir {
        path: String,
        #[source]
        source: nix::Error,
    },
    #[error("failed to resolve user '{0}'")]
    UnknownUser(String),
    #[error("failed to resolve group '{0}'")]
    UnknownGroup(String),
    #[error("failed to drop privileges: {0}")]
    DropPrivileges(#[source] nix::Error),
    #[error("failed to write PID file '{path}': {source}")]
    PidFile {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("daemonization requires the 'daemonize' cargo feature")]
    FeatureDisabled,
}

#[cfg(not(unix))]
#[derive(Debug, Error)]
pub enum DaemonizeError {
    #[error("daemonization is only supported on unix targets")]
    UnsupportedPlatform,
}

/// Runs the fork/setsid/umask/chdir/close-fds/pid-file sequence described in
/// spec §4.F. Must be called before any reactor is started — a reactor's
/// Tokio runtime and the threads it will later spawn are not fork-safe.
/// Returns once this process is the surviving daemon; the two intermediate
/// parents exit via [`std::process::exit`] and never return from this call.
#[cfg(all(unix, feature = "daemonize"))]
pub fn daemonize(cfg: &DaemonConfig) -> Result<(), DaemonizeError> {
    use nix::sys::stat::{umask, Mode};
    use nix::unistd::{chdir, fork, setsid, ForkResult};

    // First fork detaches from the invoking shell's process group.
    match unsafe { fork() }.map_err(DaemonizeError::FirstFork)? {
        ForkResult::Parent { .. } => std::process::exit(0),
        ForkResult::Child => {}
    }

    setsid().map_err(DaemonizeError::Setsid)?;

    // Second fork guarantees the daemon can never reacquire a controlling
    // terminal (only a session leader can do that, and we just gave up
    // being one).
    match unsafe { fork() }.map_err(DaemonizeError::SecondFork)? {
        ForkResult::Parent { .. } => std::process::exit(0),
        ForkResult::Child => {}
    }

    umask(Mode::from_bits_truncate(cfg.umask as nix::sys::stat::mode_t));

    chdir(&cfg.work_dir).map_err(|source| DaemonizeError::Chdir {
        path: cfg.work_dir.display().to_string(),
        source,
    })?;

    if let Some(group) = &cfg.group {
        set_group(group)?;
    }
    if let Some(user) = &cfg.user {
        set_user(user)?;
    }

    if cfg.close_inherited_fds {
        close_standard_fds();
    }

    write_pid_file(&cfg.pid_file)?;

    Ok(())
}

#[cfg(all(unix, not(feature = "daemonize")))]
pub fn daemonize(_cfg: &DaemonConfig) -> Result<(), DaemonizeError> {
    Err(DaemonizeError::FeatureDisabled)
}

#[cfg(not(unix))]
pub fn daemonize(_cfg: &DaemonConfig) -> Result<(), DaemonizeError> {
    Err(DaemonizeError::UnsupportedPlatform)
}

#[cfg(all(unix, feature = "daemonize"))]
fn set_user(name: &str) -> Result<(), DaemonizeError> {
    use nix::unistd::{setuid, User};
    let user = User::from_name(name)
        .map_err(DaemonizeError::DropPrivileges)?
        .ok_or_else(|| DaemonizeError::UnknownUser(name.to_string()))?;
    setuid(user.uid).map_err(DaemonizeError::DropPrivileges)
}

#[cfg(all(unix, feature = "daemonize"))]
fn set_group(name: &str) -> Result<(), DaemonizeError> {
    use nix::unistd::{setgid, Group};
    let group = Group::from_name(name)
        .map_err(DaemonizeError::DropPrivileges)?
        .ok_or_else(|| DaemonizeError::UnknownGroup(name.to_string()))?;
    setgid(group.gid).map_err(DaemonizeError::DropPrivileges)
}

/// Redirects stdin/stdout/stderr to `/dev/null`, matching the original's
/// "close inherited descriptors" step so a detached daemon holds no
/// reference to whatever terminal launched it.
#[cfg(all(unix, feature = "daemonize"))]
fn close_standard_fds() {
    use nix::unistd::dup2;
    use std::fs::OpenOptions;
    use std::os::fd::AsRawFd;

    let Ok(dev_null) = OpenOptions::new().read(true).write(true).open("/dev/null") else {
        return;
    };
    let fd = dev_null.as_raw_fd();
    for target in [0, 1, 2] {
        let _ = dup2(fd, target);
    }
}

/// Writes the PID file per spec §6.6: the process id as ASCII plus a
/// trailing newline.
#[cfg(all(unix, feature = "daemonize"))]
fn write_pid_file(path: &Path) -> Result<(), DaemonizeError> {
    std::fs::write(path, format!("{}\n", std::process::id())).map_err(|source| DaemonizeError::PidFile {
        path: path.display().to_string(),
        source,
    })
}

/// Removes the PID file if present; a missing file is not an error (spec
/// §6.6 "removed on graceful shutdown and on destruction").
pub fn remove_pid_file(path: &Path) {
    if let Err(err) = std::fs::remove_file(path) {
        if err.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %err, "failed to remove PID file");
        }
    }
}
