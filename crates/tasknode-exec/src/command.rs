use std::ffi::CString;
use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;
use tracing::debug;

use crate::error::{ExecError, Result};

/// Upper bound for the `getpwnam_r` scratch buffer.
const MAX_PASSWD_BUF: usize = 1 << 20;

/// What to launch and how.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    /// Passed to `/bin/sh -c`.
    pub command: String,
    /// Working directory, applied only when it exists.
    pub dir: String,
    /// `KEY=VALUE` pairs. A non-empty list replaces the inherited environment.
    pub env: Vec<String>,
    /// Account to run as. Unknown names fall back to the agent's own identity.
    pub user: String,
}

impl CommandSpec {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Default::default()
        }
    }

    pub fn dir(mut self, dir: impl Into<String>) -> Self {
        self.dir = dir.into();
        self
    }

    pub fn env(mut self, env: Vec<String>) -> Self {
        self.env = env;
        self
    }

    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    /// Build the child command: own process group, piped stdout/stderr,
    /// killed if the handle is dropped.
    pub fn build(&self) -> Result<Command> {
        if self.command.trim().is_empty() {
            return Err(ExecError::EmptyCommand);
        }

        let mut cmd = Command::new("/bin/sh");
        cmd.arg("-c")
            .arg(&self.command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true);

        if !self.dir.is_empty() && Path::new(&self.dir).is_dir() {
            cmd.current_dir(&self.dir);
        }

        if !self.env.is_empty() {
            cmd.env_clear();
            for pair in &self.env {
                if let Some((key, value)) = pair.split_once('=') {
                    cmd.env(key, value);
                }
            }
        }

        if !self.user.is_empty() {
            match lookup_user(&self.user) {
                Some((uid, gid)) => {
                    cmd.uid(uid).gid(gid);
                }
                None => debug!(user = %self.user, "user not found, running as self"),
            }
        }

        Ok(cmd)
    }
}

/// Resolve an account name to `(uid, gid)`.
pub fn lookup_user(name: &str) -> Option<(u32, u32)> {
    let cname = CString::new(name).ok()?;
    let mut buf_len = 1024;
    loop {
        let mut buf = vec![0 as libc::c_char; buf_len];
        // SAFETY: zeroed is a valid bit pattern for `passwd` (integers and
        // null pointers); getpwnam_r fills it in on success.
        let mut pwd: libc::passwd = unsafe { std::mem::zeroed() };
        let mut result: *mut libc::passwd = std::ptr::null_mut();
        // SAFETY: every pointer references a live local of the right size.
        let rc = unsafe {
            libc::getpwnam_r(
                cname.as_ptr(),
                &mut pwd,
                buf.as_mut_ptr(),
                buf.len(),
                &mut result,
            )
        };
        if rc == libc::ERANGE && buf_len < MAX_PASSWD_BUF {
            buf_len *= 2;
            continue;
        }
        if rc != 0 || result.is_null() {
            return None;
        }
        return Some((pwd.pw_uid, pwd.pw_gid));
    }
}

/// SIGKILL the whole process group led by `pid`.
pub fn kill_group(pid: u32) {
    let Ok(pgid) = libc::pid_t::try_from(pid) else {
        return;
    };
    // SAFETY: killpg has no memory-safety preconditions. The group was
    // created by `process_group(0)` at spawn, so pgid == pid.
    let rc = unsafe { libc::killpg(pgid, libc::SIGKILL) };
    if rc != 0 {
        debug!(pid, error = %std::io::Error::last_os_error(), "killpg failed");
    }
}
