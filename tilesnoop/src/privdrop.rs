//! Dropping root privileges after the capture device is open.

use std::ffi::CString;

use thiserror::Error;
use tracing::info;

/// Errors from privilege dropping.
#[derive(Debug, Error)]
pub enum PrivDropError {
    #[error("Invalid user name: {0}")]
    InvalidName(String),

    #[error("Unknown user: {0}")]
    UnknownUser(String),

    #[error("{call} failed: {source}")]
    Syscall {
        call: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("Root privileges could be regained after dropping to {0}")]
    Regainable(String),
}

/// Switch the process to `user`'s uid and gid and clear supplementary
/// groups.
pub fn drop_privileges(user: &str) -> Result<(), PrivDropError> {
    let name = CString::new(user).map_err(|_| PrivDropError::InvalidName(user.to_string()))?;

    // SAFETY: getpwnam returns a pointer into static storage, read at once
    let (uid, gid) = unsafe {
        let pwd = libc::getpwnam(name.as_ptr());
        if pwd.is_null() {
            return Err(PrivDropError::UnknownUser(user.to_string()));
        }
        ((*pwd).pw_uid, (*pwd).pw_gid)
    };

    // SAFETY: plain syscalls on integer arguments
    unsafe {
        if libc::geteuid() == 0 {
            check("setgroups", libc::setgroups(0, std::ptr::null()))?;
        }
        check("setregid", libc::setregid(gid, gid))?;
        check("setreuid", libc::setreuid(uid, uid))?;
    }

    if uid != 0 {
        // SAFETY: as above
        let regained = unsafe { libc::setuid(0) == 0 || libc::geteuid() == 0 };
        if regained {
            return Err(PrivDropError::Regainable(user.to_string()));
        }
    }

    info!(user, uid, gid, "Dropped privileges");
    Ok(())
}

fn check(call: &'static str, ret: libc::c_int) -> Result<(), PrivDropError> {
    if ret < 0 {
        return Err(PrivDropError::Syscall {
            call,
            source: std::io::Error::last_os_error(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interior_nul_is_rejected() {
        assert!(matches!(
            drop_privileges("bad\0name"),
            Err(PrivDropError::InvalidName(_))
        ));
    }

    #[test]
    fn test_unknown_user() {
        assert!(matches!(
            drop_privileges("tilesnoop-no-such-user"),
            Err(PrivDropError::UnknownUser(_))
        ));
    }
}
