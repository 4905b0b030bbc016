//! Privilege drop (§4.7).
//!
//! Runs exactly once, after the acceptors are bound and the ticket-key
//! material has been read from files, and before the IPC reader is
//! armed (invariant 5). A no-op unless the effective UID is `0` and a
//! non-zero `uid` was configured.

use std::ffi::CString;

use nix::unistd::{self, Gid, Uid};

use crate::error::PrivilegeError;

/// Drops from root to `uid`/`gid`, initializing supplementary groups for
/// `user` first. Verifies the drop actually took by confirming a
/// subsequent `setuid(0)` fails; if it unexpectedly succeeds, aborts the
/// process rather than continuing with a silently-broken privilege
/// boundary.
pub fn drop_privileges(uid: u32, gid: u32, user: &str) -> Result<(), PrivilegeError> {
    if !unistd::geteuid().is_root() || uid == 0 {
        return Ok(());
    }

    let user_c = CString::new(user).unwrap_or_else(|_| CString::new("").unwrap());
    unistd::initgroups(&user_c, Gid::from_raw(gid)).map_err(|source| PrivilegeError::InitGroups {
        user: user.to_string(),
        gid,
        source,
    })?;
    unistd::setgid(Gid::from_raw(gid)).map_err(|source| PrivilegeError::SetGid(gid, source))?;
    unistd::setuid(Uid::from_raw(uid)).map_err(|source| PrivilegeError::SetUid(uid, source))?;

    if unistd::setuid(Uid::from_raw(0)).is_ok() {
        // Genuinely unrecoverable: the privilege boundary did not hold.
        // §9 calls for abort semantics here rather than trying to unwind.
        std::process::abort();
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_root_uid_zero_is_a_no_op() {
        // Without root, drop_privileges must not attempt any syscall that
        // would fail in a sandboxed test environment.
        assert!(drop_privileges(0, 0, "").is_ok());
    }
}
