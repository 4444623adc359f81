//! Dropping root privileges before relaying.
//!
//! Connection processes need root only to create and configure their
//! interface and to start the DHCP helper. Everything after that runs as an
//! unprivileged account.

use nix::unistd::{getegid, geteuid, setgid, setgroups, setuid, Gid, Uid, User};
use thiserror::Error;
use tracing::{info, warn};

/// Account switched to when none is configured.
pub const DEFAULT_RUN_AS: &str = "nobody";

/// uid/gid used when the account cannot be resolved.
pub const FALLBACK_ID: u32 = 65534;

/// Privilege drop failures. Any of these aborts the connection before
/// relaying starts.
#[derive(Debug, Error)]
pub enum PrivilegeError {
    #[error("failed to clear supplementary groups: {0}")]
    SetGroups(#[source] nix::Error),

    #[error("failed to set gid {gid}: {source}")]
    SetGid {
        gid: Gid,
        #[source]
        source: nix::Error,
    },

    #[error("failed to set uid {uid}: {source}")]
    SetUid {
        uid: Uid,
        #[source]
        source: nix::Error,
    },

    #[error("effective uid is still {actual} after switching to {expected}")]
    Unchanged { expected: Uid, actual: Uid },
}

/// Target identity of a privilege drop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Credentials {
    pub uid: Uid,
    pub gid: Gid,
}

impl Credentials {
    /// Resolve an account name, falling back to uid/gid 65534.
    pub fn resolve(name: &str) -> Self {
        match User::from_name(name) {
            Ok(Some(user)) => Self {
                uid: user.uid,
                gid: user.gid,
            },
            Ok(None) => {
                warn!(
                    user = %name,
                    fallback = FALLBACK_ID,
                    "User not found, using fallback ids"
                );
                Self::fallback()
            }
            Err(e) => {
                warn!(
                    user = %name,
                    error = %e,
                    fallback = FALLBACK_ID,
                    "User lookup failed, using fallback ids"
                );
                Self::fallback()
            }
        }
    }

    fn fallback() -> Self {
        Self {
            uid: Uid::from_raw(FALLBACK_ID),
            gid: Gid::from_raw(FALLBACK_ID),
        }
    }
}

/// Switch the whole process to `name`: supplementary groups, then gid, then
/// uid.
pub fn drop_privileges(name: &str) -> Result<Credentials, PrivilegeError> {
    let creds = Credentials::resolve(name);

    setgroups(&[]).map_err(PrivilegeError::SetGroups)?;
    setgid(creds.gid).map_err(|source| PrivilegeError::SetGid {
        gid: creds.gid,
        source,
    })?;
    setuid(creds.uid).map_err(|source| PrivilegeError::SetUid {
        uid: creds.uid,
        source,
    })?;

    let actual = geteuid();
    if actual != creds.uid {
        return Err(PrivilegeError::Unchanged {
            expected: creds.uid,
            actual,
        });
    }

    info!(
        user = %name,
        uid = %actual,
        gid = %getegid(),
        "Dropped privileges"
    );
    Ok(creds)
}
