//-
// Copyright (c) 2020, Jason Lingle
//
// This file is part of Mxbox.
//
// Mxbox is free software: you can  redistribute it and/or modify it under the
// terms of  the GNU General Public  License as published by  the Free Software
// Foundation, either version  3 of the License, or (at  your option) any later
// version.
//
// Mxbox is distributed  in the hope that  it will be useful,  but WITHOUT ANY
// WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or FITNESS
// FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public  License for  more
// details.
//
// You should have received a copy of the GNU General Public License along with
// Mxbox. If not, see <http://www.gnu.org/licenses/>.

//! The scoped-lock service.
//!
//! Locks are advisory `flock(2)` locks on a lock file chosen by the backend.
//! They are never waited on: contention is reported immediately as
//! `Error::LockContention` so the caller can decide whether to retry.
//!
//! The lock is released when the `ScopedLock` is dropped. The last holder
//! also removes the lock file, so a lock file only exists while someone holds
//! it.

use std::fs;
use std::io;
use std::os::unix::fs::{MetadataExt, OpenOptionsExt};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use log::{trace, warn};
use nix::fcntl::{flock, FlockArg};

use crate::support::error::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockKind {
    Shared,
    Exclusive,
}

#[derive(Debug)]
pub struct ScopedLock {
    file: fs::File,
    path: PathBuf,
    kind: LockKind,
}

impl ScopedLock {
    /// Acquire a lock of the given kind on `path`, creating the lock file if
    /// it does not exist.
    pub fn acquire(path: &Path, kind: LockKind) -> Result<Self, Error> {
        let arg = match kind {
            LockKind::Shared => FlockArg::LockSharedNonblock,
            LockKind::Exclusive => FlockArg::LockExclusiveNonblock,
        };

        loop {
            let file = fs::OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .mode(0o600)
                .open(path)?;

            match flock(file.as_raw_fd(), arg) {
                Ok(()) => (),
                Err(nix::errno::Errno::EWOULDBLOCK) => {
                    return Err(Error::LockContention)
                }
                Err(e) => return Err(e.into()),
            }

            // The previous holder may have removed the file between our open
            // and our flock, in which case we locked an orphan.
            let held = file.metadata()?;
            match fs::metadata(path) {
                Ok(md) if md.dev() == held.dev() && md.ino() == held.ino() => {
                    trace!("Acquired {:?} lock on {}", kind, path.display());
                    return Ok(ScopedLock {
                        file,
                        path: path.to_owned(),
                        kind,
                    });
                }
                Ok(_) => continue,
                Err(e) if io::ErrorKind::NotFound == e.kind() => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> LockKind {
        self.kind
    }
}

impl Drop for ScopedLock {
    fn drop(&mut self) {
        // Only a holder who can get the lock exclusively is the last one
        let fd = self.file.as_raw_fd();
        if flock(fd, FlockArg::LockExclusiveNonblock).is_ok() {
            if let Err(e) = fs::remove_file(&self.path) {
                if io::ErrorKind::NotFound != e.kind() {
                    warn!("Failed to remove {}: {}", self.path.display(), e);
                }
            }
        }

        // Closing the descriptor releases the lock anyway; unlocking
        // explicitly just makes failures visible.
        if let Err(e) = flock(fd, FlockArg::Unlock) {
            warn!("Failed to unlock {}: {}", self.path.display(), e);
        } else {
            trace!("Released lock on {}", self.path.display());
        }
    }
}

#[cfg(test)]
mod test {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn exclusive_excludes_everything() {
        let root = TempDir::new().unwrap();
        let path = root.path().join("lock");

        let held = ScopedLock::acquire(&path, LockKind::Exclusive).unwrap();
        assert_eq!(LockKind::Exclusive, held.kind());
        assert_matches!(
            Err(Error::LockContention),
            ScopedLock::acquire(&path, LockKind::Exclusive)
        );
        assert_matches!(
            Err(Error::LockContention),
            ScopedLock::acquire(&path, LockKind::Shared)
        );

        drop(held);
        ScopedLock::acquire(&path, LockKind::Exclusive).unwrap();
    }

    #[test]
    fn shared_locks_coexist() {
        let root = TempDir::new().unwrap();
        let path = root.path().join("lock");

        let a = ScopedLock::acquire(&path, LockKind::Shared).unwrap();
        let b = ScopedLock::acquire(&path, LockKind::Shared).unwrap();
        assert_matches!(
            Err(Error::LockContention),
            ScopedLock::acquire(&path, LockKind::Exclusive)
        );

        // The file stays while anyone still holds it
        drop(a);
        assert!(path.exists());
        assert_matches!(
            Err(Error::LockContention),
            ScopedLock::acquire(&path, LockKind::Exclusive)
        );
        drop(b);
        assert!(!path.exists());
    }

    #[test]
    fn nothing_left_behind() {
        let root = TempDir::new().unwrap();
        let path = root.path().join("lock");

        let held = ScopedLock::acquire(&path, LockKind::Exclusive).unwrap();
        assert!(path.is_file());
        drop(held);
        assert!(!path.exists());

        // A lock file somebody else left around is taken over and removed
        fs::write(&path, b"").unwrap();
        drop(ScopedLock::acquire(&path, LockKind::Shared).unwrap());
        assert!(!path.exists());
    }
}
