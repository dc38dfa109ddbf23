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

use std::fs;
use std::io::{self, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::time::SystemTime;

use nix::sys::time::TimeVal;

use crate::support::error::Error;

/// Atomically write `data` to `path` by staging it in `tmp` first.
pub fn spit(
    tmp: impl AsRef<Path>,
    path: impl AsRef<Path>,
    overwrite: bool,
    mode: u32,
    data: &[u8],
) -> io::Result<()> {
    let mut tf = tempfile::NamedTempFile::new_in(tmp)?;
    tf.as_file_mut().write_all(data)?;
    chmod(tf.path(), mode)?;
    tf.as_file_mut().sync_all()?;
    if overwrite {
        tf.persist(path)?;
    } else {
        tf.persist_noclobber(path)?;
    }
    Ok(())
}

pub fn chmod(path: impl AsRef<Path>, mode: u32) -> io::Result<()> {
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

/// Set the access and modification times of `path`.
///
/// Used to undo the access time bump caused by reading a mailbox opened in
/// peek mode.
pub fn set_times(
    path: impl AsRef<Path>,
    atime: SystemTime,
    mtime: SystemTime,
) -> Result<(), Error> {
    nix::sys::stat::utimes(
        path.as_ref(),
        &to_timeval(atime),
        &to_timeval(mtime),
    )?;
    Ok(())
}

fn to_timeval(t: SystemTime) -> TimeVal {
    let d = t
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default();
    TimeVal::new(d.as_secs() as _, d.subsec_micros() as _)
}

/// Open `dir` and flush its entries to disk, so that a rename into it
/// survives a crash.
pub fn sync_dir(dir: impl AsRef<Path>) -> io::Result<()> {
    fs::File::open(dir)?.sync_all()
}

pub trait IgnoreKinds {
    fn ignore_already_exists(self) -> Self;
    fn ignore_not_found(self) -> Self;
}

impl<R: Default> IgnoreKinds for Result<R, io::Error> {
    fn ignore_already_exists(self) -> Self {
        match self {
            Ok(r) => Ok(r),
            Err(e) if io::ErrorKind::AlreadyExists == e.kind() => {
                Ok(R::default())
            }
            Err(e) => Err(e),
        }
    }

    fn ignore_not_found(self) -> Self {
        match self {
            Ok(r) => Ok(r),
            Err(e) if io::ErrorKind::NotFound == e.kind() => Ok(R::default()),
            Err(e) => Err(e),
        }
    }
}

pub trait ErrorTransforms {
    type Coerced;
    fn on_exists(self, error: Error) -> Self::Coerced;
    fn on_not_found(self, error: Error) -> Self::Coerced;
    /// Map any I/O error to `Error::Access`, for operations where the only
    /// interesting outcome is whether the path can be reached at all.
    fn as_access(self) -> Self::Coerced;
}

impl<R, E: Into<Error>> ErrorTransforms for Result<R, E> {
    type Coerced = Result<R, Error>;

    fn on_exists(self, error: Error) -> Result<R, Error> {
        match self.map_err(|e| e.into()) {
            Err(Error::Io(e)) if io::ErrorKind::AlreadyExists == e.kind() => {
                Err(error)
            }
            Err(Error::Nix(nix::errno::Errno::EEXIST)) => Err(error),
            s => s,
        }
    }

    fn on_not_found(self, error: Error) -> Result<R, Error> {
        match self.map_err(|e| e.into()) {
            Err(Error::Io(e)) if io::ErrorKind::NotFound == e.kind() => {
                Err(error)
            }
            Err(Error::Nix(nix::errno::Errno::ENOENT)) => Err(error),
            s => s,
        }
    }

    fn as_access(self) -> Result<R, Error> {
        match self.map_err(|e| e.into()) {
            Err(Error::Io(e)) => Err(Error::Access(e)),
            Err(Error::Nix(e)) => {
                Err(Error::Access(io::Error::from_raw_os_error(e as i32)))
            }
            s => s,
        }
    }
}
