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

//! Path handling shared by the backends that live on the local file system.

use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::support::error::Error;

fn to_string(path: PathBuf) -> Result<String, Error> {
    path.into_os_string()
        .into_string()
        .map_err(|_| Error::InvalidPath)
}

/// Resolve symlinks and relative components.
///
/// A leaf that does not exist yet is resolved against its canonical parent.
pub fn canon(path: &str) -> Result<String, Error> {
    let path = Path::new(path);
    let absolute = if path.is_absolute() {
        path.to_owned()
    } else {
        env::current_dir()?.join(path)
    };

    match fs::canonicalize(&absolute) {
        Ok(canon) => to_string(canon),
        Err(e) if io::ErrorKind::NotFound == e.kind() => {
            let (parent, name) = match (absolute.parent(), absolute.file_name())
            {
                (Some(parent), Some(name)) => (parent, name),
                _ => return Err(Error::InvalidPath),
            };
            let parent =
                fs::canonicalize(parent).map_err(|_| Error::InvalidPath)?;
            to_string(parent.join(name))
        }
        Err(e) => Err(e.into()),
    }
}

/// Abbreviate `path` with `=` for `folder` or `~` for the home directory.
pub fn pretty(path: &str, folder: Option<&str>) -> Result<String, Error> {
    let p = Path::new(path);

    if let Some(folder) = folder {
        if let Ok(rest) = p.strip_prefix(folder) {
            let rest = rest.to_str().ok_or(Error::InvalidPath)?;
            if !rest.is_empty() {
                return Ok(format!("={}", rest));
            }
        }
    }

    if let Some(home) = dirs::home_dir() {
        if let Ok(rest) = p.strip_prefix(&home) {
            let rest = rest.to_str().ok_or(Error::InvalidPath)?;
            return Ok(if rest.is_empty() {
                "~".to_owned()
            } else {
                format!("~/{}", rest)
            });
        }
    }

    Ok(path.to_owned())
}

/// The directory containing `path`.
pub fn parent(path: &str) -> Result<String, Error> {
    let parent = Path::new(path.trim_end_matches('/'))
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .ok_or(Error::NoParent)?;
    to_string(parent.to_owned())
}
