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

use log::{debug, trace};

use super::mailbox::Mailbox;
use super::model::{AccountId, MailboxType};
use super::ops::MxOps;
use super::Mx;
use crate::support::error::Error;
use crate::support::file_ops::ErrorTransforms;

impl Mx {
    /// Determine which backend owns `path`.
    ///
    /// Local backends are given the result of `stat()`ing the path, which is
    /// done at most once and only if a local backend is asked.
    pub fn probe(&self, path: &str) -> Result<MailboxType, Error> {
        self.probe_ops(path).map(|ops| ops.kind())
    }

    fn probe_ops(&self, path: &str) -> Result<&'static dyn MxOps, Error> {
        if path.is_empty() {
            return Err(Error::InvalidPath);
        }

        let mut metadata: Option<Option<fs::Metadata>> = None;
        for ops in self.registry.probe_order() {
            let md = if ops.is_local() {
                metadata
                    .get_or_insert_with(|| fs::metadata(path).ok())
                    .as_ref()
            } else {
                None
            };

            if ops.path_probe(path, md) {
                trace!("{} recognises {}", ops.name(), path);
                return Ok(ops);
            }
        }

        debug!("No backend recognises {}", path);
        Err(Error::UnrecognizedPath)
    }

    /// Expand the folder shortcuts in `path` and normalise it.
    ///
    /// `=` and `+` at the start refer to `folder`; `~` refers to the home
    /// directory.
    pub fn canonicalize(
        &self,
        path: &str,
        folder: Option<&str>,
    ) -> Result<(String, MailboxType), Error> {
        let expanded = expand_shortcuts(path, folder)?;
        let ops = self.probe_ops(&expanded)?;
        let canon = ops.path_canon(&expanded)?;
        Ok((canon, ops.kind()))
    }

    /// Find the mailbox `path` names.
    ///
    /// Folder shortcuts are expanded against the configured folder and the
    /// result is canonicalised and bound to its backend. The account of any
    /// open session on the same mailbox is returned alongside; opening the
    /// mailbox joins that account. A path no backend recognises yet is
    /// returned expanded but unbound, ready to be created.
    pub fn resolve(
        &self,
        path: &str,
    ) -> Result<(Mailbox, Option<AccountId>), Error> {
        let folder = self.config.folder.as_deref();
        match self.canonicalize(path, folder) {
            Ok((canon, kind)) => {
                let linked = self.find_mailbox_anywhere(&canon);
                if let Some(id) = linked {
                    trace!("{} is open in account {}", canon, id.0);
                }
                Ok((Mailbox::with_type(canon, kind), linked))
            }
            Err(Error::UnrecognizedPath) => {
                Ok((Mailbox::new(expand_shortcuts(path, folder)?), None))
            }
            Err(e) => Err(e),
        }
    }

    /// Abbreviate `path` for display.
    ///
    /// This is purely cosmetic; if anything goes wrong, `path` is returned
    /// unchanged.
    pub fn prettify(&self, path: &str, folder: Option<&str>) -> String {
        self.probe_ops(path)
            .and_then(|ops| ops.path_pretty(path, folder))
            .unwrap_or_else(|_| path.to_owned())
    }

    /// The logical parent of `path`.
    pub fn parent(&self, path: &str) -> Result<String, Error> {
        self.probe_ops(path)?.path_parent(path)
    }

    /// Whether the mailbox at `path` holds no messages.
    pub fn is_empty(&self, path: &str) -> Result<bool, Error> {
        match self.probe_ops(path) {
            Ok(ops) => ops.path_is_empty(path),
            // A path nobody recognises because it can't be reached is an
            // access problem, not a path problem.
            Err(Error::UnrecognizedPath) if !path.contains("://") => {
                fs::metadata(path).as_access()?;
                Err(Error::UnrecognizedPath)
            }
            Err(e) => Err(e),
        }
    }
}

fn expand_shortcuts(path: &str, folder: Option<&str>) -> Result<String, Error> {
    if path.is_empty() {
        return Err(Error::InvalidPath);
    }

    if let Some(rest) =
        path.strip_prefix('=').or_else(|| path.strip_prefix('+'))
    {
        let folder = folder.ok_or(Error::InvalidPath)?;
        return Ok(join(folder, rest));
    }

    if path == "~" || path.starts_with("~/") {
        let home = dirs::home_dir().ok_or(Error::InvalidPath)?;
        let home = home.to_str().ok_or(Error::InvalidPath)?;
        return Ok(join(home, &path[1..]));
    }

    Ok(path.to_owned())
}

fn join(base: &str, rest: &str) -> String {
    let rest = rest.trim_start_matches('/');
    if rest.is_empty() {
        base.to_owned()
    } else if base.ends_with('/') {
        format!("{}{}", base, rest)
    } else {
        format!("{}/{}", base, rest)
    }
}
