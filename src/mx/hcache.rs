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

//! A minimal keyed store of per-message metadata.
//!
//! Each entry is a CBOR file named after the SHA-3 of the mailbox path and the
//! message key, so entries from different mailboxes never collide. Entries
//! are replaced atomically; a missing or unreadable entry is simply a cache
//! miss.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::prelude::*;
use serde::{Deserialize, Serialize};
use tiny_keccak::{Hasher, Sha3};

use crate::support::error::Error;
use crate::support::file_ops::{self, IgnoreKinds};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub flags: u8,
    pub received: DateTime<Utc>,
    pub tags: String,
}

#[derive(Clone, Debug)]
pub struct HeaderCache {
    root: PathBuf,
    mailbox: String,
}

impl HeaderCache {
    /// Open the cache for `mailbox` under `root`, creating `root` if needed.
    pub fn open(root: &Path, mailbox: &str) -> Result<Self, Error> {
        fs::create_dir_all(root)?;
        Ok(HeaderCache {
            root: root.to_owned(),
            mailbox: mailbox.to_owned(),
        })
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        let mut sha3 = Sha3::v256();
        sha3.update(self.mailbox.as_bytes());
        sha3.update(b"\0");
        sha3.update(key.as_bytes());
        let mut hash = [0u8; 32];
        sha3.finalize(&mut hash);

        let mut name = String::with_capacity(2 * hash.len() + 5);
        for &b in &hash {
            let _ = write!(name, "{:02x}", b);
        }
        name.push_str(".cbor");
        self.root.join(name)
    }

    pub fn fetch(&self, key: &str) -> Option<CacheEntry> {
        let data = fs::read(self.entry_path(key)).ok()?;
        serde_cbor::from_slice(&data).ok()
    }

    pub fn store(&self, key: &str, entry: &CacheEntry) -> Result<(), Error> {
        let data = serde_cbor::to_vec(entry)?;
        file_ops::spit(&self.root, self.entry_path(key), true, 0o600, &data)?;
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Result<(), Error> {
        fs::remove_file(self.entry_path(key)).ignore_not_found()?;
        Ok(())
    }
}
