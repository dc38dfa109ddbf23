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

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::mx::model::MailboxType;
use crate::support::error::Error;

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct MxConfig {
    /// The base folder. `=` and `+` at the start of a mailbox path are
    /// expanded to this, and paths under it are displayed with that
    /// shorthand.
    pub folder: Option<String>,

    /// The type of mailbox to create when appending to a path that does not
    /// exist yet.
    pub default_type: MailboxType,

    /// Directory holding the header cache. If unset, backends do not cache
    /// anything.
    pub header_cache: Option<PathBuf>,

    /// Mailbox that deleted messages are copied to before they are purged.
    ///
    /// Messages deleted from the trash mailbox itself are purged directly.
    pub trash: Option<String>,

    /// Display replacements for driver tags, e.g. `inbox = "i"`.
    pub tag_transforms: BTreeMap<String, String>,

    /// Tags which are never shown to the user, e.g. `attachment`.
    pub hidden_tags: Vec<String>,
}

impl Default for MxConfig {
    fn default() -> Self {
        MxConfig {
            folder: None,
            default_type: MailboxType::Mbox,
            header_cache: None,
            trash: None,
            tag_transforms: BTreeMap::new(),
            hidden_tags: Vec::new(),
        }
    }
}

impl MxConfig {
    /// Load the configuration from a TOML file.
    ///
    /// A missing file is not an error; the defaults are used instead.
    pub fn load(path: &Path) -> Result<Self, Error> {
        match fs::read_to_string(path) {
            Ok(text) => Ok(toml::from_str(&text)?),
            Err(e) if std::io::ErrorKind::NotFound == e.kind() => {
                Ok(MxConfig::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// The default location of the configuration file.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("mxbox").join("mxbox.toml"))
    }
}
