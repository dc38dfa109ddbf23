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

use std::fmt;

use super::model::MailboxType;
use super::ops::MxOps;

/// The ordered table of backends.
///
/// Order matters: when probing, the first backend that recognises a path
/// wins.
#[derive(Clone, Copy)]
pub struct Registry {
    backends: &'static [&'static dyn MxOps],
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_list()
            .entries(self.backends.iter().map(|b| b.name()))
            .finish()
    }
}

impl Registry {
    pub fn new(backends: &'static [&'static dyn MxOps]) -> Self {
        Registry { backends }
    }

    /// The table of backends shipped with the crate.
    pub fn global() -> Self {
        Registry::new(crate::backend::BACKENDS)
    }

    pub fn lookup(&self, kind: MailboxType) -> Option<&'static dyn MxOps> {
        self.backends.iter().copied().find(|b| b.kind() == kind)
    }

    pub fn by_name(&self, name: &str) -> Option<&'static dyn MxOps> {
        self.backends
            .iter()
            .copied()
            .find(|b| b.name().eq_ignore_ascii_case(name))
    }

    pub fn probe_order(
        &self,
    ) -> impl Iterator<Item = &'static dyn MxOps> + 'static {
        self.backends.iter().copied()
    }
}
