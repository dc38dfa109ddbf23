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


//! The mailbox backends shipped with the crate.

pub mod local;
pub mod maildir;
pub mod mbox;

use self::maildir::Maildir;
use self::mbox::Mbox;
use crate::mx::ops::MxOps;

/// All backends, in probing order.
///
/// MMDF comes before mbox since an empty file is an mbox, but never MMDF.
pub static BACKENDS: &[&dyn MxOps] = &[&Maildir, &Mbox::MMDF, &Mbox::MBOX];
