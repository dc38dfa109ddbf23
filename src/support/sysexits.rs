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

use crate::support::error::Error;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct Sysexit(pub i32);

pub const EX_OK: Sysexit = Sysexit(0);
pub const EX_USAGE: Sysexit = Sysexit(64);
pub const EX_DATAERR: Sysexit = Sysexit(65);
pub const EX_NOINPUT: Sysexit = Sysexit(66);
pub const EX_UNAVAILABLE: Sysexit = Sysexit(69);
pub const EX_SOFTWARE: Sysexit = Sysexit(70);
pub const EX_CANTCREAT: Sysexit = Sysexit(73);
pub const EX_IOERR: Sysexit = Sysexit(74);
pub const EX_TEMPFAIL: Sysexit = Sysexit(75);
pub const EX_NOPERM: Sysexit = Sysexit(77);
pub const EX_CONFIG: Sysexit = Sysexit(78);

impl Sysexit {
    pub fn exit(self) -> ! {
        std::process::exit(self.0)
    }
}

impl From<&Error> for Sysexit {
    fn from(e: &Error) -> Self {
        match *e {
            Error::UnrecognizedPath | Error::InvalidPath | Error::NoParent => {
                EX_NOINPUT
            }
            Error::LockContention => EX_TEMPFAIL,
            Error::ReadOnly => EX_NOPERM,
            Error::Access(..) => EX_NOINPUT,
            Error::CorruptStore(..) | Error::OpenAborted(..) => EX_DATAERR,
            Error::Unsupported | Error::UnknownBackend => EX_UNAVAILABLE,
            Error::GaveUpInsertion => EX_CANTCREAT,
            Error::Toml(..) => EX_CONFIG,
            Error::IncompatibleFlags(..) => EX_USAGE,
            Error::OpenFailed(ref inner) => Sysexit::from(&**inner),
            Error::Io(..) | Error::Nix(..) | Error::Cbor(..) => EX_IOERR,
            Error::MailboxClosed
            | Error::IndexOutOfRange
            | Error::BadMessageState
            | Error::AmbiguousAccount
            | Error::AccountRejected => EX_SOFTWARE,
        }
    }
}
