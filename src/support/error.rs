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

use std::io;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("No backend recognises this path")]
    UnrecognizedPath,
    #[error("Invalid mailbox path")]
    InvalidPath,
    #[error("Mailbox has no parent")]
    NoParent,
    #[error("Mailbox is not accessible: {0}")]
    Access(#[source] io::Error),
    #[error("Mailbox is locked by another process")]
    LockContention,
    #[error("Mailbox is corrupt: {0}")]
    CorruptStore(String),
    #[error("Operation not supported by this backend")]
    Unsupported,
    #[error("Failed to open mailbox: {0}")]
    OpenFailed(#[source] Box<Error>),
    #[error("Opening mailbox aborted: {0}")]
    OpenAborted(String),
    #[error("Mailbox is not open")]
    MailboxClosed,
    #[error("Mailbox is read-only")]
    ReadOnly,
    #[error("Message index out of range")]
    IndexOutOfRange,
    #[error("Incompatible open flags: {0}")]
    IncompatibleFlags(&'static str),
    #[error("Message is not in a state that permits this operation")]
    BadMessageState,
    #[error("More than one account claims this mailbox")]
    AmbiguousAccount,
    #[error("Account refused the mailbox")]
    AccountRejected,
    #[error("No backend registered for this mailbox type")]
    UnknownBackend,
    #[error("Gave up allocating a unique message name")]
    GaveUpInsertion,
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Nix(#[from] nix::Error),
    #[error(transparent)]
    Toml(#[from] toml::de::Error),
    #[error(transparent)]
    Cbor(#[from] serde_cbor::error::Error),
}

impl Error {
    /// Whether the mailbox session may continue after this error.
    ///
    /// Everything else is treated as fatal to the session: the mailbox is
    /// fast-closed and the error preserved for display.
    pub fn is_transient(&self) -> bool {
        matches!(
            *self,
            Error::LockContention
                | Error::ReadOnly
                | Error::Unsupported
                | Error::IndexOutOfRange
                | Error::BadMessageState
                | Error::IncompatibleFlags(..)
        )
    }

    /// Whether this error is a problem with the path itself, which the
    /// caller can fix.
    pub fn is_path_error(&self) -> bool {
        matches!(
            *self,
            Error::UnrecognizedPath | Error::InvalidPath | Error::NoParent
        )
    }
}
