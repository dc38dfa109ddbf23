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
use std::str::FromStr;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::support::error::Error;

/// The type tag identifying a backend.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize,
    Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum MailboxType {
    Mbox,
    Mmdf,
    Maildir,
    Mh,
    Imap,
    Pop,
    Nntp,
    Notmuch,
    Compressed,
}

impl MailboxType {
    pub fn name(self) -> &'static str {
        match self {
            MailboxType::Mbox => "mbox",
            MailboxType::Mmdf => "mmdf",
            MailboxType::Maildir => "maildir",
            MailboxType::Mh => "mh",
            MailboxType::Imap => "imap",
            MailboxType::Pop => "pop",
            MailboxType::Nntp => "nntp",
            MailboxType::Notmuch => "notmuch",
            MailboxType::Compressed => "compressed",
        }
    }
}

impl fmt::Display for MailboxType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for MailboxType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, String> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "mbox" => MailboxType::Mbox,
            "mmdf" => MailboxType::Mmdf,
            "maildir" => MailboxType::Maildir,
            "mh" => MailboxType::Mh,
            "imap" => MailboxType::Imap,
            "pop" => MailboxType::Pop,
            "nntp" => MailboxType::Nntp,
            "notmuch" => MailboxType::Notmuch,
            "compressed" => MailboxType::Compressed,
            _ => return Err(format!("Unknown mailbox type: {}", s)),
        })
    }
}

/// How a mailbox is to be opened.
///
/// `append` and `read_only` are mutually exclusive. `new_folder` and
/// `append_if_missing` both imply `append`; `validate()` folds the
/// implications in and rejects contradictions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OpenFlags {
    /// Do not sort the messages after opening.
    pub no_sort: bool,
    /// Open only for appending new messages; the existing messages are not
    /// loaded.
    pub append: bool,
    /// Create the mailbox if it does not exist yet.
    pub append_if_missing: bool,
    /// Never write anything back to the store.
    pub read_only: bool,
    /// Do not report progress.
    pub quiet: bool,
    /// Create the mailbox, truncating a flat store that already exists.
    pub new_folder: bool,
    /// Put the access time back after reading, so that other programs still
    /// see new mail.
    pub peek: bool,
}

impl OpenFlags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read_only() -> Self {
        OpenFlags {
            read_only: true,
            ..OpenFlags::default()
        }
    }

    pub fn append() -> Self {
        OpenFlags {
            append: true,
            ..OpenFlags::default()
        }
    }

    pub fn with_no_sort(mut self) -> Self {
        self.no_sort = true;
        self
    }

    pub fn with_append_if_missing(mut self) -> Self {
        self.append_if_missing = true;
        self
    }

    pub fn with_quiet(mut self) -> Self {
        self.quiet = true;
        self
    }

    pub fn with_new_folder(mut self) -> Self {
        self.new_folder = true;
        self
    }

    pub fn with_peek(mut self) -> Self {
        self.peek = true;
        self
    }

    /// Check the flags for consistency, returning the normalised set.
    pub fn validate(mut self) -> Result<Self, Error> {
        if self.new_folder || self.append_if_missing {
            self.append = true;
        }

        if self.append && self.read_only {
            return Err(Error::IncompatibleFlags(
                "append and read-only are mutually exclusive",
            ));
        }

        Ok(self)
    }
}

bitflags! {
    /// Options for opening a new message for writing.
    #[derive(Default)]
    pub struct MsgOpenFlags: u8 {
        /// Start the message with the backend's separator line.
        const ADD_FROM = 1 << 0;
        /// Mark the message as a draft.
        const SET_DRAFT = 1 << 1;
    }
}

bitflags! {
    /// The flags carried by a message.
    #[derive(Default)]
    pub struct MessageFlags: u8 {
        const READ = 1 << 0;
        const FLAGGED = 1 << 1;
        const REPLIED = 1 << 2;
        const DRAFT = 1 << 3;
    }
}

bitflags! {
    /// Options for `check_stats`.
    #[derive(Default)]
    pub struct CheckStatsFlags: u8 {
        /// Ignore the last-visited time and report any unread message as new.
        const FORCE = 1 << 0;
        /// Also count the messages.
        const COUNTS = 1 << 1;
    }
}

/// The outcome of `check`, `sync` and `close`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CheckResult {
    /// Nothing happened.
    NoChange,
    /// New messages were appended to the index.
    NewMail,
    /// A lock could not be obtained; try again later.
    Locked,
    /// The index was discarded and rebuilt. Any message indices held by the
    /// caller are invalid.
    Reopened,
    /// Only flags of known messages changed.
    FlagsChanged,
}

impl CheckResult {
    fn precedence(self) -> u8 {
        match self {
            CheckResult::NoChange => 0,
            CheckResult::Locked => 1,
            CheckResult::FlagsChanged => 2,
            CheckResult::NewMail => 3,
            CheckResult::Reopened => 4,
        }
    }

    /// Combine two results, keeping the one that demands more of the caller.
    ///
    /// `Reopened` beats `NewMail` beats `FlagsChanged` beats `Locked` beats
    /// `NoChange`.
    pub fn supersede(self, other: CheckResult) -> CheckResult {
        if other.precedence() > self.precedence() {
            other
        } else {
            self
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CheckStatsResult {
    NoChange,
    NewMail,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MailboxStats {
    pub total: usize,
    pub unread: usize,
    pub flagged: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StatsReport {
    pub result: CheckStatsResult,
    /// Only present if `CheckStatsFlags::COUNTS` was requested.
    pub stats: Option<MailboxStats>,
}

/// The outcome of `tags_edit`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TagsEdit {
    /// The new, validated tag string.
    Edited(String),
    /// The user gave nothing usable.
    NoInput,
    /// The backend has no notion of tags.
    Unsupported,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MailboxState {
    Closed,
    Opening,
    Open,
    Checking,
    Syncing,
    Error,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageState {
    Idle,
    Reading,
    Writing,
    Committed,
    Discarded,
    Closed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AccountId(pub u32);
