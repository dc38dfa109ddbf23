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

//! The contract every mailbox backend implements.
//!
//! Backends are stateless singletons registered in a static table; all
//! per-session state lives in the `Mailbox` (see `Mailbox::set_data()`) or
//! the `Account`. The orchestration in `Mx` takes care of flag validation,
//! locking, account linking and error classification, so backends only deal
//! with their own store.
//!
//! Optional operations have default implementations which report
//! `Error::Unsupported` (or `Error::NoParent` for `path_parent`).

use std::fs;
use std::path::PathBuf;

use super::account::Account;
use super::mailbox::Mailbox;
use super::message::Message;
use super::model::*;
use crate::support::error::Error;

pub trait MxOps: Sync {
    fn kind(&self) -> MailboxType;

    fn name(&self) -> &'static str {
        self.kind().name()
    }

    /// Whether mailboxes of this type live on the local file system.
    ///
    /// Local backends are given the `stat()` result of the path when
    /// probing.
    fn is_local(&self) -> bool;

    /// Whether `account` already holds the connection `path` would use.
    fn ac_owns_path(&self, account: &Account, path: &str) -> bool;

    /// Add `mailbox` to `account`, returning false to refuse it.
    fn ac_add(&self, _account: &mut Account, _mailbox: &Mailbox) -> bool {
        true
    }

    /// The file to take the scoped lock on while the mailbox is open, if the
    /// backend wants one.
    fn lock_path(&self, _mailbox: &Mailbox) -> Option<PathBuf> {
        None
    }

    /// Load the messages of the mailbox into its index.
    fn mbox_open(&self, mailbox: &mut Mailbox) -> Result<(), Error>;

    /// Prepare the mailbox for appending only.
    ///
    /// `flags.append_if_missing` and `flags.new_folder` request that the
    /// store be created.
    fn mbox_open_append(
        &self,
        mailbox: &mut Mailbox,
        flags: &OpenFlags,
    ) -> Result<(), Error>;

    /// Look for changes made to the store by others.
    fn mbox_check(&self, mailbox: &mut Mailbox) -> Result<CheckResult, Error>;

    /// Gather statistics without opening the mailbox.
    fn mbox_check_stats(
        &self,
        mailbox: &Mailbox,
        flags: CheckStatsFlags,
    ) -> Result<StatsReport, Error>;

    /// Write pending changes back to the store.
    ///
    /// Messages marked deleted must be removed from the store; the caller
    /// drops them from the index on success. The store must be left
    /// untouched on failure.
    ///
    /// A backend which finds the store rewritten by someone else may rebuild
    /// the index instead and return `Reopened`, writing nothing.
    fn mbox_sync(&self, mailbox: &mut Mailbox) -> Result<CheckResult, Error>;

    /// Release backend state. Called on every close, including after
    /// failures, so it must tolerate a half-opened mailbox.
    fn mbox_close(&self, mailbox: &mut Mailbox) -> Result<(), Error>;

    /// Open message `index` for reading.
    fn msg_open(
        &self,
        mailbox: &mut Mailbox,
        message: &mut Message,
        index: usize,
    ) -> Result<(), Error>;

    /// Set up a staging area for a new message.
    ///
    /// If `add_from` is set, the backend writes its leading separator line
    /// into the staging area.
    fn msg_open_new(
        &self,
        mailbox: &mut Mailbox,
        message: &mut Message,
        add_from: bool,
    ) -> Result<(), Error>;

    /// Atomically publish a staged message, setting its committed path.
    ///
    /// On failure the staging area is either left intact on the message or
    /// consumed; never is part of the message visible in the store.
    fn msg_commit(
        &self,
        mailbox: &mut Mailbox,
        message: &mut Message,
    ) -> Result<(), Error>;

    fn msg_close(
        &self,
        _mailbox: &mut Mailbox,
        _message: &mut Message,
    ) -> Result<(), Error> {
        Ok(())
    }

    /// The number of bytes of separator between messages.
    fn msg_padding_size(&self, _mailbox: &Mailbox) -> usize {
        0
    }

    fn msg_save_hcache(
        &self,
        _mailbox: &mut Mailbox,
        _index: usize,
    ) -> Result<(), Error> {
        Err(Error::Unsupported)
    }

    /// Whether the backend implements `tags_edit` and `tags_commit`.
    fn tags_supported(&self) -> bool {
        false
    }

    /// Validate the user's tag edit against `current`.
    ///
    /// Returns `None` if the input contains no usable edit.
    fn tags_edit(
        &self,
        _mailbox: &mut Mailbox,
        _current: &str,
        _input: &str,
    ) -> Result<Option<String>, Error> {
        Err(Error::Unsupported)
    }

    /// Save the tags of message `index` to the store.
    fn tags_commit(
        &self,
        _mailbox: &mut Mailbox,
        _index: usize,
        _tags: &str,
    ) -> Result<(), Error> {
        Err(Error::Unsupported)
    }

    /// Whether `path` is a mailbox of this type.
    ///
    /// `metadata` is the result of `stat()` on the path for local backends,
    /// `None` if it does not exist or for remote backends.
    fn path_probe(&self, path: &str, metadata: Option<&fs::Metadata>) -> bool;

    fn path_canon(&self, path: &str) -> Result<String, Error>;

    /// Abbreviate `path` for display, relative to `folder` if possible.
    fn path_pretty(
        &self,
        path: &str,
        folder: Option<&str>,
    ) -> Result<String, Error>;

    fn path_parent(&self, _path: &str) -> Result<String, Error> {
        Err(Error::NoParent)
    }

    fn path_is_empty(&self, path: &str) -> Result<bool, Error>;
}
