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

use std::any::Any;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use chrono::prelude::*;

use super::model::*;
use super::tags::TagList;
use crate::support::config::MxConfig;
use crate::support::error::Error;
use crate::support::lock::ScopedLock;

/// Where a backend keeps one message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Location {
    /// A file, relative to the mailbox directory.
    File(PathBuf),
    /// A byte range within a flat file.
    Span { offset: u64, length: u64 },
    /// A message identified by the remote end.
    Remote(u32),
}

/// What a backend knows about one message.
#[derive(Clone, Debug)]
pub struct Email {
    pub flags: MessageFlags,
    /// Marked for removal on the next sync.
    pub deleted: bool,
    /// Holds local changes not yet written back.
    pub changed: bool,
    pub received: DateTime<Utc>,
    /// The envelope sender, where the store records one.
    pub sender: Option<String>,
    pub tags: TagList,
    pub location: Location,
}

impl Email {
    pub fn new(location: Location) -> Self {
        Email {
            flags: MessageFlags::empty(),
            deleted: false,
            changed: false,
            received: Utc::now(),
            sender: None,
            tags: TagList::new(),
            location,
        }
    }
}

/// A handle on a mailbox store.
///
/// The handle is created empty from a path, and bound to a backend when it is
/// opened. Backends keep their own state in it, which never outlives the
/// session.
pub struct Mailbox {
    pub(super) path: String,
    pub(super) kind: Option<MailboxType>,
    pub(super) state: MailboxState,
    pub(super) emails: Vec<Email>,
    pub(super) flags: OpenFlags,
    pub(super) account: Option<AccountId>,
    pub(super) lock: Option<ScopedLock>,
    pub(super) config: Arc<MxConfig>,
    pub(super) log_prefix: String,
    pub(super) last_error: Option<String>,
    pub(super) last_visited: Option<SystemTime>,
    data: Option<Box<dyn Any + Send>>,
}

impl fmt::Debug for Mailbox {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Mailbox")
            .field("path", &self.path)
            .field("kind", &self.kind)
            .field("state", &self.state)
            .field("emails", &self.emails.len())
            .field("flags", &self.flags)
            .field("account", &self.account)
            .finish()
    }
}

impl Mailbox {
    pub fn new(path: impl Into<String>) -> Self {
        Mailbox {
            path: path.into(),
            kind: None,
            state: MailboxState::Closed,
            emails: Vec::new(),
            flags: OpenFlags::default(),
            account: None,
            lock: None,
            config: Arc::new(MxConfig::default()),
            log_prefix: String::new(),
            last_error: None,
            last_visited: None,
            data: None,
        }
    }

    /// Create a handle that is already bound to the given backend type,
    /// skipping the probe on open.
    pub fn with_type(path: impl Into<String>, kind: MailboxType) -> Self {
        let mut this = Mailbox::new(path);
        this.kind = Some(kind);
        this
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// The path as a local file system path.
    pub fn fs_path(&self) -> &Path {
        Path::new(&self.path)
    }

    pub fn kind(&self) -> Option<MailboxType> {
        self.kind
    }

    pub fn state(&self) -> MailboxState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        match self.state {
            MailboxState::Open
            | MailboxState::Checking
            | MailboxState::Syncing => true,
            _ => false,
        }
    }

    pub fn flags(&self) -> OpenFlags {
        self.flags
    }

    pub fn read_only(&self) -> bool {
        self.flags.read_only
    }

    /// Backends call this when the store turns out not to be writable.
    pub fn set_read_only(&mut self) {
        self.flags.read_only = true;
    }

    pub fn account(&self) -> Option<AccountId> {
        self.account
    }

    pub fn config(&self) -> &MxConfig {
        &self.config
    }

    pub fn log_prefix(&self) -> &str {
        &self.log_prefix
    }

    /// The error that forced the last fast-close, if any.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// The time at which the user last looked at this mailbox.
    ///
    /// `check_stats` only reports mail arriving after this as new.
    pub fn last_visited(&self) -> Option<SystemTime> {
        self.last_visited
    }

    pub fn set_last_visited(&mut self, when: SystemTime) {
        self.last_visited = Some(when);
    }

    pub fn is_locked(&self) -> bool {
        self.lock.is_some()
    }

    pub fn count(&self) -> usize {
        self.emails.len()
    }

    pub fn emails(&self) -> &[Email] {
        &self.emails
    }

    pub fn email(&self, index: usize) -> Result<&Email, Error> {
        self.emails.get(index).ok_or(Error::IndexOutOfRange)
    }

    /// Mutable access to the message list, for backends.
    pub fn emails_mut(&mut self) -> &mut Vec<Email> {
        &mut self.emails
    }

    /// Set or clear flags on a message, recording the change for the next
    /// sync.
    pub fn set_flags(
        &mut self,
        index: usize,
        flags: MessageFlags,
        on: bool,
    ) -> Result<(), Error> {
        let email =
            self.emails.get_mut(index).ok_or(Error::IndexOutOfRange)?;
        let before = email.flags;
        email.flags.set(flags, on);
        if before != email.flags {
            email.changed = true;
        }
        Ok(())
    }

    /// Mark or unmark a message for deletion on the next sync.
    pub fn set_deleted(
        &mut self,
        index: usize,
        deleted: bool,
    ) -> Result<(), Error> {
        let email =
            self.emails.get_mut(index).ok_or(Error::IndexOutOfRange)?;
        if email.deleted != deleted {
            email.deleted = deleted;
            email.changed = true;
        }
        Ok(())
    }

    /// Whether anything needs to be written back to the store.
    pub fn has_pending_changes(&self) -> bool {
        self.emails.iter().any(|e| e.changed || e.deleted)
    }

    pub fn deleted_count(&self) -> usize {
        self.emails.iter().filter(|e| e.deleted).count()
    }

    /// Attach backend-private state, replacing any already present.
    pub fn set_data<T: Any + Send>(&mut self, data: T) {
        self.data = Some(Box::new(data));
    }

    pub fn data<T: Any + Send>(&self) -> Result<&T, Error> {
        self.data
            .as_ref()
            .and_then(|d| d.downcast_ref::<T>())
            .ok_or(Error::MailboxClosed)
    }

    pub fn data_mut<T: Any + Send>(&mut self) -> Result<&mut T, Error> {
        self.data
            .as_mut()
            .and_then(|d| d.downcast_mut::<T>())
            .ok_or(Error::MailboxClosed)
    }

    pub(super) fn clear_data(&mut self) {
        self.data = None;
    }

    /// Drop messages marked deleted from the index, once the backend has
    /// removed them from the store.
    pub(super) fn purge_deleted(&mut self) {
        self.emails.retain(|e| !e.deleted);
    }
}

/// An open mailbox session.
///
/// Produced by `Mx::open()`, consumed by `Mx::close()`.
#[derive(Debug)]
pub struct Context {
    pub(super) mailbox: Mailbox,
}

impl Context {
    pub fn mailbox(&self) -> &Mailbox {
        &self.mailbox
    }

    pub fn mailbox_mut(&mut self) -> &mut Mailbox {
        &mut self.mailbox
    }

    /// Give up the session without closing it, e.g. after the mailbox was
    /// fast-closed due to an error.
    pub fn into_mailbox(self) -> Mailbox {
        self.mailbox
    }
}
