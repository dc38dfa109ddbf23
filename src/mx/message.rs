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
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::Arc;

use chrono::prelude::*;
use log::{info, warn};
use tempfile::NamedTempFile;

use super::mailbox::{Context, Email, Mailbox};
use super::model::*;
use super::ops::MxOps;
use super::Mx;
use crate::support::error::Error;

enum Stream {
    None,
    Reader(Box<dyn Read + Send>),
    Staging(NamedTempFile),
}

/// A single message being read from or written to a mailbox.
///
/// A message opened for writing is staged in a temporary file which is
/// deleted when the message is dropped, unless the backend consumed it on
/// commit. Nothing is visible in the store until `Mx::msg_commit()`
/// succeeds.
pub struct Message {
    stream: Stream,
    committed_path: Option<String>,
    write: bool,
    state: MessageState,
    pub flags: MessageFlags,
    pub received: DateTime<Utc>,
    pub sender: Option<String>,
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Message")
            .field("staging", &self.staging_path())
            .field("committed_path", &self.committed_path)
            .field("write", &self.write)
            .field("state", &self.state)
            .field("flags", &self.flags)
            .field("received", &self.received)
            .finish()
    }
}

impl Message {
    fn new(write: bool) -> Self {
        Message {
            stream: Stream::None,
            committed_path: None,
            write,
            state: MessageState::Idle,
            flags: MessageFlags::empty(),
            received: Utc::now(),
            sender: None,
        }
    }

    pub fn state(&self) -> MessageState {
        self.state
    }

    pub fn is_write(&self) -> bool {
        self.write
    }

    /// Where the message ended up, once committed.
    pub fn committed_path(&self) -> Option<&str> {
        self.committed_path.as_deref()
    }

    pub fn set_committed_path(&mut self, path: impl Into<String>) {
        self.committed_path = Some(path.into());
    }

    pub fn staging_path(&self) -> Option<&Path> {
        match self.stream {
            Stream::Staging(ref tf) => Some(tf.path()),
            _ => None,
        }
    }

    pub fn has_staging(&self) -> bool {
        matches!(self.stream, Stream::Staging(..))
    }

    /// Backends call this from `msg_open` to supply the content.
    pub fn set_reader(&mut self, reader: impl Read + Send + 'static) {
        self.stream = Stream::Reader(Box::new(reader));
    }

    /// Create the staging file in `dir`.
    ///
    /// Backends which publish by renaming must stage on the same file system
    /// as the store.
    pub fn stage_in(&mut self, dir: &Path) -> Result<(), Error> {
        self.stream = Stream::Staging(NamedTempFile::new_in(dir)?);
        Ok(())
    }

    /// Create the staging file in the system temporary directory.
    pub fn stage(&mut self) -> Result<(), Error> {
        self.stream = Stream::Staging(NamedTempFile::new()?);
        Ok(())
    }

    pub fn staging_mut(&mut self) -> Result<&mut NamedTempFile, Error> {
        match self.stream {
            Stream::Staging(ref mut tf) => Ok(tf),
            _ => Err(Error::BadMessageState),
        }
    }

    /// Take the staging file away, e.g. to persist it.
    ///
    /// If publishing fails, the backend should give the file back with
    /// `restore_staging()` so the commit can be retried.
    pub fn take_staging(&mut self) -> Result<NamedTempFile, Error> {
        match std::mem::replace(&mut self.stream, Stream::None) {
            Stream::Staging(tf) => Ok(tf),
            other => {
                self.stream = other;
                Err(Error::BadMessageState)
            }
        }
    }

    pub fn restore_staging(&mut self, tf: NamedTempFile) {
        self.stream = Stream::Staging(tf);
    }
}

impl Read for Message {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.stream {
            Stream::Reader(ref mut r) => r.read(buf),
            _ => Err(io::Error::new(
                io::ErrorKind::Other,
                Error::BadMessageState,
            )),
        }
    }
}

impl Write for Message {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.stream {
            Stream::Staging(ref mut tf)
                if MessageState::Writing == self.state =>
            {
                tf.write(buf)
            }
            _ => Err(io::Error::new(
                io::ErrorKind::Other,
                Error::BadMessageState,
            )),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.stream {
            Stream::Staging(ref mut tf) => tf.flush(),
            _ => Ok(()),
        }
    }
}

fn open_ctx(
    mx: &Mx,
    ctx: &Context,
) -> Result<&'static dyn MxOps, Error> {
    if !ctx.mailbox.is_open() {
        return Err(Error::MailboxClosed);
    }
    let kind = ctx.mailbox.kind.ok_or(Error::MailboxClosed)?;
    mx.registry.lookup(kind).ok_or(Error::UnknownBackend)
}

impl Mx {
    /// Open message `index` for reading.
    pub fn msg_open(
        &self,
        ctx: &mut Context,
        index: usize,
    ) -> Result<Message, Error> {
        let ops = open_ctx(self, ctx)?;
        let email = ctx.mailbox.email(index)?;

        let mut msg = Message::new(false);
        msg.flags = email.flags;
        msg.received = email.received;
        msg.sender = email.sender.clone();

        ops.msg_open(&mut ctx.mailbox, &mut msg, index)?;
        msg.state = MessageState::Reading;
        Ok(msg)
    }

    /// Start writing a new message to the mailbox.
    ///
    /// `template`, if given, supplies the flags, received time and envelope
    /// sender of the new message.
    pub fn msg_open_new(
        &self,
        ctx: &mut Context,
        template: Option<&Email>,
        flags: MsgOpenFlags,
    ) -> Result<Message, Error> {
        let ops = open_ctx(self, ctx)?;
        if ctx.mailbox.read_only() {
            return Err(Error::ReadOnly);
        }

        let mut msg = Message::new(true);
        if let Some(template) = template {
            msg.flags = template.flags;
            msg.received = template.received;
            msg.sender = template.sender.clone();
        }
        if flags.contains(MsgOpenFlags::SET_DRAFT) {
            msg.flags |= MessageFlags::DRAFT;
        }

        msg.state = MessageState::Writing;
        ops.msg_open_new(
            &mut ctx.mailbox,
            &mut msg,
            flags.contains(MsgOpenFlags::ADD_FROM),
        )?;
        if !msg.has_staging() {
            msg.stage()?;
        }
        Ok(msg)
    }

    /// Publish a message opened with `msg_open_new()`.
    ///
    /// On failure, the message state tells whether the staged content
    /// survived: `Writing` means the commit can be retried, `Discarded`
    /// means it is gone. In neither case is any of it visible in the store.
    pub fn msg_commit(
        &self,
        ctx: &mut Context,
        msg: &mut Message,
    ) -> Result<(), Error> {
        let ops = open_ctx(self, ctx)?;
        if MessageState::Writing != msg.state {
            return Err(Error::BadMessageState);
        }

        msg.flush()?;
        match ops.msg_commit(&mut ctx.mailbox, msg) {
            Ok(()) => {
                msg.stream = Stream::None;
                msg.state = MessageState::Committed;
                info!(
                    "{} Delivered message to {}",
                    ctx.mailbox.log_prefix,
                    msg.committed_path().unwrap_or("?")
                );
                Ok(())
            }
            Err(e) => {
                msg.committed_path = None;
                if !msg.has_staging() {
                    msg.state = MessageState::Discarded;
                }
                warn!(
                    "{} Failed to deliver message: {}",
                    ctx.mailbox.log_prefix, e
                );
                Err(e)
            }
        }
    }

    /// Release a message, discarding it if it was never committed.
    pub fn msg_close(
        &self,
        ctx: &mut Context,
        mut msg: Message,
    ) -> Result<(), Error> {
        let result = match open_ctx(self, ctx) {
            Ok(ops) => ops.msg_close(&mut ctx.mailbox, &mut msg),
            // Nothing to tell the backend, but the staging area still goes
            Err(_) => Ok(()),
        };

        msg.stream = Stream::None;
        msg.state = MessageState::Closed;
        result
    }

    /// The size of the separator the backend puts between messages.
    pub fn msg_padding_size(&self, mailbox: &Mailbox) -> usize {
        mailbox
            .kind
            .and_then(|k| self.registry.lookup(k))
            .map_or(0, |ops| ops.msg_padding_size(mailbox))
    }

    /// Write message `index` to the header cache, if the backend has one.
    ///
    /// Failures are logged and returned, but do not affect the session.
    pub fn save_header_cache(
        &self,
        ctx: &mut Context,
        index: usize,
    ) -> Result<(), Error> {
        let ops = open_ctx(self, ctx)?;
        ops.msg_save_hcache(&mut ctx.mailbox, index)
            .map_err(|e| {
                if !matches!(e, Error::Unsupported) {
                    warn!(
                        "{} Failed to update header cache: {}",
                        ctx.mailbox.log_prefix, e
                    );
                }
                e
            })
    }

    pub fn tags_is_supported(&self, mailbox: &Mailbox) -> bool {
        mailbox
            .kind
            .and_then(|k| self.registry.lookup(k))
            .map_or(false, |ops| ops.tags_supported())
    }

    /// Turn the user's tag edit `input` into a new tag string.
    pub fn tags_edit(
        &self,
        ctx: &mut Context,
        current: &str,
        input: &str,
    ) -> Result<TagsEdit, Error> {
        let ops = open_ctx(self, ctx)?;
        match ops.tags_edit(&mut ctx.mailbox, current, input) {
            Ok(Some(tags)) => Ok(TagsEdit::Edited(tags)),
            Ok(None) => Ok(TagsEdit::NoInput),
            Err(Error::Unsupported) => Ok(TagsEdit::Unsupported),
            Err(e) => Err(e),
        }
    }

    /// Save `tags` on message `index`.
    ///
    /// Returns false if the backend does not support tags.
    pub fn tags_commit(
        &self,
        ctx: &mut Context,
        index: usize,
        tags: &str,
    ) -> Result<bool, Error> {
        let ops = open_ctx(self, ctx)?;
        ctx.mailbox.email(index)?;
        if ctx.mailbox.read_only() {
            return Err(Error::ReadOnly);
        }

        match ops.tags_commit(&mut ctx.mailbox, index, tags) {
            Ok(()) => (),
            Err(Error::Unsupported) => return Ok(false),
            Err(e) => return Err(e),
        }

        let config = Arc::clone(&ctx.mailbox.config);
        ctx.mailbox.emails[index].tags.replace(tags, &config);
        Ok(true)
    }

    /// Copy message `index` of `src` into `dst`.
    pub fn copy_message(
        &self,
        src: &mut Context,
        index: usize,
        dst: &mut Context,
    ) -> Result<(), Error> {
        let email = src.mailbox.email(index)?.clone();
        let mut input = self.msg_open(src, index)?;
        let mut output =
            self.msg_open_new(dst, Some(&email), MsgOpenFlags::ADD_FROM)?;

        let result = io::copy(&mut input, &mut output)
            .map_err(Error::from)
            .and_then(|_| self.msg_commit(dst, &mut output));

        let _ = self.msg_close(src, input);
        let close_result = self.msg_close(dst, output);
        result.and(close_result)
    }
}
