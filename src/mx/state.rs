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

use std::fs;
use std::io;
use std::sync::Arc;
use std::time::SystemTime;

use log::{debug, error, info, warn};

use super::mailbox::{Context, Mailbox};
use super::model::*;
use super::ops::MxOps;
use super::Mx;
use crate::support::error::Error;
use crate::support::lock::{LockKind, ScopedLock};

impl Mx {
    /// Open `mailbox`, producing a session context.
    ///
    /// If the mailbox is not yet bound to a backend, the path is probed. When
    /// `append_if_missing` or `new_folder` is given and the path does not
    /// exist, the configured default type is created; a plain append to a
    /// missing path fails with `UnrecognizedPath`.
    ///
    /// On failure, everything acquired so far is released again.
    pub fn open(
        &mut self,
        mut mailbox: Mailbox,
        flags: OpenFlags,
    ) -> Result<Context, Error> {
        let flags = flags.validate()?;

        let kind = match mailbox.kind {
            Some(kind) => kind,
            None => match self.probe(&mailbox.path) {
                Ok(kind) => kind,
                Err(Error::UnrecognizedPath)
                    if (flags.append_if_missing || flags.new_folder)
                        && is_missing(&mailbox.path) =>
                {
                    debug!(
                        "Creating {} as {}",
                        mailbox.path, self.config.default_type
                    );
                    self.config.default_type
                }
                Err(e) => return Err(e),
            },
        };
        let ops = self.registry.lookup(kind).ok_or(Error::UnknownBackend)?;

        // Sessions and accounts are keyed by the canonical path
        match ops.path_canon(&mailbox.path) {
            Ok(canon) => mailbox.path = canon,
            Err(e) => debug!("Keeping {} as given: {}", mailbox.path, e),
        }

        mailbox.kind = Some(kind);
        mailbox.flags = flags;
        mailbox.config = Arc::clone(&self.config);
        mailbox.log_prefix = format!("{}:{}", ops.name(), mailbox.path);
        mailbox.last_error = None;
        mailbox.state = MailboxState::Opening;

        match self.open_inner(ops, &mut mailbox, flags) {
            Ok(()) => {
                if !flags.no_sort && !flags.append {
                    mailbox.emails.sort_by_key(|e| e.received);
                }
                mailbox.state = MailboxState::Open;
                mailbox.last_visited = Some(SystemTime::now());
                info!(
                    "{} Opened with {} messages{}",
                    mailbox.log_prefix,
                    mailbox.emails.len(),
                    if mailbox.read_only() { " (read-only)" } else { "" }
                );
                Ok(Context { mailbox })
            }
            Err(e) => {
                warn!("{} Failed to open: {}", mailbox.log_prefix, e);
                self.fast_close(&mut mailbox);
                Err(e)
            }
        }
    }

    fn open_inner(
        &mut self,
        ops: &'static dyn MxOps,
        mailbox: &mut Mailbox,
        flags: OpenFlags,
    ) -> Result<(), Error> {
        if !self.link(mailbox)? {
            return Err(Error::AccountRejected);
        }

        if !(flags.read_only && flags.peek) {
            if let Some(lock_path) = ops.lock_path(mailbox) {
                let kind = if flags.read_only {
                    LockKind::Shared
                } else {
                    LockKind::Exclusive
                };
                mailbox.lock = Some(ScopedLock::acquire(&lock_path, kind)?);
            }
        }

        let result = if flags.append {
            ops.mbox_open_append(mailbox, &flags)
        } else {
            ops.mbox_open(mailbox)
        };

        result.map_err(|e| match e {
            Error::CorruptStore(why) => Error::OpenAborted(why),
            e if e.is_path_error() => e,
            Error::LockContention => Error::LockContention,
            e => Error::OpenFailed(Box::new(e)),
        })
    }

    /// Look for changes made to the store by other processes.
    ///
    /// Sessions opened for appending always report `NoChange`. If the store
    /// is locked by someone else, the result is `Locked` and the session
    /// stays open.
    pub fn check(&mut self, ctx: &mut Context) -> Result<CheckResult, Error> {
        let ops = self.session_ops(&ctx.mailbox)?;
        if ctx.mailbox.flags.append {
            return Ok(CheckResult::NoChange);
        }

        self.check_inner(ops, &mut ctx.mailbox)
    }

    fn check_inner(
        &mut self,
        ops: &'static dyn MxOps,
        mailbox: &mut Mailbox,
    ) -> Result<CheckResult, Error> {
        mailbox.state = MailboxState::Checking;
        match ops.mbox_check(mailbox) {
            Ok(result) => {
                mailbox.state = MailboxState::Open;
                if CheckResult::Reopened == result && !mailbox.flags.no_sort {
                    mailbox.emails.sort_by_key(|e| e.received);
                }
                if CheckResult::NoChange != result {
                    debug!("{} Check: {:?}", mailbox.log_prefix, result);
                }
                Ok(result)
            }
            Err(Error::LockContention) => {
                mailbox.state = MailboxState::Open;
                debug!("{} Check: store is locked", mailbox.log_prefix);
                Ok(CheckResult::Locked)
            }
            Err(e) => Err(self.fail(mailbox, e)),
        }
    }

    /// Write the changes made in this session back to the store.
    ///
    /// If a trash mailbox is configured, the index is checked against the
    /// store and the messages about to be deleted are copied to the trash
    /// before anything is written; if that fails, the store is left alone.
    ///
    /// `Locked` means the store is locked by someone else and nothing was
    /// written; the changes stay pending.
    pub fn sync(&mut self, ctx: &mut Context) -> Result<CheckResult, Error> {
        let ops = self.session_ops(&ctx.mailbox)?;
        self.sync_inner(ops, &mut ctx.mailbox)
    }

    fn sync_inner(
        &mut self,
        ops: &'static dyn MxOps,
        mailbox: &mut Mailbox,
    ) -> Result<CheckResult, Error> {
        if !mailbox.has_pending_changes() {
            return Ok(CheckResult::NoChange);
        }

        if mailbox.read_only() {
            return Err(Error::ReadOnly);
        }

        let mut changes = CheckResult::NoChange;
        if mailbox.deleted_count() > 0 && self.config.trash.is_some() {
            // Anything the backend would only notice while syncing must be
            // picked up now, or the trash copy would be repeated on the next
            // sync.
            changes = self.check_inner(ops, mailbox)?;
            if CheckResult::Locked == changes {
                return Ok(changes);
            }
            if mailbox.deleted_count() > 0 {
                self.copy_to_trash(mailbox)?;
            }
        }

        mailbox.state = MailboxState::Syncing;
        match ops.mbox_sync(mailbox) {
            // The backend found the store rewritten under it and rebuilt the
            // index instead; the local changes are still pending.
            Ok(CheckResult::Reopened) => {
                mailbox.state = MailboxState::Open;
                if !mailbox.flags.no_sort {
                    mailbox.emails.sort_by_key(|e| e.received);
                }
                warn!(
                    "{} Store changed during sync, changes not written",
                    mailbox.log_prefix
                );
                Ok(CheckResult::Reopened)
            }
            Err(Error::LockContention) => {
                mailbox.state = MailboxState::Open;
                debug!("{} Sync: store is locked", mailbox.log_prefix);
                Ok(CheckResult::Locked)
            }
            Ok(result) => {
                let purged = mailbox.deleted_count();
                mailbox.purge_deleted();
                for email in &mut mailbox.emails {
                    email.changed = false;
                }
                mailbox.state = MailboxState::Open;
                info!(
                    "{} Synced, {} messages purged",
                    mailbox.log_prefix, purged
                );
                Ok(changes.supersede(result))
            }
            Err(e) => Err(self.fail(mailbox, e)),
        }
    }

    /// Close the session.
    ///
    /// Pending changes are synced first unless the session is read-only,
    /// quiet or peeking. All resources are released whether or not that
    /// succeeds; the outcome of the final sync is returned.
    pub fn close(&mut self, ctx: Context) -> Result<CheckResult, Error> {
        let mut mailbox = ctx.mailbox;
        let flags = mailbox.flags;

        let result = match self.session_ops(&mailbox) {
            Ok(ops)
                if !flags.read_only
                    && !flags.quiet
                    && !flags.peek
                    && mailbox.has_pending_changes() =>
            {
                self.sync_inner(ops, &mut mailbox)
            }
            _ => Ok(CheckResult::NoChange),
        };

        self.fast_close(&mut mailbox);
        result
    }

    /// Release everything held by `mailbox` without writing anything back.
    ///
    /// This never fails; problems are logged.
    pub fn fast_close(&mut self, mailbox: &mut Mailbox) {
        if MailboxState::Closed == mailbox.state {
            return;
        }

        if let Some(ops) = mailbox.kind.and_then(|k| self.registry.lookup(k))
        {
            if let Err(e) = ops.mbox_close(mailbox) {
                warn!("{} Error closing: {}", mailbox.log_prefix, e);
            }
        }

        mailbox.clear_data();
        mailbox.emails.clear();
        mailbox.lock = None;
        self.unlink(mailbox);
        mailbox.state = MailboxState::Closed;
    }

    /// Gather statistics about `mailbox`, which need not be open.
    ///
    /// Nothing is locked or modified.
    pub fn check_stats(
        &self,
        mailbox: &Mailbox,
        flags: CheckStatsFlags,
    ) -> Result<StatsReport, Error> {
        let kind = match mailbox.kind {
            Some(kind) => kind,
            None => self.probe(&mailbox.path)?,
        };
        let ops = self.registry.lookup(kind).ok_or(Error::UnknownBackend)?;
        ops.mbox_check_stats(mailbox, flags)
    }

    fn session_ops(
        &self,
        mailbox: &Mailbox,
    ) -> Result<&'static dyn MxOps, Error> {
        if !mailbox.is_open() {
            return Err(Error::MailboxClosed);
        }

        mailbox
            .kind
            .and_then(|k| self.registry.lookup(k))
            .ok_or(Error::MailboxClosed)
    }

    /// Handle an error from `check` or `sync`, fast-closing the session if
    /// it is no longer usable.
    fn fail(&mut self, mailbox: &mut Mailbox, e: Error) -> Error {
        if e.is_transient() {
            mailbox.state = MailboxState::Open;
        } else {
            error!(
                "{} Closing mailbox after error: {}",
                mailbox.log_prefix, e
            );
            mailbox.state = MailboxState::Error;
            mailbox.last_error = Some(e.to_string());
            self.fast_close(mailbox);
        }
        e
    }

    fn copy_to_trash(&mut self, mailbox: &mut Mailbox) -> Result<(), Error> {
        let trash = match self.config.trash {
            Some(ref trash) => trash.clone(),
            None => return Ok(()),
        };

        let folder = self.config.folder.clone();
        let trash = match self.canonicalize(&trash, folder.as_deref()) {
            Ok((canon, _)) => canon,
            // Not created yet; it can't be this mailbox then.
            Err(Error::UnrecognizedPath) => {
                expand_trash(&trash, folder.as_deref())
            }
            Err(e) => return Err(e),
        };
        let this = self
            .canonicalize(&mailbox.path, None)
            .map(|(canon, _)| canon)
            .unwrap_or_else(|_| mailbox.path.clone());
        if trash == this {
            return Ok(());
        }

        let deleted = mailbox
            .emails
            .iter()
            .enumerate()
            .filter(|&(_, e)| e.deleted)
            .map(|(ix, _)| ix)
            .collect::<Vec<_>>();

        let mut dst = self.open(
            Mailbox::new(trash),
            OpenFlags::new().with_append_if_missing().with_quiet(),
        )?;

        // Borrow the mailbox as a context for the duration of the copy
        let mut src = Context {
            mailbox: std::mem::replace(mailbox, Mailbox::new("")),
        };
        let mut result = Ok(());
        for ix in deleted {
            result = self.copy_message(&mut src, ix, &mut dst);
            if result.is_err() {
                break;
            }
        }
        *mailbox = src.mailbox;

        let close_result = self.close(dst);
        if let Err(ref e) = result {
            warn!(
                "{} Failed to copy messages to trash: {}",
                mailbox.log_prefix, e
            );
        }
        result.and(close_result.map(|_| ()))
    }
}

fn expand_trash(trash: &str, folder: Option<&str>) -> String {
    match (trash.chars().next(), folder) {
        (Some('='), Some(folder)) | (Some('+'), Some(folder)) => {
            format!("{}/{}", folder.trim_end_matches('/'), &trash[1..])
        }
        _ => trash.to_owned(),
    }
}

fn is_missing(path: &str) -> bool {
    !path.contains("://")
        && matches!(
            fs::symlink_metadata(path),
            Err(ref e) if io::ErrorKind::NotFound == e.kind()
        )
}

#[cfg(test)]
mod test {
    use std::io::{Read, Write};
    use std::time::Duration;

    use super::super::test_prelude::*;
    use super::*;

    #[test]
    fn close_releases_lock_and_account() {
        let setup = set_up();
        let mut mx = test_mx();
        setup.flat("mbox", MBOX_TWO);

        let ctx = mx
            .open(Mailbox::new(setup.path_str("mbox")), OpenFlags::new())
            .unwrap();
        assert!(ctx.mailbox().is_locked());
        assert!(ctx.mailbox().account().is_some());
        assert_eq!(2, ctx.mailbox().count());

        assert_eq!(CheckResult::NoChange, mx.close(ctx).unwrap());
        assert!(mx.accounts().is_empty());

        // Lock is free again
        let ctx = mx
            .open(Mailbox::new(setup.path_str("mbox")), OpenFlags::new())
            .unwrap();
        mx.close(ctx).unwrap();
    }

    #[test]
    fn two_writers_contend() {
        let setup = set_up();
        let mut mx = test_mx();
        setup.flat("mbox", MBOX_TWO);

        let ctx = mx
            .open(Mailbox::new(setup.path_str("mbox")), OpenFlags::new())
            .unwrap();
        assert_matches!(
            Err(Error::LockContention),
            mx.open(Mailbox::new(setup.path_str("mbox")), OpenFlags::new())
        );
        assert_matches!(
            Err(Error::LockContention),
            mx.open(
                Mailbox::new(setup.path_str("mbox")),
                OpenFlags::read_only()
            )
        );
        // Peeking takes no lock at all
        let peek = mx
            .open(
                Mailbox::new(setup.path_str("mbox")),
                OpenFlags::read_only().with_peek(),
            )
            .unwrap();
        assert!(!peek.mailbox().is_locked());
        mx.close(peek).unwrap();

        // The failed opens did not leave accounts behind
        assert_eq!(1, mx.accounts().len());
        mx.close(ctx).unwrap();
        assert!(mx.accounts().is_empty());
    }

    #[test]
    fn readers_share() {
        let setup = set_up();
        let mut mx = test_mx();
        setup.flat("mbox", MBOX_TWO);

        let a = mx
            .open(
                Mailbox::new(setup.path_str("mbox")),
                OpenFlags::read_only(),
            )
            .unwrap();
        let b = mx
            .open(
                Mailbox::new(setup.path_str("mbox")),
                OpenFlags::read_only(),
            )
            .unwrap();
        mx.close(a).unwrap();
        mx.close(b).unwrap();
    }

    #[test]
    fn open_errors() {
        let setup = set_up();
        let mut mx = test_mx();
        setup.flat("junk", "hello\n");
        // An MMDF separator which is never closed
        setup.flat("corrupt", "\x01\x01\x01\x01\nSubject: x\n");

        assert_matches!(
            Err(Error::UnrecognizedPath),
            mx.open(Mailbox::new(setup.path_str("junk")), OpenFlags::new())
        );
        assert_matches!(
            Err(Error::UnrecognizedPath),
            mx.open(Mailbox::new(setup.path_str("nx")), OpenFlags::new())
        );
        assert_matches!(
            Err(Error::IncompatibleFlags(_)),
            mx.open(
                Mailbox::new(setup.path_str("junk")),
                OpenFlags {
                    append: true,
                    read_only: true,
                    ..OpenFlags::default()
                }
            )
        );
        assert_matches!(
            Err(Error::OpenAborted(_)),
            mx.open(Mailbox::new(setup.path_str("corrupt")), OpenFlags::new())
        );
        assert!(mx.accounts().is_empty());

        // Forcing the wrong backend fails the open
        assert_matches!(
            Err(Error::OpenFailed(_)),
            mx.open(
                Mailbox::with_type(setup.path_str("nx"), MailboxType::Maildir),
                OpenFlags::new()
            )
        );
        assert_matches!(
            Err(Error::UnknownBackend),
            mx.open(
                Mailbox::with_type(setup.path_str("junk"), MailboxType::Mh),
                OpenFlags::new()
            )
        );
        assert!(mx.accounts().is_empty());
    }

    #[test]
    fn append_new_creates_default_type() {
        let setup = set_up();
        let mut config = MxConfig::default();
        config.default_type = MailboxType::Maildir;
        let mut mx = test_mx_with(config);

        let ctx = mx
            .open(
                Mailbox::new(setup.path_str("fresh")),
                OpenFlags::new().with_append_if_missing(),
            )
            .unwrap();
        assert_eq!(Some(MailboxType::Maildir), ctx.mailbox().kind());
        mx.close(ctx).unwrap();

        for sub in &["cur", "new", "tmp"] {
            assert!(setup.path("fresh").join(sub).is_dir());
        }
        assert_eq!(
            MailboxType::Maildir,
            mx.probe(&setup.path_str("fresh")).unwrap()
        );
        assert!(mx.is_empty(&setup.path_str("fresh")).unwrap());
    }

    #[test]
    fn append_new_mbox() {
        let setup = set_up();
        let mut mx = test_mx();

        assert_matches!(
            Err(Error::UnrecognizedPath),
            mx.open(Mailbox::new(setup.path_str("out")), OpenFlags::append())
        );
        assert!(!setup.path("out").exists());

        let mut ctx = mx
            .open(
                Mailbox::new(setup.path_str("out")),
                OpenFlags::new().with_append_if_missing(),
            )
            .unwrap();
        assert_eq!(Some(MailboxType::Mbox), ctx.mailbox().kind());
        assert_eq!(CheckResult::NoChange, mx.check(&mut ctx).unwrap());
        let mut msg = mx
            .msg_open_new(&mut ctx, None, MsgOpenFlags::ADD_FROM)
            .unwrap();
        msg.write_all(b"Subject: hello\n\nWorld.\n").unwrap();
        mx.msg_commit(&mut ctx, &mut msg).unwrap();
        mx.msg_close(&mut ctx, msg).unwrap();
        mx.close(ctx).unwrap();

        let ctx = mx
            .open(Mailbox::new(setup.path_str("out")), OpenFlags::read_only())
            .unwrap();
        assert_eq!(1, ctx.mailbox().count());
        mx.close(ctx).unwrap();
    }

    #[test]
    fn untouched_store_checks_no_change() {
        let setup = set_up();
        let mut mx = test_mx();
        setup.flat("mbox", MBOX_TWO);
        let md = setup.maildir("md");
        fs::write(md.join("cur/100.a.host:2,S"), "Subject: a\n\na\n").unwrap();

        for name in &["mbox", "md"] {
            let mut ctx = mx
                .open(Mailbox::new(setup.path_str(name)), OpenFlags::new())
                .unwrap();
            assert_eq!(CheckResult::NoChange, mx.check(&mut ctx).unwrap());
            assert_eq!(CheckResult::NoChange, mx.check(&mut ctx).unwrap());
            mx.close(ctx).unwrap();
        }
    }

    #[test]
    fn external_append_is_new_mail() {
        let setup = set_up();
        let mut mx = test_mx();
        setup.flat("mbox", MBOX_TWO);

        let mut ctx = mx
            .open(Mailbox::new(setup.path_str("mbox")), OpenFlags::new())
            .unwrap();
        assert_eq!(2, ctx.mailbox().count());
        setup.append("mbox", MBOX_THIRD);
        assert_eq!(CheckResult::NewMail, mx.check(&mut ctx).unwrap());
        assert_eq!(3, ctx.mailbox().count());
        assert_eq!(CheckResult::NoChange, mx.check(&mut ctx).unwrap());

        let mut msg = mx.msg_open(&mut ctx, 2).unwrap();
        let mut content = String::new();
        msg.read_to_string(&mut content).unwrap();
        assert!(content.starts_with("From: carol@example.com\n"));
        mx.msg_close(&mut ctx, msg).unwrap();
        mx.close(ctx).unwrap();
    }

    #[test]
    fn external_rewrite_is_reopened() {
        let setup = set_up();
        let mut mx = test_mx();
        setup.flat("mbox", MBOX_TWO);

        let mut ctx = mx
            .open(Mailbox::new(setup.path_str("mbox")), OpenFlags::new())
            .unwrap();
        ctx.mailbox_mut()
            .set_flags(1, MessageFlags::FLAGGED, true)
            .unwrap();
        setup.flat("mbox", &MBOX_TWO[MBOX_TWO.find("From bob").unwrap()..]);
        assert_eq!(CheckResult::Reopened, mx.check(&mut ctx).unwrap());
        assert_eq!(1, ctx.mailbox().count());
        // The local flag change survives the reopen
        assert!(ctx.mailbox().emails()[0]
            .flags
            .contains(MessageFlags::FLAGGED));
        mx.close(ctx).unwrap();
    }

    #[test]
    fn maildir_external_changes() {
        let setup = set_up();
        let mut mx = test_mx();
        let md = setup.maildir("md");
        fs::write(md.join("cur/100.a.host:2,"), "Subject: a\n\na\n").unwrap();
        fs::write(md.join("cur/200.b.host:2,S"), "Subject: b\n\nb\n").unwrap();

        let mut ctx = mx
            .open(Mailbox::new(setup.path_str("md")), OpenFlags::new())
            .unwrap();
        assert_eq!(2, ctx.mailbox().count());

        fs::rename(md.join("cur/100.a.host:2,"), md.join("cur/100.a.host:2,F"))
            .unwrap();
        assert_eq!(CheckResult::FlagsChanged, mx.check(&mut ctx).unwrap());
        assert!(ctx.mailbox().emails()[0]
            .flags
            .contains(MessageFlags::FLAGGED));

        fs::write(md.join("new/300.c.host"), "Subject: c\n\nc\n").unwrap();
        assert_eq!(CheckResult::NewMail, mx.check(&mut ctx).unwrap());
        assert_eq!(3, ctx.mailbox().count());

        fs::remove_file(md.join("cur/200.b.host:2,S")).unwrap();
        fs::write(md.join("new/400.d.host"), "Subject: d\n\nd\n").unwrap();
        assert_eq!(CheckResult::Reopened, mx.check(&mut ctx).unwrap());
        assert_eq!(3, ctx.mailbox().count());
        mx.close(ctx).unwrap();
    }

    #[test]
    fn sync_is_idempotent() {
        let setup = set_up();
        let mut mx = test_mx();
        setup.flat("mbox", MBOX_TWO);
        let md = setup.maildir("md");
        fs::write(md.join("cur/100.a.host:2,"), "Subject: a\n\na\n").unwrap();
        fs::write(md.join("cur/200.b.host:2,"), "Subject: b\n\nb\n").unwrap();

        for name in &["mbox", "md"] {
            let mut ctx = mx
                .open(Mailbox::new(setup.path_str(name)), OpenFlags::new())
                .unwrap();
            ctx.mailbox_mut()
                .set_flags(0, MessageFlags::FLAGGED, true)
                .unwrap();
            ctx.mailbox_mut().set_deleted(1, true).unwrap();
            mx.sync(&mut ctx).unwrap();
            assert_eq!(1, ctx.mailbox().count());
            assert!(!ctx.mailbox().has_pending_changes());

            let before = snapshot(&setup.path(name));
            assert_eq!(CheckResult::NoChange, mx.sync(&mut ctx).unwrap());
            assert_eq!(before, snapshot(&setup.path(name)));
            assert_eq!(CheckResult::NoChange, mx.check(&mut ctx).unwrap());
            mx.close(ctx).unwrap();

            let ctx = mx
                .open(
                    Mailbox::new(setup.path_str(name)),
                    OpenFlags::read_only(),
                )
                .unwrap();
            assert_eq!(1, ctx.mailbox().count());
            assert!(ctx.mailbox().emails()[0]
                .flags
                .contains(MessageFlags::FLAGGED));
            mx.close(ctx).unwrap();
        }
    }

    fn snapshot(path: &std::path::Path) -> Vec<(String, Vec<u8>)> {
        let mut out = Vec::new();
        if path.is_file() {
            out.push((String::new(), fs::read(path).unwrap()));
        } else {
            for sub in &["cur", "new"] {
                for entry in fs::read_dir(path.join(sub)).unwrap() {
                    let entry = entry.unwrap();
                    out.push((
                        entry.file_name().to_str().unwrap().to_owned(),
                        fs::read(entry.path()).unwrap(),
                    ));
                }
            }
        }
        out.sort();
        out
    }

    #[test]
    fn read_only_sync_refused() {
        let setup = set_up();
        let mut mx = test_mx();
        setup.flat("mbox", MBOX_TWO);
        let before = fs::read(setup.path("mbox")).unwrap();

        let mut ctx = mx
            .open(
                Mailbox::new(setup.path_str("mbox")),
                OpenFlags::read_only(),
            )
            .unwrap();
        ctx.mailbox_mut().set_deleted(0, true).unwrap();
        assert_matches!(Err(Error::ReadOnly), mx.sync(&mut ctx));
        // Still usable
        assert!(ctx.mailbox().is_open());
        assert_eq!(CheckResult::NoChange, mx.close(ctx).unwrap());
        assert_eq!(before, fs::read(setup.path("mbox")).unwrap());
    }

    #[test]
    fn close_syncs_unless_quiet() {
        let setup = set_up();
        let mut mx = test_mx();
        setup.flat("mbox", MBOX_TWO);

        let mut ctx = mx
            .open(
                Mailbox::new(setup.path_str("mbox")),
                OpenFlags::new().with_quiet(),
            )
            .unwrap();
        ctx.mailbox_mut().set_deleted(0, true).unwrap();
        mx.close(ctx).unwrap();
        assert_eq!(
            MBOX_TWO.as_bytes(),
            &fs::read(setup.path("mbox")).unwrap()[..]
        );

        let mut ctx = mx
            .open(Mailbox::new(setup.path_str("mbox")), OpenFlags::new())
            .unwrap();
        ctx.mailbox_mut().set_deleted(0, true).unwrap();
        mx.close(ctx).unwrap();

        let ctx = mx
            .open(Mailbox::new(setup.path_str("mbox")), OpenFlags::new())
            .unwrap();
        assert_eq!(1, ctx.mailbox().count());
        mx.close(ctx).unwrap();
    }

    #[test]
    fn failed_final_sync_still_closes() {
        let setup = set_up();
        let mut mx = test_mx();
        setup.flat("mbox", MBOX_TWO);

        let mut ctx = mx
            .open(Mailbox::new(setup.path_str("mbox")), OpenFlags::new())
            .unwrap();
        ctx.mailbox_mut().set_deleted(0, true).unwrap();
        crate::backend::mbox::fail_writes_after(ctx.mailbox_mut(), 10);

        assert!(mx.close(ctx).is_err());
        assert!(mx.accounts().is_empty());
        assert_eq!(
            MBOX_TWO.as_bytes(),
            &fs::read(setup.path("mbox")).unwrap()[..]
        );

        // Lock released
        let ctx = mx
            .open(Mailbox::new(setup.path_str("mbox")), OpenFlags::new())
            .unwrap();
        assert_eq!(2, ctx.mailbox().count());
        mx.close(ctx).unwrap();
    }

    #[test]
    fn fatal_sync_error_fast_closes() {
        let setup = set_up();
        let mut mx = test_mx();
        setup.flat("mbox", MBOX_TWO);

        let mut ctx = mx
            .open(Mailbox::new(setup.path_str("mbox")), OpenFlags::new())
            .unwrap();
        ctx.mailbox_mut()
            .set_flags(0, MessageFlags::READ, true)
            .unwrap();
        crate::backend::mbox::fail_writes_after(ctx.mailbox_mut(), 0);

        assert!(mx.sync(&mut ctx).is_err());
        assert_eq!(MailboxState::Closed, ctx.mailbox().state());
        assert!(ctx.mailbox().last_error().is_some());
        assert!(!ctx.mailbox().is_locked());
        assert_matches!(Err(Error::MailboxClosed), mx.check(&mut ctx));
        assert_eq!(CheckResult::NoChange, mx.close(ctx).unwrap());
        assert!(mx.accounts().is_empty());
    }

    #[test]
    fn deleted_messages_go_to_trash() {
        let setup = set_up();
        let mut config = MxConfig::default();
        config.folder = Some(setup.path_str(""));
        config.trash = Some("=trash".to_owned());
        let mut mx = test_mx_with(config);
        setup.flat("mbox", MBOX_TWO);

        let mut ctx = mx
            .open(Mailbox::new(setup.path_str("mbox")), OpenFlags::new())
            .unwrap();
        ctx.mailbox_mut().set_deleted(0, true).unwrap();
        mx.sync(&mut ctx).unwrap();
        assert_eq!(1, ctx.mailbox().count());
        mx.close(ctx).unwrap();

        let mut trash = mx
            .open(Mailbox::new(setup.path_str("trash")), OpenFlags::new())
            .unwrap();
        assert_eq!(1, trash.mailbox().count());
        let mut msg = mx.msg_open(&mut trash, 0).unwrap();
        let mut content = String::new();
        msg.read_to_string(&mut content).unwrap();
        assert!(content.contains("Subject: one\n"));
        mx.msg_close(&mut trash, msg).unwrap();

        // Deleting from the trash itself purges directly
        trash.mailbox_mut().set_deleted(0, true).unwrap();
        mx.close(trash).unwrap();
        assert!(mx.is_empty(&setup.path_str("trash")).unwrap());
    }

    #[test]
    fn trash_failure_leaves_store_alone() {
        let setup = set_up();
        let mut config = MxConfig::default();
        config.trash = Some(setup.path_str("nodir/trash"));
        let mut mx = test_mx_with(config);
        setup.flat("mbox", MBOX_TWO);

        let mut ctx = mx
            .open(Mailbox::new(setup.path_str("mbox")), OpenFlags::new())
            .unwrap();
        ctx.mailbox_mut().set_deleted(0, true).unwrap();
        assert!(mx.sync(&mut ctx).is_err());
        assert!(ctx.mailbox().is_open());
        assert_eq!(2, ctx.mailbox().count());
        assert_eq!(
            MBOX_TWO.as_bytes(),
            &fs::read(setup.path("mbox")).unwrap()[..]
        );

        ctx.mailbox_mut().set_deleted(0, false).unwrap();
        mx.close(ctx).unwrap();
    }

    #[test]
    fn trash_copy_happens_once_after_external_rewrite() {
        let setup = set_up();
        let mut config = MxConfig::default();
        config.folder = Some(setup.path_str(""));
        config.trash = Some("=trash".to_owned());
        let mut mx = test_mx_with(config);
        setup.flat("mbox", MBOX_TWO);

        let mut ctx = mx
            .open(Mailbox::new(setup.path_str("mbox")), OpenFlags::new())
            .unwrap();
        ctx.mailbox_mut().set_deleted(0, true).unwrap();

        // Someone else rewrites the file, marking the second message unread
        setup.flat("mbox", &MBOX_TWO.replace("Status: RO\n", ""));

        assert_eq!(CheckResult::Reopened, mx.sync(&mut ctx).unwrap());
        assert_eq!(1, ctx.mailbox().count());
        assert_eq!(CheckResult::NoChange, mx.sync(&mut ctx).unwrap());
        mx.close(ctx).unwrap();

        let ctx = mx
            .open(Mailbox::new(setup.path_str("trash")), OpenFlags::read_only())
            .unwrap();
        assert_eq!(1, ctx.mailbox().count());
        assert_eq!(
            Some("alice@example.com"),
            ctx.mailbox().emails()[0].sender.as_deref()
        );
        mx.close(ctx).unwrap();

        let ctx = mx
            .open(Mailbox::new(setup.path_str("mbox")), OpenFlags::read_only())
            .unwrap();
        assert_eq!(1, ctx.mailbox().count());
        assert!(!ctx.mailbox().emails()[0]
            .flags
            .contains(MessageFlags::READ));
        mx.close(ctx).unwrap();
    }

    #[test]
    fn contention_reports_locked() {
        let mut mx = test_mx();
        crate::mx::test_backend::seed("locked.test", "INBOX", 2);

        let mut ctx = mx
            .open(Mailbox::new("imap://locked.test/INBOX"), OpenFlags::new())
            .unwrap();
        ctx.mailbox_mut()
            .set_flags(0, MessageFlags::FLAGGED, true)
            .unwrap();

        crate::mx::test_backend::set_locked("locked.test", "INBOX", true);
        assert_eq!(CheckResult::Locked, mx.check(&mut ctx).unwrap());
        assert_eq!(CheckResult::Locked, mx.sync(&mut ctx).unwrap());
        assert!(ctx.mailbox().is_open());
        assert!(ctx.mailbox().has_pending_changes());

        crate::mx::test_backend::set_locked("locked.test", "INBOX", false);
        assert_eq!(CheckResult::NoChange, mx.sync(&mut ctx).unwrap());
        assert!(!ctx.mailbox().has_pending_changes());
        mx.close(ctx).unwrap();

        let report = mx
            .check_stats(
                &Mailbox::new("imap://locked.test/INBOX"),
                CheckStatsFlags::COUNTS,
            )
            .unwrap();
        assert_eq!(1, report.stats.unwrap().flagged);
    }

    #[test]
    fn stats_without_opening() {
        let setup = set_up();
        let mx = test_mx();
        setup.flat("mbox", MBOX_TWO);
        let md = setup.maildir("md");
        fs::write(md.join("cur/100.a.host:2,S"), "a").unwrap();
        fs::write(md.join("cur/200.b.host:2,FS"), "b").unwrap();
        fs::write(md.join("new/300.c.host"), "c").unwrap();

        let mb = Mailbox::new(setup.path_str("md"));
        let report = mx.check_stats(&mb, CheckStatsFlags::COUNTS).unwrap();
        assert_eq!(CheckStatsResult::NewMail, report.result);
        assert_eq!(
            Some(MailboxStats {
                total: 3,
                unread: 1,
                flagged: 1,
            }),
            report.stats
        );

        let mut mb = Mailbox::new(setup.path_str("mbox"));
        let report = mx
            .check_stats(&mb, CheckStatsFlags::COUNTS | CheckStatsFlags::FORCE)
            .unwrap();
        assert_eq!(CheckStatsResult::NewMail, report.result);
        assert_eq!(
            Some(MailboxStats {
                total: 2,
                unread: 1,
                flagged: 0,
            }),
            report.stats
        );

        mb.set_last_visited(SystemTime::now() + Duration::from_secs(3600));
        let report = mx.check_stats(&mb, CheckStatsFlags::empty()).unwrap();
        assert_eq!(CheckStatsResult::NoChange, report.result);
        assert_eq!(None, report.stats);
    }

    #[test]
    fn peek_preserves_access_time() {
        let setup = set_up();
        let mut mx = test_mx();
        let path = setup.flat("mbox", MBOX_TWO);
        let old = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000);
        crate::support::file_ops::set_times(&path, old, old).unwrap();

        let ctx = mx
            .open(
                Mailbox::new(setup.path_str("mbox")),
                OpenFlags::read_only().with_peek(),
            )
            .unwrap();
        mx.close(ctx).unwrap();

        assert_eq!(old, fs::metadata(&path).unwrap().accessed().unwrap());
    }

    #[test]
    fn remote_session() {
        let mut mx = test_mx();
        crate::mx::test_backend::seed("session.test", "INBOX", 3);

        let mut ctx = mx
            .open(Mailbox::new("imap://session.test/INBOX"), OpenFlags::new())
            .unwrap();
        assert_eq!(3, ctx.mailbox().count());
        assert!(!ctx.mailbox().is_locked());

        crate::mx::test_backend::seed("session.test", "INBOX", 1);
        assert_eq!(CheckResult::NewMail, mx.check(&mut ctx).unwrap());
        assert_eq!(4, ctx.mailbox().count());

        ctx.mailbox_mut().set_deleted(0, true).unwrap();
        mx.close(ctx).unwrap();

        let report = mx
            .check_stats(
                &Mailbox::new("imap://session.test/INBOX"),
                CheckStatsFlags::COUNTS | CheckStatsFlags::FORCE,
            )
            .unwrap();
        assert_eq!(3, report.stats.unwrap().total);
    }
}
