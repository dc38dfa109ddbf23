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

//! A remote, multi-folder, tag-capable backend for tests.
//!
//! Mailboxes are `imap://host/folder` URIs served by an in-process fake
//! server. Tests running in parallel share the server, so each test should
//! use its own host name.

use std::collections::HashMap;
use std::fs;
use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Mutex;

use chrono::prelude::*;
use lazy_static::lazy_static;

use super::account::Account;
use super::mailbox::{Email, Location, Mailbox};
use super::message::Message;
use super::model::*;
use super::ops::MxOps;
use super::tags::{self, TagList};
use crate::backend::maildir::Maildir;
use crate::backend::mbox::Mbox;
use crate::support::error::Error;

pub static TEST_BACKENDS: &[&dyn MxOps] =
    &[&FakeImap, &Maildir, &Mbox::MMDF, &Mbox::MBOX];

#[derive(Clone, Debug)]
struct FakeMessage {
    uid: u32,
    flags: MessageFlags,
    tags: String,
    received: DateTime<Utc>,
    content: Vec<u8>,
}

#[derive(Debug, Default)]
struct FakeFolder {
    next_uid: u32,
    messages: Vec<FakeMessage>,
    locked: bool,
}

impl FakeFolder {
    fn append(
        &mut self,
        flags: MessageFlags,
        received: DateTime<Utc>,
        content: Vec<u8>,
    ) -> u32 {
        self.next_uid += 1;
        self.messages.push(FakeMessage {
            uid: self.next_uid,
            flags,
            tags: String::new(),
            received,
            content,
        });
        self.next_uid
    }
}

lazy_static! {
    static ref SERVER: Mutex<HashMap<(String, String), FakeFolder>> =
        Mutex::new(HashMap::new());
}

/// Add `count` unread messages to `folder` on `host`, creating it if needed.
pub fn seed(host: &str, folder: &str, count: usize) {
    let mut server = SERVER.lock().unwrap();
    let folder = server
        .entry((host.to_owned(), folder.to_owned()))
        .or_default();
    for _ in 0..count {
        let n = folder.next_uid + 1;
        folder.append(
            MessageFlags::empty(),
            Utc.timestamp(1_600_000_000 + i64::from(n), 0),
            format!("Subject: message {}\n\nBody {}.\n", n, n).into_bytes(),
        );
    }
}

/// Make `folder` on `host` refuse checks and syncs as if another client
/// held it.
pub fn set_locked(host: &str, folder: &str, locked: bool) {
    let mut server = SERVER.lock().unwrap();
    server
        .entry((host.to_owned(), folder.to_owned()))
        .or_default()
        .locked = locked;
}

fn ensure_unlocked(path: &str) -> Result<(), Error> {
    if with_folder(path, |f| f.locked)? {
        Err(Error::LockContention)
    } else {
        Ok(())
    }
}

fn with_folder<R>(
    path: &str,
    f: impl FnOnce(&mut FakeFolder) -> R,
) -> Result<R, Error> {
    let key = split(path)?;
    let mut server = SERVER.lock().unwrap();
    server
        .get_mut(&key)
        .map(f)
        .ok_or_else(|| Error::Io(io::Error::from(io::ErrorKind::NotFound)))
}

fn split(path: &str) -> Result<(String, String), Error> {
    let rest = strip_scheme(path).ok_or(Error::InvalidPath)?;
    let mut parts = rest.splitn(2, '/');
    let host = parts.next().unwrap_or("");
    let folder = parts.next().unwrap_or("INBOX");
    if host.is_empty() {
        return Err(Error::InvalidPath);
    }
    let folder = if folder.is_empty() { "INBOX" } else { folder };
    Ok((host.to_ascii_lowercase(), folder.to_owned()))
}

fn strip_scheme(path: &str) -> Option<&str> {
    if path.len() >= 7 && path[..7].eq_ignore_ascii_case("imap://") {
        Some(&path[7..])
    } else {
        None
    }
}

/// Per-session state: the UIDs known to the index.
struct Session {
    known: Vec<u32>,
}

fn to_email(msg: &FakeMessage, mailbox: &Mailbox) -> Email {
    let mut email = Email::new(Location::Remote(msg.uid));
    email.flags = msg.flags;
    email.received = msg.received;
    email.tags = TagList::parse(&msg.tags, mailbox.config());
    email
}

fn uid_of(email: &Email) -> Result<u32, Error> {
    match email.location {
        Location::Remote(uid) => Ok(uid),
        _ => Err(Error::CorruptStore("non-remote location".to_owned())),
    }
}

pub struct FakeImap;

impl MxOps for FakeImap {
    fn kind(&self) -> MailboxType {
        MailboxType::Imap
    }

    fn is_local(&self) -> bool {
        false
    }

    fn ac_owns_path(&self, account: &Account, path: &str) -> bool {
        match (
            account.mailboxes().first().and_then(|p| split(p).ok()),
            split(path),
        ) {
            (Some((a, _)), Ok((b, _))) => a == b,
            _ => false,
        }
    }

    fn ac_add(&self, account: &mut Account, _mailbox: &Mailbox) -> bool {
        account.mailboxes().len() < 3
    }

    fn mbox_open(&self, mailbox: &mut Mailbox) -> Result<(), Error> {
        let messages = with_folder(mailbox.path(), |f| f.messages.clone())?;
        let emails = messages
            .iter()
            .map(|m| to_email(m, mailbox))
            .collect::<Vec<_>>();
        mailbox.set_data(Session {
            known: messages.iter().map(|m| m.uid).collect(),
        });
        *mailbox.emails_mut() = emails;
        Ok(())
    }

    fn mbox_open_append(
        &self,
        mailbox: &mut Mailbox,
        flags: &OpenFlags,
    ) -> Result<(), Error> {
        let key = split(mailbox.path())?;
        let mut server = SERVER.lock().unwrap();
        if !server.contains_key(&key) {
            if !flags.append_if_missing && !flags.new_folder {
                return Err(Error::Io(io::Error::from(
                    io::ErrorKind::NotFound,
                )));
            }
            server.insert(key, FakeFolder::default());
        }
        drop(server);
        mailbox.set_data(Session { known: Vec::new() });
        Ok(())
    }

    fn mbox_check(&self, mailbox: &mut Mailbox) -> Result<CheckResult, Error> {
        ensure_unlocked(mailbox.path())?;
        let messages = with_folder(mailbox.path(), |f| f.messages.clone())?;
        let known = mailbox.data::<Session>()?.known.clone();

        if known.iter().any(|uid| !messages.iter().any(|m| m.uid == *uid)) {
            let emails = messages
                .iter()
                .map(|m| to_email(m, mailbox))
                .collect::<Vec<_>>();
            *mailbox.emails_mut() = emails;
            mailbox.data_mut::<Session>()?.known =
                messages.iter().map(|m| m.uid).collect();
            return Ok(CheckResult::Reopened);
        }

        let mut result = CheckResult::NoChange;
        for msg in &messages {
            if known.contains(&msg.uid) {
                let email = mailbox
                    .emails_mut()
                    .iter_mut()
                    .find(|e| Location::Remote(msg.uid) == e.location);
                if let Some(email) = email {
                    if !email.changed && email.flags != msg.flags {
                        email.flags = msg.flags;
                        result = result.supersede(CheckResult::FlagsChanged);
                    }
                }
            } else {
                let email = to_email(msg, mailbox);
                mailbox.emails_mut().push(email);
                mailbox.data_mut::<Session>()?.known.push(msg.uid);
                result = result.supersede(CheckResult::NewMail);
            }
        }

        Ok(result)
    }

    fn mbox_check_stats(
        &self,
        mailbox: &Mailbox,
        flags: CheckStatsFlags,
    ) -> Result<StatsReport, Error> {
        let messages = with_folder(mailbox.path(), |f| f.messages.clone())?;
        let since = mailbox.last_visited().map(DateTime::<Utc>::from);
        let new_mail = messages.iter().any(|m| {
            !m.flags.contains(MessageFlags::READ)
                && (flags.contains(CheckStatsFlags::FORCE)
                    || since.map_or(true, |since| m.received > since))
        });

        Ok(StatsReport {
            result: if new_mail {
                CheckStatsResult::NewMail
            } else {
                CheckStatsResult::NoChange
            },
            stats: if flags.contains(CheckStatsFlags::COUNTS) {
                Some(MailboxStats {
                    total: messages.len(),
                    unread: messages
                        .iter()
                        .filter(|m| !m.flags.contains(MessageFlags::READ))
                        .count(),
                    flagged: messages
                        .iter()
                        .filter(|m| m.flags.contains(MessageFlags::FLAGGED))
                        .count(),
                })
            } else {
                None
            },
        })
    }

    fn mbox_sync(&self, mailbox: &mut Mailbox) -> Result<CheckResult, Error> {
        ensure_unlocked(mailbox.path())?;
        let mut updates = Vec::new();
        for email in mailbox.emails() {
            if email.deleted || email.changed {
                updates.push((uid_of(email)?, email.deleted, email.flags));
            }
        }

        with_folder(mailbox.path(), |f| {
            for (uid, deleted, flags) in updates {
                if deleted {
                    f.messages.retain(|m| m.uid != uid);
                } else if let Some(m) =
                    f.messages.iter_mut().find(|m| m.uid == uid)
                {
                    m.flags = flags;
                }
            }
        })?;

        let remaining = mailbox
            .emails()
            .iter()
            .filter(|e| !e.deleted)
            .map(uid_of)
            .collect::<Result<Vec<_>, _>>()?;
        mailbox.data_mut::<Session>()?.known = remaining;
        Ok(CheckResult::NoChange)
    }

    fn mbox_close(&self, _mailbox: &mut Mailbox) -> Result<(), Error> {
        Ok(())
    }

    fn msg_open(
        &self,
        mailbox: &mut Mailbox,
        message: &mut Message,
        index: usize,
    ) -> Result<(), Error> {
        let uid = uid_of(mailbox.email(index)?)?;
        let content = with_folder(mailbox.path(), |f| {
            f.messages
                .iter()
                .find(|m| m.uid == uid)
                .map(|m| m.content.clone())
        })?
        .ok_or_else(|| Error::Io(io::Error::from(io::ErrorKind::NotFound)))?;
        message.set_reader(io::Cursor::new(content));
        Ok(())
    }

    fn msg_open_new(
        &self,
        _mailbox: &mut Mailbox,
        message: &mut Message,
        _add_from: bool,
    ) -> Result<(), Error> {
        message.stage()
    }

    fn msg_commit(
        &self,
        mailbox: &mut Mailbox,
        message: &mut Message,
    ) -> Result<(), Error> {
        let mut content = Vec::new();
        {
            let staging = message.staging_mut()?.as_file_mut();
            staging.seek(SeekFrom::Start(0))?;
            staging.read_to_end(&mut content)?;
        }

        let (flags, received) = (message.flags, message.received);
        let uid = with_folder(mailbox.path(), |f| {
            f.append(flags, received, content)
        })?;
        message.set_committed_path(format!("{};UID={}", mailbox.path(), uid));
        Ok(())
    }

    fn tags_supported(&self) -> bool {
        true
    }

    fn tags_edit(
        &self,
        _mailbox: &mut Mailbox,
        current: &str,
        input: &str,
    ) -> Result<Option<String>, Error> {
        Ok(tags::apply_edit(current, input))
    }

    fn tags_commit(
        &self,
        mailbox: &mut Mailbox,
        index: usize,
        tags: &str,
    ) -> Result<(), Error> {
        let uid = uid_of(mailbox.email(index)?)?;
        with_folder(mailbox.path(), |f| {
            if let Some(m) = f.messages.iter_mut().find(|m| m.uid == uid) {
                m.tags = tags.to_owned();
            }
        })
    }

    fn path_probe(&self, path: &str, _: Option<&fs::Metadata>) -> bool {
        strip_scheme(path).is_some()
    }

    fn path_canon(&self, path: &str) -> Result<String, Error> {
        let (host, _) = split(path)?;
        let rest = strip_scheme(path).ok_or(Error::InvalidPath)?;
        let tail = rest.splitn(2, '/').nth(1).unwrap_or("");
        Ok(format!("imap://{}/{}", host, tail))
    }

    fn path_pretty(
        &self,
        path: &str,
        _folder: Option<&str>,
    ) -> Result<String, Error> {
        Ok(path.to_owned())
    }

    fn path_parent(&self, path: &str) -> Result<String, Error> {
        let (host, folder) = split(path)?;
        match folder.rfind('/') {
            Some(ix) => Ok(format!("imap://{}/{}", host, &folder[..ix])),
            None => Err(Error::NoParent),
        }
    }

    fn path_is_empty(&self, path: &str) -> Result<bool, Error> {
        with_folder(path, |f| f.messages.is_empty()).map_err(|e| match e {
            Error::Io(e) => Error::Access(e),
            e => e,
        })
    }
}
