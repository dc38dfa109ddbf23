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

//! Maildir: one file per message, flags encoded in the file name.
//!
//! Messages are staged in `tmp/` and renamed into `new/` (or `cur/` if they
//! already carry flags) without replacing any existing file, so a reader
//! never sees a partial message. Every change is a rename or unlink of a
//! single file, so sync is idempotent message by message and needs no lock.
//! Other clients may rename files at any time; sync picks up their new names
//! before writing.
//!
//! A message is identified by the part of its file name before the `:`. The
//! part after `:2,` holds the flags, one letter each, in ASCII order.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::prelude::*;
use log::{debug, warn};

use super::local;
use crate::mx::Account;
use crate::mx::hcache::{CacheEntry, HeaderCache};
use crate::mx::mailbox::{Email, Location, Mailbox};
use crate::mx::message::Message;
use crate::mx::model::*;
use crate::mx::ops::MxOps;
use crate::support::error::Error;
use crate::support::file_ops::{self, ErrorTransforms, IgnoreKinds};

const INFO_SEP: &str = ":2,";
const MAX_DELIVERY_ATTEMPTS: u32 = 100;

#[derive(Clone, Copy, Debug, Default)]
pub struct Maildir;

struct MaildirData {
    hcache: Option<HeaderCache>,
}

/// Split a file name into its unique part and its flags.
fn parse_name(name: &str) -> (&str, MessageFlags, bool) {
    let (uid, info) = match name.find(':') {
        Some(ix) => (&name[..ix], &name[ix..]),
        None => (name, ""),
    };

    let mut flags = MessageFlags::empty();
    let mut trashed = false;
    if let Some(letters) = info.strip_prefix(INFO_SEP) {
        for ch in letters.chars() {
            match ch {
                'D' => flags |= MessageFlags::DRAFT,
                'F' => flags |= MessageFlags::FLAGGED,
                'R' => flags |= MessageFlags::REPLIED,
                'S' => flags |= MessageFlags::READ,
                'T' => trashed = true,
                _ => (),
            }
        }
    }

    (uid, flags, trashed)
}

fn render_info(flags: MessageFlags, trashed: bool) -> String {
    let mut info = INFO_SEP.to_owned();
    for &(flag, ch) in &[
        (MessageFlags::DRAFT, 'D'),
        (MessageFlags::FLAGGED, 'F'),
        (MessageFlags::REPLIED, 'R'),
        (MessageFlags::READ, 'S'),
    ] {
        if flags.contains(flag) {
            info.push(ch);
        }
    }
    if trashed {
        info.push('T');
    }
    info
}

/// Delivery names start with the delivery time in seconds.
fn received_from_name(uid: &str) -> Option<DateTime<Utc>> {
    let digits = uid.split('.').next()?;
    let secs = digits.parse::<i64>().ok()?;
    Utc.timestamp_opt(secs, 0).single()
}

fn uid_of(email: &Email) -> Option<&str> {
    match email.location {
        Location::File(ref rel) => rel
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| parse_name(n).0),
        _ => None,
    }
}

fn mtime_of(entry: &fs::DirEntry) -> Option<DateTime<Utc>> {
    entry
        .metadata()
        .and_then(|md| md.modified())
        .ok()
        .map(DateTime::<Utc>::from)
}

/// Read every message in `new/` and `cur/` of `root`.
fn scan(root: &Path) -> Result<Vec<Email>, Error> {
    let mut emails = Vec::new();
    for sub in &["new", "cur"] {
        for entry in fs::read_dir(root.join(sub))? {
            let entry = entry?;
            let name = match entry.file_name().into_string() {
                Ok(name) => name,
                Err(name) => {
                    warn!("Ignoring non-UTF-8 file name {:?}", name);
                    continue;
                }
            };
            if name.starts_with('.') {
                continue;
            }

            let (uid, flags, trashed) = parse_name(&name);
            let mut email =
                Email::new(Location::File(Path::new(sub).join(&name)));
            email.flags = flags;
            email.deleted = trashed;
            if let Some(received) =
                received_from_name(uid).or_else(|| mtime_of(&entry))
            {
                email.received = received;
            }
            emails.push(email);
        }
    }
    Ok(emails)
}

fn hostname() -> String {
    nix::unistd::gethostname()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "localhost".to_owned())
        .replace('/', "\\057")
        .replace(':', "\\072")
}

fn unique_name(received: DateTime<Utc>) -> String {
    format!(
        "{}.M{}P{}R{}.{}",
        received.timestamp(),
        Utc::now().timestamp_subsec_micros(),
        std::process::id(),
        rand::random::<u32>(),
        hostname()
    )
}

/// Find the current file of message `uid`, relative to `root`.
fn locate(root: &Path, uid: &str) -> Result<Option<PathBuf>, Error> {
    for sub in &["cur", "new"] {
        for entry in fs::read_dir(root.join(sub))? {
            let name = entry?.file_name();
            if let Some(name) = name.to_str() {
                if !name.starts_with('.') && uid == parse_name(name).0 {
                    return Ok(Some(Path::new(sub).join(name)));
                }
            }
        }
    }
    Ok(None)
}

fn create_maildir(root: &Path) -> Result<(), Error> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true).mode(0o700);
    for sub in &["cur", "new", "tmp"] {
        builder.create(root.join(sub))?;
    }
    Ok(())
}

fn open_hcache(mailbox: &Mailbox) -> Option<HeaderCache> {
    let root = mailbox.config().header_cache.as_ref()?;
    match HeaderCache::open(root, mailbox.path()) {
        Ok(hc) => Some(hc),
        Err(e) => {
            warn!(
                "{} Header cache unavailable: {}",
                mailbox.log_prefix(),
                e
            );
            None
        }
    }
}

impl MxOps for Maildir {
    fn kind(&self) -> MailboxType {
        MailboxType::Maildir
    }

    fn is_local(&self) -> bool {
        true
    }

    fn ac_owns_path(&self, _account: &Account, _path: &str) -> bool {
        true
    }

    fn mbox_open(&self, mailbox: &mut Mailbox) -> Result<(), Error> {
        let root = mailbox.fs_path().to_owned();
        let hcache = open_hcache(mailbox);

        let mut emails = scan(&root)?;
        if let Some(ref hcache) = hcache {
            for email in &mut emails {
                if let Some(entry) = uid_of(email).and_then(|u| hcache.fetch(u))
                {
                    email.received = entry.received;
                }
            }
        }

        if fs::metadata(root.join("tmp"))
            .map(|md| md.permissions().readonly())
            .unwrap_or(true)
        {
            debug!("{} tmp/ not writable", mailbox.log_prefix());
            mailbox.set_read_only();
        }

        *mailbox.emails_mut() = emails;
        mailbox.set_data(MaildirData { hcache });
        Ok(())
    }

    fn mbox_open_append(
        &self,
        mailbox: &mut Mailbox,
        flags: &OpenFlags,
    ) -> Result<(), Error> {
        let root = mailbox.fs_path().to_owned();
        if flags.append_if_missing || flags.new_folder {
            create_maildir(&root)?;
        } else if !root.join("tmp").is_dir() {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::NotFound,
                "maildir has no tmp directory",
            )));
        }

        let hcache = open_hcache(mailbox);
        mailbox.set_data(MaildirData { hcache });
        Ok(())
    }

    fn mbox_check(&self, mailbox: &mut Mailbox) -> Result<CheckResult, Error> {
        let found = scan(mailbox.fs_path())?;
        let found_uids = found
            .iter()
            .filter_map(uid_of)
            .map(str::to_owned)
            .collect::<HashSet<_>>();

        let vanished = mailbox
            .emails()
            .iter()
            .filter_map(uid_of)
            .any(|uid| !found_uids.contains(uid));

        if vanished {
            // Rebuild the index, keeping what we changed locally
            let local = mailbox
                .emails()
                .iter()
                .filter(|e| e.changed)
                .filter_map(|e| uid_of(e).map(|u| (u.to_owned(), e.clone())))
                .collect::<HashMap<_, _>>();

            let mut rebuilt = found;
            for email in &mut rebuilt {
                if let Some(old) = uid_of(email).and_then(|u| local.get(u)) {
                    email.flags = old.flags;
                    email.deleted = old.deleted;
                    email.changed = true;
                    email.tags = old.tags.clone();
                }
            }

            *mailbox.emails_mut() = rebuilt;
            return Ok(CheckResult::Reopened);
        }

        let known = mailbox
            .emails()
            .iter()
            .enumerate()
            .filter_map(|(ix, e)| uid_of(e).map(|u| (u.to_owned(), ix)))
            .collect::<HashMap<_, _>>();

        let mut result = CheckResult::NoChange;
        for email in found {
            let ix = match uid_of(&email).and_then(|u| known.get(u)) {
                Some(&ix) => ix,
                None => {
                    mailbox.emails_mut().push(email);
                    result = result.supersede(CheckResult::NewMail);
                    continue;
                }
            };

            let old = &mut mailbox.emails_mut()[ix];
            if old.location == email.location {
                continue;
            }

            old.location = email.location;
            if !old.changed
                && (old.flags != email.flags || old.deleted != email.deleted)
            {
                old.flags = email.flags;
                old.deleted = email.deleted;
                result = result.supersede(CheckResult::FlagsChanged);
            }
        }

        Ok(result)
    }

    fn mbox_check_stats(
        &self,
        mailbox: &Mailbox,
        flags: CheckStatsFlags,
    ) -> Result<StatsReport, Error> {
        let root = mailbox.fs_path();
        let since = if flags.contains(CheckStatsFlags::FORCE) {
            None
        } else {
            mailbox.last_visited()
        };

        let mut new_mail = false;
        let mut stats = MailboxStats::default();
        for sub in &["new", "cur"] {
            for entry in fs::read_dir(root.join(sub)).as_access()? {
                let entry = entry?;
                let name = entry.file_name();
                let name = match name.to_str() {
                    Some(name) if !name.starts_with('.') => name,
                    _ => continue,
                };

                let (_, msg_flags, trashed) = parse_name(name);
                if trashed {
                    continue;
                }

                stats.total += 1;
                let unread = !msg_flags.contains(MessageFlags::READ);
                if unread {
                    stats.unread += 1;
                }
                if msg_flags.contains(MessageFlags::FLAGGED) {
                    stats.flagged += 1;
                }

                new_mail |= if flags.contains(CheckStatsFlags::FORCE) {
                    unread
                } else if "new" == *sub {
                    match since {
                        None => true,
                        Some(since) => entry
                            .metadata()
                            .and_then(|md| md.modified())
                            .map_or(false, |mtime| mtime > since),
                    }
                } else {
                    false
                };
            }
        }

        Ok(StatsReport {
            result: if new_mail {
                CheckStatsResult::NewMail
            } else {
                CheckStatsResult::NoChange
            },
            stats: if flags.contains(CheckStatsFlags::COUNTS) {
                Some(stats)
            } else {
                None
            },
        })
    }

    fn mbox_sync(&self, mailbox: &mut Mailbox) -> Result<CheckResult, Error> {
        let changes = self.mbox_check(mailbox)?;
        if CheckResult::Reopened == changes {
            return Ok(changes);
        }

        let root = mailbox.fs_path().to_owned();
        let log_prefix = mailbox.log_prefix().to_owned();
        let hcache = mailbox.data::<MaildirData>()?.hcache.clone();

        for email in mailbox.emails_mut() {
            let rel = match email.location {
                Location::File(ref rel) => rel.clone(),
                _ => continue,
            };
            let name = rel
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or(Error::InvalidPath)?
                .to_owned();
            let uid = parse_name(&name).0.to_owned();

            if email.deleted {
                match fs::remove_file(root.join(&rel)) {
                    Err(e) if io::ErrorKind::NotFound == e.kind() => {
                        if let Some(current) = locate(&root, &uid)? {
                            fs::remove_file(root.join(current))
                                .ignore_not_found()?;
                        }
                    }
                    result => result?,
                }
                if let Some(ref hcache) = hcache {
                    hcache.remove(&uid)?;
                }
                continue;
            }

            if !email.changed {
                continue;
            }

            let new_rel = PathBuf::from("cur")
                .join(format!("{}{}", uid, render_info(email.flags, false)));
            if new_rel == rel {
                continue;
            }

            let renamed = match fs::rename(root.join(&rel), root.join(&new_rel))
            {
                // Renamed by someone else since the check
                Err(e) if io::ErrorKind::NotFound == e.kind() => {
                    match locate(&root, &uid)? {
                        Some(current) => {
                            fs::rename(
                                root.join(current),
                                root.join(&new_rel),
                            )?;
                            true
                        }
                        None => {
                            debug!(
                                "{} {} vanished during sync",
                                log_prefix, uid
                            );
                            false
                        }
                    }
                }
                result => {
                    result?;
                    true
                }
            };
            if renamed {
                email.location = Location::File(new_rel);
            }
        }

        Ok(changes)
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
        let path = match mailbox.email(index)?.location {
            Location::File(ref rel) => mailbox.fs_path().join(rel),
            _ => return Err(Error::BadMessageState),
        };
        message.set_reader(fs::File::open(path)?);
        Ok(())
    }

    fn msg_open_new(
        &self,
        mailbox: &mut Mailbox,
        message: &mut Message,
        _add_from: bool,
    ) -> Result<(), Error> {
        message.stage_in(&mailbox.fs_path().join("tmp"))
    }

    fn msg_commit(
        &self,
        mailbox: &mut Mailbox,
        message: &mut Message,
    ) -> Result<(), Error> {
        let root = mailbox.fs_path().to_owned();
        let (sub, info) = if message.flags.is_empty() {
            ("new", String::new())
        } else {
            ("cur", render_info(message.flags, false))
        };

        message.staging_mut()?.as_file_mut().sync_all()?;
        let mut staged = message.take_staging()?;
        for _ in 0..MAX_DELIVERY_ATTEMPTS {
            let name = format!("{}{}", unique_name(message.received), info);
            match staged.persist_noclobber(root.join(sub).join(&name)) {
                Ok(_) => {
                    if let Err(e) = file_ops::sync_dir(root.join(sub)) {
                        warn!(
                            "{} Failed to sync {}: {}",
                            mailbox.log_prefix(),
                            sub,
                            e
                        );
                    }
                    message.set_committed_path(format!("{}/{}", sub, name));
                    return Ok(());
                }
                Err(e) if io::ErrorKind::AlreadyExists == e.error.kind() => {
                    staged = e.file;
                }
                Err(e) => {
                    message.restore_staging(e.file);
                    return Err(e.error.into());
                }
            }
        }

        message.restore_staging(staged);
        Err(Error::GaveUpInsertion)
    }

    fn msg_save_hcache(
        &self,
        mailbox: &mut Mailbox,
        index: usize,
    ) -> Result<(), Error> {
        let hcache = mailbox
            .data::<MaildirData>()?
            .hcache
            .as_ref()
            .ok_or(Error::Unsupported)?;
        let email = mailbox.email(index)?;
        let uid = uid_of(email).ok_or(Error::BadMessageState)?;

        hcache.store(
            uid,
            &CacheEntry {
                flags: email.flags.bits(),
                received: email.received,
                tags: email.tags.get_with_hidden(),
            },
        )
    }

    fn path_probe(&self, path: &str, metadata: Option<&fs::Metadata>) -> bool {
        metadata.map_or(false, |md| md.is_dir())
            && Path::new(path).join("cur").is_dir()
    }

    fn path_canon(&self, path: &str) -> Result<String, Error> {
        local::canon(path)
    }

    fn path_pretty(
        &self,
        path: &str,
        folder: Option<&str>,
    ) -> Result<String, Error> {
        local::pretty(path, folder)
    }

    fn path_parent(&self, path: &str) -> Result<String, Error> {
        local::parent(path)
    }

    fn path_is_empty(&self, path: &str) -> Result<bool, Error> {
        for sub in &["new", "cur"] {
            for entry in fs::read_dir(Path::new(path).join(sub)).as_access()? {
                let entry = entry.as_access()?;
                if !entry.file_name().to_string_lossy().starts_with('.') {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }
}
