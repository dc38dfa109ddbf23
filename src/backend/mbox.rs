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

//! Flat-file mailboxes: every message of the mailbox in a single file.
//!
//! Two formats are supported. In mbox, each message starts with a postmark
//! line (`From sender date`) and is followed by a blank line. In MMDF, each
//! message is enclosed between two lines of four `^A` characters, and may
//! start with a postmark as well.
//!
//! Flags live in the `Status` and `X-Status` headers of each message.
//!
//! Body lines of mbox messages which start with `From `, possibly behind some
//! `>` characters, are written with one more `>` in front and read back with
//! one less, so they are never taken for a postmark.
//!
//! Messages are appended in place, truncating the file back if the write
//! fails. Everything else rewrites the whole file into a temporary file next
//! to it which then replaces the original, so a failed sync leaves the
//! mailbox as it was. Sessions lock a hidden `.<name>.mxlock` file next to
//! the mailbox, which does not clash with the `<path>.lock` dot-locks of
//! mail delivery agents.

use std::borrow::Cow;
use std::fs;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::prelude::*;
use lazy_static::lazy_static;
use log::{debug, warn};
use memchr::{memchr, memmem};
use regex::bytes::Regex;
use tempfile::NamedTempFile;

use super::local;
use crate::mx::mailbox::{Email, Location, Mailbox};
use crate::mx::message::Message;
use crate::mx::model::*;
use crate::mx::ops::MxOps;
use crate::mx::Account;
use crate::support::error::Error;
use crate::support::file_ops::{self, ErrorTransforms};

const MMDF_SEP: &[u8] = b"\x01\x01\x01\x01\n";

const MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct",
    "Nov", "Dec",
];

lazy_static! {
    static ref POSTMARK: Regex = Regex::new(
        concat!(
            r"^From (\S*) +(?:Mon|Tue|Wed|Thu|Fri|Sat|Sun),? +",
            r"(Jan|Feb|Mar|Apr|May|Jun|Jul|Aug|Sep|Oct|Nov|Dec) +",
            r"(\d{1,2}) +(\d{1,2}):(\d{2})(?::(\d{2}))? +",
            r"(?:[A-Za-z]{3,5} +|[+-]\d{4} +)?(\d{4})\s*$",
        )
    )
    .unwrap();
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Format {
    Mbox,
    Mmdf,
}

#[derive(Clone, Copy, Debug)]
pub struct Mbox {
    format: Format,
}

impl Mbox {
    pub const MBOX: Mbox = Mbox {
        format: Format::Mbox,
    };
    pub const MMDF: Mbox = Mbox {
        format: Format::Mmdf,
    };
}

/// What we remember about the file between operations.
struct FlatData {
    size: u64,
    mtime: SystemTime,
    atime: SystemTime,
    #[cfg(test)]
    fail_writes_after: Option<usize>,
}

impl FlatData {
    fn new(size: u64, md: &fs::Metadata) -> Result<Self, Error> {
        Ok(FlatData {
            size,
            mtime: md.modified()?,
            atime: md.accessed()?,
            #[cfg(test)]
            fail_writes_after: None,
        })
    }
}

/// Make the next sync of `mailbox` fail after writing `n` bytes.
#[cfg(test)]
pub fn fail_writes_after(mailbox: &mut Mailbox, n: usize) {
    if let Ok(data) = mailbox.data_mut::<FlatData>() {
        data.fail_writes_after = Some(n);
    }
}

#[cfg(test)]
struct FailAfter<W> {
    inner: W,
    remaining: Option<usize>,
}

#[cfg(test)]
impl<W: Write> Write for FailAfter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.remaining {
            None => self.inner.write(buf),
            Some(0) => Err(io::Error::new(
                io::ErrorKind::Other,
                "simulated write failure",
            )),
            Some(ref mut remaining) => {
                let n = buf.len().min(*remaining);
                *remaining -= n;
                self.inner.write(&buf[..n])
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

struct Postmark {
    sender: Option<String>,
    received: DateTime<Utc>,
}

fn parse_postmark(line: &[u8]) -> Option<Postmark> {
    if !line.starts_with(b"From ") {
        return None;
    }

    let caps = POSTMARK.captures(line)?;
    let text = |ix: usize| {
        caps.get(ix)
            .and_then(|m| std::str::from_utf8(m.as_bytes()).ok())
    };
    let num = |ix: usize| text(ix).and_then(|s| s.parse::<u32>().ok());

    let month = MONTHS.iter().position(|&m| Some(m) == text(2))? as u32 + 1;
    let date = NaiveDate::from_ymd_opt(num(7)? as i32, month, num(3)?)?;
    let time = date.and_hms_opt(num(4)?, num(5)?, num(6).unwrap_or(0))?;

    Some(Postmark {
        sender: text(1).filter(|s| !s.is_empty()).map(str::to_owned),
        received: DateTime::<Utc>::from_utc(time, Utc),
    })
}

fn format_postmark(sender: Option<&str>, received: DateTime<Utc>) -> Vec<u8> {
    let sender = sender
        .filter(|s| !s.is_empty() && !s.contains(char::is_whitespace))
        .unwrap_or("MAILER-DAEMON");
    format!("From {} {}\n", sender, received.format("%a %b %e %H:%M:%S %Y"))
        .into_bytes()
}

/// The offset just past the line starting at `start`.
fn next_line(data: &[u8], start: usize) -> usize {
    memchr(b'\n', &data[start..]).map_or(data.len(), |ix| start + ix + 1)
}

/// Find the byte ranges of the messages in `data`, envelopes included.
fn find_records(
    format: Format,
    data: &[u8],
) -> Result<Vec<(usize, usize)>, Error> {
    let mut records = Vec::new();

    match format {
        Format::Mbox => {
            let mut starts = Vec::new();
            let mut pos = 0;
            while pos < data.len() {
                let end = next_line(data, pos);
                if parse_postmark(&data[pos..end]).is_some() {
                    starts.push(pos);
                } else if starts.is_empty() {
                    return Err(Error::CorruptStore(format!(
                        "no postmark at offset {}",
                        pos
                    )));
                }
                pos = end;
            }

            for (ix, &start) in starts.iter().enumerate() {
                let end = starts.get(ix + 1).copied().unwrap_or(data.len());
                records.push((start, end - start));
            }
        }

        Format::Mmdf => {
            let mut pos = 0;
            while pos < data.len() {
                if b'\n' == data[pos] {
                    pos += 1;
                    continue;
                }

                if !data[pos..].starts_with(MMDF_SEP) {
                    return Err(Error::CorruptStore(format!(
                        "expected MMDF separator at offset {}",
                        pos
                    )));
                }

                let body = pos + MMDF_SEP.len();
                let mut search = body;
                let end = loop {
                    let at = match memmem::find(&data[search..], MMDF_SEP) {
                        Some(ix) => search + ix,
                        None => {
                            return Err(Error::CorruptStore(format!(
                                "unterminated MMDF message at offset {}",
                                pos
                            )))
                        }
                    };

                    if at == body || b'\n' == data[at - 1] {
                        break at + MMDF_SEP.len();
                    }
                    search = at + 1;
                };

                records.push((pos, end - pos));
                pos = end;
            }
        }
    }

    Ok(records)
}

/// One message record cut into separator lines and content.
struct Record<'a> {
    envelope: &'a [u8],
    body: &'a [u8],
    trailer: &'a [u8],
}

impl<'a> Record<'a> {
    fn split(format: Format, raw: &'a [u8]) -> Self {
        match format {
            Format::Mbox => {
                let first = next_line(raw, 0);
                let rest = &raw[first..];
                let trailer = if rest.ends_with(b"\n\n") { 1 } else { 0 };
                Record {
                    envelope: &raw[..first],
                    body: &rest[..rest.len() - trailer],
                    trailer: &rest[rest.len() - trailer..],
                }
            }

            Format::Mmdf => {
                let mut envelope = MMDF_SEP.len().min(raw.len());
                let postmark_end = next_line(raw, envelope);
                if parse_postmark(&raw[envelope..postmark_end]).is_some() {
                    envelope = postmark_end;
                }
                let trailer =
                    raw.len().saturating_sub(MMDF_SEP.len()).max(envelope);
                Record {
                    envelope: &raw[..envelope],
                    body: &raw[envelope..trailer],
                    trailer: &raw[trailer..],
                }
            }
        }
    }

    fn postmark(&self) -> Option<Postmark> {
        let line = if self.envelope.starts_with(MMDF_SEP) {
            &self.envelope[MMDF_SEP.len()..]
        } else {
            self.envelope
        };
        parse_postmark(line)
    }
}

/// The header block of `body`, including its final line feed.
fn header_block(body: &[u8]) -> &[u8] {
    if body.starts_with(b"\n") {
        return &body[..0];
    }
    memmem::find(body, b"\n\n").map_or(body, |ix| &body[..ix + 1])
}

fn lines(headers: &[u8]) -> impl Iterator<Item = &[u8]> {
    let mut pos = 0;
    std::iter::from_fn(move || {
        if pos >= headers.len() {
            return None;
        }
        let end = next_line(headers, pos);
        let line = &headers[pos..end];
        pos = end;
        Some(line)
    })
}

fn header_value<'a>(line: &'a [u8], name: &[u8]) -> Option<&'a [u8]> {
    if line.len() > name.len()
        && line[..name.len()].eq_ignore_ascii_case(name)
        && b':' == line[name.len()]
    {
        Some(&line[name.len() + 1..])
    } else {
        None
    }
}

/// Whether `line` reads as `From ` once any leading `>` are dropped.
fn is_quoted_from(line: &[u8]) -> bool {
    let quotes = line.iter().take_while(|&&b| b'>' == b).count();
    line[quotes..].starts_with(b"From ")
}

/// Add a `>` to every line of `body` which could pass for a postmark.
fn quote_from(body: &[u8]) -> Cow<[u8]> {
    if !lines(body).any(is_quoted_from) {
        return Cow::Borrowed(body);
    }

    let mut out = Vec::with_capacity(body.len() + 16);
    for line in lines(body) {
        if is_quoted_from(line) {
            out.push(b'>');
        }
        out.extend_from_slice(line);
    }
    Cow::Owned(out)
}

/// Undo `quote_from()`.
fn unquote_from(body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len());
    for line in lines(body) {
        if line.starts_with(b">") && is_quoted_from(line) {
            out.extend_from_slice(&line[1..]);
        } else {
            out.extend_from_slice(line);
        }
    }
    out
}

/// Where messages appended after the first `size` bytes of `data` start.
///
/// Line feeds padding out the old last message are skipped. Returns `None`
/// if the old content did not end with a complete line.
fn tail_start(data: &[u8], size: usize) -> Option<usize> {
    if 0 == size {
        return Some(0);
    }
    if b'\n' != *data.get(size - 1)? {
        return None;
    }

    let padding = data[size..].iter().take_while(|&&b| b'\n' == b).count();
    Some(size + padding)
}

/// Read the flags out of the `Status` and `X-Status` headers.
///
/// The second value is whether the message is marked deleted.
fn read_status(body: &[u8]) -> (MessageFlags, bool) {
    let mut flags = MessageFlags::empty();
    let mut deleted = false;

    for line in lines(header_block(body)) {
        if let Some(value) = header_value(line, b"Status") {
            if value.contains(&b'R') {
                flags |= MessageFlags::READ;
            }
        } else if let Some(value) = header_value(line, b"X-Status") {
            for &ch in value {
                match ch {
                    b'A' => flags |= MessageFlags::REPLIED,
                    b'F' => flags |= MessageFlags::FLAGGED,
                    b'T' => flags |= MessageFlags::DRAFT,
                    b'D' => deleted = true,
                    _ => (),
                }
            }
        }
    }

    (flags, deleted)
}

/// Rewrite the status headers of `body` to hold `flags`.
///
/// The body is returned unchanged if it already says exactly that.
fn render(body: &[u8], flags: MessageFlags) -> Cow<[u8]> {
    if (flags, false) == read_status(body) {
        return Cow::Borrowed(body);
    }

    let headers = header_block(body);
    let mut out = Vec::with_capacity(body.len() + 32);
    let mut skipping = false;
    for line in lines(headers) {
        let continuation = line.starts_with(b" ") || line.starts_with(b"\t");
        if continuation && skipping {
            continue;
        }
        skipping = header_value(line, b"Status").is_some()
            || header_value(line, b"X-Status").is_some();
        if !skipping {
            out.extend_from_slice(line);
        }
    }
    if !out.is_empty() && !out.ends_with(b"\n") {
        out.push(b'\n');
    }

    if flags.contains(MessageFlags::READ) {
        out.extend_from_slice(b"Status: RO\n");
    }
    let mut x_status = Vec::new();
    for &(flag, ch) in &[
        (MessageFlags::REPLIED, b'A'),
        (MessageFlags::FLAGGED, b'F'),
        (MessageFlags::DRAFT, b'T'),
    ] {
        if flags.contains(flag) {
            x_status.push(ch);
        }
    }
    if !x_status.is_empty() {
        out.extend_from_slice(b"X-Status: ");
        out.extend_from_slice(&x_status);
        out.push(b'\n');
    }

    out.extend_from_slice(&body[headers.len()..]);
    Cow::Owned(out)
}

/// Parse the messages in `data`, which starts at `base` within the file.
///
/// `fallback` is the received time of messages without a postmark.
fn parse(
    format: Format,
    data: &[u8],
    base: u64,
    fallback: DateTime<Utc>,
) -> Result<Vec<Email>, Error> {
    find_records(format, data)?
        .into_iter()
        .map(|(offset, length)| {
            let record = Record::split(format, &data[offset..offset + length]);
            let (flags, deleted) = read_status(record.body);
            let postmark = record.postmark();

            let mut email = Email::new(Location::Span {
                offset: base + offset as u64,
                length: length as u64,
            });
            email.flags = flags;
            email.deleted = deleted;
            email.received = postmark.as_ref().map_or(fallback, |p| p.received);
            email.sender = postmark.and_then(|p| p.sender);
            Ok(email)
        })
        .collect()
}

fn span_of(email: &Email) -> Result<(usize, usize), Error> {
    match email.location {
        Location::Span { offset, length } => {
            Ok((offset as usize, length as usize))
        }
        _ => Err(Error::BadMessageState),
    }
}

/// Undo the access time bump caused by reading `path`.
///
/// New mail detection compares access and modification times, so merely
/// looking at the file must not change them.
fn restore_atime(path: &Path, before: &fs::Metadata) {
    let (atime, mtime) = match (before.accessed(), before.modified()) {
        (Ok(atime), Ok(mtime)) => (atime, mtime),
        _ => return,
    };

    let bumped = fs::metadata(path)
        .and_then(|md| md.accessed())
        .map_or(false, |now| now != atime);
    if bumped {
        if let Err(e) = file_ops::set_times(path, atime, mtime) {
            debug!(
                "Failed to restore access time of {}: {}",
                path.display(),
                e
            );
        }
    }
}

impl Mbox {
    /// Bytes to put in front of a new record so it starts a line of its own.
    fn append_prefix(
        &self,
        file: &mut fs::File,
        len: u64,
    ) -> io::Result<&'static [u8]> {
        if 0 == len {
            return Ok(&[]);
        }

        let tail_len = len.min(2);
        let mut tail = [0u8; 2];
        file.seek(SeekFrom::Start(len - tail_len))?;
        file.read_exact(&mut tail[..tail_len as usize])?;
        let tail = &tail[..tail_len as usize];

        let prefix: &'static [u8] = match self.format {
            Format::Mbox if tail.ends_with(b"\n\n") => &[],
            Format::Mbox if tail.ends_with(b"\n") => b"\n",
            Format::Mbox => b"\n\n",
            Format::Mmdf if tail.ends_with(b"\n") => &[],
            Format::Mmdf => b"\n",
        };
        Ok(prefix)
    }

    fn build_record(&self, content: &[u8], message: &Message) -> Vec<u8> {
        let first = next_line(content, 0);
        let (postmark, body) = match parse_postmark(&content[..first]) {
            Some(_) => (content[..first].to_vec(), &content[first..]),
            None => (
                format_postmark(message.sender.as_deref(), message.received),
                content,
            ),
        };
        let rendered = render(body, message.flags);
        let body = match self.format {
            Format::Mbox => quote_from(&rendered),
            Format::Mmdf => Cow::Borrowed(&rendered[..]),
        };

        let mut record = Vec::with_capacity(body.len() + postmark.len() + 12);
        if Format::Mmdf == self.format {
            record.extend_from_slice(MMDF_SEP);
        }
        record.extend_from_slice(&postmark);
        record.extend_from_slice(&body);
        if !body.ends_with(b"\n") {
            record.push(b'\n');
        }
        match self.format {
            Format::Mbox => record.push(b'\n'),
            Format::Mmdf => record.extend_from_slice(MMDF_SEP),
        }
        record
    }
}

impl MxOps for Mbox {
    fn kind(&self) -> MailboxType {
        match self.format {
            Format::Mbox => MailboxType::Mbox,
            Format::Mmdf => MailboxType::Mmdf,
        }
    }

    fn is_local(&self) -> bool {
        true
    }

    /// Every flat file is an account of its own.
    fn ac_owns_path(&self, account: &Account, path: &str) -> bool {
        account.mailboxes().first().map_or(false, |p| p == path)
    }

    fn lock_path(&self, mailbox: &Mailbox) -> Option<PathBuf> {
        let path = mailbox.fs_path();
        let name = path.file_name()?.to_str()?;
        Some(path.with_file_name(format!(".{}.mxlock", name)))
    }

    fn mbox_open(&self, mailbox: &mut Mailbox) -> Result<(), Error> {
        let path = mailbox.fs_path().to_owned();
        let md = fs::metadata(&path)?;
        let data = fs::read(&path)?;
        let emails =
            parse(self.format, &data, 0, DateTime::from(md.modified()?))?;

        if !mailbox.read_only() {
            match fs::OpenOptions::new().append(true).open(&path) {
                Ok(_) => (),
                Err(e) if io::ErrorKind::PermissionDenied == e.kind() => {
                    debug!("{} Not writable", mailbox.log_prefix());
                    mailbox.set_read_only();
                }
                Err(e) => return Err(e.into()),
            }
        }

        *mailbox.emails_mut() = emails;
        mailbox.set_data(FlatData::new(data.len() as u64, &md)?);
        Ok(())
    }

    fn mbox_open_append(
        &self,
        mailbox: &mut Mailbox,
        flags: &OpenFlags,
    ) -> Result<(), Error> {
        let mut options = fs::OpenOptions::new();
        options.mode(0o600);
        if flags.new_folder {
            options.write(true).create(true).truncate(true);
        } else {
            options.append(true).create(flags.append_if_missing);
        }

        let file = options.open(mailbox.fs_path())?;
        let md = file.metadata()?;
        mailbox.set_data(FlatData::new(md.len(), &md)?);
        Ok(())
    }

    fn mbox_check(&self, mailbox: &mut Mailbox) -> Result<CheckResult, Error> {
        let path = mailbox.fs_path().to_owned();
        let md = fs::metadata(&path)?;
        let mtime = md.modified()?;
        let size = {
            let state = mailbox.data::<FlatData>()?;
            if md.len() == state.size && mtime == state.mtime {
                return Ok(CheckResult::NoChange);
            }
            state.size
        };

        let data = fs::read(&path)?;
        let fallback = DateTime::from(mtime);

        let appended = if data.len() as u64 > size {
            tail_start(&data, size as usize).and_then(|start| {
                parse(self.format, &data[start..], start as u64, fallback)
                    .ok()
                    .map(|new| (start as u64, new))
            })
        } else {
            None
        };

        let result = if let Some((start, new)) = appended {
            let result = if new.is_empty() {
                CheckResult::NoChange
            } else {
                CheckResult::NewMail
            };
            // The padding now separates the old last message from the
            // new ones, so it becomes part of the old one
            if Format::Mbox == self.format && start > size {
                for email in mailbox.emails_mut().iter_mut() {
                    if let Location::Span {
                        offset,
                        ref mut length,
                    } = email.location
                    {
                        if offset + *length == size {
                            *length += start - size;
                        }
                    }
                }
            }
            mailbox.emails_mut().extend(new);
            result
        } else {
            let mut rebuilt = parse(self.format, &data, 0, fallback)?;
            let mut local = mailbox
                .emails()
                .iter()
                .filter(|e| e.changed)
                .cloned()
                .collect::<Vec<_>>();
            for email in &mut rebuilt {
                if let Some(ix) = local.iter().position(|old| {
                    old.received == email.received && old.sender == email.sender
                }) {
                    let old = local.swap_remove(ix);
                    email.flags = old.flags;
                    email.deleted = old.deleted;
                    email.changed = true;
                }
            }
            *mailbox.emails_mut() = rebuilt;
            CheckResult::Reopened
        };

        let state = mailbox.data_mut::<FlatData>()?;
        state.size = data.len() as u64;
        state.mtime = mtime;
        Ok(result)
    }

    fn mbox_check_stats(
        &self,
        mailbox: &Mailbox,
        flags: CheckStatsFlags,
    ) -> Result<StatsReport, Error> {
        let path = mailbox.fs_path();
        let md = fs::metadata(path).as_access()?;
        let mtime = md.modified()?;
        let force = flags.contains(CheckStatsFlags::FORCE);

        let stats = if force || flags.contains(CheckStatsFlags::COUNTS) {
            let data = fs::read(path)?;
            restore_atime(path, &md);

            let mut stats = MailboxStats::default();
            for email in parse(self.format, &data, 0, DateTime::from(mtime))?
                .into_iter()
                .filter(|e| !e.deleted)
            {
                stats.total += 1;
                if !email.flags.contains(MessageFlags::READ) {
                    stats.unread += 1;
                }
                if email.flags.contains(MessageFlags::FLAGGED) {
                    stats.flagged += 1;
                }
            }
            Some(stats)
        } else {
            None
        };

        let new_mail = match stats {
            Some(ref stats) if force => stats.unread > 0,
            _ => {
                let since = match mailbox.last_visited() {
                    Some(since) => since,
                    None => md.accessed()?,
                };
                md.len() > 0 && mtime > since
            }
        };

        Ok(StatsReport {
            result: if new_mail {
                CheckStatsResult::NewMail
            } else {
                CheckStatsResult::NoChange
            },
            stats: if flags.contains(CheckStatsFlags::COUNTS) {
                stats
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

        let path = mailbox.fs_path().to_owned();
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
            .to_owned();
        let data = fs::read(&path)?;
        let permissions = fs::metadata(&path)?.permissions();

        let mut order = (0..mailbox.count())
            .filter(|&ix| !mailbox.emails()[ix].deleted)
            .collect::<Vec<_>>();
        order.sort_by_key(|&ix| span_of(&mailbox.emails()[ix]).ok());

        let mut tf = NamedTempFile::new_in(&dir)?;
        let mut spans = Vec::with_capacity(order.len());
        {
            #[cfg(test)]
            let out = FailAfter {
                inner: tf.as_file_mut(),
                remaining: mailbox.data::<FlatData>()?.fail_writes_after,
            };
            #[cfg(not(test))]
            let out = tf.as_file_mut();
            let mut out = io::BufWriter::new(out);

            let mut written = 0u64;
            for &ix in &order {
                let email = &mailbox.emails()[ix];
                let (offset, length) = span_of(email)?;
                let raw = data.get(offset..offset + length).ok_or_else(|| {
                    Error::CorruptStore(format!(
                        "message at {} extends past end of file",
                        offset
                    ))
                })?;

                let record = Record::split(self.format, raw);
                let body = render(record.body, email.flags);
                out.write_all(record.envelope)?;
                out.write_all(&body)?;
                out.write_all(record.trailer)?;

                let length =
                    (record.envelope.len() + body.len() + record.trailer.len())
                        as u64;
                spans.push((ix, written, length));
                written += length;
            }
            out.flush()?;
        }

        tf.as_file().sync_all()?;
        fs::set_permissions(tf.path(), permissions)?;
        tf.persist(&path).map_err(|e| e.error)?;
        if let Err(e) = file_ops::sync_dir(&dir) {
            warn!("{} Failed to sync directory: {}", mailbox.log_prefix(), e);
        }

        for (ix, offset, length) in spans {
            mailbox.emails_mut()[ix].location =
                Location::Span { offset, length };
        }

        let md = fs::metadata(&path)?;
        let state = mailbox.data_mut::<FlatData>()?;
        state.size = md.len();
        state.mtime = md.modified()?;
        Ok(changes)
    }

    fn mbox_close(&self, mailbox: &mut Mailbox) -> Result<(), Error> {
        if !mailbox.flags().peek {
            return Ok(());
        }

        let atime = match mailbox.data::<FlatData>() {
            Ok(state) => state.atime,
            Err(_) => return Ok(()),
        };
        let mtime = fs::metadata(mailbox.fs_path())?.modified()?;
        file_ops::set_times(mailbox.fs_path(), atime, mtime)
    }

    fn msg_open(
        &self,
        mailbox: &mut Mailbox,
        message: &mut Message,
        index: usize,
    ) -> Result<(), Error> {
        let (offset, length) = span_of(mailbox.email(index)?)?;
        let mut file = fs::File::open(mailbox.fs_path())?;
        file.seek(SeekFrom::Start(offset as u64))?;
        let mut raw = vec![0u8; length];
        file.read_exact(&mut raw)?;

        let body = Record::split(self.format, &raw).body;
        let body = match self.format {
            Format::Mbox => unquote_from(body),
            Format::Mmdf => body.to_vec(),
        };
        message.set_reader(io::Cursor::new(body));
        Ok(())
    }

    fn msg_open_new(
        &self,
        _mailbox: &mut Mailbox,
        message: &mut Message,
        add_from: bool,
    ) -> Result<(), Error> {
        message.stage()?;
        if add_from {
            let postmark =
                format_postmark(message.sender.as_deref(), message.received);
            message.staging_mut()?.write_all(&postmark)?;
        }
        Ok(())
    }

    fn msg_commit(
        &self,
        mailbox: &mut Mailbox,
        message: &mut Message,
    ) -> Result<(), Error> {
        let mut content = Vec::new();
        {
            let staged = message.staging_mut()?;
            staged.seek(SeekFrom::Start(0))?;
            staged.read_to_end(&mut content)?;
        }
        let record = self.build_record(&content, message);

        let mut file = fs::OpenOptions::new()
            .read(true)
            .append(true)
            .open(mailbox.fs_path())?;
        let len = file.metadata()?.len();
        let prefix = self.append_prefix(&mut file, len)?;

        let result = file
            .write_all(prefix)
            .and_then(|_| file.write_all(&record))
            .and_then(|_| file.sync_all());
        if let Err(e) = result {
            if let Err(e2) = file.set_len(len) {
                warn!(
                    "{} Failed to truncate after failed append: {}",
                    mailbox.log_prefix(),
                    e2
                );
            }
            return Err(e.into());
        }

        message.set_committed_path(mailbox.path());
        Ok(())
    }

    fn msg_padding_size(&self, _mailbox: &Mailbox) -> usize {
        match self.format {
            Format::Mbox => 1,
            Format::Mmdf => 2 * MMDF_SEP.len(),
        }
    }

    fn path_probe(&self, path: &str, metadata: Option<&fs::Metadata>) -> bool {
        let md = match metadata {
            Some(md) if md.is_file() => md,
            _ => return false,
        };
        if 0 == md.len() {
            return Format::Mbox == self.format;
        }

        let mut head = Vec::new();
        let read = fs::File::open(path)
            .and_then(|f| f.take(1024).read_to_end(&mut head));
        restore_atime(Path::new(path), md);
        if read.is_err() {
            return false;
        }

        match self.format {
            Format::Mbox => {
                parse_postmark(&head[..next_line(&head, 0)]).is_some()
            }
            Format::Mmdf => head.starts_with(MMDF_SEP),
        }
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
        Ok(0 == fs::metadata(path).as_access()?.len())
    }
}
