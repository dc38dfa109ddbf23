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


use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::LevelFilter;
use structopt::StructOpt;

use crate::mx::model::*;
use crate::mx::{Context, Email, Mailbox, Mx, Registry};
use crate::support::config::MxConfig;
use crate::support::error::Error;
use crate::support::sysexits::*;

#[derive(StructOpt)]
#[structopt(max_term_width = 80)]
struct Command {
    #[structopt(flatten)]
    common: CommonOptions,
    #[structopt(subcommand)]
    sub: Subcommand,
}

#[derive(StructOpt)]
struct CommonOptions {
    /// The configuration file
    /// [default: ~/.config/mxbox/mxbox.toml]
    #[structopt(long, parse(from_os_str))]
    config: Option<PathBuf>,

    /// Log progress to standard error. Repeat for more detail.
    #[structopt(short, long, parse(from_occurrences))]
    verbose: u32,
}

#[derive(StructOpt)]
enum Subcommand {
    /// Print the type of each mailbox.
    Probe {
        #[structopt(required = true)]
        paths: Vec<String>,
    },
    /// Print the canonical form of a mailbox path.
    ///
    /// `=` and `+` at the start of the path refer to the configured folder,
    /// `~` to the home directory.
    Canon { path: String },
    /// Print a mailbox path abbreviated for display.
    Pretty { path: String },
    /// Print the mailbox containing a mailbox.
    Parent { path: String },
    /// Exit with status 0 if the mailbox holds no messages, 1 otherwise.
    Empty { path: String },
    Stats(StatsSubcommand),
    /// Open a mailbox and report whether it changed after `--wait` seconds.
    Check {
        #[structopt(long, default_value = "0")]
        wait: u64,

        path: String,
    },
    List(ListSubcommand),
    Deliver(DeliverSubcommand),
    Expunge(ExpungeSubcommand),
}

/// Print message counts of mailboxes without opening them.
///
/// Mailboxes are not locked, and their access times are left alone.
#[derive(StructOpt)]
struct StatsSubcommand {
    /// Report any unread message as new, not just mail that arrived since
    /// the mailbox was last looked at.
    #[structopt(long)]
    force: bool,

    #[structopt(required = true)]
    paths: Vec<String>,
}

/// List the messages in a mailbox.
#[derive(StructOpt)]
struct ListSubcommand {
    /// Take no lock and leave the access time of the mailbox alone.
    #[structopt(long)]
    peek: bool,

    /// List the messages in the order they are stored.
    #[structopt(long)]
    no_sort: bool,

    path: String,
}

/// Deliver a message read from standard input.
///
/// The message is staged in full before anything is written to the mailbox,
/// so an interrupted delivery leaves no trace.
#[derive(StructOpt)]
struct DeliverSubcommand {
    /// Create the mailbox if it does not exist.
    #[structopt(short, long)]
    create: bool,

    /// The type of mailbox to create
    /// [default: `default_type` from the configuration]
    #[structopt(short = "t", long = "type")]
    kind: Option<MailboxType>,

    /// The envelope sender to record with the message.
    #[structopt(short = "f", long)]
    sender: Option<String>,

    /// Mark the message as read.
    #[structopt(long)]
    read: bool,

    /// Mark the message as flagged.
    #[structopt(long)]
    flagged: bool,

    /// Mark the message as a draft.
    #[structopt(long)]
    draft: bool,

    path: String,
}

/// Delete messages from a mailbox.
///
/// If a trash mailbox is configured, the messages are moved there.
#[derive(StructOpt)]
struct ExpungeSubcommand {
    path: String,

    /// The indices of the messages to delete, as shown by `list`.
    #[structopt(required = true)]
    indices: Vec<usize>,
}

pub fn main() {
    // Clap exits with status 1 instead of EX_USAGE if we use the more concise
    // API
    let cmd = Command::from_clap(&match Command::clap().get_matches_safe() {
        Ok(matches) => matches,
        Err(
            e @ clap::Error {
                kind: clap::ErrorKind::HelpDisplayed,
                ..
            },
        )
        | Err(
            e @ clap::Error {
                kind: clap::ErrorKind::VersionDisplayed,
                ..
            },
        ) => {
            println!("{}", e.message);
            return;
        }
        Err(e) => {
            eprintln!("{}", e.message);
            EX_USAGE.exit()
        }
    });

    crate::init_simple_log(match cmd.common.verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    });

    let config = load_config(cmd.common.config);
    let mut mx = Mx::new(Registry::global(), Arc::new(config));

    match cmd.sub {
        Subcommand::Probe { paths } => probe(&mx, paths),
        Subcommand::Canon { path } => {
            let folder = mx.config().folder.clone();
            match mx.canonicalize(&path, folder.as_deref()) {
                Ok((canon, _)) => println!("{}", canon),
                Err(e) => die(&path, e),
            }
        }
        Subcommand::Pretty { path } => {
            let folder = mx.config().folder.clone();
            println!("{}", mx.prettify(&path, folder.as_deref()));
        }
        Subcommand::Parent { path } => match mx.parent(&path) {
            Ok(parent) => println!("{}", parent),
            Err(e) => die(&path, e),
        },
        Subcommand::Empty { path } => match mx.is_empty(&path) {
            Ok(true) => (),
            Ok(false) => Sysexit(1).exit(),
            Err(e) => die(&path, e),
        },
        Subcommand::Stats(cmd) => stats(&mx, cmd),
        Subcommand::Check { wait, path } => check(&mut mx, &path, wait),
        Subcommand::List(cmd) => list(&mut mx, cmd),
        Subcommand::Deliver(cmd) => {
            let path = cmd.path.clone();
            if let Err(e) = deliver(&mut mx, cmd, &mut io::stdin().lock()) {
                die(&path, e);
            }
        }
        Subcommand::Expunge(cmd) => expunge(&mut mx, cmd),
    }
}

fn load_config(path: Option<PathBuf>) -> MxConfig {
    let path = match path.or_else(MxConfig::default_path) {
        Some(path) => path,
        None => return MxConfig::default(),
    };

    match MxConfig::load(&path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error in config file at '{}': {}", path.display(), e);
            EX_CONFIG.exit()
        }
    }
}

fn die(what: &str, e: Error) -> ! {
    eprintln!("{}: {}", what, e);
    Sysexit::from(&e).exit()
}

fn open(mx: &mut Mx, path: &str, flags: OpenFlags) -> Context {
    let mailbox = match mx.resolve(path) {
        Ok((mailbox, _)) => mailbox,
        Err(e) => die(path, e),
    };
    match mx.open(mailbox, flags) {
        Ok(ctx) => ctx,
        Err(e) => die(path, e),
    }
}

fn close(mx: &mut Mx, path: &str, ctx: Context) {
    if let Err(e) = mx.close(ctx) {
        die(path, e);
    }
}

fn probe(mx: &Mx, paths: Vec<String>) {
    let mut status = EX_OK;
    for path in paths {
        match mx.probe(&path) {
            Ok(kind) => println!("{}\t{}", path, kind),
            Err(e) => {
                eprintln!("{}: {}", path, e);
                status = status.max(Sysexit::from(&e));
            }
        }
    }
    status.exit()
}

fn stats(mx: &Mx, cmd: StatsSubcommand) {
    let mut flags = CheckStatsFlags::COUNTS;
    if cmd.force {
        flags |= CheckStatsFlags::FORCE;
    }

    let mut status = EX_OK;
    for path in cmd.paths {
        match mx.check_stats(&Mailbox::new(path.clone()), flags) {
            Ok(report) => {
                let stats = report.stats.unwrap_or_default();
                println!(
                    "{}\t{} messages, {} unread, {} flagged{}",
                    path,
                    stats.total,
                    stats.unread,
                    stats.flagged,
                    if CheckStatsResult::NewMail == report.result {
                        ", new mail"
                    } else {
                        ""
                    }
                );
            }
            Err(e) => {
                eprintln!("{}: {}", path, e);
                status = status.max(Sysexit::from(&e));
            }
        }
    }
    status.exit()
}

fn check(mx: &mut Mx, path: &str, wait: u64) {
    let mut ctx = open(mx, path, OpenFlags::read_only().with_peek());
    if wait > 0 {
        thread::sleep(Duration::from_secs(wait));
    }

    match mx.check(&mut ctx) {
        Ok(result) => println!(
            "{}\t{:?}, {} messages",
            path,
            result,
            ctx.mailbox().count()
        ),
        Err(e) => die(path, e),
    }
    close(mx, path, ctx);
}

fn flag_letters(email: &Email) -> String {
    let mut letters = String::new();
    for &(flag, ch) in &[
        (MessageFlags::DRAFT, 'D'),
        (MessageFlags::FLAGGED, 'F'),
        (MessageFlags::REPLIED, 'R'),
        (MessageFlags::READ, 'S'),
    ] {
        letters.push(if email.flags.contains(flag) { ch } else { '-' });
    }
    letters.push(if email.deleted { 'T' } else { '-' });
    letters
}

fn list(mx: &mut Mx, cmd: ListSubcommand) {
    let mut flags = OpenFlags::read_only();
    if cmd.peek {
        flags = flags.with_peek();
    }
    if cmd.no_sort {
        flags = flags.with_no_sort();
    }

    let ctx = open(mx, &cmd.path, flags);
    for (ix, email) in ctx.mailbox().emails().iter().enumerate() {
        println!(
            "{:>5} {} {} {}",
            ix,
            flag_letters(email),
            email.received.format("%Y-%m-%d %H:%M:%S"),
            email.sender.as_deref().unwrap_or("-")
        );
    }
    close(mx, &cmd.path, ctx);
}

fn deliver(
    mx: &mut Mx,
    cmd: DeliverSubcommand,
    input: &mut impl Read,
) -> Result<(), Error> {
    let mailbox = match cmd.kind {
        Some(kind) => Mailbox::with_type(cmd.path.clone(), kind),
        None => mx.resolve(&cmd.path)?.0,
    };
    let flags = if cmd.create {
        OpenFlags::new().with_append_if_missing()
    } else {
        OpenFlags::append()
    };
    let mut ctx = mx.open(mailbox, flags)?;

    let mut open_flags = MsgOpenFlags::empty();
    if cmd.draft {
        open_flags |= MsgOpenFlags::SET_DRAFT;
    }
    let result = mx.msg_open_new(&mut ctx, None, open_flags).and_then(
        |mut msg| {
            msg.flags.set(MessageFlags::READ, cmd.read);
            msg.flags.set(MessageFlags::FLAGGED, cmd.flagged);
            msg.sender = cmd.sender;

            let result = io::copy(input, &mut msg)
                .map_err(Error::from)
                .and_then(|_| mx.msg_commit(&mut ctx, &mut msg));
            // Closing discards the staging file if the commit never happened
            let close_result = mx.msg_close(&mut ctx, msg);
            result.and(close_result)
        },
    );

    match result {
        Ok(()) => mx.close(ctx).map(|_| ()),
        Err(e) => {
            mx.fast_close(ctx.mailbox_mut());
            Err(e)
        }
    }
}

fn expunge(mx: &mut Mx, cmd: ExpungeSubcommand) {
    let mut ctx = open(mx, &cmd.path, OpenFlags::new());
    for &ix in &cmd.indices {
        if let Err(e) = ctx.mailbox_mut().set_deleted(ix, true) {
            mx.fast_close(ctx.mailbox_mut());
            die(&format!("{} message {}", cmd.path, ix), e);
        }
    }
    close(mx, &cmd.path, ctx);
}

#[cfg(test)]
mod test {
    use std::fs;

    use super::*;
    use crate::mx::test_prelude::{set_up, test_mx};

    fn deliver_cmd(args: &[&str]) -> DeliverSubcommand {
        let mut argv = vec!["mxbox", "deliver"];
        argv.extend_from_slice(args);
        match Command::from_iter_safe(&argv).unwrap().sub {
            Subcommand::Deliver(d) => d,
            _ => panic!("Parsed as the wrong subcommand"),
        }
    }

    /// Yields part of a message, then fails.
    struct CutOff(bool);

    impl Read for CutOff {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.0 {
                return Err(io::Error::new(io::ErrorKind::Other, "cut off"));
            }
            self.0 = true;
            let part = b"Subject: partial\n\nHalf a";
            buf[..part.len()].copy_from_slice(part);
            Ok(part.len())
        }
    }

    #[test]
    fn parse_deliver() {
        let cmd = Command::from_iter_safe(&[
            "mxbox", "-vv", "deliver", "-c", "--type", "maildir", "--read",
            "-f", "a@example.com", "/tmp/md",
        ])
        .unwrap();
        assert_eq!(2, cmd.common.verbose);
        match cmd.sub {
            Subcommand::Deliver(d) => {
                assert!(d.create);
                assert!(d.read);
                assert!(!d.flagged);
                assert_eq!(Some(MailboxType::Maildir), d.kind);
                assert_eq!(Some("a@example.com".to_owned()), d.sender);
                assert_eq!("/tmp/md", d.path);
            }
            _ => panic!("Parsed as the wrong subcommand"),
        }

        assert!(Command::from_iter_safe(&["mxbox", "expunge", "/x"]).is_err());
        assert!(Command::from_iter_safe(&[
            "mxbox", "deliver", "--type", "nope", "/x"
        ])
        .is_err());
    }

    #[test]
    fn deliver_from_reader() {
        let setup = set_up();
        let mut mx = test_mx();
        let md = setup.maildir("md");

        deliver(
            &mut mx,
            deliver_cmd(&["--flagged", &setup.path_str("md")]),
            &mut &b"Subject: hi\n\nThere.\n"[..],
        )
        .unwrap();
        assert_eq!(1, fs::read_dir(md.join("new")).unwrap().count());
        assert_eq!(0, fs::read_dir(md.join("tmp")).unwrap().count());
        assert!(mx.accounts().is_empty());
    }

    #[test]
    fn failed_delivery_leaves_nothing() {
        let setup = set_up();
        let mut mx = test_mx();
        let md = setup.maildir("md");

        assert_matches!(
            Err(Error::Io(_)),
            deliver(
                &mut mx,
                deliver_cmd(&[&setup.path_str("md")]),
                &mut CutOff(false),
            )
        );
        for sub in &["cur", "new", "tmp"] {
            assert_eq!(0, fs::read_dir(md.join(sub)).unwrap().count());
        }
        assert!(mx.accounts().is_empty());
    }

    #[test]
    fn deliver_creates_only_when_asked() {
        let setup = set_up();
        let mut mx = test_mx();

        assert!(deliver(
            &mut mx,
            deliver_cmd(&[&setup.path_str("out")]),
            &mut &b"Subject: a\n\na\n"[..],
        )
        .is_err());
        assert!(!setup.path("out").exists());

        deliver(
            &mut mx,
            deliver_cmd(&["-c", "-t", "maildir", &setup.path_str("out")]),
            &mut &b"Subject: a\n\na\n"[..],
        )
        .unwrap();
        assert_eq!(
            MailboxType::Maildir,
            mx.probe(&setup.path_str("out")).unwrap()
        );
    }
}
