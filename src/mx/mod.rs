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

//! The mailbox abstraction layer.
//!
//! Everything above this module deals with mailboxes without knowing what
//! kind of store is behind them. Everything below it (the backends in
//! `crate::backend`) implements `MxOps` for one kind of store and knows
//! nothing about the others.
//!
//! The life of a mailbox session is:
//!
//! - The path is resolved to a backend by probing the registered backends in
//!   order. The first that recognises the path wins.
//!
//! - `Mx::open()` links the mailbox to an account, takes the scoped lock and
//!   has the backend load the index, producing a `Context`.
//!
//! - `Mx::check()` and `Mx::sync()` are called any number of times.
//!   `check()` picks up changes made by others; `sync()` writes back changes
//!   made through this session.
//!
//! - `Mx::close()` does a final sync where appropriate and then releases
//!   everything, even if that sync failed.
//!
//! Any error which leaves the session in an unknown state "fast-closes" the
//! mailbox: backend state, the index, the lock and the account link are
//! dropped, and the error text is kept on the mailbox for display.
//!
//! Individual messages are read and written through `Message`. New messages
//! are staged in a temporary file private to the message and only become
//! visible when committed.
//!
//! ## About the layout of this module
//!
//! `Mx` is a single abstraction whose methods are split over several files by
//! concern: `path` (probing and path manipulation), `account` (the account
//! linker), `state` (the mailbox state machine) and `message` (the message
//! lifecycle).

use std::sync::Arc;

use crate::support::config::MxConfig;

mod account;
pub mod hcache;
pub mod mailbox;
pub mod message;
pub mod model;
pub mod ops;
mod path;
pub mod registry;
mod state;
pub mod tags;

#[cfg(test)]
pub(crate) mod test_backend;

pub use account::Account;
pub use mailbox::{Context, Email, Location, Mailbox};
pub use message::Message;
pub use registry::Registry;

/// The entry point to the mailbox layer.
///
/// Holds the backend table, the configuration, and the live accounts.
#[derive(Debug)]
pub struct Mx {
    registry: Registry,
    config: Arc<MxConfig>,
    accounts: Vec<Account>,
    next_account_id: u32,
}

impl Mx {
    pub fn new(registry: Registry, config: Arc<MxConfig>) -> Self {
        Mx {
            registry,
            config,
            accounts: Vec::new(),
            next_account_id: 0,
        }
    }

    pub fn registry(&self) -> Registry {
        self.registry
    }

    pub fn config(&self) -> &Arc<MxConfig> {
        &self.config
    }
}
