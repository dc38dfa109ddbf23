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

use log::info;

use super::mailbox::Mailbox;
use super::model::*;
use super::Mx;
use crate::support::error::Error;

/// A group of mailboxes sharing one connection.
pub struct Account {
    id: AccountId,
    kind: MailboxType,
    mailboxes: Vec<String>,
    data: Option<Box<dyn Any + Send>>,
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Account")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("mailboxes", &self.mailboxes)
            .finish()
    }
}

impl Account {
    fn new(id: AccountId, kind: MailboxType) -> Self {
        Account {
            id,
            kind,
            mailboxes: Vec::new(),
            data: None,
        }
    }

    pub fn id(&self) -> AccountId {
        self.id
    }

    pub fn kind(&self) -> MailboxType {
        self.kind
    }

    /// The paths of the mailboxes linked to this account, in link order.
    pub fn mailboxes(&self) -> &[String] {
        &self.mailboxes
    }

    /// Connection state, for backends.
    pub fn data_mut<T: Any + Send>(&mut self) -> Option<&mut T> {
        self.data.as_mut().and_then(|d| d.downcast_mut::<T>())
    }

    pub fn data<T: Any + Send>(&self) -> Option<&T> {
        self.data.as_ref().and_then(|d| d.downcast_ref::<T>())
    }

    pub fn set_data<T: Any + Send>(&mut self, data: T) {
        self.data = Some(Box::new(data));
    }
}

impl Mx {
    pub fn accounts(&self) -> &[Account] {
        &self.accounts
    }

    pub fn account(&self, id: AccountId) -> Option<&Account> {
        self.accounts.iter().find(|a| a.id == id)
    }

    /// Find the live account which owns `mailbox`, if any.
    ///
    /// It is an error for more than one account to claim the mailbox.
    pub fn find_account_for(
        &self,
        mailbox: &Mailbox,
    ) -> Result<Option<AccountId>, Error> {
        let kind = match mailbox.kind {
            Some(kind) => kind,
            None => return Ok(None),
        };
        let ops = self.registry.lookup(kind).ok_or(Error::UnknownBackend)?;

        let mut claimants = self
            .accounts
            .iter()
            .filter(|a| a.kind == kind && ops.ac_owns_path(a, &mailbox.path));
        let found = claimants.next().map(|a| a.id);
        if claimants.next().is_some() {
            return Err(Error::AmbiguousAccount);
        }

        Ok(found)
    }

    /// Attach `mailbox` to its account, creating the account if needed.
    ///
    /// Returns false if the backend refused the mailbox.
    pub fn link(&mut self, mailbox: &mut Mailbox) -> Result<bool, Error> {
        if mailbox.account.is_some() {
            return Ok(true);
        }

        let kind = mailbox.kind.ok_or(Error::UnrecognizedPath)?;
        let ops = self.registry.lookup(kind).ok_or(Error::UnknownBackend)?;

        let (ix, created) = match self.find_account_for(mailbox)? {
            Some(id) => (self.account_index(id)?, false),
            None => {
                self.next_account_id += 1;
                let id = AccountId(self.next_account_id);
                self.accounts.push(Account::new(id, kind));
                (self.accounts.len() - 1, true)
            }
        };

        let account = &mut self.accounts[ix];
        if !ops.ac_add(account, mailbox) {
            if created {
                self.accounts.remove(ix);
            }
            return Ok(false);
        }

        account.mailboxes.push(mailbox.path.clone());
        mailbox.account = Some(account.id);
        if created {
            info!(
                "{} Created account {}",
                mailbox.log_prefix, account.id.0
            );
        }
        Ok(true)
    }

    /// Detach `mailbox` from its account, destroying the account if it no
    /// longer has any mailboxes.
    pub fn unlink(&mut self, mailbox: &mut Mailbox) {
        let id = match mailbox.account.take() {
            Some(id) => id,
            None => return,
        };

        let ix = match self.account_index(id) {
            Ok(ix) => ix,
            Err(_) => return,
        };

        let account = &mut self.accounts[ix];
        if let Some(pos) =
            account.mailboxes.iter().position(|p| *p == mailbox.path)
        {
            account.mailboxes.remove(pos);
        }

        if account.mailboxes.is_empty() {
            info!("{} Destroyed account {}", mailbox.log_prefix, id.0);
            self.accounts.remove(ix);
        }
    }

    /// Find the mailbox linked to `account` with the given path.
    pub fn find_mailbox(&self, account: AccountId, path: &str) -> Option<&str> {
        self.account(account)?
            .mailboxes
            .iter()
            .find(|p| *p == path)
            .map(String::as_str)
    }

    /// Find a linked mailbox with the given path in any account, returning
    /// the account that holds it.
    pub fn find_mailbox_anywhere(&self, path: &str) -> Option<AccountId> {
        self.accounts
            .iter()
            .find(|a| a.mailboxes.iter().any(|p| p == path))
            .map(|a| a.id)
    }

    fn account_index(&self, id: AccountId) -> Result<usize, Error> {
        self.accounts
            .iter()
            .position(|a| a.id == id)
            .ok_or(Error::MailboxClosed)
    }
}
