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

//! Driver tags: free-form labels attached to messages by backends that
//! support them (e.g. IMAP keywords).
//!
//! Each tag may have a shorter display form and may be hidden from the user
//! entirely; both come from the configuration.

use crate::support::config::MxConfig;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tag {
    pub name: String,
    pub transformed: Option<String>,
    pub hidden: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TagList(Vec<Tag>);

impl TagList {
    pub fn new() -> Self {
        TagList(Vec::new())
    }

    /// Build a tag list from a space-separated string.
    pub fn parse(tags: &str, config: &MxConfig) -> Self {
        let mut this = TagList::new();
        this.replace(tags, config);
        this
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tag> + '_ {
        self.0.iter()
    }

    /// The visible tag names, space-separated.
    pub fn get(&self) -> String {
        join(self.0.iter().filter(|t| !t.hidden).map(|t| t.name.as_str()))
    }

    /// All tag names, including hidden ones.
    pub fn get_with_hidden(&self) -> String {
        join(self.0.iter().map(|t| t.name.as_str()))
    }

    /// The visible tags in their display form.
    pub fn get_transformed(&self) -> String {
        join(self.0.iter().filter(|t| !t.hidden).map(|t| {
            t.transformed.as_deref().unwrap_or_else(|| t.name.as_str())
        }))
    }

    /// The display form of a single tag, if the tag is present.
    pub fn get_transformed_for(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|t| t.name == name)
            .map(|t| t.transformed.as_deref().unwrap_or(&t.name))
    }

    /// Replace the whole list with the tags in `tags`.
    ///
    /// Returns whether the set of tag names changed.
    pub fn replace(&mut self, tags: &str, config: &MxConfig) -> bool {
        let old = self.get_with_hidden();
        self.0.clear();
        for name in tags.split_whitespace() {
            if self.0.iter().any(|t| t.name == name) {
                continue;
            }

            self.0.push(Tag {
                name: name.to_owned(),
                transformed: config.tag_transforms.get(name).cloned(),
                hidden: config.hidden_tags.iter().any(|h| h == name),
            });
        }

        old != self.get_with_hidden()
    }
}

fn join<'a>(it: impl Iterator<Item = &'a str>) -> String {
    it.collect::<Vec<_>>().join(" ")
}

/// Apply the user's edit to the current tag string.
///
/// An edit made only of bare words replaces the tags outright. If any word is
/// prefixed with `+` or `-`, the edit is relative to `current`: `+tag` and
/// bare words add, `-tag` removes.
///
/// Returns `None` if the input contains nothing usable.
pub fn apply_edit(current: &str, input: &str) -> Option<String> {
    let words = input
        .split_whitespace()
        .filter(|w| !w.chars().any(char::is_control))
        .filter(|&w| w != "+" && w != "-")
        .collect::<Vec<_>>();
    if words.is_empty() {
        return None;
    }

    let relative =
        words.iter().any(|w| w.starts_with('+') || w.starts_with('-'));
    let mut tags: Vec<&str> = if relative {
        current.split_whitespace().collect()
    } else {
        Vec::new()
    };

    for word in words {
        if let Some(remove) = word.strip_prefix('-') {
            tags.retain(|&t| t != remove);
        } else {
            let add = word.strip_prefix('+').unwrap_or(word);
            if !tags.contains(&add) {
                tags.push(add);
            }
        }
    }

    Some(tags.join(" "))
}
