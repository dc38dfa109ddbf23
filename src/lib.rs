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


//! Mxbox is an abstraction layer over mailbox stores.
//!
//! Callers work with `mx::Mx` and the session `mx::Context` it produces; the
//! concrete store formats live in `backend` behind the `mx::ops::MxOps`
//! trait.

#[cfg(test)]
macro_rules! assert_matches {
    ($expected:pat, $actual:expr) => {
        match $actual {
            $expected => (),
            unexpected => panic!(
                "Expected {} matches {}, got {:?}",
                stringify!($expected),
                stringify!($actual),
                unexpected
            ),
        }
    };
}

pub mod backend;
pub mod cli;
pub mod mx;
pub mod support;

use log::LevelFilter;
use log4rs::append::console::{ConsoleAppender, Target};
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;
use log4rs::filter::threshold::ThresholdFilter;

fn stderr_log_config(level: LevelFilter, pattern: &str) -> Option<Config> {
    let stderr = ConsoleAppender::builder()
        .target(Target::Stderr)
        .encoder(Box::new(PatternEncoder::new(pattern)))
        .build();

    Config::builder()
        .appender(
            Appender::builder()
                .filter(Box::new(ThresholdFilter::new(level)))
                .build("stderr", Box::new(stderr)),
        )
        .build(Root::builder().appender("stderr").build(level))
        .ok()
}

/// Log everything at `level` or above to standard error.
pub fn init_simple_log(level: LevelFilter) {
    let initialised = stderr_log_config(level, "{l}: {m}{n}")
        .map_or(false, |config| log4rs::init_config(config).is_ok());
    if !initialised {
        eprintln!("Failed to initialise logging");
    }
}

#[cfg(test)]
static INIT_TEST_LOG: std::sync::Once = std::sync::Once::new();

#[cfg(test)]
fn init_test_log() {
    INIT_TEST_LOG.call_once(|| {
        let config = stderr_log_config(
            LevelFilter::Debug,
            "{d(%H:%M:%S%.3f)} [{l}][{t}] {m}{n}",
        )
        .unwrap();
        log4rs::init_config(config).unwrap();
    })
}
