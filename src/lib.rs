//! A library and application for programming PIC microcontrollers with
//! K150-family serial programmers
//!
//! ## As an application
//!
//! [picflash] talks to the K128/K149/K150 boards sold by kitsrus, all of
//! which speak the `P18A` serial protocol. The usual round trip looks like:
//!
//! ```bash
//! $ picflash -t 16F628 program all -i firmware.hex
//! $ picflash -t 16F628 dump rom -o readback.hex
//! ```
//!
//! ## As a library
//!
//! The building blocks are available separately: [`hex::HexStore`] holds a
//! sparse Intel-HEX image, [`chipdb`] resolves chip descriptions from the
//! `picpro.dat` database, and [`programmer::Programmer`] drives the board
//! over any [`interface::Transport`] implementation.
//!
//! [picflash]: https://crates.io/crates/picflash

pub mod chipdb;
pub mod cli;
pub mod command;
pub mod error;
pub mod hex;
pub mod interface;
pub mod programmer;
pub mod progress;
pub mod target;

pub use crate::error::Error;

/// Logging utilities
pub mod logging {
    use env_logger::Env;
    use log::LevelFilter;

    /// Initialize the logger with the given [LevelFilter]
    pub fn initialize_logger(filter: LevelFilter) {
        env_logger::Builder::from_env(Env::default().default_filter_or(filter.as_str()))
            .format_target(false)
            .init();
    }
}
