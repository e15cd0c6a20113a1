//! Core of the GrabTrio video-download bot.
//!
//! This crate is transport-agnostic. Telegram and yt-dlp live behind ports
//! (`MessagingPort`, `Downloader`) implemented in adapter crates.

pub mod config;
pub mod domain;
pub mod download;
pub mod errors;
pub mod formatting;
pub mod logging;
pub mod messaging;
pub mod preset;
pub mod router;
pub mod session;
pub mod texts;

pub use errors::{Error, Result};
