//! Client core for a process/system monitor backed by a local daemon.
//!
//! A [`backend::Collector`] polls the daemon over its Unix socket, decodes
//! the replies and publishes [`model::SystemSnapshot`]s over a channel;
//! [`backend::CommandClient`] sends one-shot signals outside the poll loop.

pub mod backend;
pub mod config;
pub mod error;
pub mod model;
pub mod util;

pub use error::{Error, Result};
