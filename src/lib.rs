//! Asynchronous client for the Asterisk Manager Interface (AMI): a
//! line-oriented text protocol for authenticating against, issuing action
//! requests to, and receiving events from a running Asterisk PBX.
//!
//! The entry point is [`session::Session::connect`]; actions are issued
//! either through the free functions in [`action`], the aggregate helpers in
//! [`list_actions`], or the convenience methods on [`channel::Channel`].

pub mod action;
mod actionid;
pub mod channel;
pub mod cli;
pub mod config;
pub mod error;
pub mod events;
pub mod list_actions;
pub mod packet;
mod parser;
pub mod session;
mod transport;

pub use channel::{Channel, ZapChannel};
pub use error::{AmiError, Result};
pub use events::{EventMessage, Handler, Registry};
pub use packet::Packet;
pub use session::{ConnectOptions, Session};
