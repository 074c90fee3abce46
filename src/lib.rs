//! Gateway-side git execution with a cross-scope request/response bridge.
//!
//! Scripts running in client or designer scope describe a git operation; the
//! [`bridge`] carries it to the gateway, where the [`server`] hands it to the
//! [`git`] repository manager, which uses a [`transport`] for anything remote.

pub mod bridge;
pub mod config;
pub mod git;
pub mod server;
pub mod transport;
pub mod util;
