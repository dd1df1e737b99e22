//! EPOS-to-payment-terminal gateway
//!
//! Sits between a till (EPOS) speaking framed JSON over TCP and a single
//! card payment terminal driven through a blocking vendor session. The
//! till submits operations (sale, refund, reversal, batch read,
//! reconciliation); the gateway runs them one at a time against the
//! terminal, relays the terminal's mid-transaction prompts back to the
//! till, and guards resubmissions so an ambiguous outcome never turns
//! into a double charge.

pub mod cli;
pub mod codec;
pub mod config;
pub mod constants;
pub mod device;
pub mod error;
pub mod logging;
pub mod mailbox;
pub mod protocol;
pub mod server;
pub mod terminal;
