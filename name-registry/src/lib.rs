//! A toy name registry served over a line-oriented TCP protocol.
//!
//! Clients send `LOOKUP <type> <domain>`, `LIST`,
//! `REGISTER <domain> <type> <value>` and `EXIT`. Records live in memory and
//! every registration is appended to a backing file that is replayed on
//! startup.
//!
//! - [`cli`] parses the command-line interface for server and client modes.
//! - [`record`] defines records and the syntax REGISTER accepts.
//! - [`store`] holds the shared record table and its backing file.
//! - [`protocol`] decodes request lines and encodes status-coded responses.
//! - [`server`] accepts TCP connections and runs a bounded pool of client
//!   sessions against one store.
//! - [`client`] is a small interactive client for the protocol.

pub mod cli;
pub mod client;
pub mod protocol;
pub mod record;
pub mod server;
pub mod store;
