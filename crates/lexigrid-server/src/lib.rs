//! Lexigrid session server
//!
//! The [`Coordinator`] is the authoritative arbiter: it owns the bag, the turn order
//! and word validation. The rest of the crate connects it to renet.

pub mod channels;
pub mod config;
pub mod oracle;
pub mod roster;
pub mod session;
pub mod transport;

pub use channels::*;
pub use config::{ConfigError, ServerConfig};
pub use oracle::{DictionaryOracle, OracleError, WordList};
pub use roster::Roster;
pub use session::{Coordinator, JoinError, Outgoing, Recipient, SessionPhase};
pub use transport::{ServerRunner, TransportConfig, TransportError, PROTOCOL_ID};
