//! Networked engine for a falling-block puzzle match: a deterministic
//! per-field simulator (`field`), the match-wide coordinator that owns every
//! field and the shared garbage arena (`coordinator`), the server-side
//! garbage distribution policy (`distributor`), the netplay wire protocol
//! (`protocol`), and the lock-step server/client instances built on top of
//! it (`server`, `client`, `input`).
//!
//! Out of scope, by design: rendering, audio, input-device binding, a
//! terminal UI, config file parsing, and installing a logging sink — this
//! crate only emits `log` facade calls and leaves the sink to the binary
//! embedding it.

pub mod coordinator;
pub mod distributor;
pub mod error;
pub mod field;
pub mod input;
pub mod protocol;

#[cfg(feature = "server")]
pub mod server;

#[cfg(feature = "client")]
pub mod client;

pub use coordinator::{Match, RankedField};
pub use distributor::GarbageDistributor;
pub use error::ConfigError;
pub use field::conf::FieldConf;
pub use field::{Field, KeyState};
pub use input::InputScheduler;
pub use protocol::{Message, MessageFramed, ProtocolError};

#[cfg(feature = "server")]
pub use server::{ServerConf, ServerError, ServerInstance};

#[cfg(feature = "client")]
pub use client::{ClientError, ClientInstance};
