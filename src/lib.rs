//! Client core for a binary node messaging protocol: the tokenized node codec
//! and the end-to-end sessions that protect message payloads.
//!
//! The codec lives in [`binary`]. Sessions are built with X3DH ([`x3dh`]) and
//! advanced with a double ratchet ([`ratchet`]); [`SessionManager`] ties them
//! to `<enc>` nodes and serializes work per peer device.

pub mod binary;
pub use binary::{AttrValue, Attributes, Content, Node};

mod config;
pub use config::ClientConfig;

mod envelope;
pub use envelope::*;

mod error;
pub use error::Error;

pub mod keystore;
pub use keystore::KeyStore;

mod manager;
pub use manager::*;

mod proto;

pub mod ratchet;
pub use ratchet::{CiphertextMessage, PreKeyMessage, RatchetMessage, SessionState};

pub mod session;
pub use session::{Session, SessionAddress, SessionBuilder, SessionStore};

pub mod sync;

mod types;
pub use types::X25519PublicKey;

pub mod x3dh;
pub use x3dh::*;
