//! Session state carried between dashboard requests.
//!
//! Every request rebuilds its credential state from a [`SessionRecord`] and
//! writes the mutated record back before responding. The record travels in a
//! encrypted, compressed cookie produced by [`SessionCodec`].

pub mod codec;
pub mod store;
pub mod types;

pub use codec::{DEFAULT_TTL, SessionCodec, SessionError};
pub use store::{CookieSessionStore, CookieSettings, MemorySessionStore, SessionStore};
pub use types::{Scope, ServerToken, SessionRecord};
