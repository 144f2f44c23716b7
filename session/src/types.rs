use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A named permission a server grants to a token.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Read,
    Write,
    Admin,
}

/// Credential state for one registered server.
///
/// An empty `token` means the session is not authenticated against that
/// server. Entries exist for every registered server, authenticated or not.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerToken {
    pub name: String,
    pub description: String,
    pub url: String,
    pub token: String,
    pub scopes: BTreeSet<Scope>,
}

impl ServerToken {
    pub fn is_authenticated(&self) -> bool {
        !self.token.is_empty()
    }

    /// Drops the token and any scopes granted with it.
    pub fn clear(&mut self) {
        self.token.clear();
        self.scopes.clear();
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub is_logged_in: bool,
    pub username: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub active_server_index: Option<usize>,
    pub tokens: Vec<ServerToken>,
}
