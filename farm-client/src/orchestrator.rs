//! Credential state across all build-farm servers of one dashboard session.
//!
//! An [`Orchestrator`] lives for a single request: it is rebuilt from the
//! persisted [`SessionRecord`], performs one operation and is written back
//! with [`Orchestrator::write_session`].
//!
//! # States
//!
//! ```text
//! ANONYMOUS ──login (≥1 server ok)──▶ AUTHENTICATED
//!     ▲                                   │
//!     └──── logout / login (0 ok) / ──────┘
//!           sync leaves no valid token
//! ```
//!
//! While authenticated the active server always holds a non-empty token.

use serde::Deserialize;
use session::{Scope, ServerToken, SessionRecord};
use shared::counter;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use crate::challenge::ChallengeVerifier;
use crate::codec::{self, Decoded, ResponseMode, Schema, strip_ansi};
use crate::dispatcher::{ApiRequest, ApiVersion, Dispatcher};
use crate::errors::{ClientError, Result};
use crate::executor::FanOutExecutor;
use crate::metrics_defs::{LOGIN_RESULT, PACKAGE_LOG_FAILURE};
use crate::registry::{ServerDescriptor, ServerRegistry};

const LOGIN_PATH: &str = "login";
const SCOPES_PATH: &str = "token/scopes";

/// Login input. Never persisted.
#[derive(Clone, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub challenge_token: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
struct LoginResponse {
    token: String,
}

impl Schema for LoginResponse {
    fn validate(&self) -> std::result::Result<(), String> {
        if self.token.trim().is_empty() {
            return Err("token must not be empty".into());
        }
        Ok(())
    }
}

#[derive(Deserialize)]
struct ScopesResponse {
    scopes: BTreeSet<Scope>,
}

impl Schema for ScopesResponse {}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthState {
    Anonymous,
    Authenticated,
}

#[derive(Debug)]
pub struct LoginOutcome {
    pub valid_servers: Vec<ServerDescriptor>,
    /// Set when some, but not all, servers failed.
    pub warning: Option<String>,
}

#[derive(Debug)]
pub struct SyncOutcome {
    pub tokens: Vec<ServerToken>,
    pub warning: Option<String>,
}

pub struct Orchestrator {
    registry: Arc<ServerRegistry>,
    dispatcher: Dispatcher,
    executor: FanOutExecutor,
    /// One slot per registered server, in registry order
    tokens: Vec<ServerToken>,
    active: Option<usize>,
}

impl Orchestrator {
    /// An anonymous orchestrator.
    pub fn new(
        registry: Arc<ServerRegistry>,
        dispatcher: Dispatcher,
        executor: FanOutExecutor,
    ) -> Self {
        let tokens = registry.list().map(ServerDescriptor::empty_token).collect();
        Self {
            registry,
            dispatcher,
            executor,
            tokens,
            active: None,
        }
    }

    /// Rebuilds the orchestrator from persisted state.
    ///
    /// Stored tokens are matched to registered servers by name; servers
    /// missing from the record get an empty slot and stored entries for
    /// unknown servers are dropped. If the stored active server is no longer
    /// usable the first authenticated server takes its place.
    pub fn from_session(
        registry: Arc<ServerRegistry>,
        dispatcher: Dispatcher,
        executor: FanOutExecutor,
        record: &SessionRecord,
    ) -> Self {
        let mut orchestrator = Self::new(registry, dispatcher, executor);

        for slot in orchestrator.tokens.iter_mut() {
            if let Some(stored) = record.tokens.iter().find(|t| t.name == slot.name) {
                slot.token = stored.token.clone();
                slot.scopes = stored.scopes.clone();
            }
        }

        if record.is_logged_in {
            let stored_active = record
                .active_server_index
                .and_then(|index| record.tokens.get(index))
                .and_then(|stored| orchestrator.registry.index_of(&stored.name));
            orchestrator.active = orchestrator.pick_active(stored_active);
        }

        orchestrator
    }

    /// Writes the token set and active server into `record`.
    ///
    /// User identity fields are cleared once the session is anonymous.
    pub fn write_session(&self, record: &mut SessionRecord) {
        record.tokens = self.tokens.clone();
        record.active_server_index = self.active;
        record.is_logged_in = self.active.is_some();

        if !record.is_logged_in {
            record.username.clear();
            record.display_name.clear();
            record.avatar_url = None;
        }
    }

    pub fn registry(&self) -> &ServerRegistry {
        &self.registry
    }

    pub fn tokens(&self) -> &[ServerToken] {
        &self.tokens
    }

    pub fn state(&self) -> AuthState {
        match self.active {
            Some(_) => AuthState::Authenticated,
            None => AuthState::Anonymous,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.state() == AuthState::Authenticated
    }

    pub fn active_index(&self) -> Option<usize> {
        self.active
    }

    pub fn active_server(&self) -> Option<&ServerDescriptor> {
        self.active.and_then(|index| self.registry.get(index))
    }

    /// Servers the session currently holds a token for.
    pub fn accessible_servers(&self) -> Vec<&ServerDescriptor> {
        self.registry
            .list()
            .zip(&self.tokens)
            .filter(|(_, slot)| slot.is_authenticated())
            .map(|(server, _)| server)
            .collect()
    }

    /// Verifies the anti-automation challenge, then logs in to every server
    /// concurrently.
    ///
    /// The token set is replaced by the per-server results. Succeeds when at
    /// least one server issued a token; failing servers are listed in the
    /// outcome's warning. When no server issues a token the orchestrator is
    /// left anonymous and [`ClientError::AllServersFailed`] is returned.
    pub async fn login(
        &mut self,
        credentials: &Credentials,
        verifier: &dyn ChallengeVerifier,
    ) -> Result<LoginOutcome> {
        if let Err(e) = verifier
            .verify(
                &credentials.challenge_token,
                self.dispatcher.identity().client_ip(),
            )
            .await
        {
            tracing::warn!(username = %credentials.username, error = %e, "challenge verification failed");
            counter!(LOGIN_RESULT, "result" => "challenge_failed").increment(1);
            return Err(ClientError::ChallengeFailed);
        }

        let previous = self.active.map(|index| self.tokens[index].name.clone());
        let request = ApiRequest::post(
            ApiVersion::V1,
            LOGIN_PATH,
            serde_json::json!({
                "username": credentials.username,
                "password": credentials.password,
            }),
        );

        let dispatcher = self.dispatcher.clone();
        let outcome = self
            .executor
            .execute("login", self.registry.list().cloned().collect(), move |server| {
                let dispatcher = dispatcher.clone();
                let request = request.clone();
                async move {
                    let raw = dispatcher.send(&server, "", &request).await?;
                    let response: LoginResponse = codec::decode_json(&raw)?;
                    Ok(response.token)
                }
            })
            .await;

        let warning = outcome.error_text();
        let mut results = outcome.into_results();
        self.tokens = self
            .registry
            .list()
            .map(|server| {
                let mut slot = server.empty_token();
                if let Some(Ok(token)) = results.swap_remove(&server.name) {
                    slot.token = token;
                }
                slot
            })
            .collect();

        let previous = previous.and_then(|name| self.registry.index_of(&name));
        self.active = self.pick_active(previous);

        if self.active.is_none() {
            self.reset();
            counter!(LOGIN_RESULT, "result" => "failed").increment(1);
            return Err(ClientError::AllServersFailed(warning.unwrap_or_default()));
        }

        let result = if warning.is_some() { "degraded" } else { "ok" };
        counter!(LOGIN_RESULT, "result" => result).increment(1);
        tracing::info!(
            username = %credentials.username,
            active = ?self.active_server().map(|s| &s.name),
            result,
            "logged in"
        );

        Ok(LoginOutcome {
            valid_servers: self.accessible_servers().into_iter().cloned().collect(),
            warning,
        })
    }

    /// Re-reads the scopes of every token the session holds.
    ///
    /// Servers without a token are skipped. A server whose token no longer
    /// works is downgraded to an empty slot and reported in the warning; the
    /// other servers keep their tokens.
    pub async fn sync_scopes(&mut self) -> SyncOutcome {
        let held: HashMap<String, String> = self
            .tokens
            .iter()
            .filter(|slot| slot.is_authenticated())
            .map(|slot| (slot.name.clone(), slot.token.clone()))
            .collect();
        let targets: Vec<ServerDescriptor> = self
            .registry
            .list()
            .filter(|server| held.contains_key(&server.name))
            .cloned()
            .collect();

        let dispatcher = self.dispatcher.clone();
        let request = ApiRequest::get(ApiVersion::V1, SCOPES_PATH);
        let outcome = self
            .executor
            .execute("sync_scopes", targets, move |server| {
                let dispatcher = dispatcher.clone();
                let request = request.clone();
                let token = held.get(&server.name).cloned().unwrap_or_default();
                async move {
                    let raw = dispatcher.send(&server, &token, &request).await?;
                    let response: ScopesResponse = codec::decode_json(&raw)?;
                    Ok(response.scopes)
                }
            })
            .await;

        let warning = outcome.error_text();
        let mut results = outcome.into_results();
        for slot in self.tokens.iter_mut() {
            match results.swap_remove(&slot.name) {
                Some(Ok(scopes)) => slot.scopes = scopes,
                Some(Err(_)) => slot.clear(),
                None => {}
            }
        }

        let current = self.active;
        self.active = self.pick_active(current);
        if current.is_some() && self.active != current {
            tracing::info!(
                active = ?self.active_server().map(|s| &s.name),
                "active server lost its token during scope sync"
            );
        }

        SyncOutcome {
            tokens: self.tokens.clone(),
            warning,
        }
    }

    /// Makes `name` the target of subsequent dispatches. No network call.
    pub fn switch_active_server(&mut self, name: &str) -> Result<&ServerDescriptor> {
        let index = self
            .registry
            .index_of(name)
            .ok_or_else(|| ClientError::UnknownServer(name.to_string()))?;

        if !self.tokens[index].is_authenticated() {
            return Err(ClientError::NotAccessible(name.to_string()));
        }

        self.active = Some(index);
        self.registry
            .get(index)
            .ok_or_else(|| ClientError::UnknownServer(name.to_string()))
    }

    /// Drops every token; the orchestrator becomes anonymous.
    pub fn logout(&mut self) {
        self.reset();
    }

    /// Sends `request` to the active server with its token and decodes the
    /// response according to `mode`.
    pub async fn dispatch<T: Schema>(
        &self,
        request: &ApiRequest,
        mode: ResponseMode,
    ) -> Result<Decoded<T>> {
        let (server, token) = self.active_target()?;
        let raw = self.dispatcher.send(server, token, request).await?;
        codec::decode(raw, mode)
    }

    pub async fn dispatch_json<T: Schema>(&self, request: &ApiRequest) -> Result<T> {
        let (server, token) = self.active_target()?;
        let raw = self.dispatcher.send(server, token, request).await?;
        codec::decode_json(&raw)
    }

    pub async fn dispatch_text(&self, request: &ApiRequest) -> Result<String> {
        let (server, token) = self.active_target()?;
        let raw = self.dispatcher.send(server, token, request).await?;
        codec::decode_text(&raw)
    }

    pub async fn dispatch_raw(&self, request: &ApiRequest) -> Result<bytes::Bytes> {
        let (server, token) = self.active_target()?;
        Ok(self.dispatcher.send(server, token, request).await?.body)
    }

    /// Build log of `pkgbase` for `arch` from the active server.
    ///
    /// Best effort: any failure yields an empty log.
    pub async fn get_package_log(&self, pkgbase: &str, arch: &str, strip_formatting: bool) -> String {
        if !is_path_segment(pkgbase) || !is_path_segment(arch) {
            tracing::warn!(%pkgbase, %arch, "refusing to fetch log for invalid package path");
            return String::new();
        }

        let request = ApiRequest::get(ApiVersion::V1, format!("logs/{arch}/{pkgbase}.log"));
        match self.dispatch_text(&request).await {
            Ok(log) if strip_formatting => strip_ansi(&log).into_owned(),
            Ok(log) => log,
            Err(e) => {
                tracing::warn!(%pkgbase, %arch, error = %e, "failed to fetch package log");
                counter!(PACKAGE_LOG_FAILURE).increment(1);
                String::new()
            }
        }
    }

    fn active_target(&self) -> Result<(&ServerDescriptor, &str)> {
        let index = self.active.ok_or(ClientError::NotAuthenticated)?;
        let server = self
            .registry
            .get(index)
            .ok_or(ClientError::NotAuthenticated)?;
        Ok((server, &self.tokens[index].token))
    }

    /// `preferred` if it still holds a token, else the first server that does.
    fn pick_active(&self, preferred: Option<usize>) -> Option<usize> {
        preferred
            .filter(|&index| self.tokens.get(index).is_some_and(ServerToken::is_authenticated))
            .or_else(|| self.tokens.iter().position(ServerToken::is_authenticated))
    }

    fn reset(&mut self) {
        self.tokens.iter_mut().for_each(ServerToken::clear);
        self.active = None;
    }
}

fn is_path_segment(value: &str) -> bool {
    !value.is_empty() && value != "." && value != ".." && !value.contains(['/', '\\', '?', '#'])
}
