use axum::http::header::{COOKIE, SET_COOKIE};
use axum::http::{HeaderMap, HeaderValue};
use axum::response::{IntoResponse, Response};
use farm_client::{
    ChallengeVerifier, Dispatcher, FanOutExecutor, HttpChallengeVerifier, Orchestrator,
    ServerRegistry, build_http_client,
};
use session::{CookieSessionStore, CookieSettings, SessionCodec, SessionRecord, SessionStore};
use shared::client_identity::ClientIdentity;
use std::sync::Arc;

use crate::config::Config;
use crate::errors::{GatewayError, Result};

/// Process-wide dependencies shared by every request.
#[derive(Clone)]
pub struct AppState {
    registry: Arc<ServerRegistry>,
    http_client: reqwest::Client,
    verifier: Arc<dyn ChallengeVerifier>,
    codec: Arc<SessionCodec>,
    cookie: CookieSettings,
    executor: FanOutExecutor,
}

impl AppState {
    pub fn new(
        registry: ServerRegistry,
        http_client: reqwest::Client,
        verifier: Arc<dyn ChallengeVerifier>,
        codec: SessionCodec,
        cookie: CookieSettings,
        executor: FanOutExecutor,
    ) -> Self {
        Self {
            registry: Arc::new(registry),
            http_client,
            verifier,
            codec: Arc::new(codec),
            cookie,
            executor,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let http_client = build_http_client(&config.upstream)?;
        let verifier = Arc::new(HttpChallengeVerifier::new(
            http_client.clone(),
            &config.challenge,
        ));

        Ok(Self::new(
            config.registry()?,
            http_client,
            verifier,
            SessionCodec::new(config.session.secret.as_bytes(), config.session.ttl()),
            config.session.cookie_settings(),
            FanOutExecutor::new(&config.upstream),
        ))
    }

    pub fn registry(&self) -> &ServerRegistry {
        &self.registry
    }

    pub fn verifier(&self) -> &dyn ChallengeVerifier {
        self.verifier.as_ref()
    }

    /// Loads the caller's session and rebuilds its orchestrator.
    pub(crate) fn open_session(&self, headers: &HeaderMap) -> SessionContext {
        let cookies: Vec<&str> = headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .collect();
        let cookie_header = (!cookies.is_empty()).then(|| cookies.join("; "));

        let store = CookieSessionStore::from_cookie_header(
            self.codec.clone(),
            self.cookie.clone(),
            cookie_header.as_deref(),
        );
        let record = store.load();
        let dispatcher = Dispatcher::new(
            self.http_client.clone(),
            ClientIdentity::from_headers(headers),
        );
        let orchestrator = Orchestrator::from_session(
            self.registry.clone(),
            dispatcher,
            self.executor.clone(),
            &record,
        );

        SessionContext {
            store,
            loaded: record.clone(),
            record,
            orchestrator,
        }
    }
}

/// One request's view of the session: load, mutate, then [`finish`].
///
/// [`finish`]: SessionContext::finish
pub(crate) struct SessionContext {
    store: CookieSessionStore,
    loaded: SessionRecord,
    pub record: SessionRecord,
    pub orchestrator: Orchestrator,
}

impl SessionContext {
    /// Copies orchestrator state into the record.
    pub fn sync_record(&mut self) {
        self.orchestrator.write_session(&mut self.record);
    }

    /// Starts a new session lifetime on the next save.
    pub fn renew(&mut self) {
        self.store.destroy();
    }

    /// Persists the session and attaches the resulting cookie to the
    /// response, whether `result` succeeded or not.
    pub fn finish<R: IntoResponse>(mut self, result: Result<R>) -> Response {
        self.sync_record();

        if self.record.is_logged_in {
            if let Err(e) = self.store.save(&self.record) {
                return GatewayError::from(e).into_response();
            }
        } else if self.loaded != SessionRecord::default() {
            self.store.destroy();
        }

        let mut response = result.into_response();
        if let Some(cookie) = self.store.set_cookie_header() {
            match HeaderValue::from_str(&cookie) {
                Ok(value) => {
                    response.headers_mut().append(SET_COOKIE, value);
                }
                Err(e) => tracing::error!(error = %e, "session cookie is not a valid header value"),
            }
        }
        response
    }
}
