use crate::codec::{SessionCodec, SessionError};
use crate::types::SessionRecord;
use std::sync::Arc;
use std::time::SystemTime;

/// Durable key/value record backing one browser session.
///
/// `load` never fails: an absent, expired or unreadable record yields the
/// default (anonymous) record. `save` keeps the session's original issue
/// time, so saving never extends its lifetime; after `destroy` the next
/// `save` starts a new session.
pub trait SessionStore: Send {
    fn load(&self) -> SessionRecord;
    fn save(&mut self, record: &SessionRecord) -> Result<(), SessionError>;
    fn destroy(&mut self);
}

fn open_or_default(codec: &SessionCodec, sealed: Option<&str>) -> SessionRecord {
    open_session(codec, sealed)
        .map(|(record, _)| record)
        .unwrap_or_default()
}

fn open_session(codec: &SessionCodec, sealed: Option<&str>) -> Option<(SessionRecord, SystemTime)> {
    match codec.open_with_issue_time(sealed?) {
        Ok(opened) => Some(opened),
        Err(SessionError::Expired) => {
            tracing::debug!("session expired, starting anonymous");
            None
        }
        Err(e) => {
            tracing::warn!(error = %e, "discarding unreadable session");
            None
        }
    }
}

/// Keeps the sealed value in memory. Encoding and expiry behave exactly as
/// they do for cookies.
pub struct MemorySessionStore {
    codec: Arc<SessionCodec>,
    sealed: Option<String>,
    issued_at: Option<SystemTime>,
}

impl MemorySessionStore {
    pub fn new(codec: Arc<SessionCodec>) -> Self {
        Self {
            codec,
            sealed: None,
            issued_at: None,
        }
    }

    pub fn sealed(&self) -> Option<&str> {
        self.sealed.as_deref()
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self) -> SessionRecord {
        open_or_default(&self.codec, self.sealed.as_deref())
    }

    fn save(&mut self, record: &SessionRecord) -> Result<(), SessionError> {
        let issued_at = *self.issued_at.get_or_insert_with(SystemTime::now);
        self.sealed = Some(self.codec.seal_at(record, issued_at)?);
        Ok(())
    }

    fn destroy(&mut self) {
        self.sealed = None;
        self.issued_at = None;
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CookieSettings {
    pub name: String,
    pub secure: bool,
}

impl Default for CookieSettings {
    fn default() -> Self {
        Self {
            name: "dashboard_session".into(),
            secure: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum CookieUpdate {
    Set { value: String, max_age: u64 },
    Clear,
}

/// Session carried in a cookie for the duration of one HTTP request.
///
/// Built from the inbound `Cookie` header; mutations are turned into a
/// `Set-Cookie` header value by [`CookieSessionStore::set_cookie_header`].
pub struct CookieSessionStore {
    codec: Arc<SessionCodec>,
    settings: CookieSettings,
    current: Option<String>,
    issued_at: Option<SystemTime>,
    update: Option<CookieUpdate>,
}

impl CookieSessionStore {
    pub fn from_cookie_header(
        codec: Arc<SessionCodec>,
        settings: CookieSettings,
        cookie_header: Option<&str>,
    ) -> Self {
        let current = cookie_header
            .and_then(|header| find_cookie(header, &settings.name))
            .map(str::to_string);
        let issued_at = open_session(&codec, current.as_deref()).map(|(_, issued_at)| issued_at);

        Self {
            codec,
            settings,
            current,
            issued_at,
            update: None,
        }
    }

    /// The `Set-Cookie` value to send back, if the session changed.
    pub fn set_cookie_header(&self) -> Option<String> {
        let secure = if self.settings.secure { "; Secure" } else { "" };
        match self.update.as_ref()? {
            CookieUpdate::Set { value, max_age } => Some(format!(
                "{}={}; Max-Age={}; Path=/; HttpOnly; SameSite=Lax{}",
                self.settings.name, value, max_age, secure
            )),
            CookieUpdate::Clear => Some(format!(
                "{}=; Max-Age=0; Path=/; HttpOnly; SameSite=Lax{}",
                self.settings.name, secure
            )),
        }
    }
}

impl SessionStore for CookieSessionStore {
    fn load(&self) -> SessionRecord {
        open_or_default(&self.codec, self.current.as_deref())
    }

    fn save(&mut self, record: &SessionRecord) -> Result<(), SessionError> {
        let now = SystemTime::now();
        let issued_at = *self.issued_at.get_or_insert(now);
        let sealed = self.codec.seal_at(record, issued_at)?;

        self.current = Some(sealed.clone());
        self.update = Some(CookieUpdate::Set {
            value: sealed,
            max_age: self.codec.remaining(issued_at, now).as_secs(),
        });
        Ok(())
    }

    fn destroy(&mut self) {
        self.current = None;
        self.issued_at = None;
        self.update = Some(CookieUpdate::Clear);
    }
}

fn find_cookie<'a>(header: &'a str, name: &str) -> Option<&'a str> {
    header
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim_matches('"'))
}
