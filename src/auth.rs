use spin_sdk::http::{Request, Response};
use tracing::{info, warn};

use crate::config::{session_expiration_hours, SESSION_COOKIE};
use crate::core::db::Db;
use crate::core::errors::AppError;
use crate::core::form::cookie_value;
use crate::core::helpers::verify_password;
use crate::core::reply::Reply;
use crate::core::store::KvStore;
use crate::models::models::{Flash, FlashLevel, Post, SessionData, User};

/// True iff the actor authored the post.
pub fn can_modify(actor: &User, post: &Post) -> bool {
    actor.id == post.user_id
}

/// Looks the user up by username and checks the password hash. Both failure
/// modes come back as the same [`AppError::Authentication`].
pub fn authenticate(db: &Db, username: &str, password: &str) -> Result<User, AppError> {
    match db.user_by_username(username)? {
        Some(user) if verify_password(password, &user.password) => Ok(user),
        _ => Err(AppError::Authentication),
    }
}

struct ActiveSession {
    token: String,
    data: SessionData,
    dirty: bool,
}

enum CookieChange {
    Keep,
    Set(String),
    Clear,
}

impl CookieChange {
    fn header(&self) -> Option<String> {
        match self {
            CookieChange::Keep => None,
            CookieChange::Set(token) => Some(format!(
                "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
                SESSION_COOKIE,
                token,
                session_expiration_hours() * 3600
            )),
            CookieChange::Clear => Some(format!(
                "{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0",
                SESSION_COOKIE
            )),
        }
    }
}

/// Everything a handler knows about the request beyond its body: the store,
/// the actor (if any) and the session carrying flash messages.
pub struct RequestContext<'a> {
    pub db: Db<'a>,
    pub actor: Option<User>,
    session: Option<ActiveSession>,
    pending: Vec<Flash>,
    cookie: CookieChange,
}

impl<'a> RequestContext<'a> {
    /// Resolves the session cookie. A missing, unknown or expired session, or
    /// one whose user no longer exists, leaves the actor empty.
    pub fn load(kv: &'a dyn KvStore, req: &Request) -> Result<Self, AppError> {
        let db = Db::new(kv);
        let token = req
            .header("cookie")
            .and_then(|h| h.as_str())
            .and_then(|raw| cookie_value(raw, SESSION_COOKIE));

        let session = match token {
            Some(token) => db.session(&token)?.map(|data| ActiveSession {
                token,
                data,
                dirty: false,
            }),
            None => None,
        };

        let actor = match session.as_ref().and_then(|s| s.data.user_id.as_deref()) {
            Some(user_id) => db.user_by_id(user_id)?,
            None => None,
        };

        Ok(Self {
            db,
            actor,
            session,
            pending: Vec::new(),
            cookie: CookieChange::Keep,
        })
    }

    /// Queue a notice for the next rendered page.
    pub fn flash(&mut self, level: FlashLevel, message: impl Into<String>) {
        self.pending.push(Flash {
            level,
            message: message.into(),
        });
    }

    /// Drains stored and pending notices for rendering.
    pub fn take_flashes(&mut self) -> Vec<Flash> {
        let mut flashes = Vec::new();
        if let Some(session) = self.session.as_mut() {
            if !session.data.flashes.is_empty() {
                flashes.append(&mut session.data.flashes);
                session.dirty = true;
            }
        }
        flashes.append(&mut self.pending);
        flashes
    }

    /// Binds a fresh session to the user, replacing any previous one. Notices
    /// the old session had not shown yet move to the new one.
    pub fn login(&mut self, user: User) -> Result<(), AppError> {
        let mut unread = Vec::new();
        if let Some(old) = self.session.take() {
            self.db.delete_session(&old.token)?;
            unread = old.data.flashes;
        }
        let (token, mut data) = self.db.create_session(Some(user.id.as_str()))?;
        info!(user_id = %user.id, username = %user.username, "session established");

        let dirty = !unread.is_empty();
        data.flashes = unread;
        self.cookie = CookieChange::Set(token.clone());
        self.session = Some(ActiveSession {
            token,
            data,
            dirty,
        });
        self.actor = Some(user);
        Ok(())
    }

    pub fn logout(&mut self) -> Result<(), AppError> {
        if let Some(old) = self.session.take() {
            self.db.delete_session(&old.token)?;
        }
        if let Some(user) = self.actor.take() {
            info!(user_id = %user.id, "session terminated");
        }
        self.cookie = CookieChange::Clear;
        Ok(())
    }

    /// Persists notices that were not rendered (a redirect is leaving) and
    /// builds the response.
    pub fn finish(mut self, reply: Reply) -> Result<Response, AppError> {
        if !self.pending.is_empty() {
            let pending = std::mem::take(&mut self.pending);
            match self.session.as_mut() {
                Some(session) => {
                    session.data.flashes.extend(pending);
                    session.dirty = true;
                }
                None => {
                    let (token, mut data) = self.db.create_session(None)?;
                    data.flashes = pending;
                    self.cookie = CookieChange::Set(token.clone());
                    self.session = Some(ActiveSession {
                        token,
                        data,
                        dirty: true,
                    });
                }
            }
        }

        if let Some(session) = &self.session {
            if session.dirty {
                self.db.save_session(&session.token, &session.data)?;
            }
        }

        Ok(reply.into_response(self.cookie.header()))
    }
}

/// Runs before every authenticated handler: anonymous actors are sent to the
/// login page instead.
pub fn require_actor(ctx: &mut RequestContext) -> Result<User, Reply> {
    if let Some(user) = &ctx.actor {
        return Ok(user.clone());
    }
    warn!("anonymous request to an authenticated route");
    ctx.flash(FlashLevel::Info, "Please log in to access this page.");
    Err(Reply::redirect("/login"))
}
