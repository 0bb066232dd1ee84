use chrono::Utc;
use log::debug;
use rocket::http::{Cookie, CookieJar, SameSite, Status};
use rocket::request::{FromRequest, Outcome, Request};
use rocket::time::Duration as CookieDuration;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::db::{self, DbPool};
use crate::error::AppError;
use crate::models::TokenRecord;

pub const SESSION_COOKIE: &str = "budget-pace-session";

/// The browser session behind the current request, resolved from the cookie.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub token: Option<TokenRecord>,
}

impl Session {
    pub fn require_token(&self) -> Result<&TokenRecord, AppError> {
        self.token.as_ref().ok_or(AppError::Unauthenticated)
    }
}

fn session_cookie(id: String, max_age_days: i64) -> Cookie<'static> {
    let mut cookie = Cookie::new(SESSION_COOKIE, id);
    cookie.set_path("/");
    cookie.set_http_only(true);
    cookie.set_same_site(SameSite::Lax);
    cookie.set_max_age(CookieDuration::days(max_age_days));
    cookie
}

/// A fresh anonymous session. Only the cookie exists until a login stores a token.
pub fn start_session(cookies: &CookieJar<'_>, max_age_days: i64) -> Session {
    let id = Uuid::new_v4().to_string();
    cookies.add(session_cookie(id.clone(), max_age_days));
    debug!("started session {}", &id[..8]);
    Session { id, token: None }
}

/// Looks the cookie up. A missing or malformed cookie gets a new anonymous
/// session; a well-formed id without a stored token stays anonymous.
pub fn resolve_session(
    pool: &DbPool,
    cookies: &CookieJar<'_>,
    max_age_days: i64,
) -> Result<Session, AppError> {
    let Some(id) = cookies
        .get(SESSION_COOKIE)
        .map(|cookie| cookie.value().to_string())
        .filter(|value| Uuid::parse_str(value).is_ok())
    else {
        return Ok(start_session(cookies, max_age_days));
    };
    let conn = pool.get()?;
    let token = db::session_token(&conn, &id)?;
    Ok(Session { id, token })
}

/// Stores the record under a new identifier and retires the current one.
pub fn log_in(
    pool: &DbPool,
    cookies: &CookieJar<'_>,
    session: &Session,
    record: TokenRecord,
    max_age_days: i64,
) -> Result<Session, AppError> {
    let id = Uuid::new_v4().to_string();
    {
        let mut conn = pool.get()?;
        db::rotate_session(&mut conn, &session.id, &id, &record, Utc::now())?;
    }
    cookies.add(session_cookie(id.clone(), max_age_days));
    Ok(Session {
        id,
        token: Some(record),
    })
}

/// Destroys the session identifier itself and issues a new one.
pub fn log_out(
    pool: &DbPool,
    cookies: &CookieJar<'_>,
    session: &Session,
    max_age_days: i64,
) -> Result<Session, AppError> {
    {
        let conn = pool.get()?;
        db::delete_session(&conn, &session.id)?;
    }
    Ok(start_session(cookies, max_age_days))
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for Session {
    type Error = AppError;

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let (Some(pool), Some(config)) = (
            req.rocket().state::<DbPool>(),
            req.rocket().state::<AppConfig>(),
        ) else {
            return Outcome::Error((
                Status::InternalServerError,
                AppError::Config("session store not managed".into()),
            ));
        };
        match resolve_session(pool, req.cookies(), config.session_max_age_days) {
            Ok(session) => Outcome::Success(session),
            Err(err) => Outcome::Error((err.status(), err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cookie_is_http_only_and_long_lived() {
        let cookie = session_cookie("abc".into(), 365);
        assert_eq!(cookie.name(), SESSION_COOKIE);
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::Lax));
        assert_eq!(cookie.max_age(), Some(CookieDuration::days(365)));
        assert_eq!(cookie.path(), Some("/"));
    }

    #[test]
    fn missing_token_is_unauthenticated() {
        let session = Session {
            id: "s".into(),
            token: None,
        };
        assert!(matches!(
            session.require_token(),
            Err(AppError::Unauthenticated)
        ));
    }
}
