#[macro_use]
extern crate rocket;

mod config;
mod dashboard;
mod db;
mod error;
mod models;
mod oauth;
mod progress;
mod proxy;
mod refresh;
mod selection;
mod session;
mod upstream;

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Local, Utc};
use config::AppConfig;
use db::DbPool;
use error::{AppError, render_error};
use log::{debug, info, warn};
use proxy::ApiFailure;
use rocket::form::Form;
use rocket::figment::Figment;
use rocket::fs::FileServer;
use rocket::http::{CookieJar, Header};
use rocket::http::uri::Origin;
use rocket::response::Redirect;
use rocket::response::stream::{Event, EventStream};
use rocket::{Build, Request, Rocket, Shutdown, State};
use rocket::tokio::select;
use rocket_dyn_templates::Template;
use selection::SelectionStore;
use session::Session;
use upstream::{HttpBudgetApi, SharedApi, UpstreamResponse};

#[derive(FromForm)]
struct SelectionForm {
    budget_id: String,
    category_id: String,
    selected: bool,
}

#[derive(Responder)]
struct NoStore {
    inner: Redirect,
    cache_control: Header<'static>,
}

impl NoStore {
    fn redirect(to: &'static str) -> Self {
        NoStore {
            inner: Redirect::to(to),
            cache_control: Header::new("Cache-Control", "no-store"),
        }
    }
}

fn render_login(config: &AppConfig) -> Result<Template, AppError> {
    Ok(Template::render(
        "index",
        serde_json::json!({
            "login_url": config.authorize_url()?.as_str(),
        }),
    ))
}

#[get("/")]
async fn index(
    session: Session,
    config: &State<AppConfig>,
    api: &State<SharedApi>,
    selections: &State<SelectionStore>,
) -> Result<Template, AppError> {
    let Some(token) = session.token.as_ref() else {
        return render_login(config);
    };
    let today = Local::now().date_naive();
    let meta = dashboard::budget_meta(api.inner().as_ref(), token).await?;
    let view = dashboard::render_view(api.inner().as_ref(), selections, token, &meta, today).await?;

    Ok(Template::render("home", serde_json::json!({ "view": view })))
}

#[get("/callback?<code>")]
async fn callback(
    session: Session,
    code: Option<String>,
    pool: &State<DbPool>,
    config: &State<AppConfig>,
    api: &State<SharedApi>,
    cookies: &CookieJar<'_>,
) -> Result<Redirect, AppError> {
    let code = code.unwrap_or_default();
    let record = oauth::exchange(api.inner().as_ref(), &code)
        .await
        .inspect_err(|err| {
            if let AppError::AuthExchange(detail) = err {
                warn!("login failed: {detail}");
            }
        })?;

    // Committed before the redirect so the next request sees the record.
    let user_id = record.user_id.clone();
    session::log_in(pool, cookies, &session, record, config.session_max_age_days)?;
    info!("session authenticated for upstream user {user_id}");
    Ok(Redirect::to("/"))
}

#[get("/logout")]
fn logout(
    session: Session,
    pool: &State<DbPool>,
    config: &State<AppConfig>,
    cookies: &CookieJar<'_>,
) -> Result<NoStore, AppError> {
    session::log_out(pool, cookies, &session, config.session_max_age_days)?;
    Ok(NoStore::redirect("/"))
}

#[get("/api/<path..>")]
async fn api_proxy(
    path: PathBuf,
    origin: &Origin<'_>,
    session: Session,
    api: &State<SharedApi>,
) -> Result<UpstreamResponse, ApiFailure> {
    let segments: Vec<&str> = path.iter().filter_map(|s| s.to_str()).collect();
    let query = origin.query().map(|q| q.as_str().to_owned());
    let target = proxy::upstream_path(&segments, query.as_deref());
    Ok(proxy::proxy(api.inner().as_ref(), &session, &target).await?)
}

#[post("/selection", data = "<form>")]
fn toggle_selection(
    session: Session,
    selections: &State<SelectionStore>,
    form: Form<SelectionForm>,
) -> Result<Redirect, AppError> {
    let token = session.require_token()?;
    let form = form.into_inner();
    let key = selection::storage_key(&token.user_id, &form.budget_id);
    selections.toggle(&key, &form.category_id, form.selected)?;
    Ok(Redirect::to("/"))
}

#[get("/events")]
async fn events(
    session: Session,
    config: &State<AppConfig>,
    api: &State<SharedApi>,
    selections: &State<SelectionStore>,
    mut end: Shutdown,
) -> Result<EventStream![], AppError> {
    let token = session.require_token()?.clone();
    let api = Arc::clone(api.inner());
    let selections = selections.inner().clone();
    let meta = dashboard::budget_meta(api.as_ref(), &token).await?;
    let key = selection::storage_key(&meta.user_id, &meta.budget_id);
    let mut triggers =
        refresh::spawn_triggers(config.refresh_interval(), selections.subscribe(), key.clone());

    Ok(EventStream! {
        loop {
            let trigger = select! {
                trigger = triggers.recv() => match trigger {
                    Some(trigger) => trigger,
                    None => break,
                },
                _ = &mut end => break,
            };
            debug!("refreshing {key} after {trigger:?}");
            let today = Local::now().date_naive();
            let event = match dashboard::render_view(api.as_ref(), &selections, &token, &meta, today).await {
                Ok(view) => Event::json(&view).event("rows"),
                Err(err) => Event::data(err.to_string()).event("failure"),
            };
            yield event;
        }
    })
}

#[catch(404)]
fn not_found() -> Template {
    render_error("Not found")
}

#[catch(default)]
fn internal_error(status: rocket::http::Status, _req: &Request<'_>) -> Template {
    debug!("rendering catcher for {status}");
    render_error("An error has occurred")
}

fn build(figment: Figment, config: AppConfig, pool: DbPool, api: SharedApi) -> Rocket<Build> {
    let selections = SelectionStore::new(pool.clone());
    rocket::custom(figment)
        .manage(config)
        .manage(pool)
        .manage(api)
        .manage(selections)
        .mount(
            "/",
            routes![index, callback, logout, api_proxy, toggle_selection, events],
        )
        .mount("/static", FileServer::from("static"))
        .register("/", catchers![not_found, internal_error])
        .attach(Template::fairing())
}

#[launch]
fn rocket() -> _ {
    let figment = config::figment();
    let config = AppConfig::from_figment(&figment).expect("client credentials configured");
    std::fs::create_dir_all(&config.data_dir).expect("create data directory");
    let pool = db::init_db(&config.database_path()).expect("open session store");
    {
        let conn = pool.get().expect("db connection");
        let cutoff = Utc::now() - ChronoDuration::days(config.session_max_age_days);
        match db::prune_sessions(&conn, cutoff) {
            Ok(0) => {}
            Ok(removed) => info!("pruned {removed} expired sessions"),
            Err(err) => warn!("could not prune sessions: {err}"),
        }
    }
    let api: SharedApi = Arc::new(HttpBudgetApi::new(&config));
    build(figment, config, pool, api)
}
