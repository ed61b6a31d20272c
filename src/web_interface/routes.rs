use log::{debug, error};
use std::convert::Infallible;
use std::sync::Arc;
use uuid::Uuid;
use warp::http::{StatusCode, Uri};
use warp::{reply, Filter, Rejection, Reply};

use super::types::*;
use crate::error_handling::types::SessionError;
use crate::process_management::Launcher;
use crate::session_management::{SessionInfo, SessionManager};

/// Shared state handed to every route.
pub struct ApiContext<L: Launcher> {
    pub manager: Arc<SessionManager<L>>,
    /// Base URL the API is reachable under, used for `/d/{id}` links.
    pub public_url: String,
}

impl<L: Launcher> ApiContext<L> {
    pub fn new(manager: Arc<SessionManager<L>>, public_url: impl Into<String>) -> Self {
        Self {
            manager,
            public_url: public_url.into(),
        }
    }

    fn link(&self, id: &Uuid) -> String {
        format!("{}/d/{}", self.public_url.trim_end_matches('/'), id)
    }

    fn timeout_minutes(&self) -> u64 {
        self.manager.settings().session_timeout.as_secs() / 60
    }

    fn summary(&self, info: &SessionInfo) -> SessionSummary {
        SessionSummary {
            session_id: info.id.to_string(),
            url: self.manager.url_for(info.port),
            created_at: info.created_at.to_rfc3339(),
            expires_at: info
                .expires_at(self.manager.settings().session_timeout)
                .to_rfc3339(),
            user_id: info.owner.clone(),
        }
    }
}

fn with_context<L: Launcher>(
    ctx: Arc<ApiContext<L>>,
) -> impl Filter<Extract = (Arc<ApiContext<L>>,), Error = Infallible> + Clone {
    warp::any().map(move || ctx.clone())
}

fn json_error(message: impl Into<String>, status: StatusCode) -> reply::Response {
    reply::with_status(
        reply::json(&ApiError {
            error: message.into(),
        }),
        status,
    )
    .into_response()
}

fn not_found() -> reply::Response {
    json_error(SessionError::NotFound.to_string(), StatusCode::NOT_FOUND)
}

/// Unknown and malformed ids are indistinguishable to callers.
fn lookup<L: Launcher>(ctx: &ApiContext<L>, id: &str) -> Option<SessionInfo> {
    let id = Uuid::parse_str(id).ok()?;
    ctx.manager.get(&id)
}

pub async fn health<L: Launcher>(ctx: Arc<ApiContext<L>>) -> Result<reply::Response, Infallible> {
    let stats = ctx.manager.stats();
    Ok(reply::json(&HealthResponse {
        status: "ok",
        active_sessions: stats.active,
        provisioning_sessions: stats.provisioning,
        max_sessions: stats.max_sessions,
    })
    .into_response())
}

pub async fn create_dashboard<L: Launcher>(
    request: CreateRequest,
    ctx: Arc<ApiContext<L>>,
) -> Result<reply::Response, Infallible> {
    debug!("Dashboard requested by {:?}", request.user_id);
    let id = match ctx.manager.create(request.user_id).await {
        Ok(id) => id,
        Err(e) => return Ok(json_error(e.to_string(), StatusCode::INTERNAL_SERVER_ERROR)),
    };

    let info = match ctx.manager.get(&id) {
        Some(info) => info,
        None => {
            error!("Session {} vanished right after creation", id);
            return Ok(json_error(
                "Session ended before it could be used",
                StatusCode::INTERNAL_SERVER_ERROR,
            ));
        }
    };

    let response = CreateResponse {
        session_id: id.to_string(),
        url: ctx.manager.url_for(info.port),
        link: ctx.link(&id),
        expires_at: info
            .expires_at(ctx.manager.settings().session_timeout)
            .to_rfc3339(),
        timeout_minutes: ctx.timeout_minutes(),
    };
    Ok(reply::with_status(reply::json(&response), StatusCode::CREATED).into_response())
}

pub async fn get_dashboard<L: Launcher>(
    id: String,
    ctx: Arc<ApiContext<L>>,
) -> Result<reply::Response, Infallible> {
    let info = match lookup(&ctx, &id) {
        Some(info) => info,
        None => return Ok(not_found()),
    };
    let summary = ctx.summary(&info);
    Ok(reply::json(&SessionResponse {
        session_id: summary.session_id,
        url: summary.url,
        created_at: summary.created_at,
        expires_at: summary.expires_at,
    })
    .into_response())
}

pub async fn terminate_dashboard<L: Launcher>(
    id: String,
    ctx: Arc<ApiContext<L>>,
) -> Result<reply::Response, Infallible> {
    let terminated = match Uuid::parse_str(&id) {
        Ok(id) => ctx.manager.terminate(&id).await,
        Err(_) => false,
    };
    if terminated {
        Ok(reply::json(&MessageResponse {
            message: "Session terminated successfully".to_string(),
        })
        .into_response())
    } else {
        Ok(not_found())
    }
}

pub async fn list_dashboards<L: Launcher>(
    ctx: Arc<ApiContext<L>>,
) -> Result<reply::Response, Infallible> {
    let stats = ctx.manager.stats();
    let sessions: Vec<SessionSummary> = ctx
        .manager
        .list()
        .iter()
        .map(|info| ctx.summary(info))
        .collect();
    Ok(reply::json(&ListResponse {
        active_sessions: sessions.len(),
        max_sessions: stats.max_sessions,
        total_created: stats.total_created,
        failed_launches: stats.failed_launches,
        reaped: stats.reaped,
        sessions,
    })
    .into_response())
}

pub async fn redirect_to_dashboard<L: Launcher>(
    id: String,
    ctx: Arc<ApiContext<L>>,
) -> Result<reply::Response, Infallible> {
    let info = match lookup(&ctx, &id) {
        Some(info) => info,
        None => {
            return Ok(reply::with_status(
                "Dashboard session not found or expired",
                StatusCode::NOT_FOUND,
            )
            .into_response())
        }
    };
    match ctx.manager.url_for(info.port).parse::<Uri>() {
        Ok(uri) => Ok(warp::redirect::found(uri).into_response()),
        Err(e) => {
            error!("Session {} has an unusable address: {}", info.id, e);
            Ok(json_error(
                "Dashboard address unavailable",
                StatusCode::INTERNAL_SERVER_ERROR,
            ))
        }
    }
}

/// GET /health
pub fn health_route<L: Launcher>(
    ctx: Arc<ApiContext<L>>,
) -> impl Filter<Extract = (reply::Response,), Error = Rejection> + Clone {
    warp::path("health")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_context(ctx))
        .and_then(health::<L>)
}

/// POST /api/dashboard/create
pub fn create_route<L: Launcher>(
    ctx: Arc<ApiContext<L>>,
) -> impl Filter<Extract = (reply::Response,), Error = Rejection> + Clone {
    // A missing, empty or malformed body means "no owner"
    let body = warp::body::content_length_limit(16 * 1024)
        .and(warp::body::json::<CreateRequest>())
        .or(warp::any().map(CreateRequest::default))
        .unify();

    warp::path!("api" / "dashboard" / "create")
        .and(warp::post())
        .and(body)
        .and(with_context(ctx))
        .and_then(create_dashboard::<L>)
}

/// GET /api/dashboard/list
pub fn list_route<L: Launcher>(
    ctx: Arc<ApiContext<L>>,
) -> impl Filter<Extract = (reply::Response,), Error = Rejection> + Clone {
    warp::path!("api" / "dashboard" / "list")
        .and(warp::get())
        .and(with_context(ctx))
        .and_then(list_dashboards::<L>)
}

/// GET /api/dashboard/:id
pub fn get_route<L: Launcher>(
    ctx: Arc<ApiContext<L>>,
) -> impl Filter<Extract = (reply::Response,), Error = Rejection> + Clone {
    warp::path!("api" / "dashboard" / String)
        .and(warp::get())
        .and(with_context(ctx))
        .and_then(get_dashboard::<L>)
}

/// DELETE /api/dashboard/:id/terminate
pub fn terminate_route<L: Launcher>(
    ctx: Arc<ApiContext<L>>,
) -> impl Filter<Extract = (reply::Response,), Error = Rejection> + Clone {
    warp::path!("api" / "dashboard" / String / "terminate")
        .and(warp::delete())
        .and(with_context(ctx))
        .and_then(terminate_dashboard::<L>)
}

/// GET /d/:id
pub fn redirect_route<L: Launcher>(
    ctx: Arc<ApiContext<L>>,
) -> impl Filter<Extract = (reply::Response,), Error = Rejection> + Clone {
    warp::path!("d" / String)
        .and(warp::get())
        .and(with_context(ctx))
        .and_then(redirect_to_dashboard::<L>)
}
