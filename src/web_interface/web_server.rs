use log::{error, info};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

use warp::{Filter, Rejection, Reply};

use crate::error_handling::types::WebError;
use crate::process_management::Launcher;
use crate::session_management::SessionManager;
use crate::web_interface::routes::*;

/// HTTP boundary in front of the session pool
pub struct WebServer<L: Launcher> {
    context: Arc<ApiContext<L>>,
}

impl<L: Launcher> WebServer<L> {
    pub fn new(manager: Arc<SessionManager<L>>, public_url: impl Into<String>) -> Self {
        Self {
            context: Arc::new(ApiContext::new(manager, public_url)),
        }
    }

    /// All API routes. `list` is matched before the `:id` lookup.
    pub fn routes(&self) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
        let ctx = self.context.clone();
        health_route(ctx.clone())
            .or(create_route(ctx.clone()))
            .or(list_route(ctx.clone()))
            .or(get_route(ctx.clone()))
            .or(terminate_route(ctx.clone()))
            .or(redirect_route(ctx))
    }

    /// Serves until `shutdown` resolves.
    pub async fn run<F>(&self, addr: SocketAddr, shutdown: F) -> Result<(), WebError>
    where
        F: Future<Output = ()> + Send,
    {
        let addr = Self::resolve_address(addr).await?;
        info!("Listening on http://{}", addr);

        // warp panics when it cannot bind; the task boundary turns that into
        // an error
        let mut server = tokio::spawn(warp::serve(self.routes()).run(addr));
        let result = tokio::select! {
            joined = &mut server => match joined {
                Ok(()) => Ok(()),
                Err(e) => {
                    error!("Web server on {} stopped: {}", addr, e);
                    Err(WebError::BindFailed(format!("{}: {}", addr, e)))
                }
            },
            _ = shutdown => {
                info!("Web server shutting down");
                Ok(())
            }
        };
        server.abort();
        result
    }

    /// Checks that `addr` can be bound and pins port 0 to the port the OS
    /// picked, so the logged address is the served one.
    pub async fn resolve_address(addr: SocketAddr) -> Result<SocketAddr, WebError> {
        let bind_failed = |e: std::io::Error| {
            error!("Unable to bind {}: {}", addr, e);
            WebError::BindFailed(format!("{}: {}", addr, e))
        };
        let listener = TcpListener::bind(addr).await.map_err(bind_failed)?;
        listener.local_addr().map_err(bind_failed)
    }
}
