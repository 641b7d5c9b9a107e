//! # HTTP Server
//!
//! Functions server combining all endpoint routers.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use super::assistant_routes::{assistant_routes, AssistantState};
use super::config::HttpServerConfig;
use super::observability_routes::{health_routes, observability_routes};
use super::webhook_routes::{webhook_routes, WebhookState};
use crate::auth::JwtManager;
use crate::functions::{AssistantService, PaymentService};
use crate::observability::{log_event, log_event_with_fields, Event, MetricsRegistry};

/// Services the routers are built from
pub struct ServerContext {
    pub jwt: JwtManager,
    pub assistant: AssistantService,
    pub payments: PaymentService,
    pub metrics: Arc<MetricsRegistry>,
}

/// HTTP server for the edge functions
pub struct HttpServer {
    config: HttpServerConfig,
    router: Router,
}

impl HttpServer {
    /// Create a server from its configuration and services
    pub fn new(config: HttpServerConfig, context: ServerContext) -> Self {
        let router = Self::build_router(&config, context);
        Self { config, router }
    }

    /// Build the combined router with all endpoints
    fn build_router(config: &HttpServerConfig, context: ServerContext) -> Router {
        let assistant_state = Arc::new(AssistantState {
            jwt: context.jwt,
            service: context.assistant,
        });
        let webhook_state = Arc::new(WebhookState {
            service: context.payments,
        });

        let cors = if config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<_> = config
                .cors_origins
                .iter()
                .filter_map(|s| s.parse().ok())
                .collect();

            CorsLayer::new()
                .allow_origin(AllowOrigin::list(origins))
                .allow_methods(Any)
                .allow_headers(Any)
        };

        let functions = Router::new()
            .merge(assistant_routes(assistant_state))
            .merge(webhook_routes(webhook_state));

        Router::new()
            // Health check at root level
            .merge(health_routes())
            .nest("/observability", observability_routes(context.metrics))
            .nest("/functions/v1", functions)
            .layer(cors)
    }

    /// Get the socket address
    pub fn socket_addr(&self) -> String {
        self.config.socket_addr()
    }

    /// Get the router (for testing)
    pub fn router(self) -> Router {
        self.router
    }

    /// Serve until Ctrl-C
    pub async fn start(self) -> io::Result<()> {
        let addr: SocketAddr = self
            .config
            .socket_addr()
            .parse()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        let listener = TcpListener::bind(addr).await?;
        log_event_with_fields(Event::ServerStart, &[("addr", addr.to_string().as_str())]);

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
            })
            .await?;

        log_event(Event::ServerStop);
        Ok(())
    }
}
