//! CLI command implementations
//!
//! Each command loads the configuration, builds what it needs and, for
//! the long-running ones, drives it on a Tokio runtime until Ctrl-C.

use std::path::Path;
use std::sync::Arc;

use serde_json::json;
use uuid::Uuid;

use crate::auth::JwtManager;
use crate::functions::{
    AssistantService, OpenAiChatModel, PaymentLedger, PaymentService, PremiumDirectory,
};
use crate::http_server::{HttpServer, ServerContext};
use crate::observability::{log_event_with_fields, Event, Logger, MetricsRegistry, Severity};
use crate::realtime::{
    EventFilter, RealtimeManager, RowFilter, SubscriptionDescriptor, SubscriptionKey,
    SubscriptionSet, WebSocketTransport,
};

use super::args::{Cli, Command};
use super::config::Config;
use super::errors::{CliError, CliResult};
use super::io::{write_change, write_response};

/// Main CLI entry point
///
/// Parses arguments and dispatches to the appropriate command.
/// This is the only function that main.rs should call.
pub fn run() -> CliResult<()> {
    let cli = Cli::parse_args();

    let severity = Severity::parse(&cli.log_level).ok_or_else(|| {
        CliError::invalid_argument(format!("unknown log level: {}", cli.log_level))
    })?;
    Logger::set_min_severity(severity);

    run_command(cli.command)
}

/// Run the appropriate command based on CLI args
pub fn run_command(cmd: Command) -> CliResult<()> {
    match cmd {
        Command::Serve { config } => serve(&config),
        Command::Listen {
            config,
            table,
            event,
            filter,
            key,
            access_token,
        } => listen(
            &config,
            ListenArgs {
                table,
                event,
                filter,
                key,
                access_token,
            },
        ),
        Command::Token { config, sub, email } => token(&config, &sub, email.as_deref()),
    }
}

fn load_config(path: &Path) -> CliResult<Config> {
    let config = Config::load(path)?;
    log_event_with_fields(
        Event::ConfigLoaded,
        &[("path", path.display().to_string().as_str())],
    );
    Ok(config)
}

fn runtime() -> CliResult<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new()
        .map_err(|e| CliError::boot_failed(format!("Failed to create tokio runtime: {}", e)))
}

/// Serve the edge functions until Ctrl-C
pub fn serve(config_path: &Path) -> CliResult<()> {
    let config = load_config(config_path)?;

    let jwt = JwtManager::new(config.jwt_config()?)
        .map_err(|e| CliError::config_error(e.to_string()))?;
    let model = OpenAiChatModel::new(config.openai_config()?)
        .map_err(|e| CliError::config_error(e.to_string()))?;

    let metrics = MetricsRegistry::global();
    let premium = Arc::new(PremiumDirectory::new());

    let context = ServerContext {
        jwt,
        assistant: AssistantService::new(
            config.assistant_config(),
            Arc::new(model),
            premium.clone(),
            metrics.clone(),
        ),
        payments: PaymentService::new(
            config.payments_config(),
            Arc::new(PaymentLedger::new()),
            premium,
            metrics.clone(),
        ),
        metrics,
    };

    let server = HttpServer::new(config.http.clone(), context);

    runtime()?.block_on(async {
        server
            .start()
            .await
            .map_err(|e| CliError::boot_failed(format!("HTTP server failed: {}", e)))
    })
}

/// Arguments of the listen command
#[derive(Debug, Clone)]
pub struct ListenArgs {
    pub table: String,
    pub event: String,
    pub filter: Option<String>,
    pub key: Option<String>,
    pub access_token: Option<String>,
}

impl ListenArgs {
    /// Build the single subscription this command listens with
    pub fn subscriptions(&self, schema: &str) -> CliResult<SubscriptionSet> {
        let event: EventFilter = self
            .event
            .parse()
            .map_err(|e: crate::realtime::RealtimeError| CliError::invalid_argument(e.to_string()))?;

        let key = SubscriptionKey::new(self.key.clone().unwrap_or_else(|| self.table.clone()));

        let line_key = key.clone();
        let mut descriptor = SubscriptionDescriptor::new(key, self.table.as_str(), move |payload| {
            if let Err(e) = write_change(&line_key, &payload) {
                log_event_with_fields(Event::OutputFailed, &[("reason", e.to_string().as_str())]);
            }
        })
        .with_event(event)
        .with_schema(schema);

        if let Some(filter) = &self.filter {
            let filter: RowFilter = filter
                .parse()
                .map_err(|e: crate::realtime::RealtimeError| {
                    CliError::invalid_argument(e.to_string())
                })?;
            descriptor = descriptor.with_filter(filter);
        }

        SubscriptionSet::new(vec![descriptor]).map_err(|e| CliError::invalid_argument(e.to_string()))
    }
}

/// Print changes for one table until Ctrl-C
pub fn listen(config_path: &Path, args: ListenArgs) -> CliResult<()> {
    let config = load_config(config_path)?;
    let websocket = config.websocket_config(args.access_token.clone())?;
    let subscriptions = args.subscriptions(&config.realtime.schema)?;
    let options = config.realtime_options();

    runtime()?.block_on(async move {
        let manager = RealtimeManager::new(Arc::new(WebSocketTransport::new(websocket)));
        let activation = manager.activate(options, subscriptions);
        let mut status = activation.status_updates();
        let initial = activation.status().to_string();
        log_event_with_fields(Event::ChannelStatus, &[("status", initial.as_str())]);

        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        loop {
            tokio::select! {
                _ = &mut ctrl_c => break,
                changed = status.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let current = status.borrow_and_update().to_string();
                    log_event_with_fields(Event::ChannelStatus, &[("status", current.as_str())]);
                }
            }
        }

        activation.shutdown().await;
        Ok(())
    })
}

/// Print a development access token
pub fn token(config_path: &Path, sub: &str, email: Option<&str>) -> CliResult<()> {
    let config = load_config(config_path)?;

    let user_id = Uuid::parse_str(sub)
        .map_err(|_| CliError::invalid_argument(format!("--sub must be a UUID, got {}", sub)))?;

    let jwt = JwtManager::new(config.jwt_config()?)
        .map_err(|e| CliError::config_error(e.to_string()))?;
    let access_token = jwt
        .issue(user_id, email)
        .map_err(|e| CliError::boot_failed(e.to_string()))?;

    write_response(json!({
        "access_token": access_token,
        "token_type": "bearer",
        "expires_in": config.auth.token_ttl_secs,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(event: &str, filter: Option<&str>) -> ListenArgs {
        ListenArgs {
            table: "workouts".into(),
            event: event.into(),
            filter: filter.map(str::to_string),
            key: None,
            access_token: None,
        }
    }

    #[test]
    fn test_listen_subscription_defaults_key_to_table() {
        let set = args("*", None).subscriptions("public").unwrap();
        assert_eq!(set.len(), 1);
        assert!(set.get(&SubscriptionKey::new("workouts")).is_some());
    }

    #[test]
    fn test_listen_rejects_bad_arguments() {
        let err = args("UPSERT", None).subscriptions("public").unwrap_err();
        assert_eq!(err.code_str(), "COACHLINK_CLI_INVALID_ARGUMENT");

        let err = args("INSERT", Some("no-operator")).subscriptions("public").unwrap_err();
        assert_eq!(err.code_str(), "COACHLINK_CLI_INVALID_ARGUMENT");
    }

    #[test]
    fn test_listen_binding_carries_filter() {
        let set = args("INSERT", Some("student_id=eq.42"))
            .subscriptions("training")
            .unwrap();
        let binding = &set.bindings()[0];
        assert_eq!(binding.schema, "training");
        assert_eq!(binding.filter.as_deref(), Some("student_id=eq.42"));
        assert_eq!(binding.event, EventFilter::Insert);
    }
}
