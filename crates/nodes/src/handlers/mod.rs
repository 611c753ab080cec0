//! Built-in node handlers for the lightweight worker family.

pub mod calculator;
pub mod calendar;
pub mod delay;
pub mod email;
pub mod end;
pub mod filter;
pub mod http_request;
pub mod start;
pub mod transform;
pub mod wait;
pub mod webhook;

use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;

use crate::{HandlerRegistry, NodeError, RegistryError};

pub use calculator::CalculatorHandler;
pub use calendar::{CalendarHandler, GOOGLE_CALENDAR_API};
pub use delay::DelayHandler;
pub use email::{EmailHandler, HttpMailer, Mailer, OutgoingEmail, UnconfiguredMailer};
pub use end::EndHandler;
pub use filter::FilterHandler;
pub use http_request::HttpRequestHandler;
pub use start::StartHandler;
pub use transform::TransformHandler;
pub use wait::WaitHandler;
pub use webhook::WebhookCallHandler;

/// Shared dependencies for the built-in handlers.
#[derive(Clone)]
pub struct BuiltinOptions {
    /// Client used by every handler that talks HTTP.
    pub http: reqwest::Client,
    pub mailer: Arc<dyn Mailer>,
    /// Base URL of the Calendar REST API.
    pub calendar_base_url: String,
}

impl Default for BuiltinOptions {
    fn default() -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            http,
            mailer: Arc::new(UnconfiguredMailer),
            calendar_base_url: GOOGLE_CALENDAR_API.to_string(),
        }
    }
}

/// Registry holding every built-in handler.
pub fn builtin_registry(opts: BuiltinOptions) -> Result<HandlerRegistry, RegistryError> {
    let mut registry = HandlerRegistry::new();
    registry.register(Arc::new(StartHandler))?;
    registry.register(Arc::new(EndHandler))?;
    registry.register(Arc::new(TransformHandler))?;
    registry.register(Arc::new(DelayHandler))?;
    registry.register(Arc::new(FilterHandler))?;
    registry.register(Arc::new(WaitHandler))?;
    registry.register(Arc::new(CalculatorHandler::new()))?;
    registry.register(Arc::new(EmailHandler::new(opts.mailer.clone())))?;
    registry.register(Arc::new(WebhookCallHandler::new(opts.http.clone())))?;
    registry.register(Arc::new(HttpRequestHandler::new(opts.http.clone())))?;
    registry.register(Arc::new(CalendarHandler::new(opts.http, opts.calendar_base_url)))?;
    Ok(registry)
}

/// Classify a non-success HTTP status: 5xx and 429 are worth retrying,
/// everything else is permanent.
pub(crate) fn status_error(what: &str, status: StatusCode, body: &str) -> NodeError {
    let snippet: String = body.chars().take(200).collect();
    let msg = format!("{what} returned {status}: {snippet}");
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        NodeError::Retryable(msg)
    } else {
        NodeError::Fatal(msg)
    }
}

pub(crate) fn timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;
    use queue::NodeFamily;

    #[test]
    fn builtin_registry_serves_every_lightweight_tag() {
        let registry = builtin_registry(BuiltinOptions::default()).unwrap();
        for tag in [
            "start", "trigger", "end", "transform", "delay", "filter", "condition",
            "conditional", "email", "action", "webhook", "httpRequest", "calculator",
            "googleCalendar", "wait", "webhookTrigger",
        ] {
            assert!(registry.resolve(tag).is_some(), "no handler for {tag}");
            assert_eq!(NodeFamily::for_node_type(tag), NodeFamily::Lightweight, "{tag}");
        }
        assert!(registry.resolve("textGeneration").is_none());
    }

    #[test]
    fn server_errors_are_retryable() {
        assert!(matches!(
            status_error("call", StatusCode::BAD_GATEWAY, ""),
            NodeError::Retryable(_)
        ));
        assert!(matches!(
            status_error("call", StatusCode::TOO_MANY_REQUESTS, ""),
            NodeError::Retryable(_)
        ));
        assert!(matches!(
            status_error("call", StatusCode::NOT_FOUND, "missing"),
            NodeError::Fatal(m) if m.contains("404") && m.contains("missing")
        ));
    }
}
