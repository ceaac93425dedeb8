//! Safe exception handling for pipeline failures
//!
//! Turns any failure into a message that is safe to show to an end user.
//! Admission rejections and invalid input are shown with their detail;
//! everything else becomes a generic notice while the full error chain goes
//! to the structured log and the audit file. Redaction applies only to the
//! rendered message; the audit file always receives the root cause.

use chrono::Utc;
use std::future::Future;
use tracing::{error, warn};

use crate::audit::{AuditLog, AuditRecord};
use crate::config::ExceptionConfig;
use crate::error::{GuardError, Result};

const EXTERNAL_KIND: &str = "external";

pub struct SafeExceptionHandler {
    hide_internal_details: bool,
    audit: Option<AuditLog>,
}

impl SafeExceptionHandler {
    pub fn new(hide_internal_details: bool, audit: AuditLog) -> Self {
        Self {
            hide_internal_details,
            audit: Some(audit),
        }
    }

    /// Handler that writes no audit records. Opt-out only.
    pub fn unaudited(hide_internal_details: bool) -> Self {
        Self {
            hide_internal_details,
            audit: None,
        }
    }

    pub fn from_config(config: &ExceptionConfig) -> Result<Self> {
        if !config.audit {
            warn!("Exception auditing disabled by configuration");
            return Ok(Self::unaudited(config.hide_internal_details));
        }
        let audit = AuditLog::open(&config.audit_log_path)?;
        Ok(Self::new(config.hide_internal_details, audit))
    }

    pub fn hides_internal_details(&self) -> bool {
        self.hide_internal_details
    }

    pub fn audit_log(&self) -> Option<&AuditLog> {
        self.audit.as_ref()
    }

    /// Log, audit and render any pipeline failure.
    pub fn handle(&self, err: &anyhow::Error, context: &str) -> String {
        let guard = err.downcast_ref::<GuardError>();
        let kind = guard.map(GuardError::kind).unwrap_or(EXTERNAL_KIND);
        let user_facing = guard.map(GuardError::is_user_facing).unwrap_or(false);
        // Show the admission error itself, not whatever context wraps it
        let message = guard.map(ToString::to_string).unwrap_or_else(|| err.to_string());
        let chain = format!("{:#}", err);

        self.report(context, kind, &message, &chain);
        self.render(context, user_facing, &message, &chain)
    }

    /// Same policy for a bare `GuardError`
    pub fn handle_guard(&self, err: &GuardError, context: &str) -> String {
        let message = err.to_string();
        let mut chain = message.clone();
        let mut source = std::error::Error::source(err);
        while let Some(cause) = source {
            chain.push_str(": ");
            chain.push_str(&cause.to_string());
            source = std::error::Error::source(cause);
        }

        self.report(context, err.kind(), &message, &chain);
        self.render(context, err.is_user_facing(), &message, &chain)
    }

    /// Run `f`, converting any error into a safe message
    pub fn safe_execute<T, E, F>(&self, context: &str, f: F) -> std::result::Result<T, String>
    where
        F: FnOnce() -> std::result::Result<T, E>,
        E: Into<anyhow::Error>,
    {
        f().map_err(|e| self.handle(&e.into(), context))
    }

    pub async fn safe_execute_async<T, E, Fut>(
        &self,
        context: &str,
        fut: Fut,
    ) -> std::result::Result<T, String>
    where
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Into<anyhow::Error>,
    {
        fut.await.map_err(|e| self.handle(&e.into(), context))
    }

    fn render(&self, context: &str, user_facing: bool, message: &str, chain: &str) -> String {
        if !self.hide_internal_details {
            return chain.to_string();
        }
        if user_facing {
            format!("Error in {}: {}", context, message)
        } else {
            format!(
                "An internal error occurred in {}. Contact an administrator.",
                context
            )
        }
    }

    fn report(&self, context: &str, kind: &str, message: &str, chain: &str) {
        error!(context, kind, error = %chain, "Exception in {}", context);

        let Some(audit) = &self.audit else {
            return;
        };

        let record = AuditRecord {
            timestamp: Utc::now(),
            context: context.to_string(),
            kind: kind.to_string(),
            message: message.to_string(),
            detail: chain.to_string(),
        };

        if let Err(e) = audit.append(&record) {
            warn!(path = %audit.path().display(), "Failed to write audit record: {}", e);
        }
    }
}
