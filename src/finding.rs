//! Structured results produced by health-check probes.

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::{fmt, future::Future, sync::Arc};

pub type FixAction = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Resolves to `true` once the underlying problem is gone.
pub type RecheckAction = Arc<dyn Fn() -> BoxFuture<'static, bool> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    pub fn label(self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Description {
    pub short: String,
    /// BBCode markup, rendered by the host.
    pub long: String,
}

#[derive(Clone)]
pub struct Finding {
    pub severity: Severity,
    pub description: Description,
    automatic_fix: Option<FixAction>,
    on_recheck: Option<RecheckAction>,
}

impl Finding {
    pub fn new(severity: Severity, short: impl Into<String>, long: impl Into<String>) -> Self {
        Self {
            severity,
            description: Description {
                short: short.into(),
                long: long.into(),
            },
            automatic_fix: None,
            on_recheck: None,
        }
    }

    pub fn warning(short: impl Into<String>, long: impl Into<String>) -> Self {
        Self::new(Severity::Warning, short, long)
    }

    pub fn with_fix<F, Fut>(mut self, fix: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.automatic_fix = Some(Arc::new(move || Box::pin(fix())));
        self
    }

    pub fn with_recheck<F, Fut>(mut self, recheck: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        self.on_recheck = Some(Arc::new(move || Box::pin(recheck())));
        self
    }

    pub fn has_fix(&self) -> bool {
        self.automatic_fix.is_some()
    }

    pub fn has_recheck(&self) -> bool {
        self.on_recheck.is_some()
    }

    /// Runs the automatic fix. A finding without one is a no-op.
    pub async fn apply_fix(&self) -> anyhow::Result<()> {
        match &self.automatic_fix {
            Some(fix) => fix().await,
            None => Ok(()),
        }
    }

    /// `None` when the finding carries no re-check.
    pub async fn recheck(&self) -> Option<bool> {
        match &self.on_recheck {
            Some(recheck) => Some(recheck().await),
            None => None,
        }
    }

    pub fn report(&self, check_id: &str) -> FindingReport {
        FindingReport {
            check_id: check_id.to_string(),
            severity: self.severity,
            description: self.description.clone(),
            automatic_fix: self.has_fix(),
            recheck: self.has_recheck(),
        }
    }
}

impl fmt::Debug for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Finding")
            .field("severity", &self.severity)
            .field("description", &self.description)
            .field("automatic_fix", &self.has_fix())
            .field("on_recheck", &self.has_recheck())
            .finish()
    }
}

/// Serializable view of a finding for CLI output.
#[derive(Debug, Clone, Serialize)]
pub struct FindingReport {
    pub check_id: String,
    pub severity: Severity,
    pub description: Description,
    pub automatic_fix: bool,
    pub recheck: bool,
}
