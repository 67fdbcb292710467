//! Lifecycle handlers and operator-visible status
//!
//! Install, config-changed and upgrade events all map to [`on_reconcile`];
//! removal maps to [`on_remove`]. Leadership is decided by the caller and
//! passed in: non-leaders never touch the cluster.

use std::fmt;

use loadbalancer_common::{
    parse_annotations, parse_port, parse_selector, Annotations, ConfigError, ConfigResult,
    Selector,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::client::ServiceApi;
use crate::reconciler::{ErrorKind, ReconcileError, Reconciler};

pub const WAITING_FOR_LEADER: &str = "waiting for leader to reconcile load balancer";
pub const RECONCILING: &str = "reconciling kubernetes service";
pub const READY: &str = "load balancer service ready";

/// Process exit codes
pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_BLOCKED: u8 = 1;

/// Status reported back to the operator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitStatus {
    /// Work in progress
    Maintenance(String),
    /// Service converged
    Active(String),
    /// Needs operator intervention; the message says why
    Blocked(String),
    /// Another unit is responsible
    Waiting(String),
}

impl UnitStatus {
    pub fn name(&self) -> &'static str {
        match self {
            UnitStatus::Maintenance(_) => "maintenance",
            UnitStatus::Active(_) => "active",
            UnitStatus::Blocked(_) => "blocked",
            UnitStatus::Waiting(_) => "waiting",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            UnitStatus::Maintenance(m)
            | UnitStatus::Active(m)
            | UnitStatus::Blocked(m)
            | UnitStatus::Waiting(m) => m,
        }
    }

    pub fn is_blocked(&self) -> bool {
        matches!(self, UnitStatus::Blocked(_))
    }

    pub fn exit_code(&self) -> u8 {
        if self.is_blocked() {
            EXIT_BLOCKED
        } else {
            EXIT_SUCCESS
        }
    }
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name(), self.message())
    }
}

/// Unvalidated configuration exactly as the operator supplied it
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RawConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_port: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lb_port: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fixed_ip: Option<String>,
    #[serde(
        rename = "loadbalancer-annotations",
        skip_serializing_if = "Option::is_none"
    )]
    pub annotations: Option<String>,
}

/// Typed configuration produced by [`parse_config`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedConfig {
    pub selector: Selector,
    pub target_port: i32,
    pub lb_port: i32,
    pub annotations: Annotations,
    pub fixed_ip: Option<String>,
}

fn required<'a>(value: Option<&'a str>, name: &str) -> ConfigResult<&'a str> {
    value.ok_or_else(|| ConfigError::new(format!("{name} must be set")))
}

/// Validate every field of the raw configuration.
///
/// The fixed IP is passed through untouched; the reconciler normalizes it.
pub fn parse_config(raw: &RawConfig) -> ConfigResult<ParsedConfig> {
    let selector = parse_selector(required(raw.selector.as_deref(), "selector")?)?;
    let target_port = parse_port(
        "target-port",
        required(raw.target_port.as_deref(), "target-port")?,
    )?;
    let lb_port = parse_port("lb-port", required(raw.lb_port.as_deref(), "lb-port")?)?;
    let annotations = parse_annotations(raw.annotations.as_deref())?;

    Ok(ParsedConfig {
        selector,
        target_port,
        lb_port,
        annotations,
        fixed_ip: raw.fixed_ip.clone(),
    })
}

/// Handle install, config-changed and upgrade.
///
/// `report` receives intermediate statuses; the final status is returned.
pub async fn on_reconcile<C, F>(
    reconciler: &Reconciler<C>,
    app_name: &str,
    namespace: &str,
    raw: &RawConfig,
    is_leader: bool,
    mut report: F,
) -> UnitStatus
where
    C: ServiceApi,
    F: FnMut(&UnitStatus),
{
    if !is_leader {
        debug!("Not leader, skipping reconciliation");
        return UnitStatus::Waiting(WAITING_FOR_LEADER.to_string());
    }

    report(&UnitStatus::Maintenance(RECONCILING.to_string()));

    let parsed = match parse_config(raw) {
        Ok(parsed) => parsed,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            return UnitStatus::Blocked(e.to_string());
        }
    };

    let result = reconciler
        .reconcile(
            app_name,
            namespace,
            &parsed.selector,
            parsed.target_port.into(),
            parsed.lb_port.into(),
            &parsed.annotations,
            parsed.fixed_ip.as_deref(),
        )
        .await;

    match result {
        Ok(()) => UnitStatus::Active(READY.to_string()),
        Err(e) => blocked_for(&e),
    }
}

/// Map a reconciliation failure to the status shown to the operator
pub fn blocked_for(error: &ReconcileError) -> UnitStatus {
    match error.kind() {
        ErrorKind::Permanent => {
            error!(error = %error, "Invalid configuration");
            UnitStatus::Blocked(error.to_string())
        }
        ErrorKind::Transient => {
            error!(error = %error, "Failed to reconcile service");
            UnitStatus::Blocked(format!("failed to reconcile service: {error}"))
        }
    }
}

/// Handle removal of the application.
///
/// Non-leaders do nothing. Errors are logged and returned to the caller.
pub async fn on_remove<C: ServiceApi>(
    reconciler: &Reconciler<C>,
    app_name: &str,
    namespace: &str,
    is_leader: bool,
) -> Result<(), ReconcileError> {
    if !is_leader {
        debug!("Not leader, skipping removal");
        return Ok(());
    }

    match reconciler.delete(app_name, namespace).await {
        Ok(()) => {
            info!(app = %app_name, namespace = %namespace, "Removed load balancer service");
            Ok(())
        }
        Err(e) => {
            warn!(error = %e, "Failed to delete service");
            Err(e)
        }
    }
}
