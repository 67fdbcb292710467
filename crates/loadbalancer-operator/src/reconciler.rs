//! LoadBalancer Service reconciliation
//!
//! Builds the desired `Service` from validated configuration and converges
//! the cluster onto it.
//!
//! ## Create-or-replace
//!
//! Reconciliation always attempts a create first. If the API server reports
//! that the object already exists, the same object is written again with a
//! full replace. There is no separate existence check, and fields that
//! drifted on the live object are overwritten rather than merged.
//!
//! ## Ownership
//!
//! Exactly one Service named `<app>-lb` is managed per application and
//! namespace. Deleting it is idempotent: a missing object counts as deleted.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use loadbalancer_common::{
    parse_fixed_ip, validate_port, Annotations, ConfigError, ConfigResult, Selector,
};
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::client::{ServiceApi, ServiceApiError};

/// Label carrying the managed Service's own name
pub const NAME_LABEL: &str = "app.kubernetes.io/name";
/// Suffix appended to the application name
pub const NAME_SUFFIX: &str = "-lb";
/// Name of the single exposed port
pub const PORT_NAME: &str = "lb";
pub const SERVICE_TYPE: &str = "LoadBalancer";
pub const PROTOCOL: &str = "TCP";

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Api(#[from] ServiceApiError),
    #[error("Kubernetes API client unavailable: {0} (run in-cluster or provide a kubeconfig)")]
    ClientUnavailable(String),
}

/// Error classification for status reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// May clear up on the next invocation without operator action
    /// Examples: API server unavailable, RBAC still propagating
    Transient,
    /// Needs corrected configuration or environment before retrying
    /// Examples: invalid selector, no kubeconfig
    Permanent,
}

impl ReconcileError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ReconcileError::Config(_) => ErrorKind::Permanent,
            ReconcileError::ClientUnavailable(_) => ErrorKind::Permanent,
            ReconcileError::Api(_) => ErrorKind::Transient,
        }
    }
}

/// Name of the Service managed for an application
pub fn service_name(app_name: &str) -> String {
    format!("{app_name}{NAME_SUFFIX}")
}

/// Validated, immutable input for one reconciliation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    name: String,
    namespace: String,
    selector: Selector,
    target_port: i32,
    lb_port: i32,
    annotations: Annotations,
    fixed_ip: Option<String>,
}

impl ServiceConfig {
    /// Checks preconditions and normalizes inputs.
    ///
    /// Ports and the fixed IP are validated again here so callers that skip
    /// the parser still cannot produce an invalid object.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        app_name: &str,
        namespace: &str,
        selector: Selector,
        target_port: i64,
        lb_port: i64,
        annotations: Annotations,
        fixed_ip: Option<&str>,
    ) -> ConfigResult<Self> {
        if app_name.is_empty() {
            return Err(ConfigError::new("app_name must not be empty"));
        }
        if namespace.is_empty() {
            return Err(ConfigError::new("namespace must not be empty"));
        }
        if selector.is_empty() {
            return Err(ConfigError::new("selector must not be empty"));
        }

        Ok(Self {
            name: service_name(app_name),
            namespace: namespace.to_string(),
            selector,
            target_port: validate_port("target-port", target_port)?,
            lb_port: validate_port("lb-port", lb_port)?,
            annotations,
            fixed_ip: parse_fixed_ip(fixed_ip)?,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn selector(&self) -> &Selector {
        &self.selector
    }

    pub fn target_port(&self) -> i32 {
        self.target_port
    }

    pub fn lb_port(&self) -> i32 {
        self.lb_port
    }

    pub fn annotations(&self) -> &Annotations {
        &self.annotations
    }

    pub fn fixed_ip(&self) -> Option<&str> {
        self.fixed_ip.as_deref()
    }
}

/// Build the Service object the cluster should hold for `config`.
///
/// An empty annotation map is left out of the object entirely rather than
/// sent as `{}`.
pub fn desired_service(config: &ServiceConfig) -> Service {
    let labels = BTreeMap::from([(NAME_LABEL.to_string(), config.name.clone())]);
    let annotations = (!config.annotations.is_empty()).then(|| config.annotations.clone());

    Service {
        metadata: ObjectMeta {
            name: Some(config.name.clone()),
            namespace: Some(config.namespace.clone()),
            labels: Some(labels),
            annotations,
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some(SERVICE_TYPE.to_string()),
            load_balancer_ip: config.fixed_ip.clone(),
            selector: Some(config.selector.clone()),
            ports: Some(vec![ServicePort {
                name: Some(PORT_NAME.to_string()),
                port: config.lb_port,
                target_port: Some(IntOrString::Int(config.target_port)),
                protocol: Some(PROTOCOL.to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Converges the cluster's LoadBalancer Service through an injected API client
pub struct Reconciler<C> {
    client: C,
}

impl<C: ServiceApi> Reconciler<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Create or replace the application's LoadBalancer Service.
    ///
    /// Validation failures are returned before any API call.
    #[allow(clippy::too_many_arguments)]
    #[instrument(skip(self, selector, annotations))]
    pub async fn reconcile(
        &self,
        app_name: &str,
        namespace: &str,
        selector: &Selector,
        target_port: i64,
        lb_port: i64,
        annotations: &Annotations,
        fixed_ip: Option<&str>,
    ) -> Result<(), ReconcileError> {
        let config = ServiceConfig::new(
            app_name,
            namespace,
            selector.clone(),
            target_port,
            lb_port,
            annotations.clone(),
            fixed_ip,
        )?;
        self.apply(&config).await
    }

    /// Write the Service for an already validated config
    pub async fn apply(&self, config: &ServiceConfig) -> Result<(), ReconcileError> {
        let service = desired_service(config);

        match self.client.create(&service).await {
            Ok(()) => {
                info!(
                    namespace = %config.namespace,
                    name = %config.name,
                    "Created Service"
                );
            }
            Err(ServiceApiError::AlreadyExists { .. }) => {
                debug!(
                    namespace = %config.namespace,
                    name = %config.name,
                    "Service exists, replacing"
                );
                self.client.replace(&service).await?;
                info!(
                    namespace = %config.namespace,
                    name = %config.name,
                    "Replaced Service"
                );
            }
            Err(e) => return Err(e.into()),
        }

        Ok(())
    }

    /// Delete the application's Service; a missing Service is not an error
    #[instrument(skip(self))]
    pub async fn delete(&self, app_name: &str, namespace: &str) -> Result<(), ReconcileError> {
        let name = checked_name(app_name, namespace)?;

        match self.client.delete(namespace, &name).await {
            Ok(()) => {
                info!(namespace = %namespace, name = %name, "Deleted Service");
                Ok(())
            }
            Err(ServiceApiError::NotFound { .. }) => {
                debug!(namespace = %namespace, name = %name, "Service already absent");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Read the live Service for an application, if any
    #[instrument(skip(self))]
    pub async fn current(
        &self,
        app_name: &str,
        namespace: &str,
    ) -> Result<Option<Service>, ReconcileError> {
        let name = checked_name(app_name, namespace)?;
        Ok(self.client.get(namespace, &name).await?)
    }
}

fn checked_name(app_name: &str, namespace: &str) -> ConfigResult<String> {
    if app_name.is_empty() {
        return Err(ConfigError::new("app_name must not be empty"));
    }
    if namespace.is_empty() {
        return Err(ConfigError::new("namespace must not be empty"));
    }
    Ok(service_name(app_name))
}
