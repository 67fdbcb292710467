//! Kubernetes Service API wrapper
//!
//! Narrows the kube client down to the four calls the reconciler needs and
//! classifies API failures into the cases it recovers from.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Service;
use kube::api::{DeleteParams, PostParams};
use kube::{Api, Client};
use thiserror::Error;
use tracing::{debug, instrument};

use crate::reconciler::ReconcileError;

/// Trait for Service API operations
///
/// This trait allows for mocking in tests while keeping the concrete
/// implementation for production use.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ServiceApi: Send + Sync {
    /// Fetch a Service, `None` if it does not exist
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Service>, ServiceApiError>;

    /// Create a Service in the namespace named by its metadata
    ///
    /// Returns [`ServiceApiError::AlreadyExists`] when an object with the same
    /// name is already present.
    async fn create(&self, service: &Service) -> Result<(), ServiceApiError>;

    /// Overwrite an existing Service with the given object
    async fn replace(&self, service: &Service) -> Result<(), ServiceApiError>;

    /// Delete a Service
    ///
    /// Returns [`ServiceApiError::NotFound`] when there is nothing to delete.
    async fn delete(&self, namespace: &str, name: &str) -> Result<(), ServiceApiError>;
}

#[derive(Debug, Error)]
pub enum ServiceApiError {
    #[error("Service {namespace}/{name} already exists")]
    AlreadyExists { namespace: String, name: String },
    #[error("Service {namespace}/{name} not found")]
    NotFound { namespace: String, name: String },
    #[error("Service object is missing metadata.{0}")]
    MissingMetadata(&'static str),
    #[error(transparent)]
    Kube(#[from] kube::Error),
}

/// HTTP status code carried by an API error response, if any
fn status_code(error: &kube::Error) -> Option<u16> {
    match error {
        kube::Error::Api(response) => Some(response.code),
        _ => None,
    }
}

/// Extract (namespace, name) from a Service about to be written
fn object_ref(service: &Service) -> Result<(&str, &str), ServiceApiError> {
    let namespace = service
        .metadata
        .namespace
        .as_deref()
        .ok_or(ServiceApiError::MissingMetadata("namespace"))?;
    let name = service
        .metadata
        .name
        .as_deref()
        .ok_or(ServiceApiError::MissingMetadata("name"))?;
    Ok((namespace, name))
}

/// [`ServiceApi`] backed by a kube-rs client
pub struct KubeServiceApi {
    client: Client,
    field_manager: String,
}

impl KubeServiceApi {
    /// Wrap an existing client. Writes are attributed to `field_manager`.
    pub fn new(client: Client, field_manager: impl Into<String>) -> Self {
        Self {
            client,
            field_manager: field_manager.into(),
        }
    }

    /// Build a client from the in-cluster environment or local kubeconfig.
    ///
    /// Failure is reported as [`ReconcileError::ClientUnavailable`] so the
    /// caller can surface it like a configuration problem.
    pub async fn try_default(field_manager: impl Into<String>) -> Result<Self, ReconcileError> {
        let client = Client::try_default()
            .await
            .map_err(|e| ReconcileError::ClientUnavailable(e.to_string()))?;
        Ok(Self::new(client, field_manager))
    }

    /// Namespace the underlying client falls back to
    pub fn default_namespace(&self) -> &str {
        self.client.default_namespace()
    }

    fn services(&self, namespace: &str) -> Api<Service> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn post_params(&self) -> PostParams {
        PostParams {
            field_manager: Some(self.field_manager.clone()),
            ..Default::default()
        }
    }
}

#[async_trait]
impl ServiceApi for KubeServiceApi {
    #[instrument(skip(self))]
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Service>, ServiceApiError> {
        match self.services(namespace).get(name).await {
            Ok(service) => Ok(Some(service)),
            Err(e) if status_code(&e) == Some(404) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self, service))]
    async fn create(&self, service: &Service) -> Result<(), ServiceApiError> {
        let (namespace, name) = object_ref(service)?;
        match self
            .services(namespace)
            .create(&self.post_params(), service)
            .await
        {
            Ok(_) => {
                debug!(namespace, name, "Service created");
                Ok(())
            }
            Err(e) if status_code(&e) == Some(409) => Err(ServiceApiError::AlreadyExists {
                namespace: namespace.to_string(),
                name: name.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self, service))]
    async fn replace(&self, service: &Service) -> Result<(), ServiceApiError> {
        let (namespace, name) = object_ref(service)?;
        self.services(namespace)
            .replace(name, &self.post_params(), service)
            .await?;
        debug!(namespace, name, "Service replaced");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete(&self, namespace: &str, name: &str) -> Result<(), ServiceApiError> {
        match self
            .services(namespace)
            .delete(name, &DeleteParams::default())
            .await
        {
            Ok(_) => {
                debug!(namespace, name, "Service deleted");
                Ok(())
            }
            Err(e) if status_code(&e) == Some(404) => Err(ServiceApiError::NotFound {
                namespace: namespace.to_string(),
                name: name.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }
}
