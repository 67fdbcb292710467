//! LoadBalancer Service operator
//!
//! Keeps a single `<app>-lb` Service of type LoadBalancer in step with the
//! application's configuration.

pub mod client;
pub mod lifecycle;
pub mod reconciler;
pub mod settings;

pub use client::{KubeServiceApi, ServiceApi, ServiceApiError};
pub use lifecycle::{on_reconcile, on_remove, parse_config, RawConfig, UnitStatus};
pub use reconciler::{desired_service, service_name, ReconcileError, Reconciler, ServiceConfig};
pub use settings::{Settings, SettingsOverrides};
