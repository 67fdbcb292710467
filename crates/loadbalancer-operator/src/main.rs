use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use tracing::{debug, error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use loadbalancer_operator::lifecycle::{
    self, blocked_for, UnitStatus, EXIT_BLOCKED, EXIT_SUCCESS, WAITING_FOR_LEADER,
};
use loadbalancer_operator::{
    desired_service, parse_config, service_name, KubeServiceApi, Reconciler, ServiceConfig,
    Settings, SettingsOverrides,
};

const DEFAULT_LOG_FILTER: &str = "info,loadbalancer_operator=debug";
const FALLBACK_NAMESPACE: &str = "default";

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogFormat {
    #[default]
    Plain,
    Json,
}

#[derive(Parser)]
#[command(name = "loadbalancer-operator")]
#[command(about = "Manage a LoadBalancer Service for an application", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Application name; the Service is named `<app-name>-lb`
    #[arg(long, global = true)]
    app_name: Option<String>,

    /// Namespace of the Service (defaults to the client's namespace)
    #[arg(short, long, global = true)]
    namespace: Option<String>,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value = "plain")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or replace the Service (install, config-changed, upgrade)
    Reconcile {
        #[command(flatten)]
        service: ServiceArgs,
        /// Whether this unit holds leadership
        #[arg(long, default_value_t = true, action = ArgAction::Set)]
        leader: bool,
    },
    /// Delete the Service (remove)
    Delete {
        /// Whether this unit holds leadership
        #[arg(long, default_value_t = true, action = ArgAction::Set)]
        leader: bool,
    },
    /// Print the desired Service without contacting the cluster
    Render {
        #[command(flatten)]
        service: ServiceArgs,
    },
    /// Print the live Service
    Status,
    /// Show effective configuration
    Config {
        #[command(flatten)]
        service: ServiceArgs,
    },
}

#[derive(Args, Default)]
struct ServiceArgs {
    /// Pod selector, `k=v,k2=v2` or a JSON object
    #[arg(long)]
    selector: Option<String>,

    /// Container port traffic is forwarded to
    #[arg(long)]
    target_port: Option<String>,

    /// Port exposed by the load balancer
    #[arg(long)]
    lb_port: Option<String>,

    /// Requested load balancer IP
    #[arg(long)]
    fixed_ip: Option<String>,

    /// Service annotations, `k=v,k2=v2`
    #[arg(long)]
    annotations: Option<String>,
}

impl Cli {
    fn overrides(&self) -> SettingsOverrides {
        let empty = ServiceArgs::default();
        let service = match &self.command {
            Commands::Reconcile { service, .. }
            | Commands::Render { service }
            | Commands::Config { service } => service,
            Commands::Delete { .. } | Commands::Status => &empty,
        };

        SettingsOverrides {
            app_name: self.app_name.clone(),
            namespace: self.namespace.clone(),
            selector: service.selector.clone(),
            target_port: service.target_port.clone(),
            lb_port: service.lb_port.clone(),
            fixed_ip: service.fixed_ip.clone(),
            annotations: service.annotations.clone(),
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let registry = tracing_subscriber::registry().with(filter);

    // stdout carries command output; logs go to stderr
    match format {
        LogFormat::Plain => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(false)
                    .with_writer(std::io::stderr),
            )
            .init(),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let settings = Settings::load(cli.config.as_deref(), &cli.overrides())
        .context("Failed to load settings")?;
    debug!(app = %settings.app_name, "Loaded settings");

    let code = match cli.command {
        Commands::Reconcile { leader, .. } => reconcile(&settings, leader).await,
        Commands::Delete { leader } => delete(&settings, leader).await,
        Commands::Render { .. } => render(&settings)?,
        Commands::Status => status(&settings).await?,
        Commands::Config { .. } => {
            print!("{}", serde_yaml::to_string(&settings)?);
            EXIT_SUCCESS
        }
    };

    Ok(ExitCode::from(code))
}

fn print_status(status: &UnitStatus) {
    println!("{status}");
}

async fn reconcile(settings: &Settings, is_leader: bool) -> u8 {
    if !is_leader {
        let status = UnitStatus::Waiting(WAITING_FOR_LEADER.to_string());
        print_status(&status);
        return status.exit_code();
    }

    let api = match KubeServiceApi::try_default(settings.app_name.as_str()).await {
        Ok(api) => api,
        Err(e) => {
            let status = blocked_for(&e);
            print_status(&status);
            return status.exit_code();
        }
    };
    let namespace = settings.namespace_or(api.default_namespace()).to_string();
    let reconciler = Reconciler::new(api);

    let status = lifecycle::on_reconcile(
        &reconciler,
        &settings.app_name,
        &namespace,
        &settings.raw,
        is_leader,
        print_status,
    )
    .await;

    print_status(&status);
    status.exit_code()
}

async fn delete(settings: &Settings, is_leader: bool) -> u8 {
    if !is_leader {
        debug!("Not leader, nothing to remove");
        return EXIT_SUCCESS;
    }

    let api = match KubeServiceApi::try_default(settings.app_name.as_str()).await {
        Ok(api) => api,
        Err(e) => {
            error!(error = %e, "Failed to delete service");
            eprintln!("failed to delete service: {e}");
            return EXIT_BLOCKED;
        }
    };
    let namespace = settings.namespace_or(api.default_namespace()).to_string();
    let reconciler = Reconciler::new(api);

    match lifecycle::on_remove(&reconciler, &settings.app_name, &namespace, is_leader).await {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            eprintln!("failed to delete service: {e}");
            EXIT_BLOCKED
        }
    }
}

fn render(settings: &Settings) -> Result<u8> {
    let namespace = settings.namespace_or(FALLBACK_NAMESPACE);

    let config = parse_config(&settings.raw).and_then(|parsed| {
        ServiceConfig::new(
            &settings.app_name,
            namespace,
            parsed.selector,
            parsed.target_port.into(),
            parsed.lb_port.into(),
            parsed.annotations,
            parsed.fixed_ip.as_deref(),
        )
    });

    match config {
        Ok(config) => {
            print!("{}", serde_yaml::to_string(&desired_service(&config))?);
            Ok(EXIT_SUCCESS)
        }
        Err(e) => {
            print_status(&UnitStatus::Blocked(e.to_string()));
            Ok(EXIT_BLOCKED)
        }
    }
}

async fn status(settings: &Settings) -> Result<u8> {
    let api = KubeServiceApi::try_default(settings.app_name.as_str())
        .await
        .context("Failed to create Kubernetes client")?;
    let namespace = settings.namespace_or(api.default_namespace()).to_string();
    let reconciler = Reconciler::new(api);

    match reconciler
        .current(&settings.app_name, &namespace)
        .await
        .context("Failed to read Service")?
    {
        Some(service) => {
            print!("{}", serde_yaml::to_string(&service)?);
        }
        None => {
            info!(namespace = %namespace, "Service not present");
            println!(
                "Service {}/{} not found",
                namespace,
                service_name(&settings.app_name)
            );
        }
    }
    Ok(EXIT_SUCCESS)
}
