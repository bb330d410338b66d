use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{ArgGroup, Parser};
use lifeline::{
    Bus, Config, ConnectionError, Election, Event, EventKind, InstanceCoordinator, JitterPolicy,
    LogWriter, Registration, Request, Response, RestartPolicy, RuntimeError, SessionBuilder, StateStore,
    Subscribe, WmctrlWindowManager,
};

#[derive(Parser, Debug)]
#[command(name = "lifeline")]
#[command(about = "Launch a browser, supervise it and keep the desktop shell in sync")]
#[command(version)]
#[command(group(ArgGroup::new("action").args(["activate", "status", "terminate"])))]
struct Cli {
    /// Paths or URLs to open in the child
    paths: Vec<String>,

    /// Path to the config file (defaults to <config_dir>/lifeline/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Child executable (overrides the config file)
    #[arg(short, long)]
    executable: Option<PathBuf>,

    /// Extra argument for the child; repeatable
    #[arg(long = "arg", allow_hyphen_values = true)]
    args: Vec<String>,

    /// Name of the single-instance registration
    #[arg(long)]
    service: Option<String>,

    /// Directory holding the registration lock and socket
    #[arg(long)]
    runtime_dir: Option<PathBuf>,

    /// Relaunch policy for the child
    #[arg(long, value_enum)]
    restart: Option<RestartPolicy>,

    /// Jitter applied to relaunch delays
    #[arg(long, value_enum)]
    relaunch_jitter: Option<JitterPolicy>,

    /// Jitter applied to delays between connection attempts to the primary
    #[arg(long, value_enum)]
    connect_jitter: Option<JitterPolicy>,

    /// Always launch a new child, even if one is already running
    #[arg(long)]
    no_adopt: bool,

    /// Stay alive (dock hidden) after the child exits
    #[arg(long)]
    keep_running: bool,

    /// Bring the running child's windows to the front
    #[arg(long)]
    activate: bool,

    /// Report whether the child is running
    #[arg(long)]
    status: bool,

    /// Stop the running child and its launcher
    #[arg(long)]
    terminate: bool,
}

impl Cli {
    fn request(&self) -> Request {
        if self.status {
            Request::Status
        } else if self.terminate {
            Request::Terminate
        } else if self.activate {
            Request::Activate
        } else if !self.paths.is_empty() {
            Request::Open {
                paths: self.paths.clone(),
            }
        } else {
            Request::Launch
        }
    }

    fn config(&self) -> Result<Config> {
        let mut cfg = match &self.config {
            Some(path) => Config::load(path)?,
            None => match Config::default_path().filter(|p| p.exists()) {
                Some(path) => Config::load(&path)?,
                None => Config::default(),
            },
        };

        if let Some(exe) = &self.executable {
            cfg.executable = Some(exe.clone());
        }
        cfg.args.extend(self.args.iter().cloned());
        if let Some(service) = &self.service {
            cfg.service_name = service.clone();
        }
        if let Some(dir) = &self.runtime_dir {
            cfg.runtime_dir = Some(dir.clone());
        }
        if let Some(restart) = self.restart {
            cfg.restart = restart;
        }
        if let Some(jitter) = self.relaunch_jitter {
            cfg.relaunch_backoff.jitter = jitter;
        }
        if let Some(jitter) = self.connect_jitter {
            cfg.connect_backoff.jitter = jitter;
        }
        if self.no_adopt {
            cfg.adopt_existing = false;
        }
        if self.keep_running {
            cfg.terminate_with_child = false;
        }
        Ok(cfg)
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_target(false)
        .init();

    let cfg = cli.config().context("loading configuration")?;
    let request = cli.request();

    let bus = Bus::new(cfg.bus_capacity_clamped());
    let coordinator = InstanceCoordinator::from_config(&cfg, bus.clone());
    let election = coordinator
        .try_become_primary()
        .context("single-instance election failed")?;

    match election {
        Election::Primary(registration) => {
            tracing::info!(socket = %registration.socket_path().display(), "acting as primary");
            match request {
                Request::Status => report(Response::Status {
                    running: false,
                    pid: None,
                }),
                Request::Terminate => {
                    println!("not running");
                    Ok(ExitCode::SUCCESS)
                }
                request => run_session(cfg, bus, Some(registration), request).await,
            }
        }
        Election::Secondary => {
            tracing::debug!("another launcher is primary; forwarding {}", request.name());
            match coordinator.connector(&cfg).connect_to_primary().await {
                Ok(mut conn) => {
                    let response = conn
                        .forward(&request)
                        .await
                        .context("forwarding request to primary")?;
                    report(response)
                }
                Err(ConnectionError::Exhausted { attempts, last }) => {
                    if matches!(request, Request::Status | Request::Terminate) {
                        bail!("primary unreachable after {attempts} attempts: {last}");
                    }
                    tracing::warn!(attempts, last = %last, "primary unreachable; launching independently");
                    bus.publish(
                        Event::new(EventKind::FallbackLaunch)
                            .with_attempt(attempts)
                            .with_reason(last),
                    );
                    run_session(cfg, bus, None, request).await
                }
                Err(e) => Err(e).context("connecting to primary"),
            }
        }
    }
}

async fn run_session(
    cfg: Config,
    bus: Bus,
    registration: Option<Registration>,
    request: Request,
) -> Result<ExitCode> {
    let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter::new())];
    let state = StateStore::new(cfg.state_path());

    let mut builder = SessionBuilder::new(cfg)
        .with_bus(bus)
        .with_subscribers(subs)
        .with_window_manager(Arc::new(WmctrlWindowManager::new()))
        .with_state_store(state);
    if let Some(registration) = registration {
        builder = builder.with_registration(registration);
    }
    let session = builder.build().context("building session")?;

    match session.run(Some(request)).await {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(e @ RuntimeError::GraceExceeded { .. }) => {
            tracing::error!(error = %e, label = e.as_label(), "teardown incomplete");
            Ok(ExitCode::FAILURE)
        }
        Err(e) => Err(e).context("session failed"),
    }
}

fn report(response: Response) -> Result<ExitCode> {
    match response {
        Response::Ack => Ok(ExitCode::SUCCESS),
        Response::Status {
            running: true,
            pid: Some(pid),
        } => {
            println!("running (pid {pid})");
            Ok(ExitCode::SUCCESS)
        }
        Response::Status { running, .. } => {
            println!("{}", if running { "running" } else { "not running" });
            Ok(ExitCode::SUCCESS)
        }
        Response::Error { message } => {
            eprintln!("lifeline: {message}");
            Ok(ExitCode::FAILURE)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jitter_flags_reach_config() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("config.toml");
        std::fs::write(&file, "connect_jitter = \"none\"\n").unwrap();
        let cli = Cli::try_parse_from([
            "lifeline",
            "-c",
            file.to_str().unwrap(),
            "--relaunch-jitter",
            "decorrelated",
            "--connect-jitter",
            "full",
            "--no-adopt",
        ])
        .unwrap();
        let cfg = cli.config().unwrap();
        assert_eq!(cfg.relaunch_backoff.jitter, JitterPolicy::Decorrelated);
        assert_eq!(cfg.connect_backoff.jitter, JitterPolicy::Full);
        assert!(!cfg.adopt_existing);
    }
}
