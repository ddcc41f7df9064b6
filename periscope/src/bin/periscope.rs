use std::{
    env,
    net::SocketAddr,
    path::{Path, PathBuf},
};

use clap::{ArgGroup, Args, Parser, Subcommand};
use metrics_exporter_prometheus::PrometheusBuilder;
use periscope::{
    capture::{self, CaptureWriter},
    client::{self, HttpTransport},
    config::{self, Config},
    scrape::Scraper,
};
use tokio::{
    runtime::Builder,
    signal,
    time::{self, MissedTickBehavior},
};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, util::SubscriberInitExt};

#[derive(thiserror::Error, Debug)]
enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("Invalid periscope config: {0}")]
    Config(#[from] config::Error),
    #[error("Failed to build the Splunk client: {0}")]
    Client(#[from] client::Error),
    #[error("Failed to open capture file: {0}")]
    Capture(#[from] capture::Error),
    #[error("Parsing Prometheus address failed: {0}")]
    PrometheusAddr(#[from] std::net::AddrParseError),
    #[error("Failed to install Prometheus exporter: {0}")]
    Prometheus(#[from] metrics_exporter_prometheus::BuildError),
}

fn default_config_path() -> String {
    "/etc/periscope/periscope.yaml".to_string()
}

#[derive(Parser)]
#[clap(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape on the configured interval until interrupted
    Run(RunCommand),
    /// Validate configuration file and exit
    ConfigCheck(ConfigCheckCommand),
}

#[derive(Args)]
#[clap(group(
    ArgGroup::new("output")
        .required(true)
        .args(&["capture_path", "prometheus_addr"]),
))]
struct RunCommand {
    /// path on disk to the configuration file
    #[clap(long, default_value_t = default_config_path())]
    config_path: String,
    /// path on disk to write captures, exclusive of prometheus-addr
    #[clap(long)]
    capture_path: Option<PathBuf>,
    /// address to bind prometheus exporter to, exclusive of capture-path
    #[clap(long)]
    prometheus_addr: Option<String>,
}

#[derive(Args)]
struct ConfigCheckCommand {
    /// path on disk to the configuration file
    #[clap(long, default_value_t = default_config_path())]
    config_path: String,
}

enum Output {
    Capture(PathBuf),
    Prometheus(SocketAddr),
}

impl RunCommand {
    fn output(&self) -> Result<Output, Error> {
        match (&self.capture_path, &self.prometheus_addr) {
            (Some(path), _) => Ok(Output::Capture(path.clone())),
            (None, Some(addr)) => Ok(Output::Prometheus(addr.parse()?)),
            (None, None) => unreachable!("clap ensures that exactly one output option is selected"),
        }
    }
}

fn load_config(config_path: &str) -> Result<Config, Error> {
    if let Ok(env_var_value) = env::var("PERISCOPE_CONFIG") {
        debug!("Using config from env var 'PERISCOPE_CONFIG'");
        Ok(Config::from_yaml(&env_var_value)?)
    } else {
        debug!("Attempting to open configuration file at: {config_path}");
        Config::from_path(Path::new(config_path)).map_err(|err| {
            error!("Could not load config file '{config_path}': {err}");
            Error::Config(err)
        })
    }
}

fn validate_config(config_path: &str) -> Result<Config, Error> {
    match load_config(config_path) {
        Ok(config) => {
            let jobs = config.catalog().map(|c| periscope::scrape::job::standard(&c).len())?;
            info!("Configuration file is valid: {jobs} metric jobs");
            Ok(config)
        }
        Err(e) => {
            error!("Configuration validation failed: {e}");
            Err(e)
        }
    }
}

enum Sink {
    Capture(CaptureWriter),
    Prometheus,
}

async fn inner_main(config: Config, output: Output) -> Result<(), Error> {
    let (shutdown_watcher, shutdown_broadcast) = periscope_signal::signal();

    let transport = HttpTransport::new(&config)?;
    let scraper = Scraper::from_config(transport, &config)?;

    // Scrape results leave the process either as a capture file or through a
    // passive prometheus export. Only one can be active at a time.
    let mut sink = match output {
        Output::Capture(path) => {
            let writer = CaptureWriter::new(path).await?;
            info!("Recording to capture file {}", writer.path().display());
            Sink::Capture(writer)
        }
        Output::Prometheus(addr) => {
            PrometheusBuilder::new().with_http_listener(addr).install()?;
            info!("Serving prometheus exposition on {addr}");
            Sink::Prometheus
        }
    };

    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => info!("received ctrl-c"),
            Err(err) => error!("Could not listen for ctrl-c: {err}"),
        }
        shutdown_broadcast.signal();
    });

    let mut shutdown = shutdown_watcher.clone();
    let mut interval = time::interval(config.collection_interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = interval.tick() => {},
            () = shutdown.recv() => {
                info!("shutdown signal received.");
                break;
            }
        }

        let (batch, result) = scraper.scrape(&shutdown_watcher).await;
        if let Err(err) = result {
            warn!("Scrape cycle completed with errors: {err}");
        }
        match &mut sink {
            Sink::Capture(writer) => {
                if let Err(err) = writer.record(&batch) {
                    warn!("failed to record captures: {err}");
                }
            }
            Sink::Prometheus => batch.publish(),
        }
    }
    Ok(())
}

fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_ansi(false)
        .finish()
        .init();

    let version = env!("CARGO_PKG_VERSION");
    info!("Starting periscope {version}.");

    let run = match Cli::parse().command {
        Commands::Run(run) => run,
        Commands::ConfigCheck(check) => match validate_config(&check.config_path) {
            Ok(_) => std::process::exit(0),
            Err(_) => std::process::exit(1),
        },
    };

    let output = run.output()?;
    let config = load_config(&run.config_path)?;

    let runtime = Builder::new_multi_thread()
        .enable_io()
        .enable_time()
        .build()?;
    let res = runtime.block_on(inner_main(config, output));
    info!("Bye. :)");
    res
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_requires_one_output() {
        assert!(Cli::try_parse_from(["periscope", "run"]).is_err());
        assert!(
            Cli::try_parse_from([
                "periscope",
                "run",
                "--capture-path=/tmp/capture.json",
                "--prometheus-addr=127.0.0.1:9000",
            ])
            .is_err()
        );

        let cli = Cli::try_parse_from(["periscope", "run", "--prometheus-addr=127.0.0.1:9000"])
            .expect("valid arguments rejected");
        let Commands::Run(run) = cli.command else {
            panic!("wrong subcommand");
        };
        assert_eq!(run.config_path, "/etc/periscope/periscope.yaml");
        assert!(matches!(run.output(), Ok(Output::Prometheus(_))));
    }

    #[test]
    fn bad_prometheus_addr_is_rejected() {
        let cli = Cli::try_parse_from(["periscope", "run", "--prometheus-addr=nowhere"])
            .expect("arguments rejected");
        let Commands::Run(run) = cli.command else {
            panic!("wrong subcommand");
        };
        assert!(matches!(run.output(), Err(Error::PrometheusAddr(_))));
    }
}
