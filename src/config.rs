use std::path::{Path, PathBuf};
use std::time::Duration;
use serde::Deserialize;
use structopt::StructOpt;
use thiserror::Error;
use tracing::*;
use config::Config;
use crate::ring::{HashRing, Node, NodeError, DEFAULT_REPLICAS};

pub const DEFAULT_PORT: u16 = 4242;
pub const DEFAULT_WORKERS: usize = 5;
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
const REFERENCE_PATH: &str = "config/reference.toml";
const ENV_PREFIX: &str = "BUCKY";

#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("no cluster servers configured")]
    NoServers,

    #[error("invalid cluster server")]
    InvalidNode(#[from] NodeError),

    #[error("workers must be positive")]
    ZeroWorkers,

    #[error("replicas must be positive")]
    ZeroReplicas,

    #[error("application misconfigured")]
    ConfigSource(#[from] config::ConfigError),
}

#[derive(StructOpt, Debug)]
#[structopt(name = "bucky-ring", about = "Locate and export metrics on a consistent hashing cluster")]
pub struct Opt {
    /// application configuration
    #[structopt(long = "config", parse(from_os_str))]
    pub configuration_path: Option<PathBuf>,

    /// cluster member as `server` or `server:instance`; repeat for each member. Replaces the
    /// configured servers.
    #[structopt(short = "s", long = "server", number_of_values = 1)]
    pub servers: Vec<String>,

    /// metric server HTTP port
    #[structopt(short, long)]
    pub port: Option<u16>,

    #[structopt(subcommand)]
    pub command: Command,
}

#[derive(StructOpt, Debug, PartialEq)]
pub enum Command {
    /// Print the server owning each metric.
    Locate {
        /// print the full replica set in ring order
        #[structopt(short, long)]
        all: bool,

        #[structopt(required = true)]
        metrics: Vec<String>,
    },

    /// Print a summary of the ring.
    Ring,

    /// Write a tar archive of the given metrics to STDOUT. A lone `-` reads a JSON array of
    /// metric names from STDIN.
    Tar {
        /// downloader threads
        #[structopt(short, long)]
        workers: Option<usize>,

        #[structopt(required = true)]
        metrics: Vec<String>,
    },
}

/// `servers` may arrive as a list from a file or as a comma separated string from the
/// environment.
#[derive(Deserialize, Debug, Clone)]
#[serde(untagged)]
enum ServerList {
    Delimited(String),
    Listed(Vec<String>),
}

impl ServerList {
    fn into_vec(self) -> Vec<String> {
        match self {
            ServerList::Listed(servers) => servers,
            ServerList::Delimited(servers) => {
                servers.split(',')
                    .map(|s| s.trim())
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            }
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
struct ConfigSchema {
    pub servers: ServerList,
    pub port: u16,
    pub workers: usize,
    pub replicas: usize,
    pub timeout_secs: u64,
    pub fallback: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Configuration {
    pub servers: Vec<Node>,
    pub port: u16,
    pub workers: usize,
    pub replicas: usize,
    pub timeout: Duration,
    pub fallback: bool,
}

impl Configuration {
    /// Loads configuration from defaults, `config/reference.toml`, the `--config` file and
    /// `BUCKY_*` environment variables, then applies command line overrides.
    #[tracing::instrument]
    pub fn load(opt: &Opt) -> Result<Configuration, ConfigurationError> {
        let config = Self::sources(opt.configuration_path.as_deref())?;
        let mut schema: ConfigSchema = config.try_into()?;

        if !opt.servers.is_empty() {
            schema.servers = ServerList::Listed(opt.servers.clone());
        }

        if let Some(port) = opt.port {
            schema.port = port;
        }

        if let Command::Tar { workers: Some(workers), .. } = opt.command {
            schema.workers = workers;
        }

        Self::from_schema(schema)
    }

    /// Layers every configuration source, lowest precedence first.
    pub fn sources(config_path: Option<&Path>) -> Result<Config, ConfigurationError> {
        let mut config = Config::default();
        config.set_default("servers", Vec::<String>::new())?;
        config.set_default("port", i64::from(DEFAULT_PORT))?;
        config.set_default("workers", DEFAULT_WORKERS as i64)?;
        config.set_default("replicas", DEFAULT_REPLICAS as i64)?;
        config.set_default("timeout_secs", DEFAULT_TIMEOUT_SECS as i64)?;
        config.set_default("fallback", false)?;

        config.merge(config::File::from(Path::new(REFERENCE_PATH)).required(false))?;

        if let Some(path) = config_path {
            config.merge(config::File::from(path))?;
        }

        config.merge(config::Environment::with_prefix(ENV_PREFIX))?;
        Ok(config)
    }

    pub fn from_config(config: Config) -> Result<Configuration, ConfigurationError> {
        let schema: ConfigSchema = config.try_into()?;
        Self::from_schema(schema)
    }

    fn from_schema(schema: ConfigSchema) -> Result<Configuration, ConfigurationError> {
        info!(?schema, "bucky configuration");

        let servers = schema.servers.into_vec()
            .iter()
            .map(|s| s.parse::<Node>())
            .collect::<Result<Vec<_>, _>>()?;

        if servers.is_empty() {
            return Err(ConfigurationError::NoServers);
        }

        if schema.workers == 0 {
            return Err(ConfigurationError::ZeroWorkers);
        }

        if schema.replicas == 0 {
            return Err(ConfigurationError::ZeroReplicas);
        }

        Ok(Configuration {
            servers,
            port: schema.port,
            workers: schema.workers,
            replicas: schema.replicas,
            timeout: Duration::from_secs(schema.timeout_secs),
            fallback: schema.fallback,
        })
    }

    /// Builds the cluster ring, registering servers in configured order.
    pub fn ring(&self) -> HashRing {
        let mut ring = HashRing::with_replicas(self.replicas);
        for server in self.servers.iter() {
            ring.add_node(server.clone());
        }
        debug!(%ring, "built cluster ring");
        ring
    }
}
