//! Consistent hashing placement of Graphite metrics across a cluster, and the tooling that
//! downloads metrics from their owners into a tar archive.

pub mod archive;
pub mod config;
pub mod fetch;
pub mod pipeline;
pub mod ring;

pub use ring::{HashRing, Node};

pub mod utils {
    use tracing_subscriber::{fmt, EnvFilter};

    /// Installs the global tracing subscriber, filtered by `RUST_LOG`. Events go to stderr so
    /// stdout stays free for archive output.
    pub fn setup_logger() -> Result<(), tracing::subscriber::SetGlobalDefaultError> {
        let subscriber = fmt::Subscriber::builder()
            .with_env_filter(EnvFilter::from_default_env())
            .with_writer(std::io::stderr)
            .finish();

        tracing::subscriber::set_global_default(subscriber)
    }
}
