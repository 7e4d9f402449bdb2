use std::io::Write;
use thiserror::Error;
use tracing::*;
use crate::fetch::MetricData;

const METRIC_SUFFIX: &str = ".wsp";

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("failed to write archive")]
    IoError(#[from] std::io::Error),
}

/// Where `a.b.c` is stored inside an archive: `a/b/c.wsp`.
pub fn metric_to_path(metric: &str) -> String {
    let path = format!("{}{}", metric.replace('.', "/"), METRIC_SUFFIX);
    path.trim_start_matches('/').to_string()
}

/// Inverse of [`metric_to_path`], for consumers reading an exported archive back into
/// metric names.
pub fn path_to_metric(path: &str) -> String {
    let path = path.trim_start_matches('/');
    let path = path.strip_suffix(METRIC_SUFFIX).unwrap_or(path);
    path.replace('/', ".")
}

/// The single writer of a pipeline's output.
pub trait MetricSink {
    type Output;

    fn write(&mut self, metric: &MetricData) -> Result<(), ArchiveError>;

    fn finish(self) -> Result<Self::Output, ArchiveError>;
}

/// Writes each metric as one tar entry.
pub struct TarSink<W: Write> {
    builder: tar::Builder<W>,
}

impl<W: Write> TarSink<W> {
    pub fn new(out: W) -> Self { Self { builder: tar::Builder::new(out) } }
}

impl<W: Write> std::fmt::Debug for TarSink<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { write!(f, "TarSink") }
}

impl<W: Write> MetricSink for TarSink<W> {
    type Output = W;

    fn write(&mut self, metric: &MetricData) -> Result<(), ArchiveError> {
        let path = metric_to_path(metric.name());
        info!(metric = metric.name(), path = path.as_str(), "writing metric");

        let size = metric.data.len() as u64;
        if metric.stat.size != size as i64 {
            warn!(
                metric = metric.name(), stat_size = metric.stat.size, size,
                "metric size differs from reported stat; archiving received bytes"
            );
        }

        // paths past the 100 byte name field go out as GNU long-name entries
        let mut header = tar::Header::new_gnu();
        header.set_size(size);
        header.set_mode(metric.stat.mode as u32);
        header.set_mtime(metric.stat.mod_time.max(0) as u64);

        self.builder.append_data(&mut header, &path, metric.data.as_slice())?;
        Ok(())
    }

    fn finish(self) -> Result<W, ArchiveError> {
        Ok(self.builder.into_inner()?)
    }
}
