use std::io::{self, IsTerminal, Read, Write};
use anyhow::{bail, Context, Result};
use structopt::StructOpt;
use tracing::*;
use bucky_ring::{
    archive::TarSink,
    config::{Command, Configuration, Opt},
    fetch::HttpMetricSource,
    pipeline,
    utils,
    HashRing,
};

fn main() -> Result<()> {
    utils::setup_logger().context("setting default subscriber failed")?;

    let opt = Opt::from_args();
    let configuration = Configuration::load(&opt).context("loading configuration")?;
    let ring = configuration.ring();

    let span = span!(Level::INFO, "bucky-ring", nodes = ring.nodes().len());
    let _guard = span.enter();

    match &opt.command {
        Command::Locate { all, metrics } => locate(&ring, metrics, *all),
        Command::Ring => {
            println!("{}", ring);
            Ok(())
        }
        Command::Tar { metrics, .. } => tar(&configuration, &ring, metrics),
    }
}

fn locate(ring: &HashRing, metrics: &[String], all: bool) -> Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();

    for metric in metrics {
        if all {
            let owners: Vec<String> = ring.get_nodes(metric).iter().map(|n| n.to_string()).collect();
            writeln!(out, "{}: {}", metric, owners.join(" "))?;
        } else {
            writeln!(out, "{}: {}", metric, ring.get_node(metric))?;
        }
    }

    Ok(())
}

fn tar(configuration: &Configuration, ring: &HashRing, args: &[String]) -> Result<()> {
    if io::stdout().is_terminal() {
        bail!("refusing to write tar file to terminal");
    }

    let metrics = if args.len() == 1 && args[0] == "-" {
        read_metric_list(io::stdin()).context("reading JSON metric list from STDIN")?
    } else {
        args.to_vec()
    };

    let work = pipeline::plan(ring, &metrics, configuration.fallback)?;
    let source = HttpMetricSource::new(configuration.port, configuration.timeout)?;
    let sink = TarSink::new(io::BufWriter::new(io::stdout()));

    let (mut out, report) = pipeline::run(work, &source, sink, configuration.workers)?;
    out.flush().context("flushing tar archive")?;

    let report = report.into_result()?;
    info!(written = report.written, attempted = report.attempted, "tar archive complete");
    Ok(())
}

fn read_metric_list<R: Read>(reader: R) -> Result<Vec<String>> {
    let metrics: Vec<String> = serde_json::from_reader(reader)?;
    Ok(metrics)
}
