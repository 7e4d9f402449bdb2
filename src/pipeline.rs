//! Fan-out/fan-in download of metrics into a single archive.
//!
//! One producer feeds work items into a bounded queue, a fixed pool of workers downloads each
//! metric from its owners, and the calling thread serializes results into the sink as they
//! arrive. Fetch failures are collected per worker and returned in the [`TarReport`] once
//! every item has been attempted.

use std::thread;
use crossbeam_channel::{Receiver, Sender};
use rayon::prelude::*;
use thiserror::Error;
use tracing::*;
use crate::archive::{ArchiveError, MetricSink};
use crate::fetch::{FetchError, MetricData, MetricSource};
use crate::ring::HashRing;

pub const QUEUE_CAPACITY: usize = 25;

#[derive(Error, Debug)]
pub enum TarError {
    #[error("cannot place metrics on an empty ring")]
    EmptyRing,

    #[error("failed to build archive")]
    ArchiveError(#[from] ArchiveError),

    #[error("{failed} of {attempted} metrics could not be fetched")]
    Incomplete { failed: usize, attempted: usize },
}

/// A metric and the servers to try for it, primary owner first.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricWork {
    pub name: String,
    pub servers: Vec<String>,
}

#[derive(Debug)]
pub struct FetchFailure {
    pub name: String,
    pub attempts: Vec<(String, FetchError)>,
}

#[derive(Debug, Default)]
pub struct TarReport {
    pub attempted: usize,
    pub written: usize,
    pub failures: Vec<FetchFailure>,
}

impl TarReport {
    pub fn is_complete(&self) -> bool { self.failures.is_empty() }

    pub fn into_result(self) -> Result<TarReport, TarError> {
        if self.is_complete() {
            Ok(self)
        } else {
            Err(TarError::Incomplete { failed: self.failures.len(), attempted: self.attempted })
        }
    }
}

/// Resolves the owners of every metric once, before any download starts. Names are sorted
/// and deduplicated so archives come out in a stable order. With `fallback`, each item lists
/// the whole replica set; otherwise only the primary owner.
#[tracing::instrument(level = "debug", skip(ring, metrics))]
pub fn plan(ring: &HashRing, metrics: &[String], fallback: bool) -> Result<Vec<MetricWork>, TarError> {
    if ring.is_empty() {
        return Err(TarError::EmptyRing);
    }

    let mut names = metrics.to_vec();
    names.sort();
    names.dedup();

    let work = names.into_par_iter()
        .map(|name| {
            let owners = if fallback { ring.get_nodes(&name) } else { vec![ring.get_node(&name)] };

            let mut servers: Vec<String> = Vec::with_capacity(owners.len());
            for owner in owners {
                if !servers.iter().any(|s| s == owner.server()) {
                    servers.push(owner.server().to_string());
                }
            }

            MetricWork { name, servers }
        })
        .collect();

    Ok(work)
}

/// Downloads every work item with `workers` threads and writes the results into `sink`.
///
/// Individual fetch failures do not stop the batch; they are returned in the report. An
/// archive failure stops the pipeline and is returned as an error.
#[tracing::instrument(level = "debug", skip(work, source, sink))]
pub fn run<S, K>(
    work: Vec<MetricWork>,
    source: &S,
    mut sink: K,
    workers: usize,
) -> Result<(K::Output, TarReport), TarError>
where
    S: MetricSource + Sync,
    K: MetricSink,
{
    let attempted = work.len();
    let workers = workers.max(1);
    info!(total = attempted, workers, "metrics selected for tar");

    let (work_tx, work_rx) = crossbeam_channel::bounded::<MetricWork>(QUEUE_CAPACITY);
    let (data_tx, data_rx) = crossbeam_channel::bounded::<MetricData>(QUEUE_CAPACITY);

    let (written, failures) = thread::scope(|scope| {
        scope.spawn(move || feed(work, work_tx));

        let handles: Vec<_> = (0..workers)
            .map(|id| {
                let work_rx = work_rx.clone();
                let data_tx = data_tx.clone();
                scope.spawn(move || fetch_worker(id, source, work_rx, data_tx))
            })
            .collect();

        // output closes once every worker has dropped its sender
        drop(work_rx);
        drop(data_tx);

        let written = serialize(data_rx, &mut sink);

        let failures: Vec<FetchFailure> = handles.into_iter()
            .flat_map(|h| h.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic)))
            .collect();

        (written, failures)
    });

    let written = written?;
    let output = sink.finish()?;

    if !failures.is_empty() {
        warn!(failed = failures.len(), attempted, "errors building tar file are present");
    }

    Ok((output, TarReport { attempted, written, failures }))
}

fn feed(work: Vec<MetricWork>, work_tx: Sender<MetricWork>) {
    for item in work {
        if work_tx.send(item).is_err() {
            debug!("workers stopped; abandoning remaining work");
            break;
        }
    }
}

fn fetch_worker<S: MetricSource>(
    id: usize,
    source: &S,
    work_rx: Receiver<MetricWork>,
    data_tx: Sender<MetricData>,
) -> Vec<FetchFailure> {
    let mut failures = Vec::new();

    for item in work_rx.iter() {
        match fetch_from_owners(source, item) {
            Ok(metric) => {
                if data_tx.send(metric).is_err() {
                    warn!(worker = id, "archive writer stopped");
                    break;
                }
            }

            Err(failure) => {
                error!(worker = id, metric = failure.name.as_str(), "failed to fetch metric from any owner");
                failures.push(failure);
            }
        }
    }

    failures
}

fn fetch_from_owners<S: MetricSource>(source: &S, item: MetricWork) -> Result<MetricData, FetchFailure> {
    let mut attempts = Vec::new();

    for server in item.servers {
        match source.fetch(server.as_str(), item.name.as_str()) {
            Ok(metric) => return Ok(metric),
            Err(err) => {
                warn!(metric = item.name.as_str(), server = server.as_str(), error = %err, "metric download failed");
                attempts.push((server, err));
            }
        }
    }

    Err(FetchFailure { name: item.name, attempts })
}

fn serialize<K: MetricSink>(data_rx: Receiver<MetricData>, sink: &mut K) -> Result<usize, ArchiveError> {
    let mut written = 0;
    for metric in data_rx.iter() {
        sink.write(&metric)?;
        written += 1;
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;
    use crate::fetch::MetricStat;
    use crate::ring::Node;

    /// In-memory metric servers. `down` servers fail every request.
    #[derive(Default)]
    struct FakeSource {
        metrics: HashMap<(String, String), Vec<u8>>,
        down: HashSet<String>,
        calls: Mutex<Vec<(String, String)>>,
    }

    impl FakeSource {
        fn with(mut self, server: &str, name: &str, data: &str) -> Self {
            self.metrics.insert((server.to_string(), name.to_string()), data.as_bytes().to_vec());
            self
        }

        fn down(mut self, server: &str) -> Self {
            self.down.insert(server.to_string());
            self
        }

        fn calls(&self) -> Vec<(String, String)> { self.calls.lock().unwrap().clone() }
    }

    impl MetricSource for FakeSource {
        fn fetch(&self, server: &str, name: &str) -> Result<MetricData, FetchError> {
            self.calls.lock().unwrap().push((server.to_string(), name.to_string()));

            if self.down.contains(server) {
                return Err(FetchError::Status(503));
            }

            self.metrics.get(&(server.to_string(), name.to_string()))
                .map(|data| MetricData {
                    stat: MetricStat {
                        name: name.to_string(),
                        size: data.len() as i64,
                        mode: 0o644,
                        mod_time: 0,
                    },
                    data: data.clone(),
                })
                .ok_or(FetchError::Status(404))
        }
    }

    /// Collects metric names in the order they were written.
    #[derive(Default)]
    struct VecSink {
        names: Vec<String>,
        fail_after: Option<usize>,
    }

    impl MetricSink for VecSink {
        type Output = Vec<String>;

        fn write(&mut self, metric: &MetricData) -> Result<(), ArchiveError> {
            if self.fail_after.map_or(false, |n| n <= self.names.len()) {
                return Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "closed").into());
            }
            self.names.push(metric.name().to_string());
            Ok(())
        }

        fn finish(self) -> Result<Vec<String>, ArchiveError> { Ok(self.names) }
    }

    fn work(name: &str, servers: &[&str]) -> MetricWork {
        MetricWork { name: name.to_string(), servers: servers.iter().map(|s| s.to_string()).collect() }
    }

    fn names(n: usize) -> Vec<String> { (0..n).map(|i| format!("metric.{:03}", i)).collect() }

    fn cluster() -> HashRing {
        let mut ring = HashRing::new();
        ring.add_node(Node::new("a", ""));
        ring.add_node(Node::new("a", "x"));
        ring.add_node(Node::new("b", ""));
        ring
    }

    #[test]
    fn test_plan_primary_owner() {
        let ring = cluster();
        let metrics = vec!["foo.b".to_string(), "foo.a".to_string(), "foo.b".to_string()];
        let actual = plan(&ring, &metrics, false).unwrap();

        assert_eq!(
            actual,
            vec![
                work("foo.a", &[ring.get_node("foo.a").server()]),
                work("foo.b", &[ring.get_node("foo.b").server()]),
            ]
        );
    }

    #[test]
    fn test_plan_fallback_lists_distinct_servers() {
        let ring = cluster();
        let actual = plan(&ring, &names(50), true).unwrap();
        assert_eq!(actual.len(), 50);

        for item in actual {
            assert_eq!(item.servers.len(), 2, "servers for {}: {:?}", item.name, item.servers);
            assert_eq!(item.servers[0], ring.get_node(&item.name).server());
            assert!(item.servers.contains(&"a".to_string()));
            assert!(item.servers.contains(&"b".to_string()));
        }
    }

    #[test]
    fn test_plan_empty_ring() {
        let ring = HashRing::new();
        assert!(matches!(plan(&ring, &names(1), false), Err(TarError::EmptyRing)));
    }

    #[test]
    fn test_run_single_worker_preserves_order() {
        let mut source = FakeSource::default();
        for name in names(60) {
            source = source.with("a", &name, "data");
        }

        let items: Vec<MetricWork> = names(60).iter().map(|n| work(n, &["a"])).collect();
        let (written, report) = run(items, &source, VecSink::default(), 1).unwrap();

        assert_eq!(written, names(60));
        assert_eq!(report.attempted, 60);
        assert_eq!(report.written, 60);
        assert!(report.is_complete());
    }

    #[test]
    fn test_run_many_workers_writes_everything() {
        let mut source = FakeSource::default();
        for name in names(200) {
            source = source.with("a", &name, "data");
        }

        let items: Vec<MetricWork> = names(200).iter().map(|n| work(n, &["a"])).collect();
        let (mut written, report) = run(items, &source, VecSink::default(), 8).unwrap();

        written.sort();
        assert_eq!(written, names(200));
        assert_eq!(report.written, 200);
        assert!(report.into_result().is_ok());
    }

    #[test]
    fn test_run_partial_failure_completes_siblings() {
        let source = FakeSource::default()
            .with("a", "good.one", "1")
            .with("b", "good.two", "2")
            .down("c");

        let items = vec![
            work("good.one", &["a"]),
            work("lost", &["c"]),
            work("good.two", &["b"]),
            work("missing", &["a"]),
        ];

        let (mut written, report) = run(items, &source, VecSink::default(), 3).unwrap();
        written.sort();
        assert_eq!(written, vec!["good.one".to_string(), "good.two".to_string()]);
        assert_eq!(report.attempted, 4);
        assert_eq!(report.written, 2);

        let mut failed: Vec<&str> = report.failures.iter().map(|f| f.name.as_str()).collect();
        failed.sort();
        assert_eq!(failed, vec!["lost", "missing"]);

        match report.into_result() {
            Err(TarError::Incomplete { failed, attempted }) => {
                assert_eq!(failed, 2);
                assert_eq!(attempted, 4);
            }
            other => panic!("expected Incomplete but got {:?}", other),
        }
    }

    #[test]
    fn test_run_falls_back_to_replica_owner() {
        let source = FakeSource::default().down("a").with("b", "foo.bar", "payload");

        let (written, report) = run(vec![work("foo.bar", &["a", "b"])], &source, VecSink::default(), 2).unwrap();
        assert_eq!(written, vec!["foo.bar".to_string()]);
        assert!(report.is_complete());
        assert_eq!(
            source.calls(),
            vec![("a".to_string(), "foo.bar".to_string()), ("b".to_string(), "foo.bar".to_string())]
        );
    }

    #[test]
    fn test_run_records_every_attempt() {
        let source = FakeSource::default().down("a").down("b");
        let (_, report) = run(vec![work("foo.bar", &["a", "b"])], &source, VecSink::default(), 1).unwrap();

        assert_eq!(report.failures.len(), 1);
        let attempted: Vec<&str> = report.failures[0].attempts.iter().map(|(s, _)| s.as_str()).collect();
        assert_eq!(attempted, vec!["a", "b"]);
    }

    #[test]
    fn test_run_stops_on_archive_failure() {
        let mut source = FakeSource::default();
        for name in names(300) {
            source = source.with("a", &name, "data");
        }

        let items: Vec<MetricWork> = names(300).iter().map(|n| work(n, &["a"])).collect();
        let sink = VecSink { names: Vec::new(), fail_after: Some(3) };

        match run(items, &source, sink, 4) {
            Err(TarError::ArchiveError(_)) => (),
            other => panic!("expected ArchiveError but got {:?}", other.map(|(w, r)| (w, r.written))),
        }

        // the pipeline gave up rather than draining every item
        assert!(source.calls().len() < 300);
    }

    #[test]
    fn test_run_empty_work() {
        let source = FakeSource::default();
        let (written, report) = run(Vec::new(), &source, VecSink::default(), 4).unwrap();
        assert!(written.is_empty());
        assert_eq!(report.attempted, 0);
        assert!(report.is_complete());
    }
}
