//! Load a document in one call.
//!
//! A [Loader] resolves the [Site], discovers its leaves, loads them with the configured
//! [Strategy], reassembles the payloads and (optionally) decodes the result to text. Every
//! stage is reported to the configured [Monitor] and any terminal [Error] is reported to it
//! once before being returned.

use crate::{
    assembler::{assemble, Assembly},
    encoding::{self, Decoded},
    metrics,
    retry::Profile,
    scanner::Scanner,
    scheduler::{concurrent, overlapped, phased, Strategy},
    site,
    state::LoadState,
    Directory, Error, Monitor, Phase, Reader, Site,
};
use bytes::Bytes;
use commonware_runtime::{Clock, Metrics, Spawner};
use rand::Rng;
use tracing::{debug, info, warn};

/// Configuration for a [Loader].
#[derive(Clone, Debug)]
pub struct Config<M: Monitor> {
    /// How leaves are scheduled for loading.
    pub strategy: Strategy,

    /// Retry profile for resolving the site.
    pub resolve: Profile,

    /// Retry profile for reading internal nodes (and resolving flat chunks).
    pub scan: Profile,

    /// Whether to decode the document to text (otherwise only the raw buffer is returned).
    pub decode: bool,

    /// Receiver of progress and failures.
    pub monitor: M,
}

impl Default for Config<()> {
    fn default() -> Self {
        Self {
            strategy: Strategy::default(),
            resolve: Profile::RESILIENT,
            scan: Profile::RESILIENT,
            decode: true,
            monitor: (),
        }
    }
}

impl<M: Monitor> Config<M> {
    /// Replaces the monitor.
    pub fn with_monitor<N: Monitor>(self, monitor: N) -> Config<N> {
        Config {
            strategy: self.strategy,
            resolve: self.resolve,
            scan: self.scan,
            decode: self.decode,
            monitor,
        }
    }
}

/// A loaded document.
#[derive(Clone, Debug)]
pub struct Document {
    /// The site the document was loaded from.
    pub site: Site,

    /// The reassembled bytes.
    pub assembly: Assembly,

    /// The decoded text, if decoding was requested.
    pub decoded: Option<Decoded>,
}

impl Document {
    /// The reassembled bytes.
    pub fn bytes(&self) -> &Bytes {
        self.assembly.buffer()
    }

    /// The decoded text, if decoding was requested.
    pub fn text(&self) -> Option<&str> {
        self.decoded.as_ref().map(|decoded| decoded.text.as_str())
    }

    /// Indices of chunks left out of the document.
    pub fn missing(&self) -> &[u64] {
        self.assembly.missing()
    }

    /// Returns whether every chunk made it into the document.
    pub fn is_complete(&self) -> bool {
        self.assembly.is_complete()
    }
}

/// Loads a single document.
pub struct Loader<E, D, R, M>
where
    E: Clock + Spawner + Metrics + Rng,
    D: Directory,
    R: Reader,
    M: Monitor,
{
    context: E,
    directory: D,
    reader: R,

    strategy: Strategy,
    resolve: Profile,
    scan: Profile,
    decode: bool,
    monitor: M,

    metrics: metrics::Metrics,
}

impl<E, D, R, M> Loader<E, D, R, M>
where
    E: Clock + Spawner + Metrics + Rng,
    D: Directory,
    R: Reader,
    M: Monitor,
{
    /// Creates a loader, registering its metrics with `context`.
    pub fn new(context: E, directory: D, reader: R, cfg: Config<M>) -> Self {
        let metrics = metrics::Metrics::init(&context);
        Self {
            context,
            directory,
            reader,
            strategy: cfg.strategy,
            resolve: cfg.resolve,
            scan: cfg.scan,
            decode: cfg.decode,
            monitor: cfg.monitor,
            metrics,
        }
    }

    /// Loads the document.
    pub async fn load(mut self) -> Result<Document, Error> {
        let result = self.run().await;
        if let Err(err) = &result {
            warn!(?err, "load failed");
            self.monitor.failed(err);
        }
        result
    }

    async fn run(&mut self) -> Result<Document, Error> {
        let mut state = LoadState::with_metrics(self.metrics.clone());
        self.monitor.progress(state.progress(Phase::Resolving));
        let site = site::resolve(&mut self.context, &self.directory, &self.resolve).await?;

        // Discover and load
        match self.strategy.clone() {
            Strategy::Phased(cfg) => {
                self.discover(&site, &mut state).await?;
                phased::load(
                    &mut self.context,
                    &self.reader,
                    &cfg,
                    &mut state,
                    &mut self.monitor,
                )
                .await?;
            }
            Strategy::Concurrent(cfg) => {
                self.discover(&site, &mut state).await?;
                concurrent::load(
                    &self.context,
                    &self.reader,
                    &cfg,
                    &mut state,
                    &mut self.monitor,
                )
                .await?;
            }
            Strategy::Overlapped(cfg) => {
                overlapped::load(
                    self.context.with_label("overlapped"),
                    site,
                    self.directory.clone(),
                    self.reader.clone(),
                    self.scan,
                    &cfg,
                    &mut state,
                    &mut self.monitor,
                )
                .await?;
            }
        }

        // Assemble
        self.monitor.progress(state.progress(Phase::Assembling));
        let total = state.scanned();
        let assembly = assemble(state.take_payloads(), total);
        if !assembly.is_complete() {
            warn!(
                missing = assembly.missing().len(),
                total,
                "assembled incomplete document"
            );
        }
        if let Site::Tree(descriptor) = site {
            if assembly.len() as u64 != descriptor.total_size {
                debug!(
                    expected = descriptor.total_size,
                    actual = assembly.len(),
                    "document size differs from descriptor"
                );
            }
        }

        // Decode
        let decoded = if self.decode {
            self.monitor.progress(state.progress(Phase::Decoding));
            let decoded = encoding::decode(assembly.buffer());
            if decoded.malformed {
                warn!(
                    encoding = decoded.encoding.name(),
                    "replaced malformed sequences"
                );
            }
            Some(decoded)
        } else {
            None
        };

        info!(
            size = assembly.len(),
            chunks = total,
            missing = assembly.missing().len(),
            "loaded document"
        );
        self.monitor.progress(state.progress(Phase::Complete));
        Ok(Document {
            site,
            assembly,
            decoded,
        })
    }

    /// Discovers every leaf of `site` into `state`.
    async fn discover(&mut self, site: &Site, state: &mut LoadState) -> Result<(), Error> {
        self.monitor.progress(state.progress(Phase::Scanning));
        let monitor = &mut self.monitor;
        let mut scanner = Scanner::new(self.context.clone(), self.reader.clone(), self.scan);
        let count = scanner
            .discover(site, &self.directory, |leaf| {
                state.discover(leaf);
                monitor.progress(state.progress(Phase::Scanning));
            })
            .await?;
        debug!(count, "scan complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        mocks::{Failure, Recorder, Remote},
        scheduler::Policy,
        Address, Descriptor, Progress,
    };
    use commonware_macros::test_traced;
    use commonware_runtime::{deterministic, Runner};
    use encoding_rs::{EUC_KR, UTF_8};
    use std::time::Duration;

    const KOREAN: &str = "<p>한국어 문서</p>";

    fn strategies() -> Vec<Strategy> {
        vec![
            Strategy::Phased(phased::Config::default()),
            Strategy::Overlapped(overlapped::Config::new(Duration::from_secs(60))),
            Strategy::Concurrent(concurrent::Config::default()),
        ]
    }

    fn payloads(n: usize) -> Vec<Bytes> {
        (0..n).map(|i| Bytes::from(format!("[{i}]"))).collect()
    }

    #[test_traced]
    fn test_load_every_strategy() {
        for strategy in strategies() {
            let executor = deterministic::Runner::default();
            executor.start(|context| async move {
                let remote = Remote::new();
                let expected = payloads(30);
                remote.publish(&expected, 4);
                let recorder = Recorder::new();
                let cfg = Config {
                    strategy,
                    ..Config::default()
                }
                .with_monitor(recorder.clone());

                let loader = Loader::new(context, remote.clone(), remote, cfg);
                let document = loader.load().await.unwrap();
                assert!(document.is_complete());
                assert_eq!(document.bytes(), &Bytes::from(expected.concat()));
                let text: String = (0..30).map(|i| format!("[{i}]")).collect();
                assert_eq!(document.text(), Some(text.as_str()));

                // Every stage was reported, ending with the totals
                let phases: Vec<Phase> = recorder.updates().iter().map(|p| p.phase).collect();
                assert_eq!(phases.first(), Some(&Phase::Resolving));
                assert!(phases.contains(&Phase::Scanning));
                assert!(phases.contains(&Phase::Loading));
                assert!(phases.contains(&Phase::Assembling));
                assert!(phases.contains(&Phase::Decoding));
                assert_eq!(
                    recorder.last(),
                    Some(Progress {
                        phase: Phase::Complete,
                        scanned: 30,
                        loaded: 30,
                        failed: 0,
                    })
                );
                assert!(recorder.failures().is_empty());
            });
        }
    }

    #[test_traced]
    fn test_load_regional_document() {
        let executor = deterministic::Runner::default();
        executor.start(|context| async move {
            let remote = Remote::new();
            let (body, _, _) = EUC_KR.encode(KOREAN);
            let mut document = b"<html><head><meta charset=\"EUC-KR\"></head>".to_vec();
            document.extend_from_slice(&body);
            let chunks: Vec<Bytes> = document
                .chunks(7)
                .map(Bytes::copy_from_slice)
                .collect();
            remote.publish(&chunks, 3);

            let loader = Loader::new(context, remote.clone(), remote, Config::default());
            let document = loader.load().await.unwrap();
            let decoded = document.decoded.unwrap();
            assert_eq!(decoded.encoding, EUC_KR);
            assert!(decoded.text.ends_with(KOREAN));
            assert!(!decoded.malformed);
        });
    }

    #[test_traced]
    fn test_load_raw() {
        let executor = deterministic::Runner::default();
        executor.start(|context| async move {
            let remote = Remote::new();
            remote.publish(&[&b"\xff\xfe"[..], &b"\x00"[..]], 2);
            let cfg = Config {
                decode: false,
                ..Config::default()
            };

            let loader = Loader::new(context, remote.clone(), remote, cfg);
            let document = loader.load().await.unwrap();
            assert_eq!(document.bytes(), &Bytes::from_static(b"\xff\xfe\x00"));
            assert_eq!(document.text(), None);
        });
    }

    #[test_traced]
    fn test_load_flat() {
        let executor = deterministic::Runner::default();
        executor.start(|context| async move {
            let remote = Remote::new();
            let addresses: Vec<Address> = ["alpha ", "beta ", "gamma"]
                .into_iter()
                .map(|payload| remote.leaf(payload))
                .collect();
            remote.publish_flat(addresses);

            let loader = Loader::new(context, remote.clone(), remote, Config::default());
            let document = loader.load().await.unwrap();
            assert_eq!(document.site, Site::Flat { count: 3 });
            assert_eq!(document.text(), Some("alpha beta gamma"));
            assert_eq!(document.decoded.unwrap().encoding, UTF_8);
        });
    }

    #[test_traced]
    fn test_load_best_effort() {
        let executor = deterministic::Runner::default();
        executor.start(|context| async move {
            let remote = Remote::new();
            let leaves: Vec<Address> = payloads(10).into_iter().map(|p| remote.leaf(p)).collect();
            let root = remote.node(&leaves);
            remote.set_site(Site::Tree(Descriptor {
                root,
                depth: 1,
                total_size: 30,
            }));
            remote.fail(leaves[2], Failure::Always);

            let loader = Loader::new(
                context.with_label("loader"),
                remote.clone(),
                remote,
                Config::default(),
            );
            let document = loader.load().await.unwrap();
            assert_eq!(document.missing(), &[2]);
            assert_eq!(document.bytes().len(), 27);
            assert_eq!(document.assembly.locate(6), Some(3));

            let metrics = context.encode();
            assert!(metrics.contains("loader_scanned_total 10"));
            assert!(metrics.contains("loader_loaded_total 9"));
            assert!(metrics.contains("loader_failed 1"));
        });
    }

    #[test_traced]
    fn test_load_strict() {
        let executor = deterministic::Runner::default();
        executor.start(|context| async move {
            let remote = Remote::new();
            let leaves: Vec<Address> = payloads(4).into_iter().map(|p| remote.leaf(p)).collect();
            remote.fail(leaves[0], Failure::Always);
            remote.publish_flat(leaves);
            let recorder = Recorder::new();
            let cfg = Config {
                strategy: Strategy::Concurrent(concurrent::Config {
                    policy: Policy::Strict,
                    ..concurrent::Config::default()
                }),
                ..Config::default()
            }
            .with_monitor(recorder.clone());

            let loader = Loader::new(context, remote.clone(), remote, cfg);
            let expected = Error::Incomplete {
                missing: 1,
                total: 4,
            };
            assert_eq!(loader.load().await.unwrap_err(), expected);
            assert_eq!(recorder.failures(), vec![expected]);
        });
    }

    #[test_traced]
    fn test_load_site_unavailable() {
        let executor = deterministic::Runner::default();
        executor.start(|context| async move {
            let remote = Remote::new();
            remote.publish(&payloads(3), 2);
            remote.fail_site(u32::MAX);
            let recorder = Recorder::new();
            let cfg = Config::default().with_monitor(recorder.clone());

            let loader = Loader::new(context, remote.clone(), remote.clone(), cfg);
            assert_eq!(loader.load().await.unwrap_err(), Error::SiteUnavailable);
            assert_eq!(remote.site_reads(), Profile::RESILIENT.max_attempts);
            assert_eq!(recorder.failures(), vec![Error::SiteUnavailable]);
            assert_eq!(
                recorder.updates().last().map(|p| p.phase),
                Some(Phase::Resolving)
            );
        });
    }

    #[test_traced]
    fn test_load_malformed() {
        let executor = deterministic::Runner::default();
        executor.start(|context| async move {
            let remote = Remote::new();
            let root = remote.leaf(vec![1u8; 45]);
            remote.set_site(Site::Tree(Descriptor {
                root,
                depth: 2,
                total_size: 0,
            }));

            let loader = Loader::new(context, remote.clone(), remote, Config::default());
            assert_eq!(
                loader.load().await.unwrap_err(),
                Error::MalformedNode {
                    address: root,
                    len: 45
                }
            );
        });
    }

    #[test_traced]
    fn test_load_timeout() {
        let executor = deterministic::Runner::default();
        executor.start(|context| async move {
            let remote = Remote::new();
            let descriptor = remote.publish(&payloads(6), 2);
            let recorder = Recorder::new();

            // Break a single leaf
            let leaf = Scanner::new(context.clone(), remote.clone(), Profile::LIGHT)
                .scan(descriptor.root, descriptor.depth)
                .await
                .unwrap()[4]
                .address;
            remote.fail(leaf, Failure::Always);
            let cfg = Config {
                strategy: Strategy::Overlapped(overlapped::Config::new(Duration::from_secs(30))),
                ..Config::default()
            }
            .with_monitor(recorder.clone());

            let loader = Loader::new(context, remote.clone(), remote, cfg);
            let expected = Error::Timeout {
                loaded: 5,
                total: 6,
            };
            assert_eq!(loader.load().await.unwrap_err(), expected);
            assert_eq!(recorder.failures(), vec![expected]);
        });
    }
}
