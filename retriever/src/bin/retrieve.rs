//! Retrieve a document from a JSON-RPC remote.
//!
//! # Usage
//!
//! ```sh
//! cargo run --release --bin retrieve -- --endpoint http://localhost:8545 --site 0x00112233445566778899aabbccddeeff00112233
//! ```
//!
//! The document is written to stdout (or `--output`). Progress is logged to stderr.

use clap::{value_parser, Arg, ArgAction, Command};
use commonware_retriever::{
    jsonrpc::{self, Methods, Mode, PayloadFormat},
    scheduler::{concurrent, overlapped, phased, Policy, Strategy},
    Address, Config, Error, Loader, Monitor, Phase, Progress,
};
use commonware_runtime::{tokio as tokio_runtime, Metrics as _, Runner};
use std::{io::Write, num::NonZeroUsize, path::PathBuf, time::Duration};
use tracing::{debug, error, info, warn, Level};

/// Logs every change of phase.
#[derive(Default)]
struct Logger {
    phase: Option<Phase>,
}

impl Monitor for Logger {
    fn progress(&mut self, progress: Progress) {
        let Progress {
            phase,
            scanned,
            loaded,
            failed,
        } = progress;
        if self.phase == Some(phase) {
            debug!(?phase, scanned, loaded, failed, "progress");
            return;
        }
        self.phase = Some(phase);
        info!(?phase, scanned, loaded, failed, "progress");
    }

    fn failed(&mut self, error: &Error) {
        error!(%error, "unable to load document");
    }
}

fn main() {
    // Parse arguments
    let matches = Command::new("retrieve")
        .about("reassemble a document scattered across remotely readable chunks")
        .arg(
            Arg::new("endpoint")
                .long("endpoint")
                .value_name("URL")
                .help("JSON-RPC endpoint")
                .required(true),
        )
        .arg(
            Arg::new("site")
                .long("site")
                .value_name("ADDRESS")
                .help("Address of the document")
                .required(true)
                .value_parser(value_parser!(Address)),
        )
        .arg(
            Arg::new("mode")
                .long("mode")
                .help("How chunks are addressed")
                .value_parser(["tree", "flat"])
                .default_value("tree"),
        )
        .arg(
            Arg::new("strategy")
                .long("strategy")
                .help("How chunks are scheduled for loading")
                .value_parser(["phased", "overlapped", "concurrent"])
                .default_value("phased"),
        )
        .arg(
            Arg::new("timeout")
                .long("timeout")
                .value_name("MS")
                .help("Deadline of an overlapped load")
                .value_parser(value_parser!(u64))
                .default_value("60000"),
        )
        .arg(
            Arg::new("concurrency")
                .long("concurrency")
                .value_name("COUNT")
                .help("Maximum reads in flight for a concurrent load")
                .value_parser(value_parser!(NonZeroUsize))
                .default_value("8"),
        )
        .arg(
            Arg::new("strict")
                .long("strict")
                .help("Fail instead of omitting chunks that cannot be loaded")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("raw")
                .long("raw")
                .help("Write the raw bytes instead of decoded text")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("output")
                .long("output")
                .value_name("PATH")
                .help("File to write the document to (defaults to stdout)")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .value_name("LEVEL")
                .value_parser(value_parser!(Level))
                .default_value("info"),
        )
        .arg(
            Arg::new("method-site-info")
                .long("method-site-info")
                .default_value("getSiteInfo"),
        )
        .arg(
            Arg::new("method-chunk-count")
                .long("method-chunk-count")
                .default_value("getChunkCount"),
        )
        .arg(
            Arg::new("method-resolve-chunk")
                .long("method-resolve-chunk")
                .default_value("resolveChunk"),
        )
        .arg(
            Arg::new("method-read")
                .long("method-read")
                .default_value("read"),
        )
        .arg(
            Arg::new("text-payloads")
                .long("text-payloads")
                .help("Treat read results as text rather than hex")
                .action(ArgAction::SetTrue),
        )
        .get_matches();

    // Create logger
    let level = *matches.get_one::<Level>("log-level").unwrap();
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    // Configure the remote
    let endpoint = matches.get_one::<String>("endpoint").unwrap().clone();
    let site = *matches.get_one::<Address>("site").unwrap();
    let mut remote = jsonrpc::Config::new(endpoint, site);
    remote.mode = match matches.get_one::<String>("mode").unwrap().as_str() {
        "flat" => Mode::Flat,
        _ => Mode::Tree,
    };
    remote.methods = Methods {
        site_info: matches.get_one::<String>("method-site-info").unwrap().clone(),
        chunk_count: matches
            .get_one::<String>("method-chunk-count")
            .unwrap()
            .clone(),
        resolve_chunk: matches
            .get_one::<String>("method-resolve-chunk")
            .unwrap()
            .clone(),
        read: matches.get_one::<String>("method-read").unwrap().clone(),
    };
    if matches.get_flag("text-payloads") {
        remote.payload = PayloadFormat::Text;
    }

    // Configure the load
    let policy = if matches.get_flag("strict") {
        Policy::Strict
    } else {
        Policy::BestEffort
    };
    let strategy = match matches.get_one::<String>("strategy").unwrap().as_str() {
        "overlapped" => {
            let timeout = *matches.get_one::<u64>("timeout").unwrap();
            if matches.get_flag("strict") {
                warn!("overlapped loads never omit chunks, ignoring --strict");
            }
            Strategy::Overlapped(overlapped::Config::new(Duration::from_millis(timeout)))
        }
        "concurrent" => Strategy::Concurrent(concurrent::Config {
            concurrency: *matches.get_one::<NonZeroUsize>("concurrency").unwrap(),
            policy,
            ..concurrent::Config::default()
        }),
        _ => Strategy::Phased(phased::Config {
            policy,
            ..phased::Config::default()
        }),
    };
    let cfg = Config {
        strategy,
        decode: !matches.get_flag("raw"),
        ..Config::default()
    }
    .with_monitor(Logger::default());
    let output = matches.get_one::<PathBuf>("output").cloned();
    info!(%site, mode = ?remote.mode, strategy = ?cfg.strategy, "retrieving document");

    // Load the document
    let executor = tokio_runtime::Runner::new(tokio_runtime::Config::default());
    executor.start(|context| async move {
        let client = jsonrpc::Client::new(remote).unwrap_or_else(|err| {
            error!(?err, "unable to create client");
            std::process::exit(1);
        });
        let loader = Loader::new(context.with_label("loader"), client.clone(), client, cfg);
        let Ok(document) = loader.load().await else {
            std::process::exit(1);
        };
        if !document.is_complete() {
            warn!(missing = ?document.missing(), "document is incomplete");
        }

        // Write the document
        let bytes = match document.text() {
            Some(text) => text.as_bytes(),
            None => document.bytes().as_ref(),
        };
        let result = match &output {
            Some(path) => std::fs::write(path, bytes),
            None => std::io::stdout().lock().write_all(bytes),
        };
        if let Err(err) = result {
            error!(?err, "unable to write document");
            std::process::exit(1);
        }
        info!(size = bytes.len(), "wrote document");
    });
}
