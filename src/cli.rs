//! CLI: scan a folder, tag every image not yet done, flush the index.

use anyhow::Context;
use clap::Parser;
use colored::Colorize;
use log::{info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::pipeline::{Pipeline, PipelineConfig};
use crate::stage::{CapabilityStage, CaptionStage, TagStage};
use crate::types::{ObserverEvent, RunOpts};
use crate::utils::setup_logging;
use crate::utils::tagpipe_toml::{apply_file_to_opts, load_tagpipe_toml};
use crate::Result;

/// Background image tagger: scans DIR and runs inference stages over every
/// image not yet tagged. Results land in `tags_index.json` inside DIR.
#[derive(Clone, Parser)]
#[command(name = "tagpipe")]
#[command(about = "Scan a folder and tag every image not yet done.")]
pub struct Cli {
    /// Folder to scan. Default: current directory.
    #[arg(value_name = "DIR", default_value = ".")]
    pub dir: PathBuf,

    /// Recurse into subdirectories.
    #[arg(long, short = 'r', num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub recursive: Option<bool>,

    /// Models root holding one resource directory per stage. Default: `models`.
    #[arg(long, short = 'm')]
    pub models_root: Option<PathBuf>,

    /// Tagging confidence threshold (0.0 - 1.0).
    #[arg(long, short = 't')]
    pub threshold: Option<f32>,

    /// Also run the captioning stage.
    #[arg(long, short = 'c', num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub caption: Option<bool>,

    /// Verbose output.
    #[arg(long, short = 'v', num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub verbose: Option<bool>,
}

/// Resolve options: defaults, then `.tagpipe.toml` in DIR, then CLI flags.
fn setup_opts(cli: &Cli) -> RunOpts {
    let mut opts = RunOpts::default();
    if let Some(file) = load_tagpipe_toml(&cli.dir) {
        apply_file_to_opts(&file, &mut opts);
    }
    if let Some(ref p) = cli.models_root {
        opts.models_root = p.clone();
    }
    if let Some(v) = cli.threshold {
        opts.threshold = v;
    }
    if let Some(v) = cli.caption {
        opts.caption = v;
    }
    if let Some(v) = cli.recursive {
        opts.recursive = v;
    }
    if let Some(v) = cli.verbose {
        opts.verbose = v;
    }
    opts
}

/// Run one scan-and-tag pass over `cli.dir`, printing observer events as they
/// arrive. Ctrl+C stops early but still drains and flushes the index.
pub fn handle_run(cli: &Cli) -> Result<()> {
    let opts = setup_opts(cli);
    setup_logging(opts.verbose);

    let mut stages: Vec<Arc<dyn CapabilityStage>> =
        vec![Arc::new(TagStage::new(&opts.models_root, opts.threshold)?)];
    if opts.caption {
        stages.push(Arc::new(CaptionStage::new(&opts.models_root)?));
    }

    let (pipeline, events) = Pipeline::new(PipelineConfig::default(), stages);

    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&interrupted);
    ctrlc::set_handler(move || flag.store(true, Ordering::Relaxed))
        .context("set Ctrl+C handler")?;

    pipeline.start(cli.dir.clone(), opts.recursive)?;

    let mut discovered = 0usize;
    let mut tagged = 0usize;
    let mut scan_done = false;
    while !scan_done {
        if interrupted.load(Ordering::Relaxed) {
            warn!("interrupted; stopping and flushing index");
            break;
        }
        match events.recv_timeout(Duration::from_millis(200)) {
            Ok(ev) => scan_done = print_event(&ev, &mut discovered, &mut tagged),
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
        }
    }

    // Shutdown drains the queue, so every item found above still gets tagged
    // and merged before the index is written.
    pipeline.shutdown()?;
    for ev in events.try_iter() {
        print_event(&ev, &mut discovered, &mut tagged);
    }
    info!("{tagged} of {discovered} discovered items tagged this run");
    Ok(())
}

/// Print one event; returns true when the scan finished.
fn print_event(ev: &ObserverEvent, discovered: &mut usize, tagged: &mut usize) -> bool {
    match ev {
        ObserverEvent::ItemDiscovered(id) => {
            *discovered += 1;
            println!("{} {id}", "found".cyan());
        }
        ObserverEvent::ItemTagged(id) => {
            *tagged += 1;
            println!("{} {id}", "tagged".green());
        }
        ObserverEvent::Status(msg) => {
            println!("{} {msg}", "status".white());
            // Both terminal statuses end the event loop; a failed scan must
            // not leave the loop spinning until Ctrl+C.
            return msg == "scan complete" || msg == "scan failed";
        }
        // Errors are already logged by the controller; nothing to print here.
        ObserverEvent::Error { .. } => {}
    }
    false
}
