use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use regex::Regex;
use serde::Deserialize;

use tracestitch::events;
use tracestitch::record::{RawRecord, UNKNOWN_ID};
use tracestitch::session::{ReadView, TraceSession};
use tracestitch::source::{TraceReader, TraceWriter};

#[derive(Parser, Debug)]
#[command(
    name = "tracestitch",
    about = "Decode a kernel trace stream and correlate thread, process, file, and disk identity"
)]
struct Opts {
    /// Trace file to decode.
    trace: PathBuf,

    /// Only print events whose shape name matches this regex.
    #[arg(short, long)]
    filter: Option<String>,

    /// Re-emit the stream to this file with the original identity bytes
    /// untouched, instead of printing.
    #[arg(long)]
    relog: Option<PathBuf>,

    /// Print correlation statistics at the end.
    #[arg(long)]
    stats: bool,

    /// JSON file with explicit path mapping rules.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Populate path rules from this machine's mounted volumes instead of
    /// mapping records in the trace.
    #[arg(long)]
    live_paths: bool,

    /// Serialize the correlation indexes to this file at end of processing.
    #[arg(long)]
    save_indexes: Option<PathBuf>,
}

// The JSON config file format is
// {
//   "system_drive": "C:",
//   "path_rules": [
//     { "kernel": "\\Device\\HarddiskVolume1\\", "user": "C:\\" }
//   ]
// }
#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields)]
struct Config {
    #[serde(default)]
    system_drive: Option<String>,
    #[serde(default)]
    path_rules: Vec<PathRuleConfig>,
}

#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
struct PathRuleConfig {
    kernel: String,
    user: String,
}

fn main() -> Result<()> {
    env_logger::init();
    let opts = Opts::parse();

    let mut reader = TraceReader::open(&opts.trace)?;
    let mut session = if opts.relog.is_some() {
        TraceSession::new_passthrough(reader.qpc_frequency())
    } else {
        TraceSession::new(reader.qpc_frequency())
    };

    if let Some(path) = &opts.config {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Config = serde_json::from_str(&text)
            .with_context(|| format!("parsing config {}", path.display()))?;
        if let Some(drive) = &config.system_drive {
            session.paths.set_system_drive(drive);
        }
        for rule in &config.path_rules {
            session.paths.add_trace_rule(&rule.kernel, &rule.user)?;
        }
    }
    if opts.live_paths {
        session.paths.populate_live()?;
    }

    let filter = opts
        .filter
        .as_deref()
        .map(Regex::new)
        .transpose()
        .context("invalid --filter regex")?;

    let mut relog = match &opts.relog {
        Some(path) => Some(TraceWriter::create(
            path,
            reader.pointer_width(),
            reader.qpc_frequency(),
        )?),
        None => {
            session.registry.subscribe(events::ALL_KEYS, move |rec, view| {
                let name = events::shape_name(rec.key()).unwrap_or("Unknown");
                if let Some(re) = &filter {
                    if !re.is_match(name) {
                        return;
                    }
                }
                print_record(rec, view, name);
            });
            None
        }
    };

    while let Some(mut rec) = reader.next_record()? {
        session.process(&mut rec);
        if let Some(writer) = relog.as_mut() {
            writer.write_record(&rec)?;
        }
    }

    if let Some(writer) = relog {
        writer.finish()?;
        println!(
            "Relogged {} records to {}",
            session.stats().records,
            opts.relog.as_ref().unwrap().display()
        );
    }
    if opts.stats {
        let stats = session.stats();
        println!("Records processed:  {}", stats.records);
        println!("Corrupt (dropped):  {}", stats.corrupt);
        println!("Unknown process:    {}", stats.unknown_process);
        println!("Thread starts seen: {}", session.threads.start_count());
        println!("Names resolved:     {}", session.names.name_count());
        println!("Disk completions:   {}", session.disks.completion_count());
        println!("Path rules:         {}", session.paths.rule_count());
    }
    if let Some(path) = &opts.save_indexes {
        let out = BufWriter::new(
            File::create(path).with_context(|| format!("creating {}", path.display()))?,
        );
        session.store_indexes(out)?;
        println!("Saved correlation indexes to {}", path.display());
    }
    Ok(())
}

fn format_identity(id: i32) -> String {
    if id == UNKNOWN_ID {
        "?".to_string()
    } else {
        id.to_string()
    }
}

fn print_record(rec: &RawRecord, view: &ReadView, name: &str) {
    let mut line = format!(
        "{:>14} {:<26} tid={:<7} pid={:<7}",
        rec.timestamp,
        name,
        format_identity(rec.thread_id),
        format_identity(rec.process_id),
    );
    match rec.key() {
        events::FILE_NAME | events::FILE_CREATE | events::FILE_DELETE | events::FILE_RUNDOWN => {
            if let Ok(f) = events::decode_file_name(rec) {
                line.push_str(&format!(" {}", view.paths.translate(&f.name)));
            }
        }
        events::DISK_READ | events::DISK_WRITE => {
            if let Ok(d) = events::decode_disk_io(rec) {
                let file = view.names.lookup(d.file_key, None, rec.timestamp);
                line.push_str(&format!(
                    " disk={} {} bytes",
                    d.disk_number, d.transfer_size
                ));
                if let Some(service) = view.disk_service_msec {
                    line.push_str(&format!(" service={service:.3}ms"));
                }
                if !file.is_empty() {
                    line.push_str(&format!(" {}", view.paths.translate(file)));
                }
            }
        }
        events::PROCESS_START | events::PROCESS_DC_START | events::PROCESS_STOP => {
            if let Ok(p) = events::decode_process(rec) {
                line.push_str(&format!(" {}", p.image_name));
            }
        }
        events::THREAD_START | events::THREAD_DC_START => {
            if let (Some(tid), Some(pid)) = (rec.reporter_thread_id, rec.reporter_process_id) {
                line.push_str(&format!(
                    " started-by tid={} pid={}",
                    format_identity(tid),
                    format_identity(pid)
                ));
            }
        }
        _ => {}
    }
    println!("{line}");
}
