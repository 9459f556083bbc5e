//! Command line host for the IP configuration engine.
//!
//! Loads a project document and a chip summary, instantiates every
//! peripheral the summary defines, applies the requested writes and presets,
//! then either prints the resulting document or serves a JSON-lines session
//! on stdin/stdout.

mod source;

use anyhow::Context;
use clap::Parser;
use csp_core::{ChipSummary, EngineSettings};
use csp_engine::{IpManager, Project, Session};
use csp_protocol::{
    encode_engine_message, ApplyPresetRequest, EngineMessage, HostRequest, SetRequest,
};
use serde_json::Value;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::source::DirectoryDefinitionSource;

/// Evaluate and edit MCU peripheral configurations.
#[derive(Parser, Debug)]
#[command(name = "csp")]
#[command(version, about, long_about = None)]
struct Args {
    /// Project document (JSON). An empty project is used when omitted.
    #[arg(short, long)]
    project: Option<PathBuf>,

    /// Chip summary (JSON)
    #[arg(short, long)]
    summary: PathBuf,

    /// Chip package directory holding `<vendor>/peripherals/<define>.json`
    #[arg(short, long)]
    ip_dir: PathBuf,

    /// Locale for display strings
    #[arg(short, long, default_value = "en")]
    locale: String,

    /// Write a value, as `configs.USART1.mode=sync`. Values are parsed as
    /// JSON and fall back to plain strings.
    #[arg(long = "set", value_name = "PATH=VALUE")]
    sets: Vec<String>,

    /// Apply a preset, as `USART1:USART1_CK`
    #[arg(long = "preset", value_name = "INSTANCE:NAME")]
    presets: Vec<String>,

    /// Serve requests from stdin as JSON lines instead of printing the
    /// document
    #[arg(long)]
    session: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,csp_engine=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let document = match &args.project {
        Some(path) => read_json(path)?,
        None => Value::Object(Default::default()),
    };
    let summary: ChipSummary = serde_json::from_value(read_json(&args.summary)?)
        .with_context(|| format!("invalid chip summary {}", args.summary.display()))?;
    let vendor = summary.vendor.clone();

    let settings = EngineSettings {
        locale: args.locale.clone(),
        ..EngineSettings::default()
    };
    let project = Project::new(document, settings);
    let manager = Rc::new(IpManager::new(Rc::clone(&project)));
    let source = DirectoryDefinitionSource::new(&args.ip_dir);
    let loaded = manager.load_summary_peripherals(&source, Rc::new(summary))?;
    tracing::info!(chip = %project.target_chip(), peripherals = loaded.len(), "project ready");

    let session = Session::new(Rc::clone(&manager));
    for request in build_requests(&args, &vendor)? {
        session.handle(request);
    }
    for message in session.drain() {
        if let EngineMessage::Error(e) = message {
            anyhow::bail!("{}", e.message);
        }
    }

    if args.session {
        serve(&session)?;
    } else {
        println!("{}", serde_json::to_string_pretty(&project.snapshot())?);
    }
    Ok(())
}

fn read_json(path: &Path) -> anyhow::Result<Value> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

/// Turn `--set` and `--preset` arguments into requests, writes first.
fn build_requests(args: &Args, vendor: &str) -> anyhow::Result<Vec<HostRequest>> {
    let mut requests = Vec::new();
    for set in &args.sets {
        let (path, raw) = set
            .split_once('=')
            .with_context(|| format!("expected PATH=VALUE, got '{set}'"))?;
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::from(raw));
        requests.push(HostRequest::Set(SetRequest {
            request_id: None,
            path: path.to_string(),
            value,
        }));
    }
    for preset in &args.presets {
        let (instance, name) = preset
            .split_once(':')
            .with_context(|| format!("expected INSTANCE:NAME, got '{preset}'"))?;
        requests.push(HostRequest::ApplyPreset(ApplyPresetRequest {
            request_id: None,
            vendor: vendor.to_string(),
            instance: instance.to_string(),
            preset: name.to_string(),
        }));
    }
    Ok(requests)
}

fn serve(session: &Session) -> anyhow::Result<()> {
    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout().lock();
    for line in stdin.lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        session.handle_frame(&line);
        for message in session.drain() {
            writeln!(stdout, "{}", encode_engine_message(&message)?)?;
        }
        stdout.flush()?;
    }
    tracing::info!(dirty = session.project().is_dirty(), "session closed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_build_requests() {
        let args = Args::parse_from([
            "csp",
            "--summary",
            "chip.json",
            "--ip-dir",
            "pkg",
            "--set",
            "configs.USART1.enable=true",
            "--set",
            "configs.USART1.mode=sync",
            "--preset",
            "USART1:USART1_CK",
        ]);
        let requests = build_requests(&args, "Geehy").unwrap();
        assert_eq!(requests.len(), 3);
        match &requests[0] {
            HostRequest::Set(r) => assert_eq!(r.value, json!(true)),
            other => panic!("Expected Set, got {other:?}"),
        }
        match &requests[1] {
            HostRequest::Set(r) => assert_eq!(r.value, json!("sync")),
            other => panic!("Expected Set, got {other:?}"),
        }
        match &requests[2] {
            HostRequest::ApplyPreset(r) => {
                assert_eq!((r.vendor.as_str(), r.instance.as_str()), ("Geehy", "USART1"));
                assert_eq!(r.preset, "USART1_CK");
            }
            other => panic!("Expected ApplyPreset, got {other:?}"),
        }
    }

    #[test]
    fn test_malformed_arguments() {
        let args = Args::parse_from(["csp", "-s", "c.json", "-i", "pkg", "--set", "configs.A"]);
        assert!(build_requests(&args, "Geehy").is_err());
    }
}
