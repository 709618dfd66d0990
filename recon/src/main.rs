use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use recon_core::{Address, CancelToken, PortSpec, ScanConfig, ScanReport, Target};
use scan_engine::{pinger_for, ScanEvent, Scanner, TcpConnector};
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::sync::mpsc;

mod config;
mod logging;

use config::{Section, Tuning};

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_else(|_| String::new())
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat { Text, Json, Jsonl }

fn parse_format(s: &str) -> OutputFormat {
    match s { "json" => OutputFormat::Json, "jsonl" => OutputFormat::Jsonl, _ => OutputFormat::Text }
}

#[derive(Debug, Parser)]
#[command(name = "recon", version, about = "Local network liveness sweep and TCP port probe")]
struct Cli {
    /// Optional config file (YAML). If omitted, loads ./recon.yaml if present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print version information
    Version,
    /// Find live hosts, then probe their TCP ports
    Scan {
        /// IP, CIDR (10.0.0.0/24), suffix range (10.0.0.1-20), prefix (192.168.1) or hostname.
        /// Prompted for on stdin if omitted.
        target: Option<String>,
        /// Ports: comma/range list (e.g., 22,80,443 or 1-1024). Default: 21,22,23,80,443,3306,8080
        #[arg(long)]
        ports: Option<String>,
        #[command(flatten)]
        tuning: Tuning,
        /// Output format: text, json, or jsonl
        #[arg(long, value_enum)]
        format: Option<OutputFormat>,
        /// Output file (overwrites)
        #[arg(long, value_name = "FILE")]
        out: Option<PathBuf>,
        /// Write CSV (host,port rows) instead of text/json when --out is provided
        #[arg(long, default_value_t = false)]
        csv: bool,
    },
    /// Liveness sweep only
    Discover {
        /// IP, CIDR, suffix range, prefix or hostname
        target: String,
        #[command(flatten)]
        tuning: Tuning,
        /// Output format: text, json, or jsonl
        #[arg(long, value_enum)]
        format: Option<OutputFormat>,
        /// Output file (overwrites)
        #[arg(long, value_name = "FILE")]
        out: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.quiet);
    let loaded_cfg = config::load_config(cli.config.as_deref())?.unwrap_or_default();
    match cli.command {
        Commands::Version => {
            println!("recon {} (core {})", env!("CARGO_PKG_VERSION"), recon_core::version());
        }
        Commands::Scan { target, ports, tuning, format, out, csv } => {
            let section = loaded_cfg.scan.unwrap_or_default();
            let target = match target {
                Some(t) => t,
                None => prompt_target()?,
            };
            let target = Target::parse(&target)?;
            let ports = match ports.or_else(|| section.ports.clone()) {
                Some(spec) => PortSpec::parse(&spec)?,
                None => PortSpec::default(),
            };
            let cfg = tuning.or(&section.tuning).to_scan_config()?;
            if csv {
                let path = out.ok_or_else(|| anyhow!("--csv requires --out <file>"))?;
                let (run, _) = run(target, ports, cfg, Sink::discard())?;
                write_csv(&path, &run)?;
            } else {
                let sink = Sink::open(out.as_deref(), resolve_format(format, &section), Mode::Scan)?;
                let (run, sink) = run(target, ports, cfg, sink)?;
                sink.finish(&run)?;
            }
        }
        Commands::Discover { target, tuning, format, out } => {
            let section = loaded_cfg.discover.unwrap_or_default();
            let target = Target::parse(&target)?;
            let mut cfg = tuning.or(&section.tuning).to_scan_config()?;
            cfg.skip_ports = true;
            let sink = Sink::open(out.as_deref(), resolve_format(format, &section), Mode::Discover)?;
            let (run, sink) = run(target, PortSpec::empty(), cfg, sink)?;
            sink.finish(&run)?;
        }
    }
    Ok(())
}

fn resolve_format(flag: Option<OutputFormat>, section: &Section) -> OutputFormat {
    flag.or_else(|| section.format.as_deref().map(parse_format)).unwrap_or(OutputFormat::Text)
}

fn prompt_target() -> Result<String> {
    print!("Enter target IP address: ");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    let line = line.trim().to_string();
    if line.is_empty() { return Err(anyhow!("no target given")); }
    Ok(line)
}

struct Run {
    target: Target,
    ports: PortSpec,
    report: ScanReport,
    started_at: String,
    ended_at: String,
    duration_ms: u128,
}

/// Run the scan on a fresh runtime. Ctrl-C cancels; events are fed to `sink` as they arrive.
fn run(target: Target, ports: PortSpec, cfg: ScanConfig, mut sink: Sink) -> Result<(Run, Sink)> {
    let rt = tokio::runtime::Runtime::new()?;
    let start = Instant::now();
    let started_at = now_rfc3339();
    let (report, sink) = rt.block_on(async {
        let cancel = CancelToken::new();
        {
            let c = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("interrupt received, finishing in-flight probes");
                    c.cancel();
                }
            });
        }
        let (tx, mut rx) = mpsc::unbounded_channel::<ScanEvent>();
        let printer = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let Err(e) = sink.on_event(&event) {
                    tracing::warn!(error = %e, "failed to write progress");
                }
            }
            sink
        });
        let scanner = Scanner::new(cfg.clone(), pinger_for(&cfg), Arc::new(TcpConnector))
            .with_cancel(cancel)
            .with_events(tx);
        let result = scanner.run(&target, &ports).await;
        // closes the event channel so the printer drains and returns
        drop(scanner);
        let sink = printer.await.context("progress writer task failed")?;
        anyhow::Ok((result?, sink))
    })?;
    let run = Run {
        target,
        ports,
        report,
        started_at,
        ended_at: now_rfc3339(),
        duration_ms: start.elapsed().as_millis(),
    };
    Ok((run, sink))
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Mode { Scan, Discover }

/// Output destination. jsonl lines are written while the scan runs, text and json at the end.
struct Sink {
    out: Box<dyn Write + Send>,
    format: OutputFormat,
    mode: Mode,
    streamed: HashSet<Address>,
}

impl Sink {
    fn open(path: Option<&Path>, format: OutputFormat, mode: Mode) -> Result<Self> {
        let out: Box<dyn Write + Send> = match path {
            Some(p) => {
                let file = OpenOptions::new().create(true).truncate(true).write(true).open(p)
                    .with_context(|| format!("opening {}", p.display()))?;
                Box::new(BufWriter::new(file))
            }
            None => Box::new(io::stdout()),
        };
        Ok(Sink { out, format, mode, streamed: HashSet::new() })
    }

    fn discard() -> Self {
        Sink { out: Box::new(io::sink()), format: OutputFormat::Text, mode: Mode::Scan, streamed: HashSet::new() }
    }

    fn on_event(&mut self, event: &ScanEvent) -> io::Result<()> {
        if self.format != OutputFormat::Jsonl { return Ok(()); }
        match (self.mode, event) {
            (Mode::Scan, ScanEvent::HostScanned { address, open }) => {
                writeln!(self.out, "{}", serde_json::json!({ "host": address, "open": open }))?;
                self.streamed.insert(*address);
            }
            (Mode::Discover, ScanEvent::HostReachable(address)) => {
                writeln!(self.out, "{}", serde_json::json!({ "host": address }))?;
                self.streamed.insert(*address);
            }
            _ => return Ok(()),
        }
        self.out.flush()
    }

    fn finish(mut self, run: &Run) -> Result<()> {
        match (self.format, self.mode) {
            (OutputFormat::Text, Mode::Scan) => {
                let text = render_scan_text(run);
                write!(self.out, "{}", text)?;
            }
            (OutputFormat::Text, Mode::Discover) => {
                let text = render_discover_text(run);
                write!(self.out, "{}", text)?;
            }
            (OutputFormat::Json, _) => {
                writeln!(self.out, "{}", serde_json::to_string(&render_json(run))?)?;
            }
            (OutputFormat::Jsonl, _) => {
                let report = &run.report;
                for (address, open) in &report.hosts {
                    if !self.streamed.contains(address) {
                        writeln!(self.out, "{}", serde_json::json!({ "host": address, "open": open, "partial": true }))?;
                    }
                }
                for address in &report.unscanned {
                    if !self.streamed.contains(address) {
                        writeln!(self.out, "{}", serde_json::json!({ "host": address, "scanned": false }))?;
                    }
                }
                for e in &report.errors {
                    writeln!(self.out, "{}", serde_json::json!({ "error": e }))?;
                }
            }
        }
        self.out.flush()?;
        Ok(())
    }
}

fn render_scan_text(run: &Run) -> String {
    let report = &run.report;
    let mut lines = Vec::new();
    if report.hosts.is_empty() && report.unscanned.is_empty() {
        lines.push(format!("[-] No reachable hosts in {}.", run.target));
    }
    for (address, open) in &report.hosts {
        if open.is_empty() {
            lines.push(format!("[-] No open ports found on {}.", address));
        } else {
            let list = open.iter().map(|p| p.to_string()).collect::<Vec<_>>().join(", ");
            lines.push(format!("[+] Open ports on {}: [{}]", address, list));
        }
    }
    for address in &report.unscanned {
        lines.push(format!("[*] {} is up but was not scanned", address));
    }
    for e in &report.errors {
        lines.push(format!("[!] {}", e));
    }
    let status = if report.cancelled { ", cancelled" } else { "" };
    lines.push(format!(
        "({} hosts, {} ports each, {} open, {} ms{})",
        report.hosts.len(),
        run.ports.len(),
        report.open_port_count(),
        run.duration_ms,
        status
    ));
    lines.join("\n") + "\n"
}

fn render_discover_text(run: &Run) -> String {
    let live: Vec<Address> = run.report.reachable().collect();
    let mut lines = vec![format!("live hosts ({}):", live.len())];
    lines.extend(live.iter().map(|a| a.to_string()));
    for e in &run.report.errors {
        lines.push(format!("[!] {}", e));
    }
    let status = if run.report.cancelled { ", cancelled" } else { "" };
    lines.push(format!("(swept {}, took {} ms{})", run.target, run.duration_ms, status));
    lines.join("\n") + "\n"
}

fn render_json(run: &Run) -> serde_json::Value {
    serde_json::json!({
        "target": run.target.to_string(),
        "ports": run.ports,
        "hosts": run.report.hosts,
        "unscanned": run.report.unscanned,
        "errors": run.report.errors,
        "cancelled": run.report.cancelled,
        "duration_ms": run.duration_ms as u64,
        "started_at": run.started_at,
        "ended_at": run.ended_at,
    })
}

fn write_csv(path: &Path, run: &Run) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(File::create(path).with_context(|| format!("creating {}", path.display()))?);
    wtr.write_record(["host", "port", "started_at", "ended_at", "duration_ms"])?;
    let duration = run.duration_ms.to_string();
    for (address, open) in &run.report.hosts {
        let host = address.to_string();
        for p in open {
            wtr.write_record(&[host.clone(), p.to_string(), run.started_at.clone(), run.ended_at.clone(), duration.clone()])?;
        }
    }
    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use recon_core::ProbeError;

    fn sample_run() -> Run {
        let mut report = ScanReport::new();
        report.record_host("10.0.0.3".parse().unwrap(), [80, 22]);
        report.record_host("10.0.0.1".parse().unwrap(), []);
        report.record_unscanned("10.0.0.5".parse().unwrap());
        report.record_error(ProbeError::host("10.0.0.2".parse().unwrap(), "ping not available"));
        Run {
            target: Target::parse("10.0.0.1-5").unwrap(),
            ports: PortSpec::parse("22,80").unwrap(),
            report,
            started_at: "2024-01-01T00:00:00Z".into(),
            ended_at: "2024-01-01T00:00:01Z".into(),
            duration_ms: 1000,
        }
    }

    #[test]
    fn text_lists_open_ports_ascending() {
        let text = render_scan_text(&sample_run());
        assert!(text.contains("[+] Open ports on 10.0.0.3: [22, 80]"));
        assert!(text.contains("[-] No open ports found on 10.0.0.1."));
        assert!(text.contains("[*] 10.0.0.5 is up but was not scanned"));
        assert!(text.contains("[!] 10.0.0.2: ping not available"));
    }

    #[test]
    fn discover_text_lists_all_reachable() {
        let text = render_discover_text(&sample_run());
        assert!(text.starts_with("live hosts (3):"));
        assert!(text.contains("10.0.0.5"));
    }

    #[test]
    fn json_maps_address_to_ports() {
        let v = render_json(&sample_run());
        assert_eq!(v["hosts"]["10.0.0.3"], serde_json::json!([22, 80]));
        assert_eq!(v["ports"], serde_json::json!([22, 80]));
        assert_eq!(v["target"], "10.0.0.1-5");
    }

    #[test]
    fn format_names() {
        assert_eq!(parse_format("jsonl"), OutputFormat::Jsonl);
        assert_eq!(parse_format("whatever"), OutputFormat::Text);
    }
}
