use chrono::{DateTime, Local, Utc};
use crossterm::cursor::MoveToColumn;
use crossterm::queue;
use crossterm::style::{style, Color, Print, Stylize};
use crossterm::terminal::{Clear, ClearType};
use powerping_engine::{
    ListenObserver, PingObserver, Reply, ScanObserver, ScanProgress, ScanReport,
};
use powerping_icmp::{type_name, DecodeError, IcmpPacket, ReceivedPacket};
use powerping_model::{BeepMode, PacketClass, PingAttributes, PingResults};
use std::error::Error;
use std::fmt::Display;
use std::io::{self, Write};
use std::net::Ipv4Addr;
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::debug;

const BEL: &str = "\x07";

#[derive(Debug, Clone, Copy)]
pub struct DisplayConfig {
    pub color: bool,
    pub timestamps: bool,
    pub beep: BeepMode,
}

/// Owned copy of a ping session callback, sent from the engine thread to
/// the thread that draws the console.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Started {
        host: String,
        address: Ipv4Addr,
        message_bytes: usize,
        ttl: u8,
    },
    Reply {
        sequence: u16,
        source: Ipv4Addr,
        ttl: u8,
        bytes: usize,
        icmp_type: u8,
        code: u8,
        rtt: Duration,
    },
    Timeout {
        sequence: u16,
    },
    Error {
        message: String,
        fatal: bool,
    },
    Finished(PingResults),
}

pub struct ChannelObserver {
    events: Sender<SessionEvent>,
}

impl ChannelObserver {
    pub fn new(events: Sender<SessionEvent>) -> Self {
        Self { events }
    }

    fn send(&self, event: SessionEvent) {
        // the console thread only goes away once the process is exiting
        let _ = self.events.send(event);
    }
}

impl PingObserver for ChannelObserver {
    fn on_start(&mut self, attributes: &PingAttributes, target: Ipv4Addr) {
        self.send(SessionEvent::Started {
            host: attributes.target.clone(),
            address: target,
            message_bytes: attributes.message_bytes().len(),
            ttl: attributes.ttl,
        });
    }

    fn on_reply(&mut self, reply: &Reply<'_>) {
        self.send(SessionEvent::Reply {
            sequence: reply.sequence,
            source: reply.source,
            ttl: reply.ttl,
            bytes: reply.bytes,
            icmp_type: reply.packet.icmp_type,
            code: reply.packet.code,
            rtt: reply.rtt,
        });
    }

    fn on_timeout(&mut self, sequence: u16) {
        self.send(SessionEvent::Timeout { sequence });
    }

    fn on_finish(&mut self, results: &PingResults) {
        self.send(SessionEvent::Finished(results.clone()));
    }

    fn on_error(&mut self, message: &str, _error: Option<&(dyn Error + 'static)>, fatal: bool) {
        self.send(SessionEvent::Error {
            message: message.to_string(),
            fatal,
        });
    }
}

/// Keeps only the latest totals; a flood sends far faster than anyone reads.
#[derive(Clone, Default)]
pub struct SnapshotObserver {
    latest: Arc<Mutex<PingResults>>,
}

impl SnapshotObserver {
    pub fn latest(&self) -> PingResults {
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl PingObserver for SnapshotObserver {
    fn on_results_update(&mut self, results: &PingResults) {
        *self.latest.lock().unwrap_or_else(PoisonError::into_inner) = results.clone();
    }

    fn on_error(&mut self, message: &str, _error: Option<&(dyn Error + 'static)>, fatal: bool) {
        if !fatal {
            debug!("flood: {message}");
        }
    }
}

pub struct Console<W> {
    out: W,
    config: DisplayConfig,
    host: String,
    address: Option<Ipv4Addr>,
}

impl Console<io::Stdout> {
    pub fn stdout(config: DisplayConfig) -> Self {
        Self::new(io::stdout(), config)
    }
}

impl<W: Write> Console<W> {
    pub fn new(out: W, config: DisplayConfig) -> Self {
        Self {
            out,
            config,
            host: String::new(),
            address: None,
        }
    }

    pub fn address(&self) -> Option<Ipv4Addr> {
        self.address
    }

    #[cfg(test)]
    fn into_inner(self) -> W {
        self.out
    }

    pub fn handle(&mut self, event: SessionEvent) -> io::Result<()> {
        match event {
            SessionEvent::Started {
                host,
                address,
                message_bytes,
                ttl,
            } => {
                let name = if host == address.to_string() {
                    address.to_string()
                } else {
                    format!("{host} [{address}]")
                };
                let line =
                    format!("Pinging {name} [ttl={ttl}] with {message_bytes} bytes of data:");
                self.host = host;
                self.address = Some(address);
                self.line(&line)
            }
            SessionEvent::Reply {
                sequence,
                source,
                ttl,
                bytes,
                icmp_type,
                code,
                rtt,
            } => {
                let rtt_ms = rtt.as_secs_f64() * 1000.0;
                let kind = type_name(icmp_type);
                let kind = match PacketClass::of(icmp_type) {
                    PacketClass::Good => self.paint(kind, Color::Green),
                    PacketClass::Error => self.paint(kind, Color::Red),
                    PacketClass::Other => self.paint(kind, Color::Yellow),
                };
                let time = self.paint(format!("{rtt_ms:.1}ms"), latency_color(rtt_ms));
                let line = format!(
                    "Reply from: {source} seq={sequence} bytes={bytes} \
                     type={kind} [{icmp_type}:{code}] ttl={ttl} time={time}"
                );
                self.line(&line)?;
                if self.config.beep == BeepMode::OnReply {
                    self.beep()?;
                }
                Ok(())
            }
            SessionEvent::Timeout { sequence } => {
                let line = self.paint(format!("Request timed out. seq={sequence}"), Color::Red);
                self.line(&line)?;
                if self.config.beep == BeepMode::OnTimeout {
                    self.beep()?;
                }
                Ok(())
            }
            // fatal errors are returned from the session and reported by main
            SessionEvent::Error { fatal: true, .. } => Ok(()),
            SessionEvent::Error { message, .. } => {
                let line = self.paint(format!("Error: {message}"), Color::Yellow);
                self.line(&line)
            }
            SessionEvent::Finished(results) => self.summary(&results),
        }
    }

    pub fn summary(&mut self, results: &PingResults) -> io::Result<()> {
        let host = if self.host.is_empty() {
            self.address.map(|a| a.to_string()).unwrap_or_default()
        } else {
            self.host.clone()
        };
        let received = self.paint(results.received, Color::Green);
        let lost = self.paint(results.lost, Color::Red);
        let good = self.paint(results.good_packets, Color::Green);
        let errors = self.paint(results.error_packets, Color::Red);
        let other = self.paint(results.other_packets, Color::Yellow);

        writeln!(self.out)?;
        writeln!(self.out, "--- Stats for {host} ---")?;
        writeln!(
            self.out,
            "   General: Sent [ {} ], Received [ {received} ], Lost [ {lost} ] ({:.1}% loss)",
            results.sent,
            results.loss_percent()
        )?;
        writeln!(
            self.out,
            "     Times: Min [ {} ] Max [ {} ] Avg [ {:.1}ms ]",
            format_time(results.min_time),
            format_time(results.max_time),
            results.avg_time
        )?;
        writeln!(
            self.out,
            "     Types: Good [ {good} ], Errors [ {errors} ], Unknown [ {other} ]"
        )?;
        if let Some(start) = results.start_time {
            writeln!(self.out, "   Started: {}", format_local(start))?;
        }
        writeln!(self.out, "   Runtime: {}", format_runtime(results.total_run_time))?;
        if results.has_overflowed {
            writeln!(self.out, "   Note: a counter overflowed, totals are capped")?;
        }
        if results.cancelled {
            writeln!(self.out, "   Stopped early by user")?;
        }
        self.out.flush()
    }

    pub fn flood_status(&mut self, results: &PingResults) -> io::Result<()> {
        let line = format!(
            "Flooding {}: sent {} received {} lost {} ({:.1}% loss) {:.0} pings/s",
            self.host,
            results.sent,
            results.received,
            results.lost,
            results.loss_percent(),
            rate(results.sent, results.elapsed())
        );
        self.overwrite(&line)
    }

    pub fn start_flood(&mut self, host: &str) -> io::Result<()> {
        self.host = host.to_string();
        self.line(&format!("Flooding {host}, press Ctrl-C to stop"))
    }

    pub fn listen_started(&mut self) -> io::Result<()> {
        self.line("Listening for ICMP packets, press Ctrl-C to stop")
    }

    fn line(&mut self, text: &str) -> io::Result<()> {
        if self.config.timestamps {
            write!(self.out, "[{}] ", Local::now().format("%H:%M:%S"))?;
        }
        writeln!(self.out, "{text}")?;
        self.out.flush()
    }

    fn overwrite(&mut self, text: &str) -> io::Result<()> {
        queue!(
            self.out,
            MoveToColumn(0),
            Clear(ClearType::CurrentLine),
            Print(text)
        )?;
        self.out.flush()
    }

    fn beep(&mut self) -> io::Result<()> {
        write!(self.out, "{BEL}")?;
        self.out.flush()
    }

    fn paint<T: Display>(&self, value: T, color: Color) -> String {
        if self.config.color {
            style(value).with(color).to_string()
        } else {
            value.to_string()
        }
    }

    fn log_failure(result: io::Result<()>) {
        if let Err(err) = result {
            debug!("console write failed: {err}");
        }
    }
}

impl<W: Write> ScanObserver for Console<W> {
    fn on_progress(&mut self, progress: &ScanProgress) {
        let percent = if progress.total == 0 {
            100.0
        } else {
            progress.scanned as f64 * 100.0 / progress.total as f64
        };
        let line = format!(
            "Scanning: {}/{} ({percent:.0}%) found {} [{} hosts/s]",
            progress.scanned,
            progress.total,
            progress.found,
            rate(progress.scanned as u64, progress.elapsed) as u64
        );
        let result = self.overwrite(&line);
        Self::log_failure(result);
    }

    fn on_finish(&mut self, report: &ScanReport) {
        let result = self.scan_report(report);
        Self::log_failure(result);
    }
}

impl<W: Write> Console<W> {
    fn scan_report(&mut self, report: &ScanReport) -> io::Result<()> {
        writeln!(self.out)?;
        let mut hosts = report.hosts.clone();
        hosts.sort_by_key(|host| host.address);
        for host in &hosts {
            let name = host.hostname.as_deref().unwrap_or("(unknown)");
            let line = format!(
                "  {:<16} {:>8}  {}",
                host.address,
                format!("{:.1}ms", host.latency_ms),
                name
            );
            self.line(&line)?;
        }
        let status = if report.completed {
            self.paint("complete", Color::Green)
        } else {
            self.paint("cancelled", Color::Yellow)
        };
        self.line(&format!(
            "Scan {status}: {} of {} addresses scanned, {} hosts found in {}",
            report.scanned,
            report.total,
            hosts.len(),
            format_runtime(report.elapsed)
        ))
    }
}

impl<W: Write> ListenObserver for Console<W> {
    fn on_packet(&mut self, packet: &ReceivedPacket, bytes: usize) {
        let kind = describe(&packet.packet);
        let line = format!(
            "{}: {} ttl={} bytes={bytes} {kind}",
            Local::now().format("%H:%M:%S%.3f"),
            self.paint(packet.source, Color::Cyan),
            packet.ttl
        );
        let result = self.line(&line);
        Self::log_failure(result);
    }

    fn on_malformed(&mut self, error: &DecodeError) {
        let line = self.paint(format!("Malformed packet: {error}"), Color::Yellow);
        let result = self.line(&line);
        Self::log_failure(result);
    }

    fn on_error(&mut self, error: &io::Error) {
        let line = self.paint(format!("Receive failed: {error}"), Color::Red);
        let result = self.line(&line);
        Self::log_failure(result);
    }
}

fn describe(packet: &IcmpPacket) -> String {
    format!(
        "type={} [{}:{}]",
        type_name(packet.icmp_type),
        packet.icmp_type,
        packet.code
    )
}

fn latency_color(rtt_ms: f64) -> Color {
    if rtt_ms < 100.0 {
        Color::Green
    } else if rtt_ms < 250.0 {
        Color::Yellow
    } else {
        Color::Red
    }
}

fn format_time(ms: Option<f64>) -> String {
    match ms {
        Some(ms) => format!("{ms:.1}ms"),
        None => "-".to_string(),
    }
}

fn format_local(time: DateTime<Utc>) -> String {
    time.with_timezone(&Local)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

fn format_runtime(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!(
        "{:02}:{:02}:{:02}.{:03}",
        secs / 3600,
        (secs / 60) % 60,
        secs % 60,
        duration.subsec_millis()
    )
}

fn rate(count: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        count as f64 / secs
    } else {
        0.0
    }
}
