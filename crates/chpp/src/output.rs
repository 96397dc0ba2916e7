use std::io::IsTerminal;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chpp_app::handle::handle_name;
use chpp_app::DiscoveredService;
use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
pub struct DiscoveryOutput<'a> {
    pub schema_id: &'static str,
    pub socket: String,
    pub services: &'a [DiscoveredService],
    pub timestamp: String,
}

pub fn print_discovery(out: &DiscoveryOutput<'_>, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(out),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["HANDLE", "NAME", "VERSION", "UUID"]);
            for service in out.services {
                table.add_row(vec![
                    format!("{:#04x}", service.handle),
                    service.descriptor.name.clone(),
                    service.descriptor.version.to_string(),
                    service.descriptor.uuid.to_string(),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!("Services on {}:", out.socket);
            if out.services.is_empty() {
                println!("  (none registered)");
            }
            for service in out.services {
                println!(
                    "  {:#04x} ({}) {} v{} {}",
                    service.handle,
                    handle_name(service.handle),
                    service.descriptor.name,
                    service.descriptor.version,
                    service.descriptor.uuid
                );
            }
        }
    }
}

#[derive(Serialize)]
pub struct LoopbackOutput {
    pub schema_id: &'static str,
    pub socket: String,
    pub payload_size: usize,
    pub count: usize,
    pub rtt_min_us: u64,
    pub rtt_avg_us: u64,
    pub rtt_max_us: u64,
    pub timestamp: String,
}

impl LoopbackOutput {
    pub fn from_rtts(socket: String, payload_size: usize, rtts: &[Duration]) -> Self {
        let micros = |d: &Duration| u64::try_from(d.as_micros()).unwrap_or(u64::MAX);
        let total: u64 = rtts.iter().map(micros).fold(0, u64::saturating_add);
        let count = rtts.len();
        Self {
            schema_id: "https://schemas.3leaps.dev/chpp/cli/v1/loopback-report.schema.json",
            socket,
            payload_size,
            count,
            rtt_min_us: rtts.iter().map(micros).min().unwrap_or(0),
            rtt_avg_us: if count == 0 { 0 } else { total / count as u64 },
            rtt_max_us: rtts.iter().map(micros).max().unwrap_or(0),
            timestamp: now_unix_seconds(),
        }
    }
}

pub fn print_loopback(out: &LoopbackOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(out),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["SIZE", "COUNT", "RTT MIN", "RTT AVG", "RTT MAX"])
                .add_row(vec![
                    out.payload_size.to_string(),
                    out.count.to_string(),
                    format!("{}us", out.rtt_min_us),
                    format!("{}us", out.rtt_avg_us),
                    format!("{}us", out.rtt_max_us),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "loopback size={} count={} rtt min/avg/max = {}/{}/{} us",
                out.payload_size, out.count, out.rtt_min_us, out.rtt_avg_us, out.rtt_max_us
            );
        }
    }
}

#[derive(Serialize)]
pub struct TimesyncOutput {
    pub schema_id: &'static str,
    pub socket: String,
    pub remote_time_ns: u64,
    pub offset_ns: i64,
    pub rtt_us: u64,
}

pub fn print_timesync(out: &TimesyncOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(out),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["REMOTE TIME (ns)", "OFFSET (ns)", "RTT"])
                .add_row(vec![
                    out.remote_time_ns.to_string(),
                    out.offset_ns.to_string(),
                    format!("{}us", out.rtt_us),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!("Timesync with {}:", out.socket);
            println!("  Remote time: {} ns", out.remote_time_ns);
            println!("  Offset:      {} ns", out.offset_ns);
            println!("  RTT:         {} us", out.rtt_us);
        }
    }
}

fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

pub fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_summary_aggregates_rtts() {
        let rtts = [
            Duration::from_micros(100),
            Duration::from_micros(300),
            Duration::from_micros(200),
        ];
        let out = LoopbackOutput::from_rtts("/tmp/x.sock".to_string(), 64, &rtts);
        assert_eq!(out.count, 3);
        assert_eq!(out.rtt_min_us, 100);
        assert_eq!(out.rtt_avg_us, 200);
        assert_eq!(out.rtt_max_us, 300);
    }

    #[test]
    fn empty_loopback_summary_is_zero() {
        let out = LoopbackOutput::from_rtts(String::new(), 1, &[]);
        assert_eq!((out.count, out.rtt_avg_us), (0, 0));
    }
}
