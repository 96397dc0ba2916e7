use crate::cmd::{LoopbackArgs, Session, Settings};
use crate::exit::{app_error, CliResult, SUCCESS};
use crate::output::{print_loopback, LoopbackOutput, OutputFormat};

pub fn run(args: LoopbackArgs, format: OutputFormat, settings: &Settings) -> CliResult<i32> {
    let payload = pattern(args.size);
    let session = Session::connect(&args.path, settings)?;

    let mut rtts = Vec::with_capacity(args.count);
    let mut failure = None;
    for round in 0..args.count {
        match session.app.loopback(&payload) {
            Ok(result) => {
                tracing::debug!(round, rtt_us = result.rtt.as_micros() as u64, "loopback ok");
                rtts.push(result.rtt);
            }
            Err(err) => {
                failure = Some(err);
                break;
            }
        }
    }
    session.shutdown();

    if let Some(err) = failure {
        return Err(app_error("loopback failed", err));
    }
    let out = LoopbackOutput::from_rtts(args.path.display().to_string(), args.size, &rtts);
    print_loopback(&out, format);
    Ok(SUCCESS)
}

/// Deterministic payload with a prime period, so adjacent fragments differ.
fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
