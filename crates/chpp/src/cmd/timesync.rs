use crate::cmd::{Session, Settings, TimesyncArgs};
use crate::exit::{app_error, CliResult, SUCCESS};
use crate::output::{print_timesync, OutputFormat, TimesyncOutput};

pub fn run(args: TimesyncArgs, format: OutputFormat, settings: &Settings) -> CliResult<i32> {
    let session = Session::connect(&args.path, settings)?;
    let result = session.app.timesync();
    session.shutdown();
    let result = result.map_err(|err| app_error("timesync failed", err))?;

    let out = TimesyncOutput {
        schema_id: "https://schemas.3leaps.dev/chpp/cli/v1/timesync.schema.json",
        socket: args.path.display().to_string(),
        remote_time_ns: result.remote_time_ns,
        offset_ns: result.offset_ns,
        rtt_us: u64::try_from(result.rtt.as_micros()).unwrap_or(u64::MAX),
    };
    print_timesync(&out, format);
    Ok(SUCCESS)
}
