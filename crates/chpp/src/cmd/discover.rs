use crate::cmd::{DiscoverArgs, Session, Settings};
use crate::exit::{app_error, CliResult, SUCCESS};
use crate::output::{now_unix_seconds, print_discovery, DiscoveryOutput, OutputFormat};

pub fn run(args: DiscoverArgs, format: OutputFormat, settings: &Settings) -> CliResult<i32> {
    let session = Session::connect(&args.path, settings)?;
    let result = session.app.discover();
    session.shutdown();
    let services = result.map_err(|err| app_error("discovery failed", err))?;

    let out = DiscoveryOutput {
        schema_id: "https://schemas.3leaps.dev/chpp/cli/v1/discovery.schema.json",
        socket: args.path.display().to_string(),
        services: &services,
        timestamp: now_unix_seconds(),
    };
    print_discovery(&out, format);
    Ok(SUCCESS)
}
