use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

/// Version of the packet format spoken on the link.
const WIRE_VERSION: u8 = 1;

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("chpp {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: chpp");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!("wire_version: {WIRE_VERSION}");
    println!(
        "build_target: {}",
        option_env!("CHPP_BUILD_TARGET").unwrap_or("unknown")
    );
    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);
    println!("git_hash: {}", option_env!("GIT_HASH").unwrap_or("unknown"));
    println!("features: app={}, cli=true", cfg!(feature = "app"));
    println!(
        "transport_defaults: mtu={}, queue={}, retries={}",
        chpp_transport::DEFAULT_MTU,
        chpp_transport::config::DEFAULT_QUEUE_CAPACITY,
        chpp_transport::config::DEFAULT_MAX_RETRIES
    );

    Ok(SUCCESS)
}
