use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("ctlwire {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: ctlwire");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!(
        "target: {}",
        option_env!("CTLWIRE_BUILD_TARGET").unwrap_or("unknown")
    );
    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);
    println!("line_length: {}", ctlwire_line::LINE_LENGTH);
    println!("max_pending_fds: {}", ctlwire_transport::MAX_PENDING_FDS);
    println!(
        "debug_env: {} full_logging_env: {}",
        ctlwire_peer::DEBUG_ENV,
        ctlwire_peer::FULL_LOGGING_ENV
    );

    Ok(SUCCESS)
}
