//! Binary entrypoint that launches the Eureka conversation server.

use std::process::ExitCode;

use eureka::start_eureka;

/// Start the server with configuration read from the environment.
fn main() -> ExitCode {
    start_eureka::run()
}
