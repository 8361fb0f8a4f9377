use std::process::ExitCode;

use procweb::dispatch::StaticOnly;

fn main() -> ExitCode {
    procweb::server::launch(StaticOnly)
}
