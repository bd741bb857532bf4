// Entrypoint for the CLI application.
// - Keeps `main` small: parse, set up logging, run one command, exit with its
//   code.
// - All expected failures are rendered by the router; only internal defects
//   reach the `anyhow` error path.

use anyhow::Context;
use pyencrypt_client::{logger, router};
use std::io::Write;

fn main() -> anyhow::Result<()> {
    let code = match router::parse(std::env::args_os()) {
        Ok(cli) => {
            logger::init(cli.verbose);
            router::execute(cli)
        }
        Err(code) => code,
    };

    // `process::exit` skips destructors, so flush buffered output first.
    std::io::stdout().flush().context("Failed to flush stdout")?;
    std::process::exit(code);
}
