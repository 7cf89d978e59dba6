use anyhow::Result;
use clap::Parser;
use portsys::cmd::{self, Args};

/// `anyhow` prints a nicely formatted error message with `Debug`, so we
/// can return a result from the `main` function.
fn main() -> Result<()> {
    let args = Args::parse();
    cmd::init_logger(args.log_level);
    cmd::run(args)
}
