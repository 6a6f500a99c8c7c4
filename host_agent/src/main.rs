//! Shim binary that calls into the `host_agent` library's `inner_main`.

use clap::Parser as _;
use eyre::Result;

use wsgi_provision_host_agent::{Cli, inner_main};

fn main() -> Result<()> {
    inner_main(Cli::parse())
}
