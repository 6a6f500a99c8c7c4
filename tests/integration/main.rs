//! Uses the single integration test approach.
//!
//! This improves parallelism when running the tests, and reduces the number of binaries that have to be built (and linked)

mod common;
mod host_agent;

use common::{Workspace, run_agent};

#[test]
fn help_succeeds() {
    let workspace = Workspace::new();
    let output = run_agent(&workspace, &["--help"]);
    assert!(output.status.success(), "--help failed: {output:?}");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("dispatch"), "help lists subcommands:\n{stdout}");
}

#[test]
fn version_succeeds() {
    let workspace = Workspace::new();
    let output = run_agent(&workspace, &["--version"]);
    assert!(output.status.success(), "--version failed: {output:?}");
}
