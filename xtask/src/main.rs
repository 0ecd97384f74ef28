//! Workspace chores for mycat-driver.
//!
//! `cargo xtask ci` runs the same gate as the CI pipeline; the other
//! commands run one step of it.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use xshell::{Shell, cmd};

#[derive(Parser)]
#[command(name = "xtask", about = "Workspace chores for mycat-driver")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Format check, clippy, tests and docs, in that order
    Ci,
    /// Check formatting
    Fmt,
    /// Lint every target with warnings denied
    Clippy,
    /// Run the workspace tests
    Test,
    /// Build docs with rustdoc warnings denied
    Doc,
    /// Build the fuzz targets, or run one for a while
    Fuzz {
        /// Target to run (decode_packet, decode_message, connection_string)
        #[arg(long)]
        run: Option<String>,
        /// Seconds to run the target for
        #[arg(long, default_value_t = 60)]
        seconds: u32,
    },
    /// Remove build artifacts
    Clean,
}

const FUZZ_TARGETS: [&str; 3] = ["decode_packet", "decode_message", "connection_string"];

#[derive(Clone, Copy)]
enum Step {
    Fmt,
    Clippy,
    Test,
    Doc,
}

impl Step {
    const CI: [Step; 4] = [Step::Fmt, Step::Clippy, Step::Test, Step::Doc];

    fn name(self) -> &'static str {
        match self {
            Step::Fmt => "fmt",
            Step::Clippy => "clippy",
            Step::Test => "test",
            Step::Doc => "doc",
        }
    }

    fn run(self, sh: &Shell) -> Result<()> {
        println!("==> {}", self.name());
        match self {
            Step::Fmt => cmd!(sh, "cargo fmt --all -- --check").run()?,
            Step::Clippy => {
                cmd!(sh, "cargo clippy --workspace --all-features --all-targets -- -D warnings")
                    .run()?;
            }
            Step::Test => cmd!(sh, "cargo test --workspace --all-features").run()?,
            Step::Doc => {
                let _flags = sh.push_env("RUSTDOCFLAGS", "-D warnings");
                cmd!(sh, "cargo doc --workspace --no-deps").run()?;
            }
        }
        Ok(())
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let sh = Shell::new()?;
    sh.change_dir(workspace_root()?);

    match cli.command {
        Command::Ci => {
            for step in Step::CI {
                step.run(&sh)
                    .with_context(|| format!("ci step `{}` failed", step.name()))?;
            }
            println!("ci passed");
        }
        Command::Fmt => Step::Fmt.run(&sh)?,
        Command::Clippy => Step::Clippy.run(&sh)?,
        Command::Test => Step::Test.run(&sh)?,
        Command::Doc => Step::Doc.run(&sh)?,
        Command::Fuzz { run, seconds } => fuzz(&sh, run.as_deref(), seconds)?,
        Command::Clean => cmd!(sh, "cargo clean").run()?,
    }
    Ok(())
}

fn workspace_root() -> Result<PathBuf> {
    let output = std::process::Command::new("cargo")
        .args(["locate-project", "--workspace", "--message-format=plain"])
        .output()
        .context("failed to run cargo locate-project")?;
    let manifest = String::from_utf8(output.stdout).context("cargo printed non-UTF-8 path")?;
    PathBuf::from(manifest.trim())
        .parent()
        .map(PathBuf::from)
        .context("workspace manifest has no parent directory")
}

/// Fuzzing needs cargo-fuzz and a nightly toolchain.
fn fuzz(sh: &Shell, target: Option<&str>, seconds: u32) -> Result<()> {
    let _dir = sh.push_dir("fuzz");
    let Some(target) = target else {
        println!("==> fuzz build");
        cmd!(sh, "cargo +nightly fuzz build").run()?;
        return Ok(());
    };
    if !FUZZ_TARGETS.contains(&target) {
        bail!(
            "unknown fuzz target `{target}`; expected one of {}",
            FUZZ_TARGETS.join(", ")
        );
    }
    println!("==> fuzz run {target} ({seconds}s)");
    let limit = format!("-max_total_time={seconds}");
    cmd!(sh, "cargo +nightly fuzz run {target} -- {limit}").run()?;
    Ok(())
}
