//! CLI argument parsing for the upgrade helper.
use clap::Parser;
use std::path::PathBuf;

/// Root CLI entrypoint.
#[derive(Parser, Debug)]
#[command(
    name = "auh",
    version,
    about = "Upgrade recipes to newer upstream versions and rebuild them",
    after_help = "Examples:\n  auh foo -t 1.2        Upgrade foo to 1.2\n  auh foo bar           Upgrade foo and bar to the latest upstream versions\n  auh all               Upgrade every recipe with a newer upstream version"
)]
pub struct RootArgs {
    /// Recipes to upgrade, or `all` for every recipe with a newer upstream
    #[arg(value_name = "PACKAGE", required_unless_present = "write_config")]
    pub packages: Vec<String>,

    /// Version to upgrade to (single package only)
    #[arg(short = 't', long, value_name = "VERSION")]
    pub to_version: Option<String>,

    /// Do not ask questions; take the default answer everywhere
    #[arg(short = 'a', long)]
    pub auto: bool,

    /// Stop after fetching the new version
    #[arg(short = 's', long)]
    pub skip_compilation: bool,

    /// Config file (defaults to <build-dir>/upgrade-helper/config.json)
    #[arg(short = 'c', long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Build directory holding conf/ and tmp/
    #[arg(long, value_name = "DIR", env = "BUILDDIR")]
    pub build_dir: Option<PathBuf>,

    /// Log verbosity: 1 error, 2 warn, 3 info, 4 debug, 5 trace
    #[arg(
        short = 'd',
        long,
        value_name = "LEVEL",
        default_value_t = 3,
        value_parser = clap::value_parser!(u8).range(1..=5)
    )]
    pub debug_level: u8,

    /// Emit the run summary as JSON
    #[arg(long)]
    pub json: bool,

    /// Write the effective configuration to the build directory and exit
    #[arg(long)]
    pub write_config: bool,
}
