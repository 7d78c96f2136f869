use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use trellis::config::{self, ConfigInputs};
use trellis::{App, audit, logging, output};

#[derive(Parser)]
#[command(name = "trellis")]
#[command(about = "Config resolution and static asset builds for web apps")]
#[command(long_about = "\
Config resolution and static asset builds for web apps

Params are read from, highest priority first: framework flags after `--`,
environment variables, trellis.json, and [package.metadata.trellis] in
Cargo.toml. Every param has a default.

App layout (defaults):

  my-app/
  ├── Cargo.toml                  # [package.metadata.trellis] params
  ├── trellis.json                # params (override Cargo.toml)
  ├── statics/
  │   ├── css/                    # → public/css/ (@imports inlined)
  │   ├── js/                     # → public/js/
  │   └── pages/                  # → public/
  ├── mvc/
  │   ├── controllers/            # → public/js/controllers/<bundle>.js
  │   ├── models/
  │   └── views/                  # → public/js/views/<bundle>.js
  ├── public/                     # build output
  └── .build/.build-manifest.json

Examples:

  trellis build -- --dev
  trellis build --app-dir ../shop -- --statics-only --http-port 8080
  trellis audit")]
#[command(version)]
struct Cli {
    /// App directory
    #[arg(long, default_value = ".", global = true)]
    app_dir: PathBuf,

    /// Debug logging (RUST_LOG takes precedence)
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compile statics, bundles and symlinks into the public folder
    Build {
        /// Framework flags, e.g. `--dev`, `--http-port 8080`, `-dha`
        #[arg(last = true)]
        flags: Vec<String>,
    },
    /// Check trellis.json and Cargo.toml for unknown, renamed or mistyped params
    Audit,
    /// Print the resolved params
    Config {
        /// Framework flags, as for `build`
        #[arg(last = true)]
        flags: Vec<String>,
    },
}

fn main() -> ExitCode {
    let mut cli = Cli::parse();
    logging::init(cli.verbose);
    if let Ok(dir) = cli.app_dir.canonicalize() {
        cli.app_dir = dir;
    }
    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode, Box<dyn std::error::Error>> {
    match cli.command {
        Command::Build { flags } => {
            let app = App::new(ConfigInputs::load(&cli.app_dir).with_args(flags))?;
            init_thread_pool(&app.config().params);
            app.prepare()?;
            let report = app.build()?;
            output::print_build_report(&report, app.config().app_dir());
            Ok(if report.is_ok() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Command::Audit => {
            let report = audit::audit_app(&cli.app_dir);
            output::print_audit_report(&report);
            Ok(if report.is_clean() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Command::Config { flags } => {
            let resolved = config::resolve(&ConfigInputs::load(&cli.app_dir).with_args(flags))?;
            output::print_config(&resolved);
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Size the rayon pool from `maxBuildThreads`.
///
/// Capped at the number of cores: the config can lower it, not raise it.
fn init_thread_pool(params: &config::AppConfig) {
    let threads = config::effective_threads(params);
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .ok();
}
