//! LogForward CLI - validate forwarding requests and generate collector config
//!
//! Commands: templates, validate, generate
//! Outputs JSON (or raw config text) to stdout, logs to stderr
//! Returns 2 when entities were degraded or dropped, 1 on hard errors

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::error;
use tracing_subscriber::EnvFilter;

use logforward_core::{
    ForwardingCompiler, ForwardingRequest, MountedSecrets, SecretLookup, StaticSecrets,
    TemplateRegistry,
};

#[derive(Parser)]
#[command(name = "logforward-cli")]
#[command(about = "LogForward CLI - Log Forwarding Compiler")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List available templates
    Templates,

    /// Validate a forwarding request and print the normalized spec and status
    Validate {
        #[command(flatten)]
        input: InputArgs,
    },

    /// Generate collector configuration
    Generate {
        #[command(flatten)]
        input: InputArgs,

        /// Print the full compile result as JSON instead of the config text
        #[arg(long)]
        json: bool,
    },
}

#[derive(clap::Args)]
struct InputArgs {
    /// Request document (YAML, or JSON when the extension is .json)
    #[arg(short, long)]
    request: PathBuf,

    /// Secret known to exist (repeatable)
    #[arg(short, long = "secret")]
    secrets: Vec<String>,

    /// Look secrets up as directories under this path instead
    #[arg(long, conflicts_with = "secrets")]
    secrets_dir: Option<PathBuf>,
}

impl InputArgs {
    fn secret_lookup(&self) -> Box<dyn SecretLookup> {
        match &self.secrets_dir {
            Some(dir) => Box::new(MountedSecrets::new(dir.clone())),
            None => Box::new(StaticSecrets::new(self.secrets.iter().cloned())),
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_json(value: &impl serde::Serialize) -> ExitCode {
    match serde_json::to_string_pretty(value) {
        Ok(text) => {
            println!("{}", text);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Failed to serialize output");
            ExitCode::FAILURE
        }
    }
}

fn load(input: &InputArgs) -> Result<ForwardingRequest, ExitCode> {
    ForwardingRequest::from_path(&input.request).map_err(|e| {
        error!(error = %e, "Failed to load request");
        ExitCode::FAILURE
    })
}

fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();

    let compiler = ForwardingCompiler::new(TemplateRegistry::builtin());

    match cli.command {
        Commands::Templates => {
            let templates: Vec<_> = compiler.registry().list()
                .iter()
                .map(|t| serde_json::json!({
                    "name": t.name,
                    "description": t.description,
                }))
                .collect();
            print_json(&templates)
        }

        Commands::Validate { input } => {
            let request = match load(&input) {
                Ok(r) => r,
                Err(code) => return code,
            };

            match compiler.normalize(&request, input.secret_lookup().as_ref()) {
                Ok(normalized) => {
                    let code = print_json(&normalized);
                    if code == ExitCode::SUCCESS && !normalized.status.all_accepted() {
                        ExitCode::from(2)
                    } else {
                        code
                    }
                }
                Err(e) => {
                    error!(error = %e, "Validation aborted");
                    if let Some(status) = e.status() {
                        print_json(status);
                    }
                    ExitCode::FAILURE
                }
            }
        }

        Commands::Generate { input, json } => {
            let request = match load(&input) {
                Ok(r) => r,
                Err(code) => return code,
            };

            match compiler.compile(&request, input.secret_lookup().as_ref()) {
                Ok(compiled) if json => print_json(&compiled),
                Ok(compiled) => {
                    print!("{}", compiled.config);
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    error!(error = %e, "Generation failed");
                    ExitCode::FAILURE
                }
            }
        }
    }
}
