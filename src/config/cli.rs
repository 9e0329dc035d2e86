use crate::app::pipelines::OutputFormat;
use crate::config::env::load_env_file;
use crate::config::toml_config::{NotebookConfig, DEFAULT_CONFIG_FILE};
use crate::utils::error::Result;
use crate::utils::validation::Validate;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(name = "poc-notebook")]
#[command(about = "Generate a reproducible PoC notebook from a DBML schema and a plan")]
pub struct Cli {
    /// Project root; every relative path is resolved against it
    #[arg(long, global = true, default_value = ".")]
    pub root: PathBuf,

    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    pub config: String,

    #[arg(long, global = true, default_value = ".env")]
    pub env_file: String,

    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Compact)]
    pub log_format: LogFormat,

    #[arg(long, global = true, help = "Log CPU and memory usage per phase")]
    pub monitor: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Compact,
    Json,
}

#[derive(Debug, Clone, Default, Args)]
pub struct InputArgs {
    #[arg(long)]
    pub schema: Option<String>,

    #[arg(long)]
    pub plan: Option<String>,

    /// Header language: ja or en
    #[arg(long)]
    pub language: Option<String>,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Generate the notebook, or list what blocks generation
    Generate {
        #[command(flatten)]
        inputs: InputArgs,

        #[arg(long)]
        output: Option<String>,

        /// Resolve and generate without writing the file
        #[arg(long)]
        dry_run: bool,
    },
    /// Only check that the inputs are complete and unambiguous
    Check {
        #[command(flatten)]
        inputs: InputArgs,
    },
    /// Check the WHAT/WHY/CHECK header of code cells
    Lint {
        /// Notebook to lint (defaults to the configured output)
        notebook: Option<String>,

        /// Earlier version of the notebook; only cells added since are checked
        #[arg(long)]
        baseline: Option<String>,

        #[arg(long)]
        language: Option<String>,
    },
    /// Match state changes to remote operations from the latest export
    Merge {
        #[arg(long, value_delimiter = ',', required = true)]
        contract_ids: Vec<String>,

        #[arg(long)]
        start: String,

        #[arg(long)]
        end: Option<String>,

        #[arg(long, value_enum, default_value_t = OutputFormat::Csv)]
        format: OutputFormat,

        /// Output file; stdout when omitted
        #[arg(long)]
        output: Option<String>,

        #[arg(long)]
        tolerance_minutes: Option<u64>,

        #[arg(long)]
        no_cache: bool,
    },
}

impl Cli {
    /// `.env`, then the TOML file, then environment overrides, then flags.
    pub fn load_config(&self) -> Result<NotebookConfig> {
        self.load_config_with(|key| std::env::var(key).ok())
    }

    pub fn load_config_with<F>(&self, lookup: F) -> Result<NotebookConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        let loaded = load_env_file(&self.root.join(&self.env_file))?;
        if !loaded.is_empty() {
            tracing::debug!("Loaded {} variable(s) from {}", loaded.len(), self.env_file);
        }

        let mut config = NotebookConfig::load_or_default(self.root.join(&self.config))?;
        config.logs.apply_overrides(lookup)?;
        config.monitoring.enabled |= self.monitor;

        match &self.command {
            Command::Generate { inputs, output, .. } => {
                inputs.apply(&mut config);
                if let Some(output) = output {
                    config.output.notebook = output.clone();
                }
            }
            Command::Check { inputs } => inputs.apply(&mut config),
            Command::Lint { language, .. } => {
                if let Some(language) = language {
                    config.notebook.header_language = language.clone();
                }
            }
            Command::Merge {
                tolerance_minutes,
                no_cache,
                ..
            } => {
                if let Some(minutes) = tolerance_minutes {
                    config.logs.tolerance_minutes = *minutes;
                }
                if *no_cache {
                    config.logs.cache_enabled = false;
                }
            }
        }

        config.validate()?;
        Ok(config)
    }
}

impl InputArgs {
    fn apply(&self, config: &mut NotebookConfig) {
        if let Some(schema) = &self.schema {
            config.inputs.schema = schema.clone();
        }
        if let Some(plan) = &self.plan {
            config.inputs.plan = plan.clone();
        }
        if let Some(language) = &self.language {
            config.notebook.header_language = language.clone();
        }
    }
}
