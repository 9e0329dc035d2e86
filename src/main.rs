use anyhow::Context;
use clap::Parser;
use poc_notebook::adapters::{ExportBundleRepository, ExportBundleSettings, LocalStorage, LogCache};
use poc_notebook::app::pipelines::{
    lint_notebook_file, MergePipeline, NotebookPaths, NotebookPipeline,
};
use poc_notebook::config::{Cli, Command, LogFormat, NotebookConfig};
use poc_notebook::core::generator::GeneratorOptions;
use poc_notebook::core::inputs::render_unresolved;
use poc_notebook::domain::logs::{parse_timestamp, LogQuery};
use poc_notebook::utils::error::NotebookError;
use poc_notebook::utils::logger;
use poc_notebook::PipelineEngine;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.log_format {
        LogFormat::Compact => logger::init_cli_logger(cli.verbose),
        LogFormat::Json => logger::init_json_logger(),
    }
    tracing::info!("Starting poc-notebook");
    if cli.verbose {
        tracing::debug!("CLI arguments: {:?}", cli);
    }

    if let Err(e) = run(cli).await {
        let Some(error) = e.downcast_ref::<NotebookError>() else {
            tracing::error!("❌ {:#}", e);
            eprintln!("❌ {:#}", e);
            std::process::exit(1);
        };
        report(error);

        let exit_code = error.severity().exit_code();
        if exit_code > 0 {
            std::process::exit(exit_code);
        }
    }

    Ok(())
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = cli.load_config()?;
    if config.monitoring.enabled {
        tracing::info!("🔍 System monitoring enabled");
    }
    let storage = LocalStorage::new(cli.root.clone());

    match &cli.command {
        Command::Generate { dry_run, .. } => {
            let pipeline = notebook_pipeline(storage, &config)?.with_dry_run(*dry_run);
            let engine = PipelineEngine::new_with_monitoring(pipeline, config.monitoring.enabled);
            let output = engine.run().await?;
            if *dry_run {
                println!("🧪 Dry run: {} was not written", output);
            } else {
                println!("✅ Notebook written to {}", output);
            }
        }
        Command::Check { .. } => {
            let resolved = notebook_pipeline(storage, &config)?.check().await?;
            println!(
                "✅ Inputs resolved: {} dataset(s) from {}",
                resolved.datasets.len(),
                resolved.schema_path
            );
        }
        Command::Lint {
            notebook, baseline, ..
        } => {
            let path = notebook.clone().unwrap_or(config.output.notebook.clone());
            let violations = lint_notebook_file(
                &storage,
                &path,
                baseline.as_deref(),
                config.header_language()?,
            )
            .await
            .with_context(|| format!("failed to lint {}", path))?;

            if !violations.is_empty() {
                for violation in &violations {
                    println!("{}: {}", path, violation);
                }
                return Err(NotebookError::HeaderViolations { violations }.into());
            }
            println!("✅ {}: every checked code cell has a valid header", path);
        }
        Command::Merge {
            contract_ids,
            start,
            end,
            format,
            output,
            ..
        } => {
            let query = LogQuery {
                contract_ids: contract_ids.clone(),
                start: timestamp_arg("start", start)?,
                end: end.as_deref().map(|end| timestamp_arg("end", end)).transpose()?,
            };
            let mut repository = ExportBundleRepository::new(ExportBundleSettings::from_config(
                &cli.root,
                &config.logs,
            ));
            if config.logs.cache_enabled {
                repository = repository.with_cache(LogCache::new(cli.root.join(&config.logs.cache_dir)));
            }

            let pipeline = MergePipeline::new(repository, storage, query)
                .with_format(*format)
                .with_output(output.clone());
            let engine = PipelineEngine::new_with_monitoring(pipeline, config.monitoring.enabled);
            let written = engine.run().await?;
            if output.is_some() {
                println!("✅ Merged logs written to {}", written);
            }
        }
    }

    Ok(())
}

fn notebook_pipeline(
    storage: LocalStorage,
    config: &NotebookConfig,
) -> anyhow::Result<NotebookPipeline<LocalStorage>> {
    let paths = NotebookPaths {
        schema: config.inputs.schema.clone(),
        plan: config.inputs.plan.clone(),
        output: config.output.notebook.clone(),
    };
    let options = GeneratorOptions {
        language: config.header_language()?,
        data_dir: config.notebook.data_dir.clone(),
        na_tokens: config.notebook.na_tokens.clone(),
        kernel_name: config.notebook.kernel_name.clone(),
        kernel_display_name: config.notebook.kernel_display_name.clone(),
        python_version: config.notebook.python_version.clone(),
    };
    Ok(NotebookPipeline::new(storage, paths, options))
}

fn timestamp_arg(field: &str, value: &str) -> Result<chrono::NaiveDateTime, NotebookError> {
    parse_timestamp(value).ok_or_else(|| NotebookError::InvalidConfigValueError {
        field: field.to_string(),
        value: value.to_string(),
        reason: "expected YYYY-MM-DD or YYYY-MM-DD HH:MM:SS".to_string(),
    })
}

fn report(error: &NotebookError) {
    tracing::error!(
        "❌ {} (Category: {:?}, Severity: {:?})",
        error,
        error.category(),
        error.severity()
    );

    if let NotebookError::UnresolvedInputs { items } = error {
        println!("Unresolved items:");
        print!("{}", render_unresolved(items));
    }

    eprintln!("❌ {}", error.user_friendly_message());
    eprintln!("💡 {}", error.recovery_suggestion());
}
