//! CLI subcommand handlers.

use crate::Commands;
use anyhow::{Context, bail};
use mltrack_core::data::{CsvLoader, LoaderRegistry};
use mltrack_core::models::{Hyperparams, ModelRegistry};
use mltrack_core::{
    ArtifactStorage, FailurePolicy, MlflowClient, MltrackConfig, ModelOutcome, PipelineConfig,
    PipelineReport, TrackingClient, TrainingPipeline,
};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

/// Exit status when the pipeline finished but at least one model failed.
const PARTIAL_FAILURE: u8 = 2;

#[derive(clap::Args, Debug)]
pub struct TrainArgs {
    /// MLflow experiment name
    #[arg(long, default_value = "Iris Classification")]
    experiment_name: String,

    /// Dataset to load (see `mltrack datasets`)
    #[arg(long, visible_alias = "dataset")]
    loader: Option<String>,

    /// Models to train, in order (default: every registered model)
    #[arg(long, num_args = 1.., value_delimiter = ',')]
    models: Vec<String>,

    /// Fraction of rows held out for evaluation
    #[arg(long, default_value_t = 0.2)]
    test_size: f64,

    /// Seed for the train/test split
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Draw the split seed from OS entropy
    #[arg(long, conflicts_with = "seed")]
    no_seed: bool,

    /// Stop at the first model that fails
    #[arg(long)]
    fail_fast: bool,

    /// Skip uploading fitted models as run artifacts
    #[arg(long)]
    no_log_model: bool,

    /// Copy fitted models to the data bucket
    #[arg(long)]
    persist_models: bool,

    /// Upload the train/test split to the data bucket
    #[arg(long)]
    persist_split: bool,

    /// Train on a CSV file, registered under its file stem
    #[arg(long, requires = "label_column")]
    csv: Option<PathBuf>,

    /// Column of the CSV file holding class names
    #[arg(long)]
    label_column: Option<String>,

    /// Hyperparameter override; the value is parsed as JSON, else taken as a string
    #[arg(long = "param", value_name = "MODEL.KEY=VALUE")]
    params: Vec<String>,

    /// Override MLFLOW_TRACKING_URI
    #[arg(long)]
    tracking_uri: Option<String>,

    /// Print the report as JSON on stdout
    #[arg(long)]
    json: bool,
}

impl TrainArgs {
    /// Loader registry (built-ins plus the CSV file, if any) and pipeline settings.
    fn pipeline_config(&self) -> anyhow::Result<(LoaderRegistry, PipelineConfig)> {
        let mut loaders = LoaderRegistry::builtin().clone();
        let mut dataset = self.loader.clone();

        if let Some(path) = &self.csv {
            let label_column = self
                .label_column
                .as_deref()
                .context("--csv needs --label-column")?;
            let stem = path
                .file_stem()
                .and_then(|s| s.to_str())
                .filter(|s| !s.is_empty())
                .with_context(|| format!("cannot name a dataset after {}", path.display()))?
                .to_string();
            loaders.register(stem.clone(), Arc::new(CsvLoader::new(path, label_column)))?;
            dataset.get_or_insert(stem);
        }

        let mut hyperparams: BTreeMap<String, Hyperparams> = BTreeMap::new();
        for raw in &self.params {
            let (model, key, value) = parse_param(raw)?;
            hyperparams.entry(model).or_default().insert(&key, value);
        }

        let defaults = PipelineConfig::default();
        let config = PipelineConfig {
            dataset: dataset.unwrap_or(defaults.dataset),
            models: if self.models.is_empty() {
                defaults.models
            } else {
                self.models.clone()
            },
            test_size: self.test_size,
            random_seed: (!self.no_seed).then_some(self.seed),
            experiment_name: self.experiment_name.clone(),
            failure_policy: if self.fail_fast {
                FailurePolicy::FailFast
            } else {
                FailurePolicy::Continue
            },
            log_model: !self.no_log_model,
            persist_models: self.persist_models,
            persist_split: self.persist_split,
            hyperparams,
        };
        Ok((loaders, config))
    }
}

/// Split `model.key=value`. The value is JSON when it parses, a string otherwise.
fn parse_param(raw: &str) -> anyhow::Result<(String, String, Value)> {
    let Some((target, value)) = raw.split_once('=') else {
        bail!("invalid --param '{raw}': expected MODEL.KEY=VALUE");
    };
    let Some((model, key)) = target.split_once('.') else {
        bail!("invalid --param '{raw}': expected MODEL.KEY=VALUE");
    };
    let (model, key) = (model.trim(), key.trim());
    if model.is_empty() || key.is_empty() {
        bail!("invalid --param '{raw}': model and key must be non-empty");
    }
    let value = serde_json::from_str(value.trim()).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((model.to_string(), key.to_string(), value))
}

/// Handle a CLI subcommand.
pub async fn handle_command(command: Commands, config: MltrackConfig) -> anyhow::Result<ExitCode> {
    match command {
        Commands::Train(args) => handle_train(args, config).await,
        Commands::Models => {
            print!("{}", render_models(ModelRegistry::builtin()));
            Ok(ExitCode::SUCCESS)
        }
        Commands::Datasets => {
            print!("{}", render_datasets(LoaderRegistry::builtin()));
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn handle_train(args: TrainArgs, mut config: MltrackConfig) -> anyhow::Result<ExitCode> {
    if let Some(uri) = &args.tracking_uri {
        config.tracking_uri = Some(uri.clone());
    }
    let (loaders, pipeline_config) = args.pipeline_config()?;

    let tracker = MlflowClient::from_config(&config)?;
    let tracking_uri = tracker.tracking_uri().to_string();
    let mut pipeline = TrainingPipeline::new(Arc::new(tracker)).with_loaders(loaders);
    if pipeline_config.persist_models || pipeline_config.persist_split {
        pipeline = pipeline.with_storage(ArtifactStorage::from_config(&config)?);
    }

    let report = pipeline.run(&pipeline_config).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", render_report(&report));
        println!("\nView runs at {tracking_uri}");
    }

    Ok(exit_code(&report))
}

/// `0` when every model trained, [`PARTIAL_FAILURE`] otherwise.
fn exit_code(report: &PipelineReport) -> ExitCode {
    if report.all_succeeded() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(PARTIAL_FAILURE)
    }
}

fn render_report(report: &PipelineReport) -> String {
    let mut out = format!(
        "Experiment '{}' (id {}), dataset '{}': {} train / {} test rows\n",
        report.experiment_name, report.experiment_id, report.dataset, report.train_rows, report.test_rows
    );
    if let Some(key) = &report.split_key {
        out.push_str(&format!("Split stored at {key}\n"));
    }
    out.push('\n');

    let width = report
        .results
        .iter()
        .map(|r| r.model_name.len())
        .chain(std::iter::once("model".len()))
        .max()
        .unwrap_or_default();
    out.push_str(&format!(
        "{:<width$}  {:>8}  {:>9}  {:>8}  {:>8}  run / error\n",
        "model", "accuracy", "precision", "recall", "f1"
    ));
    for result in &report.results {
        match &result.outcome {
            ModelOutcome::Succeeded { metrics, .. } => {
                let metric = |key: &str| metrics.get(key).copied().unwrap_or_default();
                out.push_str(&format!(
                    "{:<width$}  {:>8.4}  {:>9.4}  {:>8.4}  {:>8.4}  {}\n",
                    result.model_name,
                    metric("accuracy"),
                    metric("precision"),
                    metric("recall"),
                    metric("f1_score"),
                    result.run_id.as_deref().unwrap_or("-"),
                ));
            }
            ModelOutcome::Failed { error } => {
                out.push_str(&format!(
                    "{:<width$}  {:>8}  {:>9}  {:>8}  {:>8}  FAILED: {error}\n",
                    result.model_name, "-", "-", "-", "-",
                ));
            }
        }
    }

    let failed = report.failed().count();
    out.push_str(&format!(
        "\n{} succeeded, {failed} failed\n",
        report.results.len() - failed
    ));
    out
}

fn render_models(registry: &ModelRegistry) -> String {
    let mut out = String::new();
    for entry in registry.iter() {
        let defaults = entry
            .defaults
            .to_params()
            .into_iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(", ");
        out.push_str(&format!("{:<20} {}\n{:<20} {defaults}\n", entry.name, entry.description, ""));
    }
    out
}

fn render_datasets(registry: &LoaderRegistry) -> String {
    registry
        .iter()
        .map(|(name, loader)| format!("{name:<12} {}\n", loader.describe()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Cli;
    use clap::Parser;
    use mltrack_core::ModelResult;
    use pretty_assertions::assert_eq;

    fn train_args(extra: &[&str]) -> TrainArgs {
        let argv = ["mltrack", "train"].into_iter().chain(extra.iter().copied());
        match Cli::try_parse_from(argv).unwrap().command {
            Commands::Train(args) => args,
            other => panic!("parsed {other:?}"),
        }
    }

    #[test]
    fn test_parse_param_values() {
        assert_eq!(
            parse_param("random_forest.max_depth=5").unwrap(),
            ("random_forest".into(), "max_depth".into(), Value::from(5))
        );
        assert_eq!(
            parse_param("svm_rbf.gamma=scale").unwrap(),
            ("svm_rbf".into(), "gamma".into(), Value::from("scale"))
        );
        assert_eq!(
            parse_param("decision_tree.max_depth=null").unwrap().2,
            Value::Null
        );
        assert_eq!(parse_param("svm_rbf.c=0.5").unwrap().2, Value::from(0.5));
    }

    #[test]
    fn test_parse_param_rejects_malformed() {
        assert!(parse_param("max_depth=5").is_err());
        assert!(parse_param("random_forest.max_depth").is_err());
        assert!(parse_param(".max_depth=5").is_err());
    }

    #[test]
    fn test_defaults_match_pipeline_defaults() {
        let (_, config) = train_args(&[]).pipeline_config().unwrap();
        assert_eq!(config, PipelineConfig::default());
    }

    #[test]
    fn test_train_flags() {
        let args = train_args(&[
            "--dataset",
            "builtin",
            "--models",
            "logistic_regression,random_forest",
            "--test-size",
            "0.3",
            "--no-seed",
            "--fail-fast",
            "--no-log-model",
            "--param",
            "random_forest.max_depth=5",
            "--param",
            "random_forest.n_estimators=10",
        ]);
        let (_, config) = args.pipeline_config().unwrap();
        assert_eq!(config.dataset, "builtin");
        assert_eq!(config.models, vec!["logistic_regression", "random_forest"]);
        assert_eq!(config.test_size, 0.3);
        assert_eq!(config.random_seed, None);
        assert_eq!(config.failure_policy, FailurePolicy::FailFast);
        assert!(!config.log_model);
        assert_eq!(
            config.hyperparams["random_forest"],
            Hyperparams::new().with("max_depth", 5).with("n_estimators", 10)
        );
    }

    #[test]
    fn test_seed_conflicts_with_no_seed() {
        let argv = ["mltrack", "train", "--seed", "7", "--no-seed"];
        assert!(Cli::try_parse_from(argv).is_err());
    }

    #[test]
    fn test_csv_registers_under_file_stem() {
        let args = train_args(&["--csv", "data/penguins.csv", "--label-column", "species"]);
        let (loaders, config) = args.pipeline_config().unwrap();
        assert_eq!(config.dataset, "penguins");
        assert_eq!(loaders.list(), vec!["iris", "builtin", "penguins"]);
    }

    #[test]
    fn test_csv_requires_label_column() {
        let argv = ["mltrack", "train", "--csv", "data/penguins.csv"];
        assert!(Cli::try_parse_from(argv).is_err());
    }

    fn sample_report() -> PipelineReport {
        PipelineReport {
            experiment_id: "1".into(),
            experiment_name: "Iris Classification".into(),
            dataset: "iris".into(),
            train_rows: 120,
            test_rows: 30,
            split_key: None,
            results: vec![
                ModelResult {
                    model_name: "decision_tree".into(),
                    run_id: Some("abc".into()),
                    outcome: ModelOutcome::Succeeded {
                        metrics: BTreeMap::from([("accuracy".to_string(), 0.9)]),
                        artifact_uri: None,
                        storage_key: None,
                    },
                },
                ModelResult {
                    model_name: "bogus".into(),
                    run_id: None,
                    outcome: ModelOutcome::Failed {
                        error: "Unknown model: bogus".into(),
                    },
                },
            ],
        }
    }

    #[test]
    fn test_render_report() {
        let report = sample_report();
        let rendered = render_report(&report);
        assert!(rendered.starts_with("Experiment 'Iris Classification' (id 1)"));
        assert!(rendered.contains("0.9000"));
        assert!(rendered.contains("abc"));
        assert!(rendered.contains("FAILED: Unknown model: bogus"));
        assert!(rendered.ends_with("1 succeeded, 1 failed\n"));
    }

    #[test]
    fn test_exit_code_reflects_failures() {
        let mut report = sample_report();
        assert_eq!(exit_code(&report), ExitCode::from(PARTIAL_FAILURE));
        report.results.retain(ModelResult::is_success);
        assert_eq!(exit_code(&report), ExitCode::SUCCESS);
    }

    #[test]
    fn test_render_listings() {
        let models = render_models(ModelRegistry::builtin());
        assert!(models.starts_with("logistic_regression"));
        assert!(models.contains("n_estimators=100"));
        let datasets = render_datasets(LoaderRegistry::builtin());
        assert!(datasets.starts_with("iris"));
        assert!(datasets.contains("builtin"));
    }
}
