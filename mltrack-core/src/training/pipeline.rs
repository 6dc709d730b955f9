//! Training pipeline: load, split, and train/evaluate/log each model under
//! its own tracked run.

use crate::data::{LoaderRegistry, TrainTestSplit};
use crate::error::{MltrackError, Result};
use crate::models::{Classifier, Estimator, Hyperparams, ModelRegistry};
use crate::storage::ArtifactStorage;
use crate::tracking::{RunInfo, RunStatus, TrackingClient};
use crate::training::metrics::ClassificationMetrics;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

/// Artifact path of the serialized estimator, relative to the run root.
pub const MODEL_ARTIFACT_PATH: &str = "model/model.json";

/// What to do when one model fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Record the failure and move on to the next model.
    #[default]
    Continue,
    /// Abort the pipeline with the first failure.
    FailFast,
}

/// Configuration for one pipeline invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub dataset: String,
    /// Models to train, in order.
    pub models: Vec<String>,
    /// Fraction of rows held out for evaluation, in (0, 1).
    pub test_size: f64,
    /// Split seed; `None` draws one from the OS.
    pub random_seed: Option<u64>,
    pub experiment_name: String,
    pub failure_policy: FailurePolicy,
    /// Upload each fitted estimator as a run artifact.
    pub log_model: bool,
    /// Copy each fitted estimator to object storage.
    pub persist_models: bool,
    /// Upload the train/test split to object storage.
    pub persist_split: bool,
    /// Per-model hyperparameter overrides, keyed by model name.
    pub hyperparams: BTreeMap<String, Hyperparams>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            dataset: "iris".to_string(),
            models: crate::models::list_models(),
            test_size: 0.2,
            random_seed: Some(42),
            experiment_name: "Iris Classification".to_string(),
            failure_policy: FailurePolicy::Continue,
            log_model: true,
            persist_models: false,
            persist_split: false,
            hyperparams: BTreeMap::new(),
        }
    }
}

/// How one model's training ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ModelOutcome {
    Succeeded {
        metrics: BTreeMap<String, f64>,
        /// URI of the logged model artifact.
        #[serde(skip_serializing_if = "Option::is_none")]
        artifact_uri: Option<String>,
        /// Object storage key of the persisted copy.
        #[serde(skip_serializing_if = "Option::is_none")]
        storage_key: Option<String>,
    },
    Failed {
        error: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelResult {
    pub model_name: String,
    /// `None` when the model failed before a run was opened.
    pub run_id: Option<String>,
    #[serde(flatten)]
    pub outcome: ModelOutcome,
}

impl ModelResult {
    fn failed(model_name: &str, run_id: Option<String>, error: &MltrackError) -> Self {
        Self {
            model_name: model_name.to_string(),
            run_id,
            outcome: ModelOutcome::Failed {
                error: error.to_string(),
            },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, ModelOutcome::Succeeded { .. })
    }

    pub fn metrics(&self) -> Option<&BTreeMap<String, f64>> {
        match &self.outcome {
            ModelOutcome::Succeeded { metrics, .. } => Some(metrics),
            ModelOutcome::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            ModelOutcome::Failed { error } => Some(error),
            ModelOutcome::Succeeded { .. } => None,
        }
    }
}

/// Everything a pipeline run produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineReport {
    pub experiment_id: String,
    pub experiment_name: String,
    pub dataset: String,
    pub train_rows: usize,
    pub test_rows: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub split_key: Option<String>,
    pub results: Vec<ModelResult>,
}

impl PipelineReport {
    pub fn succeeded(&self) -> impl Iterator<Item = &ModelResult> {
        self.results.iter().filter(|r| r.is_success())
    }

    pub fn failed(&self) -> impl Iterator<Item = &ModelResult> {
        self.results.iter().filter(|r| !r.is_success())
    }

    pub fn all_succeeded(&self) -> bool {
        self.results.iter().all(ModelResult::is_success)
    }
}

struct Trained {
    metrics: BTreeMap<String, f64>,
    artifact_uri: Option<String>,
    storage_key: Option<String>,
}

/// Runs [`PipelineConfig`]s against a tracking client.
pub struct TrainingPipeline {
    tracker: Arc<dyn TrackingClient>,
    loaders: LoaderRegistry,
    models: ModelRegistry,
    storage: Option<ArtifactStorage>,
}

impl TrainingPipeline {
    /// Pipeline over the built-in loaders and models, without object storage.
    pub fn new(tracker: Arc<dyn TrackingClient>) -> Self {
        Self {
            tracker,
            loaders: LoaderRegistry::builtin().clone(),
            models: ModelRegistry::builtin().clone(),
            storage: None,
        }
    }

    pub fn with_loaders(mut self, loaders: LoaderRegistry) -> Self {
        self.loaders = loaders;
        self
    }

    pub fn with_models(mut self, models: ModelRegistry) -> Self {
        self.models = models;
        self
    }

    pub fn with_storage(mut self, storage: ArtifactStorage) -> Self {
        self.storage = Some(storage);
        self
    }

    fn storage(&self, purpose: &str) -> Result<&ArtifactStorage> {
        self.storage.as_ref().ok_or_else(|| {
            MltrackError::invalid_input(format!("{purpose} requires object storage to be configured"))
        })
    }

    /// Run the pipeline.
    ///
    /// Errors before the per-model loop (bad test size, unknown dataset,
    /// storage for the split, experiment resolution) are returned as `Err`.
    /// Per-model failures land in the report, unless the policy is
    /// [`FailurePolicy::FailFast`].
    pub async fn run(&self, config: &PipelineConfig) -> Result<PipelineReport> {
        if !(config.test_size > 0.0 && config.test_size < 1.0) {
            return Err(MltrackError::invalid_input(format!(
                "test_size must be between 0 and 1 (exclusive), got {}",
                config.test_size
            )));
        }
        if config.persist_models {
            self.storage("persist_models")?;
        }
        if config.persist_split {
            self.storage("persist_split")?;
        }

        tracing::info!(dataset = %config.dataset, "loading dataset");
        let loader = self.loaders.get_loader(&config.dataset)?;
        let data = loader.load().await?;
        let split = data.train_test_split(config.test_size, config.random_seed)?;
        tracing::info!(
            train = split.train_rows(),
            test = split.test_rows(),
            "dataset split"
        );

        let split_key = if config.persist_split {
            let key = self
                .storage("persist_split")?
                .save_split(&config.dataset, config.random_seed, config.test_size, &split)
                .await?;
            Some(key)
        } else {
            None
        };

        let experiment_id = self
            .tracker
            .get_or_create_experiment(&config.experiment_name)
            .await?;
        tracing::info!(
            experiment = %config.experiment_name,
            id = %experiment_id,
            models = config.models.len(),
            "training models"
        );

        let mut results = Vec::with_capacity(config.models.len());
        for model_name in &config.models {
            let result = self
                .run_model(config, &experiment_id, model_name, &split)
                .await?;
            results.push(result);
        }

        let failures = results.iter().filter(|r| !r.is_success()).count();
        tracing::info!(
            succeeded = results.len() - failures,
            failed = failures,
            tracking_uri = self.tracker.tracking_uri(),
            "pipeline finished"
        );

        Ok(PipelineReport {
            experiment_id,
            experiment_name: config.experiment_name.clone(),
            dataset: config.dataset.clone(),
            train_rows: split.train_rows(),
            test_rows: split.test_rows(),
            split_key,
            results,
        })
    }

    /// Train one model. Returns `Err` only when the failure policy says to abort.
    async fn run_model(
        &self,
        config: &PipelineConfig,
        experiment_id: &str,
        model_name: &str,
        split: &TrainTestSplit,
    ) -> Result<ModelResult> {
        let fail_fast = config.failure_policy == FailurePolicy::FailFast;
        let overrides = config.hyperparams.get(model_name).cloned().unwrap_or_default();

        let mut estimator = match self.models.get_model(model_name, &overrides) {
            Ok(estimator) => estimator,
            Err(e) if fail_fast => return Err(e),
            Err(e) => {
                tracing::warn!(model = model_name, error = %e, "skipping model");
                return Ok(ModelResult::failed(model_name, None, &e));
            }
        };

        let run = match self.tracker.start_run(experiment_id, model_name).await {
            Ok(run) => run,
            Err(e) if fail_fast => return Err(e),
            Err(e) => {
                tracing::warn!(model = model_name, error = %e, "could not open run");
                return Ok(ModelResult::failed(model_name, None, &e));
            }
        };
        tracing::info!(model = model_name, run_id = %run.run_id, "training");

        let outcome = match self.train(config, split, &mut estimator, &run).await {
            Ok(trained) => self
                .tracker
                .end_run(&run.run_id, RunStatus::Finished)
                .await
                .map(|()| trained),
            Err(e) => {
                if let Err(end_err) = self.tracker.end_run(&run.run_id, RunStatus::Failed).await {
                    tracing::warn!(run_id = %run.run_id, error = %end_err, "could not close failed run");
                }
                Err(e)
            }
        };

        match outcome {
            Ok(trained) => {
                tracing::info!(
                    model = model_name,
                    accuracy = trained.metrics.get("accuracy").copied().unwrap_or_default(),
                    "model trained"
                );
                Ok(ModelResult {
                    model_name: model_name.to_string(),
                    run_id: Some(run.run_id),
                    outcome: ModelOutcome::Succeeded {
                        metrics: trained.metrics,
                        artifact_uri: trained.artifact_uri,
                        storage_key: trained.storage_key,
                    },
                })
            }
            Err(e) => {
                let err = MltrackError::training(model_name, e.to_string());
                if fail_fast {
                    return Err(err);
                }
                tracing::warn!(model = model_name, run_id = %run.run_id, error = %e, "model failed");
                Ok(ModelResult::failed(model_name, Some(run.run_id), &err))
            }
        }
    }

    async fn train(
        &self,
        config: &PipelineConfig,
        split: &TrainTestSplit,
        estimator: &mut Estimator,
        run: &RunInfo,
    ) -> Result<Trained> {
        let started = Instant::now();
        estimator.fit(&split.x_train, &split.y_train)?;
        let training_time = started.elapsed().as_secs_f64();

        let test = ClassificationMetrics::compute(&split.y_test, &estimator.predict(&split.x_test)?)?;
        let train = ClassificationMetrics::compute(&split.y_train, &estimator.predict(&split.x_train)?)?;

        let mut metrics = test.to_map();
        metrics.insert("training_score".to_string(), train.accuracy);
        metrics.insert("training_accuracy_score".to_string(), train.accuracy);
        metrics.insert("training_precision_score".to_string(), train.precision);
        metrics.insert("training_recall_score".to_string(), train.recall);
        metrics.insert("training_f1_score".to_string(), train.f1_score);
        metrics.insert("training_time".to_string(), training_time);

        let mut params = estimator.params().to_params();
        params.push(("model_type".to_string(), estimator.model_type().to_string()));
        params.push(("dataset".to_string(), config.dataset.clone()));
        params.push(("test_size".to_string(), config.test_size.to_string()));
        params.push((
            "split_random_state".to_string(),
            config
                .random_seed
                .map_or_else(|| "None".to_string(), |s| s.to_string()),
        ));

        self.tracker.log_params(&run.run_id, &params).await?;
        self.tracker.log_metrics(&run.run_id, &metrics).await?;

        let artifact_uri = if config.log_model {
            let body = serde_json::to_vec_pretty(&*estimator)?;
            Some(
                self.tracker
                    .log_artifact(run, MODEL_ARTIFACT_PATH, body)
                    .await?,
            )
        } else {
            None
        };

        let storage_key = if config.persist_models {
            let key = self
                .storage("persist_models")?
                .save_model(&config.experiment_name, &run.run_id, estimator)
                .await?;
            Some(key)
        } else {
            None
        };

        Ok(Trained {
            metrics,
            artifact_uri,
            storage_key,
        })
    }
}

impl std::fmt::Debug for TrainingPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrainingPipeline")
            .field("tracking_uri", &self.tracker.tracking_uri())
            .field("loaders", &self.loaders)
            .field("models", &self.models.list_models())
            .field("storage", &self.storage)
            .finish()
    }
}
