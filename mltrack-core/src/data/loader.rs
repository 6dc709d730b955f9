//! Dataset loaders and the name -> loader registry.

use crate::data::dataset::Dataset;
use crate::error::{MltrackError, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::{Arc, LazyLock};

/// Bundled copy of the Iris dataset (150 samples, 4 features, 3 classes).
const IRIS_CSV: &str = include_str!("../../data/iris.csv");

/// Trait for loading a classification dataset.
#[async_trait]
pub trait DataLoader: Send + Sync {
    /// Load the full dataset.
    async fn load(&self) -> Result<Dataset>;

    /// Short human-readable description for listings.
    fn describe(&self) -> String;
}

/// Loader for the bundled Iris dataset.
#[derive(Debug, Clone, Default)]
pub struct IrisLoader;

#[async_trait]
impl DataLoader for IrisLoader {
    async fn load(&self) -> Result<Dataset> {
        parse_labeled_csv(IRIS_CSV, ',', "species")
    }

    fn describe(&self) -> String {
        "Iris flowers (bundled): 150 samples, 4 features, 3 classes".to_string()
    }
}

/// CSV file data source: numeric feature columns plus one class-name column.
#[derive(Debug, Clone)]
pub struct CsvLoader {
    pub path: PathBuf,
    pub label_column: String,
    pub delimiter: char,
}

impl CsvLoader {
    pub fn new(path: impl Into<PathBuf>, label_column: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            label_column: label_column.into(),
            delimiter: ',',
        }
    }

    pub fn with_delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = delimiter;
        self
    }
}

#[async_trait]
impl DataLoader for CsvLoader {
    async fn load(&self) -> Result<Dataset> {
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            MltrackError::dataset(format!("failed to read {}: {e}", self.path.display()))
        })?;
        parse_labeled_csv(&content, self.delimiter, &self.label_column)
    }

    fn describe(&self) -> String {
        format!(
            "CSV file {} (label column '{}')",
            self.path.display(),
            self.label_column
        )
    }
}

/// Parse a headered CSV where `label_column` holds class names.
///
/// Class names become label indices in order of first appearance.
pub fn parse_labeled_csv(content: &str, delimiter: char, label_column: &str) -> Result<Dataset> {
    let mut lines = content.lines().filter(|l| !l.trim().is_empty());

    let header: Vec<String> = lines
        .next()
        .ok_or_else(|| MltrackError::dataset("Empty CSV file"))?
        .split(delimiter)
        .map(|s| s.trim().trim_matches('"').to_string())
        .collect();
    let label_idx = header
        .iter()
        .position(|c| c == label_column)
        .ok_or_else(|| {
            MltrackError::dataset(format!("label column '{label_column}' not in header"))
        })?;
    let feature_names: Vec<String> = header
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != label_idx)
        .map(|(_, name)| name.clone())
        .collect();

    let mut features = Vec::new();
    let mut labels = Vec::new();
    let mut label_names: Vec<String> = Vec::new();

    for (line_no, line) in lines.enumerate() {
        let cells: Vec<&str> = line
            .split(delimiter)
            .map(|s| s.trim().trim_matches('"'))
            .collect();
        if cells.len() != header.len() {
            return Err(MltrackError::dataset(format!(
                "line {}: expected {} columns, found {}",
                line_no + 2,
                header.len(),
                cells.len()
            )));
        }

        let mut row = Vec::with_capacity(feature_names.len());
        for (i, cell) in cells.iter().enumerate() {
            if i == label_idx {
                continue;
            }
            let value = cell.parse::<f64>().map_err(|_| {
                MltrackError::dataset(format!(
                    "line {}: column '{}' is not numeric: {cell:?}",
                    line_no + 2,
                    header[i]
                ))
            })?;
            row.push(value);
        }

        let class = cells[label_idx];
        let label = match label_names.iter().position(|n| n == class) {
            Some(idx) => idx,
            None => {
                label_names.push(class.to_string());
                label_names.len() - 1
            }
        };
        features.push(row);
        labels.push(label);
    }

    Dataset::new(features, labels, feature_names, label_names)
}

/// Registry mapping dataset names to loaders, in registration order.
#[derive(Clone, Default)]
pub struct LoaderRegistry {
    loaders: Vec<(String, Arc<dyn DataLoader>)>,
}

static BUILTIN_LOADERS: LazyLock<LoaderRegistry> = LazyLock::new(LoaderRegistry::with_builtin);

impl LoaderRegistry {
    pub fn new() -> Self {
        Self {
            loaders: Vec::new(),
        }
    }

    /// Registry holding the bundled datasets: `iris`, aliased as `builtin`.
    pub fn with_builtin() -> Self {
        let iris: Arc<dyn DataLoader> = Arc::new(IrisLoader);
        Self {
            loaders: vec![
                ("iris".to_string(), Arc::clone(&iris)),
                ("builtin".to_string(), iris),
            ],
        }
    }

    /// The process-wide registry of built-in loaders.
    pub fn builtin() -> &'static LoaderRegistry {
        &BUILTIN_LOADERS
    }

    /// Register a loader under `name`. Names must be unique.
    pub fn register(&mut self, name: impl Into<String>, loader: Arc<dyn DataLoader>) -> Result<()> {
        let name = name.into();
        if self.loaders.iter().any(|(n, _)| *n == name) {
            return Err(MltrackError::invalid_input(format!(
                "dataset '{name}' is already registered"
            )));
        }
        self.loaders.push((name, loader));
        Ok(())
    }

    /// Look up a loader by name.
    pub fn get_loader(&self, name: &str) -> Result<Arc<dyn DataLoader>> {
        self.loaders
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, loader)| Arc::clone(loader))
            .ok_or_else(|| MltrackError::UnknownDataset {
                name: name.to_string(),
                available: self.list().into_iter().map(str::to_string).collect(),
            })
    }

    /// Registered names in registration order.
    pub fn list(&self) -> Vec<&str> {
        self.loaders.iter().map(|(n, _)| n.as_str()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<dyn DataLoader>)> {
        self.loaders.iter().map(|(n, l)| (n.as_str(), l))
    }
}

impl std::fmt::Debug for LoaderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoaderRegistry")
            .field("loaders", &self.list())
            .finish()
    }
}

/// Look up a built-in loader by name.
pub fn get_loader(name: &str) -> Result<Arc<dyn DataLoader>> {
    LoaderRegistry::builtin().get_loader(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_iris_shape() {
        let data = get_loader("iris").unwrap().load().await.unwrap();
        assert_eq!(data.n_samples(), 150);
        assert_eq!(data.features().len(), data.labels().len());
        assert_eq!(data.feature_names().len(), 4);
        assert_eq!(
            data.label_names(),
            &["setosa".to_string(), "versicolor".into(), "virginica".into()]
        );
        for class in 0..3 {
            assert_eq!(data.labels().iter().filter(|l| **l == class).count(), 50);
        }
    }

    #[tokio::test]
    async fn test_every_builtin_loader_is_consistent() {
        for (name, loader) in LoaderRegistry::builtin().iter() {
            let (x, y, feature_names, label_names) = loader.load().await.unwrap().into_parts();
            assert_eq!(x.len(), y.len(), "{name}");
            assert!(x.iter().all(|row| row.len() == feature_names.len()), "{name}");
            assert!(y.iter().all(|&label| label < label_names.len()), "{name}");
        }
    }

    #[test]
    fn test_unknown_loader() {
        let err = get_loader("mnist").err().unwrap();
        match err {
            MltrackError::UnknownDataset { name, available } => {
                assert_eq!(name, "mnist");
                assert_eq!(available, vec!["iris", "builtin"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut registry = LoaderRegistry::with_builtin();
        assert!(registry.register("iris", Arc::new(IrisLoader)).is_err());
        registry.register("flowers", Arc::new(IrisLoader)).unwrap();
        assert_eq!(registry.list(), vec!["iris", "builtin", "flowers"]);
    }

    #[test]
    fn test_parse_labeled_csv_label_in_middle() {
        let csv = "x,class,y\n1.0,cat,2.0\n3.0,dog,4.0\n5.0,cat,6.0\n";
        let data = parse_labeled_csv(csv, ',', "class").unwrap();
        assert_eq!(data.feature_names(), &["x".to_string(), "y".into()]);
        assert_eq!(data.labels(), &[0, 1, 0]);
        assert_eq!(data.features()[1], vec![3.0, 4.0]);
    }

    #[test]
    fn test_parse_labeled_csv_rejects_text_feature() {
        let csv = "x,class\nabc,cat\n";
        let err = parse_labeled_csv(csv, ',', "class").unwrap_err();
        assert!(err.to_string().contains("not numeric"));
    }

    #[tokio::test]
    async fn test_csv_loader_reads_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("toy.csv");
        std::fs::write(&path, "a;b;label\n1;2;yes\n3;4;no\n").unwrap();
        let data = CsvLoader::new(&path, "label")
            .with_delimiter(';')
            .load()
            .await
            .unwrap();
        assert_eq!(data.n_samples(), 2);
        assert_eq!(data.label_names(), &["yes".to_string(), "no".into()]);
    }
}
