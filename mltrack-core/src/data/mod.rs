//! Datasets, loaders, and the train/test split.

pub mod dataset;
pub mod loader;

pub use dataset::{Dataset, TrainTestSplit};
pub use loader::{CsvLoader, DataLoader, IrisLoader, LoaderRegistry, get_loader};
