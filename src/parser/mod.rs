mod classifier;

pub use classifier::{ClassifyError, SqlClassifier, StatementKind};
