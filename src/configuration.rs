pub mod catalog;
pub mod config;
pub mod types;

pub use catalog::ExamCatalog;
pub use config::{CliArgs, Config};
pub use types::{ExamConfig, QuestionConfig, QuestionKind};
