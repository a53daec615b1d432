// src/settings.rs

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use config::{builder::DefaultState, ConfigBuilder, ConfigError, File};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::persona::ALL_SEGMENTS;

const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1";
const DEFAULT_OLLAMA_URL: &str = "http://127.0.0.1:11434";
const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Parser, Debug)]
#[command(version, about = "Synthetic focus-group feedback for marketing copy")]
pub struct Args {
    /// Path to the local configuration TOML file.
    #[arg(short, long, value_name = "CONFIG_PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List the audience segments offered by a seed persona file.
    Segments {
        /// Path to the seed persona JSON file.
        #[arg(long, value_name = "PERSONAS_PATH")]
        personas: PathBuf,
    },
    /// Run one feedback sprint for a creative.
    Run {
        /// Path to the seed persona JSON file.
        #[arg(long, value_name = "PERSONAS_PATH")]
        personas: PathBuf,

        /// Creative to test (txt, html, md, doc, docx or pdf).
        #[arg(long, value_name = "CREATIVE_PATH")]
        creative: PathBuf,

        /// Audience segment to sample personas from.
        #[arg(long, default_value = ALL_SEGMENTS)]
        segment: String,

        /// Directory receiving the workbook and chart; overrides the config.
        #[arg(long, value_name = "OUTPUT_DIR")]
        output: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    OpenAi,
    Ollama,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LlmSettings {
    pub provider: Provider,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OpenAiSettings {
    pub base_url: String,
    pub api_key: Option<String>,
    pub chat_model: String,
    pub embedding_model: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OllamaSettings {
    pub url: String,
    pub chat_model: String,
    pub embedding_model: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SprintSettings {
    pub clusters: usize,
    pub snippets_per_cluster: usize,
    /// Number of k-means initialisations; unset means one k-means++ run.
    pub kmeans_runs: Option<usize>,
    pub kmeans_max_iter: usize,
    pub seed: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OutputSettings {
    pub directory: PathBuf,
    pub workbook: String,
    pub chart: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Settings {
    pub llm: LlmSettings,
    pub openai: OpenAiSettings,
    pub ollama: OllamaSettings,
    pub sprint: SprintSettings,
    pub output: OutputSettings,
}

impl Settings {
    /// Load settings from the given TOML file, with sane defaults.
    ///
    /// Without an explicit path the per-user config file is used when it
    /// exists; otherwise only the defaults apply.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Self::defaults()?;
        match path {
            Some(path) => builder = builder.add_source(File::from(path)),
            None => {
                if let Some(path) = user_config_path().filter(|p| p.is_file()) {
                    builder = builder.add_source(File::from(path));
                }
            }
        }
        let settings: Self = builder.build()?.try_deserialize()?;
        if settings.sprint.clusters == 0 {
            return Err(ConfigError::Message(
                "sprint.clusters must be at least 1".to_string(),
            ));
        }
        Ok(settings)
    }

    fn defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        ConfigBuilder::<DefaultState>::default()
            .set_default("llm.provider", "openai")?
            .set_default("openai.base_url", DEFAULT_OPENAI_URL)?
            .set_default("openai.chat_model", "gpt-4o-mini")?
            .set_default("openai.embedding_model", "text-embedding-3-small")?
            .set_default("openai.timeout_secs", 120)?
            .set_default("ollama.url", DEFAULT_OLLAMA_URL)?
            .set_default("ollama.chat_model", "llama3.1:8b")?
            .set_default("ollama.embedding_model", "nomic-embed-text")?
            .set_default("sprint.clusters", 5)?
            .set_default("sprint.snippets_per_cluster", 10)?
            .set_default("sprint.kmeans_max_iter", 300)?
            .set_default("output.directory", ".")?
            .set_default("output.workbook", "concept_sprint_results.xlsx")?
            .set_default("output.chart", "mean_intent_by_cluster.svg")
    }
}

fn user_config_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "copy-pulse").map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
}
