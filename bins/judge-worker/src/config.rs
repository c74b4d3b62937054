// Worker configuration: environment settings and the language runtime table
use anyhow::{bail, Context, Result};
use judge_common::config::RedisSettings;
use judge_common::types::{EffectiveLimits, Language};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Display;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LanguageConfig {
    pub name: String,
    pub image: String,
    /// File name the source is written to inside the workspace
    pub source_file: String,
    /// Shell command run in the workspace before any test; None for interpreted languages
    #[serde(default)]
    pub compile_command: Option<String>,
    /// Shell command run once per test with stdin redirected from the input file
    pub run_command: String,
}

impl LanguageConfig {
    fn new(name: &str, image: &str, source_file: &str, compile: Option<&str>, run: &str) -> Self {
        Self {
            name: name.to_string(),
            image: image.to_string(),
            source_file: source_file.to_string(),
            compile_command: compile.map(str::to_string),
            run_command: run.to_string(),
        }
    }

    pub fn needs_compilation(&self) -> bool {
        self.compile_command.is_some()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct LanguagesJson {
    languages: Vec<LanguageConfig>,
}

fn builtin_config(language: Language) -> LanguageConfig {
    match language {
        Language::Python => {
            LanguageConfig::new("python", "python:3.11-slim", "main.py", None, "python3 main.py")
        }
        Language::Cpp => LanguageConfig::new(
            "cpp",
            "gcc:11",
            "main.cpp",
            Some("g++ -o main main.cpp -O2 -std=c++11"),
            "./main",
        ),
        Language::Java => LanguageConfig::new(
            "java",
            "openjdk:11-jdk-slim",
            "Main.java",
            Some("javac Main.java"),
            "java Main",
        ),
        Language::Javascript => {
            LanguageConfig::new("javascript", "node:18-slim", "main.js", None, "node main.js")
        }
        Language::Go => LanguageConfig::new(
            "go",
            "golang:1.21",
            "main.go",
            Some("GOCACHE=/tmp/gocache go build -o main main.go"),
            "./main",
        ),
        Language::Rust => LanguageConfig::new(
            "rust",
            "rust:1.75-slim",
            "main.rs",
            Some("rustc -O -o main main.rs"),
            "./main",
        ),
    }
}

/// Language configuration manager
#[derive(Debug, Clone)]
pub struct LanguageConfigManager {
    configs: HashMap<Language, LanguageConfig>,
}

impl LanguageConfigManager {
    /// Built-in runtime table covering every supported language
    pub fn builtin() -> Self {
        let configs = Language::ALL
            .iter()
            .map(|&lang| (lang, builtin_config(lang)))
            .collect();
        Self { configs }
    }

    /// Load overrides from a languages.json on top of the built-in table
    pub fn load(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            bail!("Language config file not found: {}", config_path.display());
        }

        let content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;

        Self::from_json(&content)
            .with_context(|| format!("Failed to parse {}", config_path.display()))
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let languages_json: LanguagesJson = serde_json::from_str(content)?;

        let mut manager = Self::builtin();
        for lang in languages_json.languages {
            let language = Language::from_name(&lang.name).ok_or_else(|| {
                anyhow::anyhow!("Unknown language '{}' in languages.json", lang.name)
            })?;
            if lang.run_command.trim().is_empty() {
                bail!("Language '{}' has an empty run command", lang.name);
            }
            manager.configs.insert(language, lang);
        }

        Ok(manager)
    }

    /// Get configuration for a specific language
    pub fn get_config(&self, language: &Language) -> Result<&LanguageConfig> {
        self.configs
            .get(language)
            .ok_or_else(|| anyhow::anyhow!("No configuration found for language: {}", language))
    }

    /// List all supported languages
    pub fn list_languages(&self) -> Vec<String> {
        let mut names: Vec<String> = self.configs.keys().map(|l| l.to_string()).collect();
        names.sort();
        names
    }
}

/// Ceiling for any per-test time limit, default or per job
pub const MAX_TIME_LIMIT_MS: u64 = 5 * 60 * 1000;
/// Ceiling for any sandbox memory limit, default or per job
pub const MAX_MEMORY_LIMIT_MB: u64 = 64 * 1024;
/// Docker's smallest CFS quota is 1ms per 100ms period
pub const MIN_CPU_LIMIT: f64 = 0.01;

/// Judge settings read once at startup
#[derive(Debug, Clone)]
pub struct JudgeSettings {
    pub redis: RedisSettings,
    /// Default per-test wall clock budget (JUDGE_TIMEOUT)
    pub timeout_secs: u64,
    /// Sandbox memory cap (JUDGE_MEMORY_LIMIT)
    pub memory_limit_mb: u64,
    /// Fractional CPU quota (JUDGE_CPU_LIMIT)
    pub cpu_limit: f64,
    pub workspace_root: PathBuf,
    pub languages_path: Option<PathBuf>,
    pub log_json: bool,
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("Invalid value for {}: '{}' ({})", key, raw, e)),
        None => Ok(default),
    }
}

impl JudgeSettings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let timeout_secs: u64 = parse_var(&lookup, "JUDGE_TIMEOUT", 10)?;
        let memory_limit_mb: u64 = parse_var(&lookup, "JUDGE_MEMORY_LIMIT", 512)?;
        let cpu_limit: f64 = parse_var(&lookup, "JUDGE_CPU_LIMIT", 1.0)?;

        if timeout_secs == 0 || timeout_secs.saturating_mul(1000) > MAX_TIME_LIMIT_MS {
            bail!(
                "JUDGE_TIMEOUT must be between 1 and {} seconds",
                MAX_TIME_LIMIT_MS / 1000
            );
        }
        if memory_limit_mb == 0 || memory_limit_mb > MAX_MEMORY_LIMIT_MB {
            bail!("JUDGE_MEMORY_LIMIT must be between 1 and {} MB", MAX_MEMORY_LIMIT_MB);
        }
        if !(cpu_limit.is_finite() && cpu_limit >= MIN_CPU_LIMIT) {
            bail!(
                "JUDGE_CPU_LIMIT must be at least {}, got {}",
                MIN_CPU_LIMIT,
                cpu_limit
            );
        }

        let workspace_root = lookup("JUDGE_WORKSPACE_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|| std::env::temp_dir().join("judge_workspace"));

        Ok(Self {
            redis: RedisSettings::from_lookup(&lookup),
            timeout_secs,
            memory_limit_mb,
            cpu_limit,
            workspace_root,
            languages_path: lookup("JUDGE_LANGUAGES").map(PathBuf::from),
            log_json: lookup("LOG_FORMAT").is_some_and(|v| v.eq_ignore_ascii_case("json")),
        })
    }

    /// Limits applied when a job does not carry its own
    pub fn default_limits(&self) -> EffectiveLimits {
        EffectiveLimits {
            time_limit_ms: self.timeout_secs * 1000,
            memory_limit_mb: self.memory_limit_mb,
        }
    }

    pub fn language_table(&self) -> Result<LanguageConfigManager> {
        match &self.languages_path {
            Some(path) => LanguageConfigManager::load(path),
            None => Ok(LanguageConfigManager::builtin()),
        }
    }
}
