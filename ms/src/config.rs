//! MentorSTEM+ configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::llm::LlmError;
use crate::markdown::{ListStyle, RenderOptions};
use crate::narration::Voice;

/// Main MentorSTEM+ configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// LLM provider configuration
    pub llm: LlmConfig,

    /// Where the project history lives
    pub storage: StorageConfig,

    /// Prompt template overrides
    pub prompts: PromptsConfig,

    /// Markdown rendering
    pub render: RenderConfig,

    /// Podcast narration
    pub narration: NarrationConfig,

    /// Printable export
    pub export: ExportConfig,
}

impl Config {
    /// Validate configuration before use
    ///
    /// Checks that the API key environment variable is set. Call this early
    /// in startup to fail fast with a clear error message.
    pub fn validate(&self) -> Result<()> {
        self.llm.api_key()?;
        Ok(())
    }

    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .mentorstem.yml
        let local_config = PathBuf::from(".mentorstem.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/mentorstem/mentorstem.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("mentorstem").join("mentorstem.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        // No config file found, use defaults
        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Resolve a leading `~/` against the home directory
fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => dirs::home_dir().map_or_else(|| path.to_path_buf(), |home| home.join(rest)),
        Err(_) => path.to_path_buf(),
    }
}

/// Base directory for data files: `{data_local_dir}/mentorstem`
pub fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mentorstem")
}

/// LLM provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Provider name (currently only "gemini" supported)
    pub provider: String,

    /// Model identifier
    pub model: String,

    /// Environment variable containing the API key
    #[serde(rename = "api-key-env")]
    pub api_key_env: String,

    /// API base URL
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Maximum tokens per response
    #[serde(rename = "max-tokens")]
    pub max_tokens: u32,

    /// Request timeout in milliseconds
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "gemini".to_string(),
            model: "gemini-2.5-flash".to_string(),
            api_key_env: "GEMINI_API_KEY".to_string(),
            base_url: "https://generativelanguage.googleapis.com".to_string(),
            max_tokens: 32768,
            timeout_ms: 300_000,
        }
    }
}

impl LlmConfig {
    /// Read the API key from the configured environment variable
    pub fn api_key(&self) -> Result<String, LlmError> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| LlmError::MissingApiKey(self.api_key_env.clone()))
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// JSON file holding the saved projects
    #[serde(rename = "history-file")]
    pub history_file: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            history_file: data_dir().join("mentorStemHistory.json"),
        }
    }
}

impl StorageConfig {
    pub fn history_path(&self) -> PathBuf {
        expand_home(&self.history_file)
    }
}

/// Prompt template configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptsConfig {
    /// Directory with `{name}.pmt` files overriding the built-in prompts
    pub dir: Option<PathBuf>,
}

impl PromptsConfig {
    pub fn override_dir(&self) -> Option<PathBuf> {
        self.dir.as_deref().map(expand_home)
    }
}

/// Markdown rendering configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    #[serde(rename = "list-style")]
    pub list_style: ListStyle,
}

impl RenderConfig {
    pub fn options(&self) -> RenderOptions {
        RenderOptions {
            list_style: self.list_style,
        }
    }
}

/// Narration configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NarrationConfig {
    /// Language requested when no installed voice is Spanish
    #[serde(rename = "fallback-lang")]
    pub fallback_lang: String,

    /// Silence between sentences in milliseconds
    #[serde(rename = "pause-ms")]
    pub pause_ms: u64,

    /// File name used when the script is saved
    #[serde(rename = "script-filename")]
    pub script_filename: String,

    /// Directory the script is saved to
    #[serde(rename = "output-dir")]
    pub output_dir: PathBuf,

    /// External speech program; sentences are only printed when unset
    pub command: Option<String>,

    /// Arguments for the speech program; `{lang}` is substituted
    pub args: Vec<String>,

    /// Voices the speech program offers
    pub voices: Vec<Voice>,
}

impl Default for NarrationConfig {
    fn default() -> Self {
        Self {
            fallback_lang: "es-CO".to_string(),
            pause_ms: 250,
            script_filename: "guion-podcast.txt".to_string(),
            output_dir: PathBuf::from("."),
            command: None,
            args: Vec::new(),
            voices: Vec::new(),
        }
    }
}

impl NarrationConfig {
    pub fn output_path(&self) -> PathBuf {
        expand_home(&self.output_dir)
    }
}

/// Export configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Directory the printable file is written to
    #[serde(rename = "output-dir")]
    pub output_dir: PathBuf,

    /// Header title
    pub title: String,

    /// Header subtitle
    pub subtitle: String,

    /// Left header logo
    #[serde(rename = "left-logo-url")]
    pub left_logo_url: String,

    /// Optional right header logo (local image file)
    #[serde(rename = "right-logo")]
    pub right_logo: Option<PathBuf>,

    /// Institutional footer image
    #[serde(rename = "footer-image-url")]
    pub footer_image_url: String,

    /// Proxy used to fetch the footer image; the image URL is passed as `url`
    #[serde(rename = "image-proxy-url")]
    pub image_proxy_url: String,

    /// Page margins in inches: top, left, bottom, right
    pub margin: [f64; 4],

    /// JPEG quality for rasterized pages
    #[serde(rename = "image-quality")]
    pub image_quality: f64,

    /// Rasterization scale
    pub scale: u32,

    /// Page-break modes
    #[serde(rename = "page-break")]
    pub page_break: Vec<String>,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            title: "MENTOR STEM+".to_string(),
            subtitle: "UN PROYECTO DE LA UNIVERSIDAD DE CÓRDOBA EN EL MARCO DEL PROYECTO DE EXTENSIÓN: ESTRATEGIAS METODOLÓGICAS CON ENFOQUE STEM+ CON BASE EN LINEAMIENTOS CURRICULARES Y EXPERIENCIAS INVESTIGATIVAS PREVIAS PARA EL DESARROLLO DE COMPETENCIAS DEL SIGLO XXI EN INSTITUCIONES EDUCATIVAS RURALES DE CÓRDOBA".to_string(),
            left_logo_url: "https://upload.wikimedia.org/wikipedia/commons/9/9e/Escudo_Universidad_de_C%C3%B3rdoba.png"
                .to_string(),
            right_logo: None,
            footer_image_url: "https://drive.google.com/thumbnail?id=1iSVxFdvc7e6JP4yLGmiwvu0tCwP1o1Tc&sz=w1200"
                .to_string(),
            image_proxy_url: "https://api.allorigins.win/raw".to_string(),
            margin: [0.25, 0.5, 0.75, 0.5],
            image_quality: 0.98,
            scale: 3,
            page_break: vec!["avoid-all".to_string(), "css".to_string(), "legacy".to_string()],
        }
    }
}

impl ExportConfig {
    pub fn output_path(&self) -> PathBuf {
        expand_home(&self.output_dir)
    }
}
