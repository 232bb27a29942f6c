use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::AppError;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub llm: LlmConfig,
    pub search: SearchConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub request: RequestConfig,
    pub rate_limit: RateLimitConfig,
    pub pipeline: PipelineConfig,
    pub export: ExportConfig,
}

/// Completion service (Gemini) configuration
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub temperature: f64,
    pub max_output_tokens: u32,
}

/// Which search backend feeds the snippet fetcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchProviderKind {
    /// POST-based JSON search API (`organic` / `news` arrays).
    Serper,
    /// GET-based custom search API (`items[].link`) plus page scraping.
    CustomSearch,
    /// No search; every lookup reports `not_configured`.
    Disabled,
}

impl FromStr for SearchProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "serper" => Ok(SearchProviderKind::Serper),
            "custom_search" | "google_cse" | "cse" => Ok(SearchProviderKind::CustomSearch),
            "none" | "disabled" | "off" => Ok(SearchProviderKind::Disabled),
            _ => Err(format!("Unknown search provider: {}", s)),
        }
    }
}

/// Search provider configuration
#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub provider: SearchProviderKind,
    pub serper_api_key: Option<String>,
    pub serper_base_url: String,
    pub custom_search_api_key: Option<String>,
    pub custom_search_engine_id: Option<String>,
    pub custom_search_base_url: String,
    pub max_results: usize,
    pub timeout_ms: u64,
    pub scrape_char_budget: usize,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub max_connections: u32,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// HTTP request configuration
#[derive(Debug, Clone)]
pub struct RequestConfig {
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub retry_jitter_ms: u64,
}

/// Token bucket settings, one bucket per external provider
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub search_per_sec: f64,
    pub search_burst: u32,
    pub llm_per_sec: f64,
    pub llm_burst: u32,
}

/// Pipeline tuning
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Character budget for aggregated verification evidence.
    pub verification_char_budget: usize,
    /// Concurrent benchmark lookups; 1 keeps lookups sequential.
    pub benchmark_concurrency: usize,
    /// Aggregate deadline for benchmark and verification fan-out.
    pub deadline_ms: Option<u64>,
    /// Number of narrative styles requested from the completion service.
    pub style_count: usize,
    /// Maximum snippets requested per search query.
    pub max_results: usize,
}

/// Export configuration
#[derive(Debug, Clone)]
pub struct ExportConfig {
    pub output_dir: PathBuf,
    pub wkhtmltopdf_path: String,
    pub pdf_header_text: Option<String>,
    pub pdf_footer_text: Option<String>,
    pub pdf_logo_url: Option<String>,
}

fn parse_env<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn optional_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, AppError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let llm = LlmConfig {
            api_key: optional_env("GEMINI_API_KEY").ok_or_else(|| AppError::Config {
                message: "GEMINI_API_KEY is required".to_string(),
            })?,
            base_url: env::var("GEMINI_BASE_URL")
                .unwrap_or_else(|_| "https://generativelanguage.googleapis.com".to_string()),
            model: env::var("GEMINI_MODEL").unwrap_or_else(|_| "gemini-1.5-flash".to_string()),
            temperature: parse_env("LLM_TEMPERATURE", 0.7),
            max_output_tokens: parse_env("LLM_MAX_OUTPUT_TOKENS", 4096),
        };

        let provider = match env::var("SEARCH_PROVIDER") {
            Ok(value) => value
                .parse::<SearchProviderKind>()
                .map_err(|message| AppError::Config { message })?,
            Err(_) => SearchProviderKind::Serper,
        };

        let search = SearchConfig {
            provider,
            serper_api_key: optional_env("SERPER_API_KEY"),
            serper_base_url: env::var("SERPER_BASE_URL")
                .unwrap_or_else(|_| "https://google.serper.dev".to_string()),
            custom_search_api_key: optional_env("GOOGLE_CSE_API_KEY"),
            custom_search_engine_id: optional_env("GOOGLE_CSE_ID"),
            custom_search_base_url: env::var("GOOGLE_CSE_BASE_URL")
                .unwrap_or_else(|_| "https://www.googleapis.com".to_string()),
            max_results: parse_env("SEARCH_MAX_RESULTS", 5),
            timeout_ms: parse_env("SEARCH_TIMEOUT_MS", 15000),
            scrape_char_budget: parse_env("SCRAPE_CHAR_BUDGET", 5000),
        };

        let database = DatabaseConfig {
            path: PathBuf::from(
                env::var("DATABASE_PATH").unwrap_or_else(|_| "./data/case_studies.db".to_string()),
            ),
            max_connections: parse_env("DATABASE_MAX_CONNECTIONS", 5),
        };

        let logging = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "pretty".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        };

        let request = RequestConfig {
            timeout_ms: parse_env("REQUEST_TIMEOUT_MS", 20000),
            max_retries: parse_env("MAX_RETRIES", 2),
            retry_delay_ms: parse_env("RETRY_DELAY_MS", 500),
            retry_jitter_ms: parse_env("RETRY_JITTER_MS", 250),
        };

        let rate_limit = RateLimitConfig {
            search_per_sec: parse_env("SEARCH_RATE_PER_SEC", 1.0),
            search_burst: parse_env("SEARCH_BURST", 2),
            llm_per_sec: parse_env("LLM_RATE_PER_SEC", 2.0),
            llm_burst: parse_env("LLM_BURST", 4),
        };

        let pipeline = PipelineConfig {
            verification_char_budget: parse_env("VERIFICATION_CHAR_BUDGET", 4000),
            benchmark_concurrency: parse_env::<usize>("BENCHMARK_CONCURRENCY", 1).max(1),
            deadline_ms: env::var("PIPELINE_DEADLINE_MS")
                .ok()
                .and_then(|s| s.parse().ok()),
            style_count: parse_env("STYLE_COUNT", 3),
            max_results: search.max_results,
        };

        let export = ExportConfig {
            output_dir: PathBuf::from(
                env::var("EXPORT_DIR").unwrap_or_else(|_| "./output".to_string()),
            ),
            wkhtmltopdf_path: env::var("WKHTMLTOPDF_PATH")
                .unwrap_or_else(|_| "wkhtmltopdf".to_string()),
            pdf_header_text: optional_env("PDF_HEADER_TEXT"),
            pdf_footer_text: optional_env("PDF_FOOTER_TEXT"),
            pdf_logo_url: optional_env("PDF_LOGO_URL"),
        };

        Ok(Config {
            llm,
            search,
            database,
            logging,
            request,
            rate_limit,
            pipeline,
            export,
        })
    }
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 20000,
            max_retries: 2,
            retry_delay_ms: 500,
            retry_jitter_ms: 250,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            search_per_sec: 1.0,
            search_burst: 2,
            llm_per_sec: 2.0,
            llm_burst: 4,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            verification_char_budget: 4000,
            benchmark_concurrency: 1,
            deadline_ms: None,
            style_count: 3,
            max_results: 5,
        }
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("./output"),
            wkhtmltopdf_path: "wkhtmltopdf".to_string(),
            pdf_header_text: None,
            pdf_footer_text: None,
            pdf_logo_url: None,
        }
    }
}
