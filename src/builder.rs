//! Builder pattern for constructing Stride runtimes.
//!
//! The builder supports multiple configuration sources using figment:
//! - Default values
//! - Config files (TOML, YAML, JSON)
//! - Environment variables
//! - Programmatic overrides
//! - CLI arguments via clap

use crate::config::StrideConfig;
use crate::error::Result;
use crate::runtime::StrideRuntime;

use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use figment::Figment;
use prometheus::Registry;
use std::path::Path;

/// Builder for constructing a `StrideRuntime`.
///
/// Configuration sources are merged in the following order (later sources
/// override earlier):
/// 1. Default values
/// 2. Config files (in order added)
/// 3. Environment variables
/// 4. Programmatic overrides
///
/// # Examples
///
/// ```ignore
/// use stride_rs::StrideBuilder;
///
/// let runtime = StrideBuilder::new()
///     .file("stride.toml")
///     .env_prefix("STRIDE")
///     .prefix("myapp")
///     .worker_threads(6)
///     .build()?;
/// ```
pub struct StrideBuilder {
    figment: Figment,
    prometheus_registry: Option<Registry>,
}

impl Default for StrideBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StrideBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrideBuilder")
            .field("figment", &self.figment)
            .field(
                "prometheus_registry",
                &self.prometheus_registry.as_ref().map(|_| "<Registry>"),
            )
            .finish()
    }
}

impl StrideBuilder {
    /// Create a new builder with default configuration.
    pub fn new() -> Self {
        Self {
            figment: Figment::from(Serialized::defaults(StrideConfig::default())),
            prometheus_registry: None,
        }
    }

    /// Add a configuration file.
    ///
    /// Supports TOML, YAML, and JSON formats (detected by extension).
    /// Files are merged in the order they are added.
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let builder = StrideBuilder::new()
    ///     .file("stride.toml")
    ///     .file("stride.local.toml"); // Overrides values from stride.toml
    /// ```
    pub fn file<P: AsRef<Path>>(mut self, path: P) -> Self {
        let path = path.as_ref();
        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        self.figment = match extension.to_lowercase().as_str() {
            "yaml" | "yml" => self.figment.merge(Yaml::file(path)),
            "json" => self.figment.merge(Json::file(path)),
            // TOML for .toml and anything unrecognized
            _ => self.figment.merge(Toml::file(path)),
        };
        self
    }

    /// Add environment variables with a prefix.
    ///
    /// Environment variables are expected in the format `{PREFIX}_{KEY}`,
    /// e.g., `STRIDE_CPUSET`, `STRIDE_WORKER_THREADS`.
    pub fn env_prefix(mut self, prefix: &str) -> Self {
        self.figment = self.figment.merge(Env::prefixed(&format!("{prefix}_")));
        self
    }

    /// Set the thread name prefix.
    ///
    /// Worker threads will be named `{prefix}-worker-{NNNN}`.
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.figment = self
            .figment
            .merge(Serialized::default("prefix", prefix.into()));
        self
    }

    /// Set the CPU set string.
    ///
    /// Format: `"0-7,16-23"` for ranges, `"0,2,4,6"` for individual CPUs.
    pub fn cpuset(mut self, cpuset: impl Into<String>) -> Self {
        self.figment = self
            .figment
            .merge(Serialized::default("cpuset", cpuset.into()));
        self
    }

    /// Set the number of worker threads.
    ///
    /// Default is every CPU left visible by the cpuset.
    pub fn worker_threads(mut self, n: usize) -> Self {
        self.figment = self.figment.merge(Serialized::default("worker_threads", n));
        self
    }

    /// Set the default chunk size for loops on this runtime.
    ///
    /// A chunk is the unit of work a worker claims per cursor lock.
    /// `chunk_size = 1` processes indices in globally increasing order but
    /// pays one lock round-trip per index; larger chunks amortize the lock
    /// and give up any ordering between chunks. Default is 4; loops can
    /// override per call via `LoopOptions::chunk_size`.
    pub fn chunk_size(mut self, n: i64) -> Self {
        self.figment = self.figment.merge(Serialized::default("chunk_size", n));
        self
    }

    /// Provide an external Prometheus registry for metrics exposition.
    ///
    /// When a registry is provided, runtime metrics will be registered and
    /// available for Prometheus scraping.
    pub fn prometheus_registry(mut self, registry: Registry) -> Self {
        self.prometheus_registry = Some(registry);
        self
    }

    /// Apply CLI argument overrides.
    ///
    /// This method applies any non-None values from the `StrideArgs` struct.
    pub fn with_cli_args(mut self, args: &StrideArgs) -> Self {
        if let Some(ref prefix) = args.stride_prefix {
            self.figment = self
                .figment
                .merge(Serialized::default("prefix", prefix.clone()));
        }
        if let Some(ref cpuset) = args.stride_cpuset {
            self.figment = self
                .figment
                .merge(Serialized::default("cpuset", cpuset.clone()));
        }
        if let Some(threads) = args.stride_worker_threads {
            self.figment = self
                .figment
                .merge(Serialized::default("worker_threads", threads));
        }
        if let Some(chunk) = args.stride_chunk_size {
            self.figment = self.figment.merge(Serialized::default("chunk_size", chunk));
        }
        self
    }

    /// Build the runtime.
    ///
    /// This extracts the configuration and constructs the pinned worker pool.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration extraction fails
    /// - CPU set is invalid or contains unavailable CPUs
    /// - `chunk_size` or `worker_threads` is below 1
    /// - Worker pool construction fails
    pub fn build(self) -> Result<StrideRuntime> {
        let mut config: StrideConfig = self.figment.extract().map_err(Box::new)?;
        config.prometheus_registry = self.prometheus_registry;
        StrideRuntime::from_config(config)
    }
}

/// CLI arguments for Stride configuration.
///
/// Use with clap's `Parser` derive macro. These arguments can be applied
/// to a `StrideBuilder` using `with_cli_args`.
///
/// # Examples
///
/// ```ignore
/// use clap::Parser;
/// use stride_rs::{StrideArgs, StrideBuilder};
///
/// #[derive(Parser)]
/// struct MyArgs {
///     #[command(flatten)]
///     stride: StrideArgs,
///     // ... other args
/// }
///
/// let args = MyArgs::parse();
/// let runtime = StrideBuilder::new()
///     .with_cli_args(&args.stride)
///     .build()?;
/// ```
#[derive(Debug, Default, Clone, clap::Args)]
pub struct StrideArgs {
    /// Thread name prefix
    #[arg(long)]
    pub stride_prefix: Option<String>,

    /// CPU set (e.g., "0-7,16-23")
    #[arg(long)]
    pub stride_cpuset: Option<String>,

    /// Number of worker threads
    #[arg(long)]
    pub stride_worker_threads: Option<usize>,

    /// Default chunk size for parallel loops
    #[arg(long)]
    pub stride_chunk_size: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let config: StrideConfig = StrideBuilder::new().figment.extract().unwrap();
        assert_eq!(config.prefix, "stride");
        assert!(config.cpuset.is_none());
        assert!(config.worker_threads.is_none());
        assert_eq!(config.chunk_size, 4);
    }

    #[test]
    fn test_builder_programmatic_override() {
        let config: StrideConfig = StrideBuilder::new()
            .prefix("myapp")
            .cpuset("0-3")
            .worker_threads(3)
            .chunk_size(16)
            .figment
            .extract()
            .unwrap();

        assert_eq!(config.prefix, "myapp");
        assert_eq!(config.cpuset, Some("0-3".to_string()));
        assert_eq!(config.worker_threads, Some(3));
        assert_eq!(config.chunk_size, 16);
    }

    #[test]
    fn test_builder_cli_args() {
        let args = StrideArgs {
            stride_prefix: Some("cliapp".to_string()),
            stride_cpuset: Some("4-7".to_string()),
            stride_worker_threads: Some(3),
            stride_chunk_size: Some(8),
        };

        let config: StrideConfig = StrideBuilder::new()
            .prefix("original")
            .with_cli_args(&args)
            .figment
            .extract()
            .unwrap();

        // CLI args should override programmatic values
        assert_eq!(config.prefix, "cliapp");
        assert_eq!(config.cpuset, Some("4-7".to_string()));
        assert_eq!(config.worker_threads, Some(3));
        assert_eq!(config.chunk_size, 8);
    }

    #[test]
    fn test_builder_partial_cli_args() {
        let args = StrideArgs {
            stride_prefix: Some("cliapp".to_string()),
            ..StrideArgs::default()
        };

        let config: StrideConfig = StrideBuilder::new()
            .prefix("original")
            .cpuset("0-3")
            .with_cli_args(&args)
            .figment
            .extract()
            .unwrap();

        // Only prefix should be overridden
        assert_eq!(config.prefix, "cliapp");
        assert_eq!(config.cpuset, Some("0-3".to_string()));
    }

    #[test]
    fn test_builder_builds_runtime() {
        let runtime = StrideBuilder::new()
            .prefix("buildtest")
            .worker_threads(1)
            .build()
            .unwrap();

        assert_eq!(runtime.worker_threads(), 1);
        assert_eq!(runtime.config().prefix, "buildtest");
    }
}
