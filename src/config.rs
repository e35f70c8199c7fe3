// SPDX-License-Identifier: Apache-2.0

//! Engine configuration
//!
//! A process-wide [`EngineConfig`] is read from the environment on first use and can be
//! replaced at runtime (the C boundary exposes `buc_set_backend` and
//! `buc_set_check_sorted` for this). Every engine entry point also has a `*_with`
//! variant taking an explicit configuration, which is what the tests use.
//!
//! | Variable           | Values                 | Default |
//! |--------------------|------------------------|---------|
//! | `BUC_BACKEND`      | `auto`, `host`, `cuda` | `auto`  |
//! | `BUC_BLOCK_SIZE`   | elements per tile      | 16384   |
//! | `BUC_THREADS`      | worker thread count    | rayon's |
//! | `BUC_CHECK_SORTED` | `true`/`false`/`1`/`0` | `false` |

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::types::{BucError, Result};

/// Memory space the engines operate in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// CUDA when compiled in and a device initialises, host otherwise.
    #[default]
    Auto,
    /// Buffers are host memory, work runs on the rayon pool.
    Host,
    /// Buffers are CUDA device pointers.
    Cuda,
}

impl Backend {
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            BACKEND_CODE_AUTO => Some(Backend::Auto),
            BACKEND_CODE_HOST => Some(Backend::Host),
            BACKEND_CODE_CUDA => Some(Backend::Cuda),
            _ => None,
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "auto" | "" => Ok(Backend::Auto),
            "host" | "cpu" => Ok(Backend::Host),
            "cuda" | "gpu" => Ok(Backend::Cuda),
            other => Err(BucError::Config(format!("unknown backend '{}'", other))),
        }
    }

    /// Resolves `Auto` against what this build and machine provide.
    pub fn resolve(self) -> Result<Backend> {
        let has_cuda = crate::dispatch::get_hw_capabilities().has_cuda;
        match self {
            Backend::Host => Ok(Backend::Host),
            Backend::Cuda if has_cuda => Ok(Backend::Cuda),
            Backend::Cuda => Err(BucError::Unsupported(
                "CUDA backend requested but no CUDA device is available".to_string(),
            )),
            Backend::Auto if has_cuda => Ok(Backend::Cuda),
            Backend::Auto => Ok(Backend::Host),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub backend: Backend,
    /// Elements per tile on the host backend.
    pub block_size: usize,
    /// Dedicated worker count; `None` runs on rayon's global pool.
    pub worker_threads: Option<usize>,
    /// Verify that upper/lower-bound inputs are sorted before searching.
    pub check_sorted: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Auto,
            block_size: DEFAULT_BLOCK_SIZE,
            worker_threads: None,
            check_sorted: false,
        }
    }
}

impl EngineConfig {
    /// Host backend with default tiling, independent of the environment.
    pub fn host() -> Self {
        Self {
            backend: Backend::Host,
            ..Self::default()
        }
    }

    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = Some(threads);
        self
    }

    pub fn with_check_sorted(mut self, check_sorted: bool) -> Self {
        self.check_sorted = check_sorted;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(MIN_BLOCK_SIZE..=MAX_BLOCK_SIZE).contains(&self.block_size) {
            return Err(BucError::Config(format!(
                "block_size {} outside [{}, {}]",
                self.block_size, MIN_BLOCK_SIZE, MAX_BLOCK_SIZE
            )));
        }
        if let Some(threads) = self.worker_threads {
            if threads == 0 || threads > MAX_WORKER_THREADS {
                return Err(BucError::Config(format!(
                    "worker_threads {} outside [1, {}]",
                    threads, MAX_WORKER_THREADS
                )));
            }
        }
        Ok(())
    }

    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a configuration from any key lookup; unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = lookup(ENV_BACKEND) {
            config.backend = Backend::parse(&value)?;
        }
        if let Some(value) = lookup(ENV_BLOCK_SIZE) {
            config.block_size = value.trim().parse().map_err(|e| {
                BucError::Config(format!("{}='{}': {}", ENV_BLOCK_SIZE, value, e))
            })?;
        }
        if let Some(value) = lookup(ENV_THREADS) {
            let threads: usize = value
                .trim()
                .parse()
                .map_err(|e| BucError::Config(format!("{}='{}': {}", ENV_THREADS, value, e)))?;
            config.worker_threads = Some(threads);
        }
        if let Some(value) = lookup(ENV_CHECK_SORTED) {
            config.check_sorted = parse_flag(&value).ok_or_else(|| {
                BucError::Config(format!("{}='{}' is not a boolean", ENV_CHECK_SORTED, value))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Runs `op` on the worker pool this configuration selects.
    pub(crate) fn install<R, F>(&self, op: F) -> Result<R>
    where
        F: FnOnce() -> R + Send,
        R: Send,
    {
        match self.worker_threads {
            None => Ok(op()),
            Some(threads) => Ok(thread_pool(threads)?.install(op)),
        }
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

lazy_static::lazy_static! {
  static ref GLOBAL_CONFIG: RwLock<Option<EngineConfig>> = RwLock::new(None);
  // Pools are keyed by thread count and live for the process
  static ref THREAD_POOLS: Mutex<HashMap<usize, Arc<rayon::ThreadPool>>> = Mutex::new(HashMap::new());
}

/// Current process-wide configuration, read from the environment on first use.
///
/// A malformed environment is reported once through `log` and the defaults are used.
pub fn global_config() -> EngineConfig {
    if let Some(config) = GLOBAL_CONFIG
        .read()
        .unwrap_or_else(|e| e.into_inner())
        .as_ref()
    {
        return config.clone();
    }

    let mut slot = GLOBAL_CONFIG.write().unwrap_or_else(|e| e.into_inner());
    slot.get_or_insert_with(|| match EngineConfig::from_env() {
        Ok(config) => {
            debug!("BUC CONFIG: loaded from environment: {:?}", config);
            config
        }
        Err(e) => {
            warn!("BUC CONFIG: ignoring environment ({}), using defaults", e);
            EngineConfig::default()
        }
    })
    .clone()
}

pub fn set_global_config(config: EngineConfig) -> Result<()> {
    config.validate()?;
    debug!("BUC CONFIG: replaced global configuration: {:?}", config);
    *GLOBAL_CONFIG.write().unwrap_or_else(|e| e.into_inner()) = Some(config);
    Ok(())
}

/// Applies `update` to the global configuration and stores the result if it validates.
pub fn update_global_config<F>(update: F) -> Result<()>
where
    F: FnOnce(&mut EngineConfig),
{
    let mut config = global_config();
    update(&mut config);
    set_global_config(config)
}

fn thread_pool(threads: usize) -> Result<Arc<rayon::ThreadPool>> {
    let mut pools = THREAD_POOLS.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(pool) = pools.get(&threads) {
        return Ok(Arc::clone(pool));
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(|i| format!("buc-worker-{}", i))
        .build()
        .map_err(|e| BucError::Device(format!("failed to start {} workers: {}", threads, e)))?;
    debug!("BUC CONFIG: started dedicated pool with {} workers", threads);

    let pool = Arc::new(pool);
    pools.insert(threads, Arc::clone(&pool));
    Ok(pool)
}
