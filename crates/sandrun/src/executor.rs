//! Execution coordinator
//!
//! Ties the registry, limiter and cache together: a cached result is returned
//! without touching a permit or a runner; a miss is computed once per key under
//! a permit and then cached until its TTL expires.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, instrument};

use crate::cache::{Fingerprint, FingerprintCache};
use crate::config::{Config, is_plain_file_name};
use crate::limiter::{ConcurrencyLimiter, LimiterError};
use crate::runner::{Job, Registry, Runner, RunnerError};
use crate::sandbox::Sandbox;
use crate::types::{ExecutionRequest, ExecutionResult, Stage};

#[derive(Debug, Error)]
pub enum ExecuteError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("overloaded: {0}")]
    Overloaded(#[source] LimiterError),

    #[error("execution failed: {source}")]
    Runner {
        stage: Option<Stage>,
        #[source]
        source: RunnerError,
    },
}

impl ExecuteError {
    /// Stage a runner failure is attributed to
    pub fn stage(&self) -> Option<Stage> {
        match self {
            ExecuteError::Runner { stage, .. } => *stage,
            _ => None,
        }
    }
}

impl From<RunnerError> for ExecuteError {
    fn from(source: RunnerError) -> Self {
        ExecuteError::Runner {
            stage: source.stage(),
            source,
        }
    }
}

/// Entry point for executing requests
#[derive(Debug)]
pub struct Executor {
    registry: Arc<Registry>,
    limiter: ConcurrencyLimiter,
    cache: Option<FingerprintCache>,
    acquire_timeout: Option<Duration>,
}

impl Executor {
    /// Create an executor without a cache
    pub fn new(registry: impl Into<Arc<Registry>>, limiter: ConcurrencyLimiter) -> Self {
        Self {
            registry: registry.into(),
            limiter,
            cache: None,
            acquire_timeout: None,
        }
    }

    /// Wire up registry, limiter and cache from the configuration
    pub fn from_config(config: &Config, sandbox: Arc<dyn Sandbox>) -> Self {
        let registry = Registry::from_config(config, sandbox);
        let executor = Self::new(registry, ConcurrencyLimiter::new(config.cache.max_parallel))
            .with_acquire_timeout(config.cache.acquire_timeout());
        match config.cache.ttl() {
            Some(ttl) => executor.with_cache(FingerprintCache::new(ttl)),
            None => executor,
        }
    }

    pub fn with_cache(mut self, cache: FingerprintCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Bound how long a request waits for a free slot
    pub fn with_acquire_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn limiter(&self) -> &ConcurrencyLimiter {
        &self.limiter
    }

    pub fn cache(&self) -> Option<&FingerprintCache> {
        self.cache.as_ref()
    }

    /// Execute a request, serving it from the cache when possible
    ///
    /// Failures of the user's program (compile errors, non-zero exits,
    /// timeouts) are successful results and are cached like any other. Errors
    /// are never cached.
    #[instrument(
        skip(self, request),
        fields(language = %request.language, version = %request.version)
    )]
    pub async fn execute(
        &self,
        request: &ExecutionRequest,
    ) -> Result<Arc<ExecutionResult>, ExecuteError> {
        validate(request)?;

        let Some(cache) = &self.cache else {
            let runner = self.resolve(&request.language)?;
            return self.run(runner.as_ref(), request).await.map(Arc::new);
        };

        let key = Fingerprint::new(&request.language, &request.version, &request.code);
        if let Some(hit) = cache.get(&key).await {
            debug!(%key, "cache hit");
            return Ok(hit);
        }
        let runner = self.resolve(&request.language)?;

        cache
            .claim(&key)
            .await
            .fill(|| async {
                debug!(%key, "cache miss");
                self.run(runner.as_ref(), request).await.map(Arc::new)
            })
            .await
    }

    fn resolve(&self, language: &str) -> Result<Arc<dyn Runner>, ExecuteError> {
        self.registry
            .resolve(language)
            .ok_or_else(|| ExecuteError::UnsupportedLanguage(language.to_string()))
    }

    /// Run under a permit; the permit is released when this returns
    async fn run(
        &self,
        runner: &dyn Runner,
        request: &ExecutionRequest,
    ) -> Result<ExecutionResult, ExecuteError> {
        let _permit = self
            .limiter
            .acquire(self.acquire_timeout)
            .await
            .map_err(ExecuteError::Overloaded)?;
        Ok(runner.execute(Job::from_request(request)).await?)
    }
}

fn validate(request: &ExecutionRequest) -> Result<(), ExecuteError> {
    if request.language.is_empty() {
        return Err(ExecuteError::InvalidRequest("language is required".to_string()));
    }
    if request.version.is_empty() {
        return Err(ExecuteError::InvalidRequest("version is required".to_string()));
    }
    if request.code.is_empty() {
        return Err(ExecuteError::InvalidRequest("code is required".to_string()));
    }
    if !is_plain_file_name(&request.version) {
        return Err(ExecuteError::InvalidRequest(format!(
            "invalid version '{}'",
            request.version
        )));
    }
    if let Some(filename) = &request.filename
        && !is_plain_file_name(filename)
    {
        return Err(ExecuteError::InvalidRequest(format!(
            "invalid filename '{filename}'"
        )));
    }
    Ok(())
}
