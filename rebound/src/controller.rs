use std::{
    path::Path,
    sync::{
        Arc, LazyLock,
        atomic::{AtomicU32, Ordering},
    },
};

use ahash::{AHashMap, AHashSet};
use anyhow::Context;
use rebound_common::{
    Endpoint, Exchange, Failure, FailureType, FnRoute, Signal, internal,
    logging::LogLevel,
    tracing,
};
use rebound_redelivery::{
    CaptureEndpoint, ExceptionPolicy, ExceptionPolicyResolver, LogEndpoint, RedeliveryConfig,
    RedeliveryProcessor, Rejected, StatsSnapshot,
};
use serde::Deserialize;
use tokio::sync::broadcast;

/// Top-level configuration, usually read from `rebound.config.ron`
#[derive(Debug, Default, Deserialize)]
pub struct Rebound {
    #[serde(default)]
    redelivery: RedeliveryConfig,
    #[serde(alias = "endpoint", default)]
    endpoints: Vec<EndpointConfig>,
}

/// A named endpoint policies can route exhausted exchanges to
#[derive(Debug, Clone, Deserialize)]
pub struct EndpointConfig {
    pub name: String,
    #[serde(default)]
    pub kind: EndpointKind,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub enum EndpointKind {
    /// Log each received exchange
    Log {
        #[serde(default = "default_log_level")]
        level: LogLevel,
    },
    /// Keep received exchanges in memory
    #[default]
    Capture,
}

const fn default_log_level() -> LogLevel {
    LogLevel::Warn
}

pub static SHUTDOWN_BROADCAST: LazyLock<broadcast::Sender<Signal>> = LazyLock::new(|| {
    let (sender, _receiver) = broadcast::channel(64);
    sender
});

/// Wait for CTRL+C or SIGTERM, then broadcast [`Signal::Shutdown`].
///
/// # Errors
///
/// If the signal handlers can't be installed or nobody is listening.
pub async fn shutdown() -> anyhow::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            internal!("CTRL+C entered, stopping redelivery");
        }
        _ = terminate.recv() => {
            internal!("Terminate Signal received, stopping redelivery");
        }
    };

    SHUTDOWN_BROADCAST
        .send(Signal::Shutdown)
        .context("No redelivery processor is listening for shutdown")?;

    Ok(())
}

impl Rebound {
    /// # Errors
    ///
    /// If the file can't be read or isn't a valid configuration.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        Self::from_ron(&content).with_context(|| format!("Invalid config in {}", path.display()))
    }

    /// # Errors
    ///
    /// If `content` isn't valid RON for this configuration.
    pub fn from_ron(content: &str) -> anyhow::Result<Self> {
        Ok(ron::Options::default()
            .with_default_extension(ron::extensions::Extensions::IMPLICIT_SOME)
            .from_str(content)?)
    }

    #[must_use]
    pub const fn redelivery(&self) -> &RedeliveryConfig {
        &self.redelivery
    }

    #[must_use]
    pub fn endpoints(&self) -> &[EndpointConfig] {
        &self.endpoints
    }

    /// Build the policy table, endpoints and processor this configuration
    /// describes.
    ///
    /// # Errors
    ///
    /// If a policy is invalid, an endpoint name is declared twice, or a
    /// policy routes to an endpoint that isn't declared.
    pub fn build(&self) -> anyhow::Result<Engine> {
        let table = self.redelivery.build_table()?;

        let mut builder = RedeliveryProcessor::builder(table);
        let mut captures = AHashMap::new();
        let mut declared = AHashSet::new();

        for endpoint in &self.endpoints {
            let name: Arc<str> = Arc::from(endpoint.name.as_str());
            anyhow::ensure!(
                declared.insert(Arc::clone(&name)),
                "Endpoint '{name}' is declared more than once"
            );

            let endpoint: Arc<dyn Endpoint> = match endpoint.kind {
                EndpointKind::Log { level } => Arc::new(LogEndpoint::new(Arc::clone(&name), level)),
                EndpointKind::Capture => {
                    let capture = Arc::new(CaptureEndpoint::new());
                    captures.insert(Arc::clone(&name), Arc::clone(&capture));
                    capture
                }
            };

            builder = builder.endpoint(name, endpoint);
        }

        let processor = builder.build()?;
        internal!(
            "Built redelivery processor with {} policies and {} endpoints",
            processor.table().len(),
            processor.endpoints().len()
        );

        Ok(Engine {
            processor: Arc::new(processor),
            captures,
        })
    }
}

/// A processor assembled from a [`Rebound`] configuration
#[derive(Debug)]
pub struct Engine {
    processor: Arc<RedeliveryProcessor>,
    captures: AHashMap<Arc<str>, Arc<CaptureEndpoint>>,
}

/// How a failure type resolves against the configured policies
#[derive(Debug)]
pub struct Resolution {
    pub index: usize,
    /// The declared type that matched, which may be an ancestor of the failure
    pub matched: String,
    pub policy: Arc<ExceptionPolicy>,
}

/// Outcome of [`Engine::simulate`]
#[derive(Debug)]
pub struct Simulation {
    /// Times the route was invoked
    pub invocations: u32,
    pub outcome: Result<Exchange, Rejected>,
    pub stats: StatsSnapshot,
}

impl Engine {
    #[must_use]
    pub fn processor(&self) -> &Arc<RedeliveryProcessor> {
        &self.processor
    }

    /// The in-memory endpoint registered as `name`, if it is a capture endpoint
    #[must_use]
    pub fn capture(&self, name: &str) -> Option<&Arc<CaptureEndpoint>> {
        self.captures.get(name)
    }

    /// Resolve a failure type written as a root-first lineage, such as
    /// `Exception/RuntimeException/IllegalArgumentException`.
    ///
    /// # Errors
    ///
    /// If the lineage names no types.
    pub fn resolve(&self, lineage: &str) -> anyhow::Result<Option<Resolution>> {
        let kind = parse_lineage(lineage)?;

        Ok(ExceptionPolicyResolver::new(self.processor.table())
            .resolve_type(&kind)
            .map(|resolved| Resolution {
                index: resolved.index,
                matched: resolved.matched.name().to_string(),
                policy: Arc::clone(resolved.policy),
            }))
    }

    /// Run a route that raises `lineage` on its first `failures` attempts and
    /// succeeds afterwards.
    ///
    /// # Errors
    ///
    /// If the lineage names no types.
    pub async fn simulate(&self, lineage: &str, failures: u32) -> anyhow::Result<Simulation> {
        let kind = parse_lineage(lineage)?;
        let invocations = AtomicU32::new(0);

        let route = FnRoute::new(|exchange: &mut Exchange| {
            let attempt = invocations.fetch_add(1, Ordering::SeqCst) + 1;
            exchange.set_header("SimulatedAttempt", attempt);

            if attempt <= failures {
                Err(Failure::new(
                    kind.clone(),
                    format!("Simulated failure {attempt} of {failures}"),
                ))
            } else {
                Ok(())
            }
        });

        tracing::debug!(%lineage, failures, "Simulating route");
        let outcome = self.processor.submit(Exchange::default(), &route).await;

        Ok(Simulation {
            invocations: invocations.load(Ordering::SeqCst),
            outcome,
            stats: self.processor.stats(),
        })
    }

    /// Stop redelivering once [`SHUTDOWN_BROADCAST`] fires
    pub async fn watch_shutdown(&self) {
        self.processor
            .watch_shutdown(SHUTDOWN_BROADCAST.subscribe())
            .await;
    }
}

fn parse_lineage(lineage: &str) -> anyhow::Result<FailureType> {
    FailureType::from_lineage(lineage)
        .with_context(|| format!("'{lineage}' does not name a failure type"))
}
