//! The redelivery engine.
//!
//! Each submission drives one flat attempt loop:
//!
//! ```text
//! ATTEMPTING ──ok──────────────────────────────▶ SUCCESS
//!     │
//!     └─failure─▶ bound / predicate / cancel ──▶ EXHAUSTED | ABORTED
//!                     │
//!                     └─retry─▶ RETRY_SCHEDULED ──delay──▶ ATTEMPTING
//! ```
//!
//! Redelivery is a loop iteration, never a nested call, so neither the
//! control stack nor the future grows with the number of attempts.

use std::sync::Arc;

use rebound_common::{
    Endpoint, Exchange, Failure, Route, Signal, event_at, internal, redelivery,
};
use tokio::sync::{broadcast, watch};

use crate::{
    cancel::CancelToken,
    disposition::{Disposition, FailureDisposition, Termination},
    endpoint::EndpointRegistry,
    error::{ConfigError, RedeliveryError, Rejected},
    policy::{ExceptionPolicy, ExceptionPolicyResolver, ExceptionPolicyTable},
    scheduler::{Scheduler, TokioScheduler},
    state::{DISPOSITION, Phase, RedeliveryState},
    stats::{RedeliveryStats, StatsSnapshot},
};

/// Runs exchanges through a route, redelivering failures according to an
/// [`ExceptionPolicyTable`].
///
/// The processor only holds immutable configuration plus atomic counters, so
/// one instance can drive any number of exchanges concurrently.
#[derive(Debug)]
pub struct RedeliveryProcessor {
    table: Arc<ExceptionPolicyTable>,
    endpoints: EndpointRegistry,
    scheduler: Arc<dyn Scheduler>,
    shutdown: watch::Sender<bool>,
    stats: RedeliveryStats,
}

impl RedeliveryProcessor {
    pub fn builder(table: impl Into<Arc<ExceptionPolicyTable>>) -> RedeliveryProcessorBuilder {
        RedeliveryProcessorBuilder {
            table: table.into(),
            endpoints: EndpointRegistry::new(),
            scheduler: Arc::new(TokioScheduler),
        }
    }

    #[must_use]
    pub fn table(&self) -> &ExceptionPolicyTable {
        &self.table
    }

    #[must_use]
    pub const fn endpoints(&self) -> &EndpointRegistry {
        &self.endpoints
    }

    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Run `exchange` through `route` until it succeeds or redelivery stops.
    ///
    /// Redelivery properties and headers left by an earlier submission are
    /// cleared first, along with any attached exception.
    ///
    /// # Errors
    ///
    /// If the exchange ends unhandled; the [`Rejected`] error hands the
    /// exchange back along with the reason.
    pub async fn submit<R>(&self, exchange: Exchange, route: &R) -> Result<Exchange, Rejected>
    where
        R: Route + ?Sized,
    {
        self.submit_cancellable(exchange, route, CancelToken::never())
            .await
    }

    /// [`submit`](Self::submit), additionally stopping once `token` is cancelled.
    ///
    /// Cancellation is observed between attempts: a pending delay is
    /// abandoned immediately, but an attempt already running is allowed to
    /// finish.
    ///
    /// # Errors
    ///
    /// If the exchange ends unhandled.
    #[tracing::instrument(level = "debug", skip_all, fields(exchange = %exchange.id()))]
    pub async fn submit_cancellable<R>(
        &self,
        mut exchange: Exchange,
        route: &R,
        token: CancelToken,
    ) -> Result<Exchange, Rejected>
    where
        R: Route + ?Sized,
    {
        let token = token.merge(CancelToken::from_receiver(self.shutdown.subscribe()));
        let mut state = RedeliveryState::new();
        let mut active: Option<Arc<ExceptionPolicy>> = None;

        // A resubmitted exchange still carries the outcome of its previous run
        RedeliveryState::clear(&mut exchange);
        exchange.take_exception();

        self.stats.record_submission();

        loop {
            let outcome = match active.as_deref().and_then(ExceptionPolicy::on_redelivery) {
                Some(hook) => match hook.process(&mut exchange).await {
                    Ok(()) => route.process(&mut exchange).await,
                    Err(failure) => Err(failure),
                },
                None => route.process(&mut exchange).await,
            };

            // Only the engine decides the outcome
            exchange.remove_property(DISPOSITION);

            let failure = match outcome {
                Ok(()) => {
                    state.set_phase(Phase::Success);
                    if state.attempts() > 0 {
                        redelivery!(
                            "Exchange {} completed after {} redeliveries",
                            exchange.id(),
                            state.attempts()
                        );
                    }
                    self.record(FailureDisposition::new(&self.endpoints).complete(&mut exchange));
                    return Ok(exchange);
                }
                Err(failure) => failure,
            };

            exchange.set_exception(failure.clone());

            let policy = match active.take() {
                Some(policy) if policy.matches(&failure) => policy,
                Some(_) => return Err(self.propagate(exchange, &state, failure)),
                None => {
                    let resolved = ExceptionPolicyResolver::new(&self.table)
                        .resolve(&failure)
                        .map(|resolved| Arc::clone(resolved.policy));

                    match resolved {
                        Some(policy) => policy,
                        None => return Err(self.propagate(exchange, &state, failure)),
                    }
                }
            };

            let attempts = state.record_failure(failure.clone());
            state.attach(&mut exchange);
            self.stats.record_failure();

            if let Some(termination) = self.termination(&exchange, &policy, attempts, &token) {
                return self
                    .finish(exchange, &mut state, &policy, termination, failure)
                    .await;
            }

            let delay = policy.delay().delay_for(attempts);
            event_at!(
                policy.retry_attempted_log_level(),
                exchange = %exchange.id(),
                attempt = attempts,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                failure = %failure,
                "Scheduling redelivery"
            );

            let scheduled = tokio::select! {
                biased;
                () = token.cancelled() => None,
                result = self.scheduler.schedule(delay) => Some(result),
            };

            match scheduled {
                Some(Ok(())) => {}
                Some(Err(source)) => {
                    state.set_phase(Phase::Aborted);
                    rebound_common::tracing::error!(
                        exchange = %exchange.id(),
                        error = %source,
                        "Unable to schedule redelivery"
                    );
                    self.record(FailureDisposition::new(&self.endpoints).fatal(&mut exchange));
                    return Err(Rejected::new(
                        exchange,
                        RedeliveryError::Scheduling {
                            attempts,
                            source,
                            failure,
                        },
                    ));
                }
                None => {
                    return self
                        .finish(exchange, &mut state, &policy, Termination::Cancelled, failure)
                        .await;
                }
            }

            state.record_delay(delay);
            state.attach(&mut exchange);
            state.mark_redelivery(&mut exchange, policy.maximum_redeliveries());
            exchange.take_exception();
            self.stats.record_redelivery();

            active = Some(policy);
        }
    }

    /// Cancel every in-flight and future redelivery loop.
    ///
    /// Loops waiting on a delay stop immediately and finalize as aborted.
    pub fn shutdown(&self) {
        internal!(level = INFO, "Redelivery processor shutting down");
        self.shutdown.send_replace(true);
    }

    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Shut down once a [`Signal::Shutdown`] (or [`Signal::Finalised`]) arrives
    pub async fn watch_shutdown(&self, mut signals: broadcast::Receiver<Signal>) {
        loop {
            match signals.recv().await {
                Ok(Signal::Shutdown | Signal::Finalised) => {
                    internal!("Redelivery processor received shutdown signal");
                    self.shutdown();
                    break;
                }
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => {
                    rebound_common::tracing::warn!("Shutdown channel closed");
                    break;
                }
            }
        }
    }

    /// Decide whether the loop stops after failed attempt number `attempts`.
    ///
    /// Cancellation wins over the bound, which wins over the predicate, so the
    /// predicate is never evaluated once redelivery is already ruled out.
    fn termination(
        &self,
        exchange: &Exchange,
        policy: &ExceptionPolicy,
        attempts: u32,
        token: &CancelToken,
    ) -> Option<Termination> {
        if token.is_cancelled() {
            return Some(Termination::Cancelled);
        }

        if !policy.allows_redelivery(attempts) {
            return Some(Termination::Exhausted);
        }

        let predicate = policy.retry_while()?;
        self.stats.record_predicate_evaluation();

        match predicate.evaluate(exchange) {
            Ok(true) => None,
            Ok(false) => Some(Termination::Exhausted),
            Err(error) => {
                rebound_common::tracing::warn!(
                    exchange = %exchange.id(),
                    predicate = %predicate.describe(),
                    %error,
                    "Retry predicate failed"
                );
                Some(Termination::PredicateFailed(error))
            }
        }
    }

    async fn finish(
        &self,
        mut exchange: Exchange,
        state: &mut RedeliveryState,
        policy: &ExceptionPolicy,
        termination: Termination,
        failure: Failure,
    ) -> Result<Exchange, Rejected> {
        let attempts = state.attempts();

        let error = match &termination {
            Termination::Exhausted => {
                state.set_phase(Phase::Exhausted);
                self.stats.record_exhausted();
                RedeliveryError::Exhausted { attempts, failure }
            }
            Termination::PredicateFailed(source) => {
                state.set_phase(Phase::Aborted);
                self.stats.record_aborted();
                RedeliveryError::PredicateEvaluation {
                    attempts,
                    source: source.clone(),
                    failure,
                }
            }
            Termination::Cancelled => {
                state.set_phase(Phase::Aborted);
                self.stats.record_aborted();
                RedeliveryError::Cancelled { attempts, failure }
            }
        };

        let disposition = FailureDisposition::new(&self.endpoints)
            .finalize(&mut exchange, policy, &termination)
            .await;
        self.record(disposition);

        if disposition == Disposition::Handled {
            Ok(exchange)
        } else {
            Err(Rejected::new(exchange, error))
        }
    }

    fn propagate(&self, mut exchange: Exchange, state: &RedeliveryState, failure: Failure) -> Rejected {
        redelivery!(
            "No exception policy covers {failure} on exchange {}, propagating",
            exchange.id()
        );
        self.record(FailureDisposition::new(&self.endpoints).propagate(&mut exchange));

        Rejected::new(
            exchange,
            RedeliveryError::Unmatched {
                attempts: state.attempts(),
                failure,
            },
        )
    }

    fn record(&self, disposition: Disposition) {
        self.stats.record_disposition(disposition);
    }
}

/// Builder for [`RedeliveryProcessor`]
#[must_use]
pub struct RedeliveryProcessorBuilder {
    table: Arc<ExceptionPolicyTable>,
    endpoints: EndpointRegistry,
    scheduler: Arc<dyn Scheduler>,
}

impl RedeliveryProcessorBuilder {
    /// Use an existing registry, replacing any endpoints added so far
    pub fn endpoints(mut self, endpoints: EndpointRegistry) -> Self {
        self.endpoints = endpoints;
        self
    }

    pub fn endpoint(self, name: impl Into<Arc<str>>, endpoint: Arc<dyn Endpoint>) -> Self {
        self.endpoints.register(name, endpoint);
        self
    }

    /// Replace the default tokio timer
    pub fn scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = scheduler;
        self
    }

    /// # Errors
    ///
    /// If a policy names a failure destination that is not registered.
    pub fn build(self) -> Result<RedeliveryProcessor, ConfigError> {
        for (index, policy) in self.table.iter().enumerate() {
            if let Some(destination) = policy.failure_destination()
                && !self.endpoints.contains(destination)
            {
                return Err(ConfigError::Policy {
                    index,
                    source: Box::new(ConfigError::UnknownDestination(destination.to_string())),
                });
            }
        }

        internal!(
            "Redelivery processor ready with {} policies and {} endpoints",
            self.table.len(),
            self.endpoints.len()
        );

        let (shutdown, _) = watch::channel(false);

        Ok(RedeliveryProcessor {
            table: self.table,
            endpoints: self.endpoints,
            scheduler: self.scheduler,
            shutdown,
            stats: RedeliveryStats::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use pretty_assertions::assert_eq;
    use rebound_common::{FailureType, FnRoute, Value};

    use super::*;
    use crate::{endpoint::CaptureEndpoint, scheduler::RecordingScheduler, state::RedeliveryExt};

    fn illegal_argument() -> Failure {
        Failure::new(
            FailureType::exception()
                .subtype("RuntimeException")
                .subtype("IllegalArgumentException"),
            "Forced",
        )
    }

    fn table(policy: ExceptionPolicy) -> ExceptionPolicyTable {
        ExceptionPolicyTable::new().with(policy)
    }

    #[tokio::test]
    async fn success_needs_no_policy() {
        let processor = RedeliveryProcessor::builder(ExceptionPolicyTable::new())
            .build()
            .unwrap();

        let route = FnRoute::new(|exchange: &mut Exchange| {
            exchange.set_body("done");
            Ok(())
        });
        let exchange = processor.submit(Exchange::new("raw"), &route).await.unwrap();

        assert_eq!(exchange.body(), &Value::from("done"));
        assert_eq!(exchange.disposition(), Some(Disposition::Completed));
        assert_eq!(exchange.redelivery_counter(), 0);
        assert_eq!(processor.stats().completed, 1);
    }

    #[tokio::test]
    async fn recovers_after_transient_failures() {
        let processor = RedeliveryProcessor::builder(table(
            ExceptionPolicy::builder(["RuntimeException"])
                .maximum_redeliveries(5)
                .redelivery_delay(crate::policy::RedeliveryDelay::none())
                .build()
                .unwrap(),
        ))
        .build()
        .unwrap();

        let calls = AtomicU32::new(0);
        let route = FnRoute::new(|_: &mut Exchange| {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(illegal_argument())
            } else {
                Ok(())
            }
        });

        let exchange = processor.submit(Exchange::default(), &route).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(exchange.redelivery_counter(), 2);
        assert!(exchange.is_redelivered());
        assert!(!exchange.is_failed());

        let stats = processor.stats();
        assert_eq!(stats.redeliveries, 2);
        assert_eq!(stats.failures, 2);
        assert_eq!(stats.completed, 1);
    }

    #[test]
    fn unknown_destination_is_rejected() {
        let result = RedeliveryProcessor::builder(table(
            ExceptionPolicy::builder(["Exception"])
                .to("mock:missing")
                .build()
                .unwrap(),
        ))
        .build();

        assert!(matches!(
            result,
            Err(ConfigError::Policy { index: 0, ref source })
                if matches!(**source, ConfigError::UnknownDestination(ref name) if name == "mock:missing")
        ));
    }

    #[tokio::test]
    async fn predicate_sees_the_current_failure() {
        let capture = Arc::new(CaptureEndpoint::new());
        let scheduler = Arc::new(RecordingScheduler::new());
        let processor = RedeliveryProcessor::builder(table(
            ExceptionPolicy::builder(["Exception"])
                .retry_while_expression("${exception.message} != 'give up'")
                .redelivery_delay(crate::policy::RedeliveryDelay::none())
                .to("mock:error")
                .build()
                .unwrap(),
        ))
        .endpoint("mock:error", Arc::clone(&capture) as Arc<dyn Endpoint>)
        .scheduler(Arc::clone(&scheduler) as Arc<dyn Scheduler>)
        .build()
        .unwrap();

        let calls = AtomicU32::new(0);
        let route = FnRoute::new(|_: &mut Exchange| {
            let message = if calls.fetch_add(1, Ordering::SeqCst) < 3 {
                "again"
            } else {
                "give up"
            };
            Err(Failure::new(FailureType::exception(), message))
        });

        let rejected = processor
            .submit(Exchange::default(), &route)
            .await
            .unwrap_err();

        assert!(rejected.error().is_exhausted());
        assert_eq!(rejected.error().attempts(), 4);
        assert_eq!(scheduler.delays().len(), 3);
        assert_eq!(capture.len(), 1);
        assert_eq!(rejected.exchange().disposition(), Some(Disposition::Failed));
    }
}
