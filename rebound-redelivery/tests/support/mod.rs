//! Shared fixtures for redelivery integration tests
#![allow(dead_code)] // Not every suite uses every fixture

use std::{hint::black_box, sync::Arc, time::Duration};

use async_trait::async_trait;
use parking_lot::Mutex;
use rebound_common::{Endpoint, Failure, FailureType};
use rebound_redelivery::{
    CaptureEndpoint, ExceptionPolicy, ExceptionPolicyTable, RedeliveryProcessor, Scheduler,
    SchedulingError,
};

pub const DEAD_LETTER: &str = "mock:error";

pub fn runtime_exception() -> FailureType {
    FailureType::exception().subtype("RuntimeException")
}

pub fn illegal_argument() -> Failure {
    Failure::new(
        runtime_exception().subtype("IllegalArgumentException"),
        "Forced",
    )
}

pub fn io_exception() -> Failure {
    Failure::new(FailureType::exception().subtype("IOException"), "Connection reset")
}

/// Address of a local in a fresh frame, a proxy for current stack depth
#[inline(never)]
pub fn stack_marker() -> usize {
    let local = 0_u8;
    black_box(&raw const local) as usize
}

/// Records stack markers so tests can compare depth across attempts
#[derive(Debug, Default)]
pub struct StackProbe {
    markers: Mutex<Vec<usize>>,
}

impl StackProbe {
    pub fn record(&self) {
        self.markers.lock().push(stack_marker());
    }

    pub fn markers(&self) -> Vec<usize> {
        self.markers.lock().clone()
    }
}

pub struct Harness {
    pub processor: Arc<RedeliveryProcessor>,
    pub dead_letter: Arc<CaptureEndpoint>,
}

/// A processor with a capture endpoint registered as [`DEAD_LETTER`]
pub fn harness(policies: impl IntoIterator<Item = ExceptionPolicy>) -> Harness {
    harness_with(policies, None)
}

pub fn harness_with(
    policies: impl IntoIterator<Item = ExceptionPolicy>,
    scheduler: Option<Arc<dyn Scheduler>>,
) -> Harness {
    let dead_letter = Arc::new(CaptureEndpoint::new());
    let table = policies.into_iter().collect::<ExceptionPolicyTable>();

    let mut builder = RedeliveryProcessor::builder(table)
        .endpoint(DEAD_LETTER, Arc::clone(&dead_letter) as Arc<dyn Endpoint>);
    if let Some(scheduler) = scheduler {
        builder = builder.scheduler(scheduler);
    }

    Harness {
        processor: Arc::new(builder.build().unwrap()),
        dead_letter,
    }
}

/// A scheduler whose timer is always unavailable
#[derive(Debug)]
pub struct Unschedulable;

#[async_trait]
impl Scheduler for Unschedulable {
    async fn schedule(&self, _: Duration) -> Result<(), SchedulingError> {
        Err(SchedulingError::Rejected("timer wheel full".to_string()))
    }
}
