use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use super::handler::{HandlerError, RequestHandler};
use crate::queue::IncomingRequest;

/// Handler double that replays scripted outcomes, succeeding once the script runs out.
#[derive(Default)]
pub(super) struct ScriptedHandler {
    outcomes: Mutex<VecDeque<Result<(), HandlerError>>>,
    fail_always: bool,
    /// Cancelled at the start of every call.
    cancel_on_call: Option<CancellationToken>,
    calls: Mutex<Vec<IncomingRequest>>,
}

impl ScriptedHandler {
    pub(super) fn with_outcomes(outcomes: Vec<Result<(), HandlerError>>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into_iter().collect()),
            ..Self::default()
        }
    }

    pub(super) fn always_failing() -> Self {
        Self {
            fail_always: true,
            ..Self::default()
        }
    }

    /// Fails every call after requesting shutdown, as a signal arriving mid-request would.
    pub(super) fn failing_during_shutdown(token: CancellationToken) -> Self {
        Self {
            fail_always: true,
            cancel_on_call: Some(token),
            ..Self::default()
        }
    }

    pub(super) fn calls(&self) -> Vec<IncomingRequest> {
        self.calls.lock().expect("calls mutex poisoned").clone()
    }

    pub(super) fn call_count(&self) -> usize {
        self.calls.lock().expect("calls mutex poisoned").len()
    }
}

impl RequestHandler for ScriptedHandler {
    fn handle<'a>(&'a self, request: &'a IncomingRequest) -> BoxFuture<'a, Result<(), HandlerError>> {
        Box::pin(async move {
            self.calls
                .lock()
                .expect("calls mutex poisoned")
                .push(request.clone());
            if let Some(token) = &self.cancel_on_call {
                token.cancel();
            }
            if self.fail_always {
                return Err(HandlerError::new("downstream unavailable"));
            }
            self.outcomes
                .lock()
                .expect("outcomes mutex poisoned")
                .pop_front()
                .unwrap_or(Ok(()))
        })
    }
}

/// Polls `condition` until it holds, panicking after five seconds.
pub(super) async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
