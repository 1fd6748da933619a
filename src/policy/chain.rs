//! Policy chain execution.
//!
//! Two chain variants share one execution model but iterate in opposite
//! directions: the request chain applies policies front to back, the
//! response chain applies the same resolved list back to front (the last
//! policy to see the request is the first to see the response).
//!
//! Lifecycle: `Created -> Applying -> (Streaming | Failed | Aborted) -> Ended`.
//! Once streaming, body chunks are routed through every installed tap in
//! order and reach the sink in exactly the order they were written; the end
//! handler fires exactly once, after the last chunk's handler returned, and
//! never after a failure or abort.

use crate::error::PolicyError;
use crate::policy::{PolicyContext, PolicyVerdict, PolicyWithConfig};
use crate::types::{ApiRequest, ApiResponse, PolicyFailure};
use bytes::Bytes;

/// Chain lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainState {
    Created,
    Applying,
    Streaming,
    Failed,
    Aborted,
    Ended,
}

/// Result of driving a chain's policy list to completion.
#[derive(Debug)]
pub enum ChainOutcome {
    /// Every policy continued; the chain is now streaming toward the
    /// terminal step.
    Continue,
    /// A policy rejected the request; remaining policies were skipped.
    Rejected(PolicyFailure),
}

/// A per-chain body inspector/transformer installed by a policy.
///
/// Taps may replace, split, swallow, or buffer chunks; anything buffered is
/// flushed by `on_end`, and flushed chunks still pass through the taps
/// downstream of the one that produced them.
pub trait BodyTap: Send {
    fn on_chunk(&mut self, chunk: Bytes) -> Vec<Bytes>;

    fn on_end(&mut self) -> Vec<Bytes> {
        Vec::new()
    }
}

/// Streaming state machine shared by both chain directions.
struct ChainCore {
    state: ChainState,
    taps: Vec<Box<dyn BodyTap>>,
    body_handler: Option<Box<dyn FnMut(Bytes) + Send>>,
    end_handler: Option<Box<dyn FnOnce() + Send>>,
}

impl ChainCore {
    fn new() -> Self {
        Self {
            state: ChainState::Created,
            taps: Vec::new(),
            body_handler: None,
            end_handler: None,
        }
    }

    fn begin(&mut self) -> Result<(), PolicyError> {
        if self.state != ChainState::Created {
            return Err(PolicyError::ChainState("chain already applied"));
        }
        self.state = ChainState::Applying;
        Ok(())
    }

    fn fail(&mut self) {
        self.state = ChainState::Failed;
        self.taps.clear();
        self.body_handler = None;
        self.end_handler = None;
    }

    fn start_streaming(&mut self) {
        self.state = ChainState::Streaming;
    }

    fn write(&mut self, chunk: Bytes) {
        let mut handler = self.body_handler.take();
        self.write_through(chunk, &mut |c| {
            if let Some(h) = handler.as_mut() {
                h(c);
            }
        });
        self.body_handler = handler;
    }

    fn write_through(&mut self, chunk: Bytes, sink: &mut dyn FnMut(Bytes)) {
        if self.state != ChainState::Streaming {
            tracing::warn!(state = ?self.state, "dropping chunk written outside the streaming state");
            return;
        }
        let mut current = vec![chunk];
        for tap in self.taps.iter_mut() {
            let mut next = Vec::with_capacity(current.len());
            for c in current {
                next.extend(tap.on_chunk(c));
            }
            current = next;
        }
        for c in current {
            sink(c);
        }
    }

    fn end(&mut self) {
        let mut handler = self.body_handler.take();
        self.end_through(&mut |c| {
            if let Some(h) = handler.as_mut() {
                h(c);
            }
        });
        // end() before streaming is ignored; keep the handler for later
        if matches!(self.state, ChainState::Created | ChainState::Applying) {
            self.body_handler = handler;
        }
    }

    fn end_through(&mut self, sink: &mut dyn FnMut(Bytes)) {
        if self.state != ChainState::Streaming {
            if self.state != ChainState::Aborted && self.state != ChainState::Ended {
                tracing::warn!(state = ?self.state, "ignoring end() outside the streaming state");
            }
            return;
        }
        // Flush buffered residue: tap i's output still passes through taps i+1..
        for i in 0..self.taps.len() {
            let mut current = self.taps[i].on_end();
            for j in (i + 1)..self.taps.len() {
                let mut next = Vec::with_capacity(current.len());
                for c in current {
                    next.extend(self.taps[j].on_chunk(c));
                }
                current = next;
            }
            for c in current {
                sink(c);
            }
        }
        self.state = ChainState::Ended;
        self.body_handler = None;
        if let Some(end_handler) = self.end_handler.take() {
            end_handler();
        }
    }

    fn abort(&mut self) {
        match self.state {
            ChainState::Ended | ChainState::Aborted => {}
            _ => {
                self.state = ChainState::Aborted;
                self.taps.clear();
                self.body_handler = None;
                self.end_handler = None;
            }
        }
    }
}

macro_rules! delegate_streaming {
    () => {
        pub fn state(&self) -> ChainState {
            self.core.state
        }

        /// Registers the sink receiving each body chunk after every tap has
        /// seen it. At most one handler invocation per chunk.
        pub fn body_handler(&mut self, handler: impl FnMut(Bytes) + Send + 'static) {
            self.core.body_handler = Some(Box::new(handler));
        }

        /// Registers the end-of-stream callback; fires exactly once per
        /// chain lifecycle, never after a failure or abort.
        pub fn end_handler(&mut self, handler: impl FnOnce() + Send + 'static) {
            self.core.end_handler = Some(Box::new(handler));
        }

        /// Forwards one body chunk through the installed taps, in write
        /// order, to the registered handler.
        pub fn write(&mut self, chunk: Bytes) {
            self.core.write(chunk);
        }

        /// Signals end of body; flushes buffered tap output and fires the
        /// end handler.
        pub fn end(&mut self) {
            self.core.end();
        }

        /// Aborts the chain. Idempotent; no handler fires afterwards.
        pub fn abort(&mut self) {
            self.core.abort();
        }

        pub(crate) fn write_through(&mut self, chunk: Bytes, sink: &mut dyn FnMut(Bytes)) {
            self.core.write_through(chunk, sink);
        }

        pub(crate) fn end_through(&mut self, sink: &mut dyn FnMut(Bytes)) {
            self.core.end_through(sink);
        }
    };
}

/// Policy chain applied to an inbound request, front to back.
pub struct RequestChain {
    policies: Vec<PolicyWithConfig>,
    core: ChainCore,
}

impl RequestChain {
    pub fn new(policies: Vec<PolicyWithConfig>) -> Self {
        Self {
            policies,
            core: ChainCore::new(),
        }
    }

    /// Drives every policy's request application in declaration order,
    /// then installs body taps and enters the streaming state.
    pub async fn apply(
        &mut self,
        request: &mut ApiRequest,
        context: &mut PolicyContext,
    ) -> Result<ChainOutcome, PolicyError> {
        self.core.begin()?;
        for entry in &self.policies {
            match entry
                .policy
                .apply_to_request(request, context, &entry.config)
                .await
            {
                Ok(PolicyVerdict::Continue) => {}
                Ok(PolicyVerdict::Reject(failure)) => {
                    tracing::debug!(
                        request_id = %request.request_id,
                        code = failure.failure_code,
                        "request rejected by policy"
                    );
                    self.core.fail();
                    return Ok(ChainOutcome::Rejected(failure));
                }
                Err(err) => {
                    self.core.abort();
                    return Err(err);
                }
            }
        }
        for entry in &self.policies {
            if let Some(tap) = entry.policy.request_body_tap(&entry.config) {
                self.core.taps.push(tap);
            }
        }
        self.core.start_streaming();
        Ok(ChainOutcome::Continue)
    }

    delegate_streaming!();
}

/// Policy chain applied to an outbound response, back to front.
pub struct ResponseChain {
    policies: Vec<PolicyWithConfig>,
    core: ChainCore,
}

impl ResponseChain {
    pub fn new(policies: Vec<PolicyWithConfig>) -> Self {
        Self {
            policies,
            core: ChainCore::new(),
        }
    }

    /// Drives every policy's response application in reverse declaration
    /// order, then installs body taps (also reversed) and enters the
    /// streaming state.
    pub async fn apply(
        &mut self,
        response: &mut ApiResponse,
        context: &mut PolicyContext,
    ) -> Result<ChainOutcome, PolicyError> {
        self.core.begin()?;
        for entry in self.policies.iter().rev() {
            match entry
                .policy
                .apply_to_response(response, context, &entry.config)
                .await
            {
                Ok(PolicyVerdict::Continue) => {}
                Ok(PolicyVerdict::Reject(failure)) => {
                    self.core.fail();
                    return Ok(ChainOutcome::Rejected(failure));
                }
                Err(err) => {
                    self.core.abort();
                    return Err(err);
                }
            }
        }
        for entry in self.policies.iter().rev() {
            if let Some(tap) = entry.policy.response_body_tap(&entry.config) {
                self.core.taps.push(tap);
            }
        }
        self.core.start_streaming();
        Ok(ChainOutcome::Continue)
    }

    delegate_streaming!();
}
