use std::sync::{Arc, PoisonError, RwLock};

use anyhow::{Result, anyhow};
use once_cell::sync::Lazy;
use tracing::{debug, trace};

use crate::val::{Table, Val};

use super::control::{Control, Flow, SavedFrame, Suspension};
use super::dispatch;
use super::preempt::Preemption;

/// Default recursion depth before a catchable "stack overflow" error.
const DEFAULT_MAX_DEPTH: usize = 200;

/// Buffer for the values most recently produced by a call. Callees write
/// it before returning; the frame above reads it. Dispatch results travel
/// through it as well, so fresh execution and chain replay consume results
/// identically.
#[derive(Debug, Default)]
pub struct ReturnSink {
    values: Vec<Val>,
}

impl ReturnSink {
    pub fn set_to(&mut self, values: Vec<Val>) {
        self.values = values;
    }

    pub fn set_single(&mut self, value: Val) {
        self.values.clear();
        self.values.push(value);
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    /// Drop everything past the first value (single-result positions).
    pub fn keep_first(&mut self) {
        self.values.truncate(1);
    }

    pub fn first(&self) -> Val {
        self.values.first().cloned().unwrap_or(Val::Nil)
    }

    pub fn get(&self, idx: usize) -> Val {
        self.values.get(idx).cloned().unwrap_or(Val::Nil)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn take(&mut self) -> Vec<Val> {
        std::mem::take(&mut self.values)
    }

    /// Insert a value in front of the current results (protected-call
    /// status flag).
    pub fn prepend(&mut self, value: Val) {
        self.values.insert(0, value);
    }
}

/// Shared per-runtime services: the metatables of non-table primitive
/// types. Tables and userdata carry their own.
#[derive(Debug, Default)]
pub struct RuntimeServices {
    string_meta: RwLock<Option<Arc<Table>>>,
    number_meta: RwLock<Option<Arc<Table>>>,
    boolean_meta: RwLock<Option<Arc<Table>>>,
    nil_meta: RwLock<Option<Arc<Table>>>,
    function_meta: RwLock<Option<Arc<Table>>>,
    thread_meta: RwLock<Option<Arc<Table>>>,
}

static DEFAULT_SERVICES: Lazy<Arc<RuntimeServices>> = Lazy::new(|| Arc::new(RuntimeServices::default()));

impl RuntimeServices {
    pub fn shared() -> Arc<RuntimeServices> {
        Arc::clone(&DEFAULT_SERVICES)
    }

    fn slot(&self, type_name: &str) -> Option<&RwLock<Option<Arc<Table>>>> {
        match type_name {
            "string" => Some(&self.string_meta),
            "number" => Some(&self.number_meta),
            "boolean" => Some(&self.boolean_meta),
            "nil" => Some(&self.nil_meta),
            "function" => Some(&self.function_meta),
            "thread" => Some(&self.thread_meta),
            _ => None,
        }
    }

    pub fn type_metatable(&self, type_name: &str) -> Option<Arc<Table>> {
        self.slot(type_name)?
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_type_metatable(&self, type_name: &str, meta: Option<Arc<Table>>) {
        if let Some(slot) = self.slot(type_name) {
            *slot.write().unwrap_or_else(PoisonError::into_inner) = meta;
        }
    }
}

/// Result of a top-level invocation or resume.
#[derive(Debug)]
pub enum Outcome {
    Done(Vec<Val>),
    Suspended(Suspension),
}

/// Per-call-chain execution facilities: the return sink, the active
/// preemption policy, the pending chain while a resume replays, and shared
/// runtime services. One per top-level invocation; never shared across
/// concurrently running chains.
#[derive(Debug)]
pub struct ExecContext {
    sink: ReturnSink,
    preempt: Preemption,
    services: Arc<RuntimeServices>,
    /// Remaining snapshot chain during replay; outermost frame at the end.
    pending: Vec<SavedFrame>,
    /// Host values delivered to the innermost yield marker on resume.
    resume_values: Option<Vec<Val>>,
    depth: usize,
    max_depth: usize,
}

impl Default for ExecContext {
    fn default() -> Self {
        ExecContext::new(RuntimeServices::shared(), Preemption::Never)
    }
}

impl ExecContext {
    pub fn new(services: Arc<RuntimeServices>, preempt: Preemption) -> ExecContext {
        ExecContext {
            sink: ReturnSink::default(),
            preempt,
            services,
            pending: Vec::new(),
            resume_values: None,
            depth: 0,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> ExecContext {
        self.max_depth = max_depth;
        self
    }

    #[inline]
    pub fn sink(&self) -> &ReturnSink {
        &self.sink
    }

    #[inline]
    pub fn sink_mut(&mut self) -> &mut ReturnSink {
        &mut self.sink
    }

    #[inline]
    pub fn services(&self) -> &RuntimeServices {
        &self.services
    }

    #[inline]
    pub fn services_arc(&self) -> Arc<RuntimeServices> {
        Arc::clone(&self.services)
    }

    /// True while a snapshot chain is still being replayed.
    #[inline]
    pub fn replaying(&self) -> bool {
        !self.pending.is_empty()
    }

    pub(crate) fn take_resume_values(&mut self) -> Vec<Val> {
        self.resume_values.take().unwrap_or_default()
    }

    /// The single call boundary. During replay it consumes the next pending
    /// frame; otherwise it consults the preemption policy and dispatches.
    pub fn call(&mut self, target: &Val, args: &[Val]) -> Flow {
        if self.depth >= self.max_depth {
            return Err(Control::error("stack overflow"));
        }
        self.depth += 1;
        let flow = if let Some(frame) = self.pending.pop() {
            self.resume_frame(frame)
        } else if self.preempt.should_suspend() {
            trace!(target = target.type_name(), "forced suspension at call boundary");
            Err(Control::Suspend(Suspension::preempted(target.clone(), args.to_vec())))
        } else {
            dispatch::call(self, target, args)
        };
        self.depth -= 1;
        flow
    }

    /// Continue the next pending frame of the chain. Used by resumable
    /// callees (protected calls) whose saved state is implicit.
    pub(crate) fn continue_pending(&mut self) -> Flow {
        match self.pending.pop() {
            Some(frame) => {
                if self.depth >= self.max_depth {
                    return Err(Control::error("stack overflow"));
                }
                self.depth += 1;
                let flow = self.resume_frame(frame);
                self.depth -= 1;
                flow
            }
            None => Err(Control::fatal("resume chain exhausted before the suspension point")),
        }
    }

    fn resume_frame(&mut self, frame: SavedFrame) -> Flow {
        match frame {
            SavedFrame::Frame { callee, state } => {
                trace!(callee = callee.name(), point = state.point, "replaying frame");
                callee.resume(self, state)
            }
            SavedFrame::PendingCall { target, args } => {
                trace!("replaying preempted call");
                // The check point already fired for this boundary; go
                // straight to dispatch.
                dispatch::call(self, &target, &args)
            }
            SavedFrame::Yield => {
                let values = self.take_resume_values();
                trace!(n = values.len(), "delivering resume values at yield point");
                self.sink.set_to(values);
                Ok(())
            }
        }
    }

    /// Fresh top-level invocation of `target`.
    pub fn start(&mut self, target: &Val, args: &[Val]) -> Result<Outcome> {
        self.sink.clear();
        self.pending.clear();
        let flow = self.call(target, args);
        self.finish(flow)
    }

    /// Replay a suspension produced by this context's call chain. `values`
    /// are delivered to the suspension point (the results of the yield
    /// expression); they are ignored for a preempted chain.
    pub fn resume(&mut self, suspension: Suspension, values: Vec<Val>) -> Result<Outcome> {
        debug!(depth = suspension.depth(), reason = ?suspension.reason(), "resuming chain");
        self.sink.clear();
        self.pending = suspension.chain;
        self.resume_values = Some(values);
        let flow = self.continue_pending();
        self.resume_values = None;
        self.finish(flow)
    }

    fn finish(&mut self, flow: Flow) -> Result<Outcome> {
        match flow {
            Ok(()) => {
                if self.replaying() {
                    return Err(anyhow!(
                        "engine contract violation: {} snapshot frame(s) left unconsumed after replay",
                        self.pending.len()
                    ));
                }
                Ok(Outcome::Done(self.sink.take()))
            }
            Err(Control::Suspend(s)) => Ok(Outcome::Suspended(s)),
            Err(Control::Error(e)) => Err(anyhow!(e.render())),
            Err(Control::Fatal(e)) => Err(anyhow!(e.to_string())),
        }
    }
}
