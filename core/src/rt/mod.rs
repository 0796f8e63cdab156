//! Host-side runtime: coroutines and drivers over suspendable chains.

use anyhow::{Result, bail};

use crate::val::Val;
use crate::vm::{ExecContext, Outcome, SuspendReason};

pub mod coroutine;


pub use coroutine::{CoOutcome, CoStatus, Coroutine};

/// Drive `target` to completion, transparently resuming across forced
/// preemptions. This is the "resume on the next scheduling turn" behavior
/// of `Preemption::Always`, collapsed into a loop. An explicit yield has
/// no resumer here and is an error.
pub fn run_to_completion(ctx: &mut ExecContext, target: &Val, args: &[Val]) -> Result<Vec<Val>> {
    let mut outcome = ctx.start(target, args)?;
    loop {
        match outcome {
            Outcome::Done(values) => return Ok(values),
            Outcome::Suspended(s) => match s.reason() {
                SuspendReason::Preempted => outcome = ctx.resume(s, Vec::new())?,
                SuspendReason::Yield => bail!("yield outside a coroutine"),
            },
        }
    }
}
