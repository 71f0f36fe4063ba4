//! Running a single transformer with failure isolation and an optional time bound.

use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicU64, Ordering},
        mpsc, Arc,
    },
    thread,
    time::Duration,
};

use crate::{
    pipeline::result::FailureCause,
    unit::{CodeUnitDescriptor, Transformer},
};

/// Runs `unit` on `buffer`, converting errors and panics into a [`FailureCause`].
pub(crate) fn run_isolated(
    unit: &dyn Transformer,
    descriptor: &CodeUnitDescriptor,
    buffer: &[u8],
) -> Result<Option<Vec<u8>>, FailureCause> {
    match panic::catch_unwind(AssertUnwindSafe(|| unit.rewrite(descriptor, buffer))) {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(error)) => Err(FailureCause::Error(error.to_string())),
        Err(payload) => Err(FailureCause::Panic(panic_message(payload.as_ref()))),
    }
}

/// Numbers helper threads; identities are arbitrary strings and stay out of thread names.
static HELPER_THREADS: AtomicU64 = AtomicU64::new(0);

/// Runs `unit` on a helper thread and waits at most `limit` for it.
///
/// On expiry the helper thread is abandoned; whatever it produces later is
/// dropped with the channel.
pub(crate) fn run_bounded(
    unit: &Arc<dyn Transformer>,
    descriptor: &CodeUnitDescriptor,
    buffer: &[u8],
    limit: Duration,
) -> Result<Option<Vec<u8>>, FailureCause> {
    let (tx, rx) = mpsc::sync_channel(1);
    let worker_unit = Arc::clone(unit);
    let worker_descriptor = descriptor.clone();
    let worker_buffer = buffer.to_vec();

    let spawned = thread::Builder::new()
        .name(format!(
            "classweave-rewrite-{}",
            HELPER_THREADS.fetch_add(1, Ordering::Relaxed)
        ))
        .spawn(move || {
            let result = run_isolated(worker_unit.as_ref(), &worker_descriptor, &worker_buffer);
            // The receiver is gone once the caller timed out.
            let _ = tx.send(result);
        });
    if let Err(error) = spawned {
        return Err(FailureCause::Error(format!(
            "could not spawn rewrite thread: {error}"
        )));
    }

    match rx.recv_timeout(limit) {
        Ok(result) => result,
        Err(mpsc::RecvTimeoutError::Timeout) => Err(FailureCause::Timeout(limit)),
        Err(mpsc::RecvTimeoutError::Disconnected) => Err(FailureCause::Panic(
            "rewrite thread exited without a result".to_string(),
        )),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
