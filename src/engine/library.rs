//! Process-wide engine library state
//!
//! Network engines share one tokio runtime that hosts their event loops.
//! The runtime is created on first use and torn down explicitly:
//!
//! - [`init`] builds it if needed; it is idempotent.
//! - Every bridge holds a [`LibraryLease`] for its lifetime. Creating a
//!   bridge calls [`lease`], which initializes the library on first use.
//! - [`shutdown`] tears the runtime down once no lease is outstanding.
//!   The library can be initialized again afterwards.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::{Builder, Handle, Runtime};
use tracing::{debug, error, info};

use crate::protocol::BridgeError;

/// Worker threads of the shared runtime
const RUNTIME_WORKERS: usize = 2;

/// Time granted to engine tasks during teardown
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

struct LibraryState {
    runtime: Option<Runtime>,
    leases: usize,
}

static LIBRARY: Mutex<LibraryState> = parking_lot::const_mutex(LibraryState {
    runtime: None,
    leases: 0,
});

/// Keeps the library initialized while alive
#[derive(Debug)]
pub struct LibraryLease {
    _private: (),
}

impl Drop for LibraryLease {
    fn drop(&mut self) {
        let mut state = LIBRARY.lock();
        state.leases = state.leases.saturating_sub(1);
    }
}

/// Initialize the library if it is not already initialized
pub fn init() -> Result<(), BridgeError> {
    let mut state = LIBRARY.lock();
    init_locked(&mut state)
}

fn init_locked(state: &mut LibraryState) -> Result<(), BridgeError> {
    if state.runtime.is_some() {
        return Ok(());
    }

    let runtime = Builder::new_multi_thread()
        .worker_threads(RUNTIME_WORKERS)
        .thread_name("mqlink-engine")
        .enable_all()
        .build()
        .map_err(|e| {
            error!("Cannot initialize engine library: {}", e);
            BridgeError::Library(e.to_string())
        })?;
    state.runtime = Some(runtime);
    debug!("Engine library initialized");
    Ok(())
}

/// Initialize the library if needed and register one more user
pub fn lease() -> Result<LibraryLease, BridgeError> {
    let mut state = LIBRARY.lock();
    init_locked(&mut state)?;
    state.leases += 1;
    Ok(LibraryLease { _private: () })
}

/// Tear the library down.
///
/// Fails while any bridge still holds a lease. Calling it when the library
/// is not initialized is a no-op.
pub fn shutdown() -> Result<(), BridgeError> {
    let runtime = {
        let mut state = LIBRARY.lock();
        if state.leases > 0 {
            return Err(BridgeError::Library(format!(
                "{} bridge(s) still running",
                state.leases
            )));
        }
        state.runtime.take()
    };

    if let Some(runtime) = runtime {
        runtime.shutdown_timeout(SHUTDOWN_TIMEOUT);
        info!("Engine library shut down");
    }
    Ok(())
}

pub fn is_initialized() -> bool {
    LIBRARY.lock().runtime.is_some()
}

/// Number of outstanding leases
pub fn lease_count() -> usize {
    LIBRARY.lock().leases
}

/// Handle to the shared runtime, if the library is initialized
pub fn handle() -> Option<Handle> {
    LIBRARY.lock().runtime.as_ref().map(|rt| rt.handle().clone())
}
