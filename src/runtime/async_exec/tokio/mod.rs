use std::future::Future;
use std::sync::OnceLock;

pub type JoinHandle<T> = ::tokio::task::JoinHandle<T>;

static RUNTIME: OnceLock<::tokio::runtime::Runtime> = OnceLock::new();

pub(super) fn init(num_threads: usize) -> std::result::Result<(), ()> {
    let rt = ::tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_threads.max(1))
        .thread_name("sigtree-worker")
        .thread_stack_size(2 * 1024 * 1024)
        .enable_all()
        .build()
        .map_err(|_| ())?;
    RUNTIME.set(rt).map_err(|_| ())
}

pub(super) fn drop() {
    // tokio runtimes are torn down when the last handle is dropped; we
    // never hold the only handle past process exit, so there is nothing
    // to do here explicitly. Kept as a no-op hook for symmetry with
    // `init`, and in case a future backend needs teardown.
}

fn runtime() -> &'static ::tokio::runtime::Runtime {
    RUNTIME.get().expect("async runtime not initialized; call sigtree::runtime::init() first")
}

/// Spawns a future onto the global runtime.
pub fn spawn<F>(fut: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    runtime().spawn(fut)
}

/// Blocks the current thread until `fut` completes.
pub fn block_on<F: Future>(fut: F) -> F::Output {
    runtime().block_on(fut)
}
