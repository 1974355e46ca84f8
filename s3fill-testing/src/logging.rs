//! Per-test log capture.
//!
//! The upload workers log from many tokio worker threads at once, and tests run in parallel, so
//! the default global subscriber would interleave every test's output.  Instead each test gets a
//! private subscriber and a private runtime, and its log output is printed in one piece when the
//! test ends.
use crate::Result;
use std::{
    cell::RefCell,
    future::Future,
    io::Write,
    panic::AssertUnwindSafe,
    sync::{Arc, Mutex},
    time::Duration,
};
use tracing_subscriber::fmt::MakeWriter;

/// Log filter used when `RUST_LOG` isn't set.  The AWS SDK and its HTTP stack are very chatty at
/// debug level.
const DEFAULT_FILTER: &str = "h2=warn,hyper=info,rustls=info,aws=info,debug";

/// Worker threads in each test runtime.  More than one so workers really do run in parallel.
const TEST_WORKER_THREADS: usize = 4;

/// Buffer that receives every formatted log line from one test
#[derive(Clone, Default)]
struct CapturedLogs {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl CapturedLogs {
    /// Take everything logged so far, leaving the buffer empty
    fn drain(&self) -> String {
        let mut guard = self.buffer.lock().unwrap();

        String::from_utf8_lossy(&std::mem::take(&mut *guard)).into_owned()
    }
}

impl<'a> Write for &'a CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buffer.lock().unwrap().write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = &'a Self;

    fn make_writer(&'a self) -> Self::Writer {
        self
    }
}

fn make_dispatch(logs: CapturedLogs) -> tracing::Dispatch {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::{fmt, EnvFilter};

    // Thread IDs make it possible to tell concurrent workers apart in the output
    let format = fmt::layer()
        .with_level(true)
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(false)
        .with_writer(logs);

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(DEFAULT_FILTER))
        .unwrap();

    tracing::Dispatch::new(tracing_subscriber::registry().with(filter).with(format))
}

/// Build a multi-thread runtime in which every thread logs to `dispatch`.
///
/// `tracing::dispatcher::with_default` only affects the calling thread, so each runtime thread
/// has to install the dispatcher itself when it starts.
fn make_runtime(dispatch: Arc<tracing::Dispatch>) -> Result<tokio::runtime::Runtime> {
    std::thread_local! {
        static THREAD_DISPATCH: RefCell<Option<tracing::subscriber::DefaultGuard>> = RefCell::new(None);
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(TEST_WORKER_THREADS)
        .enable_all()
        .on_thread_start(move || {
            let guard = tracing::dispatcher::set_default(&dispatch);

            THREAD_DISPATCH.with(|cell| cell.replace(Some(guard)));
        })
        .on_thread_stop(|| {
            THREAD_DISPATCH.with(|cell| cell.replace(None));
        })
        .build()?;

    Ok(runtime)
}

/// Run a test future with logging enabled, in place of `#[tokio::test]`.
///
/// The test runs on its own multi-thread runtime whose threads all log into a buffer private to
/// this test.  The buffer is printed when the test finishes, whether it passed, failed, or
/// panicked, so `cargo test` shows the log output next to the failure it belongs to.
pub fn test_with_logging(test: impl Future<Output = Result<()>>) -> Result<()> {
    let logs = CapturedLogs::default();
    let dispatch = Arc::new(make_dispatch(logs.clone()));

    tracing::dispatcher::with_default(&dispatch, || {
        let runtime = make_runtime(dispatch.clone())?;

        // Neither the runtime nor arbitrary test futures are declared unwind safe, but nothing
        // observes them after a panic except to drop them
        let outcome = std::panic::catch_unwind(AssertUnwindSafe(move || {
            let result = runtime.block_on(test);
            runtime.shutdown_timeout(Duration::from_secs(10));

            result
        }));

        println!("Log events from this test: \n{}", logs.drain());

        match outcome {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    })
}
