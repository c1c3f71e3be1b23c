pub mod builders;
pub mod handlers;

use std::future::Future;
use std::sync::Once;
use std::time::Duration;

use tracing_subscriber::{EnvFilter, fmt};

pub use builders::{ActionBuilder, ProjectBuilder, aref};
pub use handlers::{FAKE_TYPE, Invocation, RecordingHandler, SyncCall};

static TRACING: Once = Once::new();

/// Installs a test-writer subscriber once per test binary; `RUST_LOG`
/// overrides the default `info` level.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let _ = fmt().with_env_filter(filter).with_test_writer().try_init();
    });
}

/// Upper bound for any single async test step.
pub const TEST_DEADLINE: Duration = Duration::from_secs(5);

/// Await `f`, panicking if it outlives [`TEST_DEADLINE`].
pub async fn with_timeout<F: Future>(f: F) -> F::Output {
    match tokio::time::timeout(TEST_DEADLINE, f).await {
        Ok(out) => out,
        Err(_) => panic!("test step exceeded {TEST_DEADLINE:?}"),
    }
}
