//! Log output for kvci runs.
//!
//! Every event emitted while a run is in progress sits inside a `run` span
//! carrying the run id, and each pass adds a nested `pass` span. Text output
//! prints the span chain as a prefix; JSON output carries it in `span` and
//! `spans`.

use tracing::{info_span, Dispatch, Level, Span};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Build a dispatcher writing to `writer`.
///
/// `level` is the default verbosity when `RUST_LOG` is not set.
pub fn dispatch<W>(json: bool, level: Level, writer: W) -> Dispatch
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));
    let layer = fmt::layer().with_target(false).with_writer(writer);

    if json {
        Dispatch::new(
            tracing_subscriber::registry()
                .with(filter)
                .with(layer.json().with_current_span(true)),
        )
    } else {
        Dispatch::new(
            tracing_subscriber::registry()
                .with(filter)
                .with(layer.compact()),
        )
    }
}

/// Install the stderr dispatcher globally. Later calls are ignored.
pub fn init_tracing(json: bool, level: Level) {
    tracing::dispatcher::set_global_default(dispatch(json, level, std::io::stderr)).ok();
}

/// Span covering one whole run.
pub fn run_span(run_id: &str) -> Span {
    info_span!("run", run_id = %run_id)
}

/// Span covering one pass, nested under its run or composite.
pub fn pass_span(name: &str) -> Span {
    info_span!("pass", pass = %name)
}
