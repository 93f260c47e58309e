//! Injected logging sink.
//!
//! Drivers never call the `log` macros directly. They log through the
//! [`LogSink`] handed to them in [`DriverConfig`](crate::DriverConfig), so
//! tests and embedders can route driver output to their own `log::Log`
//! implementation without touching the process-wide logger.

use std::fmt;
use std::sync::Arc;

use log::{Level, Log, Metadata, Record};

/// Default log target for driver messages.
pub const DEFAULT_TARGET: &str = "render_driver";

/// A cloneable handle to a `log::Log` implementation.
#[derive(Clone)]
pub struct LogSink {
    logger: Arc<dyn Log>,
    target: &'static str,
}

impl LogSink {
    /// Sink forwarding to the logger installed with `log::set_logger`
    /// (for example by `env_logger::init`).
    pub fn global() -> Self {
        Self::new(Arc::new(GlobalLogger))
    }

    pub fn new(logger: Arc<dyn Log>) -> Self {
        Self {
            logger,
            target: DEFAULT_TARGET,
        }
    }

    /// Sink that drops everything.
    pub fn silent() -> Self {
        Self::new(Arc::new(NullLogger))
    }

    pub fn with_target(mut self, target: &'static str) -> Self {
        self.target = target;
        self
    }

    pub fn log(&self, level: Level, args: fmt::Arguments<'_>) {
        let metadata = Metadata::builder().level(level).target(self.target).build();
        if !self.logger.enabled(&metadata) {
            return;
        }
        self.logger.log(
            &Record::builder()
                .metadata(metadata)
                .args(args)
                .module_path_static(Some(module_path!()))
                .build(),
        );
    }

    pub fn error(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Error, args);
    }

    pub fn warn(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Warn, args);
    }

    pub fn info(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Info, args);
    }

    pub fn debug(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Debug, args);
    }

    pub fn trace(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Trace, args);
    }
}

impl Default for LogSink {
    fn default() -> Self {
        Self::global()
    }
}

impl fmt::Debug for LogSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogSink")
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

struct GlobalLogger;

impl Log for GlobalLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= log::max_level() && log::logger().enabled(metadata)
    }

    fn log(&self, record: &Record<'_>) {
        log::logger().log(record);
    }

    fn flush(&self) {
        log::logger().flush();
    }
}

struct NullLogger;

impl Log for NullLogger {
    fn enabled(&self, _metadata: &Metadata<'_>) -> bool {
        false
    }

    fn log(&self, _record: &Record<'_>) {}

    fn flush(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Capture(Mutex<Vec<(Level, String, String)>>);

    impl Log for Capture {
        fn enabled(&self, metadata: &Metadata<'_>) -> bool {
            metadata.level() <= Level::Info
        }

        fn log(&self, record: &Record<'_>) {
            self.0.lock().push((
                record.level(),
                record.target().to_string(),
                record.args().to_string(),
            ));
        }

        fn flush(&self) {}
    }

    #[test]
    fn test_sink_routes_to_injected_logger() {
        let capture = Arc::new(Capture::default());
        let sink = LogSink::new(capture.clone()).with_target("tests");

        sink.info(format_args!("selected {}", "gpu0"));
        sink.warn(format_args!("dropped frame {}", 7));

        let records = capture.0.lock();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0], (Level::Info, "tests".into(), "selected gpu0".into()));
        assert_eq!(records[1].0, Level::Warn);
    }

    #[test]
    fn test_sink_respects_enabled() {
        let capture = Arc::new(Capture::default());
        let sink = LogSink::new(capture.clone());

        sink.trace(format_args!("per-frame detail"));
        sink.debug(format_args!("more detail"));

        assert!(capture.0.lock().is_empty());
    }

    #[test]
    fn test_silent_sink() {
        // Must not panic with no logger installed.
        LogSink::silent().error(format_args!("ignored"));
    }
}
