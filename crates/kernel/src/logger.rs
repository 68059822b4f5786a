//! The kernel logger.
//!
//! Log records are formatted into an attached [`core::fmt::Write`] sink. The logger is a
//! single static installed into the `log` facade; until a sink is attached records are
//! dropped.

use alloc::boxed::Box;
use core::fmt::Write;

use log::LevelFilter;
use spin::{Mutex, Once};

pub struct Logger {
    writer: Mutex<Option<Box<dyn Write + Send>>>,
}

static DEFAULT: Once<Logger> = Once::new();

impl Logger {
    /// Returns the logger, installing it into the `log` facade on first use.
    pub fn init() -> &'static Self {
        let mut installed = false;
        let logger = DEFAULT.call_once(|| {
            installed = true;
            Logger {
                writer: Mutex::new(None),
            }
        });
        if installed {
            logger.install();
        }
        logger
    }

    fn install(&'static self) {
        if log::set_logger(self).is_err() {
            // Another logger owns the facade; records still reach it.
            return;
        }

        #[cfg(debug_assertions)]
        log::set_max_level(LevelFilter::Trace);

        #[cfg(not(debug_assertions))]
        log::set_max_level(LevelFilter::Info);
    }

    /// Replaces the sink records are written to.
    pub fn attach(&self, writer: impl Write + Send + 'static) {
        *self.writer.lock() = Some(Box::new(writer));
    }

    pub fn has_output(&self) -> bool {
        self.writer.lock().is_some()
    }
}

impl log::Log for Logger {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        if let Some(writer) = &mut *self.writer.lock() {
            // A failing sink has nowhere to report to.
            let _ = write_log_entry_to(&mut **writer, record);
        }
    }

    fn flush(&self) {}
}

fn write_log_entry_to(writer: &mut (impl Write + ?Sized), record: &log::Record) -> core::fmt::Result {
    #[cfg(any(debug_assertions, feature = "detailed-logging"))]
    return writeln!(
        writer,
        "[{} {}:{} {}] {}",
        record.level(),
        record.file().unwrap_or("unknown"),
        record.line().unwrap_or(0),
        record.target(),
        record.args()
    );
    #[cfg(not(any(debug_assertions, feature = "detailed-logging")))]
    return writeln!(writer, "[{:5}] {}", record.level(), record.args());
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::{string::String, sync::Arc};

    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<String>>);

    impl Write for Capture {
        fn write_str(&mut self, s: &str) -> core::fmt::Result {
            self.0.lock().push_str(s);
            Ok(())
        }
    }

    struct Discard;

    impl Write for Discard {
        fn write_str(&mut self, _: &str) -> core::fmt::Result {
            Ok(())
        }
    }

    #[test]
    fn formats_records_into_attached_sink() {
        let capture = Capture::default();
        let logger = Logger::init();
        logger.attach(capture.clone());
        assert!(logger.has_output());

        log::warn!("logger capture marker {}", 42);

        let text = capture.0.lock().clone();
        logger.attach(Discard);
        let line = text
            .lines()
            .find(|line| line.contains("logger capture marker 42"))
            .unwrap();
        assert!(line.starts_with("[WARN"));
        if cfg!(any(debug_assertions, feature = "detailed-logging")) {
            assert!(line.contains("logger.rs:"));
        }
        assert!(core::ptr::eq(logger, Logger::init()));
    }
}
