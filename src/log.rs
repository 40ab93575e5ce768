use log::{LevelFilter, Log, Metadata, Record};
use std::sync::RwLock;

/// Process-wide logger whose backend can be replaced at runtime.
///
/// The switcher installs itself as the `log` facade logger on the first
/// [`LoggerSwitcher::switch`] call, later calls only replace the inner logger
/// and the max level.
pub struct LoggerSwitcher {
    inner: RwLock<Option<Box<dyn Log>>>,
}

pub static LOGGER_SWITCHER: LoggerSwitcher = LoggerSwitcher::new();

impl LoggerSwitcher {
    const fn new() -> Self {
        Self {
            inner: RwLock::new(None),
        }
    }

    pub fn switch<L: Log + 'static>(&'static self, logger: L, filter: LevelFilter) {
        if let Ok(mut inner) = self.inner.write() {
            if let Some(old) = inner.as_ref() {
                old.flush();
            }
            *inner = Some(Box::new(logger));
        }
        // already installed on the second and later switches
        let _ = log::set_logger(self);
        log::set_max_level(filter);
    }
}

impl Log for LoggerSwitcher {
    fn enabled(&self, metadata: &Metadata) -> bool {
        self.inner
            .read()
            .ok()
            .and_then(|inner| inner.as_ref().map(|l| l.enabled(metadata)))
            .unwrap_or(false)
    }

    fn log(&self, record: &Record) {
        if let Ok(inner) = self.inner.read()
            && let Some(logger) = inner.as_ref()
        {
            logger.log(record);
        }
    }

    fn flush(&self) {
        if let Ok(inner) = self.inner.read()
            && let Some(logger) = inner.as_ref()
        {
            logger.flush();
        }
    }
}
