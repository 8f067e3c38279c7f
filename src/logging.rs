/*!
# Explicit Loggers

Components do not reach for a global logger on their own. Instead, each one is handed a
[`Logger`] value which remembers where messages come from (the `log` target) and carries its own
runtime level filter on top of [`log::max_level`]. The messages themselves go through the `log`
facade, so any `log` backend installed by the application receives them.

```rust
use log::LevelFilter;
use mini_mhrw::logging::Logger;

let logger = Logger::new("mini_mhrw::demo").with_max_level(LevelFilter::Info);
let sub = logger.sub_logger("init");
assert_eq!(sub.origin(), "mini_mhrw::demo::init");
sub.debug(format_args!("filtered out at runtime"));
assert!(!sub.enabled(log::Level::Debug));
```
*/

use log::{Level, LevelFilter};
use std::borrow::Cow;
use std::fmt;

/// A cheap, cloneable logger handle with an origin and a runtime level filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Logger {
    origin: Cow<'static, str>,
    max_level: LevelFilter,
}

impl Default for Logger {
    fn default() -> Self {
        Self::new("mini_mhrw")
    }
}

impl Logger {
    pub fn new(origin: impl Into<Cow<'static, str>>) -> Self {
        Self {
            origin: origin.into(),
            max_level: LevelFilter::Trace,
        }
    }

    /// Restricts this logger (and the sub-loggers created from it afterwards) to `level`.
    pub fn with_max_level(mut self, level: LevelFilter) -> Self {
        self.max_level = level;
        self
    }

    /// A logger for a sub-component, sharing this logger's filter.
    pub fn sub_logger(&self, suffix: &str) -> Self {
        Self {
            origin: Cow::Owned(format!("{}::{}", self.origin, suffix)),
            max_level: self.max_level,
        }
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn max_level(&self) -> LevelFilter {
        self.max_level
    }

    pub fn enabled(&self, level: Level) -> bool {
        level <= self.max_level && log::log_enabled!(target: self.origin.as_ref(), level)
    }

    pub fn log(&self, level: Level, args: fmt::Arguments<'_>) {
        if self.enabled(level) {
            log::log!(target: self.origin.as_ref(), level, "{}", args);
        }
    }

    pub fn error(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Error, args)
    }

    pub fn warn(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Warn, args)
    }

    pub fn info(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Info, args)
    }

    pub fn debug(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Debug, args)
    }

    pub fn trace(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Trace, args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sub_logger_keeps_filter() {
        let logger = Logger::new("a").with_max_level(LevelFilter::Warn);
        let sub = logger.sub_logger("b").sub_logger("c");
        assert_eq!(sub.origin(), "a::b::c");
        assert_eq!(sub.max_level(), LevelFilter::Warn);
        assert!(!sub.enabled(Level::Info));
    }

    #[test]
    fn test_off_logger_never_enabled() {
        let logger = Logger::default().with_max_level(LevelFilter::Off);
        assert!(!logger.enabled(Level::Error));
        // must not panic without a backend installed
        logger.error(format_args!("ignored {}", 1));
    }
}
