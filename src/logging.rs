//! Internal logging helpers for structured writer events.

/// Single logging target for the crate.
pub(crate) const LOG_TARGET: &str = "arbor";

macro_rules! arbor_log {
    ($level:expr, $event:expr, $fmt:expr $(, $args:expr)* $(,)?) => {{
        if log::log_enabled!($level) {
            log::log!(
                target: crate::logging::LOG_TARGET,
                $level,
                "event={} {}",
                $event,
                format_args!($fmt $(, $args)*)
            );
        }
    }};
}

pub(crate) use arbor_log;
