//! Utility functions used by the load tester.

use regex::Regex;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Parse a string representing a time span and return the number of seconds.
///
/// Can be specified as an integer, indicating seconds. Or can use integers
/// together with one or more of "h", "m", and "s", in that order, indicating
/// "hours", "minutes", and "seconds".
///
/// Valid formats include: 20, 20s, 3m, 2h, 1h20m, 3h30m10s, etc. Anything else
/// returns `None`.
///
/// # Example
/// ```rust
/// use cas_loadtest::util;
///
/// // 1 hour 2 minutes and 3 seconds is 3,723 seconds.
/// assert_eq!(util::parse_timespan("1h2m3s"), Some(3_723));
///
/// // 45 seconds is 45 seconds.
/// assert_eq!(util::parse_timespan("45"), Some(45));
///
/// // Invalid value.
/// assert_eq!(util::parse_timespan("foo"), None);
/// ```
pub fn parse_timespan(time_str: &str) -> Option<usize> {
    // If an integer is passed in, assume it's seconds.
    if let Ok(t) = usize::from_str(time_str) {
        trace!("{} is integer: {} seconds", time_str, t);
        return Some(t);
    }

    // An empty string matches the pattern below, but is not a time span.
    if time_str.is_empty() {
        return None;
    }

    // Otherwise use a regex to extract hours, minutes and seconds from string.
    let re = Regex::new(r"^((?P<hours>\d+)h)?((?P<minutes>\d+)m)?((?P<seconds>\d+)s)?$")
        .expect("timespan pattern is valid");
    let time_matches = re.captures(time_str)?;
    let component = |name: &str| -> Option<usize> {
        match time_matches.name(name) {
            Some(value) => usize::from_str(value.as_str()).ok(),
            None => Some(0),
        }
    };
    let hours = component("hours")?;
    let minutes = component("minutes")?;
    let seconds = component("seconds")?;
    let total = hours
        .checked_mul(60 * 60)?
        .checked_add(minutes.checked_mul(60)?)?
        .checked_add(seconds)?;
    trace!(
        "{} hours {} minutes {} seconds: {} seconds",
        hours,
        minutes,
        seconds,
        total
    );
    Some(total)
}

/// Truncate strings when they're too long to display.
///
/// If a string is longer than the specified max length, this function removes extra
/// characters and replaces the last two with a double-period ellipsis.
///
/// # Example
/// ```rust
/// use cas_loadtest::util;
///
/// // All but 7 characters are truncated, with ".." appended.
/// assert_eq!(util::truncate_string("this is a long string", 9), "this is..");
///
/// // All characters are returned as the string is less than 15 characters long.
/// assert_eq!(util::truncate_string("shorter string", 15), "shorter string");
/// ```
pub fn truncate_string(str_to_truncate: &str, max_length: usize) -> String {
    if str_to_truncate.char_indices().count() > max_length {
        match str_to_truncate.char_indices().nth(max_length.saturating_sub(2)) {
            None => str_to_truncate.to_string(),
            Some((idx, _)) => format!("{}..", &str_to_truncate[..idx]),
        }
    } else {
        str_to_truncate.to_string()
    }
}

/// Convert a number of seconds (possibly fractional) into a `Duration`,
/// returning `None` for anything that isn't positive or doesn't fit.
pub fn seconds_to_duration(seconds: f32) -> Option<Duration> {
    if seconds > 0.0 {
        Duration::try_from_secs_f32(seconds).ok()
    } else {
        None
    }
}

/// Install a ctrl-c handler that sets `canceled`, letting running users finish
/// their current login before exiting. A second ctrl-c exits immediately.
pub(crate) fn setup_ctrlc_handler(canceled: &Arc<AtomicBool>) {
    let caught = Arc::clone(canceled);
    match ctrlc::set_handler(move || {
        // We've caught a ctrl-c, determine if it's the first time or an additional time.
        if caught.swap(true, Ordering::SeqCst) {
            warn!("caught another ctrl-c, exiting immediately...");
            std::process::exit(1);
        } else {
            warn!("caught ctrl-c, stopping...");
        }
    }) {
        Ok(_) => (),
        Err(e) => {
            // Only one handler can be installed per process, which happens when
            // running more than one load test, for example in tests.
            info!("reset ctrl-c handler: {}", e);
        }
    }
}
