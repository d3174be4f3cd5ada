//! Utility functions used by Stampede, and available when writing load tests.

use regex::Regex;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

use crate::{StampedeError, CANCELED};

/// Parse a string representing a time span and return a [`Duration`].
///
/// Can be specified as an integer, indicating seconds, or as integers combined
/// with one or more of "h", "m", and "s", in that order.
///
/// Valid formats include: 20, 20s, 3m, 2h, 1h20m, 3h30m10s, 1m5s, etc. An
/// unparseable string returns a zero duration.
///
/// # Example
/// ```rust
/// use std::time::Duration;
/// use stampede::util;
///
/// // 1 minute and 5 seconds is 65 seconds.
/// assert_eq!(util::parse_timespan("1m5s"), Duration::from_secs(65));
///
/// // A bare integer is seconds.
/// assert_eq!(util::parse_timespan("45"), Duration::from_secs(45));
///
/// // An invalid value is 0 seconds.
/// assert_eq!(util::parse_timespan("foo"), Duration::from_secs(0));
/// ```
pub fn parse_timespan(time_str: &str) -> Duration {
    // A bare integer is a number of seconds.
    if let Ok(seconds) = u64::from_str(time_str.trim()) {
        return Duration::from_secs(seconds);
    }

    // Otherwise extract hours, minutes and seconds with a regex.
    let re = Regex::new(r"((?P<hours>\d+?)h)?((?P<minutes>\d+?)m)?((?P<seconds>\d+?)s)?")
        .expect("failed to compile timespan regex");
    let captures = match re.captures(time_str.trim()) {
        Some(captures) => captures,
        None => return Duration::from_secs(0),
    };
    let part = |name: &str| -> u64 {
        captures
            .name(name)
            .map(|value| u64::from_str(value.as_str()).unwrap_or(0))
            .unwrap_or(0)
    };
    Duration::from_secs(part("hours") * 3_600 + part("minutes") * 60 + part("seconds"))
}

/// Sleep for a specified duration, minus the time spent doing other things.
///
/// Returns a fresh drift timer to carry into the next loop, so events that are
/// supposed to happen regularly don't accumulate delay.
pub async fn sleep_minus_drift(
    duration: Duration,
    drift: tokio::time::Instant,
) -> tokio::time::Instant {
    match duration.checked_sub(drift.elapsed()) {
        Some(delay) if delay.as_nanos() > 0 => tokio::time::sleep(delay).await,
        _ => debug!("sleep_minus_drift: drift consumed the full duration, not sleeping"),
    };
    tokio::time::Instant::now()
}

/// Truncate strings that are too long to display in a metrics table.
///
/// If a string is longer than `max_length` characters, the tail is replaced
/// with a two-period ellipsis.
///
/// # Example
/// ```rust
/// use stampede::util;
///
/// assert_eq!(util::truncate_string("login_response_time", 12), "login_resp..");
/// assert_eq!(util::truncate_string("error_rate", 24), "error_rate");
/// ```
pub fn truncate_string(str_to_truncate: &str, max_length: usize) -> String {
    if str_to_truncate.char_indices().count() > max_length {
        match str_to_truncate
            .char_indices()
            .nth(max_length.saturating_sub(2))
        {
            None => str_to_truncate.to_string(),
            Some((idx, _)) => format!("{}..", &str_to_truncate[..idx]),
        }
    } else {
        str_to_truncate.to_string()
    }
}

/// Helper function to determine if a host can be parsed.
///
/// # Example
/// ```rust
/// use stampede::util;
///
/// // The protocol is required.
/// assert!(util::is_valid_host("http://localhost:3000").is_ok());
/// assert!(util::is_valid_host("localhost:3000").is_err());
/// ```
pub fn is_valid_host(host: &str) -> Result<(), StampedeError> {
    Url::parse(host).map_err(|parse_error| StampedeError::InvalidHost {
        host: host.to_string(),
        detail: "invalid host".to_string(),
        parse_error,
    })?;
    Ok(())
}

// Internal helper to configure the control-c handler. Shut down cleanly on the
// first ctrl-c. Exit abruptly on the second.
pub(crate) fn setup_ctrlc_handler() {
    match ctrlc::set_handler(move || {
        if *CANCELED.read().unwrap() {
            warn!("caught another ctrl-c, exiting immediately...");
            std::process::exit(1);
        } else {
            warn!("caught ctrl-c, stopping...");
            let mut canceled = CANCELED.write().unwrap();
            *canceled = true;
        }
    }) {
        Ok(_) => (),
        Err(e) => {
            // When running in tests, reset CANCELED with each new load test so
            // the handler can be installed repeatedly.
            let mut canceled = CANCELED.write().unwrap();
            *canceled = false;
            info!("reset ctrl-c handler: {}", e);
        }
    }
}
