use std::time::Duration;

use url::Url;

use super::types::{PositiveU64, PositiveUsize};
use crate::error::{AppError, AppResult, ValidationError};

pub(super) fn parse_positive_u64(s: &str) -> AppResult<PositiveU64> {
    s.parse::<PositiveU64>().map_err(AppError::from)
}

pub(super) fn parse_positive_usize(s: &str) -> AppResult<PositiveUsize> {
    s.parse::<PositiveUsize>().map_err(AppError::from)
}

/// Parses a duration such as `250ms`, `30s`, `2m` or `1h`. Bare numbers are seconds.
pub(crate) fn parse_duration_arg(s: &str) -> AppResult<Duration> {
    parse_duration_with_default_unit(s, "s").map_err(AppError::from)
}

/// Same as [`parse_duration_arg`], but bare numbers are milliseconds.
///
/// Used by options that are also read from `RAMP_UP_INTERVAL` and `RUNNING_TIME`,
/// which have always been plain millisecond counts.
pub(crate) fn parse_duration_ms_arg(s: &str) -> AppResult<Duration> {
    parse_duration_with_default_unit(s, "ms").map_err(AppError::from)
}

pub(crate) fn parse_duration_with_default_unit(
    s: &str,
    default_unit: &str,
) -> Result<Duration, ValidationError> {
    let value = s.trim();
    if value.is_empty() {
        return Err(ValidationError::DurationEmpty);
    }

    let digits_len = value.chars().take_while(char::is_ascii_digit).count();
    if digits_len == 0 {
        return Err(ValidationError::InvalidDurationFormat {
            value: value.to_owned(),
        });
    }
    let (num_part, unit_part) = value.split_at(digits_len);
    let number: u64 = num_part
        .parse()
        .map_err(|err| ValidationError::InvalidDurationNumber {
            value: value.to_owned(),
            source: err,
        })?;

    let unit = if unit_part.is_empty() {
        default_unit
    } else {
        unit_part
    };
    let duration = match unit {
        "ms" => Duration::from_millis(number),
        "s" => Duration::from_secs(number),
        "m" => {
            let secs = number
                .checked_mul(60)
                .ok_or(ValidationError::DurationOverflow)?;
            Duration::from_secs(secs)
        }
        "h" => {
            let secs = number
                .checked_mul(60)
                .and_then(|seconds| seconds.checked_mul(60))
                .ok_or(ValidationError::DurationOverflow)?;
            Duration::from_secs(secs)
        }
        _ => {
            return Err(ValidationError::InvalidDurationUnit {
                unit: unit.to_owned(),
            });
        }
    };

    if duration.as_millis() == 0 {
        return Err(ValidationError::DurationZero);
    }

    Ok(duration)
}

pub(crate) fn parse_ws_url(s: &str) -> AppResult<Url> {
    let url = Url::parse(s.trim()).map_err(|err| {
        AppError::validation(ValidationError::InvalidUrl {
            value: s.to_owned(),
            source: err,
        })
    })?;
    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => Err(AppError::validation(ValidationError::UnsupportedScheme {
            scheme: other.to_owned(),
        })),
    }
}
