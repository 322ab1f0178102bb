use std::time::Duration;

use crate::error::ValidationError;

/// Parses `<number><unit>` with unit `ms`, `s`, `m` or `h`; a bare number
/// is seconds.
pub(crate) fn parse_duration_value(value: &str) -> Result<Duration, ValidationError> {
    let value = value.trim();
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

    let unit = if unit_part.is_empty() { "s" } else { unit_part };
    let duration = match unit {
        "ms" => Duration::from_millis(number),
        "s" => Duration::from_secs(number),
        "m" => Duration::from_secs(
            number
                .checked_mul(60)
                .ok_or(ValidationError::DurationOverflow)?,
        ),
        "h" => Duration::from_secs(
            number
                .checked_mul(3600)
                .ok_or(ValidationError::DurationOverflow)?,
        ),
        _ => {
            return Err(ValidationError::InvalidDurationUnit {
                unit: unit.to_owned(),
            });
        }
    };

    if duration.is_zero() {
        return Err(ValidationError::DurationZero);
    }
    Ok(duration)
}

/// Parses a requests-per-second value: finite and non-negative.
pub(crate) fn parse_rate_value(value: &str) -> Result<f64, ValidationError> {
    let invalid = || ValidationError::InvalidRate {
        value: value.to_owned(),
    };
    let rate: f64 = value.trim().parse().map_err(|_err| invalid())?;
    if rate.is_finite() && rate >= 0.0 {
        Ok(rate)
    } else {
        Err(invalid())
    }
}
