use chrono::{NaiveDateTime, Timelike};

/// Lower-cases `value` and collapses every run of non-alphanumeric
/// characters into a single `_`, trimming leading/trailing separators.
pub fn slugify(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut pending_sep = false;
    for ch in value.chars().flat_map(char::to_lowercase) {
        if ch.is_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.push(ch);
        } else {
            pending_sep = true;
        }
    }
    out
}

/// Drop seconds and sub-second precision.
pub fn truncate_to_minute(ts: NaiveDateTime) -> NaiveDateTime {
    ts.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(ts)
}

/// Parses a temperature given on the command line, e.g. `21.5`.
pub fn parse_temperature(raw: &str) -> Result<f64, String> {
    let value = raw
        .trim()
        .parse::<f64>()
        .map_err(|_| format!("invalid temperature: {}", raw))?;
    if !value.is_finite() {
        return Err(format!("invalid temperature: {}", raw));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn slugify_collapses_separators() {
        assert_eq!(slugify("Zone 1"), "zone_1");
        assert_eq!(slugify("  Living -- Room  "), "living_room");
        assert_eq!(slugify("error_F.22"), "error_f_22");
        assert_eq!(slugify("Küche"), "küche");
        assert_eq!(slugify("---"), "");
    }

    #[test]
    fn truncate_drops_seconds() {
        let ts = NaiveDate::from_ymd_opt(2024, 1, 15)
            .unwrap()
            .and_hms_milli_opt(12, 34, 56, 789)
            .unwrap();
        let expected = NaiveDate::from_ymd_opt(2024, 1, 15)
            .unwrap()
            .and_hms_opt(12, 34, 0)
            .unwrap();
        assert_eq!(truncate_to_minute(ts), expected);
    }

    #[test]
    fn parse_temperature_rejects_garbage() {
        assert_eq!(parse_temperature(" 21.5 "), Ok(21.5));
        assert!(parse_temperature("warm").is_err());
        assert!(parse_temperature("NaN").is_err());
    }
}
