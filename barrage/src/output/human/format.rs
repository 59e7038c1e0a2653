use std::time::Duration;

/// One rounded component in s, ms or us.
pub(crate) fn format_duration_single(d: Duration) -> String {
    let total_ns = d.as_nanos();

    const NS_PER_US: u128 = 1_000;
    const NS_PER_MS: u128 = 1_000_000;
    const NS_PER_S: u128 = 1_000_000_000;

    fn round_div(value: u128, unit: u128) -> u128 {
        (value + (unit / 2)) / unit
    }

    if total_ns >= NS_PER_S {
        return format!("{}s", round_div(total_ns, NS_PER_S));
    }
    if total_ns >= NS_PER_MS {
        return format!("{}ms", round_div(total_ns, NS_PER_MS));
    }
    format!("{}us", round_div(total_ns, NS_PER_US))
}

pub(crate) fn format_rate(v: f64) -> String {
    if v.is_finite() {
        format!("{v:.0}")
    } else {
        "0".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_round_to_one_unit() {
        assert_eq!(format_duration_single(Duration::from_secs(120)), "120s");
        assert_eq!(format_duration_single(Duration::from_millis(1500)), "2s");
        assert_eq!(format_duration_single(Duration::from_micros(2500)), "3ms");
        assert_eq!(format_duration_single(Duration::from_nanos(400)), "0us");
    }

    #[test]
    fn rates_hide_non_finite_values() {
        assert_eq!(format_rate(12.4), "12");
        assert_eq!(format_rate(f64::NAN), "0");
    }
}
