use std::time::Duration;

pub(crate) fn format_rate(v: f64) -> String {
    if v.is_finite() {
        format!("{v:.0}")
    } else {
        "0".to_string()
    }
}

pub(crate) fn format_percent(ratio: f64) -> String {
    if ratio.is_finite() {
        format!("{:.2}%", ratio * 100.0)
    } else {
        "0.00%".to_string()
    }
}

/// Milliseconds, with precision that shrinks as the value grows.
pub(crate) fn format_ms(ms: f64) -> String {
    if !ms.is_finite() {
        return "-".to_string();
    }
    if ms >= 1_000.0 {
        return format!("{:.2}s", ms / 1_000.0);
    }
    if ms >= 100.0 {
        return format!("{ms:.0}ms");
    }
    if ms >= 1.0 {
        return format!("{ms:.2}ms");
    }
    format!("{:.0}us", ms * 1_000.0)
}

pub(crate) fn format_ms_opt(ms: Option<f64>) -> String {
    ms.map_or_else(|| "-".to_string(), format_ms)
}

/// One rounded component in s, ms or us; short enough for progress lines.
pub(crate) fn format_duration(d: Duration) -> String {
    let total_ns = d.as_nanos();

    const NS_PER_US: u128 = 1_000;
    const NS_PER_MS: u128 = 1_000_000;
    const NS_PER_S: u128 = 1_000_000_000;

    // Ties round up.
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_render_as_one_component() {
        assert_eq!(format_duration(Duration::from_millis(1_499)), "1s");
        assert_eq!(format_duration(Duration::from_millis(1_500)), "2s");
        assert_eq!(format_duration(Duration::from_micros(2_500)), "3ms");
        assert_eq!(format_duration(Duration::from_nanos(1_400)), "1us");
    }

    #[test]
    fn latencies_scale_units() {
        assert_eq!(format_ms(0.25), "250us");
        assert_eq!(format_ms(12.346), "12.35ms");
        assert_eq!(format_ms(250.4), "250ms");
        assert_eq!(format_ms(1_250.0), "1.25s");
        assert_eq!(format_ms_opt(None), "-");
    }

    #[test]
    fn rates_and_percents() {
        assert_eq!(format_rate(1234.4), "1234");
        assert_eq!(format_rate(f64::NAN), "0");
        assert_eq!(format_percent(0.0123), "1.23%");
    }
}
