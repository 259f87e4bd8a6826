use std::time::Duration;

/// Single rounded component: `750ms`, `12s`, `3m05s`.
pub(crate) fn format_duration(d: Duration) -> String {
    let ms = d.as_millis();
    if ms < 1_000 {
        return format!("{ms}ms");
    }
    let secs = d.as_secs();
    if secs < 60 {
        return format!("{secs}s");
    }
    format!("{}m{:02}s", secs / 60, secs % 60)
}

/// Latency values are milliseconds.
pub(crate) fn format_ms(v: Option<f64>) -> String {
    match v {
        Some(ms) if ms.is_finite() && ms >= 1_000.0 => format!("{:.2}s", ms / 1_000.0),
        Some(ms) if ms.is_finite() => format!("{ms:.2}ms"),
        _ => "-".to_string(),
    }
}

pub(crate) fn format_rate(v: f64) -> String {
    if v.is_finite() {
        format!("{v:.0}")
    } else {
        "0".to_string()
    }
}

pub(crate) fn format_pct(hits: u64, total: u64) -> String {
    if total == 0 {
        return "-".to_string();
    }
    format!("{:.2}%", (hits as f64) * 100.0 / (total as f64))
}

pub(crate) fn format_tags_inline(tags: &[(String, String)], exclude: &[&str]) -> String {
    let mut filtered: Vec<&(String, String)> = tags
        .iter()
        .filter(|(k, _)| !exclude.contains(&k.as_str()))
        .collect();

    if filtered.is_empty() {
        return String::new();
    }
    filtered.sort();

    let inner = filtered
        .into_iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",");

    format!("{{{inner}}}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_render_compactly() {
        assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
        assert_eq!(format_duration(Duration::from_secs(42)), "42s");
        assert_eq!(format_duration(Duration::from_secs(185)), "3m05s");
    }

    #[test]
    fn latency_and_percentages() {
        assert_eq!(format_ms(Some(12.345)), "12.35ms");
        assert_eq!(format_ms(Some(2_500.0)), "2.50s");
        assert_eq!(format_ms(None), "-");
        assert_eq!(format_pct(1, 4), "25.00%");
        assert_eq!(format_pct(0, 0), "-");
    }

    #[test]
    fn tags_are_sorted_and_filtered() {
        let tags = vec![
            ("scenario".to_string(), "coupon".to_string()),
            ("endpoint".to_string(), "issue".to_string()),
        ];
        assert_eq!(format_tags_inline(&tags, &["scenario"]), "{endpoint=issue}");
        assert_eq!(format_tags_inline(&tags, &["scenario", "endpoint"]), "");
    }
}
