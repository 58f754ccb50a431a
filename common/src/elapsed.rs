use chrono::Utc;

/// Returns a string representing the elapsed time since `start_time` like
/// "1m15s" or "1.50s".
pub fn format_elapsed(start_time: chrono::DateTime<Utc>) -> String {
    let millis = Utc::now()
        .signed_duration_since(start_time)
        .num_milliseconds()
        .max(0);
    render_millis(millis)
}

pub fn format_duration(duration: std::time::Duration) -> String {
    render_millis(duration.as_millis() as i64)
}

fn render_millis(millis: i64) -> String {
    match millis {
        m if m < 1_000 => format!("{m}ms"),
        m if m < 60_000 => format!("{:.2}s", m as f64 / 1000.0),
        m => format!("{}m{:02}s", m / 60_000, (m % 60_000) / 1000),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subsecond_renders_millis() {
        assert_eq!(render_millis(0), "0ms");
        assert_eq!(render_millis(250), "250ms");
        assert_eq!(render_millis(999), "999ms");
    }

    #[test]
    fn seconds_render_two_decimals() {
        assert_eq!(render_millis(1_000), "1.00s");
        assert_eq!(render_millis(1_500), "1.50s");
        assert_eq!(render_millis(59_999), "60.00s");
    }

    #[test]
    fn minutes_render_with_padded_seconds() {
        assert_eq!(render_millis(60_000), "1m00s");
        assert_eq!(render_millis(75_000), "1m15s");
        assert_eq!(render_millis(3_599_000), "59m59s");
    }
}
