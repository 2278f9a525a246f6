/// Compact vote count for display: 1500000 -> "1.5M", 500000 -> "500K".
pub fn format_votes(votes: u64) -> String {
    if votes >= 1_000_000 {
        return scaled(votes as f64 / 1_000_000.0, "M");
    }
    if votes >= 1_000 {
        return scaled(votes as f64 / 1_000.0, "K");
    }
    votes.to_string()
}

fn scaled(value: f64, suffix: &str) -> String {
    if value >= 10.0 {
        format!("{}{}", value.round(), suffix)
    } else {
        let one_decimal = format!("{:.1}", value);
        let trimmed = one_decimal.strip_suffix(".0").unwrap_or(&one_decimal);
        format!("{}{}", trimmed, suffix)
    }
}
