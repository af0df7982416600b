//! Shared utilities: currency amounts and model-output parsing

use regex::Regex;
use std::sync::LazyLock;

static AMOUNT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+(?:[.,]\d+)*)\s*(nghìn|ngàn|triệu|tỷ|lít|xị|củ|tr|k)?\b")
        .expect("amount pattern is valid")
});

static FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"```(?:json)?").expect("fence pattern is valid"));

/// Truncate a string to `max` characters, appending "..." if truncated.
/// Operates on Unicode char boundaries, not bytes.
pub fn truncate_chars(s: &str, max: usize) -> String {
    let mut chars = s.chars();
    let truncated: String = chars.by_ref().take(max).collect();
    if chars.next().is_some() {
        format!("{}...", truncated)
    } else {
        truncated
    }
}

/// Format an amount with `.` thousands separators and the ` VNĐ` suffix
pub fn format_vnd(amount: i64) -> String {
    let digits = amount.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(c);
    }
    let sign = if amount < 0 { "-" } else { "" };
    format!("{sign}{grouped} VNĐ")
}

/// A bare amount below 1 000 is read as thousands of VNĐ
pub fn normalize_amount(amount: f64) -> i64 {
    let amount = if amount.abs() < 1000.0 {
        amount * 1000.0
    } else {
        amount
    };
    amount.round() as i64
}

/// Spending amount in colloquial Vietnamese text, in VNĐ.
///
/// Units: k/nghìn/ngàn ×1 000, lít/xị ×100 000, tr/triệu/củ ×1 000 000,
/// tỷ ×1 000 000 000. The first number carrying a unit wins. Without any
/// unit the bare-number rule applies only when the text holds exactly one
/// number; quantities and dates make the text ambiguous and yield `None`.
pub fn parse_vnd_amount(text: &str) -> Option<i64> {
    let lower = text.to_lowercase();
    let mut bare = Vec::new();
    for caps in AMOUNT_RE.captures_iter(&lower) {
        let Some(value) = caps.get(1).and_then(|m| parse_number(m.as_str())) else {
            continue;
        };
        let multiplier = match caps.get(2).map(|m| m.as_str()) {
            Some("k" | "nghìn" | "ngàn") => 1_000.0,
            Some("lít" | "xị") => 100_000.0,
            Some("tr" | "triệu" | "củ") => 1_000_000.0,
            Some("tỷ") => 1_000_000_000.0,
            _ => {
                bare.push(value);
                continue;
            }
        };
        return Some((value * multiplier).round() as i64);
    }
    match bare.as_slice() {
        [value] => Some(normalize_amount(*value)),
        _ => None,
    }
}

/// `100.000` and `1,000,000` are grouped integers; `1.5` and `2,5` are decimals
fn parse_number(raw: &str) -> Option<f64> {
    let groups: Vec<&str> = raw.split(['.', ',']).collect();
    if groups.len() == 1 {
        return raw.parse().ok();
    }
    if groups[1..].iter().all(|g| g.len() == 3) {
        return groups.concat().parse().ok();
    }
    if groups.len() == 2 {
        return format!("{}.{}", groups[0], groups[1]).parse().ok();
    }
    None
}

/// Parse a JSON object out of model output.
///
/// Code fences are stripped first; failing that, the outermost `{...}` span
/// mentioning `required_key` is tried.
pub fn parse_json_response(content: &str, required_key: &str) -> Option<serde_json::Value> {
    let stripped = FENCE_RE.replace_all(content, "");
    if let Ok(value @ serde_json::Value::Object(_)) =
        serde_json::from_str::<serde_json::Value>(stripped.trim())
    {
        return Some(value);
    }

    let start = content.find('{')?;
    let end = content.rfind('}')?;
    let candidate = content.get(start..=end)?;
    if !candidate.contains(&format!("\"{required_key}\"")) {
        return None;
    }
    serde_json::from_str(candidate).ok()
}
