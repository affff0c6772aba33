use chrono::{DateTime, Local, Utc};

use shopdesk_core::models::{Product, Profile};

/// Truncate a string to a maximum length, adding ellipsis if needed
pub fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else if max_len <= 3 {
        s.chars().take(max_len).collect()
    } else {
        let truncated: String = s.chars().take(max_len - 3).collect();
        format!("{}...", truncated)
    }
}

/// Format an optional timestamp as a short local date
pub fn format_date(date: Option<DateTime<Utc>>) -> String {
    date.map(|dt| dt.with_timezone(&Local).format("%b %d, %Y").to_string())
        .unwrap_or_else(|| "-".to_string())
}

/// Human-readable remaining time, e.g. "42m" or "1h 05m"
pub fn format_remaining(minutes: i64) -> String {
    if minutes >= 60 {
        format!("{}h {:02}m", minutes / 60, minutes % 60)
    } else {
        format!("{}m", minutes)
    }
}

pub fn product_header() -> String {
    format!("{:>6}  {:<8}  {:<40}  {:<16}  {}", "ID", "LABEL", "NAME", "SKU", "CREATED")
}

pub fn product_row(product: &Product) -> String {
    format!(
        "{:>6}  {:<8}  {:<40}  {:<16}  {}",
        product.id,
        truncate_string(&product.label, 8),
        truncate_string(&product.product_name, 40),
        truncate_string(&product.sku, 16),
        format_date(product.created_at),
    )
}

pub fn product_detail(product: &Product) -> Vec<String> {
    let optional = |value: &Option<String>| value.clone().unwrap_or_else(|| "-".to_string());
    vec![
        format!("ID:       {}", product.id),
        format!("Name:     {}", product.product_name),
        format!("Label:    {}", product.label),
        format!("SKU:      {}", product.sku),
        format!("Image:    {}", optional(&product.product_image)),
        format!("CSV:      {}", optional(&product.csv_file)),
        format!("Excel:    {}", optional(&product.excel_file)),
        format!("Active:   {}", if product.is_active { "yes" } else { "no" }),
        format!("Created:  {}", format_date(product.created_at)),
        format!("Updated:  {}", format_date(product.updated_at)),
    ]
}

pub fn profile_detail(profile: &Profile) -> Vec<String> {
    let name = format!("{} {}", profile.first_name, profile.last_name);
    let bio = if profile.bio.is_empty() { "-" } else { profile.bio.as_str() };
    vec![
        format!("Name:     {}", name.trim()),
        format!("Email:    {}", profile.username),
        format!("Bio:      {}", bio),
        format!(
            "Picture:  {}",
            profile.profile_picture.as_deref().unwrap_or("-")
        ),
        format!("Joined:   {}", format_date(profile.created_at)),
    ]
}
