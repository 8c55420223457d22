// SPDX-License-Identifier: GPL-3.0-only

//! Human size strings as accepted by `truncate -s`, `sfdisk` and `lvcreate -L`
//!
//! Sizes are passed through to the tools verbatim; this module only rejects
//! values none of them would understand.

const UNITS: &[char] = &['K', 'M', 'G', 'T', 'P', 'E'];

/// Check that `value` looks like `<digits>[.<digits>][unit][iB|B]`
pub fn is_human_size(value: &str) -> bool {
    let value = value.trim();
    let number_end = value
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(value.len());
    let (number, suffix) = value.split_at(number_end);

    if number.is_empty() || number.starts_with('.') || number.ends_with('.') {
        return false;
    }
    if number.matches('.').count() > 1 {
        return false;
    }

    let suffix = suffix.to_ascii_uppercase();
    let mut chars = suffix.chars();
    match chars.next() {
        None => true,
        Some(unit) if UNITS.contains(&unit) => matches!(chars.as_str(), "" | "B" | "IB"),
        Some(_) => false,
    }
}
