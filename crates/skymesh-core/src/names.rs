//! Identifier rules and small string helpers.
//!
//! Every user-supplied name (namespace, MCI, VM, sub-group, resource id)
//! must satisfy the label grammar checked by [`check_name`]. Generated
//! identifiers come from [`gen_uid`].

use std::cmp::Ordering;

use rand::Rng;

/// Maximum length accepted for a resource label.
pub const MAX_NAME_LEN: usize = 48;

/// Validate a resource label: non-empty, at most [`MAX_NAME_LEN`] bytes,
/// starting with a lowercase letter, containing only lowercase letters,
/// digits, and hyphens.
pub fn check_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("name must not be empty".to_string());
    }
    if name.len() > MAX_NAME_LEN {
        return Err(format!(
            "name '{name}' exceeds {MAX_NAME_LEN} characters"
        ));
    }
    let mut chars = name.chars();
    let first = chars.next().unwrap_or(' ');
    if !first.is_ascii_lowercase() {
        return Err(format!(
            "name '{name}' must start with a lowercase letter"
        ));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(format!(
            "name '{name}' may contain only lowercase letters, digits, and '-'"
        ));
    }
    Ok(())
}

/// Lowercase a label the way user input is normalized before storage.
pub fn to_lower(name: &str) -> String {
    name.to_ascii_lowercase()
}

/// Generate a short unique identifier usable as a CSP-side resource name.
///
/// The value is the leading 13 hex characters of a random UUID, prefixed
/// so it always starts with a letter.
pub fn gen_uid() -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("c{}", &hex[..12])
}

/// Generate a random password of the given length (mixed case + digits).
pub fn gen_random_password(length: usize) -> String {
    const CHARSET: &[u8] =
        b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect()
}

/// Extract the port from an `ip:port` SSH access point.
pub fn ssh_port_from_access_point(access_point: &str) -> Option<String> {
    let (_, port) = access_point.rsplit_once(':')?;
    if port.is_empty() || !port.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some(port.to_string())
}

/// Strip a version string down to its digits and dots
/// (e.g. `"1.30.1-aliyun.1"` → `"1.30.1.1"`).
pub fn filter_digits_and_dots(version: &str) -> String {
    version
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect()
}

/// Compare two dotted version strings segment-wise and numerically.
///
/// Missing segments count as zero, so `"1.30"` equals `"1.30.0"`.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let parse = |v: &str| -> Vec<u64> {
        v.split('.')
            .filter(|s| !s.is_empty())
            .map(|s| s.parse::<u64>().unwrap_or(0))
            .collect()
    };
    let (va, vb) = (parse(a), parse(b));
    let len = va.len().max(vb.len());
    for i in 0..len {
        let sa = va.get(i).copied().unwrap_or(0);
        let sb = vb.get(i).copied().unwrap_or(0);
        match sa.cmp(&sb) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_names_pass() {
        for name in ["m1", "my-mci", "vm-01", "a"] {
            assert!(check_name(name).is_ok(), "{name} should be valid");
        }
    }

    #[test]
    fn invalid_names_fail() {
        for name in ["", "Caps", "1leading-digit", "has_underscore", "dot.ted"] {
            assert!(check_name(name).is_err(), "{name} should be invalid");
        }
    }

    #[test]
    fn overlong_name_fails() {
        let name = "a".repeat(MAX_NAME_LEN + 1);
        assert!(check_name(&name).is_err());
    }

    #[test]
    fn uid_is_label_safe() {
        let uid = gen_uid();
        assert_eq!(uid.len(), 13);
        assert!(check_name(&uid).is_ok());
    }

    #[test]
    fn uids_are_unique() {
        assert_ne!(gen_uid(), gen_uid());
    }

    #[test]
    fn password_has_requested_length() {
        assert_eq!(gen_random_password(14).len(), 14);
    }

    #[test]
    fn ssh_port_extraction() {
        assert_eq!(
            ssh_port_from_access_point("3.35.1.2:22"),
            Some("22".to_string())
        );
        assert_eq!(
            ssh_port_from_access_point("host:2222"),
            Some("2222".to_string())
        );
        assert_eq!(ssh_port_from_access_point("no-port"), None);
        assert_eq!(ssh_port_from_access_point("trailing:"), None);
    }

    #[test]
    fn version_filtering() {
        assert_eq!(filter_digits_and_dots("1.30.1-aliyun.1"), "1.30.1.1");
        assert_eq!(filter_digits_and_dots("v1.29"), "1.29");
        assert_eq!(filter_digits_and_dots(""), "");
    }

    #[test]
    fn version_comparison() {
        assert_eq!(compare_versions("1.30", "1.29"), Ordering::Greater);
        assert_eq!(compare_versions("1.30", "1.30.0"), Ordering::Equal);
        assert_eq!(compare_versions("1.9", "1.30"), Ordering::Less);
        assert_eq!(compare_versions("", "1.0"), Ordering::Less);
    }
}
