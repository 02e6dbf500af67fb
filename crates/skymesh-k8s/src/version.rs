//! Cluster version recommendation.

use skymesh_core::names::{compare_versions, filter_digits_and_dots};

use crate::capability::VersionEntry;
use crate::error::{K8sError, K8sResult};

/// Pick a version from the available list.
///
/// With no request, the overall highest version wins. With a request,
/// an exact id match wins; otherwise the highest version whose
/// digits-and-dots form starts with the requested prefix. Anything else
/// is an error naming the available versions.
pub fn recommend_version(
    available: &[VersionEntry],
    requested: &str,
) -> K8sResult<String> {
    if available.is_empty() {
        return Err(K8sError::Capability(
            "no available K8s versions".to_string(),
        ));
    }

    if requested.is_empty() {
        let mut best: Option<&VersionEntry> = None;
        for entry in available {
            let is_higher = match best {
                Some(current) => {
                    compare_versions(
                        &filter_digits_and_dots(&current.id),
                        &filter_digits_and_dots(&entry.id),
                    )
                    .is_lt()
                }
                None => true,
            };
            if is_higher {
                best = Some(entry);
            }
        }
        // `available` is non-empty, so a best entry exists.
        return Ok(best.map(|entry| entry.id.clone()).unwrap_or_default());
    }

    if let Some(exact) = available
        .iter()
        .find(|entry| entry.id.eq_ignore_ascii_case(requested))
    {
        return Ok(exact.id.clone());
    }

    let wanted = filter_digits_and_dots(requested);
    let mut best: Option<&VersionEntry> = None;
    for entry in available {
        let filtered = filter_digits_and_dots(&entry.id);
        if !filtered.starts_with(&wanted) {
            continue;
        }
        let is_higher = match best {
            Some(current) => compare_versions(
                &filter_digits_and_dots(&current.id),
                &filtered,
            )
            .is_lt(),
            None => true,
        };
        if is_higher {
            best = Some(entry);
        }
    }

    match best {
        Some(entry) => Ok(entry.id.clone()),
        None => {
            let ids: Vec<&str> = available.iter().map(|e| e.id.as_str()).collect();
            Err(K8sError::Capability(format!(
                "requested version '{requested}' is not offered; available: {}",
                ids.join(", ")
            )))
        }
    }
}
