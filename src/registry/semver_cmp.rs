use chrono::{DateTime, Utc};
use std::cmp::Ordering;

/// Splits off the first `-`-delimited prerelease tag, per standard semver
/// precedence: a version with no prerelease tag always outranks one with a
/// tag once the release segments tie (`1.0.0` beats `1.0.0-beta`).
fn split_release_prerelease(version: &str) -> (&str, Option<&str>) {
    match version.split_once('-') {
        Some((release, pre)) => (release, Some(pre)),
        None => (version, None),
    }
}

/// Compares two `.`-delimited segment lists: numerically when both sides of
/// a position parse as an integer, lexicographically otherwise; a position
/// missing on one side counts as `0`.
fn compare_dotted(a: &str, b: &str) -> Ordering {
    let a_parts: Vec<&str> = a.split('.').collect();
    let b_parts: Vec<&str> = b.split('.').collect();
    let len = a_parts.len().max(b_parts.len());

    for i in 0..len {
        let seg_a = a_parts.get(i).copied().unwrap_or("0");
        let seg_b = b_parts.get(i).copied().unwrap_or("0");
        if seg_a == seg_b {
            continue;
        }

        let ordering = match (seg_a.parse::<i64>(), seg_b.parse::<i64>()) {
            (Ok(na), Ok(nb)) => na.cmp(&nb),
            _ => seg_a.cmp(seg_b),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

/// Compares two version strings only, ignoring publish time. `Greater`
/// means `a` is the newer version.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let (a_release, a_pre) = split_release_prerelease(a);
    let (b_release, b_pre) = split_release_prerelease(b);

    let release_cmp = compare_dotted(a_release, b_release);
    if release_cmp != Ordering::Equal {
        return release_cmp;
    }

    match (a_pre, b_pre) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(a_pre), Some(b_pre)) => compare_dotted(a_pre, b_pre),
    }
}

/// Full comparator including the publish-time tie-break: after comparing
/// versions, a tie is broken by publish timestamp (later wins), and if that
/// still ties the two are considered equal.
pub fn compare_with_timestamp(
    a_version: &str,
    a_published_at: DateTime<Utc>,
    b_version: &str,
    b_published_at: DateTime<Utc>,
) -> Ordering {
    let version_cmp = compare_versions(a_version, b_version);
    if version_cmp != Ordering::Equal {
        return version_cmp;
    }
    a_published_at.cmp(&b_published_at)
}

/// `true` when `(candidate_version, candidate_published_at)` should replace
/// `(current_version, current_published_at)` as the `isLatest` row.
pub fn is_newer(
    candidate_version: &str,
    candidate_published_at: DateTime<Utc>,
    current_version: &str,
    current_published_at: DateTime<Utc>,
) -> bool {
    compare_with_timestamp(
        candidate_version,
        candidate_published_at,
        current_version,
        current_published_at,
    ) == Ordering::Greater
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(offset_secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + offset_secs, 0).unwrap()
    }

    #[test]
    fn release_beats_prerelease_of_same_segments() {
        assert_eq!(compare_versions("1.0.0", "1.0.0-beta"), Ordering::Greater);
        assert_eq!(compare_versions("1.0.0-beta", "1.0.0"), Ordering::Less);
    }

    #[test]
    fn numeric_segments_compare_numerically_not_lexicographically() {
        assert_eq!(compare_versions("1.9.0", "1.10.0"), Ordering::Less);
    }

    #[test]
    fn missing_trailing_segment_counts_as_zero() {
        assert_eq!(compare_versions("1.2", "1.2.0"), Ordering::Equal);
        assert_eq!(compare_versions("1.2.1", "1.2"), Ordering::Greater);
    }

    #[test]
    fn equal_prerelease_tags_compare_lexicographically() {
        assert_eq!(compare_versions("1.0.0-alpha", "1.0.0-beta"), Ordering::Less);
    }

    #[test]
    fn timestamp_tiebreak_applies_only_when_versions_tie() {
        assert_eq!(
            compare_with_timestamp("1.0.0", ts(0), "1.0.0", ts(1)),
            Ordering::Less
        );
        assert_eq!(
            compare_with_timestamp("1.0.0", ts(5), "1.0.0", ts(5)),
            Ordering::Equal
        );
    }

    #[test]
    fn scenario_latest_tie_break_by_time() {
        // Create server com.ex/foo v1.0.0 at t0, then v1.0.0-beta at t0+1s:
        // 1.0.0 stays latest despite being older (numeric release beats
        // prerelease regardless of publish time).
        assert!(!is_newer("1.0.0-beta", ts(1), "1.0.0", ts(0)));
    }
}
