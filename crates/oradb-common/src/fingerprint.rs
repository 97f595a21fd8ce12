//! Spec fingerprints
//!
//! A resource stores the fingerprint of the last spec that converged in
//! `status.appliedSpecHash`. A different fingerprint on a later pass means
//! the user changed something and the phase machine restarts from the top.

use serde::Serialize;

use crate::Error;

/// Compute a deterministic hash of the input string, returning a 16-char hex digest.
///
/// Uses truncated SHA-256 so the value is stable across toolchains and
/// can be persisted.
pub fn deterministic_hash(input: &str) -> String {
    use aws_lc_rs::digest;
    let hash = digest::digest(&digest::SHA256, input.as_bytes());
    hash.as_ref()[..8]
        .iter()
        .fold(String::with_capacity(16), |mut s, b| {
            use std::fmt::Write;
            let _ = write!(s, "{:02x}", b);
            s
        })
}

/// Fingerprint a spec.
///
/// Specs serialize struct fields in declaration order and maps as
/// `BTreeMap`, so equal specs always give equal fingerprints.
pub fn spec_fingerprint<T: Serialize>(spec: &T) -> Result<String, Error> {
    let json = serde_json::to_string(spec)?;
    Ok(deterministic_hash(&json))
}

/// True when `applied` is present and matches the current spec
pub fn is_applied<T: Serialize>(spec: &T, applied: Option<&str>) -> Result<bool, Error> {
    match applied {
        Some(hash) => Ok(spec_fingerprint(spec)? == hash),
        None => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[derive(Serialize)]
    struct Spec {
        replicas: i32,
        labels: BTreeMap<String, String>,
    }

    #[test]
    fn equal_specs_hash_equal() {
        let mut a = BTreeMap::new();
        a.insert("b".to_string(), "2".to_string());
        a.insert("a".to_string(), "1".to_string());
        let mut b = BTreeMap::new();
        b.insert("a".to_string(), "1".to_string());
        b.insert("b".to_string(), "2".to_string());

        let ha = spec_fingerprint(&Spec { replicas: 1, labels: a }).unwrap();
        let hb = spec_fingerprint(&Spec { replicas: 1, labels: b }).unwrap();
        assert_eq!(ha, hb);
        assert_eq!(ha.len(), 16);
    }

    #[test]
    fn changed_spec_changes_hash() {
        let s1 = Spec { replicas: 1, labels: BTreeMap::new() };
        let s2 = Spec { replicas: 2, labels: BTreeMap::new() };
        let h1 = spec_fingerprint(&s1).unwrap();
        assert!(is_applied(&s1, Some(&h1)).unwrap());
        assert!(!is_applied(&s2, Some(&h1)).unwrap());
        assert!(!is_applied(&s1, None).unwrap());
    }
}
