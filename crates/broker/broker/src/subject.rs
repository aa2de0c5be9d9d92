//! NATS-style subject matching: tokens separated by `.`, `*` matches exactly
//! one token, `>` matches one or more trailing tokens.

/// Whether `subject` matches `filter`.
#[must_use]
pub fn subject_matches(filter: &str, subject: &str) -> bool {
    let mut filter_tokens = filter.split('.');
    let mut subject_tokens = subject.split('.');

    loop {
        match (filter_tokens.next(), subject_tokens.next()) {
            (Some(">"), Some(_)) => return true,
            (Some("*"), Some(_)) => {}
            (Some(f), Some(s)) if f == s => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match() {
        assert!(subject_matches("detect.s1.radar", "detect.s1.radar"));
        assert!(!subject_matches("detect.s1.radar", "detect.s1.eo"));
    }

    #[test]
    fn single_token_wildcard() {
        assert!(subject_matches("detect.*.radar", "detect.s1.radar"));
        assert!(!subject_matches("detect.*.radar", "detect.s1.s2.radar"));
        assert!(!subject_matches("detect.*", "detect"));
    }

    #[test]
    fn tail_wildcard() {
        assert!(subject_matches("detect.>", "detect.s1.radar"));
        assert!(subject_matches("track.>", "track.classified.hostile"));
        assert!(subject_matches("decision.approved.>", "decision.approved.engage"));
        assert!(!subject_matches("detect.>", "detect"));
        assert!(!subject_matches("decision.approved.>", "decision.denied.engage"));
    }

    #[test]
    fn length_mismatch() {
        assert!(!subject_matches("a.b", "a.b.c"));
        assert!(!subject_matches("a.b.c", "a.b"));
    }
}
