//! Comparison helpers for tests.
//!
//! Every check runs even after an earlier one fails, so a single report shows
//! all the differences between what was configured or sent and what came back.

use crate::types::{Headers, RequestData, ResponseData};
use std::fmt;

/// Differences found by a comparison. Empty means everything matched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Mismatches(Vec<String>);

impl Mismatches {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Whether any mismatch message mentions `needle`.
    pub fn mentions(&self, needle: &str) -> bool {
        self.0.iter().any(|m| m.contains(needle))
    }

    pub fn into_result(self) -> Result<(), Mismatches> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }

    /// Panic with the full report unless empty.
    #[track_caller]
    pub fn assert_ok(&self) {
        if !self.is_empty() {
            panic!("{self}");
        }
    }

    fn check<T: PartialEq + fmt::Debug>(&mut self, what: &str, expected: T, actual: T) {
        if expected != actual {
            self.0.push(format!(
                "same {what} expected: expected {expected:?}, got {actual:?}"
            ));
        }
    }
}

impl fmt::Display for Mismatches {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} mismatch(es)", self.0.len())?;
        for mismatch in &self.0 {
            write!(f, "\n  - {mismatch}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Mismatches {}

/// Compare a configured stub with the response a client observed from the
/// server at `host:port`.
pub fn compare_responses(
    expected: &ResponseData,
    actual: &ResponseData,
    host: &str,
    port: u16,
) -> Mismatches {
    let mut mismatches = Mismatches::default();
    mismatches.check("body", expected.body.as_str(), actual.body.as_str());
    mismatches
        .0
        .extend(contains_headers(&expected.headers, &actual.headers).0);
    mismatches.check("method", expected.method.as_str(), actual.method.as_str());
    mismatches.check("status", expected.status, actual.status);
    mismatches.check("host", host, actual.host.as_str());
    mismatches.check("port", port, actual.port);
    mismatches
}

/// Compare the request a client sent with the one the server at `host:port`
/// captured.
pub fn compare_requests(
    expected: &RequestData,
    actual: &RequestData,
    host: &str,
    port: u16,
) -> Mismatches {
    let mut mismatches = Mismatches::default();
    mismatches.check("body", expected.body.as_str(), actual.body.as_str());
    mismatches
        .0
        .extend(contains_headers(&expected.headers, &actual.headers).0);
    mismatches.check("method", expected.method.as_str(), actual.method.as_str());
    mismatches.check("URI", expected.uri.as_str(), actual.uri.as_str());
    mismatches.check("host", host, actual.host.as_str());
    mismatches.check("port", port, actual.port);
    mismatches
}

/// Check that every header in `must_exist` is present in `full_set` with the
/// same values in the same order. Extra headers in `full_set` are fine.
pub fn contains_headers(must_exist: &Headers, full_set: &Headers) -> Mismatches {
    let mut mismatches = Mismatches::default();

    for (name, expected) in must_exist.iter() {
        match full_set.get(name) {
            None => mismatches
                .0
                .push(format!("expected a list of values for the header: {name}")),
            Some(actual) if actual != expected => mismatches.0.push(format!(
                "expected header {name} to be {expected:?}, got {actual:?}"
            )),
            Some(_) => {}
        }
    }

    mismatches
}
