//! Response classification.
//!
//! Every response maps to exactly one [`Classification`]. Decode failures are
//! values, never panics or propagated errors.

use std::sync::Arc;

use stampede_http::Error as TransportError;

/// Structured error body returned by the target service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorBody {
    pub code: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("body is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("body is not a JSON object")]
    NotAnObject,
}

/// Decodes a `{code, message}` error body. Numeric codes are kept as text.
pub fn decode(bytes: &[u8]) -> Result<ErrorBody, DecodeError> {
    let value: serde_json::Value = serde_json::from_slice(bytes)?;
    let serde_json::Value::Object(map) = value else {
        return Err(DecodeError::NotAnObject);
    };

    let text = |key: &str| match map.get(key) {
        Some(serde_json::Value::String(s)) => Some(s.clone()),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    };

    Ok(ErrorBody {
        code: text("code"),
        message: text("message"),
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Matcher {
    CodeEquals(String),
    CodeContains(String),
    MessageContains(String),
}

impl Matcher {
    /// Case-sensitive.
    pub fn matches(&self, body: &ErrorBody) -> bool {
        match self {
            Self::CodeEquals(want) => body.code.as_deref() == Some(want.as_str()),
            Self::CodeContains(part) => body.code.as_deref().is_some_and(|c| c.contains(part)),
            Self::MessageContains(part) => {
                body.message.as_deref().is_some_and(|m| m.contains(part))
            }
        }
    }
}

/// An expected business failure. Several matchers may share one label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub label: Arc<str>,
    pub matcher: Matcher,
}

impl Signature {
    pub fn new(label: &str, matcher: Matcher) -> Self {
        Self {
            label: Arc::from(label),
            matcher,
        }
    }
}

pub const TRANSPORT_TIMEOUT_LABEL: &str = "transport_timeout";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutcomeRules {
    /// Ordered; first match wins.
    pub expected: Vec<Signature>,
    pub expected_statuses: Vec<u16>,
    /// Count transport timeouts as expected contention instead of unexpected failures.
    pub transport_timeout_expected: bool,
}

impl Default for OutcomeRules {
    fn default() -> Self {
        Self {
            expected: Vec::new(),
            expected_statuses: vec![400, 409],
            transport_timeout_expected: false,
        }
    }
}

impl OutcomeRules {
    pub fn with_signatures(expected: Vec<Signature>) -> Self {
        Self {
            expected,
            ..Self::default()
        }
    }

    /// Distinct labels in declaration order.
    pub fn labels(&self) -> Vec<Arc<str>> {
        let mut out: Vec<Arc<str>> = Vec::new();
        for sig in &self.expected {
            if !out.iter().any(|l| *l == sig.label) {
                out.push(sig.label.clone());
            }
        }
        if self.transport_timeout_expected {
            out.push(Arc::from(TRANSPORT_TIMEOUT_LABEL));
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Success,
    ExpectedBusinessFailure { signature: Arc<str> },
    UnexpectedFailure,
    ParseError,
}

impl Classification {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Why a non-success classification was reached, for logging.
#[derive(Debug)]
pub enum Verdict {
    Classified(Classification),
    Undecodable(DecodeError),
    Mismatch(ErrorBody),
}

impl Verdict {
    pub fn classification(&self) -> Classification {
        match self {
            Self::Classified(c) => c.clone(),
            Self::Undecodable(_) => Classification::ParseError,
            Self::Mismatch(_) => Classification::UnexpectedFailure,
        }
    }
}

/// 2xx is success without decoding. Otherwise the body must decode; an
/// expected status whose body matches a signature is an expected failure.
pub fn classify_response(status: u16, body: &[u8], rules: &OutcomeRules) -> Verdict {
    if (200..300).contains(&status) {
        return Verdict::Classified(Classification::Success);
    }

    let decoded = match decode(body) {
        Ok(b) => b,
        Err(err) => return Verdict::Undecodable(err),
    };

    if rules.expected_statuses.contains(&status)
        && let Some(sig) = rules.expected.iter().find(|s| s.matcher.matches(&decoded))
    {
        return Verdict::Classified(Classification::ExpectedBusinessFailure {
            signature: sig.label.clone(),
        });
    }

    Verdict::Mismatch(decoded)
}

pub fn classify(status: u16, body: &[u8], rules: &OutcomeRules) -> Classification {
    classify_response(status, body, rules).classification()
}

pub fn classify_transport_error(err: &TransportError, rules: &OutcomeRules) -> Classification {
    if rules.transport_timeout_expected && err.is_timeout() {
        Classification::ExpectedBusinessFailure {
            signature: Arc::from(TRANSPORT_TIMEOUT_LABEL),
        }
    } else {
        Classification::UnexpectedFailure
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::time::Duration;

    fn coupon_rules() -> OutcomeRules {
        OutcomeRules::with_signatures(vec![
            Signature::new("coupon_sold_out", Matcher::CodeEquals("COUPON_SOLD_OUT".into())),
            Signature::new("coupon_duplicate", Matcher::CodeEquals("COUPON_ALREADY_ISSUED".into())),
            Signature::new("coupon_sold_out", Matcher::MessageContains("sold out".into())),
            Signature::new("coupon_duplicate", Matcher::MessageContains("already".into())),
        ])
    }

    fn expected(label: &str) -> Classification {
        Classification::ExpectedBusinessFailure {
            signature: Arc::from(label),
        }
    }

    #[test]
    fn two_xx_is_success_regardless_of_body() {
        let rules = coupon_rules();
        assert_eq!(classify(200, b"not json", &rules), Classification::Success);
        assert_eq!(classify(201, b"", &rules), Classification::Success);
        assert_eq!(classify(204, b"[1,2]", &rules), Classification::Success);
    }

    #[test]
    fn expected_signatures_match_on_400_and_409() {
        let rules = coupon_rules();
        let sold_out = br#"{"code":"COUPON_SOLD_OUT","message":"x"}"#;
        assert_eq!(classify(400, sold_out, &rules), expected("coupon_sold_out"));
        assert_eq!(classify(409, sold_out, &rules), expected("coupon_sold_out"));

        let dup = br#"{"message":"coupon already issued"}"#;
        assert_eq!(classify(409, dup, &rules), expected("coupon_duplicate"));
    }

    #[test]
    fn first_match_wins() {
        let rules = coupon_rules();
        let both = br#"{"code":"COUPON_ALREADY_ISSUED","message":"sold out"}"#;
        assert_eq!(classify(409, both, &rules), expected("coupon_duplicate"));
    }

    #[test]
    fn matching_is_case_sensitive() {
        let rules = coupon_rules();
        let body = br#"{"code":"coupon_sold_out","message":"SOLD OUT"}"#;
        assert_eq!(classify(409, body, &rules), Classification::UnexpectedFailure);
    }

    #[test]
    fn signature_on_other_status_is_unexpected() {
        let rules = coupon_rules();
        let body = br#"{"code":"COUPON_SOLD_OUT"}"#;
        assert_eq!(classify(500, body, &rules), Classification::UnexpectedFailure);
        assert_eq!(classify(404, body, &rules), Classification::UnexpectedFailure);
    }

    #[test]
    fn undecodable_error_body_is_parse_error() {
        let rules = coupon_rules();
        assert_eq!(classify(409, b"<html>", &rules), Classification::ParseError);
        assert_eq!(classify(500, b"", &rules), Classification::ParseError);
        assert_eq!(classify(400, b"\"text\"", &rules), Classification::ParseError);
        match classify_response(502, b"oops", &rules) {
            Verdict::Undecodable(DecodeError::Json(_)) => {}
            other => panic!("unexpected verdict {other:?}"),
        }
    }

    #[test]
    fn code_contains_matches_substrings() {
        let rules = OutcomeRules::with_signatures(vec![
            Signature::new("point_or_coupon", Matcher::CodeContains("POINT".into())),
            Signature::new("point_or_coupon", Matcher::CodeContains("COUPON".into())),
        ]);
        let body = br#"{"code":"INSUFFICIENT_POINT"}"#;
        assert_eq!(classify(400, body, &rules), expected("point_or_coupon"));
        assert_eq!(rules.labels().len(), 1);
    }

    #[test]
    fn decode_accepts_numeric_codes() {
        match decode(br#"{"code":409,"message":"m"}"#) {
            Ok(b) => {
                assert_eq!(b.code.as_deref(), Some("409"));
                assert_eq!(b.message.as_deref(), Some("m"));
            }
            Err(e) => panic!("{e}"),
        }
        assert!(matches!(decode(b"[]"), Err(DecodeError::NotAnObject)));
    }

    #[test]
    fn transport_timeouts_follow_rules() {
        let err = TransportError::Timeout(Duration::from_millis(5));
        let mut rules = coupon_rules();
        assert_eq!(classify_transport_error(&err, &rules), Classification::UnexpectedFailure);
        rules.transport_timeout_expected = true;
        assert_eq!(
            classify_transport_error(&err, &rules),
            expected(TRANSPORT_TIMEOUT_LABEL)
        );
        let other = TransportError::InvalidUrl("x".into());
        assert_eq!(classify_transport_error(&other, &rules), Classification::UnexpectedFailure);
    }

    proptest! {
        #[test]
        fn classification_is_total_and_deterministic(
            status in 100u16..600,
            body in proptest::collection::vec(any::<u8>(), 0..64),
            code in "[A-Z_]{0,24}",
            message in ".{0,24}",
            structured in any::<bool>(),
        ) {
            let rules = coupon_rules();
            let bytes = if structured {
                serde_json::json!({ "code": code, "message": message }).to_string().into_bytes()
            } else {
                body
            };
            let first = classify(status, &bytes, &rules);
            let second = classify(status, &bytes, &rules);
            prop_assert_eq!(&first, &second);

            let is_2xx = (200..300).contains(&status);
            prop_assert_eq!(first.is_success(), is_2xx);
            if let Classification::ExpectedBusinessFailure { .. } = first {
                prop_assert!(status == 400 || status == 409);
            }
        }
    }
}
