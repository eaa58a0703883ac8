use std::fmt;
use uuid::Uuid;

/// Identifies one forecast request from publish to reply.
///
/// Sent as the AMQP correlation id and echoed to the caller as `X-Request-Id`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CorrelationToken(String);

impl CorrelationToken {
    pub fn generate() -> Self {
        CorrelationToken(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_tokens_are_unique_uuids() {
        let a = CorrelationToken::generate();
        let b = CorrelationToken::generate();
        assert_ne!(a, b);
        assert!(Uuid::parse_str(a.as_str()).is_ok());
        assert_eq!(a.to_string(), a.as_str());
    }
}
