//! Secrets Manager references
//!
//! Values are never resolved at build time. Commands embed the unresolved
//! dynamic-reference token, which the deployment engine substitutes.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Reference to a Secrets Manager secret by ARN or name
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct SecretRef(String);

impl SecretRef {
    /// Reference a secret by full ARN or by name
    pub fn new(arn_or_name: impl Into<String>) -> Self {
        Self(arn_or_name.into())
    }

    /// ARN or name as given
    pub fn id(&self) -> &str {
        &self.0
    }

    /// `{{resolve:secretsmanager:<arn-or-name>:SecretString:::}}`
    pub fn dynamic_reference(&self) -> String {
        format!("{{{{resolve:secretsmanager:{}:SecretString:::}}}}", self.0)
    }
}

impl fmt::Display for SecretRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.dynamic_reference())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dynamic_reference_token() {
        let secret = SecretRef::new("arn:aws:secretsmanager:us-west-2:123:secret:ca");
        assert_eq!(
            secret.dynamic_reference(),
            "{{resolve:secretsmanager:arn:aws:secretsmanager:us-west-2:123:secret:ca:SecretString:::}}"
        );
        assert_eq!(secret.to_string(), secret.dynamic_reference());
    }

    #[test]
    fn test_name_reference() {
        assert_eq!(
            SecretRef::new("gossip-key").dynamic_reference(),
            "{{resolve:secretsmanager:gossip-key:SecretString:::}}"
        );
    }
}
