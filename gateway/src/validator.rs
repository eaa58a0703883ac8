use crate::errors::RequestError;
use crate::store::{ReferenceStore, StoreError};
use std::collections::HashSet;
use std::sync::Arc;

/// Checks caller supplied identifiers against the reference store.
///
/// Validation is a batch check: a failure says that at least one supplied
/// value is unknown, not which one.
#[derive(Clone)]
pub struct IdentifierValidator {
    store: Arc<dyn ReferenceStore>,
}

#[derive(thiserror::Error, Debug)]
pub enum ValidationFailure {
    #[error("no area keys supplied")]
    NoAreaKeys,
    #[error("unknown area keys")]
    InvalidAreaKeys,
    #[error("unknown consumer groups")]
    InvalidConsumerGroups,
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<ValidationFailure> for RequestError {
    fn from(failure: ValidationFailure) -> Self {
        match failure {
            ValidationFailure::NoAreaKeys => RequestError::NoAreaKeys,
            ValidationFailure::InvalidAreaKeys => RequestError::InvalidAreaKeys,
            ValidationFailure::InvalidConsumerGroups => RequestError::InvalidConsumerGroups,
            ValidationFailure::Store(e) => e.into(),
        }
    }
}

impl IdentifierValidator {
    pub fn new(store: Arc<dyn ReferenceStore>) -> Self {
        Self { store }
    }

    pub async fn validate_area_keys(&self, keys: &[String]) -> Result<(), ValidationFailure> {
        if keys.is_empty() {
            return Err(ValidationFailure::NoAreaKeys);
        }

        let known = self.store.known_area_keys(keys).await?;
        match all_known(keys, &known) {
            true => Ok(()),
            false => Err(ValidationFailure::InvalidAreaKeys),
        }
    }

    pub async fn validate_consumer_groups(
        &self,
        groups: &[String],
    ) -> Result<(), ValidationFailure> {
        let known = self.store.known_consumer_groups(groups).await?;
        match all_known(groups, &known) {
            true => Ok(()),
            false => Err(ValidationFailure::InvalidConsumerGroups),
        }
    }

    pub async fn all_consumer_groups(&self) -> Result<Vec<String>, ValidationFailure> {
        Ok(self.store.all_consumer_groups().await?)
    }

    /// Validates the requested consumer groups, or substitutes every known
    /// group when the caller did not restrict them.
    pub async fn resolve_consumer_groups(
        &self,
        requested: Vec<String>,
    ) -> Result<Vec<String>, ValidationFailure> {
        if requested.is_empty() {
            tracing::info!("No consumer group filter set, using all consumer groups");
            return self.all_consumer_groups().await;
        }

        self.validate_consumer_groups(&requested).await?;
        Ok(requested)
    }
}

// Compares counts of distinct values, so a value repeated by the caller is not
// mistaken for an unknown one.
fn all_known(supplied: &[String], known: &[String]) -> bool {
    let supplied: HashSet<&str> = supplied.iter().map(String::as_str).collect();
    let known: HashSet<&str> = known
        .iter()
        .map(String::as_str)
        .filter(|value| supplied.contains(value))
        .collect();

    known.len() >= supplied.len()
}
