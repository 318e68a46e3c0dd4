//! Primary and secondary indexes.
//!
//! The primary index maps document keys to their current revision and is
//! authoritative for existence. Secondary indexes implement
//! [`SecondaryIndex`]; the collection maintains them in declaration order
//! and undoes them in reverse order on rollback.

mod hash;
mod primary;
mod traits;

pub use hash::HashIndex;
pub use primary::{PrimaryIndex, PRIMARY_INDEX_NAME};
pub use traits::{IndexDefinition, SecondaryIndex};

use crate::error::{CoreError, CoreResult};
use crate::hooks::EvaluatorRegistry;
use std::sync::Arc;

/// Builds the bundled index implementation for `definition`.
///
/// # Errors
///
/// Returns `InvalidArgument` if the definition names an unregistered
/// evaluator or has no fields.
pub fn build_index(
    definition: IndexDefinition,
    evaluators: &EvaluatorRegistry,
) -> CoreResult<Arc<dyn SecondaryIndex>> {
    let evaluator = match &definition.evaluator {
        Some(name) => Some(evaluators.get(name).ok_or_else(|| {
            CoreError::invalid_argument(format!("evaluator '{name}' is not registered"))
        })?),
        None => None,
    };
    Ok(Arc::new(HashIndex::new(definition, evaluator)?))
}
