//! `$<integer>` placeholders and their resolution

use crate::error::BatchError;
use crate::operation::BatchOperation;
use std::collections::{BTreeMap, HashMap};

/// Check if `value` is meant as a temp id
#[inline]
#[must_use]
pub fn looks_like_temp_id(value: &str) -> bool {
    value.starts_with('$')
}

/// Check if `value` is a well-formed temp id
#[must_use]
pub fn is_temp_id(value: &str) -> bool {
    value
        .strip_prefix('$')
        .is_some_and(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
}

/// Validate every declaration and reference before any work is done
///
/// Returns the index that declares each temp id.
pub(crate) fn validate(operations: &[BatchOperation]) -> Result<HashMap<String, usize>, BatchError> {
    let mut declared: HashMap<String, usize> = HashMap::new();
    for (index, op) in operations.iter().enumerate() {
        if let Some(temp_id) = op.temp_id() {
            if !is_temp_id(temp_id) {
                return Err(BatchError::InvalidTempId {
                    index,
                    value: temp_id.to_string(),
                });
            }
            if let Some(&first) = declared.get(temp_id) {
                return Err(BatchError::DuplicateTempId {
                    temp_id: temp_id.to_string(),
                    first,
                    second: index,
                });
            }
            declared.insert(temp_id.to_string(), index);
        }
        for reference in op.id_refs() {
            if looks_like_temp_id(reference.value) && !is_temp_id(reference.value) {
                return Err(BatchError::InvalidTempId {
                    index,
                    value: reference.value.to_string(),
                });
            }
        }
    }
    Ok(declared)
}

/// Replace temp ids in `op`'s id fields with generated ids
pub(crate) fn resolve(
    index: usize,
    op: &mut BatchOperation,
    mapping: &BTreeMap<String, String>,
) -> Result<(), BatchError> {
    for slot in op.id_refs_mut() {
        if !is_temp_id(slot.value.as_str()) {
            continue;
        }
        match mapping.get(slot.value.as_str()) {
            Some(real) => slot.value.clone_from(real),
            None => {
                return Err(BatchError::UnresolvedReference {
                    index,
                    temp_id: slot.value.clone(),
                    field: slot.field.path,
                })
            }
        }
    }
    Ok(())
}
