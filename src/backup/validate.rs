//! Validation functions for configuration values.
//!
//! Provides custom validation functions for set names, path templates,
//! and other configuration parameters.

use sanitize_filename::{is_sanitized, sanitize};
use validator::ValidationError;

use crate::backup::destination::{DIRNAME_PLACEHOLDER, SETNAME_PLACEHOLDER};

/// Set names double as run-state file names, so they must be valid file names.
pub fn validate_set_name<S: AsRef<str>>(name: S) -> Result<(), ValidationError> {
    let name = name.as_ref();
    if name.is_empty() {
        return Err(ValidationError::new("InvalidSetName")
            .with_message("Set name must not be empty".into()));
    }
    if !is_sanitized(name) {
        return Err(ValidationError::new("InvalidSetName").with_message(
            format!("Invalid set name, try sanitizing like {:?}", sanitize(name)).into(),
        ));
    }

    Ok(())
}

pub fn validate_template<S: AsRef<str>>(template: S) -> Result<(), ValidationError> {
    let template = template.as_ref();
    if template.trim().is_empty() {
        return Err(ValidationError::new("InvalidTemplate")
            .with_message("Path template must not be empty".into()));
    }

    let unknown = template
        .match_indices('{')
        .map(|(idx, _)| &template[idx..])
        .find(|rest| {
            rest.find('}').is_some_and(|end| {
                let placeholder = &rest[..=end];
                placeholder != DIRNAME_PLACEHOLDER && placeholder != SETNAME_PLACEHOLDER
            })
        });
    if let Some(rest) = unknown {
        let end = rest.find('}').map(|e| e + 1).unwrap_or(rest.len());
        return Err(ValidationError::new("InvalidTemplate").with_message(
            format!(
                "Unknown placeholder {:?}, expected {} or {}",
                &rest[..end],
                DIRNAME_PLACEHOLDER,
                SETNAME_PLACEHOLDER
            )
            .into(),
        ));
    }

    Ok(())
}

pub fn validate_separator<S: AsRef<str>>(sep: S) -> Result<(), ValidationError> {
    let sep = sep.as_ref();
    if sep.contains('/') || sep.contains('\0') {
        return Err(ValidationError::new("InvalidSeparator")
            .with_message("Rotation separator must not contain '/' or null".into()));
    }

    Ok(())
}

pub fn validate_marker_name<S: AsRef<str>>(name: S) -> Result<(), ValidationError> {
    let name = name.as_ref();
    if name.is_empty() || !is_sanitized(name) {
        return Err(ValidationError::new("InvalidMarkerName").with_message(
            format!("Completion marker must be a plain file name, got {name:?}").into(),
        ));
    }

    Ok(())
}
