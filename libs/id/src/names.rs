//! Instance-name composition, parsing and ordering.

use std::cmp::Ordering;

use crate::NameError;

/// Separator between the parent, template and ordinal segments.
pub const NAME_SEPARATOR: char = '-';

/// Returns the name prefix shared by all instances of a template.
///
/// The default template (empty name) uses the parent name directly.
#[must_use]
pub fn template_prefix(parent: &str, template: &str) -> String {
    if template.is_empty() {
        parent.to_string()
    } else {
        format!("{parent}{NAME_SEPARATOR}{template}")
    }
}

/// Composes `{prefix}-{ordinal}`.
#[must_use]
pub fn compose_name(prefix: &str, ordinal: i32) -> String {
    format!("{prefix}{NAME_SEPARATOR}{ordinal}")
}

/// Composes a separated-mode instance name: `parent-[template-]ordinal`.
#[must_use]
pub fn compose_instance_name(parent: &str, template: &str, ordinal: i32) -> String {
    compose_name(&template_prefix(parent, template), ordinal)
}

/// Composes the persistent volume claim name for an instance.
#[must_use]
pub fn compose_claim_name(claim_template: &str, instance: &str) -> String {
    format!("{claim_template}{NAME_SEPARATOR}{instance}")
}

/// Name of the headless service that gives instances stable DNS records.
#[must_use]
pub fn headless_service_name(parent: &str) -> String {
    format!("{parent}{NAME_SEPARATOR}headless")
}

/// Splits a name on its last separator into `(parent, ordinal)`.
///
/// When the name has no numeric suffix the whole name is returned as the
/// parent and the ordinal is `None`.
#[must_use]
pub fn parse_parent_and_ordinal(name: &str) -> (&str, Option<i32>) {
    match name.rsplit_once(NAME_SEPARATOR) {
        Some((parent, suffix)) => match suffix.parse::<i32>() {
            Ok(ordinal) if !suffix.starts_with('+') => (parent, Some(ordinal)),
            _ => (name, None),
        },
        None => (name, None),
    }
}

/// Extracts the trailing ordinal of a name, failing when it has none.
pub fn ordinal_of(name: &str) -> Result<i32, NameError> {
    if name.is_empty() {
        return Err(NameError::Empty);
    }
    match parse_parent_and_ordinal(name) {
        (_, Some(ordinal)) => Ok(ordinal),
        (_, None) => Err(NameError::MissingOrdinal(name.to_string())),
    }
}

/// Ordering of instance names: parent ascending, then ordinal ascending.
///
/// Names without an ordinal sort before any numbered sibling.
#[must_use]
pub fn compare_names(a: &str, b: &str) -> Ordering {
    let (parent_a, ordinal_a) = parse_parent_and_ordinal(a);
    let (parent_b, ordinal_b) = parse_parent_and_ordinal(b);
    parent_a
        .cmp(parent_b)
        .then_with(|| ordinal_a.unwrap_or(-1).cmp(&ordinal_b.unwrap_or(-1)))
}

/// Sorts names in place using [`compare_names`].
pub fn sort_names<S: AsRef<str>>(names: &mut [S]) {
    names.sort_by(|a, b| compare_names(a.as_ref(), b.as_ref()));
}
