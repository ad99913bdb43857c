//! Route identity extraction from request paths.
//!
//! Paths look like `/objects/...` or, with an explicit API version,
//! `/v/<digits>/objects/...`. The route identity is the logical resource name
//! used to look up backends in the route table.

use super::errors::UpstreamerError;

/// Returns the route identity for `path`, skipping any `v/<version>/` prefix.
///
/// Never fails: a malformed version prefix is the concern of
/// [`extract_api_version`], not of identity extraction.
#[must_use]
pub fn extract_target_identity(path: &str) -> &str {
    let path = path.strip_prefix('/').unwrap_or(path);
    let mut segments = path.split('/');
    let first = segments.next().unwrap_or("");

    if first != "v" {
        return first;
    }

    // Versioned form: the identity is the segment after the version.
    let version = segments.next();
    let identity = segments.next();
    match (version, identity) {
        (Some(_), Some(identity)) => identity,
        _ => first,
    }
}

/// Returns the API version carried by `path`, `0` when the path has no
/// version prefix.
///
/// # Errors
///
/// Returns [`UpstreamerError::InvalidApiVersion`] when the segment after `v/`
/// is not numeric.
pub fn extract_api_version(path: &str) -> Result<u32, UpstreamerError> {
    let path = path.strip_prefix('/').unwrap_or(path);
    let mut segments = path.split('/');

    if segments.next() != Some("v") {
        return Ok(0);
    }

    let version = segments.next().unwrap_or("");
    version
        .parse::<u32>()
        .map_err(|_| UpstreamerError::InvalidApiVersion(version.to_string()))
}

/// Splits `path` into its route identity and API version.
///
/// # Errors
///
/// Returns [`UpstreamerError::InvalidApiVersion`] when a version prefix is
/// present but not numeric.
pub fn extract_route(path: &str) -> Result<(&str, u32), UpstreamerError> {
    let version = extract_api_version(path)?;
    Ok((extract_target_identity(path), version))
}
