//! Pure destination resolution.

use url::{Position, Url};

use super::{UserProfile, UserRole};

/// Entry point of the authentication flow.
pub const LOGIN_PATH: &str = "/login";

const AUTH_PAGES: &[&str] = &[
    LOGIN_PATH,
    "/signup",
    "/register",
    "/logout",
    "/reset-password",
    "/forgot-password",
    "/verify-email",
];

const AUTH_PREFIXES: &[&str] = &["/auth/"];

const ADMIN_PREFIX: &str = "/admin";

/// Origin relative paths are resolved against; only the path part of the result is used.
const PLACEHOLDER_ORIGIN: &str = "http://localhost";

/// Resolves `path` the way a browser resolves it against the current origin: backslashes,
/// tabs and dot segments included. `None` when the result leaves the origin.
fn resolve_same_origin(path: &str) -> Option<Url> {
    let origin = Url::parse(PLACEHOLDER_ORIGIN).ok()?;
    let resolved = origin.join(path).ok()?;
    (resolved.origin() == origin.origin()).then_some(resolved)
}

/// Normalized path component of `path`, without query or fragment.
fn normalized_path(path: &str) -> String {
    resolve_same_origin(path).map_or_else(
        || {
            let end = path.find(['?', '#']).unwrap_or(path.len());
            path[..end].to_string()
        },
        |url| url.path().to_string(),
    )
}

fn has_segment_prefix(path: &str, prefix: &str) -> bool {
    path == prefix
        || path
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/'))
}

fn is_auth_path(path: &str) -> bool {
    let path = path.trim_end_matches('/');
    AUTH_PAGES.iter().any(|page| has_segment_prefix(path, page))
        || AUTH_PREFIXES
            .iter()
            .any(|prefix| path.starts_with(prefix) || path == prefix.trim_end_matches('/'))
}

fn is_admin_path(path: &str, role: UserRole) -> bool {
    role != UserRole::Admin && has_segment_prefix(path, ADMIN_PREFIX)
}

/// Whether `path` belongs to the authentication flow itself.
#[must_use]
pub fn is_auth_page(path: &str) -> bool {
    is_auth_path(&normalized_path(path))
}

/// Whether `role` is barred from `path`.
#[must_use]
pub fn is_role_restricted(path: &str, role: UserRole) -> bool {
    is_admin_path(&normalized_path(path), role)
}

/// Resolves where to send `profile` after authentication.
///
/// `previous_path` wins when it resolves to a path on the current origin, outside the
/// authentication flow, that the role may visit. It is returned normalized. Otherwise the role
/// default applies.
#[must_use]
pub fn get_redirect_path(profile: &UserProfile, previous_path: Option<&str>) -> String {
    previous_path
        .map(str::trim)
        .filter(|path| path.starts_with('/'))
        .and_then(resolve_same_origin)
        .filter(|url| !is_auth_path(url.path()))
        .filter(|url| !is_admin_path(url.path(), profile.role))
        .map_or_else(
            || profile.role.default_path().to_string(),
            |url| url[Position::BeforePath..].to_string(),
        )
}
