//! Resolution of caller paths against the backend origin

use super::ClientError;
use url::Url;

const API_PREFIX: &str = "api/";

/// A resolved request target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedUrl {
    /// URL the request is sent to first
    pub url: Url,
    /// Same path without the `api/` prefix; `None` for absolute URLs
    pub alternate: Option<Url>,
}

impl ResolvedUrl {
    pub const fn is_relative(&self) -> bool {
        self.alternate.is_some()
    }
}

/// Turns `projects/`, `/projects/`, `api/projects/` and `/api/projects/`
/// into the same `<origin>/api/projects/` URL
#[derive(Debug, Clone)]
pub struct PathResolver {
    origin: Url,
}

impl PathResolver {
    /// Create a resolver for the given backend origin
    ///
    /// # Errors
    ///
    /// Returns an error if the origin is not an absolute http(s) URL
    pub fn new(origin: &str) -> Result<Self, ClientError> {
        // Trailing slash so that `join` appends instead of replacing the last segment
        let origin = format!("{}/", origin.trim().trim_end_matches('/'));
        let origin = Url::parse(&origin)?;

        if !matches!(origin.scheme(), "http" | "https") || origin.cannot_be_a_base() {
            return Err(ClientError::Configuration(format!(
                "base_url must be an http(s) origin, got {origin}"
            )));
        }

        Ok(Self { origin })
    }

    /// The origin without its trailing slash
    pub fn origin(&self) -> &str {
        self.origin.as_str().trim_end_matches('/')
    }

    /// Resolve a caller path
    ///
    /// # Errors
    ///
    /// Returns an error if the path cannot be joined to the origin or climbs
    /// out of it with `..` segments
    pub fn resolve(&self, path: &str) -> Result<ResolvedUrl, ClientError> {
        let path = path.trim();
        if is_absolute(path) {
            return Ok(ResolvedUrl {
                url: Url::parse(path)?,
                alternate: None,
            });
        }

        let relative = path.trim_start_matches('/');
        let bare = if relative == "api" {
            ""
        } else {
            relative.strip_prefix(API_PREFIX).unwrap_or(relative)
        };

        // `./` keeps segments such as `mailto:` from parsing as a scheme
        let url = self.origin.join(&format!("./{API_PREFIX}{bare}"))?;
        let alternate = self.origin.join(&format!("./{bare}"))?;

        // Dot segments (also percent-encoded or with backslashes) must not climb out
        let base = self.origin.path();
        if !url.path().starts_with(&format!("{base}{API_PREFIX}"))
            || !alternate.path().starts_with(base)
        {
            return Err(ClientError::Configuration(format!(
                "path {path:?} escapes the API namespace"
            )));
        }

        Ok(ResolvedUrl {
            url,
            alternate: Some(alternate),
        })
    }

    /// Resolve a path known to be relative, dropping the alternate
    ///
    /// # Errors
    ///
    /// Returns an error if the path cannot be joined to the origin
    pub fn endpoint(&self, path: &str) -> Result<Url, ClientError> {
        Ok(self.resolve(path)?.url)
    }
}

fn is_absolute(path: &str) -> bool {
    let lower = path.get(..8).unwrap_or(path).to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}
