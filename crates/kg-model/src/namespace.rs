use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// An opaque UTF-8 entity identifier, typically a URL.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId(String);

/// An opaque UTF-8 predicate identifier, typically a URL.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Predicate(String);

#[derive(Debug, thiserror::Error)]
#[error("identifier must not be empty")]
pub struct EmptyIdError;

macro_rules! string_newtype {
    ($ty:ident) => {
        impl FromStr for $ty {
            type Err = EmptyIdError;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                if s.is_empty() {
                    return Err(EmptyIdError);
                }
                Ok($ty(s.to_string()))
            }
        }

        impl $ty {
            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_string(self) -> String {
                self.0
            }

            /// Construct without the non-empty check, for codecs that
            /// already validated the value on encode and are reconstructing
            /// it from trusted dictionary contents.
            pub fn from_raw(s: impl Into<String>) -> Self {
                $ty(s.into())
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<$ty> for String {
            fn from(v: $ty) -> String {
                v.0
            }
        }

        impl AsRef<str> for $ty {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_newtype!(EntityId);
string_newtype!(Predicate);

/// The URL-prefix namespace an entity belongs to: scheme + host + first
/// path segment (if any), used to partition storage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Namespace(String);

impl Namespace {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Extract the namespace from an entity id: `origin` plus the first path
/// segment, if the URL has one. Falls back to the whole string when it does
/// not parse as a URL, so malformed entity ids still route deterministically
/// rather than panicking.
pub fn namespace_of(entity_id: &EntityId) -> Namespace {
    match url::Url::parse(entity_id.as_str()) {
        Ok(url) => {
            let origin = url.origin().ascii_serialization();
            let first_segment = url
                .path_segments()
                .and_then(|mut segs| segs.next())
                .filter(|s| !s.is_empty());
            match first_segment {
                Some(seg) => Namespace(format!("{origin}/{seg}")),
                None => Namespace(origin),
            }
        }
        Err(_) => Namespace(entity_id.as_str().to_string()),
    }
}

/// Reverse a hostname's labels and append the URL path, producing the
/// storage path transform described in §3 (e.g.
/// `https://imdb.com/title/` -> `.com/.imdb/title`).
pub fn path_transform(url_str: &str) -> String {
    let url = match url::Url::parse(url_str) {
        Ok(u) => u,
        Err(_) => return url_str.to_string(),
    };
    let host = url.host_str().unwrap_or_default();
    let labels: Vec<&str> = host.split('.').collect();
    let reversed: String = labels
        .iter()
        .rev()
        .map(|l| format!(".{l}"))
        .collect::<Vec<_>>()
        .join("/");
    let path = url.path().trim_end_matches('/').trim_start_matches('/');
    if path.is_empty() {
        reversed
    } else {
        format!("{reversed}/{path}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_transform_matches_spec_example() {
        assert_eq!(path_transform("https://imdb.com/title/"), ".com/.imdb/title");
    }

    #[test]
    fn path_transform_handles_subdomain_and_deep_path() {
        assert_eq!(
            path_transform("https://www.imdb.com/title/tt0111161/"),
            ".com/.imdb/.www/title/tt0111161"
        );
    }

    #[test]
    fn namespace_extraction_uses_origin_and_first_segment() {
        let e: EntityId = "https://imdb.com/title/tt0111161".parse().unwrap();
        assert_eq!(namespace_of(&e).as_str(), "https://imdb.com/title");
    }

    #[test]
    fn namespace_extraction_falls_back_when_no_path() {
        let e: EntityId = "https://imdb.com".parse().unwrap();
        assert_eq!(namespace_of(&e).as_str(), "https://imdb.com");
    }

    #[test]
    fn malformed_entity_id_does_not_panic() {
        let e: EntityId = "not-a-url".parse().unwrap();
        assert_eq!(namespace_of(&e).as_str(), "not-a-url");
    }
}
