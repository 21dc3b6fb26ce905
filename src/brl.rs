//! [crate::brl] contains the Brl identifier type: the canonical, globally
//! unique locator every record in the resource graph is keyed by.
//!
//! A Brl combines host origin, reference kind, owning application, and local
//! id into a single immutable value:
//!
//! ```text
//! https://<host>/brl/resources/<application>/<id>
//! https://<host>/brl/applications/<application>
//! https://<host>/brl/accounts/<account>
//! ```
//!
//! Brls are never recomputed from mutable resource fields — once assigned
//! they are the sole key used by the graph's indexes.

use std::{
    fmt::{Display, Formatter},
    str::FromStr,
};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use url::Url;

use crate::RelayError;

/// Characters that are illegal inside application names and resource ids.
/// '/' would break the path grammar, '.' and ':' are reserved for hosts.
static ILLEGAL_SEGMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[./:]").expect("a static character class to compile"));

/// Characters that are illegal inside tags. Tags become store keys, which
/// cannot contain '/'.
static ILLEGAL_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[/]").expect("a static character class to compile"));

/// The kind of reference a Brl points at.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub enum BrlKind {
    #[default]
    Resource,
    Application,
    Account,
}

impl BrlKind {
    fn path_segment(&self) -> &'static str {
        match self {
            BrlKind::Resource => "resources",
            BrlKind::Application => "applications",
            BrlKind::Account => "accounts",
        }
    }
}

/// A parsed Brl. Ordered and hashable so it can key `BTreeMap` indexes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Brl {
    /// Origin of the hosting graph server, e.g. `https://graph.example.com`.
    pub host: String,
    pub kind: BrlKind,
    /// Owning application id. For [BrlKind::Application] this equals `id`.
    /// Empty for [BrlKind::Account].
    pub application: String,
    /// Local id within the application (or the account id).
    pub id: String,
}

impl Brl {
    pub fn resource(host: &str, application: &str, id: &str) -> Result<Brl, RelayError> {
        check_segment(application)?;
        check_segment(id)?;
        Ok(Brl {
            host: host.trim_end_matches('/').to_string(),
            kind: BrlKind::Resource,
            application: application.to_string(),
            id: id.to_string(),
        })
    }

    pub fn application(host: &str, application: &str) -> Result<Brl, RelayError> {
        check_segment(application)?;
        Ok(Brl {
            host: host.trim_end_matches('/').to_string(),
            kind: BrlKind::Application,
            application: application.to_string(),
            id: application.to_string(),
        })
    }

    pub fn account(host: &str, account: &str) -> Result<Brl, RelayError> {
        check_segment(account)?;
        Ok(Brl {
            host: host.trim_end_matches('/').to_string(),
            kind: BrlKind::Account,
            application: String::new(),
            id: account.to_string(),
        })
    }

    /// Parse a resource value that may or may not be a Brl.
    ///
    /// Returns `None` for opaque (non-Brl) values: plain strings, non-URL
    /// data, and URLs that don't follow the `/brl/...` grammar. This is the
    /// "is this value an indirection?" test used by the relay resolver, so
    /// malformed Brl-ish strings are not an error here — they are simply
    /// opaque values.
    pub fn parse_value(value: &str) -> Option<Brl> {
        Brl::from_str(value).ok()
    }
}

fn check_segment(segment: &str) -> Result<(), RelayError> {
    if segment.is_empty() {
        return Err(RelayError::InvalidArgument(
            "empty identifier segment".to_string(),
        ));
    }
    if ILLEGAL_SEGMENT.is_match(segment) {
        return Err(RelayError::InvalidArgument(format!(
            "illegal characters in identifier segment '{segment}'"
        )));
    }
    Ok(())
}

/// Validate a tag value. Tags share the id character rules except '.' and
/// ':' are allowed.
pub fn check_tag(tag: &str) -> Result<(), RelayError> {
    if tag.is_empty() {
        return Err(RelayError::InvalidArgument("empty tag".to_string()));
    }
    if ILLEGAL_TAG.is_match(tag) {
        return Err(RelayError::InvalidArgument(format!(
            "illegal tag value '{tag}'"
        )));
    }
    Ok(())
}

impl Display for Brl {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            BrlKind::Resource => write!(
                f,
                "{}/brl/resources/{}/{}",
                self.host, self.application, self.id
            ),
            BrlKind::Application => {
                write!(f, "{}/brl/applications/{}", self.host, self.application)
            }
            BrlKind::Account => write!(f, "{}/brl/accounts/{}", self.host, self.id),
        }
    }
}

impl FromStr for Brl {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Brl, RelayError> {
        let url = Url::parse(s)?;
        let host = match (url.host_str(), url.port()) {
            (Some(h), Some(p)) => format!("{}://{}:{}", url.scheme(), h, p),
            (Some(h), None) => format!("{}://{}", url.scheme(), h),
            (None, _) => {
                return Err(RelayError::InvalidArgument(format!(
                    "brl '{s}' has no host"
                )))
            }
        };
        let segments: Vec<&str> = url
            .path_segments()
            .map(|segs| segs.filter(|s| !s.is_empty()).collect())
            .unwrap_or_default();
        match segments.as_slice() {
            ["brl", "resources", application, id] => {
                check_segment(application)?;
                check_segment(id)?;
                Ok(Brl {
                    host,
                    kind: BrlKind::Resource,
                    application: application.to_string(),
                    id: id.to_string(),
                })
            }
            ["brl", "applications", application] => {
                check_segment(application)?;
                Ok(Brl {
                    host,
                    kind: BrlKind::Application,
                    application: application.to_string(),
                    id: application.to_string(),
                })
            }
            ["brl", "accounts", account] => {
                check_segment(account)?;
                Ok(Brl {
                    host,
                    kind: BrlKind::Account,
                    application: String::new(),
                    id: account.to_string(),
                })
            }
            _ => Err(RelayError::InvalidArgument(format!(
                "'{s}' is not a brl path"
            ))),
        }
    }
}

impl Serialize for Brl {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

struct BrlVisitor;

impl de::Visitor<'_> for BrlVisitor {
    type Value = Brl;

    fn expecting(&self, formatter: &mut Formatter) -> std::fmt::Result {
        write!(
            formatter,
            "a brl string of the form <host>/brl/<resources|applications|accounts>/..."
        )
    }

    fn visit_str<E>(self, s: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        Brl::from_str(s).map_err(|_e| E::invalid_value(de::Unexpected::Str(s), &self))
    }
}

impl<'de> Deserialize<'de> for Brl {
    fn deserialize<D>(deserializer: D) -> Result<Brl, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_str(BrlVisitor)
    }
}
