use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("missing values: title and content are required")]
    MissingValues,
    #[error("invalid zettel kind: {0:?}")]
    InvalidKind(String),
    #[error("invalid workspace path: {0:?}")]
    InvalidPath(String),
    #[error("invalid id: {0:?}")]
    InvalidId(String),
    #[error("zettel {0} cannot link to itself")]
    SelfLink(ZettelId),
}

// ============================================================================
// ULID and ID Types
// ============================================================================

const ZETTEL_PREFIX: &str = "zet_";
const WORKSPACE_PREFIX: &str = "ws_";

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ZettelId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WorkspaceId(pub String);

impl ZettelId {
    /// Parse an id received from outside (URL path, request body)
    pub fn parse(raw: &str) -> Result<Self, SchemaError> {
        parse_prefixed(raw, ZETTEL_PREFIX).map(ZettelId)
    }
}

impl WorkspaceId {
    pub fn parse(raw: &str) -> Result<Self, SchemaError> {
        parse_prefixed(raw, WORKSPACE_PREFIX).map(WorkspaceId)
    }
}

fn parse_prefixed(raw: &str, prefix: &str) -> Result<String, SchemaError> {
    let raw = raw.trim();
    // Ulid parsing is case-insensitive; store the canonical upper-case form
    raw.strip_prefix(prefix)
        .and_then(|rest| ulid::Ulid::from_string(rest).ok())
        .map(|ulid| format!("{}{}", prefix, ulid))
        .ok_or_else(|| SchemaError::InvalidId(raw.to_string()))
}

impl fmt::Display for ZettelId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for WorkspaceId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub fn generate_zettel_id() -> ZettelId {
    ZettelId(format!("{}{}", ZETTEL_PREFIX, ulid::Ulid::new()))
}

pub fn generate_workspace_id() -> WorkspaceId {
    WorkspaceId(format!("{}{}", WORKSPACE_PREFIX, ulid::Ulid::new()))
}

// ============================================================================
// Time
// ============================================================================

/// Current time truncated to the millisecond precision used on disk and on the wire
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

/// RFC3339 with exactly three fractional digits and a `Z` suffix
pub fn format_time(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_time(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(raw).map(|t| t.with_timezone(&Utc))
}

pub mod rfc3339_millis {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(t: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::format_time(t))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        super::parse_time(&raw).map_err(serde::de::Error::custom)
    }
}

/// Creation and last update times of an entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamp {
    #[serde(with = "rfc3339_millis")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "rfc3339_millis")]
    pub updated_at: DateTime<Utc>,
}

impl Timestamp {
    pub fn new() -> Self {
        let now = now();
        Self {
            created_at: now,
            updated_at: now,
        }
    }

    /// Refresh `updated_at`, never moving it before `created_at`
    pub fn touch(&mut self) {
        self.updated_at = now().max(self.created_at);
    }
}

impl Default for Timestamp {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Zettel Schema
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ZettelKind {
    #[serde(rename = "fleet")]
    Fleet,
    #[serde(rename = "permanent")]
    Permanent,
}

impl ZettelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ZettelKind::Fleet => "fleet",
            ZettelKind::Permanent => "permanent",
        }
    }
}

impl FromStr for ZettelKind {
    type Err = SchemaError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "fleet" => Ok(ZettelKind::Fleet),
            "permanent" => Ok(ZettelKind::Permanent),
            other => Err(SchemaError::InvalidKind(other.to_string())),
        }
    }
}

impl fmt::Display for ZettelKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A directed edge between two zettels
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub from: ZettelId,
    pub to: ZettelId,
    #[serde(with = "rfc3339_millis")]
    pub created_at: DateTime<Utc>,
}

impl Link {
    pub fn new(from: ZettelId, to: ZettelId) -> Result<Self, SchemaError> {
        if from == to {
            return Err(SchemaError::SelfLink(from));
        }
        Ok(Self {
            from,
            to,
            created_at: now(),
        })
    }
}

/// A note. `links` holds outgoing edges, `backlinks` incoming ones; both are
/// only populated when loaded with links or built up with `add_link`.
#[derive(Debug, Clone, Serialize)]
pub struct Zettel {
    id: ZettelId,
    title: String,
    content: String,
    kind: ZettelKind,
    #[serde(flatten)]
    timestamp: Timestamp,
    links: Vec<Link>,
    backlinks: Vec<Link>,
}

impl Zettel {
    pub fn new(title: &str, content: &str, kind: ZettelKind) -> Result<Self, SchemaError> {
        if title.trim().is_empty() || content.trim().is_empty() {
            return Err(SchemaError::MissingValues);
        }

        Ok(Self {
            id: generate_zettel_id(),
            title: title.to_string(),
            content: content.to_string(),
            kind,
            timestamp: Timestamp::new(),
            links: Vec::new(),
            backlinks: Vec::new(),
        })
    }

    /// Rebuild a zettel from persisted fields without re-validating them
    pub fn restore(
        id: ZettelId,
        title: String,
        content: String,
        kind: ZettelKind,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            id,
            title,
            content,
            kind,
            timestamp,
            links: Vec::new(),
            backlinks: Vec::new(),
        }
    }

    /// Attach edges loaded from storage
    pub fn with_links(mut self, links: Vec<Link>, backlinks: Vec<Link>) -> Self {
        self.links = links;
        self.backlinks = backlinks;
        self
    }

    pub fn id(&self) -> &ZettelId {
        &self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn kind(&self) -> ZettelKind {
        self.kind
    }

    pub fn timestamp(&self) -> &Timestamp {
        &self.timestamp
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }

    pub fn backlinks(&self) -> &[Link] {
        &self.backlinks
    }

    pub fn set_title(&mut self, title: &str) -> Result<(), SchemaError> {
        if title.trim().is_empty() {
            return Err(SchemaError::MissingValues);
        }
        self.title = title.to_string();
        self.timestamp.touch();
        Ok(())
    }

    pub fn set_content(&mut self, content: &str) -> Result<(), SchemaError> {
        if content.trim().is_empty() {
            return Err(SchemaError::MissingValues);
        }
        self.content = content.to_string();
        self.timestamp.touch();
        Ok(())
    }

    pub fn set_kind(&mut self, kind: ZettelKind) {
        self.kind = kind;
        self.timestamp.touch();
    }

    pub fn links_to(&self, target: &ZettelId) -> bool {
        self.links.iter().any(|link| &link.to == target)
    }

    pub fn linked_from(&self, source: &ZettelId) -> bool {
        self.backlinks.iter().any(|link| &link.from == source)
    }

    /// Link `self -> to`, mirroring the edge as a backlink on `to`.
    /// Adding an edge that already exists changes nothing.
    pub fn add_link(&mut self, to: &mut Zettel) -> Result<(), SchemaError> {
        let link = Link::new(self.id.clone(), to.id.clone())?;

        if !self.links_to(&to.id) {
            self.links.push(link.clone());
        }
        if !to.linked_from(&self.id) {
            to.backlinks.push(link);
        }
        Ok(())
    }

    /// Drop the edge `self -> to` from both sides
    pub fn remove_link(&mut self, to: &mut Zettel) {
        self.links.retain(|link| link.to != to.id);
        to.backlinks.retain(|link| link.from != self.id);
    }
}

// ============================================================================
// Workspace Schema
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct Workspace {
    id: WorkspaceId,
    path: String,
    zettels: BTreeSet<ZettelId>,
    #[serde(flatten)]
    timestamp: Timestamp,
}

fn validate_path(path: &str) -> Result<(), SchemaError> {
    if path.trim().is_empty() || !Path::new(path).exists() {
        return Err(SchemaError::InvalidPath(path.to_string()));
    }
    Ok(())
}

impl Workspace {
    /// Create a workspace rooted at an existing directory or file
    pub fn new(path: &str) -> Result<Self, SchemaError> {
        validate_path(path)?;

        Ok(Self {
            id: generate_workspace_id(),
            path: path.to_string(),
            zettels: BTreeSet::new(),
            timestamp: Timestamp::new(),
        })
    }

    pub fn restore(
        id: WorkspaceId,
        path: String,
        zettels: BTreeSet<ZettelId>,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            id,
            path,
            zettels,
            timestamp,
        }
    }

    pub fn id(&self) -> &WorkspaceId {
        &self.id
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn timestamp(&self) -> &Timestamp {
        &self.timestamp
    }

    pub fn zettel_ids(&self) -> impl Iterator<Item = &ZettelId> {
        self.zettels.iter()
    }

    pub fn contains(&self, id: &ZettelId) -> bool {
        self.zettels.contains(id)
    }

    pub fn len(&self) -> usize {
        self.zettels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zettels.is_empty()
    }

    pub fn set_path(&mut self, path: &str) -> Result<(), SchemaError> {
        validate_path(path)?;
        self.path = path.to_string();
        self.timestamp.touch();
        Ok(())
    }

    pub fn add_zettel(&mut self, id: ZettelId) -> bool {
        let added = self.zettels.insert(id);
        if added {
            self.timestamp.touch();
        }
        added
    }

    pub fn remove_zettel(&mut self, id: &ZettelId) -> bool {
        let removed = self.zettels.remove(id);
        if removed {
            self.timestamp.touch();
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_generation() {
        let zettel_id = generate_zettel_id();
        assert!(zettel_id.0.starts_with("zet_"));
        assert_eq!(zettel_id.0.len(), 30); // "zet_" + 26 chars

        let workspace_id = generate_workspace_id();
        assert!(workspace_id.0.starts_with("ws_"));

        assert_eq!(ZettelId::parse(&zettel_id.0).unwrap(), zettel_id);
        assert_eq!(WorkspaceId::parse(&workspace_id.0).unwrap(), workspace_id);
    }

    #[test]
    fn test_id_parse_rejects_wrong_prefix_and_garbage() {
        let workspace_id = generate_workspace_id();
        assert!(ZettelId::parse(&workspace_id.0).is_err());
        assert!(ZettelId::parse("zet_not-a-ulid").is_err());
        assert!(ZettelId::parse("").is_err());
        assert!(WorkspaceId::parse("../etc/passwd").is_err());
    }

    #[test]
    fn test_id_parse_canonicalizes_case() {
        let zettel_id = generate_zettel_id();
        let lower = format!("zet_{}", zettel_id.0["zet_".len()..].to_lowercase());

        assert_ne!(lower, zettel_id.0);
        assert_eq!(ZettelId::parse(&lower).unwrap(), zettel_id);
        assert_eq!(ZettelId::parse(&format!("  {}  ", zettel_id)).unwrap(), zettel_id);
    }

    #[test]
    fn test_new_zettel_validation() {
        let cases = [
            ("", "content", SchemaError::MissingValues),
            ("title", "", SchemaError::MissingValues),
            ("   ", "content", SchemaError::MissingValues),
        ];

        for (title, content, expected) in cases {
            let err = Zettel::new(title, content, ZettelKind::Permanent).unwrap_err();
            assert_eq!(err, expected, "title={:?} content={:?}", title, content);
        }

        assert_eq!(
            "random_kind".parse::<ZettelKind>().unwrap_err(),
            SchemaError::InvalidKind("random_kind".into())
        );
        assert_eq!("fleet".parse::<ZettelKind>().unwrap(), ZettelKind::Fleet);
    }

    #[test]
    fn test_setters_touch_timestamp() {
        let mut zettel = Zettel::new("title", "body", ZettelKind::Fleet).unwrap();
        let created = zettel.timestamp().created_at;

        zettel.set_title("new title").unwrap();
        zettel.set_kind(ZettelKind::Permanent);

        assert_eq!(zettel.title(), "new title");
        assert_eq!(zettel.kind(), ZettelKind::Permanent);
        assert_eq!(zettel.timestamp().created_at, created);
        assert!(zettel.timestamp().updated_at >= created);
        assert_eq!(zettel.set_content(" "), Err(SchemaError::MissingValues));
        assert_eq!(zettel.content(), "body");
    }

    #[test]
    fn test_add_link_mirrors_backlink() {
        let mut a = Zettel::new("a", "first", ZettelKind::Fleet).unwrap();
        let mut b = Zettel::new("b", "second", ZettelKind::Fleet).unwrap();

        a.add_link(&mut b).unwrap();
        a.add_link(&mut b).unwrap();

        assert_eq!(a.links().len(), 1);
        assert_eq!(b.backlinks().len(), 1);
        assert!(a.links_to(b.id()));
        assert!(b.linked_from(a.id()));
        assert!(a.backlinks().is_empty());
        assert!(b.links().is_empty());

        a.remove_link(&mut b);
        assert!(a.links().is_empty());
        assert!(b.backlinks().is_empty());

        // removing again is harmless
        a.remove_link(&mut b);
    }

    #[test]
    fn test_self_link_rejected() {
        let a = Zettel::new("a", "first", ZettelKind::Fleet).unwrap();
        let mut copy = a.clone();
        let mut original = a;

        let err = original.add_link(&mut copy).unwrap_err();
        assert!(matches!(err, SchemaError::SelfLink(_)));
        assert!(original.links().is_empty());
    }

    #[test]
    fn test_workspace_path_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_str().unwrap();

        let mut workspace = Workspace::new(path).unwrap();
        assert_eq!(workspace.path(), path);
        assert!(workspace.is_empty());

        assert!(matches!(Workspace::new(""), Err(SchemaError::InvalidPath(_))));
        assert!(matches!(
            Workspace::new("/definitely/not/here/zet"),
            Err(SchemaError::InvalidPath(_))
        ));
        assert!(workspace.set_path("/definitely/not/here/zet").is_err());
        assert_eq!(workspace.path(), path);
    }

    #[test]
    fn test_workspace_membership_is_a_set() {
        let dir = tempfile::tempdir().unwrap();
        let mut workspace = Workspace::new(dir.path().to_str().unwrap()).unwrap();
        let id = generate_zettel_id();

        assert!(workspace.add_zettel(id.clone()));
        assert!(!workspace.add_zettel(id.clone()));
        assert_eq!(workspace.len(), 1);
        assert!(workspace.contains(&id));

        assert!(workspace.remove_zettel(&id));
        assert!(!workspace.remove_zettel(&id));
    }

    #[test]
    fn test_zettel_serialization() {
        let mut a = Zettel::new("a", "first", ZettelKind::Permanent).unwrap();
        let mut b = Zettel::new("b", "second", ZettelKind::Fleet).unwrap();
        a.add_link(&mut b).unwrap();

        let json = serde_json::to_value(&a).unwrap();
        assert_eq!(json["kind"], "permanent");
        assert_eq!(json["id"], a.id().0.as_str());
        assert_eq!(json["links"][0]["to"], b.id().0.as_str());

        let created = json["created_at"].as_str().unwrap();
        assert!(created.ends_with('Z'));
        assert_eq!(parse_time(created).unwrap(), a.timestamp().created_at);
    }
}
