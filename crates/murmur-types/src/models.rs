use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Maximum number of entries kept in a summary ranking.
pub const RANKING_SIZE: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Public,
    Private,
}

impl MessageKind {
    /// Classify a report entry type tag. Bots write Portuguese tags
    /// (`pública`, `publica`, `privada`) alongside the English ones.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "public" | "publica" | "pública" => Some(Self::Public),
            "private" | "privada" => Some(Self::Private),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Private => "private",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One record of the append-only message log (`messages.json`).
///
/// `to` is a channel name for public messages and a user id for private ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    #[serde(alias = "type")]
    pub kind: MessageKind,
    pub from: String,
    pub to: String,
    #[serde(alias = "message")]
    pub text: String,
    #[serde(with = "crate::timestamp")]
    pub timestamp: DateTime<Utc>,
}

// -- Reports --

/// Per-user activity snapshot written by a bot into `reports/report_*.json`.
/// Fields the aggregator does not use (`start_time`, `channels_joined`, ...)
/// are ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub user: String,
    #[serde(default)]
    pub sent_messages: Vec<ReportEntry>,
    #[serde(default)]
    pub received_messages: Vec<ReportEntry>,
}

/// A report entry is either a structured record or, in reports written by
/// the first bot generation, a free-form line such as
/// `(privada) para Ana: "oi"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReportEntry {
    Line(String),
    Record(EntryRecord),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntryRecord {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
}

impl ReportEntry {
    /// Declared kind of the entry, `None` when the type tag is missing or
    /// not recognised.
    pub fn kind(&self) -> Option<MessageKind> {
        match self {
            Self::Line(line) => {
                if line.contains("(privada)") || line.contains("(private)") {
                    Some(MessageKind::Private)
                } else {
                    Some(MessageKind::Public)
                }
            }
            Self::Record(record) => record.kind.as_deref().and_then(MessageKind::from_tag),
        }
    }

    pub fn sender(&self) -> Option<&str> {
        match self {
            Self::Line(_) => None,
            Self::Record(record) => record.from.as_deref().filter(|s| !s.is_empty()),
        }
    }

    pub fn channel(&self) -> Option<&str> {
        match self {
            Self::Line(_) => None,
            Self::Record(record) => record.channel.as_deref().filter(|s| !s.is_empty()),
        }
    }
}

// -- Summary --

/// Aggregate statistics rebuilt from the report directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub total_users: usize,
    pub total_reports: usize,
    pub total_messages_public: u64,
    pub total_messages_private: u64,
    pub top_channels: Ranking,
    pub top_users: Ranking,
    #[serde(with = "crate::timestamp")]
    pub generated_at: DateTime<Utc>,
}

/// Ordered `(name, count)` pairs, serialized as a JSON object whose key
/// order is the ranking order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ranking(Vec<(String, u64)>);

impl Ranking {
    pub fn new(entries: Vec<(String, u64)>) -> Self {
        Self(entries)
    }

    pub fn entries(&self) -> &[(String, u64)] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(name, _)| name.as_str())
    }
}

impl Serialize for Ranking {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, count) in &self.0 {
            map.serialize_entry(name, count)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Ranking {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct RankingVisitor;

        impl<'de> Visitor<'de> for RankingVisitor {
            type Value = Ranking;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of names to counts")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Ranking, A::Error> {
                let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((name, count)) = access.next_entry::<String, u64>()? {
                    entries.push((name, count));
                }
                Ok(Ranking(entries))
            }
        }

        deserializer.deserialize_map(RankingVisitor)
    }
}
