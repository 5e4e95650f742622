//! Data models for the replay API and the expiry sweeper.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::OnceLock;
use uuid::Uuid;

/// Opaque replay payload (a JSON object)
pub type ReplayData = Map<String, Value>;

/// Owning user identifier
pub type UserId = u64;

// ============================================================================
// Replay Identifier
// ============================================================================

/// Length of an encoded identifier (12 bytes as hex)
pub const REPLAY_ID_HEX_LEN: usize = 24;

/// Store-generated replay identifier.
///
/// Layout: 4-byte big-endian unix seconds, 5 bytes of per-process
/// randomness, 3-byte wrapping counter. Rendered as 24 lowercase hex chars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReplayId([u8; 12]);

/// Error returned when a string is not a valid replay identifier
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid replay identifier")]
pub struct InvalidReplayId;

fn process_unique() -> &'static [u8; 5] {
    static UNIQUE: OnceLock<[u8; 5]> = OnceLock::new();
    UNIQUE.get_or_init(|| {
        let random = Uuid::new_v4();
        let mut out = [0u8; 5];
        out.copy_from_slice(&random.as_bytes()[..5]);
        out
    })
}

fn next_counter() -> u32 {
    static COUNTER: OnceLock<AtomicU32> = OnceLock::new();
    COUNTER
        .get_or_init(|| {
            let seed = Uuid::new_v4();
            let b = seed.as_bytes();
            AtomicU32::new(u32::from_be_bytes([0, b[0], b[1], b[2]]))
        })
        .fetch_add(1, Ordering::Relaxed)
}

impl ReplayId {
    /// Generate a new identifier stamped with the current time
    pub fn generate() -> Self {
        Self::generate_at(Utc::now())
    }

    /// Generate a new identifier stamped with `at`
    pub fn generate_at(at: DateTime<Utc>) -> Self {
        // Seconds are truncated to 32 bits (valid until 2106)
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let secs = at.timestamp().max(0) as u32;
        let counter = next_counter() & 0x00ff_ffff;

        let mut bytes = [0u8; 12];
        bytes[..4].copy_from_slice(&secs.to_be_bytes());
        bytes[4..9].copy_from_slice(process_unique());
        bytes[9..].copy_from_slice(&counter.to_be_bytes()[1..]);
        Self(bytes)
    }

    /// Creation time encoded in the identifier (second precision)
    pub fn created_at(&self) -> DateTime<Utc> {
        let secs = u32::from_be_bytes([self.0[0], self.0[1], self.0[2], self.0[3]]);
        Utc.timestamp_opt(i64::from(secs), 0)
            .single()
            .unwrap_or_default()
    }

    /// Check whether a string is a well-formed identifier
    pub fn is_valid(s: &str) -> bool {
        s.len() == REPLAY_ID_HEX_LEN && s.chars().all(|c| c.is_ascii_hexdigit())
    }
}

impl FromStr for ReplayId {
    type Err = InvalidReplayId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if !Self::is_valid(s) {
            return Err(InvalidReplayId);
        }
        let mut bytes = [0u8; 12];
        hex::decode_to_slice(s, &mut bytes).map_err(|_| InvalidReplayId)?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for ReplayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl Serialize for ReplayId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ReplayId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// Replay
// ============================================================================

/// Stored replay document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Replay {
    #[serde(rename = "_id")]
    pub id: ReplayId,

    /// Opaque game-session payload
    pub data: ReplayData,

    #[serde(rename = "userId")]
    pub user_id: UserId,
}

/// Replay fields supplied by the caller on creation
#[derive(Debug, Clone, PartialEq)]
pub struct NewReplay {
    pub data: ReplayData,
    pub user_id: UserId,
}

// ============================================================================
// Table Rows (expiry sweeper)
// ============================================================================

/// A row of a key-value table swept by the expiry job.
///
/// Deserializes from both the camelCase names and the Azure wire names
/// (`PartitionKey`, `RowKey`, `Expire`). Azure's key properties win over the
/// camelCase ones; for the expiry, `expire` wins over `Expire`. The expiry is
/// kept as raw JSON so a malformed value only affects its own row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawTableRow")]
pub struct TableRow {
    #[serde(rename = "partitionKey")]
    pub partition_key: String,

    #[serde(rename = "rowKey")]
    pub row_key: String,

    /// Expiry value as stored; `None` means the row never expires
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expire: Option<Value>,
}

impl TableRow {
    pub fn new(partition_key: impl Into<String>, row_key: impl Into<String>) -> Self {
        Self {
            partition_key: partition_key.into(),
            row_key: row_key.into(),
            expire: None,
        }
    }

    /// Set the expiry timestamp string
    #[must_use]
    pub fn with_expire(mut self, expire: impl Into<String>) -> Self {
        self.expire = Some(Value::String(expire.into()));
        self
    }
}

#[derive(Deserialize)]
struct RawTableRow {
    #[serde(rename = "PartitionKey")]
    wire_partition_key: Option<String>,
    #[serde(rename = "partitionKey")]
    partition_key: Option<String>,
    #[serde(rename = "RowKey")]
    wire_row_key: Option<String>,
    #[serde(rename = "rowKey")]
    row_key: Option<String>,
    #[serde(default)]
    expire: Option<Value>,
    #[serde(default, rename = "Expire")]
    wire_expire: Option<Value>,
}

impl TryFrom<RawTableRow> for TableRow {
    type Error = &'static str;

    fn try_from(raw: RawTableRow) -> Result<Self, Self::Error> {
        Ok(Self {
            partition_key: raw
                .wire_partition_key
                .or(raw.partition_key)
                .ok_or("missing field `PartitionKey`")?,
            row_key: raw
                .wire_row_key
                .or(raw.row_key)
                .ok_or("missing field `RowKey`")?,
            expire: raw.expire.or(raw.wire_expire),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn generated_ids_are_unique_and_valid() {
        let a = ReplayId::generate();
        let b = ReplayId::generate();
        assert_ne!(a, b);

        let encoded = a.to_string();
        assert_eq!(encoded.len(), REPLAY_ID_HEX_LEN);
        assert!(ReplayId::is_valid(&encoded));
        assert_eq!(encoded.parse::<ReplayId>().unwrap(), a);
    }

    #[test]
    fn id_carries_creation_second() {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 15).unwrap();
        let id = ReplayId::generate_at(at);
        assert_eq!(id.created_at(), at);
    }

    #[test]
    fn id_parsing_rejects_malformed_input() {
        assert_eq!("invalidid".parse::<ReplayId>(), Err(InvalidReplayId));
        assert_eq!(
            "zzzzzzzzzzzzzzzzzzzzzzzz".parse::<ReplayId>(),
            Err(InvalidReplayId)
        );
        assert_eq!(
            "65f1c0ffee65f1c0ffee65f1aa".parse::<ReplayId>(),
            Err(InvalidReplayId)
        );
        // Uppercase hex is accepted and normalised on display
        let id: ReplayId = "65F1C0FFEE65F1C0FFEE65F1".parse().unwrap();
        assert_eq!(id.to_string(), "65f1c0ffee65f1c0ffee65f1");
    }

    #[test]
    fn replay_serializes_with_wire_names() {
        let id: ReplayId = "65f1c0ffee65f1c0ffee65f1".parse().unwrap();
        let mut data = ReplayData::new();
        data.insert("replay".to_string(), json!(true));
        let replay = Replay {
            id,
            data,
            user_id: 42,
        };

        let value = serde_json::to_value(&replay).unwrap();
        assert_eq!(
            value,
            json!({"_id": "65f1c0ffee65f1c0ffee65f1", "data": {"replay": true}, "userId": 42})
        );
    }

    #[test]
    fn table_row_accepts_azure_property_names() {
        let row: TableRow = serde_json::from_value(json!({
            "PartitionKey": "p1",
            "RowKey": "r1",
            "Expire": "2021-01-01T00:00:00.000Z",
            "Timestamp": "2020-12-01T00:00:00Z"
        }))
        .unwrap();

        assert_eq!(
            row,
            TableRow::new("p1", "r1").with_expire("2021-01-01T00:00:00.000Z")
        );

        let no_expiry: TableRow =
            serde_json::from_value(json!({"partitionKey": "p", "rowKey": "r"})).unwrap();
        assert!(no_expiry.expire.is_none());
    }

    #[test]
    fn table_row_keeps_non_string_expiry() {
        let rows: Vec<TableRow> = serde_json::from_value(json!([
            {"PartitionKey": "p", "RowKey": "a", "Expire": "2021-01-01T00:00:00.000Z"},
            {"PartitionKey": "p", "RowKey": "b", "Expire": 12345},
            {"PartitionKey": "p", "RowKey": "c", "Expire": null}
        ]))
        .unwrap();

        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1].expire, Some(json!(12345)));
        assert!(rows[2].expire.is_none());
    }

    #[test]
    fn table_row_name_precedence() {
        let row: TableRow = serde_json::from_value(json!({
            "PartitionKey": "wire-p",
            "partitionKey": "app-p",
            "RowKey": "wire-r",
            "expire": "2021-01-01",
            "Expire": "2030-01-01"
        }))
        .unwrap();

        assert_eq!(row.partition_key, "wire-p");
        assert_eq!(row.row_key, "wire-r");
        assert_eq!(row.expire, Some(json!("2021-01-01")));
    }

    #[test]
    fn table_row_requires_keys() {
        let err = serde_json::from_value::<TableRow>(json!({"RowKey": "r"})).unwrap_err();
        assert!(err.to_string().contains("PartitionKey"));
    }
}
