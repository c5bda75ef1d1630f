//!
//! src/extract.rs  Andrew Belles  Oct 19th, 2026
//!
//! Flattens raw playlist pages into one ordered run of items
//!

use serde_json::Value;

use crate::errors::EtlError;
use crate::raw::RawPayload;

/// One playlist entry. `track` is known to be a JSON object, every deeper
/// field is checked by whichever transform needs it
#[derive(Debug, Clone)]
pub struct RawItem {
    /// Position in the flattened run
    pub index: usize,
    /// Position within the page at `source_location`
    pub position: usize,
    pub source_location: String,
    pub item: Value
}

impl RawItem {
    /// Looks up a dotted path ("track.album.artists.0.id"). Absent and
    /// null both count as missing
    pub fn field(&self, table: &'static str, path: &str) -> Result<&Value, EtlError> {
        let pointer = format!("/{}", path.replace('.', "/"));
        match self.item.pointer(&pointer) {
            Some(Value::Null) | None => Err(self.incomplete(table, path.to_string())),
            Some(v) => Ok(v),
        }
    }

    pub fn str_field(&self, table: &'static str, path: &str) -> Result<String, EtlError> {
        self.field(table, path)?
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| self.incomplete(table, format!("{path} (expected string)")))
    }

    pub fn u64_field(&self, table: &'static str, path: &str) -> Result<u64, EtlError> {
        self.field(table, path)?
            .as_u64()
            .ok_or_else(|| self.incomplete(table, format!("{path} (expected unsigned integer)")))
    }

    pub fn u32_field(&self, table: &'static str, path: &str) -> Result<u32, EtlError> {
        let value = self.u64_field(table, path)?;
        u32::try_from(value)
            .map_err(|_| self.incomplete(table, format!("{path} (out of range: {value})")))
    }

    pub fn array_field(&self, table: &'static str, path: &str) -> Result<&Vec<Value>, EtlError> {
        self.field(table, path)?
            .as_array()
            .ok_or_else(|| self.incomplete(table, format!("{path} (expected array)")))
    }

    fn incomplete(&self, table: &'static str, field: String) -> EtlError {
        EtlError::IncompleteRecord {
            table,
            index: self.index,
            position: self.position,
            field,
            source_location: self.source_location.clone()
        }
    }
}

/// Concatenates the `items` of every payload, payload order then in-page
/// order. A page without `items`, or an item without a `track`, fails the
/// whole batch
pub fn extract_items(payloads: &[RawPayload]) -> Result<Vec<RawItem>, EtlError> {
    let mut out = Vec::new();
    for payload in payloads {
        let malformed = |reason: String| EtlError::MalformedPayload {
            source_location: payload.source_location.clone(),
            reason
        };

        let items = match payload.body.get("items") {
            Some(Value::Array(items)) => items,
            Some(_) => return Err(malformed("`items` is not an array".to_string())),
            None => return Err(malformed("missing `items`".to_string())),
        };

        for (position, item) in items.iter().enumerate() {
            if !matches!(item.get("track"), Some(Value::Object(_))) {
                return Err(malformed(format!("item {position} has no `track`")));
            }
            out.push(RawItem {
                index: out.len(),
                position,
                source_location: payload.source_location.clone(),
                item: item.clone()
            });
        }
    }
    tracing::debug!(payloads = payloads.len(), items = out.len(), "extract.done");
    Ok(out)
}
