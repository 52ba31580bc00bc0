use std::io::{Read, Write};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::infrastructure::config::CacheSettings;
use crate::infrastructure::error::{EngineError, Result};

/// Reserved field marking a compressed payload wrapper
pub const COMPRESSED_MARKER: &str = "_compressed";

const ENCODING: &str = "gzip+base64";
const FORMAT: &str = "json";

/// Serializes values for the cache store, compressing the ones above a size threshold.
///
/// A compressed payload is a JSON object of the form
/// `{"_compressed": true, "encoding": "gzip+base64", "format": "json", "original_size": n, "data": "..."}`.
/// Raw values that already carry the marker field are always wrapped so `decode` never
/// mistakes them for a wrapper.
#[derive(Debug, Clone)]
pub struct PayloadCodec {
    threshold: usize,
    level: u32,
}

impl Default for PayloadCodec {
    fn default() -> Self {
        Self::from_settings(&CacheSettings::default())
    }
}

impl PayloadCodec {
    pub fn new(threshold: usize, level: u32) -> Self {
        Self {
            threshold,
            level: level.min(9),
        }
    }

    pub fn from_settings(settings: &CacheSettings) -> Self {
        Self::new(settings.compression_threshold, settings.compression_level)
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Returns the payload to store and whether it was compressed
    pub fn encode(&self, value: Value) -> Result<(Value, bool)> {
        let serialized = serde_json::to_vec(&value)?;

        if serialized.len() <= self.threshold && !carries_marker(&value) {
            return Ok((value, false));
        }

        let compressed = self.compress(&serialized)?;
        tracing::debug!(
            original_size = serialized.len(),
            compressed_size = compressed.len(),
            "compressed cache payload"
        );

        let wrapper = json!({
            COMPRESSED_MARKER: true,
            "encoding": ENCODING,
            "format": FORMAT,
            "original_size": serialized.len(),
            "data": STANDARD.encode(compressed),
        });

        Ok((wrapper, true))
    }

    /// Reverses `encode`. Payloads without the marker are returned unchanged.
    pub fn decode(&self, payload: Value) -> Result<Value> {
        match payload {
            Value::Object(map) if map.contains_key(COMPRESSED_MARKER) => self.unwrap(&map),
            other => Ok(other),
        }
    }

    pub fn encode_value<T: Serialize>(&self, value: &T) -> Result<(Value, bool)> {
        self.encode(serde_json::to_value(value)?)
    }

    pub fn decode_value<T: DeserializeOwned>(&self, payload: Value) -> Result<T> {
        let value = self.decode(payload)?;
        serde_json::from_value(value).map_err(|e| {
            EngineError::serialization(format!("cached payload has an unexpected shape: {}", e))
        })
    }

    fn unwrap(&self, map: &Map<String, Value>) -> Result<Value> {
        let encoding = map.get("encoding").and_then(Value::as_str);
        if encoding != Some(ENCODING) {
            return Err(EngineError::compression(format!(
                "unsupported payload encoding: {:?}",
                encoding
            )));
        }

        let format = map.get("format").and_then(Value::as_str);
        if format != Some(FORMAT) {
            return Err(EngineError::compression(format!(
                "unsupported payload format: {:?}",
                format
            )));
        }

        let data = map
            .get("data")
            .and_then(Value::as_str)
            .ok_or_else(|| EngineError::compression("compressed payload has no data field"))?;

        let compressed = STANDARD
            .decode(data)
            .map_err(|e| EngineError::compression(format!("invalid base64 data: {}", e)))?;
        let serialized = self.decompress(&compressed)?;

        serde_json::from_slice(&serialized).map_err(|e| {
            EngineError::compression(format!("decompressed payload is not valid JSON: {}", e))
        })
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::new(self.level));
        encoder
            .write_all(data)
            .and_then(|_| encoder.finish())
            .map_err(|e| EngineError::compression(format!("gzip failed: {}", e)))
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut decoder = GzDecoder::new(data);
        let mut decompressed = Vec::new();
        decoder
            .read_to_end(&mut decompressed)
            .map_err(|e| EngineError::compression(format!("gunzip failed: {}", e)))?;
        Ok(decompressed)
    }
}

fn carries_marker(value: &Value) -> bool {
    matches!(value, Value::Object(map) if map.contains_key(COMPRESSED_MARKER))
}
