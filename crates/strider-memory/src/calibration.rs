//! Persistence adapters for the heading calibration offset.

use std::path::Path;

use strider_types::{CalibrationStore, StriderError};
use tracing::warn;

use crate::kv::{KeyValueStore, StoreError};

/// Key under which the offset (radians, `[-π, π]`) is stored.
pub const HEADING_OFFSET_KEY: &str = "heading_offset_rad";

/// Calibration offset kept in the local SQLite state database.
pub struct SqliteCalibrationStore {
    kv: KeyValueStore,
}

impl SqliteCalibrationStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Ok(Self::new(KeyValueStore::open(path)?))
    }

    pub fn new(kv: KeyValueStore) -> Self {
        Self { kv }
    }
}

impl CalibrationStore for SqliteCalibrationStore {
    fn load(&self) -> Result<Option<f64>, StriderError> {
        let value = self.kv.get::<f64>(HEADING_OFFSET_KEY)?;
        Ok(value.filter(|v| {
            let ok = v.is_finite();
            if !ok {
                warn!(value = v, "ignoring non-finite stored heading offset");
            }
            ok
        }))
    }

    fn save(&mut self, offset_rad: f64) -> Result<(), StriderError> {
        if !offset_rad.is_finite() {
            return Err(StriderError::Storage("refusing to store non-finite offset".into()));
        }
        Ok(self.kv.set(HEADING_OFFSET_KEY, &offset_rad)?)
    }

    fn clear(&mut self) -> Result<(), StriderError> {
        self.kv.remove(HEADING_OFFSET_KEY)?;
        Ok(())
    }
}

/// Process-lifetime store; nothing survives a restart.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCalibrationStore {
    value: Option<f64>,
}

impl InMemoryCalibrationStore {
    pub fn with_value(offset_rad: f64) -> Self {
        Self {
            value: Some(offset_rad),
        }
    }
}

impl CalibrationStore for InMemoryCalibrationStore {
    fn load(&self) -> Result<Option<f64>, StriderError> {
        Ok(self.value)
    }

    fn save(&mut self, offset_rad: f64) -> Result<(), StriderError> {
        self.value = Some(offset_rad);
        Ok(())
    }

    fn clear(&mut self) -> Result<(), StriderError> {
        self.value = None;
        Ok(())
    }
}
