//! Typed reads of simulation memory used as search metrics.

use serde::{Deserialize, Serialize};
use tasfw_resource::game::Game;
use tasfw_resource::Resource;

use crate::EngineError;

/// Scalar type stored at a probed address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ValueKind {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    F32,
}

/// A symbol-relative memory location and how to read it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Probe {
    /// Exported symbol the location is relative to.
    pub symbol: String,
    /// Byte offset from the symbol's address.
    #[serde(default)]
    pub offset: usize,
    /// How the bytes at the location are interpreted.
    pub kind: ValueKind,
}

impl Probe {
    pub fn new(symbol: &str, offset: usize, kind: ValueKind) -> Self {
        Self {
            symbol: symbol.to_owned(),
            offset,
            kind,
        }
    }

    /// Read the value, widened to `f64`.
    pub fn read<R: Resource>(&self, game: &Game<R>) -> Result<f64, EngineError> {
        let (symbol, offset) = (self.symbol.as_str(), self.offset);
        let value = match self.kind {
            ValueKind::U8 => f64::from(game.read_symbol::<u8>(symbol, offset)?),
            ValueKind::I8 => f64::from(game.read_symbol::<i8>(symbol, offset)?),
            ValueKind::U16 => f64::from(game.read_symbol::<u16>(symbol, offset)?),
            ValueKind::I16 => f64::from(game.read_symbol::<i16>(symbol, offset)?),
            ValueKind::U32 => f64::from(game.read_symbol::<u32>(symbol, offset)?),
            ValueKind::I32 => f64::from(game.read_symbol::<i32>(symbol, offset)?),
            ValueKind::F32 => f64::from(game.read_symbol::<f32>(symbol, offset)?),
        };
        Ok(value)
    }
}

/// Direction a search metric should move.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Objective {
    #[default]
    Maximize,
    Minimize,
}

impl Objective {
    /// Whether `candidate` beats `incumbent`. Ties keep the incumbent.
    pub fn better(self, candidate: f64, incumbent: f64) -> bool {
        match self {
            Self::Maximize => candidate > incumbent,
            Self::Minimize => candidate < incumbent,
        }
    }
}

/// Threshold a metric must reach.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Goal {
    AtLeast(f64),
    AtMost(f64),
}

impl Goal {
    pub fn reached(self, value: f64) -> bool {
        match self {
            Self::AtLeast(threshold) => value >= threshold,
            Self::AtMost(threshold) => value <= threshold,
        }
    }
}
