//! Per-frame controller input records.

use serde::{Deserialize, Serialize};

/// Button masks in controller pad order.
pub mod buttons {
    pub const A: u16 = 0x8000;
    pub const B: u16 = 0x4000;
    pub const Z: u16 = 0x2000;
    pub const START: u16 = 0x1000;
    pub const D_UP: u16 = 0x0800;
    pub const D_DOWN: u16 = 0x0400;
    pub const D_LEFT: u16 = 0x0200;
    pub const D_RIGHT: u16 = 0x0100;
    pub const L: u16 = 0x0020;
    pub const R: u16 = 0x0010;
    pub const C_UP: u16 = 0x0008;
    pub const C_DOWN: u16 = 0x0004;
    pub const C_LEFT: u16 = 0x0002;
    pub const C_RIGHT: u16 = 0x0001;
}

/// Controller state for one frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Inputs {
    /// Pressed buttons, see [`buttons`].
    pub buttons: u16,
    /// Raw analog stick x.
    pub stick_x: i8,
    /// Raw analog stick y.
    pub stick_y: i8,
}

impl Inputs {
    /// Size of the controller pad written into simulation memory.
    pub const PAD_LEN: usize = 5;

    pub fn new(buttons: u16, stick_x: i8, stick_y: i8) -> Self {
        Self {
            buttons,
            stick_x,
            stick_y,
        }
    }

    /// Stick only, no buttons.
    pub fn stick(stick_x: i8, stick_y: i8) -> Self {
        Self::new(0, stick_x, stick_y)
    }

    /// Whether every button in `mask` is held.
    pub fn pressed(&self, mask: u16) -> bool {
        self.buttons & mask == mask
    }

    /// Copy with `mask` added to the held buttons.
    pub fn with_buttons(mut self, mask: u16) -> Self {
        self.buttons |= mask;
        self
    }

    /// Native pad layout: buttons (u16 LE), stick x, stick y, error byte.
    pub fn to_pad_bytes(self) -> [u8; Self::PAD_LEN] {
        let [lo, hi] = self.buttons.to_le_bytes();
        [lo, hi, self.stick_x as u8, self.stick_y as u8, 0]
    }
}
