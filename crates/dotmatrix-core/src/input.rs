use std::fmt;
use std::str::FromStr;

use crate::snapshot::JoypadState;

/// Joypad interrupt request bit in IF.
const JOYPAD_IRQ: u8 = 0x10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Button {
    A,
    B,
    Select,
    Start,
    Right,
    Left,
    Up,
    Down,
}

impl Button {
    /// Bit in the `pressed` byte. The low nibble holds the action group and
    /// the high nibble the direction group, each in P1 line order.
    fn mask(self) -> u8 {
        match self {
            Button::A => 0x01,
            Button::B => 0x02,
            Button::Select => 0x04,
            Button::Start => 0x08,
            Button::Right => 0x10,
            Button::Left => 0x20,
            Button::Up => 0x40,
            Button::Down => 0x80,
        }
    }

    fn is_direction(self) -> bool {
        self.mask() & 0xF0 != 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseButtonError(String);

impl fmt::Display for ParseButtonError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown button '{}'", self.0)
    }
}

impl std::error::Error for ParseButtonError {}

impl FromStr for Button {
    type Err = ParseButtonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "a" => Ok(Button::A),
            "b" => Ok(Button::B),
            "select" => Ok(Button::Select),
            "start" => Ok(Button::Start),
            "right" => Ok(Button::Right),
            "left" => Ok(Button::Left),
            "up" => Ok(Button::Up),
            "down" => Ok(Button::Down),
            _ => Err(ParseButtonError(s.to_string())),
        }
    }
}

/// P1/JOYP register. Button state is injected by the host; the register value
/// is computed on every read from the selected group.
pub struct Joypad {
    select: u8,
    pressed: u8,
}

impl Joypad {
    pub fn new() -> Self {
        Self {
            select: 0x30,
            pressed: 0,
        }
    }

    pub fn read(&self) -> u8 {
        if self.select & 0x20 == 0 {
            0xCF & !(self.pressed & 0x0F)
        } else if self.select & 0x10 == 0 {
            0xCF & !(self.pressed >> 4)
        } else {
            0xFF
        }
    }

    pub fn write(&mut self, val: u8) {
        self.select = val & 0x30;
    }

    pub fn is_pressed(&self, button: Button) -> bool {
        self.pressed & button.mask() != 0
    }

    fn group_selected(&self, button: Button) -> bool {
        if button.is_direction() {
            self.select & 0x10 == 0
        } else {
            self.select & 0x20 == 0
        }
    }

    /// Update one button. A new press on a selected line requests the joypad
    /// interrupt.
    pub fn set_button(&mut self, button: Button, pressed: bool, if_reg: &mut u8) {
        let was = self.is_pressed(button);
        if pressed {
            self.pressed |= button.mask();
        } else {
            self.pressed &= !button.mask();
        }
        if pressed && !was && self.group_selected(button) {
            *if_reg |= JOYPAD_IRQ;
        }
    }

    /// Replace the whole button set at once.
    pub fn set_state(&mut self, state: &JoypadState, if_reg: &mut u8) {
        let buttons = [
            (Button::A, state.a),
            (Button::B, state.b),
            (Button::Select, state.select),
            (Button::Start, state.start),
            (Button::Right, state.right),
            (Button::Left, state.left),
            (Button::Up, state.up),
            (Button::Down, state.down),
        ];
        for (button, pressed) in buttons {
            self.set_button(button, pressed, if_reg);
        }
    }

    pub fn snapshot(&self) -> JoypadState {
        JoypadState {
            select_bits: self.select,
            a: self.is_pressed(Button::A),
            b: self.is_pressed(Button::B),
            select: self.is_pressed(Button::Select),
            start: self.is_pressed(Button::Start),
            right: self.is_pressed(Button::Right),
            left: self.is_pressed(Button::Left),
            up: self.is_pressed(Button::Up),
            down: self.is_pressed(Button::Down),
        }
    }

    pub fn restore(&mut self, state: &JoypadState) {
        self.select = state.select_bits & 0x30;
        self.pressed = 0;
        let mut ignored = 0;
        self.set_state(state, &mut ignored);
    }
}

impl Default for Joypad {
    fn default() -> Self {
        Self::new()
    }
}
