use std::collections::VecDeque;

use crate::error::{CoreError, Result};
use crate::sink::AudioSink;
use crate::snapshot::{ApuState, EnvelopeState, NoiseState, PulseState, SweepState, WaveState};

#[cfg(feature = "apu-trace")]
macro_rules! apu_trace {
    ($($arg:tt)*) => {
        log::trace!($($arg)*);
    };
}
#[cfg(not(feature = "apu-trace"))]
macro_rules! apu_trace {
    ($($arg:tt)*) => {};
}

const CPU_CLOCK_HZ: u32 = 4_194_304;
// 512 Hz frame sequencer tick
const FRAME_SEQUENCER_PERIOD: u32 = 8192;
pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;
pub const DEFAULT_MASTER_VOLUME: f32 = 0.5;
/// Pending output is capped at this much audio; the oldest frames go first.
pub const AUDIO_LATENCY_MS: u32 = 100;

// Register contents left behind by the boot ROM, 0xFF10..=0xFF3F.
const POWER_ON_REGS: [u8; 0x30] = [
    0x80, 0xBF, 0xF3, 0xFF, 0xBF, 0xFF, 0x3F, 0x00, 0xFF, 0xBF, 0x7F, 0xFF, 0x9F, 0xFF, 0xBF, 0xFF,
    0xFF, 0x00, 0x00, 0xBF, 0x77, 0xF3, 0xF1, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

// Duty table for pulse channels (CH1, CH2), indexed by NRx1 bits 6-7.
const DUTY_TABLE: [[u8; 8]; 4] = [
    [0, 0, 0, 0, 0, 0, 0, 1], // 12.5%
    [1, 0, 0, 0, 0, 0, 0, 1], // 25%
    [1, 0, 0, 0, 0, 1, 1, 1], // 50%
    [0, 1, 1, 1, 1, 1, 1, 0], // 75%
];

#[derive(Default, Clone, Copy)]
struct Envelope {
    initial: u8,
    add: bool,
    period: u8,
    volume: u8,
    timer: u8,
}

impl Envelope {
    fn write(&mut self, val: u8) {
        self.initial = val >> 4;
        self.add = val & 0x08 != 0;
        self.period = val & 0x07;
    }

    /// A zero starting volume with a decreasing direction leaves the DAC
    /// without any output.
    fn dac_enabled(&self) -> bool {
        self.initial != 0 || self.add
    }

    fn trigger(&mut self) {
        self.volume = self.initial;
        self.timer = self.period;
    }

    fn clock(&mut self) {
        if self.period == 0 {
            return;
        }
        self.timer = self.timer.saturating_sub(1);
        if self.timer == 0 {
            self.timer = self.period;
            if self.add && self.volume < 15 {
                self.volume += 1;
            } else if !self.add && self.volume > 0 {
                self.volume -= 1;
            }
        }
    }

    fn state(&self) -> EnvelopeState {
        EnvelopeState {
            initial: self.initial,
            add: self.add,
            period: self.period,
            volume: self.volume,
            timer: self.timer,
        }
    }

    fn from_state(state: &EnvelopeState) -> Self {
        Self {
            initial: state.initial & 0x0F,
            add: state.add,
            period: state.period & 0x07,
            volume: state.volume.min(15),
            timer: state.timer,
        }
    }
}

#[derive(Default, Clone, Copy)]
// Channel 1 frequency sweep.
struct Sweep {
    period: u8,
    negate: bool,
    shift: u8,
    timer: u8,
    shadow: u16,
    enabled: bool,
}

impl Sweep {
    fn write(&mut self, val: u8) {
        self.period = (val >> 4) & 0x07;
        self.negate = val & 0x08 != 0;
        self.shift = val & 0x07;
    }

    fn calculate(&self) -> u16 {
        let delta = self.shadow >> self.shift;
        if self.negate {
            self.shadow - delta
        } else {
            self.shadow + delta
        }
    }

    fn reload_timer(&mut self) {
        self.timer = if self.period == 0 { 8 } else { self.period };
    }
}

struct SquareChannel {
    enabled: bool,
    duty: u8,
    length_load: u8,
    length: u16,
    length_enabled: bool,
    envelope: Envelope,
    frequency: u16,
    timer: i32,
    duty_pos: u8,
    sweep: Option<Sweep>,
}

impl SquareChannel {
    fn new(with_sweep: bool) -> Self {
        Self {
            enabled: false,
            duty: 0,
            length_load: 0,
            length: 0,
            length_enabled: false,
            envelope: Envelope::default(),
            frequency: 0,
            timer: 0,
            duty_pos: 0,
            sweep: with_sweep.then(Sweep::default),
        }
    }

    fn period(&self) -> i32 {
        (2048 - self.frequency as i32) * 4
    }

    fn write_length_duty(&mut self, val: u8) {
        self.duty = val >> 6;
        self.length_load = val & 0x3F;
        self.length = 64 - self.length_load as u16;
    }

    fn write_envelope(&mut self, val: u8) {
        self.envelope.write(val);
        if val & 0xF8 == 0 {
            self.enabled = false;
        }
    }

    fn write_control(&mut self, val: u8) {
        self.frequency = (self.frequency & 0x00FF) | ((val as u16 & 0x07) << 8);
        self.length_enabled = val & 0x40 != 0;
        if val & 0x80 != 0 {
            self.trigger();
        }
    }

    fn trigger(&mut self) {
        self.enabled = true;
        if self.length == 0 {
            self.length = 64 - self.length_load as u16;
        }
        self.timer = self.period();
        self.envelope.trigger();

        let frequency = self.frequency;
        if let Some(sweep) = self.sweep.as_mut() {
            sweep.shadow = frequency;
            sweep.reload_timer();
            sweep.enabled = sweep.period > 0 || sweep.shift > 0;
            // The overflow check runs once immediately, without committing.
            if sweep.shift > 0 && sweep.calculate() > 2047 {
                self.enabled = false;
            }
        }

        if !self.envelope.dac_enabled() {
            self.enabled = false;
        }
    }

    fn step(&mut self, cycles: u32) {
        if self.timer <= 0 {
            return;
        }
        self.timer -= cycles as i32;
        while self.timer <= 0 {
            self.duty_pos = (self.duty_pos + 1) & 7;
            self.timer += self.period();
        }
    }

    fn clock_length(&mut self) {
        if self.length_enabled && self.length > 0 {
            self.length -= 1;
            if self.length == 0 {
                self.enabled = false;
            }
        }
    }

    fn clock_sweep(&mut self) {
        let Some(sweep) = self.sweep.as_mut() else {
            return;
        };
        if !sweep.enabled {
            return;
        }
        sweep.timer = sweep.timer.saturating_sub(1);
        if sweep.timer > 0 {
            return;
        }
        sweep.reload_timer();
        if sweep.period == 0 {
            return;
        }

        let next = sweep.calculate();
        if next > 2047 {
            self.enabled = false;
        } else if sweep.shift > 0 {
            sweep.shadow = next;
            self.frequency = next;
            if sweep.calculate() > 2047 {
                self.enabled = false;
            }
        }
    }

    fn output(&self) -> u8 {
        if !self.enabled || !self.envelope.dac_enabled() {
            return 0;
        }
        DUTY_TABLE[self.duty as usize][self.duty_pos as usize] * self.envelope.volume
    }

    fn state(&self) -> PulseState {
        PulseState {
            enabled: self.enabled,
            duty: self.duty,
            length_load: self.length_load,
            length: self.length,
            length_enabled: self.length_enabled,
            envelope: self.envelope.state(),
            frequency: self.frequency,
            timer: self.timer,
            duty_pos: self.duty_pos,
            sweep: self.sweep.map(|s| SweepState {
                period: s.period,
                negate: s.negate,
                shift: s.shift,
                timer: s.timer,
                shadow: s.shadow,
                enabled: s.enabled,
            }),
        }
    }

    fn validate(&self, state: &PulseState) -> Result<()> {
        if state.sweep.is_some() != self.sweep.is_some() {
            return Err(CoreError::SnapshotMismatch("pulse channel sweep unit"));
        }
        Ok(())
    }

    fn restore(&mut self, state: &PulseState) {
        self.enabled = state.enabled;
        self.duty = state.duty & 0x03;
        self.length_load = state.length_load & 0x3F;
        self.length = state.length.min(64);
        self.length_enabled = state.length_enabled;
        self.envelope = Envelope::from_state(&state.envelope);
        self.frequency = state.frequency & 0x07FF;
        self.timer = state.timer;
        self.duty_pos = state.duty_pos & 0x07;
        self.sweep = state.sweep.as_ref().map(|s| Sweep {
            period: s.period & 0x07,
            negate: s.negate,
            shift: s.shift & 0x07,
            timer: s.timer,
            shadow: s.shadow & 0x07FF,
            enabled: s.enabled,
        });
    }
}

#[derive(Default)]
struct WaveChannel {
    enabled: bool,
    dac_enabled: bool,
    length_load: u8,
    length: u16,
    length_enabled: bool,
    volume_code: u8,
    frequency: u16,
    timer: i32,
    position: u8,
}

impl WaveChannel {
    fn period(&self) -> i32 {
        (2048 - self.frequency as i32) * 2
    }

    fn trigger(&mut self) {
        if !self.dac_enabled {
            return;
        }
        self.enabled = true;
        if self.length == 0 {
            self.length = 256;
        }
        self.timer = self.period();
        self.position = 0;
    }

    fn step(&mut self, cycles: u32) {
        if self.timer <= 0 {
            return;
        }
        self.timer -= cycles as i32;
        while self.timer <= 0 {
            self.position = (self.position + 1) & 31;
            self.timer += self.period();
        }
    }

    fn clock_length(&mut self) {
        if self.length_enabled && self.length > 0 {
            self.length -= 1;
            if self.length == 0 {
                self.enabled = false;
            }
        }
    }

    fn output(&self, wave_ram: &[u8; 0x10]) -> u8 {
        if !self.enabled || !self.dac_enabled || self.volume_code == 0 {
            return 0;
        }
        let byte = wave_ram[(self.position / 2) as usize];
        // Upper nibble plays first.
        let sample = if self.position & 1 == 0 {
            byte >> 4
        } else {
            byte & 0x0F
        };
        sample >> (self.volume_code - 1)
    }

    fn state(&self) -> WaveState {
        WaveState {
            enabled: self.enabled,
            dac_enabled: self.dac_enabled,
            length_load: self.length_load,
            length: self.length,
            length_enabled: self.length_enabled,
            volume_code: self.volume_code,
            frequency: self.frequency,
            timer: self.timer,
            position: self.position,
        }
    }

    fn restore(&mut self, state: &WaveState) {
        self.enabled = state.enabled;
        self.dac_enabled = state.dac_enabled;
        self.length_load = state.length_load;
        self.length = state.length.min(256);
        self.length_enabled = state.length_enabled;
        self.volume_code = state.volume_code & 0x03;
        self.frequency = state.frequency & 0x07FF;
        self.timer = state.timer;
        self.position = state.position & 31;
    }
}

struct NoiseChannel {
    enabled: bool,
    length_load: u8,
    length: u16,
    length_enabled: bool,
    envelope: Envelope,
    clock_shift: u8,
    width7: bool,
    divisor_code: u8,
    timer: i32,
    lfsr: u16,
}

impl Default for NoiseChannel {
    fn default() -> Self {
        Self {
            enabled: false,
            length_load: 0,
            length: 0,
            length_enabled: false,
            envelope: Envelope::default(),
            clock_shift: 0,
            width7: false,
            divisor_code: 0,
            timer: 0,
            lfsr: 0x7FFF,
        }
    }
}

impl NoiseChannel {
    fn period(&self) -> i32 {
        let divisor = if self.divisor_code == 0 {
            8
        } else {
            (self.divisor_code as i32) << 4
        };
        divisor << self.clock_shift
    }

    fn write_envelope(&mut self, val: u8) {
        self.envelope.write(val);
        if val & 0xF8 == 0 {
            self.enabled = false;
        }
    }

    fn trigger(&mut self) {
        self.enabled = true;
        if self.length == 0 {
            self.length = 64 - self.length_load as u16;
        }
        self.envelope.trigger();
        self.lfsr = 0x7FFF;
        self.timer = self.period();
        if !self.envelope.dac_enabled() {
            self.enabled = false;
        }
    }

    fn clock_lfsr(&mut self) {
        let bit = (self.lfsr & 1) ^ ((self.lfsr >> 1) & 1);
        self.lfsr = (self.lfsr >> 1) | (bit << 14);
        if self.width7 {
            self.lfsr = (self.lfsr & !(1 << 6)) | (bit << 6);
        }
    }

    fn step(&mut self, cycles: u32) {
        if !self.enabled {
            return;
        }
        self.timer -= cycles as i32;
        while self.timer <= 0 {
            self.timer += self.period();
            self.clock_lfsr();
        }
    }

    fn clock_length(&mut self) {
        if self.length_enabled && self.length > 0 {
            self.length -= 1;
            if self.length == 0 {
                self.enabled = false;
            }
        }
    }

    fn output(&self) -> u8 {
        if !self.enabled || !self.envelope.dac_enabled() || self.lfsr & 1 != 0 {
            return 0;
        }
        self.envelope.volume
    }

    fn state(&self) -> NoiseState {
        NoiseState {
            enabled: self.enabled,
            length_load: self.length_load,
            length: self.length,
            length_enabled: self.length_enabled,
            envelope: self.envelope.state(),
            clock_shift: self.clock_shift,
            width7: self.width7,
            divisor_code: self.divisor_code,
            timer: self.timer,
            lfsr: self.lfsr,
        }
    }

    fn restore(&mut self, state: &NoiseState) {
        self.enabled = state.enabled;
        self.length_load = state.length_load & 0x3F;
        self.length = state.length.min(64);
        self.length_enabled = state.length_enabled;
        self.envelope = Envelope::from_state(&state.envelope);
        self.clock_shift = state.clock_shift & 0x0F;
        self.width7 = state.width7;
        self.divisor_code = state.divisor_code & 0x07;
        self.timer = state.timer;
        self.lfsr = state.lfsr & 0x7FFF;
    }
}

struct FrameSequencer {
    step: u8,
}

impl FrameSequencer {
    fn new() -> Self {
        Self { step: 0 }
    }

    fn advance(&mut self) -> u8 {
        let s = self.step;
        self.step = (self.step + 1) & 7;
        s
    }
}

pub struct Apu {
    ch1: SquareChannel,
    ch2: SquareChannel,
    ch3: WaveChannel,
    ch4: NoiseChannel,
    wave_ram: [u8; 0x10],
    /// Last value written to each register, for readback through `read_mask`.
    regs: [u8; 0x30],
    nr50: u8,
    nr51: u8,
    powered: bool,
    sequencer: FrameSequencer,
    sequencer_clock: u32,
    sample_rate: u32,
    sample_clock: f64,
    master_volume: f32,
    samples: VecDeque<[f32; 2]>,
}

impl Apu {
    pub fn new() -> Self {
        let mut apu = Self {
            ch1: SquareChannel::new(true),
            ch2: SquareChannel::new(false),
            ch3: WaveChannel::default(),
            ch4: NoiseChannel::default(),
            wave_ram: [0; 0x10],
            regs: [0; 0x30],
            nr50: 0,
            nr51: 0,
            powered: true,
            sequencer: FrameSequencer::new(),
            sequencer_clock: 0,
            sample_rate: DEFAULT_SAMPLE_RATE,
            sample_clock: 0.0,
            master_volume: DEFAULT_MASTER_VOLUME,
            samples: VecDeque::new(),
        };
        for (i, &val) in POWER_ON_REGS.iter().enumerate().take(0x16) {
            let addr = 0xFF10 + i as u16;
            // Post-boot values are loaded without retriggering the channels.
            let val = if matches!(addr, 0xFF14 | 0xFF19 | 0xFF1E | 0xFF23) {
                val & 0x7F
            } else {
                val
            };
            apu.write_reg(addr, val);
        }
        apu
    }

    pub fn set_sample_rate(&mut self, rate: u32) {
        self.sample_rate = rate.max(1);
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn set_master_volume(&mut self, volume: f32) {
        self.master_volume = volume.clamp(0.0, 1.0);
    }

    pub fn master_volume(&self) -> f32 {
        self.master_volume
    }

    pub fn powered(&self) -> bool {
        self.powered
    }

    pub fn sequencer_step(&self) -> u8 {
        self.sequencer.step
    }

    /// Enabled flags for channels 1-4, as reported in NR52 bits 0-3.
    pub fn channel_status(&self) -> [bool; 4] {
        [
            self.ch1.enabled,
            self.ch2.enabled,
            self.ch3.enabled,
            self.ch4.enabled,
        ]
    }

    fn read_mask(addr: u16) -> u8 {
        match addr {
            0xFF10 => 0x80,
            0xFF11 => 0x3F,
            0xFF12 => 0x00,
            0xFF13 => 0xFF,
            0xFF14 => 0xBF,
            0xFF16 => 0x3F,
            0xFF17 => 0x00,
            0xFF18 => 0xFF,
            0xFF19 => 0xBF,
            0xFF1A => 0x7F,
            0xFF1B => 0xFF,
            0xFF1C => 0x9F,
            0xFF1D => 0xFF,
            0xFF1E => 0xBF,
            0xFF20 => 0xFF,
            0xFF21 => 0x00,
            0xFF22 => 0x00,
            0xFF23 => 0xBF,
            0xFF24 => 0x00,
            0xFF25 => 0x00,
            0xFF26 => 0x70,
            0xFF30..=0xFF3F => 0x00,
            _ => 0xFF,
        }
    }

    pub fn read_reg(&self, addr: u16) -> u8 {
        match addr {
            0xFF26 => {
                let mut val = if self.powered { 0x80 } else { 0 };
                for (i, on) in self.channel_status().iter().enumerate() {
                    if *on {
                        val |= 1 << i;
                    }
                }
                val | Apu::read_mask(addr)
            }
            0xFF30..=0xFF3F => self.wave_ram[(addr - 0xFF30) as usize],
            0xFF10..=0xFF2F => self.regs[(addr - 0xFF10) as usize] | Apu::read_mask(addr),
            _ => 0xFF,
        }
    }

    pub fn write_reg(&mut self, addr: u16, val: u8) {
        if (0xFF30..=0xFF3F).contains(&addr) {
            self.wave_ram[(addr - 0xFF30) as usize] = val;
            return;
        }
        if addr == 0xFF26 {
            self.write_power(val);
            return;
        }
        if !self.powered || !(0xFF10..=0xFF2F).contains(&addr) {
            return;
        }

        self.regs[(addr - 0xFF10) as usize] = val;

        match addr {
            0xFF10 => {
                if let Some(sweep) = self.ch1.sweep.as_mut() {
                    sweep.write(val);
                }
            }
            0xFF11 => self.ch1.write_length_duty(val),
            0xFF12 => self.ch1.write_envelope(val),
            0xFF13 => self.ch1.frequency = (self.ch1.frequency & 0x0700) | val as u16,
            0xFF14 => {
                self.ch1.write_control(val);
                if val & 0x80 != 0 {
                    apu_trace!("CH1 trigger freq={} enabled={}", self.ch1.frequency, self.ch1.enabled);
                }
            }
            0xFF16 => self.ch2.write_length_duty(val),
            0xFF17 => self.ch2.write_envelope(val),
            0xFF18 => self.ch2.frequency = (self.ch2.frequency & 0x0700) | val as u16,
            0xFF19 => {
                self.ch2.write_control(val);
                if val & 0x80 != 0 {
                    apu_trace!("CH2 trigger freq={} enabled={}", self.ch2.frequency, self.ch2.enabled);
                }
            }
            0xFF1A => {
                self.ch3.dac_enabled = val & 0x80 != 0;
                if !self.ch3.dac_enabled {
                    self.ch3.enabled = false;
                }
            }
            0xFF1B => {
                self.ch3.length_load = val;
                self.ch3.length = 256 - val as u16;
            }
            0xFF1C => self.ch3.volume_code = (val >> 5) & 0x03,
            0xFF1D => self.ch3.frequency = (self.ch3.frequency & 0x0700) | val as u16,
            0xFF1E => {
                self.ch3.frequency = (self.ch3.frequency & 0x00FF) | ((val as u16 & 0x07) << 8);
                self.ch3.length_enabled = val & 0x40 != 0;
                if val & 0x80 != 0 {
                    self.ch3.trigger();
                    apu_trace!("CH3 trigger enabled={}", self.ch3.enabled);
                }
            }
            0xFF20 => {
                self.ch4.length_load = val & 0x3F;
                self.ch4.length = 64 - self.ch4.length_load as u16;
            }
            0xFF21 => self.ch4.write_envelope(val),
            0xFF22 => {
                self.ch4.clock_shift = val >> 4;
                self.ch4.width7 = val & 0x08 != 0;
                self.ch4.divisor_code = val & 0x07;
            }
            0xFF23 => {
                self.ch4.length_enabled = val & 0x40 != 0;
                if val & 0x80 != 0 {
                    self.ch4.trigger();
                    apu_trace!("CH4 trigger enabled={}", self.ch4.enabled);
                }
            }
            0xFF24 => self.nr50 = val,
            0xFF25 => self.nr51 = val,
            _ => {}
        }
    }

    fn write_power(&mut self, val: u8) {
        let on = val & 0x80 != 0;
        if on == self.powered {
            return;
        }
        if on {
            log::debug!("APU powered on");
            self.powered = true;
            self.sequencer = FrameSequencer::new();
            self.sequencer_clock = 0;
            self.reset_channels();
        } else {
            log::debug!("APU powered off");
            self.reset_channels();
            self.regs[..0x16].fill(0);
            self.nr50 = 0;
            self.nr51 = 0;
            self.powered = false;
        }
    }

    fn reset_channels(&mut self) {
        self.ch1 = SquareChannel::new(true);
        self.ch2 = SquareChannel::new(false);
        self.ch3 = WaveChannel::default();
        self.ch4 = NoiseChannel::default();
    }

    fn clock_frame_sequencer(&mut self, step: u8) {
        if step % 2 == 0 {
            self.ch1.clock_length();
            self.ch2.clock_length();
            self.ch3.clock_length();
            self.ch4.clock_length();
        }
        if step == 2 || step == 6 {
            self.ch1.clock_sweep();
        }
        if step == 7 {
            self.ch1.envelope.clock();
            self.ch2.envelope.clock();
            self.ch4.envelope.clock();
        }
    }

    /// Advance every channel by `cycles` CPU cycles and emit output frames at
    /// the configured sample rate. Samples keep flowing (as silence) while the
    /// unit is powered off.
    pub fn step(&mut self, cycles: u32) {
        let cycles_per_sample = CPU_CLOCK_HZ as f64 / self.sample_rate as f64;
        let mut remaining = cycles;
        // Channels never run past the next sample point, so one long step
        // mixes the same frames as many short ones.
        while remaining > 0 {
            let until_sample = (cycles_per_sample - self.sample_clock).ceil().max(1.0) as u32;
            let chunk = remaining.min(until_sample);
            self.advance_channels(chunk);
            remaining -= chunk;
            self.sample_clock += chunk as f64;
            if self.sample_clock >= cycles_per_sample {
                self.sample_clock -= cycles_per_sample;
                let frame = self.mix_output();
                self.push_sample(frame);
            }
        }
    }

    fn advance_channels(&mut self, cycles: u32) {
        if !self.powered {
            return;
        }
        self.sequencer_clock += cycles;
        while self.sequencer_clock >= FRAME_SEQUENCER_PERIOD {
            self.sequencer_clock -= FRAME_SEQUENCER_PERIOD;
            let step = self.sequencer.advance();
            self.clock_frame_sequencer(step);
        }
        self.ch1.step(cycles);
        self.ch2.step(cycles);
        self.ch3.step(cycles);
        self.ch4.step(cycles);
    }

    fn mix_output(&self) -> [f32; 2] {
        let outputs = [
            self.ch1.output(),
            self.ch2.output(),
            self.ch3.output(&self.wave_ram),
            self.ch4.output(),
        ];

        let mut left = 0.0f32;
        let mut right = 0.0f32;
        for (i, out) in outputs.iter().enumerate() {
            let level = *out as f32 / 15.0;
            if self.nr51 & (0x01 << i) != 0 {
                right += level;
            }
            if self.nr51 & (0x10 << i) != 0 {
                left += level;
            }
        }

        let left_vol = ((self.nr50 >> 4) & 0x07) as f32 / 7.0;
        let right_vol = (self.nr50 & 0x07) as f32 / 7.0;
        [
            left / 4.0 * left_vol * self.master_volume,
            right / 4.0 * right_vol * self.master_volume,
        ]
    }

    fn max_pending(&self) -> usize {
        (self.sample_rate as usize * AUDIO_LATENCY_MS as usize / 1000).max(1)
    }

    fn push_sample(&mut self, frame: [f32; 2]) {
        if self.samples.len() >= self.max_pending() {
            self.samples.pop_front();
        }
        self.samples.push_back(frame);
    }

    pub fn pending_samples(&self) -> usize {
        self.samples.len()
    }

    /// Hand all pending frames to `sink`. Frames the sink refuses are dropped.
    pub fn drain_samples(&mut self, sink: &mut dyn AudioSink) -> usize {
        let (front, back) = self.samples.as_slices();
        let mut accepted = sink.push_samples(front);
        if !back.is_empty() {
            accepted += sink.push_samples(back);
        }
        self.samples.clear();
        accepted
    }

    pub fn snapshot(&self) -> ApuState {
        ApuState {
            ch1: self.ch1.state(),
            ch2: self.ch2.state(),
            ch3: self.ch3.state(),
            ch4: self.ch4.state(),
            wave_ram: self.wave_ram,
            regs: self.regs.to_vec(),
            nr50: self.nr50,
            nr51: self.nr51,
            powered: self.powered,
            sequencer_step: self.sequencer.step,
            sequencer_clock: self.sequencer_clock,
            sample_clock: self.sample_clock,
        }
    }

    /// Check that `state` fits this unit without changing anything.
    pub fn validate(&self, state: &ApuState) -> Result<()> {
        if state.regs.len() != self.regs.len() {
            return Err(CoreError::SnapshotMismatch("sound register file size"));
        }
        self.ch1.validate(&state.ch1)?;
        self.ch2.validate(&state.ch2)
    }

    pub fn restore(&mut self, state: &ApuState) -> Result<()> {
        self.validate(state)?;
        self.ch1.restore(&state.ch1);
        self.ch2.restore(&state.ch2);
        self.ch3.restore(&state.ch3);
        self.ch4.restore(&state.ch4);
        self.wave_ram = state.wave_ram;
        self.regs.copy_from_slice(&state.regs);
        self.nr50 = state.nr50;
        self.nr51 = state.nr51;
        self.powered = state.powered;
        self.sequencer.step = state.sequencer_step & 7;
        self.sequencer_clock = state.sequencer_clock % FRAME_SEQUENCER_PERIOD;
        self.sample_clock = state.sample_clock;
        self.samples.clear();
        Ok(())
    }
}

impl Default for Apu {
    fn default() -> Self {
        Self::new()
    }
}
