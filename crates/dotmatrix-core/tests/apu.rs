use dotmatrix_core::apu::{AUDIO_LATENCY_MS, Apu, DEFAULT_SAMPLE_RATE};

const CPU_HZ: u32 = 4_194_304;

fn audible_square(apu: &mut Apu) {
    apu.write_reg(0xFF24, 0x77);
    apu.write_reg(0xFF25, 0x22); // ch2 left + right
    apu.write_reg(0xFF16, 0x80); // 50% duty
    apu.write_reg(0xFF17, 0xF0);
    apu.write_reg(0xFF18, 0x00);
    apu.write_reg(0xFF19, 0x87); // trigger, 512 Hz
}

#[test]
fn post_boot_status() {
    let apu = Apu::new();
    assert!(apu.powered());
    assert_eq!(apu.read_reg(0xFF26), 0xF0);
    assert_eq!(apu.read_reg(0xFF24), 0x77);
    assert_eq!(apu.read_reg(0xFF25), 0xF3);
    assert_eq!(apu.channel_status(), [false; 4]);
}

#[test]
fn unreadable_bits_read_as_one() {
    let masks: [(u16, u8); 22] = [
        (0xFF10, 0x80),
        (0xFF11, 0x3F),
        (0xFF12, 0x00),
        (0xFF13, 0xFF),
        (0xFF14, 0xBF),
        (0xFF15, 0xFF),
        (0xFF16, 0x3F),
        (0xFF17, 0x00),
        (0xFF18, 0xFF),
        (0xFF19, 0xBF),
        (0xFF1A, 0x7F),
        (0xFF1B, 0xFF),
        (0xFF1C, 0x9F),
        (0xFF1D, 0xFF),
        (0xFF1E, 0xBF),
        (0xFF1F, 0xFF),
        (0xFF20, 0xFF),
        (0xFF21, 0x00),
        (0xFF22, 0x00),
        (0xFF23, 0xBF),
        (0xFF24, 0x00),
        (0xFF25, 0x00),
    ];
    let mut apu = Apu::new();
    for (addr, mask) in masks {
        apu.write_reg(addr, 0x00);
        assert_eq!(apu.read_reg(addr), mask, "{addr:#06X}");
    }
    for addr in 0xFF27..=0xFF2F {
        assert_eq!(apu.read_reg(addr), 0xFF, "{addr:#06X}");
    }
}

#[test]
fn sweep_overflow_on_trigger_disables_channel() {
    let mut apu = Apu::new();
    apu.write_reg(0xFF12, 0xF0);
    apu.write_reg(0xFF10, 0x01); // period 0, add, shift 1
    apu.write_reg(0xFF13, 0xFF);
    apu.write_reg(0xFF14, 0x87); // frequency 2047 + 1023 overflows
    assert!(!apu.channel_status()[0]);
    assert_eq!(apu.read_reg(0xFF26) & 0x01, 0);

    apu.write_reg(0xFF13, 0x00);
    apu.write_reg(0xFF14, 0x84); // 1024 + 512 stays in range
    assert!(apu.channel_status()[0]);
    assert_eq!(apu.read_reg(0xFF26) & 0x01, 0x01);
}

#[test]
fn dac_off_blocks_trigger() {
    let mut apu = Apu::new();
    apu.write_reg(0xFF17, 0x00);
    apu.write_reg(0xFF19, 0x80);
    assert!(!apu.channel_status()[1]);

    // Volume 0 but increasing still counts as an active DAC.
    apu.write_reg(0xFF17, 0x08);
    apu.write_reg(0xFF19, 0x80);
    assert!(apu.channel_status()[1]);

    apu.write_reg(0xFF17, 0x00);
    assert!(!apu.channel_status()[1], "DAC off silences a running channel");
}

#[test]
fn noise_channel_respects_dac() {
    let mut apu = Apu::new();
    apu.write_reg(0xFF21, 0x00);
    apu.write_reg(0xFF23, 0x80);
    assert!(!apu.channel_status()[3]);
    apu.write_reg(0xFF21, 0xF0);
    apu.write_reg(0xFF23, 0x80);
    assert!(apu.channel_status()[3]);
}

#[test]
fn length_counter_expires_on_even_sequencer_step() {
    let mut apu = Apu::new();
    apu.write_reg(0xFF16, 0x3F); // length 1
    apu.write_reg(0xFF17, 0xF0);
    apu.write_reg(0xFF19, 0xC0); // trigger with length enabled
    assert!(apu.channel_status()[1]);
    apu.step(8191);
    assert!(apu.channel_status()[1]);
    apu.step(1);
    assert!(!apu.channel_status()[1]);
}

#[test]
fn frame_sequencer_wraps_through_eight_steps() {
    let mut apu = Apu::new();
    assert_eq!(apu.sequencer_step(), 0);
    apu.step(8192 * 3);
    assert_eq!(apu.sequencer_step(), 3);
    apu.step(8192 * 5);
    assert_eq!(apu.sequencer_step(), 0);
}

#[test]
fn power_off_clears_registers_and_ignores_writes() {
    let mut apu = Apu::new();
    audible_square(&mut apu);
    apu.write_reg(0xFF26, 0x00);
    assert!(!apu.powered());
    assert_eq!(apu.read_reg(0xFF26), 0x70);
    assert_eq!(apu.read_reg(0xFF24), 0x00);
    apu.write_reg(0xFF24, 0x77);
    assert_eq!(apu.read_reg(0xFF24), 0x00);
    // Wave RAM stays reachable.
    apu.write_reg(0xFF30, 0x12);
    assert_eq!(apu.read_reg(0xFF30), 0x12);

    apu.write_reg(0xFF26, 0x80);
    assert_eq!(apu.read_reg(0xFF26), 0xF0);
}

#[test]
fn samples_follow_output_rate() {
    let mut apu = Apu::new();
    assert_eq!(apu.sample_rate(), DEFAULT_SAMPLE_RATE);
    apu.step(CPU_HZ / 100);
    let pending = apu.pending_samples();
    assert!((440..=441).contains(&pending), "{pending}");
}

#[test]
fn pending_samples_are_capped() {
    let mut apu = Apu::new();
    apu.step(CPU_HZ);
    let cap = (DEFAULT_SAMPLE_RATE * AUDIO_LATENCY_MS / 1000) as usize;
    assert_eq!(apu.pending_samples(), cap);
}

#[test]
fn silence_when_nothing_plays() {
    let mut apu = Apu::new();
    apu.step(CPU_HZ / 60);
    let mut out: Vec<[f32; 2]> = Vec::new();
    let taken = apu.drain_samples(&mut out);
    assert_eq!(taken, out.len());
    assert!(!out.is_empty());
    assert!(out.iter().all(|s| *s == [0.0, 0.0]));
    assert_eq!(apu.pending_samples(), 0);
}

#[test]
fn square_wave_reaches_both_ears() {
    let mut apu = Apu::new();
    audible_square(&mut apu);
    apu.step(CPU_HZ / 60);
    let mut out: Vec<[f32; 2]> = Vec::new();
    apu.drain_samples(&mut out);
    assert!(out.iter().any(|s| s[0] > 0.0 && s[1] > 0.0));
    assert!(out.iter().any(|s| s[0] == 0.0));
    assert!(out.iter().all(|s| s[0] <= 1.0 && s[1] <= 1.0));
}

#[test]
fn master_volume_scales_and_clamps() {
    let mut loud = Apu::new();
    let mut quiet = Apu::new();
    loud.set_master_volume(2.0);
    assert_eq!(loud.master_volume(), 1.0);
    quiet.set_master_volume(0.25);
    audible_square(&mut loud);
    audible_square(&mut quiet);
    loud.step(4096);
    quiet.step(4096);
    let peak = |apu: &mut Apu| {
        let mut out: Vec<[f32; 2]> = Vec::new();
        apu.drain_samples(&mut out);
        out.iter().map(|s| s[0]).fold(0.0f32, f32::max)
    };
    let (l, q) = (peak(&mut loud), peak(&mut quiet));
    assert!(l > 0.0);
    assert!((q * 4.0 - l).abs() < 1e-6);
}

#[test]
fn snapshot_round_trip() {
    let mut apu = Apu::new();
    audible_square(&mut apu);
    apu.write_reg(0xFF21, 0xA3);
    apu.write_reg(0xFF22, 0x5B);
    apu.write_reg(0xFF23, 0x80);
    apu.write_reg(0xFF31, 0xC3);
    apu.step(12_345);
    let state = apu.snapshot();

    let mut restored = Apu::new();
    restored.restore(&state).unwrap();
    assert_eq!(restored.snapshot(), state);
    assert_eq!(restored.channel_status(), apu.channel_status());
    assert_eq!(restored.read_reg(0xFF26), apu.read_reg(0xFF26));
}
