//! Oscillator modules.

use std::any::Any;
use std::f32::consts::TAU;

use resona_engine::{BlockRate, ModuleCost, ModuleProcessor, ModuleSpec, ProcessIo};

/// Sine oscillator, one output, no inputs.
///
/// Frequency changes arrive through `access` jobs; phase is continuous
/// across them.
pub struct SineOsc {
    freq: f32,
    phase: f32,
    sample_rate: f32,
}

impl SineOsc {
    /// Creates an oscillator at `freq` Hz.
    pub fn new(freq: f32) -> Self {
        Self {
            freq,
            phase: 0.0,
            sample_rate: 0.0,
        }
    }

    /// Sets the frequency in Hz; takes effect at the next block.
    pub fn set_freq(&mut self, freq: f32) {
        self.freq = freq;
    }

    /// Wraps the oscillator in a module spec.
    pub fn spec(freq: f32) -> ModuleSpec {
        ModuleSpec::new(0, 0, 1, Box::new(Self::new(freq))).with_cost(ModuleCost::Expensive)
    }
}

impl ModuleProcessor for SineOsc {
    fn process(&mut self, io: &mut ProcessIo<'_>) {
        let step = self.freq / self.sample_rate;
        let mut phase = self.phase;
        for i in 0..io.frames() {
            io.output(0)[i] = libm::sinf(TAU * phase);
            phase += step;
            if phase >= 1.0 {
                phase -= 1.0;
            }
        }
        self.phase = phase;
    }

    fn reset(&mut self, rate: BlockRate) {
        self.sample_rate = rate.sample_rate;
        self.phase = 0.0;
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Naive sawtooth oscillator, one output, no inputs.
///
/// Not band-limited; intended for LFO duty and tests.
pub struct SawOsc {
    freq: f32,
    phase: f32,
    sample_rate: f32,
}

impl SawOsc {
    /// Creates an oscillator at `freq` Hz.
    pub fn new(freq: f32) -> Self {
        Self {
            freq,
            phase: 0.0,
            sample_rate: 0.0,
        }
    }

    /// Sets the frequency in Hz; takes effect at the next block.
    pub fn set_freq(&mut self, freq: f32) {
        self.freq = freq;
    }

    /// Wraps the oscillator in a module spec.
    pub fn spec(freq: f32) -> ModuleSpec {
        ModuleSpec::new(0, 0, 1, Box::new(Self::new(freq)))
    }
}

impl ModuleProcessor for SawOsc {
    fn process(&mut self, io: &mut ProcessIo<'_>) {
        let step = self.freq / self.sample_rate;
        let mut phase = self.phase;
        for i in 0..io.frames() {
            io.output(0)[i] = 2.0 * phase - 1.0;
            phase += step;
            if phase >= 1.0 {
                phase -= 1.0;
            }
        }
        self.phase = phase;
    }

    fn reset(&mut self, rate: BlockRate) {
        self.sample_rate = rate.sample_rate;
        self.phase = 0.0;
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use resona_engine::{EngineCore, OutputRef};

    const RATE: BlockRate = BlockRate {
        sample_rate: 48000.0,
        block_frames: 48,
    };

    fn render_one_block(spec: ModuleSpec) -> Vec<f32> {
        let (mut core, handle) = EngineCore::new();
        core.establish(RATE);
        let mut t = handle.begin();
        let osc = t.integrate(spec);
        handle.commit(t).unwrap();
        core.set_output_taps(vec![OutputRef {
            module: osc,
            ostream: 0,
        }]);
        let mut out = Vec::new();
        core.cycle(|blocks| out = blocks[0].to_vec()).unwrap();
        out
    }

    #[test]
    fn sine_completes_one_period_per_cycle_at_1khz() {
        // 1 kHz at 48 kHz: period of 48 samples, exactly one block here.
        let out = render_one_block(SineOsc::spec(1000.0));
        assert_eq!(out[0], 0.0);
        assert!((out[12] - 1.0).abs() < 1e-3, "quarter period peak");
        assert!(out[24].abs() < 1e-3, "half period zero");
        assert!((out[36] + 1.0).abs() < 1e-3, "three-quarter trough");
    }

    #[test]
    fn saw_ramps_and_wraps() {
        let out = render_one_block(SawOsc::spec(1000.0));
        assert_eq!(out[0], -1.0);
        assert!(out[1] > out[0]);
        assert!(out[47] > 0.9);
    }

    #[test]
    fn sine_stays_in_range() {
        let out = render_one_block(SineOsc::spec(440.0));
        assert!(out.iter().all(|s| s.abs() <= 1.0));
    }
}
