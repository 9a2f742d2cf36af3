//! ADSR amplitude envelope.

use std::any::Any;

use resona_engine::{BlockRate, ModuleCost, ModuleProcessor, ModuleSpec, ProcessIo};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Stage {
    Idle,
    Attack,
    Decay,
    Sustain,
    Release,
}

/// ADSR envelope applied to its input stream; one input, one output.
///
/// The gate is flipped from the control domain via `access` jobs; stage
/// transitions happen sample-accurately inside the block.
pub struct Adsr {
    /// Attack time in seconds.
    pub attack: f32,
    /// Decay time in seconds.
    pub decay: f32,
    /// Sustain level, 0 to 1.
    pub sustain: f32,
    /// Release time in seconds.
    pub release: f32,
    stage: Stage,
    level: f32,
    sample_rate: f32,
}

impl Adsr {
    /// Creates an envelope with the given stage parameters.
    pub fn new(attack: f32, decay: f32, sustain: f32, release: f32) -> Self {
        Self {
            attack,
            decay,
            sustain: sustain.clamp(0.0, 1.0),
            release,
            stage: Stage::Idle,
            level: 0.0,
            sample_rate: 0.0,
        }
    }

    /// Wraps the envelope in a module spec.
    pub fn spec(attack: f32, decay: f32, sustain: f32, release: f32) -> ModuleSpec {
        ModuleSpec::new(1, 0, 1, Box::new(Self::new(attack, decay, sustain, release)))
            .with_cost(ModuleCost::Cheap)
    }

    /// Opens the gate: restarts the attack from the current level.
    pub fn gate_on(&mut self) {
        self.stage = Stage::Attack;
    }

    /// Closes the gate: enters the release stage.
    pub fn gate_off(&mut self) {
        if self.stage != Stage::Idle {
            self.stage = Stage::Release;
        }
    }

    /// True once the release finished and the output is silent.
    pub fn is_idle(&self) -> bool {
        self.stage == Stage::Idle
    }

    /// Per-sample level slope for a stage lasting `seconds`.
    fn slope(&self, seconds: f32, span: f32) -> f32 {
        if seconds <= 0.0 {
            span
        } else {
            span / (seconds * self.sample_rate)
        }
    }

    fn next_level(&mut self) -> f32 {
        match self.stage {
            Stage::Idle => {}
            Stage::Attack => {
                self.level += self.slope(self.attack, 1.0);
                if self.level >= 1.0 {
                    self.level = 1.0;
                    self.stage = Stage::Decay;
                }
            }
            Stage::Decay => {
                self.level -= self.slope(self.decay, 1.0 - self.sustain);
                if self.level <= self.sustain {
                    self.level = self.sustain;
                    self.stage = Stage::Sustain;
                }
            }
            Stage::Sustain => self.level = self.sustain,
            Stage::Release => {
                self.level -= self.slope(self.release, 1.0);
                if self.level <= 0.0 {
                    self.level = 0.0;
                    self.stage = Stage::Idle;
                }
            }
        }
        self.level
    }
}

impl ModuleProcessor for Adsr {
    fn process(&mut self, io: &mut ProcessIo<'_>) {
        for i in 0..io.frames() {
            let gain = self.next_level();
            let s = io.input(0)[i];
            io.output(0)[i] = s * gain;
        }
    }

    fn reset(&mut self, rate: BlockRate) {
        self.sample_rate = rate.sample_rate;
        self.stage = Stage::Idle;
        self.level = 0.0;
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
