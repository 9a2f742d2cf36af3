//! Routing and level utility modules.

use std::any::Any;

use resona_engine::{BlockRate, ModuleProcessor, ModuleSpec, ProcessIo};

/// Constant-value source; one output, no inputs.
pub struct ConstSource {
    /// The value every output sample takes.
    pub value: f32,
}

impl ConstSource {
    /// Wraps a constant source in a module spec.
    pub fn spec(value: f32) -> ModuleSpec {
        ModuleSpec::new(0, 0, 1, Box::new(Self { value }))
    }
}

impl ModuleProcessor for ConstSource {
    fn process(&mut self, io: &mut ProcessIo<'_>) {
        let v = self.value;
        io.output(0).fill(v);
    }

    fn reset(&mut self, _rate: BlockRate) {}

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Scales its input by a fixed gain; one input, one output.
pub struct Gain {
    /// Linear gain factor.
    pub gain: f32,
}

impl Gain {
    /// Wraps a gain stage in a module spec.
    pub fn spec(gain: f32) -> ModuleSpec {
        ModuleSpec::new(1, 0, 1, Box::new(Self { gain }))
    }
}

impl ModuleProcessor for Gain {
    fn process(&mut self, io: &mut ProcessIo<'_>) {
        let g = self.gain;
        for i in 0..io.frames() {
            let s = io.input(0)[i];
            io.output(0)[i] = s * g;
        }
    }

    fn reset(&mut self, _rate: BlockRate) {}

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Copies its joint sum to the output; the voice merge point.
///
/// The joint slot does the summing in the engine, so this module is pure
/// routing: it exists to give the sum a tappable output stream.
pub struct Mix;

impl Mix {
    /// Wraps a mixer in a module spec: one joint input, one output.
    pub fn spec() -> ModuleSpec {
        ModuleSpec::new(0, 1, 1, Box::new(Self))
    }
}

impl ModuleProcessor for Mix {
    fn process(&mut self, io: &mut ProcessIo<'_>) {
        for i in 0..io.frames() {
            let s = io.joint(0)[i];
            io.output(0)[i] = s;
        }
    }

    fn reset(&mut self, _rate: BlockRate) {}

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
