//! A ready-made polyphonic voice network.
//!
//! One per-voice chain (sine oscillator into ADSR) merging into a shared mix
//! and master gain. This is the topology the CLI plays; it also serves as
//! the reference for wiring custom networks.

use resona_engine::Transaction;
use resona_net::{ContextId, NetError, Network, Placement, TemplateNodeId};

use crate::envelope::Adsr;
use crate::note::{Tuning, note_to_freq};
use crate::osc::SineOsc;
use crate::util::{Gain, Mix};

/// Envelope and level settings for [`VoicePatch::build`].
#[derive(Clone, Copy, Debug)]
pub struct PatchParams {
    /// Attack time in seconds.
    pub attack: f32,
    /// Decay time in seconds.
    pub decay: f32,
    /// Sustain level, 0 to 1.
    pub sustain: f32,
    /// Release time in seconds.
    pub release: f32,
    /// Master gain applied after the voice mix.
    pub master_gain: f32,
}

impl Default for PatchParams {
    fn default() -> Self {
        Self {
            attack: 0.01,
            decay: 0.05,
            sustain: 0.7,
            release: 0.2,
            master_gain: 0.5,
        }
    }
}

/// The template network plus handles to its interesting nodes.
pub struct VoicePatch {
    /// The underlying network; create and discard contexts through it.
    pub net: Network,
    /// Per-voice sine oscillator.
    pub osc: TemplateNodeId,
    /// Per-voice ADSR envelope.
    pub env: TemplateNodeId,
    /// Shared voice mix (joint).
    pub mix: TemplateNodeId,
    /// Shared master gain; its output feeds the device.
    pub master: TemplateNodeId,
    tuning: Tuning,
}

impl VoicePatch {
    /// Builds the template. Call [`Network::activate_shared`] on `net` (via
    /// [`VoicePatch::activate`]) before creating voices.
    pub fn build(params: PatchParams, tuning: Tuning) -> Self {
        let mut net = Network::new();
        let osc = net.add_node(Placement::PerVoice, || SineOsc::spec(440.0));
        let env = net.add_node(Placement::PerVoice, move || {
            Adsr::spec(params.attack, params.decay, params.sustain, params.release)
        });
        let mix = net.add_node(Placement::Shared, Mix::spec);
        let master = net.add_node(Placement::Shared, move || Gain::spec(params.master_gain));

        // Arities are fixed by the specs above; the edges cannot fail.
        let _ = net.add_edge(osc, 0, env, 0);
        let _ = net.add_joint_edge(env, 0, mix, 0);
        let _ = net.add_edge(mix, 0, master, 0);

        Self {
            net,
            osc,
            env,
            mix,
            master,
            tuning,
        }
    }

    /// Integrates the shared mix and master stages.
    pub fn activate(&mut self, trans: &mut Transaction) -> Result<(), NetError> {
        self.net.activate_shared(trans)
    }

    /// Tunes a voice to `note` and opens its gate, through `access` jobs
    /// ordered after the voice's own integration.
    pub fn start_voice(
        &self,
        ctx: ContextId,
        note: i32,
        fine_tune: i32,
        trans: &mut Transaction,
    ) -> Result<(), NetError> {
        let freq = note_to_freq(self.tuning, note, fine_tune);
        let osc = self.net.resolve(ctx, self.osc)?;
        trans.access(osc, move |p| {
            if let Some(osc) = p.as_any_mut().downcast_mut::<SineOsc>() {
                osc.set_freq(freq);
            }
        });
        let env = self.net.resolve(ctx, self.env)?;
        trans.access(env, |p| {
            if let Some(env) = p.as_any_mut().downcast_mut::<Adsr>() {
                env.gate_on();
            }
        });
        Ok(())
    }

    /// Closes a voice's gate; the caller discards the context once the
    /// release tail is done (or immediately, cutting it short).
    pub fn release_voice(&self, ctx: ContextId, trans: &mut Transaction) -> Result<(), NetError> {
        let env = self.net.resolve(ctx, self.env)?;
        trans.access(env, |p| {
            if let Some(env) = p.as_any_mut().downcast_mut::<Adsr>() {
                env.gate_off();
            }
        });
        Ok(())
    }
}
