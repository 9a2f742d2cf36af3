//! Context lifecycle tests over a live engine core.

use std::any::Any;

use resona_engine::{BlockRate, EngineCore, ModuleProcessor, ModuleSpec, OutputRef, ProcessIo};
use resona_net::{MidiRouter, NetError, Network, Placement, Routing};

const RATE: BlockRate = BlockRate {
    sample_rate: 48000.0,
    block_frames: 32,
};

struct Const(f32);

impl ModuleProcessor for Const {
    fn process(&mut self, io: &mut ProcessIo<'_>) {
        let v = self.0;
        io.output(0).fill(v);
    }

    fn reset(&mut self, _rate: BlockRate) {}

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Sums its joint slot onto the output.
struct Merge;

impl ModuleProcessor for Merge {
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

struct Gain(f32);

impl ModuleProcessor for Gain {
    fn process(&mut self, io: &mut ProcessIo<'_>) {
        let g = self.0;
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

/// Voice = const source into a per-voice merge, all voices into a shared mix.
struct Rig {
    net: Network,
    osc: resona_net::TemplateNodeId,
    merge: resona_net::TemplateNodeId,
    mix: resona_net::TemplateNodeId,
}

fn build_rig() -> Rig {
    let mut net = Network::new();
    let osc = net.add_node(Placement::PerVoice, || {
        ModuleSpec::new(0, 0, 1, Box::new(Const(0.1)))
    });
    let merge = net.add_node(Placement::PerVoice, || {
        ModuleSpec::new(0, 1, 1, Box::new(Merge))
    });
    let mix = net.add_node(Placement::Shared, || {
        ModuleSpec::new(0, 1, 1, Box::new(Merge))
    });
    net.add_joint_edge(osc, 0, merge, 0).unwrap();
    net.add_joint_edge(merge, 0, mix, 0).unwrap();
    Rig {
        net,
        osc,
        merge,
        mix,
    }
}

fn routing(voice: u32) -> Routing {
    Routing { channel: 0, voice }
}

fn first_sample(core: &mut EngineCore) -> f32 {
    let mut sample = f32::NAN;
    core.cycle(|blocks| sample = blocks[0][0]).expect("cycle");
    sample
}

#[test]
fn create_then_discard_restores_graph_counts() {
    let mut rig = build_rig();
    let (mut core, handle) = EngineCore::new();
    core.establish(RATE);

    let mut t = handle.begin();
    rig.net.activate_shared(&mut t).unwrap();
    handle.commit(t).unwrap();
    core.absorb();
    let modules = core.module_count();
    let connections = core.connection_count();

    let mut t = handle.begin();
    let ctx = rig.net.create_context(routing(0), &mut t).unwrap();
    handle.commit(t).unwrap();
    core.absorb();
    assert!(core.module_count() > modules);

    let mut t = handle.begin();
    rig.net.discard_context(ctx, &mut t).unwrap();
    handle.commit(t).unwrap();
    core.absorb();

    assert_eq!(core.module_count(), modules);
    assert_eq!(core.connection_count(), connections);
    assert!(core.take_faults().is_empty());
}

#[test]
fn contexts_sum_into_the_shared_mix() {
    let mut rig = build_rig();
    let (mut core, handle) = EngineCore::new();
    core.establish(RATE);

    let mut t = handle.begin();
    rig.net.activate_shared(&mut t).unwrap();
    let c1 = rig.net.create_context(routing(0), &mut t).unwrap();
    let c2 = rig.net.create_context(routing(1), &mut t).unwrap();
    // Give the second voice a different level through the sanctioned channel.
    let osc2 = rig.net.resolve(c2, rig.osc).unwrap();
    t.access(osc2, |p| {
        let c: &mut Const = p.as_any_mut().downcast_mut().expect("const");
        c.0 = 0.2;
    });
    handle.commit(t).unwrap();
    core.absorb();

    let mix = OutputRef {
        module: rig.net.resolve(c1, rig.mix).unwrap(),
        ostream: 0,
    };
    core.set_output_taps(vec![mix]);
    let s = first_sample(&mut core);
    assert!((s - 0.3).abs() < 1e-6, "expected both voices summed, got {s}");
}

#[test]
fn branch_shares_the_parent_merge_and_tail() {
    let mut rig = build_rig();
    let (mut core, handle) = EngineCore::new();
    core.establish(RATE);

    let mut t = handle.begin();
    rig.net.activate_shared(&mut t).unwrap();
    let parent = rig.net.create_context(routing(0), &mut t).unwrap();
    handle.commit(t).unwrap();
    core.absorb();
    let parent_modules = core.module_count();

    let mut t = handle.begin();
    let branch = rig
        .net
        .clone_branch(parent, rig.merge, routing(1), &mut t)
        .unwrap();
    let osc_b = rig.net.resolve(branch, rig.osc).unwrap();
    t.access(osc_b, |p| {
        let c: &mut Const = p.as_any_mut().downcast_mut().expect("const");
        c.0 = 0.2;
    });
    handle.commit(t).unwrap();
    core.absorb();

    // Only the osc was cloned; merge and mix are shared with the parent.
    assert_eq!(core.module_count(), parent_modules + 1);
    assert!(rig.net.is_branch(branch).unwrap());
    assert!(!rig.net.is_branch(parent).unwrap());
    assert_eq!(
        rig.net.resolve(branch, rig.merge).unwrap(),
        rig.net.resolve(parent, rig.merge).unwrap()
    );

    let mix = OutputRef {
        module: rig.net.resolve(parent, rig.mix).unwrap(),
        ostream: 0,
    };
    core.set_output_taps(vec![mix]);
    let s = first_sample(&mut core);
    assert!((s - 0.3).abs() < 1e-6, "parent + branch summed, got {s}");
}

#[test]
fn discarding_one_branch_leaves_siblings_untouched() {
    let mut rig = build_rig();
    let (mut core, handle) = EngineCore::new();
    core.establish(RATE);

    let mut t = handle.begin();
    rig.net.activate_shared(&mut t).unwrap();
    let parent = rig.net.create_context(routing(0), &mut t).unwrap();
    let b1 = rig
        .net
        .clone_branch(parent, rig.merge, routing(1), &mut t)
        .unwrap();
    let b2 = rig
        .net
        .clone_branch(parent, rig.merge, routing(2), &mut t)
        .unwrap();
    for (ctx, level) in [(b1, 0.2f32), (b2, 0.4f32)] {
        let osc = rig.net.resolve(ctx, rig.osc).unwrap();
        t.access(osc, move |p| {
            let c: &mut Const = p.as_any_mut().downcast_mut().expect("const");
            c.0 = level;
        });
    }
    handle.commit(t).unwrap();
    core.absorb();

    let mix = OutputRef {
        module: rig.net.resolve(parent, rig.mix).unwrap(),
        ostream: 0,
    };
    core.set_output_taps(vec![mix]);
    let s = first_sample(&mut core);
    assert!((s - 0.7).abs() < 1e-6, "three branches summed, got {s}");

    let mut t = handle.begin();
    rig.net.discard_context(b1, &mut t).unwrap();
    handle.commit(t).unwrap();

    let s = first_sample(&mut core);
    assert!((s - 0.5).abs() < 1e-6, "remaining voices perturbed: {s}");
}

#[test]
fn parent_with_live_branches_cannot_be_discarded() {
    let mut rig = build_rig();
    let (mut core, handle) = EngineCore::new();
    core.establish(RATE);

    let mut t = handle.begin();
    rig.net.activate_shared(&mut t).unwrap();
    let parent = rig.net.create_context(routing(0), &mut t).unwrap();
    let branch = rig
        .net
        .clone_branch(parent, rig.merge, routing(1), &mut t)
        .unwrap();
    handle.commit(t).unwrap();
    core.absorb();

    let mut t = handle.begin();
    let err = rig.net.discard_context(parent, &mut t).unwrap_err();
    assert_eq!(err, NetError::HasBranches(parent));

    // Branch first, then the parent goes through.
    rig.net.discard_context(branch, &mut t).unwrap();
    rig.net.discard_context(parent, &mut t).unwrap();
    handle.commit(t).unwrap();
    core.absorb();
    assert_eq!(rig.net.context_count(), 0);
}

#[test]
fn midi_context_finds_voices_by_routing() {
    let mut rig = build_rig();
    let (mut core, handle) = EngineCore::new();
    core.establish(RATE);

    let mut t = handle.begin();
    rig.net.activate_shared(&mut t).unwrap();
    let c1 = rig
        .net
        .create_context(Routing { channel: 3, voice: 7 }, &mut t)
        .unwrap();
    handle.commit(t).unwrap();
    core.absorb();

    assert_eq!(rig.net.midi_context(3, 7), Some(c1));
    assert_eq!(rig.net.midi_context(3, 8), None);
    assert_eq!(rig.net.midi_context(2, 7), None);
    assert_eq!(rig.net.routing(c1).unwrap().channel, 3);
}

#[test]
fn ports_rebind_per_context() {
    let (mut core, handle) = EngineCore::new();
    core.establish(RATE);

    let mut net = Network::new();
    let sink = net.add_node(Placement::PerVoice, || {
        ModuleSpec::new(1, 0, 1, Box::new(Gain(1.0)))
    });
    let port = net.register_input_port("audio", sink, 0).unwrap();
    assert_eq!(port, "audio");
    assert_eq!(net.register_input_port("audio", sink, 0).unwrap(), "audio-2");

    let mut t = handle.begin();
    net.activate_shared(&mut t).unwrap();
    let ctx = net.create_context(routing(0), &mut t).unwrap();
    let feed_a = t.integrate(ModuleSpec::new(0, 0, 1, Box::new(Const(0.25))));
    let feed_b = t.integrate(ModuleSpec::new(0, 0, 1, Box::new(Const(0.75))));
    net.set_port_source(
        ctx,
        "audio",
        OutputRef {
            module: feed_a,
            ostream: 0,
        },
        &mut t,
    )
    .unwrap();
    handle.commit(t).unwrap();

    let tap = OutputRef {
        module: net.resolve(ctx, sink).unwrap(),
        ostream: 0,
    };
    core.set_output_taps(vec![tap]);
    assert_eq!(first_sample(&mut core), 0.25);

    // Rebinding disconnects the old source in the same transaction.
    let mut t = handle.begin();
    net.set_port_source(
        ctx,
        "audio",
        OutputRef {
            module: feed_b,
            ostream: 0,
        },
        &mut t,
    )
    .unwrap();
    handle.commit(t).unwrap();
    assert_eq!(first_sample(&mut core), 0.75);
    assert!(core.take_faults().is_empty());
}

#[test]
fn port_rebinds_after_the_bound_source_is_discarded() {
    let (mut core, handle) = EngineCore::new();
    core.establish(RATE);

    let mut net = Network::new();
    let sink = net.add_node(Placement::PerVoice, || {
        ModuleSpec::new(1, 0, 1, Box::new(Gain(1.0)))
    });
    net.register_input_port("audio", sink, 0).unwrap();

    let mut t = handle.begin();
    net.activate_shared(&mut t).unwrap();
    let ctx = net.create_context(routing(0), &mut t).unwrap();
    let feed_a = t.integrate(ModuleSpec::new(0, 0, 1, Box::new(Const(0.25))));
    let feed_b = t.integrate(ModuleSpec::new(0, 0, 1, Box::new(Const(0.75))));
    net.set_port_source(
        ctx,
        "audio",
        OutputRef {
            module: feed_a,
            ostream: 0,
        },
        &mut t,
    )
    .unwrap();
    handle.commit(t).unwrap();

    let tap = OutputRef {
        module: net.resolve(ctx, sink).unwrap(),
        ostream: 0,
    };
    core.set_output_taps(vec![tap]);
    assert_eq!(first_sample(&mut core), 0.25);

    // Discarding the bound source behind the network's back severs the edge
    // the binding remembers; a later rebind must still land.
    let mut t = handle.begin();
    t.discard(feed_a);
    handle.commit(t).unwrap();
    assert_eq!(first_sample(&mut core), 0.0);

    let mut t = handle.begin();
    net.set_port_source(
        ctx,
        "audio",
        OutputRef {
            module: feed_b,
            ostream: 0,
        },
        &mut t,
    )
    .unwrap();
    handle.commit(t).unwrap();
    assert_eq!(first_sample(&mut core), 0.75);
    assert!(core.take_faults().is_empty());

    // And the port is not wedged: rebinding again keeps working.
    let mut t = handle.begin();
    let feed_c = t.integrate(ModuleSpec::new(0, 0, 1, Box::new(Const(0.5))));
    net.set_port_source(
        ctx,
        "audio",
        OutputRef {
            module: feed_c,
            ostream: 0,
        },
        &mut t,
    )
    .unwrap();
    handle.commit(t).unwrap();
    assert_eq!(first_sample(&mut core), 0.5);
    assert!(core.take_faults().is_empty());
}

#[test]
fn output_ports_rebind_their_consumer() {
    let (mut core, handle) = EngineCore::new();
    core.establish(RATE);

    let mut net = Network::new();
    let voice = net.add_node(Placement::PerVoice, || {
        ModuleSpec::new(0, 0, 1, Box::new(Const(0.5)))
    });
    let port = net.register_output_port("voice", voice, 0).unwrap();
    assert_eq!(port, "voice");

    let mut t = handle.begin();
    net.activate_shared(&mut t).unwrap();
    let ctx = net.create_context(routing(0), &mut t).unwrap();
    let sink_a = t.integrate(ModuleSpec::new(1, 0, 1, Box::new(Gain(1.0))));
    let sink_b = t.integrate(ModuleSpec::new(1, 0, 1, Box::new(Gain(2.0))));
    net.set_port_dest(ctx, "voice", sink_a, 0, &mut t).unwrap();
    handle.commit(t).unwrap();

    core.set_output_taps(vec![
        OutputRef { module: sink_a, ostream: 0 },
        OutputRef { module: sink_b, ostream: 0 },
    ]);
    let mut samples = [f32::NAN; 2];
    core.cycle(|blocks| samples = [blocks[0][0], blocks[1][0]]).unwrap();
    assert_eq!(samples, [0.5, 0.0]);

    // Rebinding frees the old consumer's slot in the same transaction.
    let mut t = handle.begin();
    net.set_port_dest(ctx, "voice", sink_b, 0, &mut t).unwrap();
    handle.commit(t).unwrap();
    core.cycle(|blocks| samples = [blocks[0][0], blocks[1][0]]).unwrap();
    assert_eq!(samples, [0.0, 1.0]);

    // A binding whose consumer was discarded meanwhile is stale, not fatal.
    let mut t = handle.begin();
    t.discard(sink_b);
    handle.commit(t).unwrap();
    let mut t = handle.begin();
    net.set_port_dest(ctx, "voice", sink_a, 0, &mut t).unwrap();
    handle.commit(t).unwrap();

    core.set_output_taps(vec![OutputRef { module: sink_a, ostream: 0 }]);
    assert_eq!(first_sample(&mut core), 0.5);
    assert!(core.take_faults().is_empty());
}

#[test]
fn router_allocates_and_retires_voices() {
    let mut rig = build_rig();
    let (mut core, handle) = EngineCore::new();
    core.establish(RATE);

    let mut t = handle.begin();
    rig.net.activate_shared(&mut t).unwrap();
    handle.commit(t).unwrap();
    core.absorb();
    let baseline = core.module_count();

    let mut router = MidiRouter::new();
    let mut t = handle.begin();
    let v1 = router.note_on(&mut rig.net, 0, 60, &mut t).unwrap();
    let v2 = router.note_on(&mut rig.net, 0, 64, &mut t).unwrap();
    assert_ne!(v1, v2);
    // Same key again returns the live voice instead of stacking another.
    assert_eq!(router.note_on(&mut rig.net, 0, 60, &mut t).unwrap(), v1);
    handle.commit(t).unwrap();
    core.absorb();
    assert_eq!(router.active_notes(), 2);
    assert_eq!(router.context_for(0, 60), Some(v1));

    let mut t = handle.begin();
    assert_eq!(router.note_off(&mut rig.net, 0, 60, &mut t).unwrap(), Some(v1));
    assert_eq!(router.note_off(&mut rig.net, 0, 60, &mut t).unwrap(), None);
    router.all_off(&mut rig.net, &mut t).unwrap();
    handle.commit(t).unwrap();
    core.absorb();

    assert_eq!(core.module_count(), baseline);
    assert_eq!(router.active_notes(), 0);
}
