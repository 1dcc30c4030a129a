#![allow(dead_code)]

use sci::{
    config::EngineConfig,
    events::ScriptedEvents,
    graphics::NullDisplay,
    heap::Register,
    kernel::KernelTable,
    pmachine::PMachine,
    resource::{vocab, ResourceManager, ResourceType},
    script::{ScriptBuilder, INFO_CLASS},
};

/// Selector ids are positions in this table. Everything before `doit` is a property of Actor.
pub const SELECTORS: &[&str] = &[
    "species", "superClass", "-info-", "name", "x", "y", "signal", "illegalBits", "brTop", "brLeft",
    "brBottom", "brRight", "xStep", "yStep", "client", "dx", "dy", "b-moveCnt", "b-i1", "b-i2", "b-di",
    "b-xAxis", "b-incr", "completed", "elements", "size", "view", "loop", "cel", "priority", "nsTop",
    "nsLeft", "nsBottom", "nsRight", "doit", "play", "replay",
];

const ACTOR_PROPERTIES: usize = 34;

pub fn selector(name: &str) -> u16 {
    SELECTORS
        .iter()
        .position(|&s| s == name)
        .unwrap_or_else(|| panic!("no selector {name}")) as u16
}

pub fn kernel_id(name: &str) -> u8 {
    KernelTable::sci0_default()
        .id(name)
        .unwrap_or_else(|| panic!("no kernel function {name}")) as u8
}

pub struct TestGame {
    pub resources: ResourceManager,
    /// Offsets of the Actor instances
    pub actors: Vec<u16>,
    /// Offset of the Order instance, whose class has its own doit
    pub order: u16,
}

/// Script 0 with eight globals, classes Actor (0), Order (1) and Game (2), `actors`
/// Actor instances, one Order and a Game instance exported as the game object.
pub fn test_game(actor_doit: &[u8], order_doit: &[u8], play: &[u8], actors: usize) -> TestGame {
    let mut builder = ScriptBuilder::new();
    builder.locals(&[0; 8]);
    let actor_code = builder.code(actor_doit);
    let order_code = builder.code(order_doit);
    let play_code = builder.code(play);

    let mut actor_class = vec![0, 0xffff, INFO_CLASS, 0];
    actor_class.resize(ACTOR_PROPERTIES, 0);
    let actor_selectors: Vec<u16> = (0..ACTOR_PROPERTIES as u16).collect();
    builder.object(true, &actor_class, &actor_selectors, &[(selector("doit"), actor_code)]);
    builder.object(true, &[1, 0xffff, INFO_CLASS, 0], &[0, 1, 2, 3], &[(selector("doit"), order_code)]);
    builder.object(true, &[2, 0xffff, INFO_CLASS, 0], &[0, 1, 2, 3], &[(selector("play"), play_code)]);

    // species and superClass 0: instances of Actor
    let actor_instance = vec![0; ACTOR_PROPERTIES];
    let actors = (0..actors)
        .map(|_| builder.object(false, &actor_instance, &[], &[]))
        .collect();
    let order = builder.object(false, &[1, 1, 0, 0], &[], &[]);
    let game = builder.object(false, &[2, 2, 0, 0], &[], &[]);
    builder.export(game);

    let mut resources = ResourceManager::default();
    resources.insert(ResourceType::Script, 0, builder.build());
    resources.insert(
        ResourceType::Vocab,
        vocab::VOCAB_SELECTOR_NAMES,
        vocab::encode_string_table(SELECTORS, 1),
    );
    TestGame { resources, actors, order }
}

pub fn machine(resources: &ResourceManager) -> PMachine<'_> {
    PMachine::new(
        resources,
        EngineConfig::headless(),
        Box::<NullDisplay>::default(),
        Box::<ScriptedEvents>::default(),
    )
}

pub fn set(pm: &mut PMachine<'_>, object: Register, name: &str, value: i16) {
    pm.heap
        .write_selector(object, selector(name), Register::value(value))
        .unwrap();
}

pub fn get(pm: &PMachine<'_>, object: Register, name: &str) -> i16 {
    pm.heap.read_selector(object, selector(name)).unwrap().to_i16()
}

/// Builds a list holding `values` through the list kernel calls
pub fn list_of(pm: &mut PMachine<'_>, values: &[Register]) -> Register {
    let list = pm.call_kernel("NewList", &[]).unwrap();
    for &value in values {
        let node = pm.call_kernel("NewNode", &[value]).unwrap();
        pm.call_kernel("AddToEnd", &[list, node]).unwrap();
    }
    list
}

pub fn list_values(pm: &mut PMachine<'_>, list: Register) -> Vec<Register> {
    let mut out = Vec::new();
    let mut node = pm.call_kernel("FirstNode", &[list]).unwrap();
    while !node.is_null() {
        out.push(pm.call_kernel("NodeValue", &[node]).unwrap());
        node = pm.call_kernel("NextNode", &[node]).unwrap();
    }
    out
}
