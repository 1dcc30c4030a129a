use std::collections::BTreeMap;

use log::info;

use crate::{
    heap::{Register, SegManager},
    pmachine::{MachineRegisters, PMachine},
};

/// Slots a game can list at once
pub const MAX_SAVE_GAMES: usize = 20;
/// Bytes per description in the buffer `kGetSaveFiles` fills, terminator included
pub const MAX_SAVE_NAME_LENGTH: usize = 36;

/// Everything needed to pick a game up again: the whole heap and the registers.
#[derive(Clone, Debug)]
pub struct Snapshot {
    pub game_id: String,
    pub description: String,
    pub heap: SegManager,
    pub registers: MachineRegisters,
    pub game_object: Register,
    pub pic_number: u16,
}

pub trait SaveStore {
    fn save(&mut self, slot: u16, snapshot: Snapshot);

    fn load(&self, slot: u16) -> Option<Snapshot>;

    fn exists(&self, slot: u16) -> bool {
        self.load(slot).is_some()
    }

    fn list(&self) -> Vec<(u16, String)>;
}

#[derive(Default)]
pub struct MemorySaveStore {
    slots: BTreeMap<u16, Snapshot>,
}

impl SaveStore for MemorySaveStore {
    fn save(&mut self, slot: u16, snapshot: Snapshot) {
        self.slots.insert(slot, snapshot);
    }

    fn load(&self, slot: u16) -> Option<Snapshot> {
        self.slots.get(&slot).cloned()
    }

    fn exists(&self, slot: u16) -> bool {
        self.slots.contains_key(&slot)
    }

    fn list(&self) -> Vec<(u16, String)> {
        self.slots
            .iter()
            .map(|(&slot, s)| (slot, s.description.clone()))
            .collect()
    }
}

impl<'a> PMachine<'a> {
    pub fn snapshot(&self, game_id: &str, description: &str) -> Snapshot {
        // walks in progress belong to the running code, not the saved game
        let mut heap = self.heap.clone();
        heap.clear_checkpoints();
        Snapshot {
            game_id: game_id.to_string(),
            description: description.to_string(),
            heap,
            registers: self.registers,
            game_object: self.game_object,
            pic_number: self.pic_number,
        }
    }

    /// Swaps in a saved heap. Running code must be abandoned afterwards.
    pub fn restore_snapshot(&mut self, snapshot: Snapshot) {
        info!("Restoring '{}' of {}", snapshot.description, snapshot.game_id);
        self.heap = snapshot.heap;
        self.heap.clear_checkpoints();
        self.registers = snapshot.registers;
        self.game_object = snapshot.game_object;
        self.pic_number = snapshot.pic_number;
        self.animate = Default::default();
        // the screen is redrawn by the game's replay
        self.pic_not_valid = 1;
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        config::{EngineConfig, SciVersion},
        events::ScriptedEvents,
        graphics::NullDisplay,
        resource::ResourceManager,
    };

    fn snapshot(description: &str) -> Snapshot {
        Snapshot {
            game_id: "test".into(),
            description: description.into(),
            heap: SegManager::new(&[], 16, SciVersion::Sci0),
            registers: MachineRegisters::default(),
            game_object: Register::NULL,
            pic_number: 0,
        }
    }

    #[test]
    fn lists_saves_by_slot() {
        let mut store = MemorySaveStore::default();
        store.save(3, snapshot("later"));
        store.save(1, snapshot("first"));
        store.save(3, snapshot("overwritten"));

        assert!(store.exists(1));
        assert!(!store.exists(2));
        assert_eq!(store.list(), vec![(1, "first".to_string()), (3, "overwritten".to_string())]);
        assert_eq!(store.load(1).map(|s| s.description), Some("first".to_string()));
    }

    #[test]
    fn walks_in_progress_are_not_restored() {
        let resources = ResourceManager::default();
        let mut pm = PMachine::new(
            &resources,
            EngineConfig::headless(),
            Box::<NullDisplay>::default(),
            Box::<ScriptedEvents>::default(),
        );
        let list = pm.heap.new_list();
        pm.heap.push_checkpoint(list, 4).unwrap();
        let saved = pm.snapshot("test", "mid walk");
        assert!(saved.heap.list(list).unwrap().checkpoints.is_empty());

        pm.heap.pop_checkpoint(list).unwrap();
        let mut stale = saved.clone();
        stale.heap.push_checkpoint(list, 4).unwrap();
        pm.restore_snapshot(stale);
        assert!(pm.heap.list(list).unwrap().checkpoints.is_empty());
        // the full depth is available again
        for _ in 0..4 {
            pm.heap.push_checkpoint(list, 4).unwrap();
        }
    }
}
