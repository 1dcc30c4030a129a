use log::{debug, info, warn};

use super::KernelArgs;
use crate::{
    error::VmResult,
    heap::Register,
    pmachine::{AbortRequest, ExitReason, PMachine},
    savegame::{MAX_SAVE_GAMES, MAX_SAVE_NAME_LENGTH},
};

const SAVE_DIR: &[u8] = b"./";

/// SaveGame(game_name, slot, description): 1 when the game was saved
pub(super) fn save_game(pm: &mut PMachine<'_>, args: &KernelArgs) -> VmResult<Register> {
    let game_id = pm.heap.read_str(args.get(0))?;
    let slot = args.u16(1);
    let description = pm.heap.read_str(args.get(2))?;
    info!("Kernel> SaveGame {} slot {}: '{}'", game_id, slot, description);
    if slot as usize >= MAX_SAVE_GAMES {
        warn!("Save slot {slot} out of range");
        return Ok(Register::NULL);
    }
    let snapshot = pm.snapshot(&game_id, &description);
    pm.saves.save(slot, snapshot);
    Ok(Register::value(1))
}

/// RestoreGame(game_name, slot): swaps the saved heap in and abandons running code.
/// Returns 1 if there was nothing to restore.
pub(super) fn restore_game(pm: &mut PMachine<'_>, args: &KernelArgs) -> VmResult<Register> {
    let game_id = pm.heap.read_str(args.get(0))?;
    let slot = args.u16(1);
    info!("Kernel> RestoreGame {} slot {}", game_id, slot);
    let Some(snapshot) = pm.saves.load(slot) else {
        warn!("No saved game in slot {slot}");
        return Ok(Register::value(1));
    };
    if snapshot.game_id != game_id {
        warn!("Slot {slot} belongs to {}, not {game_id}", snapshot.game_id);
        return Ok(Register::value(1));
    }
    pm.restore_snapshot(snapshot);
    pm.abort = AbortRequest::LoadGame;
    pm.suspend(ExitReason::RestoreGame, [Some(Register::value(slot as i16)), None]);
    Ok(Register::NULL)
}

pub(super) fn restart_game(pm: &mut PMachine<'_>, _args: &KernelArgs) -> VmResult<Register> {
    info!("Kernel> RestartGame");
    pm.abort = AbortRequest::RestartGame;
    pm.suspend(ExitReason::RestartGame, [None, None]);
    Ok(pm.registers.acc)
}

pub(super) fn game_is_restarting(pm: &mut PMachine<'_>, _args: &KernelArgs) -> VmResult<Register> {
    let restarting = std::mem::take(&mut pm.game_is_restarting);
    debug!("Kernel> GameIsRestarting {}", restarting);
    Ok(Register::from_bool(restarting))
}

pub(super) fn check_save_game(pm: &mut PMachine<'_>, args: &KernelArgs) -> VmResult<Register> {
    let slot = args.u16(1);
    let exists = pm.saves.exists(slot);
    info!("Kernel> CheckSaveGame slot {} = {}", slot, exists);
    Ok(Register::from_bool(exists))
}

/// GetSaveFiles(game_name, descriptions, slots): fills fixed width descriptions and
/// the matching slot numbers. Returns how many there are.
pub(super) fn get_save_files(pm: &mut PMachine<'_>, args: &KernelArgs) -> VmResult<Register> {
    let (descriptions, slots) = (args.get(1), args.get(2));
    let saves = pm.saves.list();
    let saves = &saves[..saves.len().min(MAX_SAVE_GAMES)];
    info!("Kernel> GetSaveFiles found {}", saves.len());

    for (i, (slot, description)) in saves.iter().enumerate() {
        let mut name = description.as_bytes().to_vec();
        name.truncate(MAX_SAVE_NAME_LENGTH - 1);
        pm.heap.write_string(descriptions.offset_by((i * MAX_SAVE_NAME_LENGTH) as i16), &name)?;
        if !slots.is_null() {
            pm.heap.write_word(slots, i * 2, *slot)?;
        }
    }
    // an empty description ends the list
    pm.heap
        .write_byte(descriptions, saves.len() * MAX_SAVE_NAME_LENGTH, 0)?;
    Ok(Register::value(saves.len() as i16))
}

pub(super) fn get_save_dir(pm: &mut PMachine<'_>, _args: &KernelArgs) -> VmResult<Register> {
    info!("Kernel> GetSaveDir");
    if pm.save_dir.is_null() {
        let mut buf = SAVE_DIR.to_vec();
        buf.push(0);
        pm.save_dir = pm.heap.allocate_dynmem("save directory", buf);
    }
    Ok(pm.save_dir)
}

pub(super) fn get_cwd(pm: &mut PMachine<'_>, args: &KernelArgs) -> VmResult<Register> {
    let address = args.get(0);
    info!("Kernel> GetCWD into {}", address);
    pm.heap.write_string(address, SAVE_DIR)?;
    Ok(address)
}

pub(super) fn check_free_space(_pm: &mut PMachine<'_>, args: &KernelArgs) -> VmResult<Register> {
    debug!("Kernel> CheckFreeSpace {}", args.get(0));
    Ok(Register::value(1))
}

pub(super) fn valid_path(_pm: &mut PMachine<'_>, args: &KernelArgs) -> VmResult<Register> {
    debug!("Kernel> ValidPath {}", args.get(0));
    Ok(Register::value(1))
}

pub(super) fn flush_resources(pm: &mut PMachine<'_>, args: &KernelArgs) -> VmResult<Register> {
    info!("Kernel> FlushResources {}", args.get(0));
    pm.views.flush();
    Ok(pm.registers.acc)
}

pub(super) fn set_debug(pm: &mut PMachine<'_>, _args: &KernelArgs) -> VmResult<Register> {
    info!("Kernel> SetDebug with {} frames on the stack", pm.frame_depth());
    Ok(pm.registers.acc)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use crate::{
        config::EngineConfig,
        events::ScriptedEvents,
        graphics::NullDisplay,
        heap::{tests::class_resources, Register},
        pmachine::{AbortRequest, PMachine},
        resource::ResourceManager,
    };

    fn machine(resources: &ResourceManager) -> PMachine<'_> {
        PMachine::new(
            resources,
            EngineConfig::headless(),
            Box::<NullDisplay>::default(),
            Box::<ScriptedEvents>::default(),
        )
    }

    fn string(pm: &mut PMachine<'_>, s: &str) -> Register {
        let mut buf = s.as_bytes().to_vec();
        buf.push(0);
        pm.heap.allocate_dynmem("test string", buf)
    }

    #[test]
    fn saves_show_up_in_the_listing() {
        let (resources, ..) = class_resources();
        let mut pm = machine(&resources);
        let game = string(&mut pm, "test");
        let first = string(&mut pm, "In the forest");
        let second = string(&mut pm, "At the castle");
        pm.call_kernel("SaveGame", &[game, Register::value(2), second]).unwrap();
        pm.call_kernel("SaveGame", &[game, Register::value(0), first]).unwrap();

        assert_eq!(pm.call_kernel("CheckSaveGame", &[game, Register::value(2)]), Ok(Register::value(1)));
        assert_eq!(pm.call_kernel("CheckSaveGame", &[game, Register::value(1)]), Ok(Register::value(0)));

        let descriptions = pm.heap.allocate_dynmem("descriptions", vec![0xff; 3 * 36]);
        let slots = pm.heap.allocate_dynmem("slots", vec![0xff; 4]);
        assert_eq!(
            pm.call_kernel("GetSaveFiles", &[game, descriptions, slots]),
            Ok(Register::value(2))
        );
        assert_eq!(pm.heap.read_str(descriptions).unwrap(), "In the forest");
        assert_eq!(pm.heap.read_str(descriptions.offset_by(36)).unwrap(), "At the castle");
        assert_eq!(pm.heap.read_byte(descriptions, 72), Ok(0));
        assert_eq!(pm.heap.read_byte(slots, 0), Ok(0));
        assert_eq!(pm.heap.read_byte(slots, 2), Ok(2));
    }

    #[test]
    fn restoring_an_empty_slot_fails_softly() {
        let (resources, ..) = class_resources();
        let mut pm = machine(&resources);
        let game = string(&mut pm, "test");
        assert_eq!(pm.call_kernel("RestoreGame", &[game, Register::value(5)]), Ok(Register::value(1)));
        assert_eq!(pm.abort_request(), AbortRequest::None);
    }

    #[test]
    fn restart_flag_reads_once() {
        let (resources, ..) = class_resources();
        let mut pm = machine(&resources);
        pm.game_is_restarting = true;
        assert_eq!(pm.call_kernel("GameIsRestarting", &[]), Ok(Register::value(1)));
        assert_eq!(pm.call_kernel("GameIsRestarting", &[]), Ok(Register::value(0)));
    }

    #[test]
    fn save_dir_is_allocated_once() {
        let (resources, ..) = class_resources();
        let mut pm = machine(&resources);
        let dir = pm.call_kernel("GetSaveDir", &[]).unwrap();
        assert!(!dir.is_null());
        assert_eq!(pm.heap.read_str(dir).unwrap(), "./");
        assert_eq!(pm.call_kernel("GetSaveDir", &[]), Ok(dir));
    }
}
