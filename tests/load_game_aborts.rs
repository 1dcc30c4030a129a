mod common;

use pretty_assertions::assert_eq;
use sci::{heap::Register, pmachine::AbortRequest, pmachine::PMachine};
use test_case::test_case;

use common::{get, kernel_id, list_of, machine, selector, set, test_game, TestGame};

const RET: &[u8] = &[0x48];

/// push2; lsg 5; lsg 3; callk RestoreGame 4; +ag 2; ret
fn restore_from_global_slot() -> Vec<u8> {
    vec![0x7a, 0x89, 5, 0x89, 3, 0x43, kernel_id("RestoreGame"), 4, 0xc1, 2, 0x48]
}

/// Saves slot 0 with global 3 pointing at the empty slot 1, so a second restore
/// from the saved state would fall through to the increment of global 2.
fn save_then_arm(pm: &mut PMachine<'_>) {
    let name = pm.heap.allocate_dynmem("game name", b"test\0".to_vec());
    pm.set_global(5, name).unwrap();
    pm.set_global(3, Register::value(1)).unwrap();
    pm.call_kernel("SaveGame", &[name, Register::value(0), name]).unwrap();
    pm.set_global(3, Register::value(0)).unwrap();
}

fn actors(pm: &mut PMachine<'_>, game: &TestGame) -> Vec<Register> {
    let seg = pm.heap.instantiate_script(&game.resources, 0).unwrap();
    game.actors.iter().map(|&a| Register::new(seg, a)).collect()
}

#[test_case("ListEachElementDo")]
#[test_case("ListFirstTrue")]
#[test_case("ListAllTrue")]
fn restoring_from_a_callback_ends_the_walk(walker: &str) {
    let game = test_game(&restore_from_global_slot(), RET, RET, 3);
    let mut pm = machine(&game.resources);
    let actors = actors(&mut pm, &game);
    let list = list_of(&mut pm, &actors);
    save_then_arm(&mut pm);

    let doit = Register::value(selector("doit") as i16);
    pm.call_kernel(walker, &[list, doit]).unwrap();

    assert_eq!(pm.abort_request(), AbortRequest::LoadGame);
    // nothing ran against the restored heap
    assert_eq!(pm.global(2), Register::value(0));
    assert_eq!(pm.global(3), Register::value(1));
    assert_eq!(pm.heap.check_list(list), Ok(()));
    assert!(pm.heap.list(list).unwrap().checkpoints.is_empty());
}

#[test]
fn restoring_from_a_sort_ranking_leaves_the_destination_alone() {
    let game = test_game(RET, &restore_from_global_slot(), RET, 2);
    let mut pm = machine(&game.resources);
    let actors = actors(&mut pm, &game);
    let (source, dest) = (actors[0], actors[1]);
    let order = Register::new(source.segment, game.order);

    let elements = list_of(&mut pm, &[1, 2, 3].map(Register::value));
    pm.heap.write_selector(source, selector("elements"), elements).unwrap();
    set(&mut pm, source, "size", 3);
    save_then_arm(&mut pm);

    pm.call_kernel("Sort", &[source, dest, order]).unwrap();

    assert_eq!(pm.abort_request(), AbortRequest::LoadGame);
    assert_eq!(pm.global(2), Register::value(0));
    assert_eq!(get(&pm, dest, "size"), 0);
    assert!(pm.heap.read_selector(dest, selector("elements")).unwrap().is_null());
}

#[test]
fn restarting_from_a_callback_ends_the_walk() {
    // push0; callk RestartGame 0; +ag 2; ret
    let doit = [0x76, 0x43, kernel_id("RestartGame"), 0, 0xc1, 2, 0x48];
    let game = test_game(&doit, RET, RET, 3);
    let mut pm = machine(&game.resources);
    let actors = actors(&mut pm, &game);
    let list = list_of(&mut pm, &actors);

    let doit = Register::value(selector("doit") as i16);
    pm.call_kernel("ListEachElementDo", &[list, doit]).unwrap();

    assert_eq!(pm.abort_request(), AbortRequest::RestartGame);
    assert_eq!(pm.global(2), Register::value(0));
    assert_eq!(pm.heap.check_list(list), Ok(()));
}
