mod common;

use pretty_assertions::assert_eq;
use sci::{
    animate::signal,
    graphics::{Rect, MASK_CONTROL},
    heap::Register,
    resource::ResourceType,
    view::build_ega_view,
};

use common::{get, kernel_id, list_of, list_values, machine, selector, set, test_game};

const RET: &[u8] = &[0x48];

#[test]
fn each_element_do_survives_callbacks_deleting_their_node() {
    // +ag 2; push2; lsg 1; pushSelf; callk DeleteKey 4; ret
    let doit = [0xc1, 2, 0x7a, 0x89, 1, 0x7c, 0x43, kernel_id("DeleteKey"), 4, 0x48];
    let game = test_game(&doit, RET, RET, 3);
    let mut pm = machine(&game.resources);
    let seg = pm.heap.instantiate_script(&game.resources, 0).unwrap();
    let actors: Vec<Register> = game.actors.iter().map(|&a| Register::new(seg, a)).collect();

    let list = list_of(&mut pm, &actors);
    pm.set_global(1, list).unwrap();
    let doit = Register::value(selector("doit") as i16);
    pm.call_kernel("ListEachElementDo", &[list, doit]).unwrap();

    assert_eq!(pm.global(2), Register::value(3));
    assert_eq!(pm.call_kernel("EmptyList", &[list]), Ok(Register::value(1)));
    assert_eq!(pm.heap.check_list(list), Ok(()));
}

#[test]
fn each_element_do_skips_a_node_deleted_ahead_of_it() {
    // ipToa x; push2; lsg 1; lsg 3; callk DeleteKey 4; ret
    let doit = [0x6b, 8, 0x7a, 0x89, 1, 0x89, 3, 0x43, kernel_id("DeleteKey"), 4, 0x48];
    let game = test_game(&doit, RET, RET, 3);
    let mut pm = machine(&game.resources);
    let seg = pm.heap.instantiate_script(&game.resources, 0).unwrap();
    let actors: Vec<Register> = game.actors.iter().map(|&a| Register::new(seg, a)).collect();

    let list = list_of(&mut pm, &actors);
    pm.set_global(1, list).unwrap();
    pm.set_global(3, actors[1]).unwrap();
    let doit = Register::value(selector("doit") as i16);
    pm.call_kernel("ListEachElementDo", &[list, doit]).unwrap();

    let visits: Vec<i16> = actors.iter().map(|&a| get(&pm, a, "x")).collect();
    assert_eq!(visits, vec![1, 0, 1]);
    assert_eq!(list_values(&mut pm, list), vec![actors[0], actors[2]]);
    assert_eq!(pm.heap.check_list(list), Ok(()));
}

#[test]
fn find_and_delete_unlink_the_middle_node() {
    let game = test_game(RET, RET, RET, 0);
    let mut pm = machine(&game.resources);
    let list = list_of(&mut pm, &[1, 2, 3].map(Register::value));

    let b = pm.call_kernel("FindKey", &[list, Register::value(2)]).unwrap();
    assert_eq!(pm.call_kernel("NodeValue", &[b]), Ok(Register::value(2)));
    assert_eq!(pm.call_kernel("DeleteKey", &[list, Register::value(2)]), Ok(Register::value(1)));

    let a = pm.call_kernel("FirstNode", &[list]).unwrap();
    let c = pm.call_kernel("NextNode", &[a]).unwrap();
    assert_eq!(pm.call_kernel("NodeValue", &[c]), Ok(Register::value(3)));
    assert_eq!(pm.call_kernel("PrevNode", &[c]), Ok(a));
    assert_eq!(pm.call_kernel("LastNode", &[list]), Ok(c));
    assert_eq!(pm.call_kernel("FindKey", &[list, Register::value(2)]), Ok(Register::NULL));
}

#[test]
fn animate_resets_out_of_range_loops_and_cels() {
    let mut game = test_game(RET, RET, RET, 1);
    let view = build_ega_view(&[vec![(2, 1, vec![1, 2]), (3, 2, vec![3; 6])]], 0);
    game.resources.insert(ResourceType::View, 0, view);
    let mut pm = machine(&game.resources);
    let seg = pm.heap.instantiate_script(&game.resources, 0).unwrap();
    let actor = Register::new(seg, game.actors[0]);
    set(&mut pm, actor, "x", 100);
    set(&mut pm, actor, "y", 80);
    set(&mut pm, actor, "loop", 5);
    set(&mut pm, actor, "cel", 7);

    let cast = list_of(&mut pm, &[actor]);
    pm.call_kernel("Animate", &[cast]).unwrap();
    assert_eq!((get(&pm, actor, "loop"), get(&pm, actor, "cel")), (0, 0));
    // cel 0 of loop 0 is 2x1, centred on x and standing on y
    let now_seen = ["nsLeft", "nsTop", "nsRight", "nsBottom"].map(|s| get(&pm, actor, s));
    assert_eq!(now_seen, [99, 80, 101, 81]);

    set(&mut pm, actor, "cel", 1);
    pm.call_kernel("Animate", &[cast]).unwrap();
    assert_eq!(get(&pm, actor, "cel"), 1);
}

#[test]
fn actors_at_the_coordinate_limits_do_not_overflow() {
    let mut game = test_game(RET, RET, RET, 2);
    let view = build_ega_view(&[vec![(3, 2, vec![3; 6])]], 0);
    game.resources.insert(ResourceType::View, 0, view);
    let mut pm = machine(&game.resources);
    let seg = pm.heap.instantiate_script(&game.resources, 0).unwrap();
    let (far, near) = (Register::new(seg, game.actors[0]), Register::new(seg, game.actors[1]));
    set(&mut pm, far, "x", i16::MAX);
    set(&mut pm, far, "y", i16::MAX);
    set(&mut pm, near, "x", i16::MIN);

    let cast = list_of(&mut pm, &[far, near]);
    pm.call_kernel("Animate", &[cast]).unwrap();
    assert_eq!(get(&pm, far, "nsRight"), i16::MAX);
    assert_eq!(get(&pm, near, "nsLeft"), i16::MIN);

    pm.call_kernel("BaseSetter", &[far]).unwrap();
    assert_eq!(get(&pm, far, "brBottom"), i16::MAX);

    // a mover heading from one end of the range to the other
    pm.heap.write_selector(near, selector("client"), far).unwrap();
    set(&mut pm, far, "xStep", 3);
    set(&mut pm, far, "yStep", 2);
    pm.call_kernel("InitBresen", &[near]).unwrap();
    pm.call_kernel("DoBresen", &[near]).unwrap();
}

#[test]
fn sort_keeps_equal_ranks_in_list_order() {
    // lsp 1; ldi 10; div; ret
    let rank = [0x8f, 1, 0x35, 10, 0x08, 0x48];
    let game = test_game(RET, &rank, RET, 2);
    let mut pm = machine(&game.resources);
    let seg = pm.heap.instantiate_script(&game.resources, 0).unwrap();
    let (source, dest) = (Register::new(seg, game.actors[0]), Register::new(seg, game.actors[1]));
    let order = Register::new(seg, game.order);

    let values = [31, 12, 35, 10].map(Register::value);
    let elements = list_of(&mut pm, &values);
    pm.heap.write_selector(source, selector("elements"), elements).unwrap();
    set(&mut pm, source, "size", 4);

    pm.call_kernel("Sort", &[source, dest, order]).unwrap();
    let sorted = pm.heap.read_selector(dest, selector("elements")).unwrap();
    assert!(!sorted.is_null());
    assert_eq!(get(&pm, dest, "size"), 4);
    assert_eq!(list_values(&mut pm, sorted), [12, 10, 31, 35].map(Register::value).to_vec());
    // the source is left alone
    assert_eq!(list_values(&mut pm, elements), values.to_vec());
}

fn walk(from: (i16, i16), to: (i16, i16)) -> (Vec<(i16, i16)>, i16) {
    let game = test_game(RET, RET, RET, 2);
    let mut pm = machine(&game.resources);
    let seg = pm.heap.instantiate_script(&game.resources, 0).unwrap();
    let (mover, client) = (Register::new(seg, game.actors[0]), Register::new(seg, game.actors[1]));

    pm.heap.write_selector(mover, selector("client"), client).unwrap();
    set(&mut pm, mover, "x", to.0);
    set(&mut pm, mover, "y", to.1);
    set(&mut pm, client, "x", from.0);
    set(&mut pm, client, "y", from.1);
    set(&mut pm, client, "xStep", 3);
    set(&mut pm, client, "yStep", 2);

    pm.call_kernel("InitBresen", &[mover]).unwrap();
    let mut path = Vec::new();
    for _ in 0..20 {
        let done = pm.call_kernel("DoBresen", &[mover]).unwrap();
        path.push((get(&pm, client, "x"), get(&pm, client, "y")));
        if done == Register::value(1) {
            break;
        }
    }
    (path, get(&pm, mover, "completed"))
}

#[test]
fn bresenham_walks_along_the_major_axis() {
    let (path, completed) = walk((0, 0), (10, 0));
    assert_eq!(path, vec![(3, 0), (6, 0), (9, 0), (10, 0)]);
    assert_eq!(completed, 1);
}

#[test]
fn bresenham_steps_the_minor_axis_on_overflow() {
    let (path, completed) = walk((0, 0), (6, 9));
    assert_eq!(path, vec![(1, 2), (3, 4), (4, 6), (5, 8), (6, 9)]);
    assert_eq!(completed, 1);
}

#[test]
fn can_be_here_checks_control_colours_and_other_actors() {
    let game = test_game(RET, RET, RET, 2);
    let mut pm = machine(&game.resources);
    let seg = pm.heap.instantiate_script(&game.resources, 0).unwrap();
    let (a, b) = (Register::new(seg, game.actors[0]), Register::new(seg, game.actors[1]));
    for actor in [a, b] {
        set(&mut pm, actor, "brLeft", 10);
        set(&mut pm, actor, "brTop", 50);
        set(&mut pm, actor, "brRight", 20);
        set(&mut pm, actor, "brBottom", 60);
    }

    // control colour 4 across the actor's feet, in screen coordinates
    pm.screen.fill_rect(Rect::new(0, 60, 320, 70), MASK_CONTROL, 0, 0, 4);
    set(&mut pm, a, "illegalBits", 1 << 4);
    assert_eq!(pm.call_kernel("CanBeHere", &[a]), Ok(Register::value(0)));
    assert_eq!(pm.call_kernel("CantBeHere", &[a]), Ok(Register::value(1)));

    set(&mut pm, a, "illegalBits", 1 << 5);
    assert_eq!(pm.call_kernel("CanBeHere", &[a]), Ok(Register::value(1)));

    let cast = list_of(&mut pm, &[a, b]);
    assert_eq!(pm.call_kernel("CanBeHere", &[a, cast]), Ok(Register::value(0)));

    set(&mut pm, b, "signal", signal::NO_UPDATE as i16);
    assert_eq!(pm.call_kernel("CanBeHere", &[a, cast]), Ok(Register::value(1)));

    set(&mut pm, b, "signal", 0);
    set(&mut pm, a, "signal", signal::IGNORE_ACTOR as i16);
    assert_eq!(pm.call_kernel("CanBeHere", &[a, cast]), Ok(Register::value(1)));
}
