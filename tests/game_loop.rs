mod common;

use pretty_assertions::assert_eq;
use sci::{config::EngineConfig, events::ScriptedEvents, graphics::NullDisplay, Game, GameExit};

use common::{kernel_id, test_game};

const RET: &[u8] = &[0x48];

fn run(play: &[u8], max_ticks: Option<usize>) -> GameExit {
    let game = Game::from_resources(test_game(RET, RET, play, 0).resources);
    game.run(
        EngineConfig::headless(),
        Box::<NullDisplay>::default(),
        Box::<ScriptedEvents>::default(),
        max_ticks,
    )
    .unwrap()
}

#[test]
fn waits_hand_control_to_the_host() {
    // loop: push1; push1; callk Wait 2; jmp loop
    let play = [0x78, 0x78, 0x43, kernel_id("Wait"), 2, 0x33, 0xf9];
    assert_eq!(run(&play, Some(3)), GameExit::TickLimit);
}

#[test]
fn restart_plays_again_with_the_flag_set() {
    let play = [
        0x76, 0x43, kernel_id("GameIsRestarting"), 0, // push0; callk GameIsRestarting 0
        0x31, 5, // bnt restart
        0x35, 1, 0xa1, 4, 0x48, // ldi 1; sag quit; ret
        0x76, 0x43, kernel_id("RestartGame"), 0, 0x48, // restart: push0; callk RestartGame 0; ret
    ];
    assert_eq!(run(&play, Some(10)), GameExit::Finished);
}

#[test]
fn returning_from_play_finishes_the_game() {
    assert_eq!(run(RET, None), GameExit::Finished);
}
