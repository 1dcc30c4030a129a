use std::path::Path;

use log::{info, warn};

#[macro_use]
extern crate num_derive;

pub mod animate;
pub mod config;
pub mod error;
pub mod events;
pub mod graphics;
pub mod heap;
pub mod kernel;
pub mod picture;
pub mod pmachine;
pub mod resource;
pub mod savegame;
pub mod script;
#[cfg(feature = "sdl")]
pub mod sdl;
pub mod selector;
pub mod view;

use config::EngineConfig;
use error::VmResult;
use events::EventSource;
use graphics::Display;
use pmachine::{ExitReason, PMachine, RunOutcome, GLOBAL_QUIT};
use resource::{ResourceError, ResourceManager};

/// How a run of the game ended
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum GameExit {
    Finished,
    TickLimit,
}

pub struct Game {
    resources: ResourceManager,
}

impl Game {
    pub fn load(path: impl AsRef<Path>) -> Result<Game, ResourceError> {
        let game_path = path.as_ref();
        info!("Loading game from {}", game_path.display());

        // Everything is loaded up front; games of this era are small
        let resources = ResourceManager::load(game_path)?;
        Ok(Game { resources })
    }

    pub fn from_resources(resources: ResourceManager) -> Self {
        Game { resources }
    }

    pub fn resources(&self) -> &ResourceManager {
        &self.resources
    }

    /// Sends `play` to the game object and services suspensions until the game
    /// ends or `max_ticks` waits have passed.
    pub fn run(
        &self,
        config: EngineConfig,
        display: Box<dyn Display>,
        events: Box<dyn EventSource>,
        max_ticks: Option<usize>,
    ) -> VmResult<GameExit> {
        let mut pm = PMachine::new(&self.resources, config, display, events);
        pm.init_game()?;
        pm.send_to_game("play")?;

        let mut ticks = 0;
        loop {
            match pm.run() {
                RunOutcome::Continue => {}
                RunOutcome::Suspended(ExitReason::RestartGame) => {
                    pm.restart()?;
                    pm.send_to_game("play")?;
                }
                RunOutcome::Suspended(ExitReason::RestoreGame) => {
                    pm.reset_execution();
                    pm.send_to_game("replay")?;
                }
                RunOutcome::Suspended(ExitReason::Wait) => {
                    ticks += 1;
                    if max_ticks.is_some_and(|max| ticks >= max) {
                        info!("Stopping after {ticks} ticks");
                        return Ok(GameExit::TickLimit);
                    }
                    pm.resume();
                }
                RunOutcome::Done => {
                    if pm.global(GLOBAL_QUIT).is_zero_or_null() {
                        warn!("Game ended without setting quit");
                    }
                    return Ok(GameExit::Finished);
                }
                RunOutcome::Error(e) => return Err(e),
            }
        }
    }
}
