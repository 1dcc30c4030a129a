use std::path::PathBuf;

use clap::builder::ValueHint;
use clap::Parser;
use log::info;

use sci::{
    config::{EngineConfig, SciVersion, SelectorPolicy},
    events::ScriptedEvents,
    graphics::NullDisplay,
    sdl::{SdlDisplay, SdlEvents},
    Game,
};

#[derive(Parser, Debug)]
struct Args {
    #[arg(value_name = "game", help = "Directory holding resource.map and its volumes", value_hint = ValueHint::DirPath, default_value = "game_data/CB")]
    game: PathBuf,

    #[arg(long, help = "Interpreter dialect, e.g. sci0 or sci1.1 (overrides SCI_VERSION)")]
    sci_version: Option<SciVersion>,

    #[arg(long, help = "What a send to a missing selector does: continue or stop")]
    selector_policy: Option<SelectorPolicy>,

    #[arg(long, help = "Return 0 from kernel calls the interpreter has no handler for instead of stopping")]
    stub_missing_kernel: bool,

    #[arg(long, help = "Run without a window or input and without real time waits")]
    headless: bool,

    #[arg(long, help = "Stop after this many ticks")]
    max_ticks: Option<usize>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let mut config = EngineConfig::from_env();
    if let Some(version) = args.sci_version {
        config.version = version;
    }
    if let Some(policy) = args.selector_policy {
        config.selector_policy = policy;
    }
    if args.stub_missing_kernel {
        config.stub_missing_kernel = true;
    }

    let game = Game::load(&args.game)?;
    let exit = if args.headless {
        config.throttle = false;
        game.run(
            config,
            Box::<NullDisplay>::default(),
            Box::<ScriptedEvents>::default(),
            args.max_ticks,
        )?
    } else {
        let sdl_context = sdl2::init()?;
        let display = SdlDisplay::init(&sdl_context)?;
        let events = SdlEvents::init(&sdl_context)?;
        game.run(config, Box::new(display), Box::new(events), args.max_ticks)?
    };
    info!("Game exited: {exit:?}");

    Ok(())
}
