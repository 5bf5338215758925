use anyhow::{Context, Result, anyhow};
use crossbeam::channel;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use tracklooper::audio::{AudioStream, LooperEngine};
use tracklooper::config::LooperConfig;
use tracklooper::control::transport::{open_serial, spawn_frame_reader, spawn_line_reader};
use tracklooper::control::{CommandDecoder, Controller, StateMachine};
use tracklooper::timing::Timers;

const DEFAULT_CONFIG: &str = "tracklooper.toml";

fn print_help() {
    println!("Tracklooper - hardware-controlled multitrack audio looper");
    println!();
    println!("USAGE:");
    println!("    tracklooper [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    -h, --help           Print this help message");
    println!("    --debug              Enable debug logging");
    println!("    --stdin              Read command frames from stdin, one per line");
    println!("    --config <path>      Config file (default: {})", DEFAULT_CONFIG);
    println!();
    println!("COMMAND FRAMES (6 bytes: cmd, track tens, track units, sub-cmd, group, end):");
    println!("    rTTxG  Record track TT into group G (sub-cmd 'r' loops the take)");
    println!("    oTTxG  Overdub track TT in group G");
    println!("    pTT    Play track TT / stop recording it");
    println!("    mTT    Mute track TT");
    println!("    uTT    Unmute track TT");
    println!("    tTTxG  Add track TT to group G");
    println!("    dTTxG  Remove track TT from group G");
    println!("    gG     Make group G active");
    println!("    s      Reset to passthrough");
    println!("    c      Calibrate (monitoring off)");
    println!("    q      Quit");
    println!();
    println!("Each frame is answered with 'p' (accepted) or 'f' (rejected).");
}

struct Args {
    debug: bool,
    stdin: bool,
    config: PathBuf,
}

fn parse_args() -> Result<Option<Args>> {
    let mut args = Args {
        debug: false,
        stdin: false,
        config: PathBuf::from(DEFAULT_CONFIG),
    };
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-h" | "--help" => return Ok(None),
            "--debug" => args.debug = true,
            "--stdin" => args.stdin = true,
            "--config" => {
                let path = iter
                    .next()
                    .ok_or_else(|| anyhow!("--config needs a path"))?;
                args.config = PathBuf::from(path);
            }
            other => return Err(anyhow!("Unknown argument '{}', try --help", other)),
        }
    }
    Ok(Some(args))
}

fn main() -> Result<()> {
    let Some(args) = parse_args()? else {
        print_help();
        return Ok(());
    };

    let default_filter = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    let config = LooperConfig::load(&args.config)?;
    log::info!(
        "{} tracks, {} groups, {}s per track at {}Hz",
        config.num_tracks,
        config.num_groups,
        config.track_max_seconds,
        config.sample_rate
    );

    let timers = Arc::new(Timers::new());
    let shutdown = Arc::new(AtomicBool::new(false));

    let (engine, handle) = LooperEngine::new(&config, Arc::clone(&timers));
    let machine = StateMachine::new(&config, handle, Arc::clone(&timers), Arc::clone(&shutdown));

    // Everything that can fail at startup fails before audio starts.
    let (tx, rx) = channel::unbounded();
    let reply: Box<dyn Write + Send> = if args.stdin {
        spawn_line_reader(std::io::BufReader::new(std::io::stdin()), tx)?;
        Box::new(std::io::stdout())
    } else {
        let (reader, writer) = open_serial(&config.serial)?;
        spawn_frame_reader(reader, config.serial.frame_length, tx)?;
        Box::new(writer)
    };

    let audio = AudioStream::new(&config).context("Failed to open audio devices")?;
    let _streams = audio
        .start(engine)
        .context("Failed to start audio streams")?;

    let controller = Controller::new(
        CommandDecoder::new(config.num_tracks, config.num_groups),
        machine,
        rx,
        reply,
        Arc::clone(&timers),
        Arc::clone(&shutdown),
    )
    .spawn()?;

    while !shutdown.load(Ordering::Acquire) && !controller.is_finished() {
        thread::sleep(Duration::from_millis(100));
    }

    let result = controller
        .join()
        .unwrap_or_else(|_| Err(anyhow!("Control thread panicked")));

    let report = timers.report();
    log::info!("Timing report:\n{}", report);
    println!("{}", report);
    println!("Tracklooper stopped.");
    result
}
