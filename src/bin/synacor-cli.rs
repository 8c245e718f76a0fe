use anyhow::{Context, Result};
use clap::Parser;
use signal_hook::consts::{SIGINT, SIGUSR1};
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use synacor_core::{
    control_channel, load_snapshot, supervise, Debugger, MachineState, Metadata, Reason, Vm,
};

#[derive(Parser, Debug)]
#[command(name = "synacor-cli")]
#[command(about = "Run, debug and dissect Synacor Challenge program images", long_about = None)]
struct Args {
    /// Program binary, or a snapshot when --save is given
    image: PathBuf,

    /// Treat the image as a snapshot instead of a program binary
    #[arg(long)]
    save: bool,

    /// Write a snapshot when machine input reaches EOF
    #[arg(long = "save-on-eof")]
    save_on_eof: bool,

    /// Metadata file to load and update
    #[arg(long, default_value = ".metadata")]
    metadata: PathBuf,

    /// Start the interactive debugger
    #[arg(long)]
    debug: bool,

    /// Read machine input from this file instead of stdin
    #[arg(long = "in")]
    input: Option<PathBuf>,
}

fn main() {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            let _ = err.print();
            std::process::exit(1);
        }
    };
    let code = match run(args) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            1
        }
    };
    std::process::exit(code);
}

fn run(args: Args) -> Result<i32> {
    let state = if args.save {
        let (info, state) = load_snapshot(&args.image)
            .with_context(|| format!("failed to load snapshot {}", args.image.display()))?;
        eprintln!(
            "resuming snapshot from {} at ip {}",
            info.created, info.ip
        );
        state
    } else {
        MachineState::from_program_file(&args.image)
            .with_context(|| format!("failed to load program {}", args.image.display()))?
    };
    let meta = Metadata::load(&args.metadata, state.mem.len());

    let mut vm = Vm::new(state, meta);
    vm.metadata_file = args.metadata.clone();
    vm.save_on_eof = args.save_on_eof;
    vm.debugging = args.debug;
    vm.stdout = Box::new(std::io::stdout());
    vm.stdin = match &args.input {
        Some(path) => Box::new(BufReader::new(File::open(path).with_context(|| {
            format!("error opening input file {}", path.display())
        })?)),
        None => Box::new(BufReader::new(std::io::stdin())),
    };

    signal_hook::flag::register(SIGUSR1, vm.save_signal.clone())
        .context("registering save signal")?;
    if args.debug {
        signal_hook::flag::register(SIGINT, vm.break_signal.clone())
            .context("registering break signal")?;
    }

    let (runner, control) = control_channel();
    let handle = std::thread::spawn(move || runner.run(vm));
    let outcome = if args.debug {
        Debugger::new(control).run()
    } else {
        supervise(control)
    };
    let (mut vm, reason) = outcome.context("control channel failed")?;
    let _ = handle.join();

    println!(
        "program finished: {reason} after {} instructions",
        vm.counter
    );
    if let Err(err) = vm.save_metadata() {
        eprintln!("failed to save metadata: {err}");
    }
    Ok(match reason {
        Reason::Fault(_) => 2,
        _ => 0,
    })
}
