use grotto::interpreter::{Interpreter, StopReason};
use grotto::vm::Game;
use log::{debug, info};
use std::env;
use std::fs::File;
use std::io;
use std::io::prelude::*;

/// Instructions to execute between output flushes.
const BATCH: u64 = 50_000;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        println!("grotto - a version-3 Z-machine interpreter");
        println!();
        println!("Usage: {} <story_file.dat> [--seed N]", args[0]);
        println!();
        println!("The --seed option makes the random opcode deterministic,");
        println!("for reproducing play sessions.");
        return Ok(());
    }

    let story_path = &args[1];
    let mut seed = None;
    if args.len() >= 4 && args[2] == "--seed" {
        let n: u64 = args[3]
            .parse()
            .map_err(|_| format!("Invalid seed: {}", args[3]))?;
        seed = Some(n);
        info!("Deterministic random sequence, seed {}", n);
    }

    debug!("Loading story image: {}", story_path);
    let mut file = match File::open(story_path) {
        Ok(file) => file,
        Err(e) => {
            eprintln!("Error: cannot open story file '{}': {}", story_path, e);
            std::process::exit(1);
        }
    };
    let mut image = Vec::new();
    file.read_to_end(&mut image)?;

    let game = match Game::from_memory(image) {
        Ok(game) => game,
        Err(fault) => {
            eprintln!("Error: '{}' is not a playable story file: {}", story_path, fault);
            std::process::exit(1);
        }
    };
    info!("{}", game.header);

    let mut interp = match seed {
        Some(n) => Interpreter::new_predictable(game, n),
        None => Interpreter::new(game),
    };

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        let stop = interp.run(BATCH);
        print!("{}", interp.take_output());
        io::stdout().flush()?;
        match stop {
            StopReason::BudgetExhausted => {}
            StopReason::AwaitingInput => match lines.next() {
                Some(line) => interp.provide_input(&line?)?,
                // End of input: treat like walking away from the machine
                None => break,
            },
            StopReason::Halted => {
                debug!(
                    "halted after {} instructions",
                    interp.instruction_count()
                );
                break;
            }
            StopReason::Fault(fault) => {
                eprintln!("Fatal interpreter fault: {}", fault);
                std::process::exit(1);
            }
        }
    }
    Ok(())
}
