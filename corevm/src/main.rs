use clap::Parser as ClapParser;
use std::{
    panic,
    process,
    sync::{Arc, Barrier},
};

use corevm::{
    Destination, Dictionary, Fault, Function, LivenessRecord, LivenessTable,
    MarkFn, Stack, StackCreateInfo, Thread, ThreadCreateInfo, ThreadRegistry,
    Value, scan_all, spawn,
};

#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[arg(long, default_value_t = 4, help = "Number of mutator threads")]
    threads: usize,

    #[arg(long, default_value_t = 64, help = "Frames pushed by each mutator")]
    depth: usize,

    /// Defaults to room for 10 000 frames of ten cells
    #[arg(long, help = "Stack arena size in bytes per thread")]
    stack_size: Option<usize>,

    #[arg(long, default_value_t = 1000, help = "Keys put into the dictionary")]
    keys: usize,

    #[arg(short, long, action = clap::ArgAction::Count, help = "More logging (-v, -vv, -vvv)")]
    verbose: u8,
}

fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(level),
    )
    .init();

    if let Err(fault) = run(&cli) {
        eprintln!("Error: {fault}");
        process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<(), Fault> {
    scan_mutators(cli)?;
    fill_dictionary(cli.keys);
    Ok(())
}

/// Two arguments, both references, live for the whole native body.
fn demo_function() -> Arc<Function> {
    Function::native(
        "demo",
        3,
        LivenessTable::new(vec![
            LivenessRecord::new(0, 0, 0),
            LivenessRecord::new(0, 0, 1),
        ]),
    )
}

fn fake_object(level: usize, argument: usize) -> Value {
    Value::from_address(0x10_0000 + ((level * 2 + argument) as u64) * 16)
}

/// Pushes `depth` frames. Every argument is produced by a nested call, so
/// each frame spends some time reserved but not yet committed.
fn build_chain(
    stack: &mut Stack,
    function: &Arc<Function>,
    depth: usize,
) -> Result<(), Fault> {
    for level in 0..depth {
        let mut argument = 0;
        stack.push_with_arguments(
            Value::from_usize(level),
            function.frame_size(),
            2,
            function.clone(),
            Destination::Discard,
            None,
            |stack, buffer| {
                stack.push(
                    Value::zero(),
                    function.clone(),
                    Destination::Discard,
                    None,
                    &[Value::from_usize(argument)],
                )?;
                stack.pop();
                buffer.push(fake_object(level, argument));
                argument += 1;
                Ok(())
            },
        )?;
    }
    Ok(())
}

fn scan_mutators(cli: &Cli) -> Result<(), Fault> {
    let registry = ThreadRegistry::global();
    let parked = Arc::new(Barrier::new(cli.threads + 1));
    let resumed = Arc::new(Barrier::new(cli.threads + 1));
    let function = demo_function();

    let mut workers = Vec::with_capacity(cli.threads);
    for index in 0..cli.threads {
        let info = ThreadCreateInfo {
            name: Some(format!("mutator-{index}")),
            stack: StackCreateInfo {
                size: cli.stack_size,
            },
        };
        let parked = parked.clone();
        let resumed = resumed.clone();
        let function = function.clone();
        let depth = cli.depth;

        let worker = spawn(registry, info, move |thread: &mut Thread| {
            let built = build_chain(thread.stack_mut(), &function, depth);
            if let Err(fault) = &built {
                log::warn!("{} stopped early: {fault}", thread.id());
            }
            parked.wait();
            resumed.wait();
            built.map(|()| thread.stack().depth())
        })?;
        workers.push(worker);
    }

    parked.wait();
    let mut references = 0usize;
    let mut mark = MarkFn(|slot: &mut Value, _record: usize| {
        if slot.is_object() {
            references += 1;
        }
    });
    // SAFETY: every mutator is parked on `resumed` until the scan returned
    let stats = unsafe { scan_all(registry, &mut mark) };
    resumed.wait();

    println!(
        "scanned {} threads, {} frames, {} roots ({} references)",
        stats.threads, stats.frames, stats.roots, references
    );

    for worker in workers {
        match worker.join() {
            Ok(depth) => log::info!("mutator finished at depth {}", depth?),
            Err(payload) => panic::resume_unwind(payload),
        }
    }
    Ok(())
}

fn fill_dictionary(keys: usize) {
    let mut dictionary = Dictionary::new();
    for key in 0..keys {
        dictionary.put(format!("key-{key}"), Value::from_usize(key));
    }
    let buckets = dictionary.bucket_count();

    let removed = (0..keys)
        .step_by(2)
        .filter(|key| dictionary.remove(format!("key-{key}").as_str()).is_some())
        .count();

    println!(
        "dictionary: {} keys in {} buckets ({} removed, {} buckets after removal)",
        dictionary.len(),
        buckets,
        removed,
        dictionary.bucket_count()
    );
}
