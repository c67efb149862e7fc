use std::{env, fs, io, path::Path};

use tracing_subscriber::EnvFilter;

use deckvars::bytecode::disasm::print_program;
use deckvars::store::VarKind;
use deckvars::{VariableStore, load_deck};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let args: Vec<String> = env::args().collect();

    let bytecode = args.contains(&"--bc".to_string()) || args.contains(&"--bytecode".to_string());
    let quiet = args.contains(&"--quiet".to_string()) || args.contains(&"-q".to_string());
    let help = args.contains(&"--help".to_string()) || args.contains(&"-h".to_string());

    // first non-flag argument is the filename
    let filename = args.iter().skip(1).find(|a| !a.starts_with('-'));

    match filename {
        Some(filename) if !help => {
            ensure_extension(filename);
            match fs::read_to_string(filename) {
                Ok(source) => run_deck(&source, bytecode, quiet),
                Err(e) => {
                    eprintln!("Failed to read '{}': {}", filename, e);
                    std::process::exit(1);
                }
            }
        }
        _ => print_usage(),
    }
}

fn ensure_extension(filename: &str) {
    let path = Path::new(filename);
    if path.extension().and_then(|e| e.to_str()) != Some("vars") {
        eprintln!("Error: expected a .vars file, got {}", filename);
        std::process::exit(1);
    }
}

fn print_usage() {
    println!("DECKVARS - named-variable formula engine");
    println!();
    println!("Usage:");
    println!("  deckvars <file.vars>          Load a deck, print results and variables");
    println!("  deckvars --bc <file.vars>     Also show the bytecode of every formula");
    println!("  deckvars --quiet <file.vars>  Only show `print` results");
    println!("  deckvars --help, -h           Show this help");
    println!();
    println!("Set RUST_LOG=debug to trace compilation and evaluation.");
}

fn run_deck(source: &str, bytecode: bool, quiet: bool) {
    let mut store = VariableStore::new();

    let report = match load_deck(source, &mut store) {
        Ok(report) => report,
        Err(e) => {
            eprintln!("Deck error: {}", e);
            if let deckvars::DeckError::Engine { source, .. } = &e {
                if let Some(hint) = source.hint() {
                    eprintln!("  hint: {}", hint);
                }
                if let deckvars::EngineError::Compile(err) = source.root_cause() {
                    eprintln!("{}", err.pointer());
                }
            }
            std::process::exit(1);
        }
    };

    for (expr, value) in &report.printed {
        println!("{} => {}", expr, value);
    }

    if quiet {
        return;
    }

    println!();
    println!("=== VARIABLES ===");
    if let Err(e) = store.write_all(&mut io::stdout()) {
        eprintln!("Failed to write variables: {}", e);
        std::process::exit(1);
    }

    if bytecode {
        println!();
        println!("=== BYTECODE ===");
        for var in store.iter() {
            if let VarKind::Formula(program) = var.kind() {
                print_program(var.name(), program, store.registry(), &store);
            }
        }
    }
}
