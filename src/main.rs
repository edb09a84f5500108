use std::io::{self, Write};
use std::process;

use anyhow::Context;
use clap::{arg, command, value_parser, ArgAction, ArgMatches, Command};

use regex_thompson_postfix::{MatcherMemory, Regex};

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args = command!()
        .arg_required_else_help(true)
        .subcommands(vec![match_command(), dot_command()])
        .get_matches();

    match args.subcommand() {
        Some(("match", args)) => exec_match(args),
        Some(("dot", args)) => exec_dot(args),
        _ => unreachable!(),
    }
}

fn match_command() -> Command {
    Command::new("match")
        .about("Match a postfix pattern against one or more inputs")
        .arg(arg!(<PATTERN>).help("Postfix pattern, e.g. `ab.cd.|+`"))
        .arg(
            arg!(<INPUT>)
                .help("Input string to match")
                .action(ArgAction::Append),
        )
        .arg(
            arg!(--"chunk-size" <N>)
                .help("Feed input in chunks of N characters (default: entire input at once)")
                .value_parser(value_parser!(usize)),
        )
        .arg(arg!(--debug).help("Print matcher state after each chunk"))
}

fn dot_command() -> Command {
    Command::new("dot")
        .about("Output DOT (Graphviz) representation of the NFA")
        .arg(arg!(<PATTERN>).help("Postfix pattern, e.g. `ab.cd.|+`"))
}

fn compile_pattern(pattern: &str) -> anyhow::Result<Regex> {
    Regex::parse(pattern).with_context(|| format!("cannot compile pattern `{pattern}`"))
}

fn exec_dot(args: &ArgMatches) -> anyhow::Result<()> {
    let pattern = args.get_one::<String>("PATTERN").unwrap();
    let regex = compile_pattern(pattern)?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    regex.to_dot(&mut out);
    out.flush()?;
    Ok(())
}

fn exec_match(args: &ArgMatches) -> anyhow::Result<()> {
    let pattern = args.get_one::<String>("PATTERN").unwrap();
    let inputs = args.get_many::<String>("INPUT").unwrap();
    let chunk_size = args.get_one::<usize>("chunk-size").copied();
    let debug = args.get_flag("debug");

    if chunk_size == Some(0) {
        anyhow::bail!("--chunk-size must be > 0");
    }

    let regex = compile_pattern(pattern)?;
    let mut memory = MatcherMemory::default();

    eprintln!("pattern: {pattern}");
    eprintln!("memory_size: {} bytes", regex.memory_size());
    if let Some(cs) = chunk_size {
        eprintln!("chunk_size: {cs}");
    }
    eprintln!();

    let mut any_failed = false;
    for input in inputs {
        let mut matcher = memory.matcher(&regex);

        if debug {
            eprintln!("--- input: {:?} ---", input);
            eprintln!("[init] {:#?}", matcher);
        }

        match chunk_size {
            None => {
                // Feed the entire input at once.
                matcher.chunk(input);
                if debug {
                    eprintln!("[after chunk({:?})] {:#?}", input, matcher);
                }
            }
            Some(cs) => {
                // Feed in chunks of cs characters.
                let chars: Vec<char> = input.chars().collect();
                for (i, chunk) in chars.chunks(cs).enumerate() {
                    let chunk: String = chunk.iter().collect();
                    matcher.chunk(&chunk);
                    if debug {
                        eprintln!("[after chunk #{} {:?}] {:#?}", i, chunk, matcher);
                    }
                }
            }
        }

        let matched = matcher.finish();

        if matched {
            println!("  \x1b[32mMATCH\x1b[0m  {:?}", input);
        } else {
            println!("  \x1b[31mNO MATCH\x1b[0m  {:?}", input);
            any_failed = true;
        }
    }

    if any_failed {
        process::exit(1);
    }

    Ok(())
}
