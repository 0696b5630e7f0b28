use recalc::{ExecuteMode, MapEnvironment, Runner, Value, disassemble};

const USAGE: &str = "Usage: recalc [--vm] [--disasm] [--json] [--no-sort] [--var name=value]... <formula>...";

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.is_empty() {
        eprintln!("{}", USAGE);
        std::process::exit(1);
    }

    let mut use_vm = false;
    let mut disasm = false;
    let mut json = false;
    let mut sort = true;
    let mut vars: Vec<(String, String)> = Vec::new();
    let mut formulas: Vec<String> = Vec::new();

    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--vm" => use_vm = true,
            "--disasm" => disasm = true,
            "--json" => json = true,
            "--no-sort" => sort = false,
            "--var" => {
                let Some(pair) = iter.next() else {
                    eprintln!("--var expects name=value");
                    std::process::exit(1);
                };
                match pair.split_once('=') {
                    Some((name, value)) => vars.push((name.to_string(), value.to_string())),
                    None => {
                        eprintln!("--var expects name=value, got: {}", pair);
                        std::process::exit(1);
                    }
                }
            }
            "--help" | "-h" => {
                println!("{}", USAGE);
                return;
            }
            _ => formulas.push(arg),
        }
    }

    if formulas.is_empty() {
        eprintln!("{}", USAGE);
        std::process::exit(1);
    }

    let mut runner = Runner::new();
    runner.set_need_sort(sort);
    if use_vm {
        runner.set_mode(ExecuteMode::ChunkVm);
    }

    let sources: Vec<&str> = formulas.iter().map(String::as_str).collect();

    if disasm {
        let chunk = match runner.compile_source(&sources) {
            Ok(chunk) => chunk,
            Err(e) => {
                eprintln!("Compile error: {}", e);
                std::process::exit(1);
            }
        };
        match disassemble(&chunk) {
            Ok(listing) => print!("{}", listing),
            Err(e) => {
                eprintln!("Disassembly error: {}", e);
                std::process::exit(1);
            }
        }
        return;
    }

    let mut env = MapEnvironment::new();
    for (name, value) in &vars {
        env.put(name, parse_value(value));
    }

    let results = match runner.execute_batch(&sources, &mut env) {
        Ok(results) => results,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    if json {
        match serde_json::to_string_pretty(&results) {
            Ok(out) => println!("{}", out),
            Err(e) => {
                eprintln!("Serialization error: {}", e);
                std::process::exit(1);
            }
        }
        return;
    }

    for (source, result) in sources.iter().zip(&results) {
        match result {
            Some(result) => match &result.outcome {
                Ok(value) => println!("{} => {}", source, value),
                Err(message) => println!("{} => error: {}", source, message),
            },
            None => println!("{} => (skipped)", source),
        }
    }
}

/// Interpret a --var value the way the lexer would: integer, then
/// decimal, then boolean, else a plain string.
fn parse_value(raw: &str) -> Value {
    if let Ok(v) = raw.parse::<i64>() {
        return Value::Int(v);
    }
    if let Ok(v) = raw.parse::<f64>() {
        return Value::Double(v);
    }
    match raw {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        "null" => Value::Null,
        _ => Value::Str(raw.to_string()),
    }
}
