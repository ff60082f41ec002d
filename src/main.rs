use std::{
    fs::File,
    io::{self, BufReader, Read},
};

use anyhow::{anyhow, bail, Context};
use clap::{App, Arg};
use kaleidoscope_jit::{
    driver::{self, Driver, DriverOptions},
    lexer::{self, Lexer},
    parser::{self, Parser},
    Backend, IrBackend, MODULE_NAME,
};

/// parse an `OP=N` precedence override
fn parse_precedence(spec: &str) -> anyhow::Result<(char, u32)> {
    let (op, level) = spec
        .split_once('=')
        .ok_or_else(|| anyhow!("precedence {} is not of the form OP=N", spec))?;

    let mut chars = op.chars();
    let op = match (chars.next(), chars.next()) {
        (Some(c), None) if !(c.is_ascii_alphanumeric() || "(),;#.".contains(c)) => c,
        _ => bail!("{} cannot be used as a binary operator", op),
    };

    let level = level
        .parse()
        .with_context(|| format!("invalid precedence level in {}", spec))?;
    Ok((op, level))
}

fn run<I, B>(parser: Parser<I>, backend: B, options: DriverOptions) -> anyhow::Result<()>
where
    I: Iterator<Item = char>,
    B: Backend,
{
    let stderr = io::stderr();
    let mut driver = Driver::new(parser, backend, stderr.lock(), options);
    driver.run()?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let matches = App::new("kaleidoscope-jit")
        .version(env!("CARGO_PKG_VERSION"))
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .arg(
            Arg::with_name("FILE")
                .help("read source from FILE instead of stdin")
                .index(1),
        )
        .arg(
            Arg::with_name("print-ast")
                .long("print-ast")
                .help("pretty-print every parsed statement"),
        )
        .arg(
            Arg::with_name("parse-only")
                .long("parse-only")
                .help("parse without generating or running code"),
        )
        .arg(
            Arg::with_name("tokens")
                .long("tokens")
                .help("print the token stream and exit"),
        )
        .arg(
            Arg::with_name("quiet")
                .short("q")
                .long("quiet")
                .help("do not dump generated IR"),
        )
        .arg(
            Arg::with_name("precedence")
                .long("precedence")
                .value_name("OP=N")
                .takes_value(true)
                .multiple(true)
                .number_of_values(1)
                .help("set the precedence of a binary operator"),
        )
        .arg(
            Arg::with_name("prompt")
                .long("prompt")
                .takes_value(true)
                .help("prompt printed before each statement"),
        )
        .arg(
            Arg::with_name("backend")
                .long("backend")
                .takes_value(true)
                .possible_values(&["interp", "llvm"])
                .default_value("interp")
                .help("code generation backend"),
        )
        .get_matches();

    let mut operator_precedence = parser::default_precedence();
    for spec in matches.values_of("precedence").into_iter().flatten() {
        let (op, level) = parse_precedence(spec)?;
        operator_precedence.insert(op, level);
    }

    let input: Box<dyn Read> = match matches.value_of("FILE") {
        Some(path) => Box::new(BufReader::new(
            File::open(path).with_context(|| format!("failed to open {}", path))?,
        )),
        None => Box::new(io::stdin()),
    };
    let chars = lexer::chars(input, |e| eprintln!("error: failed to read input: {}", e));
    let parser = Parser::with_precedence(Lexer::new(chars), operator_precedence);

    if matches.is_present("tokens") {
        let stdout = io::stdout();
        driver::dump_tokens(parser, stdout.lock())?;
        return Ok(());
    }

    let defaults = DriverOptions::default();
    let options = DriverOptions {
        prompt: matches
            .value_of("prompt")
            .map_or(defaults.prompt, str::to_string),
        print_ast: matches.is_present("print-ast"),
        codegen: !matches.is_present("parse-only"),
        dump_ir: !matches.is_present("quiet"),
    };

    match matches.value_of("backend").unwrap_or("interp") {
        #[cfg(feature = "llvm")]
        "llvm" => {
            let context = inkwell::context::Context::create();
            let backend = kaleidoscope_jit::llvm::LlvmBackend::new(&context, MODULE_NAME)
                .map_err(|e| anyhow!("failed to initialise llvm: {}", e))?;
            run(parser, backend, options)
        }
        "interp" => run(parser, IrBackend::new(MODULE_NAME), options),
        other => bail!("backend {} is not available in this build", other),
    }
}
