use std::process;

use clap::error::ErrorKind;
use clap::{Parser, ValueEnum};
use snafu::{ResultExt, Snafu};

use exprcc::tokenizer::{Token, describe_token, tokenize};
use exprcc::{
  CodegenOptions, CompileError, Machine, MachineError, Syntax, compile, expression_from_args,
  generate_assembly, parser,
};

/// Translate an integer arithmetic expression into x86-64 assembly.
#[derive(Debug, Parser)]
#[command(name = "exprcc", version)]
struct Cli {
  /// Expression to translate, e.g. "2+3*4" (put it after `--` if it starts with `-`)
  #[arg(value_name = "EXPR", allow_negative_numbers = true)]
  exprs: Vec<String>,

  /// Assembler dialect of the listing
  #[arg(long, default_value_t = Syntax::Intel)]
  syntax: Syntax,

  /// Global symbol the listing defines
  #[arg(long, default_value = "main")]
  entry: String,

  /// What to print
  #[arg(long, value_enum, default_value_t = Emit::Asm)]
  emit: Emit,

  /// Log pipeline stages to stderr (default filter `debug` instead of `warn`)
  #[arg(short, long)]
  verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Emit {
  /// Assembly listing
  Asm,
  /// Token stream
  Tokens,
  /// Syntax tree as an S-expression
  Ast,
  /// Value the generated code returns
  Value,
}

#[derive(Debug, Snafu)]
enum DriverError {
  #[snafu(display("{source}"))]
  Usage { source: CompileError },

  #[snafu(display("{}", source.render(input)))]
  Compile {
    input: String,
    source: CompileError,
  },

  #[snafu(display("{input}: {source}"))]
  Execute {
    input: String,
    source: MachineError,
  },
}

fn init_logging(verbose: bool) {
  let default_filter = if verbose { "debug" } else { "warn" };
  env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
    .init();
}

fn render_tokens(tokens: &[Token], source: &str) -> String {
  tokens
    .iter()
    .map(|token| {
      let kind = format!("{:?}", token.kind);
      format!(
        "{:>4} {kind:<10} {}\n",
        token.loc,
        describe_token(Some(token), source)
      )
    })
    .collect()
}

fn run(cli: &Cli) -> Result<String, DriverError> {
  let expr = expression_from_args(&cli.exprs).context(UsageSnafu)?;

  match cli.emit {
    Emit::Asm => {
      let options = CodegenOptions {
        syntax: cli.syntax,
        entry: cli.entry.clone(),
      };
      generate_assembly(expr, &options).context(CompileSnafu { input: expr })
    }
    Emit::Tokens => {
      let tokens = tokenize(expr).context(CompileSnafu { input: expr })?;
      Ok(render_tokens(&tokens, expr))
    }
    Emit::Ast => {
      let tokens = tokenize(expr).context(CompileSnafu { input: expr })?;
      let root = parser::parse(tokens, expr).context(CompileSnafu { input: expr })?;
      Ok(format!("{root}\n"))
    }
    Emit::Value => {
      let program = compile(expr).context(CompileSnafu { input: expr })?;
      let value = Machine::new()
        .run(&program)
        .context(ExecuteSnafu { input: expr })?;
      Ok(format!("{value}\n"))
    }
  }
}

fn main() {
  let cli = match Cli::try_parse() {
    Ok(cli) => cli,
    Err(err) if matches!(err.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
      err.exit()
    }
    Err(err) => {
      let _ = err.print();
      process::exit(1);
    }
  };

  init_logging(cli.verbose);

  match run(&cli) {
    Ok(output) => print!("{output}"),
    Err(err) => {
      eprintln!("{err}");
      process::exit(1);
    }
  }
}
