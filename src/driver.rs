use std::io::{self, Write};

use crate::backend::Backend;
use crate::codegen::{Codegen, CodegenError};
use crate::engine::ExecutionError;
use crate::lexer::Token;
use crate::parser::{Parser, ParserError};
use crate::printer;

#[derive(Debug, thiserror::Error)]
pub enum StatementError {
    #[error(transparent)]
    Parse(#[from] ParserError),
    #[error(transparent)]
    Codegen(#[from] CodegenError),
    #[error(transparent)]
    Execution(#[from] ExecutionError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    AwaitingTopLevel,
    Done,
}

#[derive(Debug, Clone)]
pub struct DriverOptions {
    pub prompt: String,
    /// pretty-print every parsed statement
    pub print_ast: bool,
    /// generate (and for top-level expressions, run) code
    pub codegen: bool,
    /// print IR for each generated function and the module at exit
    pub dump_ir: bool,
}

impl Default for DriverOptions {
    fn default() -> Self {
        DriverOptions {
            prompt: "ready> ".to_string(),
            print_ast: false,
            codegen: true,
            dump_ir: true,
        }
    }
}

/// The read-eval-print loop. Statement failures are reported on `out` and
/// never stop the loop; only I/O errors on `out` do.
pub struct Driver<I: Iterator<Item = char>, B: Backend, W: Write> {
    parser: Parser<I>,
    codegen: Codegen<B>,
    out: W,
    options: DriverOptions,
    state: State,
}

impl<I, B, W> Driver<I, B, W>
where
    I: Iterator<Item = char>,
    B: Backend,
    W: Write,
{
    pub fn new(parser: Parser<I>, backend: B, out: W, options: DriverOptions) -> Self {
        Driver {
            parser,
            codegen: Codegen::new(backend),
            out,
            options,
            state: State::AwaitingTopLevel,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn backend(&self) -> &B {
        &self.codegen.backend
    }

    pub fn into_output(self) -> W {
        self.out
    }

    pub fn into_parts(self) -> (B, W) {
        (self.codegen.backend, self.out)
    }

    pub fn run(&mut self) -> io::Result<()> {
        while self.state == State::AwaitingTopLevel {
            self.step()?;
        }

        if self.options.codegen && self.options.dump_ir {
            if let Err(e) = self.codegen.backend.verify_module() {
                writeln!(self.out, "error: module failed to verify: {}", e)?;
            }
            write!(self.out, "{}", self.codegen.backend.module_dump())?;
        }
        self.out.flush()
    }

    /// Handles one top-level statement.
    pub fn step(&mut self) -> io::Result<()> {
        write!(self.out, "{}", self.options.prompt)?;
        self.out.flush()?;

        // the first read of a statement happens here, after the prompt
        let token = self.parser.current().clone();
        match token {
            Token::Eof => self.state = State::Done,
            Token::Def => self.handle_definition()?,
            Token::Extern => self.handle_extern()?,
            Token::Char(';') => {
                self.parser.advance();
            }
            _ => self.handle_top_level_expression()?,
        }
        Ok(())
    }

    fn report(&mut self, err: &StatementError) -> io::Result<()> {
        writeln!(self.out, "error: {}", err)
    }

    fn show_ast(&mut self, render: impl FnOnce() -> String) -> io::Result<()> {
        if self.options.print_ast {
            writeln!(self.out, "{}", render())?;
        }
        Ok(())
    }

    fn show_ir(&mut self, func: B::Function) -> io::Result<()> {
        if self.options.dump_ir {
            write!(self.out, "{}", self.codegen.backend.print_function(func))?;
        }
        Ok(())
    }

    /// skip the offending token so the loop can make progress
    fn recover(&mut self, err: ParserError) -> io::Result<()> {
        self.report(&err.into())?;
        self.parser.advance();
        Ok(())
    }

    fn handle_definition(&mut self) -> io::Result<()> {
        let function = match self.parser.parse_definition() {
            Ok(function) => function,
            Err(err) => return self.recover(err),
        };
        self.show_ast(|| printer::print_function(&function))?;

        if self.options.codegen {
            match self.codegen.compile_fn(&function) {
                Ok(func) => {
                    self.show_ir(func)?;
                    writeln!(self.out, "Read a function definition")?;
                }
                Err(err) => self.report(&err.into())?,
            }
        }
        Ok(())
    }

    fn handle_extern(&mut self) -> io::Result<()> {
        let proto = match self.parser.parse_extern() {
            Ok(proto) => proto,
            Err(err) => return self.recover(err),
        };
        self.show_ast(|| printer::print_extern(&proto))?;

        if self.options.codegen {
            match self.codegen.compile_proto(&proto) {
                Ok(func) => {
                    self.show_ir(func)?;
                    writeln!(self.out, "Read an extern")?;
                }
                Err(err) => self.report(&err.into())?,
            }
        }
        Ok(())
    }

    /// Generates, runs and then discards the wrapper of a top-level expression.
    fn handle_top_level_expression(&mut self) -> io::Result<()> {
        let function = match self.parser.parse_top_level_expr() {
            Ok(function) => function,
            Err(err) => return self.recover(err),
        };
        self.show_ast(|| printer::print_function(&function))?;

        if !self.options.codegen {
            return Ok(());
        }

        let func = match self.codegen.compile_fn(&function) {
            Ok(func) => func,
            Err(err) => return self.report(&err.into()),
        };
        let shown = self.show_ir(func);
        let value = self.codegen.backend.invoke(func);
        self.codegen.backend.erase_function(func);
        shown?;

        match value {
            Ok(value) => writeln!(self.out, "Evaluated to {}", value),
            Err(err) => self.report(&err.into()),
        }
    }
}

/// Prints the token stream, one token per line, until end of input.
pub fn dump_tokens<I, W>(mut parser: Parser<I>, mut out: W) -> io::Result<()>
where
    I: Iterator<Item = char>,
    W: Write,
{
    loop {
        writeln!(out, "{}", parser.current())?;
        if *parser.current() == Token::Eof {
            return out.flush();
        }
        parser.advance();
    }
}
