//! LISP-style rendering of the AST, and a reader that turns that rendering
//! back into nodes.

use lazy_static::lazy_static;
use regex::Regex;

use crate::ast::{ASTNode, Expression, Function, Prototype, Visitor};

/// Renders nodes fully parenthesised in prefix form, two spaces of
/// indentation per nesting level, one operand per line.
#[derive(Debug, Default)]
pub struct LispPrinter {
    out: String,
    nesting_depth: usize,
}

impl LispPrinter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn finish(self) -> String {
        self.out
    }

    fn indent(&mut self) {
        for _ in 0..self.nesting_depth {
            self.out.push_str("  ");
        }
    }

    fn nested<F: FnOnce(&mut Self)>(&mut self, f: F) {
        self.nesting_depth += 1;
        f(self);
        self.nesting_depth -= 1;
    }
}

impl Visitor for LispPrinter {
    type ExprOutput = ();
    type ItemOutput = ();

    fn visit_number(&mut self, value: f64) {
        self.indent();
        self.out.push_str(&value.to_string());
    }

    fn visit_variable(&mut self, name: &str) {
        self.indent();
        self.out.push_str(name);
    }

    fn visit_call(&mut self, callee: &str, args: &[Expression]) {
        self.indent();
        self.out.push('(');
        self.out.push_str(callee);
        self.nested(|p| {
            for arg in args {
                p.out.push('\n');
                arg.accept(p);
            }
        });
        self.out.push(')');
    }

    fn visit_binary(&mut self, op: char, lhs: &Expression, rhs: &Expression) {
        self.indent();
        self.out.push('(');
        self.out.push(op);
        self.out.push('\n');
        self.nested(|p| {
            lhs.accept(p);
            p.out.push('\n');
            rhs.accept(p);
        });
        self.out.push(')');
    }

    fn visit_prototype(&mut self, proto: &Prototype) {
        self.out.push('(');
        self.out.push_str(&proto.name);
        for arg in &proto.args {
            self.out.push(' ');
            self.out.push_str(arg);
        }
        self.out.push(')');
    }

    fn visit_function(&mut self, function: &Function) {
        self.out.push_str("(def ");
        function.prototype.accept(self);
        self.out.push('\n');
        self.nested(|p| function.body.accept(p));
        self.out.push(')');
    }
}

pub fn print_function(function: &Function) -> String {
    let mut printer = LispPrinter::new();
    function.accept(&mut printer);
    printer.finish()
}

pub fn print_extern(proto: &Prototype) -> String {
    let mut printer = LispPrinter::new();
    printer.out.push_str("(extern ");
    proto.accept(&mut printer);
    printer.out.push(')');
    printer.finish()
}

pub fn print_node(node: &ASTNode) -> String {
    match node {
        ASTNode::Function(func) => print_function(func),
        ASTNode::Extern(proto) => print_extern(proto),
    }
}

#[derive(Debug, PartialEq, Clone, thiserror::Error)]
pub enum ReadError {
    #[error("unexpected end of input")]
    UnexpectedEnd,
    #[error("unexpected {0:?}")]
    Unexpected(String),
    #[error("binary operator {0} needs exactly two operands, found {1}")]
    Operands(char, usize),
    #[error("invalid number {0}")]
    Number(String),
}

#[derive(Debug, PartialEq, Clone)]
enum Atom {
    Open,
    Close,
    Number(String),
    Symbol(String),
    Operator(char),
}

lazy_static! {
    static ref ATOM_RE: Regex = Regex::new(
        &[
            r"(?P<open>\()",
            r"(?P<close>\))",
            r"(?P<number>\d+\.?\d*|\.\d+)",
            r"(?P<symbol>[A-Za-z][A-Za-z0-9_]*)",
            r"(?P<operator>[^\s()])",
        ]
        .join("|")
    )
    .unwrap();
}

/// split printed text into atoms - returns a stack, so first-on last-off
fn atoms(input: &str) -> Vec<Atom> {
    let mut res = Vec::new();
    for cap in ATOM_RE.captures_iter(input) {
        let atom = if cap.name("open").is_some() {
            Atom::Open
        } else if cap.name("close").is_some() {
            Atom::Close
        } else if let Some(num) = cap.name("number") {
            Atom::Number(num.as_str().to_string())
        } else if let Some(sym) = cap.name("symbol") {
            Atom::Symbol(sym.as_str().to_string())
        } else {
            // the operator group matches any single remaining character
            let op = &cap[0];
            Atom::Operator(op.chars().next().unwrap_or_default())
        };
        res.push(atom);
    }
    res.reverse();
    res
}

fn describe(atom: Atom) -> ReadError {
    ReadError::Unexpected(match atom {
        Atom::Open => "(".to_string(),
        Atom::Close => ")".to_string(),
        Atom::Number(n) | Atom::Symbol(n) => n,
        Atom::Operator(c) => c.to_string(),
    })
}

fn pop(input: &mut Vec<Atom>) -> Result<Atom, ReadError> {
    input.pop().ok_or(ReadError::UnexpectedEnd)
}

fn expect(input: &mut Vec<Atom>, want: Atom) -> Result<(), ReadError> {
    match pop(input)? {
        ref got if *got == want => Ok(()),
        got => Err(describe(got)),
    }
}

fn read_symbol(input: &mut Vec<Atom>) -> Result<String, ReadError> {
    match pop(input)? {
        Atom::Symbol(sym) => Ok(sym),
        other => Err(describe(other)),
    }
}

fn read_prototype(input: &mut Vec<Atom>) -> Result<Prototype, ReadError> {
    expect(input, Atom::Open)?;
    let name = match pop(input)? {
        Atom::Close => return Ok(Prototype::anonymous()),
        Atom::Symbol(sym) => sym,
        other => return Err(describe(other)),
    };
    let mut args = Vec::new();
    loop {
        match pop(input)? {
            Atom::Close => return Ok(Prototype::new(name, args)),
            Atom::Symbol(arg) => args.push(arg),
            other => return Err(describe(other)),
        }
    }
}

fn read_expr(input: &mut Vec<Atom>) -> Result<Expression, ReadError> {
    match pop(input)? {
        Atom::Number(num) => num
            .parse()
            .map(Expression::Literal)
            .map_err(|_| ReadError::Number(num)),
        Atom::Symbol(name) => Ok(Expression::Variable(name)),
        Atom::Open => {
            let head = pop(input)?;
            let mut operands = Vec::new();
            while input.last() != Some(&Atom::Close) {
                operands.push(read_expr(input)?);
            }
            input.pop();

            match head {
                Atom::Symbol(callee) => Ok(Expression::Call(callee, operands)),
                Atom::Operator(op) => {
                    if operands.len() != 2 {
                        return Err(ReadError::Operands(op, operands.len()));
                    }
                    let rhs = operands.pop();
                    let lhs = operands.pop();
                    match (lhs, rhs) {
                        (Some(lhs), Some(rhs)) => Ok(Expression::binary(op, lhs, rhs)),
                        _ => Err(ReadError::Operands(op, 0)),
                    }
                }
                other => Err(describe(other)),
            }
        }
        other => Err(describe(other)),
    }
}

fn read_node(input: &mut Vec<Atom>) -> Result<ASTNode, ReadError> {
    expect(input, Atom::Open)?;
    let node = match read_symbol(input)?.as_str() {
        "def" => {
            let prototype = read_prototype(input)?;
            let body = read_expr(input)?;
            ASTNode::Function(Function { prototype, body })
        }
        "extern" => ASTNode::Extern(read_prototype(input)?),
        other => return Err(ReadError::Unexpected(other.to_string())),
    };
    expect(input, Atom::Close)?;
    Ok(node)
}

/// Reads back every node in text produced by [`print_node`].
pub fn read(input: &str) -> Result<Vec<ASTNode>, ReadError> {
    let mut atoms = atoms(input);
    let mut nodes = Vec::new();
    while !atoms.is_empty() {
        nodes.push(read_node(&mut atoms)?);
    }
    Ok(nodes)
}
