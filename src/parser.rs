use std::{collections::HashMap, str::Chars};

use crate::ast::{ASTNode, Expression, Function, Prototype};
use crate::lexer::{Lexer, Token};

#[derive(Debug, PartialEq, Clone, thiserror::Error)]
pub enum ParserError {
    #[error("unknown token {0} when expecting an expression")]
    UnexpectedToken(Token),
    #[error("malformed number literal starting '{0}'")]
    MalformedNumber(String),
    #[error("expected ')' but found {0}")]
    ExpectedCloseParen(Token),
    #[error("expected ',' or ')' in argument list but found {0}")]
    ExpectedArgumentSeparator(Token),
    #[error("expected function name in prototype but found {0}")]
    ExpectedFunctionName(Token),
    #[error("expected '(' in prototype but found {0}")]
    ExpectedPrototypeOpen(Token),
    #[error("expected ')' to close prototype but found {0}")]
    ExpectedPrototypeClose(Token),
    #[error("statement nests more than {0} operators, calls or parentheses")]
    TooDeep(usize),
}

pub type PartialParseResult = Result<Expression, ParserError>;

/// Most operators, calls and parenthesised groups one statement may hold.
/// Every later pass walks the expression tree recursively, and its depth is
/// bounded by this count.
pub const MAX_NESTING: usize = 512;

/// The binary operators understood out of the box. Higher binds tighter.
pub fn default_precedence() -> HashMap<char, u32> {
    let mut operator_precedence = HashMap::new();
    operator_precedence.insert('<', 10);
    operator_precedence.insert('>', 10);
    operator_precedence.insert('+', 20);
    operator_precedence.insert('-', 20);
    operator_precedence.insert('*', 40);
    operator_precedence.insert('/', 40);
    operator_precedence
}

/// Recursive descent parser with a one token cursor.
///
/// Every `parse_*` method expects the cursor to sit on the first token of the
/// construct and leaves it on the first token after it.
///
/// Nothing is read from the input until the cursor is first looked at, so a
/// prompt can be written before the first token blocks.
pub struct Parser<I: Iterator<Item = char>> {
    lexer: Lexer<I>,
    current: Token,
    primed: bool,
    nesting: usize,
    pub operator_precedence: HashMap<char, u32>,
}

impl<'a> Parser<Chars<'a>> {
    pub fn for_source(source: &'a str) -> Self {
        Parser::new(Lexer::new(source.chars()))
    }
}

impl<I: Iterator<Item = char>> Parser<I> {
    pub fn new(lexer: Lexer<I>) -> Self {
        Self::with_precedence(lexer, default_precedence())
    }

    pub fn with_precedence(lexer: Lexer<I>, operator_precedence: HashMap<char, u32>) -> Self {
        Parser {
            lexer,
            current: Token::Eof,
            primed: false,
            nesting: 0,
            operator_precedence,
        }
    }

    /// Reads the first token if that has not happened yet.
    pub fn prime(&mut self) {
        if !self.primed {
            self.primed = true;
            self.current = self.lexer.next_token();
        }
    }

    pub fn current(&mut self) -> &Token {
        self.prime();
        &self.current
    }

    pub fn advance(&mut self) -> &Token {
        self.prime();
        self.current = self.lexer.next_token();
        &self.current
    }

    /// counts one more operator, call or group toward the statement's limit
    fn nest(&mut self) -> Result<(), ParserError> {
        self.nesting += 1;
        if self.nesting > MAX_NESTING {
            return Err(ParserError::TooDeep(MAX_NESTING));
        }
        Ok(())
    }

    fn begin_statement(&mut self) {
        self.prime();
        self.nesting = 0;
    }

    /// precedence of the current token if it is a known binary operator
    fn token_precedence(&self) -> Option<u32> {
        match self.current {
            Token::Char(op) => match self.operator_precedence.get(&op) {
                Some(&pr) if pr > 0 => Some(pr),
                _ => None,
            },
            _ => None,
        }
    }

    fn parse_number(&mut self, num: f64) -> PartialParseResult {
        self.advance();
        Ok(Expression::Literal(num))
    }

    fn parse_nested(&mut self) -> PartialParseResult {
        self.nest()?;
        self.advance();
        let res = self.parse_expr()?;
        if self.current != Token::Char(')') {
            return Err(ParserError::ExpectedCloseParen(self.current.clone()));
        }
        self.advance();
        Ok(res)
    }

    fn parse_identifier(&mut self, ident: String) -> PartialParseResult {
        self.advance();
        if self.current != Token::Char('(') {
            return Ok(Expression::Variable(ident));
        }
        self.nest()?;
        self.advance();

        let mut args = Vec::new();
        if self.current != Token::Char(')') {
            loop {
                args.push(self.parse_expr()?);

                match self.current {
                    Token::Char(')') => break,
                    Token::Char(',') => {
                        self.advance();
                    }
                    ref tok => return Err(ParserError::ExpectedArgumentSeparator(tok.clone())),
                }
            }
        }
        self.advance();

        Ok(Expression::Call(ident, args))
    }

    fn parse_primary(&mut self) -> PartialParseResult {
        match self.current {
            Token::Number(num) => self.parse_number(num),
            Token::Ident(ref ident) => {
                let ident = ident.clone();
                self.parse_identifier(ident)
            }
            Token::Char('(') => self.parse_nested(),
            Token::Error(ref text) => Err(ParserError::MalformedNumber(text.clone())),
            ref tok => Err(ParserError::UnexpectedToken(tok.clone())),
        }
    }

    /// Precedence climbing: folds `(op primary)*` onto `lhs` for every
    /// operator binding at least as tightly as `expr_precedence`.
    fn parse_rhs(&mut self, expr_precedence: u32, lhs: Expression) -> PartialParseResult {
        let mut result = lhs;

        loop {
            let (operator, precedence) = match (self.token_precedence(), &self.current) {
                (Some(pr), &Token::Char(op)) if pr >= expr_precedence => (op, pr),
                _ => return Ok(result),
            };
            self.nest()?;
            self.advance();

            let mut rhs = self.parse_primary()?;

            if let Some(next_precedence) = self.token_precedence() {
                if precedence < next_precedence {
                    rhs = self.parse_rhs(precedence + 1, rhs)?;
                }
            }

            result = Expression::binary(operator, result, rhs);
        }
    }

    pub fn parse_expr(&mut self) -> PartialParseResult {
        self.prime();
        let lhs = self.parse_primary()?;
        self.parse_rhs(0, lhs)
    }

    pub fn parse_prototype(&mut self) -> Result<Prototype, ParserError> {
        self.prime();
        let name = match self.current {
            Token::Ident(ref name) => name.clone(),
            ref tok => return Err(ParserError::ExpectedFunctionName(tok.clone())),
        };
        self.advance();

        if self.current != Token::Char('(') {
            return Err(ParserError::ExpectedPrototypeOpen(self.current.clone()));
        }

        let mut args = Vec::new();
        while let Token::Ident(arg) = self.advance() {
            args.push(arg.clone());
        }

        if self.current != Token::Char(')') {
            return Err(ParserError::ExpectedPrototypeClose(self.current.clone()));
        }
        self.advance();

        Ok(Prototype::new(name, args))
    }

    /// definition ::= 'def' prototype expression
    pub fn parse_definition(&mut self) -> Result<Function, ParserError> {
        self.begin_statement();
        self.advance();
        let prototype = self.parse_prototype()?;
        let body = self.parse_expr()?;
        Ok(Function { prototype, body })
    }

    /// external ::= 'extern' prototype
    pub fn parse_extern(&mut self) -> Result<Prototype, ParserError> {
        self.begin_statement();
        self.advance();
        self.parse_prototype()
    }

    pub fn parse_top_level_expr(&mut self) -> Result<Function, ParserError> {
        self.begin_statement();
        Ok(Function::anonymous(self.parse_expr()?))
    }

    /// Parses everything up to end of input, stopping at the first error.
    pub fn parse_program(&mut self) -> Result<Vec<ASTNode>, ParserError> {
        let mut ast = Vec::new();
        self.prime();

        loop {
            let node = match self.current {
                Token::Eof => return Ok(ast),
                Token::Char(';') => {
                    self.advance();
                    continue;
                }
                Token::Def => ASTNode::Function(self.parse_definition()?),
                Token::Extern => ASTNode::Extern(self.parse_extern()?),
                _ => ASTNode::Function(self.parse_top_level_expr()?),
            };
            ast.push(node);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn var(name: &str) -> Expression {
        Expression::Variable(name.to_string())
    }

    fn parse_expr(input: &str) -> PartialParseResult {
        Parser::for_source(input).parse_expr()
    }

    #[test]
    fn parse_expr_works() {
        let res = parse_expr("x + 1 * (2 - 3)").unwrap();
        let target = Expression::binary(
            '+',
            var("x"),
            Expression::binary(
                '*',
                Expression::Literal(1.0),
                Expression::binary('-', Expression::Literal(2.0), Expression::Literal(3.0)),
            ),
        );
        assert_eq!(res, target);
    }

    #[test]
    fn tighter_operator_groups_right() {
        let precedence = default_precedence();
        for (&op1, &p1) in &precedence {
            for (&op2, &p2) in &precedence {
                if p1 >= p2 {
                    continue;
                }
                let res = parse_expr(&format!("a {} b {} c", op1, op2)).unwrap();
                assert_eq!(
                    res,
                    Expression::binary(op1, var("a"), Expression::binary(op2, var("b"), var("c")))
                );
            }
        }
    }

    #[test]
    fn looser_operator_groups_left() {
        assert_eq!(
            parse_expr("a * b + c").unwrap(),
            Expression::binary('+', Expression::binary('*', var("a"), var("b")), var("c"))
        );
    }

    #[test]
    fn equal_precedence_is_left_associative() {
        for op in default_precedence().keys() {
            let res = parse_expr(&format!("a {0} b {0} c", op)).unwrap();
            assert_eq!(
                res,
                Expression::binary(*op, Expression::binary(*op, var("a"), var("b")), var("c"))
            );
        }
        assert_eq!(
            parse_expr("a - b + c").unwrap(),
            Expression::binary('+', Expression::binary('-', var("a"), var("b")), var("c"))
        );
    }

    #[test]
    fn mixed_chain() {
        // a < b + c * d - e
        assert_eq!(
            parse_expr("a < b + c * d - e").unwrap(),
            Expression::binary(
                '<',
                var("a"),
                Expression::binary(
                    '-',
                    Expression::binary('+', var("b"), Expression::binary('*', var("c"), var("d"))),
                    var("e"),
                ),
            )
        );
    }

    #[test]
    fn calls() {
        assert_eq!(
            parse_expr("foo(1, bar(x), 2 + 3)").unwrap(),
            Expression::Call(
                "foo".to_string(),
                vec![
                    Expression::Literal(1.0),
                    Expression::Call("bar".to_string(), vec![var("x")]),
                    Expression::binary('+', Expression::Literal(2.0), Expression::Literal(3.0)),
                ]
            )
        );
        assert_eq!(
            parse_expr("now()").unwrap(),
            Expression::Call("now".to_string(), vec![])
        );
    }

    #[test]
    fn unknown_operator_ends_expression() {
        let mut parser = Parser::for_source("a % b");
        assert_eq!(parser.parse_expr().unwrap(), var("a"));
        assert_eq!(parser.current(), &Token::Char('%'));
    }

    #[test]
    fn configured_operator_is_parsed() {
        let mut precedence = default_precedence();
        precedence.insert('%', 40);
        let mut parser = Parser::with_precedence(Lexer::new("a + b % c".chars()), precedence);
        assert_eq!(
            parser.parse_expr().unwrap(),
            Expression::binary('+', var("a"), Expression::binary('%', var("b"), var("c")))
        );
    }

    #[test]
    fn definition() {
        let mut parser = Parser::for_source("def foo(a b) a+b");
        assert_eq!(
            parser.parse_definition().unwrap(),
            Function {
                prototype: Prototype::new("foo", vec!["a".to_string(), "b".to_string()]),
                body: Expression::binary('+', var("a"), var("b")),
            }
        );
        assert_eq!(parser.current(), &Token::Eof);
    }

    #[test]
    fn extern_and_top_level() {
        let mut parser = Parser::for_source("extern sin(x); sin(1)");
        assert_eq!(
            parser.parse_program().unwrap(),
            vec![
                ASTNode::Extern(Prototype::new("sin", vec!["x".to_string()])),
                ASTNode::Function(Function::anonymous(Expression::Call(
                    "sin".to_string(),
                    vec![Expression::Literal(1.0)]
                ))),
            ]
        );
    }

    #[test]
    fn errors() {
        assert_eq!(
            parse_expr("foo(1 2)"),
            Err(ParserError::ExpectedArgumentSeparator(Token::Number(2.0)))
        );
        assert_eq!(
            parse_expr("(1 + 2"),
            Err(ParserError::ExpectedCloseParen(Token::Eof))
        );
        assert_eq!(
            parse_expr(")"),
            Err(ParserError::UnexpectedToken(Token::Char(')')))
        );
        assert_eq!(
            parse_expr("1 + 3.14.15"),
            Err(ParserError::MalformedNumber("3.14".to_string()))
        );
    }

    #[test]
    fn prototype_errors() {
        let mut parser = Parser::for_source("def 1(x) x");
        assert_eq!(
            parser.parse_definition(),
            Err(ParserError::ExpectedFunctionName(Token::Number(1.0)))
        );

        let mut parser = Parser::for_source("extern foo x");
        assert_eq!(
            parser.parse_extern(),
            Err(ParserError::ExpectedPrototypeOpen(Token::Ident("x".to_string())))
        );

        let mut parser = Parser::for_source("def foo(a, b) a");
        assert_eq!(
            parser.parse_definition(),
            Err(ParserError::ExpectedPrototypeClose(Token::Char(',')))
        );
    }

    fn chain(operators: usize) -> String {
        vec!["1"; operators + 1].join("+")
    }

    #[test]
    fn nesting_limit() {
        assert!(parse_expr(&chain(MAX_NESTING)).is_ok());
        assert_eq!(
            parse_expr(&chain(MAX_NESTING + 1)),
            Err(ParserError::TooDeep(MAX_NESTING))
        );

        let parens = format!("{}1{}", "(".repeat(MAX_NESTING + 1), ")".repeat(MAX_NESTING + 1));
        assert_eq!(parse_expr(&parens), Err(ParserError::TooDeep(MAX_NESTING)));

        let calls = format!("{}1{}", "f(".repeat(MAX_NESTING + 1), ")".repeat(MAX_NESTING + 1));
        assert_eq!(parse_expr(&calls), Err(ParserError::TooDeep(MAX_NESTING)));
    }

    #[test]
    fn nesting_limit_is_per_statement() {
        let source = format!("{0}; def f(x) {0}; {0}", chain(MAX_NESTING));
        let ast = Parser::for_source(&source).parse_program().unwrap();
        assert_eq!(ast.len(), 3);
    }

    #[test]
    fn input_is_read_lazily() {
        let polled = std::cell::Cell::new(false);
        let input = "1".chars().inspect(|_| polled.set(true));
        let mut parser = Parser::new(Lexer::new(input));
        assert!(!polled.get());
        assert_eq!(parser.current(), &Token::Number(1.0));
        assert!(polled.get());
    }
}
