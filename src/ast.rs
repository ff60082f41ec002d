#[derive(Debug, PartialEq, Clone)]
pub struct Prototype {
    pub name: String,
    pub args: Vec<String>,
}

impl Prototype {
    pub fn new(name: impl Into<String>, args: Vec<String>) -> Self {
        Prototype {
            name: name.into(),
            args,
        }
    }

    /// the prototype of a top-level expression wrapper
    pub fn anonymous() -> Self {
        Prototype::new("", Vec::new())
    }

    pub fn is_anonymous(&self) -> bool {
        self.name.is_empty()
    }

    pub fn accept<V: Visitor>(&self, visitor: &mut V) -> V::ItemOutput {
        visitor.visit_prototype(self)
    }
}

#[derive(Debug, PartialEq, Clone)]
pub enum Expression {
    Literal(f64),
    Variable(String),
    Binary(char, Box<Expression>, Box<Expression>),
    Call(String, Vec<Expression>),
}

impl Expression {
    pub fn binary(op: char, lhs: Expression, rhs: Expression) -> Self {
        Expression::Binary(op, Box::new(lhs), Box::new(rhs))
    }

    pub fn accept<V: Visitor>(&self, visitor: &mut V) -> V::ExprOutput {
        match self {
            Expression::Literal(value) => visitor.visit_number(*value),
            Expression::Variable(name) => visitor.visit_variable(name),
            Expression::Binary(op, lhs, rhs) => visitor.visit_binary(*op, lhs, rhs),
            Expression::Call(callee, args) => visitor.visit_call(callee, args),
        }
    }
}

#[derive(Debug, PartialEq, Clone)]
pub struct Function {
    pub prototype: Prototype,
    pub body: Expression,
}

impl Function {
    /// wraps a bare expression so it can be generated like any other function
    pub fn anonymous(body: Expression) -> Self {
        Function {
            prototype: Prototype::anonymous(),
            body,
        }
    }

    pub fn accept<V: Visitor>(&self, visitor: &mut V) -> V::ItemOutput {
        visitor.visit_function(self)
    }
}

#[derive(Debug, PartialEq, Clone)]
pub enum ASTNode {
    Extern(Prototype),
    Function(Function),
}

impl ASTNode {
    pub fn accept<V: Visitor>(&self, visitor: &mut V) -> V::ItemOutput {
        match self {
            ASTNode::Extern(proto) => proto.accept(visitor),
            ASTNode::Function(func) => func.accept(visitor),
        }
    }
}

/// A consumer of the AST, one method per node kind.
///
/// Expressions produce `ExprOutput`, prototypes and functions produce
/// `ItemOutput`, so a code generator can hand back values for the former and
/// function handles for the latter.
pub trait Visitor {
    type ExprOutput;
    type ItemOutput;

    fn visit_number(&mut self, value: f64) -> Self::ExprOutput;
    fn visit_variable(&mut self, name: &str) -> Self::ExprOutput;
    fn visit_call(&mut self, callee: &str, args: &[Expression]) -> Self::ExprOutput;
    fn visit_binary(&mut self, op: char, lhs: &Expression, rhs: &Expression)
        -> Self::ExprOutput;
    fn visit_prototype(&mut self, proto: &Prototype) -> Self::ItemOutput;
    fn visit_function(&mut self, function: &Function) -> Self::ItemOutput;
}
