use std::collections::{HashMap, HashSet};

use crate::ast::{ASTNode, Expression, Function, Prototype, Visitor};
use crate::backend::{Backend, BackendError, Operator};

#[derive(Debug, PartialEq, Clone, thiserror::Error)]
pub enum CodegenError {
    #[error("undefined reference: {0}")]
    UndefinedReference(String),
    #[error("undefined function: {0}")]
    UndefinedFunction(String),
    #[error("invalid number of args in call {0} expected {1} found {2}")]
    ArityMismatch(String, usize, usize),
    #[error("invalid operator {0}")]
    InvalidOperator(char),
    #[error("failed to verify function {0}: {1}")]
    VerificationFailure(String, String),
    #[error("function {0} already has a body")]
    Redefinition(String),
    #[error("function {0} was declared with {1} params, redeclared with {2}")]
    PrototypeMismatch(String, usize, usize),
    #[error("parameter {1} appears twice in function {0}")]
    DuplicateParameter(String, String),
    #[error(transparent)]
    Backend(#[from] BackendError),
}

pub type CodegenResult<T> = Result<T, CodegenError>;

/// Lowers AST nodes into a backend module.
///
/// `named_values` is the symbol table of the function body being generated;
/// it only holds entries while `compile_fn` runs.
pub struct Codegen<B: Backend> {
    pub backend: B,
    named_values: HashMap<String, B::Value>,
}

impl<B: Backend> Codegen<B> {
    pub fn new(backend: B) -> Self {
        Codegen {
            backend,
            named_values: HashMap::new(),
        }
    }

    pub fn codegen_expr(&mut self, expr: &Expression) -> CodegenResult<B::Value> {
        expr.accept(self)
    }

    pub fn compile_proto(&mut self, proto: &Prototype) -> CodegenResult<B::Function> {
        proto.accept(self)
    }

    pub fn compile_fn(&mut self, function: &Function) -> CodegenResult<B::Function> {
        function.accept(self)
    }

    pub fn codegen(&mut self, ast_nodes: &[ASTNode]) -> CodegenResult<Vec<B::Function>> {
        ast_nodes.iter().map(|node| node.accept(self)).collect()
    }

    fn build_body(&mut self, func: B::Function, function: &Function) -> CodegenResult<()> {
        let params = self.backend.begin_body(func)?;

        self.named_values.reserve(params.len());
        for (name, value) in function.prototype.args.iter().zip(params) {
            self.named_values.insert(name.clone(), value);
        }

        let body = self.codegen_expr(&function.body)?;
        self.backend.emit_return(body)?;

        self.backend
            .verify(func)
            .map_err(|e| CodegenError::VerificationFailure(function.prototype.name.clone(), e))
    }
}

impl<B: Backend> Visitor for Codegen<B> {
    type ExprOutput = CodegenResult<B::Value>;
    type ItemOutput = CodegenResult<B::Function>;

    fn visit_number(&mut self, value: f64) -> Self::ExprOutput {
        Ok(self.backend.emit_constant(value))
    }

    fn visit_variable(&mut self, name: &str) -> Self::ExprOutput {
        match self.named_values.get(name) {
            Some(&var) => Ok(var),
            None => Err(CodegenError::UndefinedReference(name.to_string())),
        }
    }

    fn visit_call(&mut self, callee: &str, args: &[Expression]) -> Self::ExprOutput {
        let func = self
            .backend
            .get_function(callee)
            .ok_or_else(|| CodegenError::UndefinedFunction(callee.to_string()))?;

        let expected = self.backend.param_count(func);
        if expected != args.len() {
            return Err(CodegenError::ArityMismatch(
                callee.to_string(),
                expected,
                args.len(),
            ));
        }

        let mut gened_args = Vec::with_capacity(args.len());
        for arg in args {
            gened_args.push(self.codegen_expr(arg)?);
        }

        Ok(self.backend.emit_call(func, &gened_args)?)
    }

    fn visit_binary(&mut self, op: char, lhs: &Expression, rhs: &Expression) -> Self::ExprOutput {
        let lhs = self.codegen_expr(lhs)?;
        let rhs = self.codegen_expr(rhs)?;

        let operator = Operator::from_char(op).ok_or(CodegenError::InvalidOperator(op))?;
        Ok(self.backend.emit_binary(operator, lhs, rhs)?)
    }

    /// Returns the existing declaration for the name when its arity agrees,
    /// otherwise declares a new one.
    fn visit_prototype(&mut self, proto: &Prototype) -> Self::ItemOutput {
        let mut seen = HashSet::new();
        for arg in &proto.args {
            if !seen.insert(arg) {
                return Err(CodegenError::DuplicateParameter(
                    proto.name.clone(),
                    arg.clone(),
                ));
            }
        }

        match self.backend.get_function(&proto.name) {
            Some(func) => {
                let declared = self.backend.param_count(func);
                if declared != proto.args.len() {
                    return Err(CodegenError::PrototypeMismatch(
                        proto.name.clone(),
                        declared,
                        proto.args.len(),
                    ));
                }
                Ok(func)
            }
            None => Ok(self.backend.declare_function(proto)),
        }
    }

    /// Generates a body, rolling the module back if anything fails: a
    /// declaration made here is erased, an earlier one loses the partial body.
    fn visit_function(&mut self, function: &Function) -> Self::ItemOutput {
        let proto = &function.prototype;
        let existing = self.backend.get_function(&proto.name);
        if let Some(func) = existing {
            if self.backend.has_body(func) {
                return Err(CodegenError::Redefinition(proto.name.clone()));
            }
        }

        let func = self.compile_proto(proto)?;

        self.named_values.clear();
        let result = self.build_body(func, function);
        self.named_values.clear();

        match result {
            Ok(()) => {
                self.backend.set_param_names(func, &proto.args);
                self.backend.optimize(func);
                Ok(func)
            }
            Err(err) => {
                if existing.is_some() {
                    self.backend.strip_body(func);
                } else {
                    self.backend.erase_function(func);
                }
                Err(err)
            }
        }
    }
}
