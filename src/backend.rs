use std::fmt;

use crate::ast::Prototype;
use crate::engine::{Engine, ExecutionError};
use crate::ir::{self, FunctionId, Instr, IrFunction, Module, Op, Predicate, Value};
use crate::optimizer;

/// The arithmetic and comparison operators a backend can lower.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Add,
    Sub,
    Mul,
    Div,
    Less,
    Greater,
}

impl Operator {
    pub fn from_char(op: char) -> Option<Self> {
        match op {
            '+' => Some(Operator::Add),
            '-' => Some(Operator::Sub),
            '*' => Some(Operator::Mul),
            '/' => Some(Operator::Div),
            '<' => Some(Operator::Less),
            '>' => Some(Operator::Greater),
            _ => None,
        }
    }
}

#[derive(Debug, PartialEq, Clone, thiserror::Error)]
pub enum BackendError {
    #[error("no function is being built")]
    NoInsertionPoint,
    #[error("failed to build instruction: {0}")]
    Builder(String),
}

/// Builds functions of doubles inside a module and runs them.
///
/// The backend owns the insertion cursor: `begin_body` positions it at the
/// entry of a function, and the `emit_*` calls append there.
pub trait Backend {
    type Function: Copy + fmt::Debug;
    type Value: Copy + fmt::Debug;

    fn get_function(&self, name: &str) -> Option<Self::Function>;
    fn param_count(&self, function: Self::Function) -> usize;
    fn has_body(&self, function: Self::Function) -> bool;

    /// Adds a declaration with one double parameter per argument name.
    fn declare_function(&mut self, proto: &Prototype) -> Self::Function;
    fn set_param_names(&mut self, function: Self::Function, names: &[String]);

    /// Creates the entry block, moves the cursor there and returns the
    /// parameter values in order.
    fn begin_body(&mut self, function: Self::Function) -> Result<Vec<Self::Value>, BackendError>;

    fn emit_constant(&mut self, value: f64) -> Self::Value;
    fn emit_binary(
        &mut self,
        op: Operator,
        lhs: Self::Value,
        rhs: Self::Value,
    ) -> Result<Self::Value, BackendError>;
    fn emit_call(
        &mut self,
        callee: Self::Function,
        args: &[Self::Value],
    ) -> Result<Self::Value, BackendError>;
    fn emit_return(&mut self, value: Self::Value) -> Result<(), BackendError>;

    fn verify(&self, function: Self::Function) -> Result<(), String>;
    fn optimize(&mut self, function: Self::Function);

    /// Drops a function's body, leaving its declaration in place.
    fn strip_body(&mut self, function: Self::Function);
    fn erase_function(&mut self, function: Self::Function);

    /// Calls a zero argument function.
    fn invoke(&mut self, function: Self::Function) -> Result<f64, ExecutionError>;

    fn print_function(&self, function: Self::Function) -> String;
    fn verify_module(&self) -> Result<(), String>;
    fn module_dump(&self) -> String;
}

/// Backend over the crate's own IR, executed by [`Engine`].
#[derive(Debug, Default)]
pub struct IrBackend {
    pub module: Module,
    current: Option<FunctionId>,
}

impl IrBackend {
    pub fn new(module_name: &str) -> Self {
        IrBackend {
            module: Module::new(module_name),
            current: None,
        }
    }

    fn push(&mut self, make: impl FnOnce(usize) -> Instr) -> Result<Value, BackendError> {
        let id = self.current.ok_or(BackendError::NoInsertionPoint)?;
        let func = self
            .module
            .function_mut(id)
            .ok_or(BackendError::NoInsertionPoint)?;
        let body = func.body.as_mut().ok_or(BackendError::NoInsertionPoint)?;

        let dest = func.temp_count;
        func.temp_count += 1;
        body.push(make(dest));
        Ok(Value::Temp(dest))
    }

    fn name_of(&self, id: FunctionId) -> String {
        self.module
            .function(id)
            .map(|f| f.name.clone())
            .unwrap_or_default()
    }
}

impl Backend for IrBackend {
    type Function = FunctionId;
    type Value = Value;

    fn get_function(&self, name: &str) -> Option<FunctionId> {
        self.module.get_function(name)
    }

    fn param_count(&self, function: FunctionId) -> usize {
        self.module
            .function(function)
            .map_or(0, |f| f.params.len())
    }

    fn has_body(&self, function: FunctionId) -> bool {
        self.module
            .function(function)
            .map_or(false, |f| !f.is_declaration())
    }

    fn declare_function(&mut self, proto: &Prototype) -> FunctionId {
        self.module
            .add_function(IrFunction::declaration(&proto.name, proto.args.clone()))
    }

    fn set_param_names(&mut self, function: FunctionId, names: &[String]) {
        if let Some(func) = self.module.function_mut(function) {
            func.params = names.to_vec();
        }
    }

    fn begin_body(&mut self, function: FunctionId) -> Result<Vec<Value>, BackendError> {
        let func = self
            .module
            .function_mut(function)
            .ok_or(BackendError::NoInsertionPoint)?;
        func.body = Some(Vec::new());
        func.temp_count = 0;
        self.current = Some(function);
        Ok((0..func.params.len()).map(Value::Param).collect())
    }

    fn emit_constant(&mut self, value: f64) -> Value {
        Value::Const(value)
    }

    fn emit_binary(&mut self, op: Operator, lhs: Value, rhs: Value) -> Result<Value, BackendError> {
        let arith = match op {
            Operator::Add => Op::Add,
            Operator::Sub => Op::Sub,
            Operator::Mul => Op::Mul,
            Operator::Div => Op::Div,
            Operator::Less | Operator::Greater => {
                let pred = if op == Operator::Less {
                    Predicate::OrderedLess
                } else {
                    Predicate::UnorderedGreater
                };
                let flag = self.push(|dest| Instr::Compare {
                    dest,
                    pred,
                    left: lhs,
                    right: rhs,
                })?;
                return self.push(|dest| Instr::BoolToFloat { dest, src: flag });
            }
        };
        self.push(|dest| Instr::Binary {
            dest,
            op: arith,
            left: lhs,
            right: rhs,
        })
    }

    fn emit_call(&mut self, callee: FunctionId, args: &[Value]) -> Result<Value, BackendError> {
        let callee = self.name_of(callee);
        let args = args.to_vec();
        self.push(|dest| Instr::Call { dest, callee, args })
    }

    fn emit_return(&mut self, value: Value) -> Result<(), BackendError> {
        let id = self.current.take().ok_or(BackendError::NoInsertionPoint)?;
        let body = self
            .module
            .function_mut(id)
            .and_then(|f| f.body.as_mut())
            .ok_or(BackendError::NoInsertionPoint)?;
        body.push(Instr::Return(value));
        Ok(())
    }

    fn verify(&self, function: FunctionId) -> Result<(), String> {
        match self.module.function(function) {
            Some(func) => ir::verify_function(&self.module, func),
            None => Err(format!("function #{} is not in the module", function.0)),
        }
    }

    fn optimize(&mut self, function: FunctionId) {
        if let Some(func) = self.module.function_mut(function) {
            optimizer::optimize_function(func);
        }
    }

    fn strip_body(&mut self, function: FunctionId) {
        if self.current == Some(function) {
            self.current = None;
        }
        if let Some(func) = self.module.function_mut(function) {
            func.body = None;
            func.temp_count = 0;
        }
    }

    fn erase_function(&mut self, function: FunctionId) {
        if self.current == Some(function) {
            self.current = None;
        }
        self.module.remove_function(function);
    }

    fn invoke(&mut self, function: FunctionId) -> Result<f64, ExecutionError> {
        Engine::new(&self.module).run(function, &[])
    }

    fn print_function(&self, function: FunctionId) -> String {
        self.module
            .function(function)
            .map(|f| f.to_string())
            .unwrap_or_default()
    }

    fn verify_module(&self) -> Result<(), String> {
        ir::verify_module(&self.module)
    }

    fn module_dump(&self) -> String {
        self.module.to_string()
    }
}
