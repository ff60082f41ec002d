//! Executes IR functions in-process.

use std::collections::HashMap;

use lazy_static::lazy_static;

use crate::ir::{FunctionId, Instr, IrFunction, Module, Value};

/// Deepest call chain allowed before giving up. Without conditionals every
/// recursive function recurses forever, so this only needs to be generous
/// enough for straight call chains.
pub const MAX_CALL_DEPTH: usize = 256;

#[derive(Debug, PartialEq, Clone, thiserror::Error)]
pub enum ExecutionError {
    #[error("no function named {0} in module")]
    MissingFunction(String),
    #[error("unresolved extern {0}")]
    UnresolvedExtern(String),
    #[error("function {0} expects {1} args found {2}")]
    InvalidCall(String, usize, usize),
    #[error("call depth exceeded {0}")]
    CallDepthExceeded(usize),
    #[error("malformed function {0}: {1}")]
    Malformed(String, String),
    #[error("jit failed: {0}")]
    Jit(String),
}

#[derive(Clone, Copy)]
pub struct HostFunction {
    pub arity: usize,
    pub func: fn(&[f64]) -> f64,
}

fn host(arity: usize, func: fn(&[f64]) -> f64) -> HostFunction {
    HostFunction { arity, func }
}

pub(crate) fn putchard(args: &[f64]) -> f64 {
    eprint!("{}", char::from(args[0] as u8));
    0.0
}

pub(crate) fn printd(args: &[f64]) -> f64 {
    eprintln!("{:.6}", args[0]);
    0.0
}

lazy_static! {
    /// Runtime functions an `extern` can bind to.
    pub static ref HOST_FUNCTIONS: HashMap<&'static str, HostFunction> = {
        let mut table = HashMap::new();
        table.insert("sin", host(1, |a| a[0].sin()));
        table.insert("cos", host(1, |a| a[0].cos()));
        table.insert("tan", host(1, |a| a[0].tan()));
        table.insert("sqrt", host(1, |a| a[0].sqrt()));
        table.insert("exp", host(1, |a| a[0].exp()));
        table.insert("log", host(1, |a| a[0].ln()));
        table.insert("fabs", host(1, |a| a[0].abs()));
        table.insert("pow", host(2, |a| a[0].powf(a[1])));
        table.insert("putchard", host(1, putchard));
        table.insert("printd", host(1, printd));
        table
    };
}

/// Calls into a module by interpretation.
pub struct Engine<'m> {
    module: &'m Module,
    depth: usize,
}

impl<'m> Engine<'m> {
    pub fn new(module: &'m Module) -> Self {
        Engine { module, depth: 0 }
    }

    pub fn run(&mut self, id: FunctionId, args: &[f64]) -> Result<f64, ExecutionError> {
        let module = self.module;
        let func = module
            .function(id)
            .ok_or_else(|| ExecutionError::MissingFunction(format!("#{}", id.0)))?;
        self.call_function(func, args)
    }

    fn call(&mut self, name: &str, args: &[f64]) -> Result<f64, ExecutionError> {
        let module = self.module;
        let func = module
            .function_named(name)
            .ok_or_else(|| ExecutionError::MissingFunction(name.to_string()))?;
        self.call_function(func, args)
    }

    fn call_function(&mut self, func: &'m IrFunction, args: &[f64]) -> Result<f64, ExecutionError> {
        let name = func.name.as_str();
        if func.params.len() != args.len() {
            return Err(ExecutionError::InvalidCall(
                name.to_string(),
                func.params.len(),
                args.len(),
            ));
        }

        let body = match &func.body {
            Some(body) => body,
            None => {
                let host = HOST_FUNCTIONS
                    .get(name)
                    .filter(|host| host.arity == args.len())
                    .ok_or_else(|| ExecutionError::UnresolvedExtern(name.to_string()))?;
                return Ok((host.func)(args));
            }
        };

        if self.depth >= MAX_CALL_DEPTH {
            return Err(ExecutionError::CallDepthExceeded(MAX_CALL_DEPTH));
        }
        self.depth += 1;
        let result = self.exec(name, body, func.temp_count, args);
        self.depth -= 1;
        result
    }

    fn exec(
        &mut self,
        name: &str,
        body: &[Instr],
        temp_count: usize,
        args: &[f64],
    ) -> Result<f64, ExecutionError> {
        let mut temps = vec![0.0; temp_count];
        let malformed = |what: String| ExecutionError::Malformed(name.to_string(), what);

        let load = |temps: &[f64], value: Value| -> Result<f64, ExecutionError> {
            match value {
                Value::Const(c) => Ok(c),
                Value::Param(i) => args
                    .get(i)
                    .copied()
                    .ok_or_else(|| malformed(format!("parameter {} out of range", i))),
                Value::Temp(t) => temps
                    .get(t)
                    .copied()
                    .ok_or_else(|| malformed(format!("%{} out of range", t))),
            }
        };

        for instr in body {
            let (dest, result) = match instr {
                Instr::Binary {
                    dest,
                    op,
                    left,
                    right,
                } => (*dest, op.apply(load(&temps, *left)?, load(&temps, *right)?)),
                Instr::Compare {
                    dest,
                    pred,
                    left,
                    right,
                } => {
                    let truth = pred.apply(load(&temps, *left)?, load(&temps, *right)?);
                    (*dest, if truth { 1.0 } else { 0.0 })
                }
                Instr::BoolToFloat { dest, src } => (*dest, load(&temps, *src)?),
                Instr::Call {
                    dest,
                    callee,
                    args: call_args,
                } => {
                    let mut values = Vec::with_capacity(call_args.len());
                    for arg in call_args {
                        values.push(load(&temps, *arg)?);
                    }
                    (*dest, self.call(callee, &values)?)
                }
                Instr::Return(value) => return load(&temps, *value),
            };

            match temps.get_mut(dest) {
                Some(slot) => *slot = result,
                None => return Err(malformed(format!("%{} out of range", dest))),
            }
        }

        Err(malformed("missing ret".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Op;

    fn module() -> Module {
        let mut module = Module::new("test");
        module.add_function(IrFunction::declaration("sqrt", vec!["x".to_string()]));
        module.add_function(IrFunction::declaration("nope", vec![]));
        module.add_function(IrFunction {
            name: "hyp".to_string(),
            params: vec!["a".to_string(), "b".to_string()],
            body: Some(vec![
                Instr::Binary {
                    dest: 0,
                    op: Op::Mul,
                    left: Value::Param(0),
                    right: Value::Param(0),
                },
                Instr::Binary {
                    dest: 1,
                    op: Op::Mul,
                    left: Value::Param(1),
                    right: Value::Param(1),
                },
                Instr::Binary {
                    dest: 2,
                    op: Op::Add,
                    left: Value::Temp(0),
                    right: Value::Temp(1),
                },
                Instr::Call {
                    dest: 3,
                    callee: "sqrt".to_string(),
                    args: vec![Value::Temp(2)],
                },
                Instr::Return(Value::Temp(3)),
            ]),
            temp_count: 4,
        });
        module.add_function(IrFunction {
            name: "forever".to_string(),
            params: vec![],
            body: Some(vec![
                Instr::Call {
                    dest: 0,
                    callee: "forever".to_string(),
                    args: vec![],
                },
                Instr::Return(Value::Temp(0)),
            ]),
            temp_count: 1,
        });
        module
    }

    #[test]
    fn calls_functions_and_host_externs() {
        let module = module();
        let id = module.get_function("hyp").unwrap();
        assert_eq!(Engine::new(&module).run(id, &[3.0, 4.0]), Ok(5.0));
    }

    #[test]
    fn unresolved_extern() {
        let module = module();
        let id = module.get_function("nope").unwrap();
        assert_eq!(
            Engine::new(&module).run(id, &[]),
            Err(ExecutionError::UnresolvedExtern("nope".to_string()))
        );
    }

    #[test]
    fn unbounded_recursion_is_stopped() {
        let module = module();
        let id = module.get_function("forever").unwrap();
        assert_eq!(
            Engine::new(&module).run(id, &[]),
            Err(ExecutionError::CallDepthExceeded(MAX_CALL_DEPTH))
        );
    }

    #[test]
    fn wrong_arg_count() {
        let module = module();
        let id = module.get_function("hyp").unwrap();
        assert_eq!(
            Engine::new(&module).run(id, &[1.0]),
            Err(ExecutionError::InvalidCall("hyp".to_string(), 2, 1))
        );
    }
}
