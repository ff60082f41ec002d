use std::{collections::HashMap, fmt};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Const(f64),
    Param(usize),
    Temp(usize),
}

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub enum Op {
    Add,
    Sub,
    Mul,
    Div,
}

impl Op {
    pub fn apply(self, lhs: f64, rhs: f64) -> f64 {
        match self {
            Op::Add => lhs + rhs,
            Op::Sub => lhs - rhs,
            Op::Mul => lhs * rhs,
            Op::Div => lhs / rhs,
        }
    }

    fn mnemonic(self) -> &'static str {
        match self {
            Op::Add => "fadd",
            Op::Sub => "fsub",
            Op::Mul => "fmul",
            Op::Div => "fdiv",
        }
    }
}

/// Float comparison predicates. `UnorderedGreater` is true when either side
/// is NaN, `OrderedLess` is false in that case.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub enum Predicate {
    OrderedLess,
    UnorderedGreater,
}

impl Predicate {
    pub fn apply(self, lhs: f64, rhs: f64) -> bool {
        match self {
            Predicate::OrderedLess => lhs < rhs,
            Predicate::UnorderedGreater => !(lhs <= rhs),
        }
    }

    fn mnemonic(self) -> &'static str {
        match self {
            Predicate::OrderedLess => "olt",
            Predicate::UnorderedGreater => "ugt",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Instr {
    Binary {
        dest: usize,
        op: Op,
        left: Value,
        right: Value,
    },
    /// produces a boolean, only consumable by `BoolToFloat`
    Compare {
        dest: usize,
        pred: Predicate,
        left: Value,
        right: Value,
    },
    BoolToFloat {
        dest: usize,
        src: Value,
    },
    Call {
        dest: usize,
        callee: String,
        args: Vec<Value>,
    },
    Return(Value),
}

impl Instr {
    pub fn dest(&self) -> Option<usize> {
        match *self {
            Instr::Binary { dest, .. }
            | Instr::Compare { dest, .. }
            | Instr::BoolToFloat { dest, .. }
            | Instr::Call { dest, .. } => Some(dest),
            Instr::Return(_) => None,
        }
    }

    pub fn operands(&self) -> Vec<Value> {
        match self {
            Instr::Binary { left, right, .. } | Instr::Compare { left, right, .. } => {
                vec![*left, *right]
            }
            Instr::BoolToFloat { src, .. } => vec![*src],
            Instr::Call { args, .. } => args.clone(),
            Instr::Return(value) => vec![*value],
        }
    }

    pub fn operands_mut(&mut self) -> Vec<&mut Value> {
        match self {
            Instr::Binary { left, right, .. } | Instr::Compare { left, right, .. } => {
                vec![left, right]
            }
            Instr::BoolToFloat { src, .. } => vec![src],
            Instr::Call { args, .. } => args.iter_mut().collect(),
            Instr::Return(value) => vec![value],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IrFunction {
    pub name: String,
    pub params: Vec<String>,
    /// `None` for a declaration
    pub body: Option<Vec<Instr>>,
    pub temp_count: usize,
}

impl IrFunction {
    pub fn declaration(name: &str, params: Vec<String>) -> Self {
        IrFunction {
            name: name.to_string(),
            params,
            body: None,
            temp_count: 0,
        }
    }

    pub fn is_declaration(&self) -> bool {
        self.body.is_none()
    }

    fn display_name(&self) -> &str {
        if self.name.is_empty() {
            "__anon_expr"
        } else {
            &self.name
        }
    }

    fn fmt_value(&self, f: &mut fmt::Formatter<'_>, value: Value) -> fmt::Result {
        match value {
            Value::Const(c) => write!(f, "{:?}", c),
            Value::Param(i) => match self.params.get(i) {
                Some(name) => write!(f, "%{}", name),
                None => write!(f, "%arg{}", i),
            },
            Value::Temp(t) => write!(f, "%{}", t),
        }
    }

    fn fmt_instr(&self, f: &mut fmt::Formatter<'_>, instr: &Instr) -> fmt::Result {
        match instr {
            Instr::Binary {
                dest,
                op,
                left,
                right,
            } => {
                write!(f, "%{} = {} double ", dest, op.mnemonic())?;
                self.fmt_value(f, *left)?;
                write!(f, ", ")?;
                self.fmt_value(f, *right)
            }
            Instr::Compare {
                dest,
                pred,
                left,
                right,
            } => {
                write!(f, "%{} = fcmp {} double ", dest, pred.mnemonic())?;
                self.fmt_value(f, *left)?;
                write!(f, ", ")?;
                self.fmt_value(f, *right)
            }
            Instr::BoolToFloat { dest, src } => {
                write!(f, "%{} = uitofp i1 ", dest)?;
                self.fmt_value(f, *src)?;
                write!(f, " to double")
            }
            Instr::Call { dest, callee, args } => {
                write!(f, "%{} = call double @{}(", dest, callee)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "double ")?;
                    self.fmt_value(f, *arg)?;
                }
                write!(f, ")")
            }
            Instr::Return(value) => {
                write!(f, "ret double ")?;
                self.fmt_value(f, *value)
            }
        }
    }
}

impl fmt::Display for IrFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keyword = if self.is_declaration() {
            "declare"
        } else {
            "define"
        };
        write!(f, "{} double @{}(", keyword, self.display_name())?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "double %{}", param)?;
        }
        write!(f, ")")?;

        if let Some(body) = &self.body {
            writeln!(f, " {{")?;
            writeln!(f, "entry:")?;
            for instr in body {
                write!(f, "  ")?;
                self.fmt_instr(f, instr)?;
                writeln!(f)?;
            }
            write!(f, "}}")?;
        }
        writeln!(f)
    }
}

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub struct FunctionId(pub usize);

/// Destination container for every generated function.
///
/// Removed functions leave their slot free for the next one added, so a
/// long session of top-level expressions does not grow the module.
#[derive(Debug, Clone, Default)]
pub struct Module {
    pub name: String,
    functions: Vec<Option<IrFunction>>,
    free: Vec<usize>,
    by_name: HashMap<String, FunctionId>,
}

impl Module {
    pub fn new(name: &str) -> Self {
        Module {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn add_function(&mut self, function: IrFunction) -> FunctionId {
        let name = function.name.clone();
        let id = match self.free.pop() {
            Some(slot) => {
                self.functions[slot] = Some(function);
                FunctionId(slot)
            }
            None => {
                self.functions.push(Some(function));
                FunctionId(self.functions.len() - 1)
            }
        };
        self.by_name.insert(name, id);
        id
    }

    pub fn get_function(&self, name: &str) -> Option<FunctionId> {
        self.by_name.get(name).copied()
    }

    pub fn function(&self, id: FunctionId) -> Option<&IrFunction> {
        self.functions.get(id.0).and_then(Option::as_ref)
    }

    pub fn function_mut(&mut self, id: FunctionId) -> Option<&mut IrFunction> {
        self.functions.get_mut(id.0).and_then(Option::as_mut)
    }

    pub fn function_named(&self, name: &str) -> Option<&IrFunction> {
        self.get_function(name).and_then(|id| self.function(id))
    }

    pub fn remove_function(&mut self, id: FunctionId) -> Option<IrFunction> {
        let removed = self.functions.get_mut(id.0).and_then(Option::take)?;
        if self.by_name.get(&removed.name) == Some(&id) {
            self.by_name.remove(&removed.name);
        }
        self.free.push(id.0);
        Some(removed)
    }

    pub fn functions(&self) -> impl Iterator<Item = &IrFunction> {
        self.functions.iter().flatten()
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "; ModuleID = '{}'", self.name)?;
        for function in self.functions() {
            writeln!(f)?;
            write!(f, "{}", function)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Float,
    Bool,
}

fn check_operand(
    function: &IrFunction,
    kinds: &[Option<Kind>],
    value: Value,
    want: Kind,
) -> Result<(), String> {
    let kind = match value {
        Value::Const(_) => return Ok(()),
        Value::Param(i) if i < function.params.len() => Kind::Float,
        Value::Param(i) => return Err(format!("parameter {} out of range", i)),
        Value::Temp(t) => match kinds.get(t).copied().flatten() {
            Some(kind) => kind,
            None => return Err(format!("%{} used before definition", t)),
        },
    };
    if kind != want {
        return Err(format!("{:?} operand where {:?} was expected", kind, want));
    }
    Ok(())
}

/// Checks the structural invariants of one function body against its module.
pub fn verify_function(module: &Module, function: &IrFunction) -> Result<(), String> {
    let body = match &function.body {
        Some(body) => body,
        None => return Ok(()),
    };

    let mut kinds: Vec<Option<Kind>> = vec![None; function.temp_count];
    for (i, instr) in body.iter().enumerate() {
        let is_last = i + 1 == body.len();
        let result = match instr {
            Instr::Binary { left, right, .. } | Instr::Compare { left, right, .. } => {
                check_operand(function, &kinds, *left, Kind::Float)?;
                check_operand(function, &kinds, *right, Kind::Float)?;
                if let Instr::Compare { .. } = instr {
                    Kind::Bool
                } else {
                    Kind::Float
                }
            }
            Instr::BoolToFloat { src, .. } => {
                check_operand(function, &kinds, *src, Kind::Bool)?;
                Kind::Float
            }
            Instr::Call { callee, args, .. } => {
                let target = module
                    .function_named(callee)
                    .ok_or_else(|| format!("call to unknown function @{}", callee))?;
                if target.params.len() != args.len() {
                    return Err(format!(
                        "call to @{} passes {} arguments, expected {}",
                        callee,
                        args.len(),
                        target.params.len()
                    ));
                }
                for arg in args {
                    check_operand(function, &kinds, *arg, Kind::Float)?;
                }
                Kind::Float
            }
            Instr::Return(value) => {
                if !is_last {
                    return Err("ret is not the last instruction".to_string());
                }
                check_operand(function, &kinds, *value, Kind::Float)?;
                continue;
            }
        };

        if let Some(dest) = instr.dest() {
            match kinds.get_mut(dest) {
                Some(slot) if slot.is_none() => *slot = Some(result),
                Some(_) => return Err(format!("%{} defined twice", dest)),
                None => return Err(format!("%{} exceeds the temporary count", dest)),
            }
        }
    }

    match body.last() {
        Some(Instr::Return(_)) => Ok(()),
        _ => Err("body does not end in ret".to_string()),
    }
}

pub fn verify_module(module: &Module) -> Result<(), String> {
    for function in module.functions() {
        verify_function(module, function)
            .map_err(|e| format!("in @{}: {}", function.display_name(), e))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn add_function(module: &mut Module, body: Vec<Instr>, temp_count: usize) -> FunctionId {
        module.add_function(IrFunction {
            name: "f".to_string(),
            params: vec!["x".to_string()],
            body: Some(body),
            temp_count,
        })
    }

    #[test]
    fn display() {
        let mut module = Module::new("test");
        module.add_function(IrFunction::declaration("sin", vec!["x".to_string()]));
        add_function(
            &mut module,
            vec![
                Instr::Compare {
                    dest: 0,
                    pred: Predicate::OrderedLess,
                    left: Value::Param(0),
                    right: Value::Const(4.0),
                },
                Instr::BoolToFloat {
                    dest: 1,
                    src: Value::Temp(0),
                },
                Instr::Call {
                    dest: 2,
                    callee: "sin".to_string(),
                    args: vec![Value::Temp(1)],
                },
                Instr::Return(Value::Temp(2)),
            ],
            3,
        );
        let expected = "\
; ModuleID = 'test'

declare double @sin(double %x)

define double @f(double %x) {
entry:
  %0 = fcmp olt double %x, 4.0
  %1 = uitofp i1 %0 to double
  %2 = call double @sin(double %1)
  ret double %2
}
";
        assert_eq!(module.to_string(), expected);
        assert_eq!(verify_module(&module), Ok(()));
    }

    #[test]
    fn verifier_rejects_bad_bodies() {
        let mut module = Module::new("test");
        let id = add_function(&mut module, vec![], 0);
        let function = module.function(id).unwrap().clone();
        assert!(verify_function(&module, &function).is_err());

        let function = IrFunction {
            body: Some(vec![Instr::Return(Value::Temp(0))]),
            temp_count: 1,
            ..function
        };
        assert_eq!(
            verify_function(&module, &function),
            Err("%0 used before definition".to_string())
        );

        let function = IrFunction {
            body: Some(vec![
                Instr::Compare {
                    dest: 0,
                    pred: Predicate::UnorderedGreater,
                    left: Value::Param(0),
                    right: Value::Param(0),
                },
                Instr::Return(Value::Temp(0)),
            ]),
            ..function
        };
        assert!(verify_function(&module, &function).is_err());

        let function = IrFunction {
            body: Some(vec![
                Instr::Call {
                    dest: 0,
                    callee: "missing".to_string(),
                    args: vec![],
                },
                Instr::Return(Value::Temp(0)),
            ]),
            ..function
        };
        assert!(verify_function(&module, &function).is_err());
    }

    #[test]
    fn remove_function_frees_name() {
        let mut module = Module::new("test");
        let id = module.add_function(IrFunction::declaration("g", vec![]));
        assert_eq!(module.get_function("g"), Some(id));
        assert!(module.remove_function(id).is_some());
        assert_eq!(module.get_function("g"), None);
        assert!(module.function(id).is_none());
        assert!(module.remove_function(id).is_none());
    }

    #[test]
    fn freed_slots_are_reused() {
        let mut module = Module::new("test");
        let kept = module.add_function(IrFunction::declaration("sin", vec!["x".to_string()]));
        for _ in 0..100 {
            let anon = module.add_function(IrFunction::declaration("", vec![]));
            assert_ne!(anon, kept);
            module.remove_function(anon);
        }
        assert_eq!(module.functions.len(), 2);
        assert_eq!(module.get_function("sin"), Some(kept));
        assert_eq!(module.functions().count(), 1);
    }

    #[test]
    fn predicates_treat_nan_differently() {
        assert!(!Predicate::OrderedLess.apply(f64::NAN, 1.0));
        assert!(Predicate::UnorderedGreater.apply(f64::NAN, 1.0));
        assert!(Predicate::UnorderedGreater.apply(2.0, 1.0));
        assert!(!Predicate::UnorderedGreater.apply(1.0, 1.0));
    }
}
