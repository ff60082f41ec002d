use std::collections::{HashMap, HashSet};

use crate::ir::{Instr, IrFunction, Op, Predicate, Value};

const MAX_ROUNDS: usize = 8;

/// Runs the function pass pipeline until nothing changes.
pub fn optimize_function(func: &mut IrFunction) {
    let mut body = match func.body.take() {
        Some(body) => body,
        None => return,
    };

    let mut changed = true;
    let mut rounds = 0;
    while changed && rounds < MAX_ROUNDS {
        changed = false;

        changed |= combine(&mut body);
        changed |= local_cse(&mut body);
        changed |= dce_temps(&mut body);

        rounds += 1;
    }

    func.temp_count = renumber_temps(&mut body);
    func.body = Some(body);
}

fn substitute(instr: &mut Instr, subst: &HashMap<usize, Value>) {
    for operand in instr.operands_mut() {
        if let Value::Temp(t) = *operand {
            if let Some(&value) = subst.get(&t) {
                *operand = value;
            }
        }
    }
}

fn is_bits(value: Value, bits: u64) -> bool {
    matches!(value, Value::Const(c) if c.to_bits() == bits)
}

/// what an instruction reduces to without being executed, if anything
fn simplify(instr: &Instr) -> Option<Value> {
    let one = 1.0f64.to_bits();
    let zero = 0.0f64.to_bits();
    let neg_zero = (-0.0f64).to_bits();

    match *instr {
        Instr::Binary {
            op,
            left: Value::Const(a),
            right: Value::Const(b),
            ..
        } => Some(Value::Const(op.apply(a, b))),
        Instr::Binary {
            op, left, right, ..
        } => match op {
            Op::Mul if is_bits(right, one) => Some(left),
            Op::Mul if is_bits(left, one) => Some(right),
            Op::Div if is_bits(right, one) => Some(left),
            Op::Sub if is_bits(right, zero) => Some(left),
            Op::Add if is_bits(right, neg_zero) => Some(left),
            Op::Add if is_bits(left, neg_zero) => Some(right),
            _ => None,
        },
        Instr::Compare {
            pred,
            left: Value::Const(a),
            right: Value::Const(b),
            ..
        } => Some(Value::Const(if pred.apply(a, b) { 1.0 } else { 0.0 })),
        Instr::BoolToFloat {
            src: Value::Const(c),
            ..
        } => Some(Value::Const(c)),
        _ => None,
    }
}

/// Constant folding and exact algebraic identities.
fn combine(body: &mut Vec<Instr>) -> bool {
    let mut subst = HashMap::new();
    let old = std::mem::take(body);

    for mut instr in old {
        substitute(&mut instr, &subst);
        match (instr.dest(), simplify(&instr)) {
            (Some(dest), Some(value)) => {
                subst.insert(dest, value);
            }
            _ => body.push(instr),
        }
    }

    !subst.is_empty()
}

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
enum ValueKey {
    Const(u64),
    Param(usize),
    Temp(usize),
}

impl From<Value> for ValueKey {
    fn from(value: Value) -> Self {
        match value {
            Value::Const(c) => ValueKey::Const(c.to_bits()),
            Value::Param(i) => ValueKey::Param(i),
            Value::Temp(t) => ValueKey::Temp(t),
        }
    }
}

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
enum ExprKey {
    Binary(Op, ValueKey, ValueKey),
    Compare(Predicate, ValueKey, ValueKey),
    BoolToFloat(ValueKey),
}

fn expr_key(instr: &Instr) -> Option<ExprKey> {
    match *instr {
        Instr::Binary {
            op, left, right, ..
        } => Some(ExprKey::Binary(op, left.into(), right.into())),
        Instr::Compare {
            pred, left, right, ..
        } => Some(ExprKey::Compare(pred, left.into(), right.into())),
        Instr::BoolToFloat { src, .. } => Some(ExprKey::BoolToFloat(src.into())),
        // calls may reach externs with side effects
        Instr::Call { .. } | Instr::Return(_) => None,
    }
}

/// Common subexpression elimination over the single entry block.
fn local_cse(body: &mut Vec<Instr>) -> bool {
    let mut seen: HashMap<ExprKey, usize> = HashMap::new();
    let mut subst = HashMap::new();
    let old = std::mem::take(body);

    for mut instr in old {
        substitute(&mut instr, &subst);
        if let (Some(key), Some(dest)) = (expr_key(&instr), instr.dest()) {
            if let Some(&prev) = seen.get(&key) {
                subst.insert(dest, Value::Temp(prev));
                continue;
            }
            seen.insert(key, dest);
        }
        body.push(instr);
    }

    !subst.is_empty()
}

/// Drops pure instructions whose result is never read.
fn dce_temps(body: &mut Vec<Instr>) -> bool {
    let used: HashSet<usize> = body
        .iter()
        .flat_map(Instr::operands)
        .filter_map(|value| match value {
            Value::Temp(t) => Some(t),
            _ => None,
        })
        .collect();

    let before = body.len();
    body.retain(|instr| match instr {
        Instr::Call { .. } | Instr::Return(_) => true,
        _ => instr.dest().map_or(true, |dest| used.contains(&dest)),
    });
    body.len() != before
}

/// Renumbers temporaries densely in definition order, returning the count.
fn renumber_temps(body: &mut Vec<Instr>) -> usize {
    let mut mapping = HashMap::new();
    for instr in body.iter_mut() {
        substitute(instr, &mapping);
        let next = mapping.len();
        let dest = match instr {
            Instr::Binary { dest, .. }
            | Instr::Compare { dest, .. }
            | Instr::BoolToFloat { dest, .. }
            | Instr::Call { dest, .. } => dest,
            Instr::Return(_) => continue,
        };
        mapping.insert(*dest, Value::Temp(next));
        *dest = next;
    }
    mapping.len()
}
