//! LLVM backend, compiled in with the `llvm` feature.

use inkwell::{
    builder::Builder,
    context::Context,
    execution_engine::JitFunction,
    module::Module,
    passes::PassManager,
    targets::{InitializationConfig, Target},
    types::BasicMetadataTypeEnum,
    values::{BasicMetadataValueEnum, FloatValue, FunctionValue},
    FloatPredicate, OptimizationLevel,
};

use crate::ast::Prototype;
use crate::backend::{Backend, BackendError, Operator};
use crate::engine::{self, ExecutionError};

type EntryFunc = unsafe extern "C" fn() -> f64;

extern "C" fn jit_putchard(c: f64) -> f64 {
    engine::putchard(&[c])
}

extern "C" fn jit_printd(x: f64) -> f64 {
    engine::printd(&[x])
}

/// Runtime externs that live in this crate rather than in a system library,
/// so the JIT cannot find them by symbol lookup.
const RUNTIME_EXTERNS: [(&str, extern "C" fn(f64) -> f64); 2] =
    [("putchard", jit_putchard), ("printd", jit_printd)];

/// LLVM cannot look up an unnamed function by name, so top-level wrappers get
/// this one instead.
const ANON_NAME: &str = "__anon_expr";

fn builder_error(e: impl std::fmt::Display) -> BackendError {
    BackendError::Builder(e.to_string())
}

pub struct LlvmBackend<'a> {
    pub context: &'a Context,
    pub module: Module<'a>,
    pub builder: Builder<'a>,
    fpm: PassManager<FunctionValue<'a>>,
}

impl<'a> LlvmBackend<'a> {
    pub fn new(context: &'a Context, module_name: &str) -> Result<LlvmBackend<'a>, String> {
        Target::initialize_native(&InitializationConfig::default())?;

        let module = context.create_module(module_name);
        let builder = context.create_builder();

        let fpm = PassManager::create(&module);
        fpm.add_instruction_combining_pass();
        fpm.add_reassociate_pass();
        fpm.add_gvn_pass();
        fpm.add_cfg_simplification_pass();
        fpm.initialize();

        Ok(LlvmBackend {
            context,
            module,
            builder,
            fpm,
        })
    }
}

impl<'a> Backend for LlvmBackend<'a> {
    type Function = FunctionValue<'a>;
    type Value = FloatValue<'a>;

    fn get_function(&self, name: &str) -> Option<FunctionValue<'a>> {
        if name.is_empty() {
            return None;
        }
        self.module.get_function(name)
    }

    fn param_count(&self, function: FunctionValue<'a>) -> usize {
        function.count_params() as usize
    }

    fn has_body(&self, function: FunctionValue<'a>) -> bool {
        function.count_basic_blocks() > 0
    }

    fn declare_function(&mut self, proto: &Prototype) -> FunctionValue<'a> {
        let args_types = std::iter::repeat(self.context.f64_type())
            .take(proto.args.len())
            .map(|f| f.into())
            .collect::<Vec<BasicMetadataTypeEnum>>();

        let fn_type = self.context.f64_type().fn_type(&args_types, false);
        let name = if proto.is_anonymous() {
            ANON_NAME
        } else {
            proto.name.as_str()
        };
        let fn_val = self.module.add_function(name, fn_type, None);

        self.set_param_names(fn_val, &proto.args);
        fn_val
    }

    fn set_param_names(&mut self, function: FunctionValue<'a>, names: &[String]) {
        for (arg, name) in function.get_param_iter().zip(names) {
            arg.into_float_value().set_name(name);
        }
    }

    fn begin_body(&mut self, function: FunctionValue<'a>) -> Result<Vec<FloatValue<'a>>, BackendError> {
        let entry = self.context.append_basic_block(function, "entry");
        self.builder.position_at_end(entry);
        Ok(function
            .get_param_iter()
            .map(|arg| arg.into_float_value())
            .collect())
    }

    fn emit_constant(&mut self, value: f64) -> FloatValue<'a> {
        self.context.f64_type().const_float(value)
    }

    fn emit_binary(
        &mut self,
        op: Operator,
        lhs: FloatValue<'a>,
        rhs: FloatValue<'a>,
    ) -> Result<FloatValue<'a>, BackendError> {
        let predicate = match op {
            Operator::Add => return self.builder.build_float_add(lhs, rhs, "tmpadd").map_err(builder_error),
            Operator::Sub => return self.builder.build_float_sub(lhs, rhs, "tmpsub").map_err(builder_error),
            Operator::Mul => return self.builder.build_float_mul(lhs, rhs, "tmpmul").map_err(builder_error),
            Operator::Div => return self.builder.build_float_div(lhs, rhs, "tmpdiv").map_err(builder_error),
            Operator::Less => FloatPredicate::OLT,
            Operator::Greater => FloatPredicate::UGT,
        };

        let cmp = self
            .builder
            .build_float_compare(predicate, lhs, rhs, "tmpcmp")
            .map_err(builder_error)?;
        self.builder
            .build_unsigned_int_to_float(cmp, self.context.f64_type(), "booltmp")
            .map_err(builder_error)
    }

    fn emit_call(
        &mut self,
        callee: FunctionValue<'a>,
        args: &[FloatValue<'a>],
    ) -> Result<FloatValue<'a>, BackendError> {
        let argsv: Vec<BasicMetadataValueEnum> = args.iter().map(|&val| val.into()).collect();

        self.builder
            .build_call(callee, argsv.as_slice(), "tmp")
            .map_err(builder_error)?
            .try_as_basic_value()
            .left()
            .map(|value| value.into_float_value())
            .ok_or_else(|| BackendError::Builder("call produced no value".to_string()))
    }

    fn emit_return(&mut self, value: FloatValue<'a>) -> Result<(), BackendError> {
        self.builder
            .build_return(Some(&value))
            .map(|_| ())
            .map_err(builder_error)
    }

    fn verify(&self, function: FunctionValue<'a>) -> Result<(), String> {
        if function.verify(true) {
            Ok(())
        } else {
            Err("rejected by the llvm verifier".to_string())
        }
    }

    fn optimize(&mut self, function: FunctionValue<'a>) {
        self.fpm.run_on(&function);
    }

    fn strip_body(&mut self, function: FunctionValue<'a>) {
        for block in function.get_basic_blocks() {
            // deleting only fails for a block already detached from its parent
            let _ = unsafe { block.delete() };
        }
    }

    fn erase_function(&mut self, function: FunctionValue<'a>) {
        unsafe {
            function.delete();
        }
    }

    fn invoke(&mut self, function: FunctionValue<'a>) -> Result<f64, ExecutionError> {
        let name = function
            .get_name()
            .to_str()
            .map_err(|e| ExecutionError::Jit(e.to_string()))?
            .to_string();

        // MCJIT freezes the module it compiles, so each evaluation runs on a
        // snapshot and the session module stays open for new definitions
        let module = self.module.clone();
        let ee = module
            .create_jit_execution_engine(OptimizationLevel::None)
            .map_err(|e| ExecutionError::Jit(e.to_string()))?;

        for &(extern_name, host) in RUNTIME_EXTERNS.iter() {
            if let Some(decl) = module.get_function(extern_name) {
                if decl.count_basic_blocks() == 0 && decl.count_params() == 1 {
                    ee.add_global_mapping(&decl, host as usize);
                }
            }
        }

        let entry: JitFunction<EntryFunc> =
            unsafe { ee.get_function(&name) }.map_err(|e| ExecutionError::Jit(e.to_string()))?;

        Ok(unsafe { entry.call() })
    }

    fn print_function(&self, function: FunctionValue<'a>) -> String {
        function.print_to_string().to_string()
    }

    fn verify_module(&self) -> Result<(), String> {
        self.module.verify().map_err(|e| e.to_string())
    }

    fn module_dump(&self) -> String {
        self.module.print_to_string().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::{Codegen, CodegenError};
    use crate::parser::Parser;
    use pretty_assertions::assert_eq;

    fn define(codegen: &mut Codegen<LlvmBackend<'_>>, source: &str) -> Result<(), CodegenError> {
        let ast = Parser::for_source(source).parse_program().unwrap();
        codegen.codegen(&ast).map(|_| ())
    }

    fn eval(codegen: &mut Codegen<LlvmBackend<'_>>, source: &str) -> Result<f64, CodegenError> {
        let func = Parser::for_source(source).parse_top_level_expr().unwrap();
        let func = codegen.compile_fn(&func)?;
        let value = codegen.backend.invoke(func).unwrap();
        codegen.backend.erase_function(func);
        Ok(value)
    }

    fn param_name(function: FunctionValue<'_>, index: u32) -> String {
        function
            .get_nth_param(index)
            .unwrap()
            .into_float_value()
            .get_name()
            .to_string_lossy()
            .into_owned()
    }

    #[test]
    fn arithmetic() {
        let context = Context::create();
        let mut codegen = Codegen::new(LlvmBackend::new(&context, "test").unwrap());
        assert_eq!(eval(&mut codegen, "4 + 5 * 6"), Ok(34.0));
        assert_eq!(eval(&mut codegen, "(4+5)*6"), Ok(54.0));
        assert_eq!(eval(&mut codegen, "1 < 2"), Ok(1.0));
        assert_eq!(eval(&mut codegen, "1 > 2 + 3"), Ok(0.0));
        assert_eq!(codegen.backend.verify_module(), Ok(()));
    }

    #[test]
    fn calls_defined_and_library_functions() {
        let context = Context::create();
        let mut codegen = Codegen::new(LlvmBackend::new(&context, "test").unwrap());
        define(&mut codegen, "def foo(a b) a+b; extern sqrt(x)").unwrap();
        assert_eq!(eval(&mut codegen, "foo(3, 4)"), Ok(7.0));
        assert_eq!(eval(&mut codegen, "sqrt(foo(7, 9))"), Ok(4.0));
    }

    #[test]
    fn runtime_externs_resolve() {
        let context = Context::create();
        let mut codegen = Codegen::new(LlvmBackend::new(&context, "test").unwrap());
        define(&mut codegen, "extern putchard(c); extern printd(x)").unwrap();
        assert_eq!(eval(&mut codegen, "putchard(65) + printd(1.5)"), Ok(0.0));
    }

    #[test]
    fn undefined_function_leaves_no_trace() {
        let context = Context::create();
        let mut codegen = Codegen::new(LlvmBackend::new(&context, "test").unwrap());
        assert_eq!(
            define(&mut codegen, "def bar(x) nope(x)"),
            Err(CodegenError::UndefinedFunction("nope".to_string()))
        );
        assert!(codegen.backend.get_function("bar").is_none());
        assert_eq!(
            eval(&mut codegen, "bar(1)"),
            Err(CodegenError::UndefinedFunction("bar".to_string()))
        );
        assert_eq!(codegen.backend.verify_module(), Ok(()));
    }

    #[test]
    fn failed_body_keeps_earlier_declaration() {
        let context = Context::create();
        let mut codegen = Codegen::new(LlvmBackend::new(&context, "test").unwrap());
        define(&mut codegen, "extern later(n); def user(x) later(x)").unwrap();
        assert!(define(&mut codegen, "def later(a) b").is_err());

        let later = codegen.backend.get_function("later").unwrap();
        assert!(!codegen.backend.has_body(later));
        assert_eq!(param_name(later, 0), "n");
        assert_eq!(codegen.backend.verify_module(), Ok(()));

        define(&mut codegen, "def later(a) a - 1").unwrap();
        assert_eq!(param_name(later, 0), "a");
        assert_eq!(eval(&mut codegen, "user(10)"), Ok(9.0));
    }

    #[test]
    fn redefinition_is_rejected() {
        let context = Context::create();
        let mut codegen = Codegen::new(LlvmBackend::new(&context, "test").unwrap());
        define(&mut codegen, "def f(x) x").unwrap();
        assert_eq!(
            define(&mut codegen, "def f(x) x + 1"),
            Err(CodegenError::Redefinition("f".to_string()))
        );
        assert_eq!(eval(&mut codegen, "f(2)"), Ok(2.0));
    }
}
