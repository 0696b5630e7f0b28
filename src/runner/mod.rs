use std::collections::BTreeSet;

use tracing::debug;

use crate::Error;
use crate::analysis::FormulaInfo;
use crate::ast::Expr;
use crate::env::{Environment, Field};
use crate::functions::FunctionRegistry;
use crate::interpreter::Evaluator;
use crate::lexer::scan;
use crate::parser::Parser;
use crate::schedule::Scheduler;
use crate::value::Value;
use crate::vm::{Chunk, ChunkReader, Compiler, ExResult, Vm};

/// Which backend executes the batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecuteMode {
    /// Walk each expression tree directly.
    #[default]
    SyntaxTree,
    /// Compile the whole batch to one chunk and run it on the VM.
    ChunkVm,
}

/// Batch results indexed by original formula position. A slot is
/// `None` when the duplicate-writer rule dropped that formula from
/// the schedule.
pub type BatchResults = Vec<Option<ExResult>>;

/// The whole pipeline: parse → analyze → dependency-sort → execute,
/// with either backend. One `Runner` serves one batch at a time; run
/// concurrent batches on separate runners.
pub struct Runner {
    need_sort: bool,
    mode: ExecuteMode,
    functions: FunctionRegistry,
}

impl Default for Runner {
    fn default() -> Self {
        Runner::new()
    }
}

impl Runner {
    pub fn new() -> Self {
        Runner {
            need_sort: true,
            mode: ExecuteMode::default(),
            functions: FunctionRegistry::with_builtins(),
        }
    }

    pub fn need_sort(&self) -> bool {
        self.need_sort
    }

    pub fn set_need_sort(&mut self, need_sort: bool) {
        self.need_sort = need_sort;
    }

    pub fn mode(&self) -> ExecuteMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: ExecuteMode) {
        self.mode = mode;
    }

    pub fn functions(&self) -> &FunctionRegistry {
        &self.functions
    }

    pub fn functions_mut(&mut self) -> &mut FunctionRegistry {
        &mut self.functions
    }

    /// Evaluate a single formula.
    pub fn execute(&self, source: &str, env: &mut dyn Environment) -> Result<Value, Error> {
        let results = self.execute_batch(&[source], env)?;
        match results.into_iter().next().flatten() {
            Some(result) => result
                .outcome
                .map_err(|message| Error::Runtime(crate::value::RuntimeError::new(message))),
            None => Ok(Value::Null),
        }
    }

    /// Run a whole batch. Assignment formulas are reordered so that
    /// producers run before consumers; results map back to original
    /// batch positions.
    pub fn execute_batch(
        &self,
        sources: &[&str],
        env: &mut dyn Environment,
    ) -> Result<BatchResults, Error> {
        let _span = tracing::debug_span!("execute_batch", formulas = sources.len()).entered();

        let exprs = self.parse(sources)?;
        let infos = self.analyze(exprs)?;

        let mut results = match self.mode {
            ExecuteMode::ChunkVm => {
                let chunk = self.compile_ir(&infos)?;
                self.run_chunk(&chunk, env)?
            }
            ExecuteMode::SyntaxTree => self.run_ir(&infos, env)?,
        };

        if results.len() < sources.len() {
            results.resize(sources.len(), None);
        }
        Ok(results)
    }

    /// Parse every source into an expression tree.
    pub fn parse(&self, sources: &[&str]) -> Result<Vec<Expr>, Error> {
        let mut exprs = Vec::with_capacity(sources.len());
        for source in sources {
            let tokens = scan(source)?;
            exprs.push(Parser::new(tokens).parse()?);
        }
        debug!(count = exprs.len(), "parsed formula batch");
        Ok(exprs)
    }

    /// Derive per-formula variable sets and, when enabled and the
    /// batch assigns anything, reorder assignments topologically.
    pub fn analyze(&self, exprs: Vec<Expr>) -> Result<Vec<FormulaInfo>, Error> {
        let infos: Vec<FormulaInfo> = exprs
            .into_iter()
            .enumerate()
            .map(|(index, expr)| FormulaInfo::new(expr, index))
            .collect();

        let scheduler = Scheduler::build(&infos);
        if !(self.need_sort && !infos.is_empty() && scheduler.has_assign()) {
            return Ok(infos);
        }

        let order = scheduler.plan(&infos)?;
        debug!(scheduled = order.len(), total = infos.len(), "dependency order planned");
        Ok(order.into_iter().map(|position| infos[position].clone()).collect())
    }

    /// Compile sources straight to a chunk without executing them.
    pub fn compile_source(&self, sources: &[&str]) -> Result<Chunk, Error> {
        let exprs = self.parse(sources)?;
        let infos = self.analyze(exprs)?;
        self.compile_ir(&infos)
    }

    /// Lower analyzed formulas (in their given order) into one chunk.
    pub fn compile_ir(&self, infos: &[FormulaInfo]) -> Result<Chunk, Error> {
        let mut compiler = Compiler::new(&self.functions);
        compiler.begin_compile();
        for info in infos {
            compiler.compile(info)?;
        }
        let chunk = compiler.end_compile()?;
        debug!(bytes = chunk.byte_size(), "compiled batch to chunk");
        Ok(chunk)
    }

    /// Tree-walking execution. The store sees every referenced
    /// variable via `before_execute` first; a runtime error aborts
    /// the batch (per-formula tolerance is the VM backend's job).
    pub fn run_ir(
        &self,
        infos: &[FormulaInfo],
        env: &mut dyn Environment,
    ) -> Result<BatchResults, Error> {
        let mut variables = BTreeSet::new();
        for info in infos {
            variables.extend(info.precursors().iter().cloned());
            variables.extend(info.successors().iter().cloned());
        }
        self.check_veto(variables.iter().map(String::as_str), env)?;

        let slots = infos.iter().map(|i| i.index() + 1).max().unwrap_or(0);
        let mut results: BatchResults = vec![None; slots];
        for info in infos {
            let mut evaluator = Evaluator::new(env, &self.functions);
            let value = evaluator.evaluate(info.expr())?;
            results[info.index()] = Some(ExResult::success(info.index(), value));
        }
        Ok(results)
    }

    /// VM execution of a compiled chunk; formula-local failures come
    /// back as error results instead of aborting the batch.
    pub fn run_chunk(&self, chunk: &Chunk, env: &mut dyn Environment) -> Result<BatchResults, Error> {
        let mut reader = ChunkReader::new(chunk).map_err(crate::vm::VmError::from)?;
        let variables = reader.variables();
        self.check_veto(variables.iter().map(String::as_str), env)?;

        let mut vm = Vm::new();
        let executed = vm.run(&mut reader, env, &self.functions)?;

        let slots = executed.iter().map(|r| r.index + 1).max().unwrap_or(0);
        let mut results: BatchResults = vec![None; slots];
        for result in executed {
            let index = result.index;
            results[index] = Some(result);
        }
        Ok(results)
    }

    fn check_veto<'v>(
        &self,
        variables: impl Iterator<Item = &'v str>,
        env: &mut dyn Environment,
    ) -> Result<(), Error> {
        let fields: Vec<Field> = variables.map(Field::parse).collect();
        if !env.before_execute(&fields) {
            debug!("batch vetoed by environment");
            return Err(Error::Vetoed);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::MapEnvironment;
    use pretty_assertions::assert_eq;

    fn env_mnw() -> MapEnvironment {
        let mut env = MapEnvironment::new();
        env.put("m", 2i64);
        env.put("n", 4i64);
        env.put("w", 6i64);
        env
    }

    const BATCH: [&str; 4] = ["x = y = a + b * c", "a = m + n", "b = a * 2", "c = n + w + b"];

    fn check_batch_outcome(env: &MapEnvironment) {
        assert_eq!(env.get("a"), Some(Value::Int(6)));
        assert_eq!(env.get("b"), Some(Value::Int(12)));
        assert_eq!(env.get("c"), Some(Value::Int(22)));
        assert_eq!(env.get("x"), Some(Value::Int(270)));
        assert_eq!(env.get("y"), Some(Value::Int(270)));
    }

    #[test]
    fn tree_mode_orders_producers_first() {
        let runner = Runner::new();
        let mut env = env_mnw();
        let results = runner.execute_batch(&BATCH, &mut env).unwrap();
        check_batch_outcome(&env);
        assert_eq!(results.len(), 4);
        assert_eq!(results[0].as_ref().unwrap().value(), Some(&Value::Int(270)));
        assert_eq!(results[1].as_ref().unwrap().value(), Some(&Value::Int(6)));
    }

    #[test]
    fn vm_mode_matches_tree_mode() {
        let mut tree_env = env_mnw();
        let mut vm_env = env_mnw();

        let runner = Runner::new();
        let tree = runner.execute_batch(&BATCH, &mut tree_env).unwrap();

        let mut runner = Runner::new();
        runner.set_mode(ExecuteMode::ChunkVm);
        let vm = runner.execute_batch(&BATCH, &mut vm_env).unwrap();

        assert_eq!(tree, vm);
        check_batch_outcome(&vm_env);
    }

    #[test]
    fn mixed_batch_keeps_non_assignments_in_place() {
        let sources = ["b * 2 + 1", "a * b + c", "x = y = a + b * c", "a = m + n", "b = a * 2", "c = n + w + b"];
        let runner = Runner::new();
        let mut env = env_mnw();
        let results = runner.execute_batch(&sources, &mut env).unwrap();
        check_batch_outcome(&env);

        let values: Vec<Value> = results
            .iter()
            .map(|r| r.as_ref().unwrap().value().unwrap().clone())
            .collect();
        assert_eq!(
            values,
            vec![
                Value::Int(25),
                Value::Int(94),
                Value::Int(270),
                Value::Int(6),
                Value::Int(12),
                Value::Int(22),
            ]
        );
    }

    #[test]
    fn cycle_is_fatal_with_no_results() {
        let runner = Runner::new();
        let mut env = MapEnvironment::new();
        let err = runner.execute_batch(&["a = b", "b = a"], &mut env).unwrap_err();
        assert!(matches!(err, Error::Cycle(_)));
        assert_eq!(env.size(), 0);
    }

    #[test]
    fn sorting_can_be_disabled() {
        let mut runner = Runner::new();
        runner.set_need_sort(false);
        let mut env = env_mnw();
        // Without sorting, consumers run before producers and read nulls.
        let err = runner.execute_batch(&BATCH, &mut env);
        // `x = y = a + b * c` runs first: a/b/c are null -> runtime error.
        assert!(err.is_err());
    }

    #[test]
    fn single_formula_convenience() {
        let runner = Runner::new();
        let mut env = MapEnvironment::new();
        assert_eq!(runner.execute("1 + 2 * 3", &mut env).unwrap(), Value::Int(7));
        assert_eq!(runner.execute("x = 10", &mut env).unwrap(), Value::Int(10));
        assert_eq!(env.get("x"), Some(Value::Int(10)));
    }

    #[test]
    fn tree_mode_propagates_runtime_errors() {
        let runner = Runner::new();
        let mut env = MapEnvironment::new();
        let err = runner.execute_batch(&["1 + 1", "7 / 0"], &mut env).unwrap_err();
        assert!(matches!(err, Error::Runtime(_)));
    }

    #[test]
    fn vm_mode_isolates_runtime_errors() {
        let mut runner = Runner::new();
        runner.set_mode(ExecuteMode::ChunkVm);
        let mut env = MapEnvironment::new();
        let results = runner.execute_batch(&["1 + 1", "7 / 0", "2 + 2"], &mut env).unwrap();
        assert_eq!(results[0].as_ref().unwrap().value(), Some(&Value::Int(2)));
        assert!(!results[1].as_ref().unwrap().is_ok());
        assert_eq!(results[2].as_ref().unwrap().value(), Some(&Value::Int(4)));
    }

    #[test]
    fn duplicate_writer_slot_is_none() {
        let runner = Runner::new();
        let mut env = MapEnvironment::new();
        let results = runner.execute_batch(&["a = 1", "a = 2"], &mut env).unwrap();
        assert_eq!(results[0].as_ref().unwrap().value(), Some(&Value::Int(1)));
        assert!(results[1].is_none());
        assert_eq!(env.get("a"), Some(Value::Int(1)));
    }

    #[test]
    fn veto_aborts_before_any_formula_runs() {
        struct VetoEnv {
            inner: MapEnvironment,
            seen: Vec<String>,
        }
        impl Environment for VetoEnv {
            fn before_execute(&mut self, vars: &[Field]) -> bool {
                self.seen = vars.iter().map(Field::to_string).collect();
                false
            }
            fn get(&self, id: &str) -> Option<Value> {
                self.inner.get(id)
            }
            fn put_value(&mut self, id: &str, value: Value) {
                self.inner.put_value(id, value);
            }
            fn size(&self) -> usize {
                self.inner.size()
            }
        }

        let runner = Runner::new();
        let mut env = VetoEnv { inner: MapEnvironment::new(), seen: Vec::new() };
        let err = runner.execute_batch(&["a = m + 1"], &mut env).unwrap_err();
        assert!(matches!(err, Error::Vetoed));
        assert_eq!(env.inner.size(), 0);
        assert!(env.seen.contains(&"a".to_string()));
        assert!(env.seen.contains(&"m".to_string()));
    }

    #[test]
    fn compile_once_execute_later() {
        let runner = Runner::new();
        let chunk = runner.compile_source(&["a = 2 + 3", "a * 10"]).unwrap();

        let restored = Chunk::from_bytes(&chunk.to_bytes()).unwrap();
        let mut env = MapEnvironment::new();
        let results = runner.run_chunk(&restored, &mut env).unwrap();
        assert_eq!(results[0].as_ref().unwrap().value(), Some(&Value::Int(5)));
        assert_eq!(results[1].as_ref().unwrap().value(), Some(&Value::Int(50)));
        assert_eq!(env.get("a"), Some(Value::Int(5)));
    }

    #[test]
    fn empty_batch_is_fine() {
        let runner = Runner::new();
        let mut env = MapEnvironment::new();
        let results = runner.execute_batch(&[], &mut env).unwrap();
        assert!(results.is_empty());
    }
}
