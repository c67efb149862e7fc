use crate::bytecode::{BytecodeProgram, Op};
use crate::lang::{FunctionRegistry, NameResolver, Value};

/// Print disassembly of a compiled formula, with a header naming it.
pub fn print_program(
    name: &str,
    program: &BytecodeProgram,
    registry: &FunctionRegistry,
    resolver: &dyn NameResolver,
) {
    println!("════════════════════════════════════════");
    println!(" {} = {}", name, program.source());
    println!(
        " {} instructions, max stack {}",
        program.len(),
        program.max_stack_depth()
    );
    println!("════════════════════════════════════════");
    print!("{}", disassemble(program, registry, resolver));
    println!();
}

/// Return disassembly as a String, one instruction per line.
///
/// Variables print by name when the resolver knows them, functions by
/// their registered name.
pub fn disassemble(
    program: &BytecodeProgram,
    registry: &FunctionRegistry,
    resolver: &dyn NameResolver,
) -> String {
    let mut output = String::new();
    for (ip, op) in program.ops().iter().enumerate() {
        output.push_str(&format!("{:04}  ", ip));
        output.push_str(&format_op(op, program, registry, resolver));
        output.push('\n');
    }
    output
}

fn format_op(
    op: &Op,
    program: &BytecodeProgram,
    registry: &FunctionRegistry,
    resolver: &dyn NameResolver,
) -> String {
    match op {
        Op::PushScalar(i) => format!(
            "PUSH_SCALAR #{:<4} ; {}",
            i,
            pool_value(program.scalars().get(*i).copied().map(Value::Scalar))
        ),
        Op::PushVector(i) => format!(
            "PUSH_VECTOR #{:<4} ; {}",
            i,
            pool_value(program.vectors().get(*i).copied().map(Value::Vector))
        ),
        Op::PushVar(i) => format!("PUSH_VAR    {}", variable(*i, resolver)),
        Op::Unary(op) => format!("UNARY       {}", op.symbol()),
        Op::Binary(op) => format!("BINARY      {}", op.symbol()),
        Op::Call { func, arity } => {
            let name = registry
                .lookup_by_opcode(*func)
                .map(|desc| desc.name.as_str())
                .unwrap_or(func.canonical_name());
            format!("CALL        {}/{}", name, arity)
        }
        Op::Assign(i) => format!("ASSIGN      {}", variable(*i, resolver)),
    }
}

fn variable(index: usize, resolver: &dyn NameResolver) -> String {
    match resolver.name_of(index) {
        Some(name) => format!("{} (#{})", name, index),
        None => format!("#{}", index),
    }
}

fn pool_value(value: Option<Value>) -> String {
    value.map_or_else(|| "<missing>".to_string(), |v| v.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::Compiler;

    #[test]
    fn test_disassemble_names_variables_and_functions() {
        let registry = FunctionRegistry::with_builtins();
        let names = vec!["x", "y"];
        let program = Compiler::new(&registry, &names)
            .compile("atan2(y, 2*x)")
            .unwrap();

        let text = disassemble(&program, &registry, &names);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[0], "0000  PUSH_VAR    y (#1)");
        assert!(lines[1].starts_with("0001  PUSH_SCALAR #0"));
        assert!(lines[1].ends_with("; 2"));
        assert_eq!(lines[3], "0003  BINARY      *");
        assert_eq!(lines[4], "0004  CALL        atan2/2");
    }

    #[test]
    fn test_disassemble_vector_immediate() {
        let registry = FunctionRegistry::with_builtins();
        let names: Vec<&str> = Vec::new();
        let program = Compiler::new(&registry, &names)
            .compile("-vec3d(1, 0, 2)")
            .unwrap();

        let text = disassemble(&program, &registry, &names);
        assert!(text.contains("PUSH_VECTOR #0"));
        assert!(text.contains("(-1, -0, -2)"));
    }

    #[test]
    fn test_unknown_variable_prints_index() {
        let registry = FunctionRegistry::with_builtins();
        let names = vec!["a", "b"];
        let program = Compiler::new(&registry, &names)
            .allow_assignment(true)
            .compile("b = a")
            .unwrap();

        let anonymous: Vec<&str> = Vec::new();
        let text = disassemble(&program, &registry, &anonymous);
        assert!(text.contains("PUSH_VAR    #0"));
        assert!(text.contains("ASSIGN      #1"));
    }
}
