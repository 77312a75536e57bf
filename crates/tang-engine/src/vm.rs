//! The bytecode interpreter.
//!
//! A single-threaded, strictly synchronous dispatch loop. Conditional jumps
//! test the top of stack and leave it in place; `CallFunc` and `Return`
//! implement the frame discipline over the context's pc and fp stacks.
//! Malformed streams surface as the invalid-bytecode error and stop the
//! run.

use tang_core::context::ExecutionContext;
use tang_core::error::RuntimeError;
use tang_core::value::{
    boolean_singleton, error_singleton, null_singleton, string_hash, value_add, value_adopt,
    value_assign_index, value_call, value_cast, value_divide, value_equal, value_greater_than,
    value_greater_than_equal, value_index, value_iterator_get, value_iterator_next,
    value_less_than, value_less_than_equal, value_logical_not, value_modulo, value_multiply,
    value_negative, value_not_equal, value_print, value_set_not_temporary, value_slice,
    value_subtract, ValueData,
};

use crate::bytecode::{Bytecode, ConstantPool, Opcode, Word};

/// Interpret the program. Returns false when the stream is malformed.
pub fn run(bytecode: &Bytecode, pool: &ConstantPool, context: &mut ExecutionContext) -> bool {
    let ctx: *mut ExecutionContext = context;
    let code = &bytecode.code;
    let mut pc: usize = 0;

    // All context access funnels through the raw pointer so the dispatch
    // helpers (which receive the same pointer) stay the only borrowers.
    macro_rules! c {
        () => {
            unsafe { &mut *ctx }
        };
    }
    macro_rules! fail {
        () => {{
            c!().result = error_singleton(RuntimeError::InvalidBytecode);
            return false;
        }};
    }
    macro_rules! read_uint {
        () => {{
            let value = match code.get(pc) {
                Some(Word::UInt(v)) => *v,
                _ => fail!(),
            };
            pc += 1;
            value
        }};
    }
    macro_rules! read_int {
        () => {{
            let value = match code.get(pc) {
                Some(Word::Int(v)) => *v,
                _ => fail!(),
            };
            pc += 1;
            value
        }};
    }
    macro_rules! read_float {
        () => {{
            let value = match code.get(pc) {
                Some(Word::Float(v)) => *v,
                _ => fail!(),
            };
            pc += 1;
            value
        }};
    }
    macro_rules! pop {
        () => {
            match c!().stack.pop() {
                Some(value) => value,
                None => fail!(),
            }
        };
    }
    macro_rules! top {
        () => {
            match c!().stack.last().copied() {
                Some(value) => value,
                None => fail!(),
            }
        };
    }
    macro_rules! push {
        ($value:expr) => {
            c!().stack.push($value)
        };
    }
    macro_rules! binary {
        ($dispatch:path) => {{
            let rhs = pop!();
            let lhs = pop!();
            let result = $dispatch(lhs, rhs, ctx);
            push!(result);
        }};
    }

    loop {
        let Some(&word) = code.get(pc) else { fail!() };
        pc += 1;
        let Word::Op(op) = word else { fail!() };
        match op {
            Opcode::PushNull => push!(null_singleton()),
            Opcode::PushBoolean => {
                let value = read_uint!();
                push!(boolean_singleton(value != 0));
            }
            Opcode::PushFloat => {
                let value = read_float!();
                let float = c!().new_float(value);
                push!(float);
            }
            Opcode::PushInteger => {
                let value = read_int!();
                let integer = c!().new_integer(value);
                push!(integer);
            }
            Opcode::PushString => {
                let index = read_uint!() as usize;
                let Some(text) = pool.get(index) else { fail!() };
                let string = c!().new_string(text.clone());
                push!(string);
            }
            Opcode::PushArray => {
                let count = read_uint!() as usize;
                if c!().stack.len() < count {
                    fail!();
                }
                let base = c!().stack.len() - count;
                let mut elements = Vec::with_capacity(count);
                for i in base..base + count {
                    let element = c!().stack[i];
                    elements.push(value_adopt(element, ctx));
                }
                c!().stack.truncate(base);
                let array = c!().new_array(elements);
                push!(array);
            }
            Opcode::PushMap => {
                let count = read_uint!() as usize;
                if c!().stack.len() < count * 2 {
                    fail!();
                }
                let base = c!().stack.len() - count * 2;
                let mut map = tang_core::value::MapData::new();
                let mut bad_key = false;
                for i in 0..count {
                    let key = c!().stack[base + i * 2];
                    let value = c!().stack[base + i * 2 + 1];
                    let hash = match unsafe { (*key).as_string() } {
                        Some(text) => string_hash(text.as_str()),
                        None => {
                            bad_key = true;
                            break;
                        }
                    };
                    let key = value_adopt(key, ctx);
                    let value = value_adopt(value, ctx);
                    map.set(hash, key, value);
                }
                c!().stack.truncate(base);
                if bad_key {
                    push!(error_singleton(RuntimeError::MapKeyNotString));
                } else {
                    let map = c!().new_map(map);
                    push!(map);
                }
            }
            Opcode::PushFunction => {
                let argument_count = read_uint!();
                let offset = read_uint!() as usize;
                let function = c!().new_function(argument_count, offset);
                push!(function);
            }
            Opcode::Pop => {
                pop!();
            }
            Opcode::PeekLocal => {
                let slot = read_uint!() as usize;
                let index = c!().fp + slot;
                if index >= c!().stack.len() {
                    fail!();
                }
                let value = c!().stack[index];
                push!(value);
            }
            Opcode::PeekGlobal => {
                let index = read_uint!() as usize;
                if index >= c!().stack.len() {
                    fail!();
                }
                let value = c!().stack[index];
                push!(value);
            }
            Opcode::PokeLocal => {
                let slot = read_uint!() as usize;
                let value = top!();
                let index = c!().fp + slot;
                if index >= c!().stack.len() {
                    fail!();
                }
                c!().stack[index] = value;
            }
            Opcode::PokeGlobal => {
                let index = read_uint!() as usize;
                let value = top!();
                if index >= c!().stack.len() {
                    fail!();
                }
                c!().stack[index] = value;
            }
            Opcode::MarkFp => {
                let top = c!().stack.len();
                c!().fp = top;
            }
            Opcode::PushFp => {
                let fp = c!().fp;
                c!().fp_stack.push(fp);
            }
            Opcode::PopFp => {
                let Some(fp) = c!().fp_stack.pop() else { fail!() };
                c!().fp = fp;
            }
            Opcode::Adopt => {
                let value = top!();
                let adopted = value_adopt(value, ctx);
                if let Some(slot) = c!().stack.last_mut() {
                    *slot = adopted;
                }
            }
            Opcode::SetNotTemp => {
                value_set_not_temporary(top!());
            }
            Opcode::Jmp => {
                let displacement = read_int!();
                pc = (pc as i64 + displacement) as usize;
            }
            Opcode::Jmpf => {
                let displacement = read_int!();
                if !unsafe { (*top!()).is_true } {
                    pc = (pc as i64 + displacement) as usize;
                }
            }
            Opcode::Jmpt => {
                let displacement = read_int!();
                if unsafe { (*top!()).is_true } {
                    pc = (pc as i64 + displacement) as usize;
                }
            }
            Opcode::Add => binary!(value_add),
            Opcode::Subtract => binary!(value_subtract),
            Opcode::Multiply => binary!(value_multiply),
            Opcode::Divide => binary!(value_divide),
            Opcode::Modulo => binary!(value_modulo),
            Opcode::Negative => {
                let value = pop!();
                push!(value_negative(value, ctx));
            }
            Opcode::Not => {
                let value = pop!();
                push!(value_logical_not(value, ctx));
            }
            Opcode::LessThan => binary!(value_less_than),
            Opcode::LessThanEqual => binary!(value_less_than_equal),
            Opcode::GreaterThan => binary!(value_greater_than),
            Opcode::GreaterThanEqual => binary!(value_greater_than_equal),
            Opcode::Equal => binary!(value_equal),
            Opcode::NotEqual => binary!(value_not_equal),
            Opcode::Index => {
                let index = pop!();
                let collection = pop!();
                push!(value_index(collection, index, ctx));
            }
            Opcode::Slice => {
                let step = pop!();
                let end = pop!();
                let start = pop!();
                let collection = pop!();
                push!(value_slice(collection, start, end, step, ctx));
            }
            Opcode::AssignIndex => {
                let index = pop!();
                let collection = pop!();
                let value = pop!();
                push!(value_assign_index(collection, index, value, ctx));
            }
            Opcode::Iterator => {
                let slot = read_uint!() as usize;
                let collection = pop!();
                let iterator = value_iterator_get(collection, ctx);
                let is_iterator =
                    unsafe { matches!((*iterator).data, ValueData::Iterator { .. }) };
                value_set_not_temporary(iterator);
                let index = c!().fp + slot;
                if index >= c!().stack.len() {
                    fail!();
                }
                c!().stack[index] = iterator;
                push!(boolean_singleton(is_iterator));
            }
            Opcode::IteratorNext => {
                let slot = read_uint!() as usize;
                let index = c!().fp + slot;
                if index >= c!().stack.len() {
                    fail!();
                }
                let iterator = c!().stack[index];
                let next = value_iterator_next(iterator, ctx);
                // Exhaustion (and any other failure) lifts into a false
                // discriminant for the loop's exit test.
                let has_next = !unsafe { (*next).is_error };
                push!(next);
                push!(boolean_singleton(has_next));
            }
            Opcode::Cast => {
                let target = read_uint!();
                let value = pop!();
                push!(value_cast(value, target, ctx));
            }
            Opcode::Period => {
                let index = read_uint!() as usize;
                let Some(name) = pool.get(index) else { fail!() };
                let hash = string_hash(name.as_str());
                let value = pop!();
                push!(tang_core::value::value_period(value, hash, ctx));
            }
            Opcode::Print => {
                let value = pop!();
                push!(value_print(value, ctx));
            }
            Opcode::CallFunc => {
                let argc = read_uint!() as usize;
                let callee = pop!();
                if c!().stack.len() < argc {
                    fail!();
                }
                match unsafe { &(*callee).data } {
                    ValueData::Function {
                        argument_count,
                        offset,
                    } => {
                        if *argument_count as usize != argc {
                            let keep = c!().stack.len() - argc;
                            c!().stack.truncate(keep);
                            push!(error_singleton(RuntimeError::ArgumentCountMismatch));
                        } else {
                            let c = c!();
                            c.pc_stack.push(pc);
                            c.fp_stack.push(c.fp);
                            c.fp = c.stack.len() - argc;
                            pc = *offset;
                        }
                    }
                    ValueData::NativeFunction { .. } => {
                        let base = c!().stack.len() - argc;
                        let args = if argc == 0 {
                            std::ptr::null()
                        } else {
                            c!().stack[base..].as_ptr()
                        };
                        let result = value_call(callee, args, argc as u64, ctx);
                        c!().stack.truncate(base);
                        push!(result);
                    }
                    _ => {
                        let keep = c!().stack.len() - argc;
                        c!().stack.truncate(keep);
                        push!(error_singleton(RuntimeError::InvalidFunctionCall));
                    }
                }
            }
            Opcode::LoadLibrary => {
                let index = read_uint!() as usize;
                let Some(name) = pool.get(index) else { fail!() };
                let hash = string_hash(name.as_str());
                let value = c!().library_load(hash);
                push!(value);
            }
            Opcode::Return => {
                let result = pop!();
                match c!().pc_stack.pop() {
                    None => {
                        c!().result = result;
                        return true;
                    }
                    Some(saved_pc) => {
                        let fp = c!().fp;
                        if fp > c!().stack.len() {
                            fail!();
                        }
                        c!().stack.truncate(fp);
                        let Some(saved_fp) = c!().fp_stack.pop() else { fail!() };
                        c!().fp = saved_fp;
                        pc = saved_pc;
                        push!(result);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyze::analyze;
    use crate::emit::compile_bytecode;
    use crate::parser::parse;

    fn execute(source: &str) -> (ExecutionContext, bool) {
        let mut root = parse(source).unwrap();
        let analysis = analyze(&mut root).unwrap();
        crate::simplify::simplify(&mut root, &mut crate::simplify::Bindings::new());
        let mut pool = ConstantPool::new();
        let bytecode = compile_bytecode(&root, &analysis, &mut pool).unwrap();
        let mut context = ExecutionContext::new();
        let ok = run(&bytecode, &pool, &mut context);
        (context, ok)
    }

    fn output_of(source: &str) -> String {
        let (context, ok) = execute(source);
        assert!(ok);
        context.render_output()
    }

    #[test]
    fn test_print_literal() {
        assert_eq!(output_of("print(42);"), "42");
        assert_eq!(output_of("print(\"hi\");"), "hi");
    }

    #[test]
    fn test_result_is_last_statement_value() {
        let (context, ok) = execute("1; 2; 3;");
        assert!(ok);
        assert_eq!(context.result_display(), "3");
    }

    #[test]
    fn test_while_loop() {
        assert_eq!(output_of("i = 0; while (i < 3) { print(i); i = i + 1; }"), "012");
    }

    #[test]
    fn test_error_result_propagates() {
        let (context, ok) = execute("1 / 0;");
        assert!(ok);
        assert!(context.result_is_error());
    }

    #[test]
    fn test_print_error_renders_nothing() {
        assert_eq!(output_of("print(1 / 0); print(\"x\");"), "x");
    }
}
