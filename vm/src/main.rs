use clap::Parser as ClapParser;
use std::process;

use bytecode::{Assembler, disassemble, special};
use log::info;
use object::{MemorySettings, ObjectFormat, Value};

use vm::{ExecutionContext, VM, VmError, VmSettings, class_index};

#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Argument for the demo's `factorial:` send
    #[arg(default_value_t = 10, help = "Compute the factorial of this number")]
    n: i64,

    /// Print the demo methods' bytecode instead of executing
    #[arg(long, help = "Dump disassembled bytecode + literals")]
    dump_bytecode: bool,

    #[arg(long, default_value_t = MemorySettings::default().limit, help = "Object memory limit in bytes")]
    memory_limit: usize,

    #[arg(long, default_value_t = VmSettings::default().stack_size, help = "Execution stack size in bytes")]
    stack_size: usize,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long)]
    verbose: bool,
}

/// Methods installed on the demo class, by selector.
struct Demo {
    receiver: Value,
    methods: Vec<(&'static str, Value)>,
}

fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    let settings = VmSettings {
        memory: MemorySettings {
            limit: cli.memory_limit,
            ..MemorySettings::default()
        },
        stack_size: cli.stack_size,
    };

    if let Err(err) = run(&cli, settings) {
        eprintln!("Error: {err}");
        process::exit(1);
    }
}

fn run(cli: &Cli, settings: VmSettings) -> Result<(), VmError> {
    let mut vm = VM::new(settings)?;
    let demo = build_demo(&mut vm)?;

    if cli.dump_bytecode {
        for (selector, method) in &demo.methods {
            dump_method(&vm, selector, *method)?;
        }
        return Ok(());
    }

    let mut ctx = ExecutionContext::new(&vm);
    let n = Value::try_from_i64(cli.n).ok_or(VmError::Unrepresentable {
        kind: "SmallInteger",
    })?;

    let result = vm.send_named(&mut ctx, demo.receiver, "factorial:", &[n])?;
    println!("{} factorial = {}", cli.n, vm.print_string(result));

    let result = vm.send_named(&mut ctx, demo.receiver, "sumTo:", &[n])?;
    println!("1 + ... + {} = {}", cli.n, vm.print_string(result));

    match vm.send_named(&mut ctx, demo.receiver, "frobnicate", &[]) {
        Ok(value) => println!("frobnicate answered {}", vm.print_string(value)),
        Err(err) => println!("frobnicate failed: {err}"),
    }

    info!("{vm:?}");
    Ok(())
}

fn build_demo(vm: &mut VM) -> Result<Demo, VmError> {
    let object = vm.class_at(class_index::OBJECT).ok_or(VmError::InvalidClass(vm.nil()))?;
    let class = vm.define_class("Demo", object, ObjectFormat::FixedSize, 0)?;
    let factorial = vm.intern("factorial:")?;

    // factorial: n
    //     n <= 1 ifTrue: [^1].
    //     ^n * (self factorial: n - 1)
    let mut asm = Assembler::new();
    let recurse = asm.new_label();
    asm.push_temp(0);
    asm.push_integer(1)?;
    asm.send_special(special::LESS_EQUAL);
    asm.jump_if_false(recurse);
    asm.push_integer(1)?;
    asm.return_top();
    asm.bind(recurse)?;
    asm.push_temp(0);
    asm.push_receiver();
    asm.push_temp(0);
    asm.push_integer(1)?;
    asm.send_special(special::SUBTRACT);
    asm.send(factorial, 1)?;
    asm.send_special(special::MULTIPLY);
    asm.return_top();
    let factorial_method = asm.generate(&mut vm.memory, class_index::COMPILED_METHOD, 1, 0)?;
    vm.add_method(class, factorial, factorial_method)?;

    // sumTo: n
    //     | sum i |
    //     sum := 0. i := 1.
    //     [i <= n] whileTrue: [sum := sum + i. i := i + 1].
    //     ^sum
    let sum_to = vm.intern("sumTo:")?;
    let mut asm = Assembler::new();
    let head = asm.new_label();
    let done = asm.new_label();
    asm.push_integer(0)?;
    asm.pop_store_temp(1);
    asm.push_integer(1)?;
    asm.pop_store_temp(2);
    asm.bind(head)?;
    asm.push_temp(2);
    asm.push_temp(0);
    asm.send_special(special::LESS_EQUAL);
    asm.jump_if_false(done);
    asm.push_temp(1);
    asm.push_temp(2);
    asm.send_special(special::ADD);
    asm.pop_store_temp(1);
    asm.push_temp(2);
    asm.push_integer(1)?;
    asm.send_special(special::ADD);
    asm.pop_store_temp(2);
    asm.jump(head);
    asm.bind(done)?;
    asm.push_temp(1);
    asm.return_top();
    let sum_to_method = asm.generate(&mut vm.memory, class_index::COMPILED_METHOD, 1, 2)?;
    vm.add_method(class, sum_to, sum_to_method)?;

    let receiver = vm.instantiate(class, 0)?;
    Ok(Demo {
        receiver,
        methods: vec![("factorial:", factorial_method), ("sumTo:", sum_to_method)],
    })
}

fn dump_method(vm: &VM, selector: &str, method: Value) -> Result<(), VmError> {
    let compiled = bytecode::CompiledMethod::from_value(&vm.memory, method)
        .ok_or(VmError::NotAMethod(method))?;
    let header = compiled.header(&vm.memory)?;
    println!(
        "== {selector} ({} args, {} temps, {} literals) ==",
        header.arg_count, header.temp_count, header.literal_count
    );
    for i in 0..header.literal_count as usize {
        let literal = compiled.literal(&vm.memory, i)?;
        println!("  lit {i}: {}", vm.print_string(literal));
    }
    let code = compiled.bytecodes(&vm.memory)?;
    print!("{}", disassemble(code, header.initial_pc()));
    Ok(())
}
