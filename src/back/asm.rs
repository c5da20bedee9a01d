//! Koopa IR 到 RISC-V 汇编的翻译。
//!
//! 代码生成策略：所有产生值的指令结果一律写回栈上的溢出槽，
//! 计算时再按需读入固定分工的暂存寄存器。没有寄存器分配，
//! 正确性只依赖栈槽的往返，嵌套表达式不会产生寄存器冲突。
//!
//! - 全局变量生成 `.data` 段，聚合初始化中的连续零合并为 `.zero`
//! - 分支条件是字面量时直接生成无条件跳转
//! - 任何超出 imm12 范围的栈访问都经由 t3 间接寻址

use koopa::ir::values::{Binary, Branch, Call, GetElemPtr, GetPtr, Jump, Load, Return, Store};
use koopa::ir::{BinaryOp, FunctionData, Program, Type, TypeKind, Value, ValueKind};

use crate::back::context::Context;
use crate::back::frame::plan_frame;
use crate::back::insts::{Instruction, Reg, ARG_REGS};
use crate::back::utils::{load_reg_with_offset, store_reg_with_offset};
use crate::CompilerError;

pub trait GenerateAsm {
    fn generate(&self, program: &Program, ctx: &mut Context) -> Result<(), CompilerError>;
}

impl GenerateAsm for Program {
    fn generate(&self, program: &Program, ctx: &mut Context) -> Result<(), CompilerError> {
        // 数据段：全局变量
        for &global in self.inst_layout() {
            let init = {
                let data = program.borrow_value(global);
                match data.kind() {
                    ValueKind::GlobalAlloc(alloc) => alloc.init(),
                    _ => continue,
                }
            };
            let name = program
                .borrow_value(global)
                .name()
                .as_ref()
                .ok_or_else(|| {
                    CompilerError::CodeGenerationError(format!(
                        "Global {:?} has no name",
                        global
                    ))
                })?
                .trim_start_matches('@')
                .to_string();
            ctx.global_names.insert(global, name.clone());
            ctx.program.push(Instruction::Section(".data".to_string()));
            ctx.program.push(Instruction::Global(name.clone()));
            ctx.program.push(Instruction::Label(name));
            emit_global_init(init, program, ctx)?;
        }

        // 代码段：跳过没有基本块的函数（库函数声明）
        for &func in self.func_layout() {
            let func_data = self.func(func);
            if func_data.layout().entry_bb().is_none() {
                continue;
            }
            func_data.generate(program, ctx)?;
        }
        Ok(())
    }
}

impl GenerateAsm for FunctionData {
    fn generate(&self, program: &Program, ctx: &mut Context) -> Result<(), CompilerError> {
        let name = &self.name()[1..];
        ctx.program.push(Instruction::Section(".text".to_string()));
        ctx.program.push(Instruction::Global(name.to_string()));
        ctx.program.push(Instruction::Label(name.to_string()));

        ctx.frame = plan_frame(self)?;

        // 入口块共用函数标号，其余基本块顺序编号
        ctx.bb_labels.clear();
        let mut bb_index = 0;
        for (bb, _node) in self.layout().bbs() {
            let label = if bb_index == 0 {
                name.to_string()
            } else {
                format!("{}_bb{}", name, bb_index - 1)
            };
            ctx.bb_labels.insert(*bb, label);
            bb_index += 1;
        }

        emit_prologue(ctx);

        let mut first = true;
        for (bb, node) in self.layout().bbs() {
            if !first {
                let label = ctx.bb_label(*bb)?;
                ctx.program.push(Instruction::Label(label));
            }
            first = false;
            for &inst in node.insts().keys() {
                generate_inst(inst, self, program, ctx)?;
            }
        }
        Ok(())
    }
}

fn emit_prologue(ctx: &mut Context) {
    let size = ctx.frame.size;
    if size > 0 {
        if size <= 2047 {
            ctx.program.push(Instruction::Addi(Reg::Sp, Reg::Sp, -size));
        } else {
            ctx.program.push(Instruction::Li(Reg::T0, size));
            ctx.program.push(Instruction::Sub(Reg::Sp, Reg::Sp, Reg::T0));
        }
    }
    if ctx.frame.has_call {
        let ra_offset = ctx.frame.ra_offset();
        store_reg_with_offset(ctx, Reg::Ra, ra_offset);
    }
}

// 每条 ret 处内联收尾：恢复 ra、还原 sp
fn emit_epilogue(ctx: &mut Context) {
    if ctx.frame.has_call {
        let ra_offset = ctx.frame.ra_offset();
        load_reg_with_offset(ctx, Reg::Ra, ra_offset);
    }
    let size = ctx.frame.size;
    if size > 0 {
        if size <= 2047 {
            ctx.program.push(Instruction::Addi(Reg::Sp, Reg::Sp, size));
        } else {
            ctx.program.push(Instruction::Li(Reg::T0, size));
            ctx.program.push(Instruction::Add(Reg::Sp, Reg::Sp, Reg::T0));
        }
    }
    ctx.program.push(Instruction::Ret);
}

fn generate_inst(
    inst: Value,
    func: &FunctionData,
    program: &Program,
    ctx: &mut Context,
) -> Result<(), CompilerError> {
    match func.dfg().value(inst).kind() {
        ValueKind::Alloc(_) => Ok(()), // 栈槽在规划阶段分好，无需指令
        ValueKind::Return(ret) => generate_return(ret, func, ctx),
        ValueKind::Binary(bin) => generate_binary(inst, bin, func, ctx),
        ValueKind::Load(load) => generate_load(inst, load, func, ctx),
        ValueKind::Store(store) => generate_store(store, func, ctx),
        ValueKind::Branch(branch) => generate_branch(branch, func, ctx),
        ValueKind::Jump(jump) => generate_jump(jump, ctx),
        ValueKind::Call(call) => generate_call(inst, call, func, program, ctx),
        ValueKind::GetElemPtr(gep) => generate_get_elem_ptr(inst, gep, func, program, ctx),
        ValueKind::GetPtr(gp) => generate_get_ptr(inst, gp, func, program, ctx),
        kind => Err(CompilerError::CodeGenerationError(format!(
            "Unsupported instruction: {:?}",
            kind
        ))),
    }
}

fn generate_return(ret: &Return, func: &FunctionData, ctx: &mut Context) -> Result<(), CompilerError> {
    if let Some(value) = ret.value() {
        ctx.operand_to_reg(value, Reg::A0, func)?;
    }
    emit_epilogue(ctx);
    Ok(())
}

fn generate_binary(
    inst: Value,
    bin: &Binary,
    func: &FunctionData,
    ctx: &mut Context,
) -> Result<(), CompilerError> {
    ctx.operand_to_reg(bin.lhs(), Reg::T0, func)?;
    ctx.operand_to_reg(bin.rhs(), Reg::T1, func)?;
    let p = &mut ctx.program;
    match bin.op() {
        BinaryOp::Add => p.push(Instruction::Add(Reg::T0, Reg::T0, Reg::T1)),
        BinaryOp::Sub => p.push(Instruction::Sub(Reg::T0, Reg::T0, Reg::T1)),
        BinaryOp::Mul => p.push(Instruction::Mul(Reg::T0, Reg::T0, Reg::T1)),
        BinaryOp::Div => p.push(Instruction::Div(Reg::T0, Reg::T0, Reg::T1)),
        BinaryOp::Mod => p.push(Instruction::Rem(Reg::T0, Reg::T0, Reg::T1)),
        BinaryOp::Eq => {
            p.push(Instruction::Xor(Reg::T0, Reg::T0, Reg::T1));
            p.push(Instruction::Seqz(Reg::T0, Reg::T0));
        }
        BinaryOp::NotEq => {
            p.push(Instruction::Xor(Reg::T0, Reg::T0, Reg::T1));
            p.push(Instruction::Snez(Reg::T0, Reg::T0));
        }
        BinaryOp::Lt => p.push(Instruction::Slt(Reg::T0, Reg::T0, Reg::T1)),
        // 避免 sgt 伪指令：交换操作数
        BinaryOp::Gt => p.push(Instruction::Slt(Reg::T0, Reg::T1, Reg::T0)),
        BinaryOp::Le => {
            p.push(Instruction::Slt(Reg::T0, Reg::T1, Reg::T0));
            p.push(Instruction::Seqz(Reg::T0, Reg::T0));
        }
        BinaryOp::Ge => {
            p.push(Instruction::Slt(Reg::T0, Reg::T0, Reg::T1));
            p.push(Instruction::Seqz(Reg::T0, Reg::T0));
        }
        op => {
            return Err(CompilerError::CodeGenerationError(format!(
                "Unsupported binary operator: {:?}",
                op
            )));
        }
    }
    ctx.store_result(inst, Reg::T0)
}

fn generate_load(
    inst: Value,
    load: &Load,
    func: &FunctionData,
    ctx: &mut Context,
) -> Result<(), CompilerError> {
    let src = load.src();
    if let Some(name) = ctx.global_names.get(&src).cloned() {
        ctx.program.push(Instruction::La(Reg::T0, name));
        ctx.program.push(Instruction::Lw(Reg::T0, 0, Reg::T0));
    } else if matches!(func.dfg().value(src).kind(), ValueKind::Alloc(_)) {
        // 局部槽本身就是存储，直接读
        let offset = ctx.frame.offset_of(src)?;
        load_reg_with_offset(ctx, Reg::T0, offset);
    } else {
        // 指针值（getelemptr/getptr 的结果）存在溢出槽里，先取指针再解引用
        let offset = ctx.frame.offset_of(src)?;
        load_reg_with_offset(ctx, Reg::T0, offset);
        ctx.program.push(Instruction::Lw(Reg::T0, 0, Reg::T0));
    }
    ctx.store_result(inst, Reg::T0)
}

fn generate_store(
    store: &Store,
    func: &FunctionData,
    ctx: &mut Context,
) -> Result<(), CompilerError> {
    ctx.operand_to_reg(store.value(), Reg::T0, func)?;
    let dest = store.dest();
    if let Some(name) = ctx.global_names.get(&dest).cloned() {
        ctx.program.push(Instruction::La(Reg::T3, name));
        ctx.program.push(Instruction::Sw(Reg::T0, 0, Reg::T3));
    } else if matches!(func.dfg().value(dest).kind(), ValueKind::Alloc(_)) {
        let offset = ctx.frame.offset_of(dest)?;
        store_reg_with_offset(ctx, Reg::T0, offset);
    } else {
        let offset = ctx.frame.offset_of(dest)?;
        load_reg_with_offset(ctx, Reg::T1, offset);
        ctx.program.push(Instruction::Sw(Reg::T0, 0, Reg::T1));
    }
    Ok(())
}

fn generate_branch(
    branch: &Branch,
    func: &FunctionData,
    ctx: &mut Context,
) -> Result<(), CompilerError> {
    let true_label = ctx.bb_label(branch.true_bb())?;
    let false_label = ctx.bb_label(branch.false_bb())?;
    let cond = branch.cond();
    // 条件折叠成字面量时退化为无条件跳转
    if let ValueKind::Integer(i) = func.dfg().value(cond).kind() {
        let target = if i.value() != 0 { true_label } else { false_label };
        ctx.program.push(Instruction::J(target));
        return Ok(());
    }
    ctx.operand_to_reg(cond, Reg::T0, func)?;
    ctx.program.push(Instruction::Bnez(Reg::T0, true_label));
    ctx.program.push(Instruction::J(false_label));
    Ok(())
}

fn generate_jump(jump: &Jump, ctx: &mut Context) -> Result<(), CompilerError> {
    let label = ctx.bb_label(jump.target())?;
    ctx.program.push(Instruction::J(label));
    Ok(())
}

fn generate_call(
    inst: Value,
    call: &Call,
    func: &FunctionData,
    program: &Program,
    ctx: &mut Context,
) -> Result<(), CompilerError> {
    // 前 8 个实参进 a0-a7，其余经 t0 写入本栈帧底部的出参区
    for (idx, &arg) in call.args().iter().enumerate() {
        if idx < 8 {
            ctx.operand_to_reg(arg, ARG_REGS[idx], func)?;
        } else {
            ctx.operand_to_reg(arg, Reg::T0, func)?;
            store_reg_with_offset(ctx, Reg::T0, ((idx - 8) * 4) as i32);
        }
    }
    let callee_name = program.func(call.callee()).name()[1..].to_string();
    ctx.program.push(Instruction::Call(callee_name));
    // 有返回值时规划器给这条 call 留了槽
    if ctx.frame.has_slot(inst) {
        ctx.store_result(inst, Reg::A0)?;
    }
    Ok(())
}

/// 指针源的类型：全局在 Program 里，局部在当前函数的 DFG 里
fn pointer_type(
    src: Value,
    func: &FunctionData,
    program: &Program,
    ctx: &Context,
) -> Type {
    if ctx.global_names.contains_key(&src) {
        program.borrow_value(src).ty().clone()
    } else {
        func.dfg().value(src).ty().clone()
    }
}

fn generate_get_elem_ptr(
    inst: Value,
    gep: &GetElemPtr,
    func: &FunctionData,
    program: &Program,
    ctx: &mut Context,
) -> Result<(), CompilerError> {
    let src = gep.src();
    let ty = pointer_type(src, func, program, ctx);
    // 源是 *[T, n]，步长为 T 的大小
    let stride = match ty.kind() {
        TypeKind::Pointer(base) => match base.kind() {
            TypeKind::Array(elem, _) => elem.size() as i32,
            _ => {
                return Err(CompilerError::CodeGenerationError(format!(
                    "GetElemPtr source is not a pointer to array: {:?}",
                    base
                )));
            }
        },
        _ => {
            return Err(CompilerError::CodeGenerationError(format!(
                "GetElemPtr source is not a pointer: {:?}",
                ty
            )));
        }
    };
    emit_pointer_arith(inst, src, gep.index(), stride, func, ctx)
}

fn generate_get_ptr(
    inst: Value,
    gp: &GetPtr,
    func: &FunctionData,
    program: &Program,
    ctx: &mut Context,
) -> Result<(), CompilerError> {
    let src = gp.src();
    let ty = pointer_type(src, func, program, ctx);
    // 源是 *T，步长为 T 的大小
    let stride = match ty.kind() {
        TypeKind::Pointer(base) => base.size() as i32,
        _ => {
            return Err(CompilerError::CodeGenerationError(format!(
                "GetPtr source is not a pointer: {:?}",
                ty
            )));
        }
    };
    emit_pointer_arith(inst, src, gp.index(), stride, func, ctx)
}

/// 地址运算的公共部分：基地址进 t0，加上 下标 × 步长，结果写回溢出槽。
/// 字面量下标直接折进偏移；动态下标经 t3/t2 相乘。
fn emit_pointer_arith(
    inst: Value,
    src: Value,
    index: Value,
    stride: i32,
    func: &FunctionData,
    ctx: &mut Context,
) -> Result<(), CompilerError> {
    ctx.address_to_reg(src, Reg::T0, func)?;
    if let ValueKind::Integer(i) = func.dfg().value(index).kind() {
        let total = i.value().wrapping_mul(stride);
        if total != 0 {
            if (-2048..=2047).contains(&total) {
                ctx.program.push(Instruction::Addi(Reg::T0, Reg::T0, total));
            } else {
                ctx.program.push(Instruction::Li(Reg::T3, total));
                ctx.program.push(Instruction::Add(Reg::T0, Reg::T0, Reg::T3));
            }
        }
    } else {
        ctx.operand_to_reg(index, Reg::T3, func)?;
        ctx.program.push(Instruction::Li(Reg::T2, stride));
        ctx.program.push(Instruction::Mul(Reg::T3, Reg::T3, Reg::T2));
        ctx.program.push(Instruction::Add(Reg::T0, Reg::T0, Reg::T3));
    }
    ctx.store_result(inst, Reg::T0)
}

/// 输出全局变量的初始化数据：非零值逐个 .word，连续的零合并成一条 .zero
fn emit_global_init(
    init: Value,
    program: &Program,
    ctx: &mut Context,
) -> Result<(), CompilerError> {
    let mut zero_run = 0usize;
    walk_init(init, program, ctx, &mut zero_run)?;
    flush_zero_run(ctx, &mut zero_run);
    Ok(())
}

fn walk_init(
    value: Value,
    program: &Program,
    ctx: &mut Context,
    zero_run: &mut usize,
) -> Result<(), CompilerError> {
    let data = program.borrow_value(value);
    match data.kind() {
        ValueKind::Integer(i) => {
            if i.value() == 0 {
                *zero_run += 1;
            } else {
                flush_zero_run(ctx, zero_run);
                ctx.program.push(Instruction::Word(i.value()));
            }
            Ok(())
        }
        ValueKind::ZeroInit(_) => {
            *zero_run += data.ty().size() / 4;
            Ok(())
        }
        ValueKind::Aggregate(agg) => {
            for &elem in agg.elems() {
                walk_init(elem, program, ctx, zero_run)?;
            }
            Ok(())
        }
        kind => Err(CompilerError::CodeGenerationError(format!(
            "Unsupported global initializer: {:?}",
            kind
        ))),
    }
}

fn flush_zero_run(ctx: &mut Context, zero_run: &mut usize) {
    if *zero_run > 0 {
        ctx.program.push(Instruction::Zero((*zero_run * 4) as i32));
        *zero_run = 0;
    }
}
