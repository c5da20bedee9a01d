use crate::back::context::Context;
use crate::back::insts::{Instruction, Reg};

// 统一的访存纪律：偏移超出 imm12 范围时经由 t3 间接寻址。
// 因此 t3 不能携带需要跨越这两个辅助调用存活的值。

pub fn load_reg_with_offset(ctx: &mut Context, reg: Reg, offset: i32) {
    if (-2048..=2047).contains(&offset) {
        ctx.program.push(Instruction::Lw(reg, offset, Reg::Sp));
    } else {
        ctx.program.push(Instruction::Li(Reg::T3, offset));
        ctx.program.push(Instruction::Add(Reg::T3, Reg::Sp, Reg::T3));
        ctx.program.push(Instruction::Lw(reg, 0, Reg::T3));
    }
}

pub fn store_reg_with_offset(ctx: &mut Context, reg: Reg, offset: i32) {
    if (-2048..=2047).contains(&offset) {
        ctx.program.push(Instruction::Sw(reg, offset, Reg::Sp));
    } else {
        ctx.program.push(Instruction::Li(Reg::T3, offset));
        ctx.program.push(Instruction::Add(Reg::T3, Reg::Sp, Reg::T3));
        ctx.program.push(Instruction::Sw(reg, 0, Reg::T3));
    }
}
