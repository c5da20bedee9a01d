//! 后端：把 Koopa IR 程序翻译为 RISC-V 32 位汇编。
//!
//! - `frame`：栈帧规划，每个产生值的指令对应一个溢出槽
//! - `asm`：逐指令翻译，含序言/收尾与全局数据段
//! - `context`：翻译期状态（栈帧、标号、全局名）
//! - `insts` / `program`：指令模型与文本输出
//! - `utils`：带立即数范围纪律的访存辅助

pub mod asm;
pub mod context;
pub mod frame;
pub mod insts;
pub mod program;
pub mod utils;

use koopa::ir::Program;

use crate::back::asm::GenerateAsm;
use crate::back::context::Context;
use crate::CompilerError;

/// 从 Koopa IR 程序生成 RISC-V 汇编文本
pub fn generate_asm(program: &Program) -> Result<String, CompilerError> {
    let mut ctx = Context::new();
    program.generate(program, &mut ctx)?;
    Ok(ctx.program.dump())
}
