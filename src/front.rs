use koopa::ir::Program;
use crate::front::{ast::CompUnit, ir::*};
use crate::utils::SourceMap;
use crate::CompilerError;

pub mod ast;
pub mod symbol;
pub mod ir;

/// 把语法树降低为 Koopa IR 程序
pub fn generate_ir(ast: &CompUnit, source_map: Option<SourceMap>) -> Result<Program, CompilerError> {
    let mut ctx = IrContext::new(source_map);
    ast.generate_ir(&mut ctx)?;
    Ok(ctx.program)
}
