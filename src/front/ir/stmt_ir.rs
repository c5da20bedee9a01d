use koopa::ir::builder_traits::*;

use crate::front::ast::{Block, BlockItem, Expr, LVal, Span, Stmt};
use crate::front::ir::expr_ir::generate_lval_addr_ir;
use crate::front::ir::{GenerateIR, IrContext};
use crate::CompilerError;

pub fn generate_return_stmt_ir(
    expr: &Option<Expr>,
    ctx: &mut IrContext,
) -> Result<(), CompilerError> {
    let ret_val = match expr {
        Some(e) => Some(e.generate_ir(ctx)?),
        None => None,
    };
    let ret_inst = ctx.dfg_mut()?.new_value().ret(ret_val);
    ctx.push_inst(ret_inst)
}

pub fn generate_assign_stmt_ir(
    lval: &LVal,
    expr: &Expr,
    ctx: &mut IrContext,
) -> Result<(), CompilerError> {
    let target = generate_lval_addr_ir(lval, ctx)?;
    let value = expr.generate_ir(ctx)?;
    let store = ctx.dfg_mut()?.new_value().store(value, target);
    ctx.push_inst(store)
}

pub fn generate_expr_stmt_ir(
    expr: &Option<Expr>,
    ctx: &mut IrContext,
) -> Result<(), CompilerError> {
    if let Some(e) = expr {
        e.generate_ir(ctx)?;
    }
    Ok(())
}

pub fn generate_block_stmt_ir(block: &Block, ctx: &mut IrContext) -> Result<(), CompilerError> {
    ctx.symbols.push_scope();
    for item in block {
        // 当前块已经终结时，余下的兄弟语句都是死代码
        if ctx.is_terminated()? {
            break;
        }
        match item {
            BlockItem::Decl(decl) => decl.generate_ir(ctx)?,
            BlockItem::Stmt(stmt) => stmt.generate_ir(ctx)?,
        }
    }
    ctx.symbols.pop_scope()
}

pub fn generate_if_stmt_ir(
    cond: &Expr,
    then_stmt: &Stmt,
    else_stmt: Option<&Stmt>,
    ctx: &mut IrContext,
) -> Result<(), CompilerError> {
    let cond_val = cond.generate_ir(ctx)?;

    let k = ctx.fresh_id();
    let then_bb = ctx.new_bb(format!("%then_{}", k))?;
    let else_bb = match else_stmt {
        Some(_) => Some(ctx.new_bb(format!("%else_{}", k))?),
        None => None,
    };
    let end_bb = ctx.new_bb(format!("%if_end_{}", k))?;

    let br = ctx
        .dfg_mut()?
        .new_value()
        .branch(cond_val, then_bb, else_bb.unwrap_or(end_bb));
    ctx.push_inst(br)?;

    ctx.set_current_bb(then_bb);
    then_stmt.generate_ir(ctx)?;
    if !ctx.is_terminated()? {
        let jump = ctx.dfg_mut()?.new_value().jump(end_bb);
        ctx.push_inst(jump)?;
    }

    if let (Some(else_s), Some(else_bb)) = (else_stmt, else_bb) {
        ctx.set_current_bb(else_bb);
        else_s.generate_ir(ctx)?;
        if !ctx.is_terminated()? {
            let jump = ctx.dfg_mut()?.new_value().jump(end_bb);
            ctx.push_inst(jump)?;
        }
    }

    ctx.set_current_bb(end_bb);
    Ok(())
}

pub fn generate_while_stmt_ir(
    cond: &Expr,
    body: &Stmt,
    ctx: &mut IrContext,
) -> Result<(), CompilerError> {
    let k = ctx.fresh_id();
    let entry_bb = ctx.new_bb(format!("%while_entry_{}", k))?;
    let body_bb = ctx.new_bb(format!("%while_body_{}", k))?;
    let end_bb = ctx.new_bb(format!("%while_end_{}", k))?;

    let jump = ctx.dfg_mut()?.new_value().jump(entry_bb);
    ctx.push_inst(jump)?;

    // 条件每轮重算，因此在独立的入口块里求值
    ctx.set_current_bb(entry_bb);
    let cond_val = cond.generate_ir(ctx)?;
    let br = ctx.dfg_mut()?.new_value().branch(cond_val, body_bb, end_bb);
    ctx.push_inst(br)?;

    ctx.set_current_bb(body_bb);
    ctx.loop_stack.push((entry_bb, end_bb));
    body.generate_ir(ctx)?;
    ctx.loop_stack.pop();
    if !ctx.is_terminated()? {
        let jump = ctx.dfg_mut()?.new_value().jump(entry_bb);
        ctx.push_inst(jump)?;
    }

    ctx.set_current_bb(end_bb);
    Ok(())
}

pub fn generate_break_stmt_ir(span: &Span, ctx: &mut IrContext) -> Result<(), CompilerError> {
    let (_, break_bb) = *ctx
        .loop_stack
        .last()
        .ok_or_else(|| ctx.error_at_span("break used outside of loop", *span))?;
    let jump = ctx.dfg_mut()?.new_value().jump(break_bb);
    ctx.push_inst(jump)
}

pub fn generate_continue_stmt_ir(span: &Span, ctx: &mut IrContext) -> Result<(), CompilerError> {
    let (continue_bb, _) = *ctx
        .loop_stack
        .last()
        .ok_or_else(|| ctx.error_at_span("continue used outside of loop", *span))?;
    let jump = ctx.dfg_mut()?.new_value().jump(continue_bb);
    ctx.push_inst(jump)
}
