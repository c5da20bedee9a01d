use koopa::ir::builder_traits::*;
use koopa::ir::{BinaryOp as IrBinaryOp, Type, Value};

use crate::front::ast::*;
use crate::front::ir::{GenerateIR, IrContext};
use crate::front::symbol::Symbol;
use crate::CompilerError;

/// 编译期求值。
///
/// 折叠一律按 32 位补码回绕语义进行；除零/模零不折叠，
/// 返回错误由调用方决定是中止（必须为常量的位置）还是退回运行期。
/// `&&` 与 `||` 在求值时同样短路，因此 `0 && x` 不要求 x 可求值。
pub fn eval_const_expr(expr: &Expr, ctx: &IrContext) -> Result<i32, CompilerError> {
    match expr {
        Expr::IntLiteral(n, _) => Ok(*n),
        Expr::LVal(lval) => {
            if !lval.indices.is_empty() {
                return Err(CompilerError::IRGenerationError(
                    "Array element access is not allowed in constant expressions".to_string(),
                ));
            }
            match ctx.symbols.lookup(&lval.name) {
                Some(Symbol::Const(v)) => Ok(*v),
                Some(_) => Err(CompilerError::IRGenerationError(format!(
                    "`{}` is not a constant",
                    lval.name
                ))),
                None => Err(CompilerError::IRGenerationError(format!(
                    "Symbol `{}` not found in constant expression",
                    lval.name
                ))),
            }
        }
        Expr::UnaryOp(op, sub, _) => {
            let v = eval_const_expr(sub, ctx)?;
            Ok(match op {
                UnaryOp::Plus => v,
                UnaryOp::Minus => v.wrapping_neg(),
                UnaryOp::Not => (v == 0) as i32,
            })
        }
        Expr::BinaryOp(op, lhs, rhs, _) => {
            let l = eval_const_expr(lhs, ctx)?;
            let r = eval_const_expr(rhs, ctx)?;
            match op {
                BinaryOp::Add => Ok(l.wrapping_add(r)),
                BinaryOp::Sub => Ok(l.wrapping_sub(r)),
                BinaryOp::Mul => Ok(l.wrapping_mul(r)),
                BinaryOp::Div => {
                    if r == 0 {
                        return Err(CompilerError::IRGenerationError(
                            "Division by zero in constant expression".to_string(),
                        ));
                    }
                    Ok(l.wrapping_div(r))
                }
                BinaryOp::Mod => {
                    if r == 0 {
                        return Err(CompilerError::IRGenerationError(
                            "Modulo by zero in constant expression".to_string(),
                        ));
                    }
                    Ok(l.wrapping_rem(r))
                }
            }
        }
        Expr::RelOp(op, lhs, rhs, _) => {
            let l = eval_const_expr(lhs, ctx)?;
            let r = eval_const_expr(rhs, ctx)?;
            let result = match op {
                RelOp::Lt => l < r,
                RelOp::Gt => l > r,
                RelOp::Le => l <= r,
                RelOp::Ge => l >= r,
            };
            Ok(result as i32)
        }
        Expr::EqOp(op, lhs, rhs, _) => {
            let l = eval_const_expr(lhs, ctx)?;
            let r = eval_const_expr(rhs, ctx)?;
            let result = match op {
                EqOp::Eq => l == r,
                EqOp::Ne => l != r,
            };
            Ok(result as i32)
        }
        Expr::LAndOp(_, lhs, rhs, _) => {
            if eval_const_expr(lhs, ctx)? == 0 {
                Ok(0)
            } else {
                Ok((eval_const_expr(rhs, ctx)? != 0) as i32)
            }
        }
        Expr::LOrOp(_, lhs, rhs, _) => {
            if eval_const_expr(lhs, ctx)? != 0 {
                Ok(1)
            } else {
                Ok((eval_const_expr(rhs, ctx)? != 0) as i32)
            }
        }
        Expr::Call(_, _, _) => Err(CompilerError::IRGenerationError(
            "Function calls are not allowed in constant expressions".to_string(),
        )),
    }
}

fn emit_binary(
    op: IrBinaryOp,
    lhs: Value,
    rhs: Value,
    ctx: &mut IrContext,
) -> Result<Value, CompilerError> {
    let inst = ctx.dfg_mut()?.new_value().binary(op, lhs, rhs);
    ctx.push_inst(inst)?;
    Ok(inst)
}

/// (val != 0) 归一化：SysY 把任意非零当真，Koopa IR 的布尔值是 0/1
fn emit_ne_zero(val: Value, ctx: &mut IrContext) -> Result<Value, CompilerError> {
    let zero = ctx.dfg_mut()?.new_value().integer(0);
    emit_binary(IrBinaryOp::NotEq, val, zero, ctx)
}

pub fn generate_unary_op_ir(
    op: &UnaryOp,
    expr: &Expr,
    ctx: &mut IrContext,
) -> Result<Value, CompilerError> {
    let operand = expr.generate_ir(ctx)?;
    match op {
        UnaryOp::Plus => Ok(operand),
        UnaryOp::Minus => {
            let zero = ctx.dfg_mut()?.new_value().integer(0);
            emit_binary(IrBinaryOp::Sub, zero, operand, ctx)
        }
        UnaryOp::Not => {
            let zero = ctx.dfg_mut()?.new_value().integer(0);
            emit_binary(IrBinaryOp::Eq, operand, zero, ctx)
        }
    }
}

pub fn generate_binary_op_ir(
    op: &BinaryOp,
    lhs: &Expr,
    rhs: &Expr,
    ctx: &mut IrContext,
) -> Result<Value, CompilerError> {
    let l = lhs.generate_ir(ctx)?;
    let r = rhs.generate_ir(ctx)?;
    let ir_op = match op {
        BinaryOp::Add => IrBinaryOp::Add,
        BinaryOp::Sub => IrBinaryOp::Sub,
        BinaryOp::Mul => IrBinaryOp::Mul,
        BinaryOp::Div => IrBinaryOp::Div,
        BinaryOp::Mod => IrBinaryOp::Mod,
    };
    emit_binary(ir_op, l, r, ctx)
}

pub fn generate_rel_op_ir(
    op: &RelOp,
    lhs: &Expr,
    rhs: &Expr,
    ctx: &mut IrContext,
) -> Result<Value, CompilerError> {
    let l = lhs.generate_ir(ctx)?;
    let r = rhs.generate_ir(ctx)?;
    let ir_op = match op {
        RelOp::Lt => IrBinaryOp::Lt,
        RelOp::Gt => IrBinaryOp::Gt,
        RelOp::Le => IrBinaryOp::Le,
        RelOp::Ge => IrBinaryOp::Ge,
    };
    emit_binary(ir_op, l, r, ctx)
}

pub fn generate_eq_op_ir(
    op: &EqOp,
    lhs: &Expr,
    rhs: &Expr,
    ctx: &mut IrContext,
) -> Result<Value, CompilerError> {
    let l = lhs.generate_ir(ctx)?;
    let r = rhs.generate_ir(ctx)?;
    let ir_op = match op {
        EqOp::Eq => IrBinaryOp::Eq,
        EqOp::Ne => IrBinaryOp::NotEq,
    };
    emit_binary(ir_op, l, r, ctx)
}

// 短路求值展开成对结果槽的分支写入。
// 整个表达式或左操作数可折叠的情形已经在 Expr::generate_ir 的
// 折叠入口处理掉了，走到这里时左侧一定需要运行期求值。

pub fn generate_land_op_ir(
    lhs: &Expr,
    rhs: &Expr,
    ctx: &mut IrContext,
) -> Result<Value, CompilerError> {
    // r = 0; if (lhs) r = (rhs != 0); 结果为 r
    let result = ctx.alloc_in_entry(Type::get_i32())?;
    let zero = ctx.dfg_mut()?.new_value().integer(0);
    let store = ctx.dfg_mut()?.new_value().store(zero, result);
    ctx.push_inst(store)?;

    let lhs_val = lhs.generate_ir(ctx)?;
    let k = ctx.fresh_id();
    let rhs_bb = ctx.new_bb(format!("%land_rhs_{}", k))?;
    let end_bb = ctx.new_bb(format!("%land_end_{}", k))?;
    let br = ctx.dfg_mut()?.new_value().branch(lhs_val, rhs_bb, end_bb);
    ctx.push_inst(br)?;

    ctx.set_current_bb(rhs_bb);
    let rhs_val = rhs.generate_ir(ctx)?;
    let normalized = emit_ne_zero(rhs_val, ctx)?;
    let store = ctx.dfg_mut()?.new_value().store(normalized, result);
    ctx.push_inst(store)?;
    let jump = ctx.dfg_mut()?.new_value().jump(end_bb);
    ctx.push_inst(jump)?;

    ctx.set_current_bb(end_bb);
    let load = ctx.dfg_mut()?.new_value().load(result);
    ctx.push_inst(load)?;
    Ok(load)
}

pub fn generate_lor_op_ir(
    lhs: &Expr,
    rhs: &Expr,
    ctx: &mut IrContext,
) -> Result<Value, CompilerError> {
    // r = 1; if (!lhs) r = (rhs != 0); 结果为 r
    let result = ctx.alloc_in_entry(Type::get_i32())?;
    let one = ctx.dfg_mut()?.new_value().integer(1);
    let store = ctx.dfg_mut()?.new_value().store(one, result);
    ctx.push_inst(store)?;

    let lhs_val = lhs.generate_ir(ctx)?;
    let k = ctx.fresh_id();
    let rhs_bb = ctx.new_bb(format!("%lor_rhs_{}", k))?;
    let end_bb = ctx.new_bb(format!("%lor_end_{}", k))?;
    let br = ctx.dfg_mut()?.new_value().branch(lhs_val, end_bb, rhs_bb);
    ctx.push_inst(br)?;

    ctx.set_current_bb(rhs_bb);
    let rhs_val = rhs.generate_ir(ctx)?;
    let normalized = emit_ne_zero(rhs_val, ctx)?;
    let store = ctx.dfg_mut()?.new_value().store(normalized, result);
    ctx.push_inst(store)?;
    let jump = ctx.dfg_mut()?.new_value().jump(end_bb);
    ctx.push_inst(jump)?;

    ctx.set_current_bb(end_bb);
    let load = ctx.dfg_mut()?.new_value().load(result);
    ctx.push_inst(load)?;
    Ok(load)
}

/// 逐维生成取址指令；数组指针（形参）的第一维用 getptr
fn index_chain(
    base: Value,
    indices: &[Expr],
    first_is_getptr: bool,
    ctx: &mut IrContext,
) -> Result<Value, CompilerError> {
    let mut ptr = base;
    for (i, index_expr) in indices.iter().enumerate() {
        let index = index_expr.generate_ir(ctx)?;
        let next = if first_is_getptr && i == 0 {
            ctx.dfg_mut()?.new_value().get_ptr(ptr, index)
        } else {
            ctx.dfg_mut()?.new_value().get_elem_ptr(ptr, index)
        };
        ctx.push_inst(next)?;
        ptr = next;
    }
    Ok(ptr)
}

/// 数组退化：`getelemptr ptr, 0` 得到指向首个子数组的指针
fn decay_to_first_elem(ptr: Value, ctx: &mut IrContext) -> Result<Value, CompilerError> {
    let zero = ctx.dfg_mut()?.new_value().integer(0);
    let gep = ctx.dfg_mut()?.new_value().get_elem_ptr(ptr, zero);
    ctx.push_inst(gep)?;
    Ok(gep)
}

/// 取值语境下的左值：
/// - 标量常量直接给出整数（一般已被折叠入口处理，数组下标里的不会）；
/// - 标量变量 load；
/// - 数组满秩访问 load，欠秩访问退化成指针（只会作为实参出现）；
/// - 指针形参先 load 底层指针再走同样的规则。
pub fn generate_lval_ir(lval: &LVal, ctx: &mut IrContext) -> Result<Value, CompilerError> {
    let symbol = ctx
        .symbols
        .lookup(&lval.name)
        .cloned()
        .ok_or_else(|| ctx.error_at_span(format!("Symbol `{}` not found", lval.name), lval.span))?;
    match symbol {
        Symbol::Const(v) => {
            if !lval.indices.is_empty() {
                return Err(ctx.error_at_span(
                    format!("Indexed access on scalar constant `{}`", lval.name),
                    lval.span,
                ));
            }
            Ok(ctx.dfg_mut()?.new_value().integer(v))
        }
        Symbol::Var(slot) => {
            if !lval.indices.is_empty() {
                return Err(ctx.error_at_span(
                    format!("Indexed access on scalar variable `{}`", lval.name),
                    lval.span,
                ));
            }
            let load = ctx.dfg_mut()?.new_value().load(slot);
            ctx.push_inst(load)?;
            Ok(load)
        }
        Symbol::Array(base, dims) => {
            if lval.indices.len() > dims.len() {
                return Err(ctx.error_at_span(
                    format!("Too many indices for array `{}`", lval.name),
                    lval.span,
                ));
            }
            let ptr = index_chain(base, &lval.indices, false, ctx)?;
            if lval.indices.len() == dims.len() {
                let load = ctx.dfg_mut()?.new_value().load(ptr);
                ctx.push_inst(load)?;
                Ok(load)
            } else {
                decay_to_first_elem(ptr, ctx)
            }
        }
        Symbol::Ptr(slot, trailing_dims) => {
            let total_dims = trailing_dims.len() + 1;
            if lval.indices.len() > total_dims {
                return Err(ctx.error_at_span(
                    format!("Too many indices for array parameter `{}`", lval.name),
                    lval.span,
                ));
            }
            let base = ctx.dfg_mut()?.new_value().load(slot);
            ctx.push_inst(base)?;
            if lval.indices.is_empty() {
                // 原样转传：槽里的指针已经是退化后的类型
                return Ok(base);
            }
            let ptr = index_chain(base, &lval.indices, true, ctx)?;
            if lval.indices.len() == total_dims {
                let load = ctx.dfg_mut()?.new_value().load(ptr);
                ctx.push_inst(load)?;
                Ok(load)
            } else {
                decay_to_first_elem(ptr, ctx)
            }
        }
        Symbol::Func(..) => Err(ctx.error_at_span(
            format!("Function `{}` used as a value", lval.name),
            lval.span,
        )),
    }
}

/// 赋值语境下的左值：返回目标地址
pub fn generate_lval_addr_ir(lval: &LVal, ctx: &mut IrContext) -> Result<Value, CompilerError> {
    let symbol = ctx
        .symbols
        .lookup(&lval.name)
        .cloned()
        .ok_or_else(|| ctx.error_at_span(format!("Symbol `{}` not found", lval.name), lval.span))?;
    match symbol {
        Symbol::Const(_) => Err(ctx.error_at_span(
            format!("Cannot assign to constant `{}`", lval.name),
            lval.span,
        )),
        Symbol::Var(slot) => {
            if !lval.indices.is_empty() {
                return Err(ctx.error_at_span(
                    format!("Indexed access on scalar variable `{}`", lval.name),
                    lval.span,
                ));
            }
            Ok(slot)
        }
        Symbol::Array(base, dims) => {
            if lval.indices.len() != dims.len() {
                return Err(ctx.error_at_span(
                    format!("Assignment target `{}` must be a scalar element", lval.name),
                    lval.span,
                ));
            }
            index_chain(base, &lval.indices, false, ctx)
        }
        Symbol::Ptr(slot, trailing_dims) => {
            if lval.indices.len() != trailing_dims.len() + 1 {
                return Err(ctx.error_at_span(
                    format!("Assignment target `{}` must be a scalar element", lval.name),
                    lval.span,
                ));
            }
            let base = ctx.dfg_mut()?.new_value().load(slot);
            ctx.push_inst(base)?;
            index_chain(base, &lval.indices, true, ctx)
        }
        Symbol::Func(..) => Err(ctx.error_at_span(
            format!("Cannot assign to function `{}`", lval.name),
            lval.span,
        )),
    }
}

pub fn generate_call_ir(
    func_name: &str,
    args: &[Expr],
    span: Span,
    ctx: &mut IrContext,
) -> Result<Value, CompilerError> {
    // 局部变量可以与函数同名，因此函数一律在全局作用域解析
    let (func, _) = match ctx.symbols.lookup_global(func_name) {
        Some(Symbol::Func(f, ret)) => (*f, *ret),
        Some(_) => {
            return Err(ctx.error_at_span(
                format!("`{}` is not a function", func_name),
                span,
            ));
        }
        None => {
            return Err(ctx.error_at_span(
                format!("Function `{}` not found", func_name),
                span,
            ));
        }
    };
    let mut arg_values = Vec::with_capacity(args.len());
    for arg in args {
        arg_values.push(arg.generate_ir(ctx)?);
    }
    let call = ctx.dfg_mut()?.new_value().call(func, arg_values);
    ctx.push_inst(call)?;
    Ok(call)
}
