pub mod context;
pub mod expr_ir;
pub mod init;
pub mod stmt_ir;

use koopa::ir::builder_traits::*;
use koopa::ir::{FunctionData, Type, Value};

use crate::front::ast::*;
use crate::front::ir::expr_ir::*;
use crate::front::ir::init::{flatten_init, product};
use crate::front::ir::stmt_ir::*;
use crate::front::symbol::Symbol;
use crate::CompilerError;

pub use context::IrContext;

pub trait GenerateIR {
    type Output;
    fn generate_ir(&self, ctx: &mut IrContext) -> Result<Self::Output, CompilerError>;
}

impl GenerateIR for CompUnit {
    type Output = ();

    fn generate_ir(&self, ctx: &mut IrContext) -> Result<Self::Output, CompilerError> {
        // SysY 库函数先于一切用户代码进入全局作用域
        declare_library_functions(ctx)?;

        for item in &self.items {
            match item {
                GlobalItem::Decl(decl) => decl.generate_ir(ctx)?,
                GlobalItem::FuncDef(func) => func.generate_ir(ctx)?,
            }
        }
        Ok(())
    }
}

/// 声明 SysY 运行时库函数。
/// 只建函数不加基本块，后端据此识别出这是外部声明。
fn declare_library_functions(ctx: &mut IrContext) -> Result<(), CompilerError> {
    let i32_ptr = Type::get_pointer(Type::get_i32());
    let runtime: [(&str, Vec<Type>, DataType); 8] = [
        ("getint", vec![], DataType::Int),
        ("getch", vec![], DataType::Int),
        ("getarray", vec![i32_ptr.clone()], DataType::Int),
        ("putint", vec![Type::get_i32()], DataType::Void),
        ("putch", vec![Type::get_i32()], DataType::Void),
        ("putarray", vec![Type::get_i32(), i32_ptr], DataType::Void),
        ("starttime", vec![], DataType::Void),
        ("stoptime", vec![], DataType::Void),
    ];
    for (name, param_tys, ret) in runtime {
        let ret_ty = match ret {
            DataType::Int => Type::get_i32(),
            DataType::Void => Type::get_unit(),
        };
        let func_data = FunctionData::new(format!("@{}", name), param_tys, ret_ty);
        let f = ctx.program.new_func(func_data);
        ctx.symbols.insert(name, Symbol::Func(f, ret))?;
    }
    Ok(())
}

fn eval_dims(dims: &[Expr], ctx: &IrContext) -> Result<Vec<i32>, CompilerError> {
    dims.iter().map(|d| eval_const_expr(d, ctx)).collect()
}

fn array_type_from_dims(dims: &[i32]) -> Type {
    dims.iter()
        .rev()
        .fold(Type::get_i32(), |ty, &n| Type::get_array(ty, n as usize))
}

/// 按声明形状构造嵌套 Aggregate 初始化值
fn build_aggregate(vals: &[i32], dims: &[i32], ctx: &mut IrContext) -> Value {
    if dims.len() == 1 {
        let mut elems = Vec::with_capacity(vals.len());
        for &v in vals {
            elems.push(ctx.program.new_value().integer(v));
        }
        return ctx.program.new_value().aggregate(elems);
    }
    let sub_size = product(&dims[1..]);
    let mut elems = Vec::with_capacity(dims[0] as usize);
    for i in 0..dims[0] as usize {
        let sub = build_aggregate(&vals[i * sub_size..(i + 1) * sub_size], &dims[1..], ctx);
        elems.push(sub);
    }
    ctx.program.new_value().aggregate(elems)
}

fn emit_global_array(
    name: &str,
    dims: &[i32],
    values: &[i32],
    ctx: &mut IrContext,
) -> Result<Value, CompilerError> {
    let init = if values.iter().all(|&v| v == 0) {
        ctx.program.new_value().zero_init(array_type_from_dims(dims))
    } else {
        build_aggregate(values, dims, ctx)
    };
    let alloc = ctx.program.new_value().global_alloc(init);
    let id = ctx.fresh_id();
    ctx.program
        .set_value_name(alloc, Some(format!("@{}_{}", name, id)));
    Ok(alloc)
}

fn emit_local_array_alloc(
    name: &str,
    dims: &[i32],
    ctx: &mut IrContext,
) -> Result<Value, CompilerError> {
    let alloc = ctx.dfg_mut()?.new_value().alloc(array_type_from_dims(dims));
    let id = ctx.fresh_id();
    ctx.dfg_mut()?
        .set_value_name(alloc, Some(format!("@{}_{}", name, id)));
    ctx.push_inst(alloc)?;
    Ok(alloc)
}

/// 沿维度递归下降，为每个标量槽生成 getelemptr + store
fn store_local_array_values(
    base: Value,
    vals: &[i32],
    dims: &[i32],
    ctx: &mut IrContext,
) -> Result<(), CompilerError> {
    if dims.len() == 1 {
        for (i, &v) in vals.iter().enumerate() {
            let idx = ctx.dfg_mut()?.new_value().integer(i as i32);
            let ptr = ctx.dfg_mut()?.new_value().get_elem_ptr(base, idx);
            ctx.push_inst(ptr)?;
            let val = ctx.dfg_mut()?.new_value().integer(v);
            let store = ctx.dfg_mut()?.new_value().store(val, ptr);
            ctx.push_inst(store)?;
        }
        return Ok(());
    }
    let sub_size = product(&dims[1..]);
    for i in 0..dims[0] as usize {
        let idx = ctx.dfg_mut()?.new_value().integer(i as i32);
        let ptr = ctx.dfg_mut()?.new_value().get_elem_ptr(base, idx);
        ctx.push_inst(ptr)?;
        store_local_array_values(ptr, &vals[i * sub_size..(i + 1) * sub_size], &dims[1..], ctx)?;
    }
    Ok(())
}

/// 同上，但元素是运行期表达式；空缺补 0
fn store_local_array_exprs(
    base: Value,
    elems: &[Option<&Expr>],
    dims: &[i32],
    ctx: &mut IrContext,
) -> Result<(), CompilerError> {
    if dims.len() == 1 {
        for (i, elem) in elems.iter().enumerate() {
            let idx = ctx.dfg_mut()?.new_value().integer(i as i32);
            let ptr = ctx.dfg_mut()?.new_value().get_elem_ptr(base, idx);
            ctx.push_inst(ptr)?;
            let val = match elem {
                Some(expr) => expr.generate_ir(ctx)?,
                None => ctx.dfg_mut()?.new_value().integer(0),
            };
            let store = ctx.dfg_mut()?.new_value().store(val, ptr);
            ctx.push_inst(store)?;
        }
        return Ok(());
    }
    let sub_size = product(&dims[1..]);
    for i in 0..dims[0] as usize {
        let idx = ctx.dfg_mut()?.new_value().integer(i as i32);
        let ptr = ctx.dfg_mut()?.new_value().get_elem_ptr(base, idx);
        ctx.push_inst(ptr)?;
        store_local_array_exprs(ptr, &elems[i * sub_size..(i + 1) * sub_size], &dims[1..], ctx)?;
    }
    Ok(())
}

impl GenerateIR for FuncDef {
    type Output = ();

    fn generate_ir(&self, ctx: &mut IrContext) -> Result<Self::Output, CompilerError> {
        // main 保留原名，其余函数加唯一后缀，避免与带后缀的全局变量冲突
        let ir_name = if self.name == "main" {
            "@main".to_string()
        } else {
            let id = ctx.fresh_id();
            format!("@{}_{}", self.name, id)
        };

        // 形参类型；数组形参省略首维，退化为指针
        let mut param_tys = Vec::with_capacity(self.params.len());
        let mut param_dims = Vec::with_capacity(self.params.len());
        for param in &self.params {
            if param.is_array {
                let dims = eval_dims(&param.dims, ctx)?;
                let base_ty = array_type_from_dims(&dims);
                param_tys.push(Type::get_pointer(base_ty));
                param_dims.push(Some(dims));
            } else {
                param_tys.push(Type::get_i32());
                param_dims.push(None);
            }
        }
        let ret_ty = match self.ty {
            DataType::Int => Type::get_i32(),
            DataType::Void => Type::get_unit(),
        };
        let func_data = FunctionData::new(ir_name, param_tys.clone(), ret_ty);
        let func = ctx.program.new_func(func_data);

        // 先在全局作用域登记函数符号，函数体内的递归调用才能解析
        ctx.symbols.insert(self.name.clone(), Symbol::Func(func, self.ty))?;
        ctx.current_func = Some(func);

        let entry = ctx.new_bb("%entry".to_string())?;
        ctx.set_current_bb(entry);
        ctx.entry_bb = Some(entry);

        // 形参作用域：每个形参统一分配局部槽并存入实参值，
        // 这样形参与普通局部变量在赋值语义上没有区别
        ctx.symbols.push_scope();
        let param_values: Vec<Value> = ctx.program.func(func).params().to_vec();
        for (idx, param) in self.params.iter().enumerate() {
            let alloc = ctx.dfg_mut()?.new_value().alloc(param_tys[idx].clone());
            let id = ctx.fresh_id();
            ctx.dfg_mut()?
                .set_value_name(alloc, Some(format!("@{}_{}", param.name, id)));
            ctx.push_inst(alloc)?;
            let store = ctx.dfg_mut()?.new_value().store(param_values[idx], alloc);
            ctx.push_inst(store)?;
            let symbol = match &param_dims[idx] {
                Some(dims) => Symbol::Ptr(alloc, dims.clone()),
                None => Symbol::Var(alloc),
            };
            ctx.symbols.insert(param.name.clone(), symbol)?;
        }

        // 函数体是一个 Block，自带内层作用域，因此函数体内可以重新声明与形参同名的变量
        generate_block_stmt_ir(&self.body, ctx)?;

        // 控制流落到函数末尾时补上 return；int 函数返回 0
        if !ctx.is_terminated()? {
            let ret_inst = match self.ty {
                DataType::Int => {
                    let zero = ctx.dfg_mut()?.new_value().integer(0);
                    ctx.dfg_mut()?.new_value().ret(Some(zero))
                }
                DataType::Void => ctx.dfg_mut()?.new_value().ret(None),
            };
            ctx.push_inst(ret_inst)?;
        }

        ctx.symbols.pop_scope()?;
        ctx.current_func = None;
        ctx.current_bb = None;
        ctx.entry_bb = None;
        Ok(())
    }
}

impl GenerateIR for Decl {
    type Output = ();

    fn generate_ir(&self, ctx: &mut IrContext) -> Result<Self::Output, CompilerError> {
        match self {
            Decl::ConstDecl(decl) => decl.generate_ir(ctx),
            Decl::VarDecl(decl) => decl.generate_ir(ctx),
        }
    }
}

impl GenerateIR for ConstDecl {
    type Output = ();

    fn generate_ir(&self, ctx: &mut IrContext) -> Result<Self::Output, CompilerError> {
        for def in &self.defs {
            if def.dims.is_empty() {
                // 标量常量只存在于符号表，不产生任何 IR
                let expr = match &def.init {
                    ConstInitVal::Single(expr) => expr,
                    ConstInitVal::List(_) => {
                        return Err(ctx.error_at_span(
                            format!("Scalar constant `{}` cannot take a brace initializer", def.name),
                            def.span,
                        ));
                    }
                };
                let value = eval_const_expr(expr, ctx)?;
                ctx.symbols.insert(def.name.clone(), Symbol::Const(value))?;
            } else {
                let dims = eval_dims(&def.dims, ctx)?;
                let elems = match &def.init {
                    ConstInitVal::List(elems) => elems,
                    ConstInitVal::Single(_) => {
                        return Err(ctx.error_at_span(
                            format!("Constant array `{}` must be initialized with a list", def.name),
                            def.span,
                        ));
                    }
                };
                let flat = flatten_init(elems, &dims)?;
                let mut values = Vec::with_capacity(flat.len());
                for elem in flat {
                    values.push(match elem {
                        Some(expr) => eval_const_expr(expr, ctx)?,
                        None => 0,
                    });
                }
                let alloc = if ctx.symbols.in_global_scope() {
                    emit_global_array(&def.name, &dims, &values, ctx)?
                } else {
                    let alloc = emit_local_array_alloc(&def.name, &dims, ctx)?;
                    store_local_array_values(alloc, &values, &dims, ctx)?;
                    alloc
                };
                ctx.symbols.insert(def.name.clone(), Symbol::Array(alloc, dims))?;
            }
        }
        Ok(())
    }
}

impl GenerateIR for VarDecl {
    type Output = ();

    fn generate_ir(&self, ctx: &mut IrContext) -> Result<Self::Output, CompilerError> {
        let is_global = ctx.symbols.in_global_scope();
        for def in &self.defs {
            if def.dims.is_empty() {
                if is_global {
                    // 全局标量：初始值必须是常量表达式
                    let init = match &def.init {
                        Some(InitVal::Single(expr)) => {
                            let v = eval_const_expr(expr, ctx)?;
                            ctx.program.new_value().integer(v)
                        }
                        Some(InitVal::List(_)) => {
                            return Err(ctx.error_at_span(
                                format!("Scalar variable `{}` cannot take a brace initializer", def.name),
                                def.span,
                            ));
                        }
                        None => ctx.program.new_value().zero_init(Type::get_i32()),
                    };
                    let alloc = ctx.program.new_value().global_alloc(init);
                    let id = ctx.fresh_id();
                    ctx.program
                        .set_value_name(alloc, Some(format!("@{}_{}", def.name, id)));
                    ctx.symbols.insert(def.name.clone(), Symbol::Var(alloc))?;
                } else {
                    let alloc = ctx.dfg_mut()?.new_value().alloc(Type::get_i32());
                    let id = ctx.fresh_id();
                    ctx.dfg_mut()?
                        .set_value_name(alloc, Some(format!("@{}_{}", def.name, id)));
                    ctx.push_inst(alloc)?;
                    match &def.init {
                        Some(InitVal::Single(expr)) => {
                            let init_val = expr.generate_ir(ctx)?;
                            let store = ctx.dfg_mut()?.new_value().store(init_val, alloc);
                            ctx.push_inst(store)?;
                        }
                        Some(InitVal::List(_)) => {
                            return Err(ctx.error_at_span(
                                format!("Scalar variable `{}` cannot take a brace initializer", def.name),
                                def.span,
                            ));
                        }
                        None => {}
                    }
                    ctx.symbols.insert(def.name.clone(), Symbol::Var(alloc))?;
                }
            } else {
                let dims = eval_dims(&def.dims, ctx)?;
                if is_global {
                    // 全局数组：展平后逐项求值，未给出的项为 0
                    let values = match &def.init {
                        Some(InitVal::List(elems)) => {
                            let flat = flatten_init(elems, &dims)?;
                            let mut values = Vec::with_capacity(flat.len());
                            for elem in flat {
                                values.push(match elem {
                                    Some(expr) => eval_const_expr(expr, ctx)?,
                                    None => 0,
                                });
                            }
                            values
                        }
                        Some(InitVal::Single(_)) => {
                            return Err(ctx.error_at_span(
                                format!("Array `{}` must be initialized with a list", def.name),
                                def.span,
                            ));
                        }
                        None => vec![0; product(&dims)],
                    };
                    let alloc = emit_global_array(&def.name, &dims, &values, ctx)?;
                    ctx.symbols.insert(def.name.clone(), Symbol::Array(alloc, dims))?;
                } else {
                    let alloc = emit_local_array_alloc(&def.name, &dims, ctx)?;
                    match &def.init {
                        Some(InitVal::List(elems)) => {
                            let flat = flatten_init(elems, &dims)?;
                            store_local_array_exprs(alloc, &flat, &dims, ctx)?;
                        }
                        Some(InitVal::Single(_)) => {
                            return Err(ctx.error_at_span(
                                format!("Array `{}` must be initialized with a list", def.name),
                                def.span,
                            ));
                        }
                        None => {}
                    }
                    ctx.symbols.insert(def.name.clone(), Symbol::Array(alloc, dims))?;
                }
            }
        }
        Ok(())
    }
}

impl GenerateIR for Stmt {
    type Output = ();

    fn generate_ir(&self, ctx: &mut IrContext) -> Result<Self::Output, CompilerError> {
        match self {
            Stmt::Return(expr) => generate_return_stmt_ir(expr, ctx),
            Stmt::Assign(lval, expr) => generate_assign_stmt_ir(lval, expr, ctx),
            Stmt::Block(block) => generate_block_stmt_ir(block, ctx),
            Stmt::Expr(expr) => generate_expr_stmt_ir(expr, ctx),
            Stmt::If {
                cond,
                then_stmt,
                else_stmt,
                ..
            } => generate_if_stmt_ir(cond, then_stmt, else_stmt.as_deref(), ctx),
            Stmt::While { cond, body, .. } => generate_while_stmt_ir(cond, body, ctx),
            Stmt::Break(span) => generate_break_stmt_ir(span, ctx),
            Stmt::Continue(span) => generate_continue_stmt_ir(span, ctx),
        }
    }
}

impl GenerateIR for Expr {
    type Output = Value;

    fn generate_ir(&self, ctx: &mut IrContext) -> Result<Self::Output, CompilerError> {
        // 整棵子树可编译期求值时直接给出整数，不发射任何指令；
        // 常量就这样自下而上传播
        if let Ok(v) = eval_const_expr(self, ctx) {
            return Ok(ctx.dfg_mut()?.new_value().integer(v));
        }
        match self {
            Expr::IntLiteral(n, _) => Ok(ctx.dfg_mut()?.new_value().integer(*n)),
            Expr::LVal(lval) => generate_lval_ir(lval, ctx),
            Expr::UnaryOp(op, expr, _) => generate_unary_op_ir(op, expr, ctx),
            Expr::BinaryOp(op, lhs, rhs, _) => generate_binary_op_ir(op, lhs, rhs, ctx),
            Expr::RelOp(op, lhs, rhs, _) => generate_rel_op_ir(op, lhs, rhs, ctx),
            Expr::EqOp(op, lhs, rhs, _) => generate_eq_op_ir(op, lhs, rhs, ctx),
            Expr::LAndOp(_, lhs, rhs, _) => generate_land_op_ir(lhs, rhs, ctx),
            Expr::LOrOp(_, lhs, rhs, _) => generate_lor_op_ir(lhs, rhs, ctx),
            Expr::Call(name, args, span) => generate_call_ir(name, args, *span, ctx),
        }
    }
}
