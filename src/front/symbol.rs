use koopa::ir::{Function, Value};
use std::collections::HashMap;

use crate::front::ast::DataType;
use crate::CompilerError;

/// 符号表中一个标识符的含义。
///
/// 常量在编译期就有确定的值，不占用任何 IR 存储；
/// 变量和数组记录其 alloc / global alloc 的句柄；
/// 数组形参退化为指针，只保留省略首维之后的各维长度。
#[derive(Debug, Clone)]
pub enum Symbol {
    Const(i32),
    Var(Value),
    Array(Value, Vec<i32>),
    Ptr(Value, Vec<i32>),
    Func(Function, DataType),
}

/// 栈式作用域符号表。
///
/// 下标 0 固定为全局作用域。查找从最内层作用域向外进行；
/// 由于局部变量允许与函数同名，函数调用需改用 `lookup_global`，
/// 依赖全局符号不重名的规定在全局作用域中解析函数。
pub struct SymbolTable {
    scopes: Vec<HashMap<String, Symbol>>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self {
            scopes: vec![HashMap::new()],
        }
    }

    pub fn push_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    pub fn pop_scope(&mut self) -> Result<(), CompilerError> {
        if self.scopes.len() <= 1 {
            return Err(CompilerError::IRGenerationError(
                "Cannot pop the global scope".to_string(),
            ));
        }
        self.scopes.pop();
        Ok(())
    }

    pub fn in_global_scope(&self) -> bool {
        self.scopes.len() == 1
    }

    /// 向当前作用域插入符号。同一作用域内重复定义是约束违反。
    pub fn insert(&mut self, ident: impl Into<String>, symbol: Symbol) -> Result<(), CompilerError> {
        let ident = ident.into();
        let scope = self.scopes.last_mut().ok_or_else(|| {
            CompilerError::IRGenerationError("No scope on stack".to_string())
        })?;
        if scope.contains_key(&ident) {
            return Err(CompilerError::IRGenerationError(format!(
                "Symbol `{}` already declared in this scope",
                ident
            )));
        }
        scope.insert(ident, symbol);
        Ok(())
    }

    /// 从最内层作用域向外查找
    pub fn lookup(&self, ident: &str) -> Option<&Symbol> {
        self.scopes.iter().rev().find_map(|scope| scope.get(ident))
    }

    /// 只在全局作用域中查找（用于函数符号）
    pub fn lookup_global(&self, ident: &str) -> Option<&Symbol> {
        self.scopes[0].get(ident)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inner_scope_shadows_outer() {
        let mut table = SymbolTable::new();
        table.insert("x", Symbol::Const(1)).unwrap();
        table.push_scope();
        table.insert("x", Symbol::Const(2)).unwrap();
        assert!(matches!(table.lookup("x"), Some(Symbol::Const(2))));
        table.pop_scope().unwrap();
        assert!(matches!(table.lookup("x"), Some(Symbol::Const(1))));
    }

    #[test]
    fn duplicate_in_same_scope_is_rejected() {
        let mut table = SymbolTable::new();
        table.insert("x", Symbol::Const(1)).unwrap();
        assert!(table.insert("x", Symbol::Const(2)).is_err());
    }

    #[test]
    fn global_lookup_skips_local_shadows() {
        let mut table = SymbolTable::new();
        table.insert("f", Symbol::Const(7)).unwrap();
        table.push_scope();
        table.insert("f", Symbol::Const(9)).unwrap();
        assert!(matches!(table.lookup("f"), Some(Symbol::Const(9))));
        assert!(matches!(table.lookup_global("f"), Some(Symbol::Const(7))));
    }

    #[test]
    fn popping_global_scope_fails() {
        let mut table = SymbolTable::new();
        assert!(table.pop_scope().is_err());
        assert!(table.in_global_scope());
    }
}
